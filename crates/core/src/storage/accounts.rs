use anyhow::{Context, Result};
use sqlx::{Pool, Postgres};

use crate::encryption::CredentialCipher;
use crate::models::RedditCredentials;

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
    user_agent: String,
}

const SAVE_ACCOUNT_QUERY: &str = r#"
    INSERT INTO accounts (account_name, client_id, client_secret, username, password, user_agent)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (account_name) DO UPDATE SET
        client_id = EXCLUDED.client_id,
        client_secret = EXCLUDED.client_secret,
        username = EXCLUDED.username,
        password = EXCLUDED.password,
        user_agent = EXCLUDED.user_agent,
        last_updated = NOW()
"#;

const GET_ACCOUNT_QUERY: &str = r#"
    SELECT client_id, client_secret, username, password, user_agent
    FROM accounts WHERE account_name = $1
"#;

const DELETE_ACCOUNT_QUERY: &str = r#"
    DELETE FROM accounts WHERE account_name = $1
"#;

const LIST_ACCOUNT_NAMES_QUERY: &str = r#"
    SELECT account_name FROM accounts ORDER BY account_name
"#;

/// Persist an account with its secret fields encrypted at rest.
pub async fn save_account(
    pool: &Pool<Postgres>,
    cipher: &CredentialCipher,
    account_name: &str,
    credentials: &RedditCredentials,
) -> Result<()> {
    sqlx::query(SAVE_ACCOUNT_QUERY)
        .bind(account_name)
        .bind(&credentials.client_id)
        .bind(cipher.encrypt(&credentials.client_secret)?)
        .bind(&credentials.username)
        .bind(cipher.encrypt(&credentials.password)?)
        .bind(&credentials.user_agent)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load and decrypt an account's credentials.
pub async fn get_account(
    pool: &Pool<Postgres>,
    cipher: &CredentialCipher,
    account_name: &str,
) -> Result<Option<RedditCredentials>> {
    let Some(row) = sqlx::query_as::<_, AccountRow>(GET_ACCOUNT_QUERY)
        .bind(account_name)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    Ok(Some(RedditCredentials {
        client_id: row.client_id,
        client_secret: cipher
            .decrypt(&row.client_secret)
            .with_context(|| format!("failed to decrypt secret for account {}", account_name))?,
        username: row.username,
        password: cipher
            .decrypt(&row.password)
            .with_context(|| format!("failed to decrypt password for account {}", account_name))?,
        user_agent: row.user_agent,
    }))
}

pub async fn delete_account(pool: &Pool<Postgres>, account_name: &str) -> Result<bool> {
    let result = sqlx::query(DELETE_ACCOUNT_QUERY)
        .bind(account_name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_account_names(pool: &Pool<Postgres>) -> Result<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(LIST_ACCOUNT_NAMES_QUERY)
        .fetch_all(pool)
        .await?;
    Ok(names)
}
