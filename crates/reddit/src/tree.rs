//! Depth-first walk over a submission's comment tree.
//!
//! Comments are materialised as flat records with `parent_id` and
//! `parent_type`; the tree shape is recoverable by index lookup. A node
//! already present in the store is not re-materialised, but its replies
//! are still visited so nested comments added since the last pass are
//! collected.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use subfleet_core::models::{CommentDocument, ParentKind};

/// Result of one tree walk.
#[derive(Debug, Default)]
pub struct TreeWalk {
    pub comments: Vec<CommentDocument>,
    /// Comment ids hidden behind "more comments" stubs
    pub more_ids: Vec<String>,
    /// Nodes skipped because they were already stored
    pub already_stored: usize,
}

pub struct WalkContext<'a> {
    pub post_id: &'a str,
    pub subreddit: &'a str,
    pub existing_ids: &'a HashSet<String>,
    pub max_depth: u32,
    pub scraped_at: DateTime<Utc>,
}

/// Walk the children of a comment listing.
pub fn walk_comment_tree(children: &[Value], ctx: &WalkContext<'_>) -> TreeWalk {
    let mut walk = TreeWalk::default();
    for child in children {
        visit(child, None, 0, ctx, &mut walk);
    }
    walk
}

fn visit(node: &Value, parent_id: Option<&str>, depth: u32, ctx: &WalkContext<'_>, walk: &mut TreeWalk) {
    if depth >= ctx.max_depth {
        return;
    }

    let kind = node.get("kind").and_then(Value::as_str).unwrap_or("");
    let Some(data) = node.get("data") else {
        return;
    };

    if kind == "more" {
        if let Some(ids) = data.get("children").and_then(Value::as_array) {
            walk.more_ids.extend(
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string()),
            );
        }
        return;
    }

    if kind != "t1" {
        return;
    }

    let Some(comment_id) = data.get("id").and_then(Value::as_str) else {
        return;
    };

    if ctx.existing_ids.contains(comment_id) {
        walk.already_stored += 1;
    } else {
        walk.comments.push(materialize(comment_id, data, parent_id, depth, ctx));
    }

    // Replies are a nested listing, or an empty string when absent.
    if let Some(children) = data
        .get("replies")
        .and_then(|r| r.get("data"))
        .and_then(|d| d.get("children"))
        .and_then(Value::as_array)
    {
        for reply in children {
            visit(reply, Some(comment_id), depth + 1, ctx, walk);
        }
    }
}

fn materialize(
    comment_id: &str,
    data: &Value,
    parent_id: Option<&str>,
    depth: u32,
    ctx: &WalkContext<'_>,
) -> CommentDocument {
    let str_field = |name: &str| -> Option<String> {
        data.get(name)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    };
    let int_field = |name: &str| data.get(name).and_then(Value::as_i64).unwrap_or(0);
    let bool_field = |name: &str| data.get(name).and_then(Value::as_bool).unwrap_or(false);

    let created_utc = data
        .get("created_utc")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let created_datetime = if created_utc > 0.0 {
        Utc.timestamp_opt(created_utc as i64, 0).single()
    } else {
        None
    };

    // "edited" is either false or an edit timestamp
    let edited = match data.get("edited") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(_)) => true,
        _ => false,
    };

    CommentDocument {
        comment_id: comment_id.to_string(),
        post_id: ctx.post_id.to_string(),
        parent_id: parent_id.map(|s| s.to_string()),
        parent_type: if parent_id.is_none() {
            ParentKind::Post
        } else {
            ParentKind::Comment
        },
        author: str_field("author").unwrap_or_else(|| "[deleted]".to_string()),
        body: str_field("body").unwrap_or_default(),
        score: int_field("score"),
        created_utc,
        created_datetime,
        depth: depth as i32,
        is_submitter: bool_field("is_submitter"),
        distinguished: str_field("distinguished"),
        stickied: bool_field("stickied"),
        edited,
        controversiality: int_field("controversiality"),
        gilded: int_field("gilded"),
        total_awards_received: int_field("total_awards_received"),
        subreddit: ctx.subreddit.to_string(),
        scraped_at: ctx.scraped_at,
    }
}

/// Fold flat `/api/morechildren` things into documents. Depth is derived
/// from the parent: post parents are top level, known comment parents
/// one deeper, unknown parents fall back to depth 1.
pub fn integrate_more_things(
    things: &[Value],
    known_depths: &HashMap<String, i32>,
    ctx: &WalkContext<'_>,
) -> Vec<CommentDocument> {
    let mut out = Vec::new();

    for thing in things {
        let kind = thing.get("kind").and_then(Value::as_str).unwrap_or("");
        if kind != "t1" {
            continue;
        }
        let Some(data) = thing.get("data") else {
            continue;
        };
        let Some(comment_id) = data.get("id").and_then(Value::as_str) else {
            continue;
        };
        if ctx.existing_ids.contains(comment_id) {
            continue;
        }

        let parent_fullname = data.get("parent_id").and_then(Value::as_str).unwrap_or("");
        let (parent_id, depth) = match parent_fullname.split_once('_') {
            Some(("t3", _)) => (None, 0),
            Some(("t1", parent)) => {
                let depth = known_depths.get(parent).map(|d| d + 1).unwrap_or(1);
                (Some(parent), depth)
            }
            _ => (None, 0),
        };

        if depth as u32 >= ctx.max_depth {
            continue;
        }

        out.push(materialize(comment_id, data, parent_id, depth as u32, ctx));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(id: &str, body: &str, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "author": "someone",
                "body": body,
                "score": 3,
                "created_utc": 1700000000.0,
                "replies": replies
            }
        })
    }

    fn ctx<'a>(existing: &'a HashSet<String>) -> WalkContext<'a> {
        WalkContext {
            post_id: "p1",
            subreddit: "rust",
            existing_ids: existing,
            max_depth: 3,
            scraped_at: Utc::now(),
        }
    }

    fn replies(children: Vec<Value>) -> Value {
        json!({"kind": "Listing", "data": {"children": children}})
    }

    #[test]
    fn walks_nested_tree_with_depth_and_parents() {
        let tree = vec![comment(
            "c1",
            "top",
            replies(vec![comment("c2", "reply", replies(vec![comment("c3", "deep", json!(""))]))]),
        )];

        let existing = HashSet::new();
        let walk = walk_comment_tree(&tree, &ctx(&existing));

        assert_eq!(walk.comments.len(), 3);
        let c1 = &walk.comments[0];
        assert_eq!(c1.depth, 0);
        assert_eq!(c1.parent_type, ParentKind::Post);
        assert!(c1.parent_id.is_none());

        let c2 = &walk.comments[1];
        assert_eq!(c2.depth, 1);
        assert_eq!(c2.parent_id.as_deref(), Some("c1"));
        assert_eq!(c2.parent_type, ParentKind::Comment);

        let c3 = &walk.comments[2];
        assert_eq!(c3.depth, 2);
        assert_eq!(c3.parent_id.as_deref(), Some("c2"));
    }

    #[test]
    fn known_comments_are_skipped_but_their_replies_visited() {
        let tree = vec![comment(
            "c1",
            "top",
            replies(vec![comment("c2", "new nested", json!(""))]),
        )];

        let existing: HashSet<String> = ["c1".to_string()].into_iter().collect();
        let walk = walk_comment_tree(&tree, &ctx(&existing));

        assert_eq!(walk.already_stored, 1);
        assert_eq!(walk.comments.len(), 1);
        assert_eq!(walk.comments[0].comment_id, "c2");
        assert_eq!(walk.comments[0].parent_id.as_deref(), Some("c1"));
    }

    #[test]
    fn recursion_stops_at_max_depth() {
        let tree = vec![comment(
            "c1",
            "d0",
            replies(vec![comment(
                "c2",
                "d1",
                replies(vec![comment(
                    "c3",
                    "d2",
                    replies(vec![comment("c4", "d3 truncated", json!(""))]),
                )]),
            )]),
        )];

        let existing = HashSet::new();
        let walk = walk_comment_tree(&tree, &ctx(&existing));

        let ids: Vec<&str> = walk.comments.iter().map(|c| c.comment_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn more_stubs_collect_child_ids() {
        let tree = vec![json!({
            "kind": "more",
            "data": {"children": ["x1", "x2", "x3"]}
        })];

        let existing = HashSet::new();
        let walk = walk_comment_tree(&tree, &ctx(&existing));
        assert!(walk.comments.is_empty());
        assert_eq!(walk.more_ids, vec!["x1", "x2", "x3"]);
    }

    #[test]
    fn more_things_derive_depth_from_parent() {
        let things = vec![
            json!({"kind": "t1", "data": {"id": "m1", "parent_id": "t3_p1", "body": "top"}}),
            json!({"kind": "t1", "data": {"id": "m2", "parent_id": "t1_c9", "body": "nested"}}),
        ];
        let known_depths: HashMap<String, i32> = [("c9".to_string(), 1)].into_iter().collect();

        let existing = HashSet::new();
        let context = ctx(&existing);
        let docs = integrate_more_things(&things, &known_depths, &context);

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].depth, 0);
        assert_eq!(docs[0].parent_type, ParentKind::Post);
        assert_eq!(docs[1].depth, 2);
        assert_eq!(docs[1].parent_id.as_deref(), Some("c9"));
    }

    #[test]
    fn edited_timestamp_counts_as_edited() {
        let tree = vec![json!({
            "kind": "t1",
            "data": {"id": "c1", "body": "x", "edited": 1700000100.0, "replies": ""}
        })];
        let existing = HashSet::new();
        let walk = walk_comment_tree(&tree, &ctx(&existing));
        assert!(walk.comments[0].edited);
    }
}
