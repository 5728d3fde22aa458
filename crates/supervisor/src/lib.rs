//! Fleet supervisor.
//!
//! Owns the scraper-instance lifecycle and hosts the enrichment and
//! suggestions workers as cooperative background tasks. The lifecycle
//! operations on [`supervisor::Supervisor`] are the surface an external
//! control plane drives; the binary wires them to the liveness loop.

pub mod enrichment;
pub mod process;
pub mod suggestions;
pub mod supervisor;
