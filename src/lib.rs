//! Relays Intercom conversation events into a Telegram group.
//!
//! Webhooks are normalized into [`model::CanonicalMessage`]s, queued in order,
//! and drained one at a time to the Bot API. A SQLite dedup store records every
//! confirmed send so a redelivered source event never produces a second post.

pub mod classify;
pub mod config;
pub mod db;
pub mod model;
pub mod normalize;
pub mod queue;
pub mod render;
pub mod server;
pub mod shutdown;
pub mod signature;
pub mod sweeper;
pub mod telegram;
