//! Claw Sync — mirrors OpenClaw session and cron state into a remote status store.

pub mod config;
pub mod error;
pub mod source;
pub mod status;
pub mod store;
pub mod sync;
