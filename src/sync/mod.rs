//! The sync pipeline: reconcile derived state into the remote store on a
//! fixed interval.

pub mod console;
pub mod daemon;
pub mod notifier;
pub mod reconciler;

pub use console::ConsoleSink;
pub use daemon::{CycleReport, DaemonState, SyncDaemon, SyncTarget};
pub use notifier::ActivityNotifier;
pub use reconciler::{BatchReport, Reconcilable, Reconciler, UpsertOutcome};
