/*
[INPUT]:  Public API exports for taskpanel-coordinator crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod channel;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod footer;
pub mod preview_lock;
pub mod rpc;
pub mod store;
pub mod subscription;

// Re-export main types for convenience
pub use channel::EventChannel;
pub use command::Command;
pub use config::PanelConfig;
pub use coordinator::{FlowFailure, TaskSessionCoordinator};
pub use preview_lock::{LockState, PreviewLockMachine, should_lock};
pub use rpc::{RestartOutcome, RpcMethod};
pub use store::{StateStore, StateUpdate, UpdateSink};
pub use subscription::Topic;
