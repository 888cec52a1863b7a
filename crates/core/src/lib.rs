//! Core types for Pathwatcher
//!
//! This crate provides:
//! - Event normalization (raw action + self/child → public event kind)
//! - Watch handles and the handle↔path registry
//! - The event listener that validates raw notifications and hands them off
//! - The bounded delivery channel to the single consumer
//! - The `Backend` capability trait implemented by platform backends

pub mod backend;
pub mod delivery;
pub mod error;
pub mod event;
pub mod listener;
pub mod path;
pub mod registry;

// Re-exports
pub use backend::{Backend, BackendDiagnostics, DiagnosticsSnapshot, FileActionListener};
pub use delivery::{channel, EventReceiver, EventSender};
pub use error::{DeliveryError, WatchError};
pub use event::{Action, EventKind, NormalizedEvent};
pub use listener::EventListener;
pub use registry::{WatchHandle, WatchRegistry, WatchedPath};

/// Result type for watch operations
pub type Result<T> = std::result::Result<T, WatchError>;
