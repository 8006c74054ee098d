//! Actor-based background processing
//!
//! The monitor worker runs as an independent async task communicating via
//! Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!        ┌─────────────────┐   commands (mpsc)   ┌──────────────┐
//!        │ Hub / API       │ ──────────────────► │ MonitorActor │
//!        └─────────────────┘ ◄────────────────── └──────┬───────┘
//!                              replies (oneshot)        │ raise
//!                                                ┌──────▼───────┐
//!                                                │ AlertManager │
//!                                                └──────┬───────┘
//!                                                       │ notify
//!                                            ┌──────────▼──────────┐
//!                                            │  Broadcast Channel  │ (MonitorEvent)
//!                                            └──────────┬──────────┘
//!                                                       │ subscribe
//!                                              ┌────────▼────────┐
//!                                              │ monitor sessions│
//!                                              └─────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: The worker has an mpsc command channel for control messages
//! 2. **Events**: New alerts are published to a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod messages;
pub mod monitor;

pub use monitor::{MonitorActor, MonitorHandle};
