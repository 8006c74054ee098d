//! Marketplace and milk-collection monitoring
//!
//! Collaborators report domain events, listings and milk collections; the
//! monitor worker runs detection rules over them on a timer and raises
//! deduplicated alerts that are pushed to live monitor sessions.

pub mod actors;
pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod events;
pub mod monitors;
pub mod notifier;
pub mod sessions;
pub mod settings;
pub mod storage;
pub mod util;
