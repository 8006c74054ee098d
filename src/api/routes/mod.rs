//! Route handlers, one module per resource

pub mod alerts;
pub mod config;
pub mod events;
pub mod health;
pub mod listings;
pub mod milk;
pub mod monitor;
pub mod sessions;
pub mod stats;
