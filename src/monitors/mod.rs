//! Detection logic
//!
//! - [`rules`]: periodic rules over the event and listing stores, run by the
//!   monitor worker
//! - [`milk`]: inline detection on the milk collection write path

pub mod milk;
pub mod rules;
