//! The engine: dispatcher, control-plane subscriber, loader, and lifecycle.
//!
//! [`RuleEngine`] is the public facade; [`EngineImpl`] carries the shared
//! state behind an `Arc` and hosts the component implementations:
//! `dispatch` (judging inbound events), `subscriber` (applying control
//! events), and `loader` (populating the index from the store).

mod core;
mod dispatch;
mod engine_impl;
mod loader;
mod subscriber;

pub use core::RuleEngine;
pub use engine_impl::{EngineImpl, SharedEngineImpl};
