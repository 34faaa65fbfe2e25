//! Local inference runtime manager.
//!
//! Supervises inference engine processes, plans model loads against the
//! available hardware, tracks which models are loaded per engine and
//! coordinates cancellable tool calls. The HTTP control API in [`api`] is
//! served by the `local-runtime` binary.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod planner;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod tools;
