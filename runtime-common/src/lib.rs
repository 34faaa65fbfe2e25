//! Local Runtime Common Types
//!
//! Shared types used by the runtime manager and its HTTP clients.

pub mod plan;
pub mod session;
pub mod tool;

pub use plan::{LoadPlan, ModelMode, SupportVerdict};
pub use session::{EngineKind, SessionInfo};
pub use tool::{ContentChunk, ToolCallResult};
