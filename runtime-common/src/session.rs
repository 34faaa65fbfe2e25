//! Engine and session descriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an engine is hosted relative to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// A child process owned by the process supervisor.
    Subprocess,
    /// Runs inside the manager.
    InProcess,
    /// A server reached over the network.
    Remote,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Subprocess => write!(f, "subprocess"),
            EngineKind::InProcess => write!(f, "in_process"),
            EngineKind::Remote => write!(f, "remote"),
        }
    }
}

/// A model that an engine has loaded on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub engine: String,
    pub model_id: String,
    /// Process id for subprocess engines.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Where the loaded model is served.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(engine: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            model_id: model_id.into(),
            pid: None,
            endpoint: None,
            model_path: None,
            loaded_at: Utc::now(),
        }
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_model_path(mut self, path: impl Into<String>) -> Self {
        self.model_path = Some(path.into());
        self
    }
}
