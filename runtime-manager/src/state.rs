//! Shared application state.

use std::sync::Arc;

use crate::config::Config;
use crate::engine::EngineRegistry;
use crate::planner::HardwarePlanner;
use crate::session::{SessionRegistry, SettingsKeyMap};
use crate::tools::ToolCoordinator;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub engines: Arc<EngineRegistry>,
    pub planner: Arc<HardwarePlanner>,
    pub sessions: Arc<SessionRegistry>,
    pub tools: Arc<ToolCoordinator>,
}

impl AppState {
    pub fn new(config: Config, engines: Arc<EngineRegistry>, tools: Arc<ToolCoordinator>) -> Self {
        let planner = Arc::new(HardwarePlanner::new(engines.clone()));
        let key_map = SettingsKeyMap::new(&config.settings.key_map);
        let sessions = Arc::new(SessionRegistry::new(
            engines.clone(),
            planner.clone(),
            key_map,
        ));

        Self {
            config,
            engines,
            planner,
            sessions,
            tools,
        }
    }
}
