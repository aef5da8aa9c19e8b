//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::EngineRegistry;
use crate::input::InputValidator;
use crate::room::RoomManager;
use crate::setup::GameStateManager;
use crate::ws::hub::ConnectionHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: RoomManager,
    pub validator: Arc<InputValidator>,
    pub setup: GameStateManager,
    pub engines: Arc<EngineRegistry>,
    pub hub: Arc<ConnectionHub>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let rooms = RoomManager::new(config.room.clone());
        let validator = Arc::new(InputValidator::new(config.rate_limit.max_inputs_per_second));

        Self {
            config,
            rooms,
            validator,
            setup: GameStateManager::new(),
            engines: Arc::new(EngineRegistry::new()),
            hub: Arc::new(ConnectionHub::new()),
        }
    }
}
