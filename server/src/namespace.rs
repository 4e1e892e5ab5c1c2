//! Game namespaces and the registry sessions are built from.
//!
//! A namespace bundles everything the server needs to host one kind of game:
//! its resolved schema, its setting declarations and its logic. Registration
//! happens once at startup; lookups are by case-insensitive game name.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ServerError;
use crate::game_manager::GameLogic;
use crate::game_object::AI_CLASS;
use crate::schema::{FunctionSchema, GameObjectSchema, GameSchema};
use crate::settings::{base_settings, SettingSchema};

pub struct GameNamespace {
    pub game_name: String,
    pub required_players: usize,
    pub schema: Arc<GameSchema>,
    pub settings: Vec<SettingSchema>,
    pub logic: Arc<dyn GameLogic>,
}

impl GameNamespace {
    /// Resolves the raw schema and appends the base settings the game did
    /// not declare itself.
    pub fn new(
        game_name: &str,
        required_players: usize,
        raw_schema: BTreeMap<String, GameObjectSchema>,
        mut settings: Vec<SettingSchema>,
        logic: Arc<dyn GameLogic>,
    ) -> Result<Arc<Self>, ServerError> {
        if required_players == 0 {
            return Err(ServerError::Config(format!(
                "game '{game_name}' requires zero players"
            )));
        }
        let schema = Arc::new(GameSchema::resolve(raw_schema)?);
        for base in base_settings() {
            if !settings.iter().any(|s| s.name == base.name) {
                settings.push(base);
            }
        }
        Ok(Arc::new(Self {
            game_name: game_name.to_string(),
            required_players,
            schema,
            settings,
            logic,
        }))
    }

    /// The schema of an orderable AI function.
    pub fn ai_function(&self, name: &str) -> Option<&FunctionSchema> {
        self.schema.function(AI_CLASS, name)
    }
}

#[derive(Default)]
pub struct GameRegistry {
    games: HashMap<String, Arc<GameNamespace>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: Arc<GameNamespace>) {
        self.games
            .insert(namespace.game_name.to_lowercase(), namespace);
    }

    pub fn lookup(&self, game_name: &str) -> Option<Arc<GameNamespace>> {
        self.games.get(&game_name.to_lowercase()).cloned()
    }
}
