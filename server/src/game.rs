//! The live state of one match.
//!
//! A `Game` owns the delta manager, the table of live game objects and the
//! player roster. All observable state goes through its setters so every
//! change is picked up by the next flush. Game logic reads and writes
//! attributes by name; the schema supplies defaults at construction.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::delta_manager::DeltaManager;
use crate::errors::ServerError;
use crate::game_object::{
    object_ref, ATTR_CLIENT_TYPE, ATTR_GAME_OBJECT_NAME, ATTR_ID, ATTR_LOGS, ATTR_NAME,
    ATTR_TIME_REMAINING, GAME_CLASS, PLAYER_CLASS,
};
use crate::sanitize::ObjectLookup;
use crate::schema::GameSchema;
use crate::settings::GameSettingsManager;

/// What the session knows about one playing client before the game exists.
#[derive(Debug, Clone)]
pub struct PlayerSlot {
    pub name: String,
    pub client_type: String,
}

pub struct Game {
    name: String,
    session: String,
    deltas: DeltaManager,
    /// Live objects: id to concrete class name.
    objects: HashMap<String, String>,
    next_id: u64,
    player_ids: Vec<String>,
    schema: Arc<GameSchema>,
    settings: Map<String, Value>,
}

impl Game {
    pub fn new(
        game_name: &str,
        session_id: &str,
        schema: Arc<GameSchema>,
        settings: &GameSettingsManager,
    ) -> Result<Self, ServerError> {
        let game_schema = schema.object(GAME_CLASS).ok_or_else(|| {
            ServerError::Config(format!("game '{game_name}' has no Game class in its schema"))
        })?;

        let mut game = Self {
            name: game_name.to_string(),
            session: session_id.to_string(),
            deltas: DeltaManager::new(),
            objects: HashMap::new(),
            next_id: 0,
            player_ids: Vec::new(),
            schema: Arc::clone(&schema),
            settings: settings.values().clone(),
        };

        game.set_game_attr(ATTR_NAME, json!(game_name));
        game.set_game_attr("session", json!(session_id));
        game.set_game_attr("gameObjects", json!({}));
        game.set_game_attr("players", json!([]));

        // Remaining declared attributes start from a matching setting, then
        // the schema default, then the type's zero value.
        let attrs: Vec<_> = game_schema
            .attributes
            .iter()
            .map(|(name, schema)| (name.clone(), schema.clone()))
            .collect();
        for (attr, attr_schema) in attrs {
            if game.deltas.contains(&[attr.as_str()]) {
                continue;
            }
            let value = game
                .settings
                .get(&attr)
                .cloned()
                .or_else(|| attr_schema.default.clone())
                .unwrap_or_else(|| attr_schema.descriptor.zero_value());
            game.set_game_attr(&attr, value);
        }

        Ok(game)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn schema(&self) -> &GameSchema {
        &self.schema
    }

    /// The frozen setting value, if declared.
    pub fn setting(&self, name: &str) -> Option<&Value> {
        self.settings.get(name)
    }

    pub fn settings(&self) -> &Map<String, Value> {
        &self.settings
    }

    /// Player ids in seat order.
    pub fn player_ids(&self) -> &[String] {
        &self.player_ids
    }

    /// Creates the Player objects and the `players` list, in seat order.
    pub fn add_players(
        &mut self,
        slots: &[PlayerSlot],
        starting_time_ns: u64,
        name_overrides: &[String],
    ) -> Result<Vec<String>, ServerError> {
        let mut refs = Vec::with_capacity(slots.len());
        let mut ids = Vec::with_capacity(slots.len());
        for (seat, slot) in slots.iter().enumerate() {
            let mut name = name_overrides
                .get(seat)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| slot.name.clone());
            if name.is_empty() {
                name = format!("Player {seat}");
            }
            let client_type = if slot.client_type.is_empty() {
                "Unknown".to_string()
            } else {
                slot.client_type.clone()
            };
            let mut init = Map::new();
            init.insert(ATTR_NAME.into(), json!(name));
            init.insert(ATTR_CLIENT_TYPE.into(), json!(client_type));
            init.insert(ATTR_TIME_REMAINING.into(), json!(starting_time_ns));
            let id = self.create_object(PLAYER_CLASS, init)?;
            refs.push(object_ref(&id));
            ids.push(id);
        }
        self.set_game_attr("players", Value::Array(refs));
        self.player_ids = ids.clone();
        Ok(ids)
    }

    /// Creates a game object of a declared class and registers it in
    /// `gameObjects`. Returns the new id.
    pub fn create_object(
        &mut self,
        class: &str,
        init: Map<String, Value>,
    ) -> Result<String, ServerError> {
        let object_schema = self
            .schema
            .object(class)
            .ok_or_else(|| {
                ServerError::Config(format!("cannot create object of unknown class '{class}'"))
            })?
            .clone();

        let id = self.next_id.to_string();
        self.next_id += 1;

        let mut attrs = Map::new();
        for (name, attr_schema) in &object_schema.attributes {
            let value = init
                .get(name)
                .cloned()
                .or_else(|| attr_schema.default.clone())
                .unwrap_or_else(|| attr_schema.descriptor.zero_value());
            attrs.insert(name.clone(), value);
        }
        attrs.insert(ATTR_ID.into(), json!(id));
        attrs.insert(ATTR_GAME_OBJECT_NAME.into(), json!(class));
        attrs.insert(ATTR_LOGS.into(), json!([]));

        self.deltas
            .set(&["gameObjects", &id], &Value::Object(attrs));
        self.objects.insert(id.clone(), class.to_string());
        Ok(id)
    }

    pub fn object_class(&self, id: &str) -> Option<&str> {
        self.objects.get(id).map(String::as_str)
    }

    pub fn set_attr(&mut self, id: &str, attr: &str, value: Value) {
        self.deltas.set(&["gameObjects", id, attr], &value);
    }

    pub fn attr(&self, id: &str, attr: &str) -> Option<Value> {
        self.deltas.get(&["gameObjects", id, attr])
    }

    pub fn attr_u64(&self, id: &str, attr: &str) -> Option<u64> {
        self.attr(id, attr).and_then(|v| v.as_u64())
    }

    pub fn attr_i64(&self, id: &str, attr: &str) -> Option<i64> {
        self.attr(id, attr).and_then(|v| v.as_i64())
    }

    pub fn attr_bool(&self, id: &str, attr: &str) -> Option<bool> {
        self.attr(id, attr).and_then(|v| v.as_bool())
    }

    pub fn attr_string(&self, id: &str, attr: &str) -> Option<String> {
        self.attr(id, attr)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn set_game_attr(&mut self, attr: &str, value: Value) {
        self.deltas.set(&[attr], &value);
    }

    pub fn game_attr(&self, attr: &str) -> Option<Value> {
        self.deltas.get(&[attr])
    }

    pub fn game_attr_i64(&self, attr: &str) -> Option<i64> {
        self.game_attr(attr).and_then(|v| v.as_i64())
    }

    /// Appends to an object's server-side log list.
    pub fn log_object(&mut self, id: &str, message: &str) {
        let mut logs = self
            .attr(id, ATTR_LOGS)
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        logs.push(json!(message));
        self.set_attr(id, ATTR_LOGS, Value::Array(logs));
    }

    /// The minimal state diff since the last flush.
    pub fn flush(&mut self) -> Value {
        self.deltas.flush()
    }
}

impl ObjectLookup for Game {
    fn type_of(&self, id: &str) -> Option<String> {
        self.objects.get(id).cloned()
    }

    fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        self.schema.is_subclass(class, ancestor)
    }
}
