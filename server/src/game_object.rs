//! The base game object classes every game schema builds on.
//!
//! `GameObject` carries identity and server-side logs; `Player` adds the
//! per-seat outcome and clock attributes the session machinery reads and
//! writes. Games extend these in their own schemas.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::sanitize::TypeDescriptor;
use crate::schema::{AttributeSchema, GameObjectSchema};

pub const GAME_OBJECT_CLASS: &str = "GameObject";
pub const PLAYER_CLASS: &str = "Player";
pub const GAME_CLASS: &str = "Game";
pub const AI_CLASS: &str = "AI";

pub const ATTR_ID: &str = "id";
pub const ATTR_GAME_OBJECT_NAME: &str = "gameObjectName";
pub const ATTR_LOGS: &str = "logs";
pub const ATTR_NAME: &str = "name";
pub const ATTR_CLIENT_TYPE: &str = "clientType";
pub const ATTR_WON: &str = "won";
pub const ATTR_LOST: &str = "lost";
pub const ATTR_REASON_WON: &str = "reasonWon";
pub const ATTR_REASON_LOST: &str = "reasonLost";
pub const ATTR_TIME_REMAINING: &str = "timeRemaining";

/// The wire encoding of a reference to a game object.
pub fn object_ref(id: &str) -> Value {
    json!({ "id": id })
}

/// The id inside a reference value, if it is one.
pub fn ref_id(value: &Value) -> Option<&str> {
    value.get("id")?.as_str()
}

/// The raw base classes. Game schemas start from these and extend them.
pub fn base_object_schemas() -> BTreeMap<String, GameObjectSchema> {
    let mut objects = BTreeMap::new();

    let mut game_object = GameObjectSchema::default();
    game_object.attributes.insert(
        ATTR_ID.into(),
        AttributeSchema::new(TypeDescriptor::String),
    );
    game_object.attributes.insert(
        ATTR_GAME_OBJECT_NAME.into(),
        AttributeSchema::new(TypeDescriptor::String),
    );
    game_object.attributes.insert(
        ATTR_LOGS.into(),
        AttributeSchema::new(TypeDescriptor::list_of(TypeDescriptor::String)),
    );
    objects.insert(GAME_OBJECT_CLASS.into(), game_object);

    let mut player = GameObjectSchema {
        parent: Some(GAME_OBJECT_CLASS.into()),
        ..Default::default()
    };
    for attr in [ATTR_NAME, ATTR_CLIENT_TYPE, ATTR_REASON_WON, ATTR_REASON_LOST] {
        player
            .attributes
            .insert(attr.into(), AttributeSchema::new(TypeDescriptor::String));
    }
    for attr in [ATTR_WON, ATTR_LOST] {
        player
            .attributes
            .insert(attr.into(), AttributeSchema::new(TypeDescriptor::Boolean));
    }
    player.attributes.insert(
        ATTR_TIME_REMAINING.into(),
        AttributeSchema::new(TypeDescriptor::Int),
    );
    objects.insert(PLAYER_CLASS.into(), player);

    let mut game = GameObjectSchema::default();
    game.attributes.insert(
        ATTR_NAME.into(),
        AttributeSchema::new(TypeDescriptor::String),
    );
    game.attributes.insert(
        "session".into(),
        AttributeSchema::new(TypeDescriptor::String),
    );
    game.attributes.insert(
        "gameObjects".into(),
        AttributeSchema::new(TypeDescriptor::map_of(
            TypeDescriptor::String,
            TypeDescriptor::object(GAME_OBJECT_CLASS),
        )),
    );
    game.attributes.insert(
        "players".into(),
        AttributeSchema::new(TypeDescriptor::list_of(TypeDescriptor::object(PLAYER_CLASS))),
    );
    objects.insert(GAME_CLASS.into(), game);

    // The AI pseudo-class only declares orderable functions; games fill it in.
    objects.insert(AI_CLASS.into(), GameObjectSchema::default());

    objects
}
