//! Nim: two players alternate taking stones from a shared pile; whoever
//! takes the last stone wins.
//!
//! Small on purpose, but it exercises the whole pipeline: orders, runs,
//! invalidation, win/loss declaration and delta streaming.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::errors::ServerError;
use crate::game::Game;
use crate::game_manager::{GameContext, GameLogic, GameManager, GameResult};
use crate::game_object::{
    base_object_schemas, object_ref, ref_id, AI_CLASS, GAME_CLASS, PLAYER_CLASS,
};
use crate::namespace::GameNamespace;
use crate::sanitize::{sanitize, TypeDescriptor};
use crate::schema::{ArgSchema, AttributeSchema, FunctionSchema, GameObjectSchema};
use crate::settings::SettingSchema;

const ATTR_REMAINING: &str = "remaining";
const ATTR_MAX_TAKE: &str = "maxTake";
const ATTR_CURRENT_PLAYER: &str = "currentPlayer";
const ATTR_CURRENT_TURN: &str = "currentTurn";
const ATTR_MAX_TURNS: &str = "maxTurns";

const SETTING_STARTING_STONES: &str = "startingStones";

pub fn namespace() -> Result<Arc<GameNamespace>, ServerError> {
    GameNamespace::new("Nim", 2, raw_schema(), settings(), Arc::new(NimLogic))
}

fn settings() -> Vec<SettingSchema> {
    vec![
        SettingSchema::clamped(
            SETTING_STARTING_STONES,
            "How many stones the pile starts with.",
            json!(21),
            1.0,
            1000.0,
        ),
        SettingSchema::clamped(
            ATTR_MAX_TAKE,
            "The most stones a player may take in one turn.",
            json!(3),
            1.0,
            100.0,
        ),
        SettingSchema::clamped(
            ATTR_MAX_TURNS,
            "Turns before the game is cut short.",
            json!(200),
            1.0,
            10_000.0,
        ),
    ]
}

fn raw_schema() -> std::collections::BTreeMap<String, GameObjectSchema> {
    let mut objects = base_object_schemas();

    let mut game = objects.remove(GAME_CLASS).unwrap_or_default();
    game.attributes.insert(
        ATTR_REMAINING.into(),
        AttributeSchema::new(TypeDescriptor::Int),
    );
    game.attributes.insert(
        ATTR_MAX_TAKE.into(),
        AttributeSchema::new(TypeDescriptor::Int),
    );
    game.attributes.insert(
        ATTR_CURRENT_PLAYER.into(),
        AttributeSchema::new(TypeDescriptor::nullable_object(PLAYER_CLASS)),
    );
    game.attributes.insert(
        ATTR_CURRENT_TURN.into(),
        AttributeSchema::new(TypeDescriptor::Int),
    );
    game.attributes.insert(
        ATTR_MAX_TURNS.into(),
        AttributeSchema::new(TypeDescriptor::Int),
    );
    objects.insert(GAME_CLASS.into(), game);

    let mut player = objects.remove(PLAYER_CLASS).unwrap_or_default();
    player.functions.insert(
        "take".into(),
        FunctionSchema {
            args: vec![ArgSchema::optional("count", TypeDescriptor::Int, json!(1))],
            returns: TypeDescriptor::Boolean,
            invalid_value: json!(false),
        },
    );
    objects.insert(PLAYER_CLASS.into(), player);

    let mut ai = objects.remove(AI_CLASS).unwrap_or_default();
    ai.functions.insert(
        "runTurn".into(),
        FunctionSchema {
            args: vec![],
            returns: TypeDescriptor::Boolean,
            invalid_value: json!(false),
        },
    );
    objects.insert(AI_CLASS.into(), ai);

    objects
}

pub struct NimLogic;

impl NimLogic {
    fn current_seat(game: &Game) -> usize {
        let current = game.game_attr(ATTR_CURRENT_PLAYER).unwrap_or(Value::Null);
        let id = ref_id(&current).unwrap_or_default();
        game.player_ids()
            .iter()
            .position(|player| player == id)
            .unwrap_or(0)
    }

    fn advance_turn(game: &mut Game) {
        let seat = Self::current_seat(game);
        let next = (seat + 1) % game.player_ids().len();
        let next_id = game.player_ids()[next].clone();
        game.set_game_attr(ATTR_CURRENT_PLAYER, object_ref(&next_id));
    }
}

#[async_trait]
impl GameLogic for NimLogic {
    fn init(&self, game: &mut Game) -> GameResult<()> {
        let starting = game
            .setting(SETTING_STARTING_STONES)
            .and_then(Value::as_i64)
            .unwrap_or(21);
        game.set_game_attr(ATTR_REMAINING, json!(starting));
        let first = game
            .player_ids()
            .first()
            .cloned()
            .ok_or_else(|| ServerError::Config("Nim needs players before init".into()))?;
        game.set_game_attr(ATTR_CURRENT_PLAYER, object_ref(&first));
        Ok(())
    }

    async fn run(&self, ctx: Arc<GameContext>) -> GameResult<()> {
        loop {
            let (seat, over, turn, max_turns) = {
                let game = ctx.game().read().await;
                (
                    Self::current_seat(&game),
                    self.is_game_over(&game),
                    game.game_attr_i64(ATTR_CURRENT_TURN).unwrap_or(0),
                    game.game_attr_i64(ATTR_MAX_TURNS).unwrap_or(i64::MAX),
                )
            };
            if over {
                break;
            }
            if turn >= max_turns {
                // The player whose turn it would be is the one who failed to
                // close the game out; everyone else wins.
                let mut game = ctx.game().write().await;
                let ids = game.player_ids().to_vec();
                for (other_seat, id) in ids.iter().enumerate() {
                    if other_seat == seat {
                        GameManager::declare_loser(&mut game, id, "Turn limit reached on their turn.");
                    } else {
                        GameManager::declare_winner(&mut game, id, "Turn limit reached.");
                    }
                }
                break;
            }

            let before = { ctx.game().read().await.game_attr(ATTR_CURRENT_PLAYER) };
            ctx.order(seat, "runTurn", vec![]).await;

            if ctx.player_faulted(seat) {
                let mut game = ctx.game().write().await;
                let ids = game.player_ids().to_vec();
                for (other_seat, id) in ids.iter().enumerate() {
                    if other_seat != seat {
                        GameManager::declare_winner(&mut game, id, "Opponent faulted.");
                    }
                }
                break;
            }

            let mut game = ctx.game().write().await;
            if self.is_game_over(&game) {
                break;
            }
            game.set_game_attr(ATTR_CURRENT_TURN, json!(turn + 1));
            // A turn that took no stones forfeits the move, otherwise a
            // passive client would stall the match.
            if game.game_attr(ATTR_CURRENT_PLAYER) == before {
                Self::advance_turn(&mut game);
            }
        }
        Ok(())
    }

    fn is_game_over(&self, game: &Game) -> bool {
        if game.game_attr_i64(ATTR_REMAINING).unwrap_or(0) <= 0 {
            return true;
        }
        game.player_ids()
            .iter()
            .any(|id| game.attr_bool(id, "won") == Some(true))
    }

    fn invalidate(
        &self,
        game: &Game,
        player_id: &str,
        caller_id: &str,
        function: &str,
        args: &mut Map<String, Value>,
    ) -> Option<String> {
        if function != "take" {
            return None;
        }
        if caller_id != player_id {
            return Some("you may only take stones with your own player".into());
        }
        let current = game.game_attr(ATTR_CURRENT_PLAYER).unwrap_or(Value::Null);
        if ref_id(&current) != Some(player_id) {
            return Some("it is not your turn".into());
        }
        // The hook runs on raw client args, so coerce the count here and
        // write the normalized value back for execute.
        let raw = args.get("count").cloned().unwrap_or_else(|| json!(1));
        let count = match sanitize(&TypeDescriptor::Int, &raw, game) {
            Ok(clean) => clean.as_i64().unwrap_or(1),
            Err(_) => return Some(format!("{raw} is not a number of stones")),
        };
        args.insert("count".into(), json!(count));

        let remaining = game.game_attr_i64(ATTR_REMAINING).unwrap_or(0);
        let max_take = game.game_attr_i64(ATTR_MAX_TAKE).unwrap_or(1);
        let limit = max_take.min(remaining);
        if count < 1 || count > limit {
            return Some(format!(
                "cannot take {count} stones, must take between 1 and {limit}"
            ));
        }
        None
    }

    fn execute(
        &self,
        game: &mut Game,
        player_id: &str,
        caller_id: &str,
        function: &str,
        args: &Map<String, Value>,
    ) -> Value {
        if function != "take" {
            return Value::Null;
        }
        let count = args.get("count").and_then(Value::as_i64).unwrap_or(1);
        let remaining = game
            .game_attr_i64(ATTR_REMAINING)
            .unwrap_or(0)
            .saturating_sub(count);
        game.set_game_attr(ATTR_REMAINING, json!(remaining));
        game.log_object(caller_id, &format!("took {count} stones"));

        if remaining <= 0 {
            GameManager::declare_winner(game, player_id, "Took the last stone.");
            GameManager::declare_losers_except(game, player_id, "Opponent took the last stone.");
        } else {
            Self::advance_turn(game);
        }
        json!(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PlayerSlot;
    use crate::settings::GameSettingsManager;

    fn game_with(settings_json: Value) -> Game {
        let namespace = namespace().unwrap();
        let settings = GameSettingsManager::new(&namespace.settings, &settings_json);
        let mut game = Game::new(
            &namespace.game_name,
            "1",
            Arc::clone(&namespace.schema),
            &settings,
        )
        .unwrap();
        let slots = vec![
            PlayerSlot {
                name: "alice".into(),
                client_type: "Python".into(),
            },
            PlayerSlot {
                name: "bob".into(),
                client_type: "C++".into(),
            },
        ];
        game.add_players(&slots, 1_000_000_000, &[]).unwrap();
        NimLogic.init(&mut game).unwrap();
        game
    }

    #[test]
    fn init_seeds_the_pile_and_first_player() {
        let game = game_with(json!({"startingStones": 10}));
        assert_eq!(game.game_attr_i64(ATTR_REMAINING), Some(10));
        assert_eq!(game.game_attr_i64(ATTR_MAX_TAKE), Some(3));
        let current = game.game_attr(ATTR_CURRENT_PLAYER).unwrap();
        assert_eq!(ref_id(&current), Some(game.player_ids()[0].as_str()));
        assert!(!NimLogic.is_game_over(&game));
    }

    #[test]
    fn taking_stones_decrements_and_advances_the_turn() {
        let mut game = game_with(json!({"startingStones": 10}));
        let (alice, bob) = (game.player_ids()[0].clone(), game.player_ids()[1].clone());

        let mut args = Map::new();
        args.insert("count".into(), json!(2));
        let returned = NimLogic.execute(&mut game, &alice, &alice, "take", &args);

        assert_eq!(returned, json!(true));
        assert_eq!(game.game_attr_i64(ATTR_REMAINING), Some(8));
        let current = game.game_attr(ATTR_CURRENT_PLAYER).unwrap();
        assert_eq!(ref_id(&current), Some(bob.as_str()));
    }

    #[test]
    fn taking_the_last_stone_wins() {
        let mut game = game_with(json!({"startingStones": 2, "maxTake": 3}));
        let (alice, bob) = (game.player_ids()[0].clone(), game.player_ids()[1].clone());

        let mut args = Map::new();
        args.insert("count".into(), json!(2));
        NimLogic.execute(&mut game, &alice, &alice, "take", &args);

        assert!(NimLogic.is_game_over(&game));
        assert_eq!(game.attr_bool(&alice, "won"), Some(true));
        assert_eq!(game.attr_bool(&bob, "lost"), Some(true));
        assert_eq!(
            game.attr_string(&bob, "reasonLost").as_deref(),
            Some("Opponent took the last stone.")
        );
    }

    #[test]
    fn invalidate_rejects_out_of_turn_and_oversized_takes() {
        let game = game_with(json!({"startingStones": 2}));
        let (alice, bob) = (game.player_ids()[0].clone(), game.player_ids()[1].clone());

        let mut args = Map::new();
        args.insert("count".into(), json!(1));

        // Bob moving on Alice's turn.
        assert!(NimLogic
            .invalidate(&game, &bob, &bob, "take", &mut args)
            .is_some());
        // Alice moving someone else's piece.
        assert!(NimLogic
            .invalidate(&game, &alice, &bob, "take", &mut args)
            .is_some());
        // More stones than remain.
        args.insert("count".into(), json!(3));
        assert!(NimLogic
            .invalidate(&game, &alice, &alice, "take", &mut args)
            .is_some());
        // A legal move.
        args.insert("count".into(), json!(1));
        assert!(NimLogic
            .invalidate(&game, &alice, &alice, "take", &mut args)
            .is_none());
    }

    #[test]
    fn string_counts_are_coerced_before_the_bounds_check() {
        let game = game_with(json!({"startingStones": 21, "maxTake": 3}));
        let alice = game.player_ids()[0].clone();

        // Spelling the count as a string must not dodge the take limit.
        let mut args = Map::new();
        args.insert("count".into(), json!("21"));
        assert!(NimLogic
            .invalidate(&game, &alice, &alice, "take", &mut args)
            .is_some());

        args.insert("count".into(), json!("9223372036854775807"));
        assert!(NimLogic
            .invalidate(&game, &alice, &alice, "take", &mut args)
            .is_some());

        // A legal string count passes and comes back normalized.
        args.insert("count".into(), json!("2"));
        assert!(NimLogic
            .invalidate(&game, &alice, &alice, "take", &mut args)
            .is_none());
        assert_eq!(args.get("count"), Some(&json!(2)));
    }

    #[test]
    fn non_numeric_counts_are_vetoed() {
        let game = game_with(json!({}));
        let alice = game.player_ids()[0].clone();

        let mut args = Map::new();
        args.insert("count".into(), json!("a handful"));
        assert!(NimLogic
            .invalidate(&game, &alice, &alice, "take", &mut args)
            .is_some());
    }

    #[test]
    fn oversized_takes_cannot_underflow_the_pile() {
        let mut game = game_with(json!({"startingStones": 21}));
        let alice = game.player_ids()[0].clone();

        let mut args = Map::new();
        args.insert("count".into(), json!(i64::MIN));
        NimLogic.execute(&mut game, &alice, &alice, "take", &args);
        assert_eq!(game.game_attr_i64(ATTR_REMAINING), Some(i64::MAX));
    }
}
