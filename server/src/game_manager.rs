//! The seam between the session machinery and a concrete game's rules.
//!
//! Games implement [`GameLogic`]; the session spawns its `run` future and
//! routes client traffic to it. Logic never touches sockets or clients
//! directly: it orders AIs through the [`GameContext`] and reads or writes
//! state through the [`Game`]. [`GameManager`] holds the shared outcome
//! bookkeeping both sides use.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::ai_manager::AiManager;
use crate::errors::ServerError;
use crate::game::Game;
use crate::game_object::{ATTR_LOST, ATTR_REASON_LOST, ATTR_REASON_WON, ATTR_WON};

pub type GameResult<T> = Result<T, ServerError>;

/// The rules of one kind of game.
#[async_trait]
pub trait GameLogic: Send + Sync {
    /// Builds the game's initial state. Players already exist.
    fn init(&self, game: &mut Game) -> GameResult<()>;

    /// Drives the match to completion by ordering AIs through the context.
    async fn run(&self, ctx: Arc<GameContext>) -> GameResult<()>;

    /// Whether the match has reached a terminal state.
    fn is_game_over(&self, game: &Game) -> bool;

    /// Game-specific veto of a client run, called before argument
    /// sanitization. Returning `Some` rejects the run with that reason.
    /// The hook may also rewrite `args` in place.
    fn invalidate(
        &self,
        game: &Game,
        player_id: &str,
        caller_id: &str,
        function: &str,
        args: &mut Map<String, Value>,
    ) -> Option<String>;

    /// Executes a validated run and returns its result value.
    fn execute(
        &self,
        game: &mut Game,
        player_id: &str,
        caller_id: &str,
        function: &str,
        args: &Map<String, Value>,
    ) -> Value;
}

/// What game logic sees of the running session.
pub struct GameContext {
    game: Arc<RwLock<Game>>,
    ais: Vec<Arc<AiManager>>,
}

impl GameContext {
    pub fn new(game: Arc<RwLock<Game>>, ais: Vec<Arc<AiManager>>) -> Arc<Self> {
        Arc::new(Self { game, ais })
    }

    pub fn game(&self) -> &Arc<RwLock<Game>> {
        &self.game
    }

    pub fn player_count(&self) -> usize {
        self.ais.len()
    }

    pub fn ai(&self, seat: usize) -> &Arc<AiManager> {
        &self.ais[seat]
    }

    /// Orders the AI in `seat` and waits for its (sanitized) answer. Faulted
    /// clients answer immediately with the function's invalid value.
    pub async fn order(&self, seat: usize, function: &str, args: Vec<Value>) -> Value {
        self.ais[seat].order(function, args).await
    }

    /// Whether the client in `seat` has disconnected or timed out.
    pub fn player_faulted(&self, seat: usize) -> bool {
        self.ais[seat].faulted()
    }
}

/// Outcome bookkeeping shared by the session machinery and game logic.
pub struct GameManager;

impl GameManager {
    /// Marks a player as the winner. Win state is write-once.
    pub fn declare_winner(game: &mut Game, player_id: &str, reason: &str) {
        if game.attr_bool(player_id, ATTR_WON) == Some(true)
            || game.attr_bool(player_id, ATTR_LOST) == Some(true)
        {
            return;
        }
        game.set_attr(player_id, ATTR_WON, Value::Bool(true));
        game.set_attr(player_id, ATTR_REASON_WON, Value::String(reason.into()));
    }

    /// Marks a player as having lost. Loss state is write-once.
    pub fn declare_loser(game: &mut Game, player_id: &str, reason: &str) {
        if game.attr_bool(player_id, ATTR_WON) == Some(true)
            || game.attr_bool(player_id, ATTR_LOST) == Some(true)
        {
            return;
        }
        game.set_attr(player_id, ATTR_LOST, Value::Bool(true));
        game.set_attr(player_id, ATTR_REASON_LOST, Value::String(reason.into()));
    }

    /// Declares every undecided player other than `winner_id` a loser.
    pub fn declare_losers_except(game: &mut Game, winner_id: &str, reason: &str) {
        let others: Vec<String> = game
            .player_ids()
            .iter()
            .filter(|id| id.as_str() != winner_id)
            .cloned()
            .collect();
        for id in others {
            Self::declare_loser(game, &id, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PlayerSlot;
    use crate::game_object::base_object_schemas;
    use crate::schema::GameSchema;
    use crate::settings::{base_settings, GameSettingsManager};
    use serde_json::json;

    fn game_with_players() -> Game {
        let schema = Arc::new(GameSchema::resolve(base_object_schemas()).unwrap());
        let settings = GameSettingsManager::new(&base_settings(), &json!({}));
        let mut game = Game::new("Test", "1", schema, &settings).unwrap();
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
        game.add_players(&slots, 1_000_000, &[]).unwrap();
        game
    }

    #[test]
    fn outcomes_are_write_once() {
        let mut game = game_with_players();
        let winner = game.player_ids()[0].clone();

        GameManager::declare_winner(&mut game, &winner, "took the last stone");
        GameManager::declare_loser(&mut game, &winner, "should not stick");

        assert_eq!(game.attr_bool(&winner, ATTR_WON), Some(true));
        assert_eq!(game.attr_bool(&winner, ATTR_LOST), Some(false));
        assert_eq!(
            game.attr_string(&winner, ATTR_REASON_WON).as_deref(),
            Some("took the last stone")
        );
    }

    #[test]
    fn declare_losers_except_spares_the_winner() {
        let mut game = game_with_players();
        let ids: Vec<String> = game.player_ids().to_vec();

        GameManager::declare_winner(&mut game, &ids[0], "won");
        GameManager::declare_losers_except(&mut game, &ids[0], "opponent won");

        assert_eq!(game.attr_bool(&ids[0], ATTR_LOST), Some(false));
        assert_eq!(game.attr_bool(&ids[1], ATTR_LOST), Some(true));
        assert_eq!(
            game.attr_string(&ids[1], ATTR_REASON_LOST).as_deref(),
            Some("opponent won")
        );
    }
}
