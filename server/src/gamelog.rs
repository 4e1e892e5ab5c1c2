//! The gamelog scribe: turns state changes and AI events into deltas.
//!
//! Every mutation of interest funnels through one event channel. The scribe
//! flushes the game after each event, records a delta when there is anything
//! to record, streams it to the session for client forwarding, and hands the
//! accumulated list back when the game ends.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use shared::{
    Delta, DeltaConstants, DeltaEvent, FinishedEventData, Gamelog, InvalidEventData, OrderData,
    PlayerOutcome, RanEventData,
};

use crate::ai_manager::ClientFlags;
use crate::delta_mergeable::is_empty_diff;
use crate::game::Game;
use crate::game_object::{
    ATTR_NAME, ATTR_REASON_LOST, ATTR_REASON_WON, ATTR_WON,
};

/// Something delta-worthy happened.
#[derive(Debug)]
pub enum ScribeEvent {
    /// Initial state is complete; record the first delta.
    Created,
    Ordered(OrderData),
    Ran(RanEventData),
    Finished(FinishedEventData),
    Invalid(InvalidEventData),
    /// Record the final delta and stop.
    GameOver,
}

/// Spawns the scribe task. Deltas are streamed on `logged` as they are
/// recorded; the full list is the task's return value after `GameOver`.
pub fn spawn_scribe(
    game: Arc<RwLock<Game>>,
    mut events: mpsc::UnboundedReceiver<ScribeEvent>,
    logged: mpsc::UnboundedSender<Delta>,
) -> JoinHandle<Vec<Delta>> {
    tokio::spawn(async move {
        let mut deltas: Vec<Delta> = Vec::new();
        while let Some(event) = events.recv().await {
            let game_over = matches!(event, ScribeEvent::GameOver);
            let diff = game.write().await.flush();
            let event_data = match event {
                ScribeEvent::Created | ScribeEvent::GameOver => None,
                ScribeEvent::Ordered(order) => Some(DeltaEvent::Order(order)),
                ScribeEvent::Ran(ran) => Some(DeltaEvent::Ran(ran)),
                ScribeEvent::Finished(finished) => Some(DeltaEvent::Finished(finished)),
                ScribeEvent::Invalid(invalid) => Some(DeltaEvent::Invalid(invalid)),
            };
            if !is_empty_diff(&diff) || event_data.is_some() {
                let delta = Delta {
                    game: diff,
                    event: event_data,
                };
                deltas.push(delta.clone());
                let _ = logged.send(delta);
            }
            if game_over {
                break;
            }
        }
        deltas
    })
}

/// Assembles the final match record from the game's end state.
pub fn build_gamelog(
    game: &Game,
    random_seed: &str,
    deltas: Vec<Delta>,
    seat_flags: &[Arc<ClientFlags>],
) -> Gamelog {
    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for (seat, id) in game.player_ids().iter().enumerate() {
        let won = game.attr_bool(id, ATTR_WON) == Some(true);
        let reason_attr = if won { ATTR_REASON_WON } else { ATTR_REASON_LOST };
        let flags = seat_flags.get(seat);
        let outcome = PlayerOutcome {
            index: seat,
            id: id.clone(),
            name: game.attr_string(id, ATTR_NAME).unwrap_or_default(),
            reason: game.attr_string(id, reason_attr).unwrap_or_default(),
            disconnected: !won
                && flags.is_some_and(|f| {
                    f.disconnected.load(std::sync::atomic::Ordering::SeqCst)
                }),
            timed_out: !won
                && flags.is_some_and(|f| f.timed_out.load(std::sync::atomic::Ordering::SeqCst)),
        };
        if won {
            winners.push(outcome);
        } else {
            losers.push(outcome);
        }
    }

    Gamelog {
        game_name: game.name().to_string(),
        game_session: game.session().to_string(),
        epoch: epoch_ms(),
        random_seed: random_seed.to_string(),
        settings: Value::Object(game.settings().clone()),
        constants: DeltaConstants::default(),
        deltas,
        winners,
        losers,
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The unique filename a gamelog is stored (and addressed) under.
pub fn gamelog_filename(gamelog: &Gamelog) -> String {
    format!(
        "{}-{}-{}",
        gamelog.game_name, gamelog.game_session, gamelog.epoch
    )
}

/// Where clients can download the gamelog, when a base URL is configured.
pub fn gamelog_url(base: Option<&str>, filename: &str) -> Option<String> {
    base.map(|base| format!("{}/{}", base.trim_end_matches('/'), filename))
}

/// A link that opens the gamelog in the configured visualizer.
pub fn visualizer_url(visualizer: Option<&str>, gamelog_url: Option<&str>) -> Option<String> {
    Some(format!("{}?log={}", visualizer?, gamelog_url?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PlayerSlot;
    use crate::game_manager::GameManager;
    use crate::game_object::base_object_schemas;
    use crate::schema::GameSchema;
    use crate::settings::{base_settings, GameSettingsManager};
    use serde_json::json;

    fn test_game() -> Game {
        let schema = Arc::new(GameSchema::resolve(base_object_schemas()).unwrap());
        let settings = GameSettingsManager::new(&base_settings(), &json!({}));
        let mut game = Game::new("Test", "7", schema, &settings).unwrap();
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
        game.add_players(&slots, 1_000, &[]).unwrap();
        game
    }

    #[tokio::test]
    async fn scribe_records_only_meaningful_deltas() {
        let game = Arc::new(RwLock::new(test_game()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (logged_tx, mut logged_rx) = mpsc::unbounded_channel();
        let handle = spawn_scribe(Arc::clone(&game), events_rx, logged_tx);

        // Initial state is pending, so Created produces a delta.
        events_tx.send(ScribeEvent::Created).unwrap();
        // Nothing changed since, so GameOver produces none.
        events_tx.send(ScribeEvent::GameOver).unwrap();

        let deltas = handle.await.unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].event.is_none());
        assert_eq!(deltas[0].game["name"], "Test");

        assert!(logged_rx.recv().await.is_some());
        assert!(logged_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn events_without_state_changes_still_record() {
        let game = Arc::new(RwLock::new(test_game()));
        game.write().await.flush();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (logged_tx, _logged_rx) = mpsc::unbounded_channel();
        let handle = spawn_scribe(Arc::clone(&game), events_rx, logged_tx);

        events_tx
            .send(ScribeEvent::Ordered(OrderData {
                name: "runTurn".into(),
                index: 0,
                args: vec![],
            }))
            .unwrap();
        events_tx.send(ScribeEvent::GameOver).unwrap();

        let deltas = handle.await.unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(matches!(deltas[0].event, Some(DeltaEvent::Order(_))));
        assert!(is_empty_diff(&deltas[0].game));
    }

    #[test]
    fn dropped_event_sender_ends_the_scribe() {
        tokio_test::block_on(async {
            let game = Arc::new(RwLock::new(test_game()));
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (logged_tx, _logged_rx) = mpsc::unbounded_channel();
            let handle = spawn_scribe(Arc::clone(&game), events_rx, logged_tx);

            events_tx.send(ScribeEvent::Created).unwrap();
            drop(events_tx);

            let deltas = handle.await.unwrap();
            assert_eq!(deltas.len(), 1);
        })
    }

    #[test]
    fn gamelog_splits_winners_and_losers() {
        let mut game = test_game();
        let ids: Vec<String> = game.player_ids().to_vec();
        GameManager::declare_winner(&mut game, &ids[0], "took the last stone");
        GameManager::declare_losers_except(&mut game, &ids[0], "opponent won");

        let flags = vec![
            Arc::new(ClientFlags::default()),
            Arc::new(ClientFlags::default()),
        ];
        let gamelog = build_gamelog(&game, "seed123", vec![], &flags);

        assert_eq!(gamelog.winners.len(), 1);
        assert_eq!(gamelog.losers.len(), 1);
        assert_eq!(gamelog.winners[0].name, "alice");
        assert_eq!(gamelog.winners[0].reason, "took the last stone");
        assert_eq!(gamelog.random_seed, "seed123");
        assert_eq!(gamelog.game_session, "7");
    }

    #[test]
    fn urls_compose_from_configured_bases() {
        let gamelog = Gamelog {
            game_name: "Nim".into(),
            game_session: "1".into(),
            epoch: 1700000000000,
            random_seed: String::new(),
            settings: json!({}),
            constants: DeltaConstants::default(),
            deltas: vec![],
            winners: vec![],
            losers: vec![],
        };
        let filename = gamelog_filename(&gamelog);
        assert_eq!(filename, "Nim-1-1700000000000");

        let url = gamelog_url(Some("http://localhost:3080/gamelog/"), &filename);
        assert_eq!(
            url.as_deref(),
            Some("http://localhost:3080/gamelog/Nim-1-1700000000000")
        );
        assert_eq!(gamelog_url(None, &filename), None);

        let vis = visualizer_url(Some("http://vis.example"), url.as_deref());
        assert_eq!(
            vis.as_deref(),
            Some("http://vis.example?log=http://localhost:3080/gamelog/Nim-1-1700000000000")
        );
        assert_eq!(visualizer_url(None, url.as_deref()), None);
    }
}
