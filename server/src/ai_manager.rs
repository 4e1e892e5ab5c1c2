//! Per-seat AI management: orders out, answers and runs in.
//!
//! One `AiManager` exists per playing client. It owns that player's clock:
//! every order is awaited under the player's remaining time budget, elapsed
//! time is deducted on answer, and exhausting the budget faults the client.
//! Faulted clients never block the game again; their orders resolve
//! immediately with the ordered function's declared invalid value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::{Duration, Instant};

use shared::{
    FinishedEventData, GameObjectRef, InvalidEventData, OrderData, RanEventData, RunData,
    ServerEvent,
};

use crate::errors::InvalidArgument;
use crate::game::Game;
use crate::game_manager::GameManager;
use crate::game_object::ATTR_TIME_REMAINING;
use crate::gamelog::ScribeEvent;
use crate::namespace::GameNamespace;
use crate::sanitize::sanitize;

/// Connection-fault state of one client, shared with its socket tasks.
#[derive(Debug, Default)]
pub struct ClientFlags {
    pub disconnected: AtomicBool,
    pub timed_out: AtomicBool,
}

impl ClientFlags {
    pub fn faulted(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst) || self.timed_out.load(Ordering::SeqCst)
    }
}

struct PendingOrder {
    index: u64,
    reply: oneshot::Sender<Value>,
}

pub struct AiManager {
    player_id: String,
    seat: usize,
    namespace: Arc<GameNamespace>,
    game: Arc<RwLock<Game>>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    events: mpsc::UnboundedSender<ScribeEvent>,
    /// At most one order is in flight per AI at a time.
    pending: Mutex<Option<PendingOrder>>,
    /// Session-wide order counter, shared so indices are unique across seats.
    next_order: Arc<AtomicU64>,
    pub flags: Arc<ClientFlags>,
    timeouts_enabled: bool,
}

impl AiManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        player_id: String,
        seat: usize,
        namespace: Arc<GameNamespace>,
        game: Arc<RwLock<Game>>,
        outbound: mpsc::UnboundedSender<ServerEvent>,
        events: mpsc::UnboundedSender<ScribeEvent>,
        next_order: Arc<AtomicU64>,
        flags: Arc<ClientFlags>,
        timeouts_enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            player_id,
            seat,
            namespace,
            game,
            outbound,
            events,
            pending: Mutex::new(None),
            next_order,
            flags,
            timeouts_enabled,
        })
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn seat(&self) -> usize {
        self.seat
    }

    pub fn faulted(&self) -> bool {
        self.flags.faulted()
    }

    /// Calls one of the client AI's functions and waits for the answer,
    /// charged against the player's clock.
    pub async fn order(&self, function: &str, args: Vec<Value>) -> Value {
        let schema = self.namespace.ai_function(function);
        if schema.is_none() {
            warn!("ordered unknown AI function '{function}'");
        }
        let invalid_value = schema.map(|s| s.invalid_value.clone()).unwrap_or(Value::Null);
        if self.faulted() {
            return invalid_value;
        }

        let index = self.next_order.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        *self.pending.lock().await = Some(PendingOrder {
            index,
            reply: reply_tx,
        });

        let order = OrderData {
            name: function.to_string(),
            index,
            args,
        };
        let _ = self.events.send(ScribeEvent::Ordered(order.clone()));
        let _ = self.outbound.send(ServerEvent::Order(order.clone()));

        let remaining = {
            let game = self.game.read().await;
            game.attr_u64(&self.player_id, ATTR_TIME_REMAINING)
                .unwrap_or(0)
        };
        let started = Instant::now();

        let answer = if self.timeouts_enabled {
            match tokio::time::timeout(Duration::from_nanos(remaining), reply_rx).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    self.fault_timeout("ran out of time").await;
                    return invalid_value;
                }
            }
        } else {
            reply_rx.await.ok()
        };

        let Some(returned) = answer else {
            // The reply sender was dropped by a fault path; flags are set.
            return invalid_value;
        };

        let elapsed = started.elapsed().as_nanos() as u64;
        let mut game = self.game.write().await;
        game.set_attr(
            &self.player_id,
            ATTR_TIME_REMAINING,
            Value::from(remaining.saturating_sub(elapsed)),
        );
        let returned = match schema {
            Some(schema) => {
                sanitize(&schema.returns, &returned, &*game).unwrap_or(invalid_value)
            }
            None => Value::Null,
        };
        drop(game);

        let _ = self.events.send(ScribeEvent::Finished(FinishedEventData {
            player: self.player_ref(),
            order,
            returned: returned.clone(),
        }));
        returned
    }

    /// Routes an answer from the client to the waiting order. Returns false
    /// when no such order is in flight, which is itself a client fault.
    pub async fn deliver(&self, order_index: u64, returned: Value) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.take() {
            Some(p) if p.index == order_index => {
                let _ = p.reply.send(returned);
                true
            }
            other => {
                *pending = other;
                false
            }
        }
    }

    /// Marks the client timed out: clock zeroed, loss declared, any pending
    /// order cancelled. Idempotent.
    pub async fn fault_timeout(&self, reason: &str) {
        if self.flags.faulted() {
            return;
        }
        self.flags.timed_out.store(true, Ordering::SeqCst);
        info!("player {} timed out: {reason}", self.player_id);
        let _ = self.outbound.send(ServerEvent::Fatal {
            message: format!("You {reason} and have been timed out."),
        });
        let mut game = self.game.write().await;
        game.set_attr(&self.player_id, ATTR_TIME_REMAINING, Value::from(0));
        GameManager::declare_loser(&mut game, &self.player_id, &format!("Timed out: {reason}."));
        drop(game);
        self.cancel_pending().await;
    }

    /// Marks the client disconnected and declares its loss. Idempotent.
    pub async fn fault_disconnect(&self) {
        if self.flags.faulted() {
            return;
        }
        self.flags.disconnected.store(true, Ordering::SeqCst);
        info!("player {} disconnected unexpectedly", self.player_id);
        let mut game = self.game.write().await;
        GameManager::declare_loser(&mut game, &self.player_id, "Disconnected during the game.");
        drop(game);
        self.cancel_pending().await;
    }

    async fn cancel_pending(&self) {
        self.pending.lock().await.take();
    }

    /// Handles a `run` request from this client: veto hook first, then
    /// argument sanitization, then execution.
    pub async fn handle_run(&self, run: RunData) {
        let mut game = self.game.write().await;

        let Some(caller_class) = game.object_class(&run.caller.id).map(str::to_string) else {
            drop(game);
            self.reject(run, "caller is not a valid game object".into(), Value::Null);
            return;
        };
        let Some(function) = game
            .schema()
            .function(&caller_class, &run.function_name)
            .cloned()
        else {
            drop(game);
            let message = format!("{caller_class} has no function '{}'", run.function_name);
            self.reject(run, message, Value::Null);
            return;
        };

        // Named arguments in declared order, defaults filled in.
        let mut args = Map::new();
        for arg in &function.args {
            let value = run
                .args
                .get(&arg.name)
                .cloned()
                .or_else(|| arg.default.clone())
                .unwrap_or(Value::Null);
            args.insert(arg.name.clone(), value);
        }

        if let Some(reason) = self.namespace.logic.invalidate(
            &game,
            &self.player_id,
            &run.caller.id,
            &run.function_name,
            &mut args,
        ) {
            drop(game);
            self.reject(run, reason, function.invalid_value.clone());
            return;
        }

        for arg in &function.args {
            let supplied = args.get(&arg.name).cloned().unwrap_or(Value::Null);
            match sanitize(&arg.descriptor, &supplied, &*game) {
                Ok(clean) => {
                    args.insert(arg.name.clone(), clean);
                }
                Err(err) => {
                    drop(game);
                    let err = InvalidArgument::new(arg.name.clone(), err.message)
                        .nested(&run.function_name);
                    self.reject(run, err.to_string(), function.invalid_value.clone());
                    return;
                }
            }
        }

        let returned = self.namespace.logic.execute(
            &mut game,
            &self.player_id,
            &run.caller.id,
            &run.function_name,
            &args,
        );
        drop(game);

        let _ = self.outbound.send(ServerEvent::Ran(returned.clone()));
        let _ = self.events.send(ScribeEvent::Ran(RanEventData {
            player: self.player_ref(),
            run,
            returned,
            invalid: None,
        }));
    }

    /// Rejects a run: the client learns why, then gets the invalid value as
    /// the call's result so it can continue.
    fn reject(&self, run: RunData, message: String, invalid_value: Value) {
        info!(
            "player {} run of '{}' rejected: {message}",
            self.player_id, run.function_name
        );
        let _ = self.outbound.send(ServerEvent::Invalid {
            message: message.clone(),
        });
        let _ = self.outbound.send(ServerEvent::Ran(invalid_value));
        let _ = self.events.send(ScribeEvent::Invalid(InvalidEventData {
            player: self.player_ref(),
            run,
            message,
        }));
    }

    fn player_ref(&self) -> GameObjectRef {
        GameObjectRef {
            id: self.player_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PlayerSlot;
    use crate::games;
    use crate::settings::GameSettingsManager;
    use serde_json::json;

    struct Fixture {
        ai: Arc<AiManager>,
        game: Arc<RwLock<Game>>,
        outbound: mpsc::UnboundedReceiver<ServerEvent>,
        events: mpsc::UnboundedReceiver<ScribeEvent>,
    }

    fn fixture(starting_time_ns: u64) -> Fixture {
        let namespace = games::nim::namespace().unwrap();
        let settings = GameSettingsManager::new(&namespace.settings, &json!({}));
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
        let ids = game.add_players(&slots, starting_time_ns, &[]).unwrap();
        namespace.logic.init(&mut game).unwrap();
        let game = Arc::new(RwLock::new(game));

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ai = AiManager::new(
            ids[0].clone(),
            0,
            namespace,
            Arc::clone(&game),
            outbound_tx,
            events_tx,
            Arc::new(AtomicU64::new(0)),
            Arc::new(ClientFlags::default()),
            true,
        );
        Fixture {
            ai,
            game,
            outbound: outbound_rx,
            events: events_rx,
        }
    }

    #[tokio::test]
    async fn answered_orders_resolve_and_charge_the_clock() {
        let mut fx = fixture(5_000_000_000);
        let ai = Arc::clone(&fx.ai);
        let worker = tokio::spawn(async move { ai.order("runTurn", vec![]).await });

        // Wait until the order is actually on the outbound channel.
        let sent = fx.outbound.recv().await.unwrap();
        let index = match sent {
            ServerEvent::Order(order) => order.index,
            other => panic!("expected an order, got {other:?}"),
        };
        assert!(fx.ai.deliver(index, json!(true)).await);

        let returned = worker.await.unwrap();
        assert_eq!(returned, json!(true));

        let game = fx.game.read().await;
        let remaining = game
            .attr_u64(fx.ai.player_id(), ATTR_TIME_REMAINING)
            .unwrap();
        assert!(remaining < 5_000_000_000);
        drop(game);

        assert!(matches!(
            fx.events.recv().await,
            Some(ScribeEvent::Ordered(_))
        ));
        assert!(matches!(
            fx.events.recv().await,
            Some(ScribeEvent::Finished(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_clock_times_the_player_out() {
        let mut fx = fixture(1_000_000); // 1ms
        let returned = fx.ai.order("runTurn", vec![]).await;

        // runTurn's invalid value.
        assert_eq!(returned, json!(false));
        assert!(fx.ai.flags.timed_out.load(Ordering::SeqCst));

        let game = fx.game.read().await;
        assert_eq!(
            game.attr_u64(fx.ai.player_id(), ATTR_TIME_REMAINING),
            Some(0)
        );
        assert_eq!(game.attr_bool(fx.ai.player_id(), "lost"), Some(true));
        drop(game);

        // Faulted clients resolve later orders immediately.
        let returned = fx.ai.order("runTurn", vec![]).await;
        assert_eq!(returned, json!(false));
        assert!(matches!(
            fx.outbound.try_recv(),
            Ok(ServerEvent::Order(_))
        ));
    }

    #[tokio::test]
    async fn answers_for_unknown_orders_are_not_delivered() {
        let fx = fixture(5_000_000_000);
        assert!(!fx.ai.deliver(99, json!(true)).await);
    }

    #[tokio::test]
    async fn out_of_turn_runs_are_vetoed_without_executing() {
        let mut fx = fixture(5_000_000_000);
        let (player_two, remaining_before) = {
            let game = fx.game.read().await;
            (
                game.player_ids()[1].clone(),
                game.game_attr_i64("remaining").unwrap(),
            )
        };

        // Seat 0's AI manager runs "take" on seat 1's player object.
        let mut args = Map::new();
        args.insert("count".into(), json!(1));
        fx.ai
            .handle_run(RunData {
                caller: GameObjectRef { id: player_two },
                function_name: "take".into(),
                args,
            })
            .await;

        let game = fx.game.read().await;
        assert_eq!(game.game_attr_i64("remaining"), Some(remaining_before));
        drop(game);

        assert!(matches!(
            fx.outbound.recv().await,
            Some(ServerEvent::Invalid { .. })
        ));
        match fx.outbound.recv().await {
            Some(ServerEvent::Ran(value)) => assert_eq!(value, json!(false)),
            other => panic!("expected ran, got {other:?}"),
        }
        assert!(matches!(
            fx.events.recv().await,
            Some(ScribeEvent::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn unsanitary_arguments_are_rejected_with_a_path() {
        let mut fx = fixture(5_000_000_000);
        let player_one = {
            let game = fx.game.read().await;
            game.player_ids()[0].clone()
        };

        let mut args = Map::new();
        args.insert("count".into(), json!([1, 2]));
        fx.ai
            .handle_run(RunData {
                caller: GameObjectRef { id: player_one },
                function_name: "take".into(),
                args,
            })
            .await;

        match fx.outbound.recv().await {
            Some(ServerEvent::Invalid { message }) => {
                assert!(message.contains("take.count"), "got: {message}");
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }
}
