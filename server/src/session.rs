//! One running match, from client roster to terminal result.
//!
//! The session assembles the game, the per-seat AI managers and the scribe,
//! seats the clients, then drives a select loop that routes client events,
//! forwards logged deltas and watches for the three ways a match ends: the
//! game logic finishing, an explicit kill, or the watchdog firing. `run`
//! consumes the session, so it yields exactly one terminal result no matter
//! how many of those race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use shared::{ClientEvent, ClientInfo, Delta, Gamelog, PlayerReport, ServerEvent};

use crate::ai_manager::{AiManager, ClientFlags};
use crate::client::{AttachedClient, ClientIncoming};
use crate::delta_mergeable::is_empty_diff;
use crate::errors::ServerError;
use crate::game::{Game, PlayerSlot};
use crate::game_manager::GameContext;
use crate::game_object::{ATTR_LOST, ATTR_REASON_LOST, ATTR_REASON_WON, ATTR_WON};
use crate::gamelog::{
    build_gamelog, gamelog_filename, gamelog_url, spawn_scribe, visualizer_url, ScribeEvent,
};
use crate::namespace::GameNamespace;
use crate::settings::GameSettingsManager;

/// Extra slack on top of the computed clock budget before the watchdog
/// declares the session wedged.
const WATCHDOG_PADDING: Duration = Duration::from_secs(30);

/// Watchdog ceiling when no per-player budget is enforced.
const WATCHDOG_FALLBACK: Duration = Duration::from_secs(30 * 60);

/// Delay between the last message and closing sockets, so slow clients can
/// drain the final `over` or `fatal` frame.
const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// When false, orders wait indefinitely (useful under a debugger).
    pub timeouts_enabled: bool,
    pub gamelog_url_base: Option<String>,
    pub visualizer_url: Option<String>,
    pub grace_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeouts_enabled: true,
            gamelog_url_base: None,
            visualizer_url: None,
            grace_delay: DEFAULT_GRACE_DELAY,
        }
    }
}

/// Everything a session needs at construction.
pub struct SessionParams {
    pub session_id: String,
    pub namespace: Arc<GameNamespace>,
    pub settings: GameSettingsManager,
    /// All connected clients, in arrival order.
    pub clients: Vec<AttachedClient>,
    pub inbound: mpsc::UnboundedReceiver<(usize, ClientIncoming)>,
    pub config: SessionConfig,
}

/// The successful terminal state.
#[derive(Debug)]
pub struct SessionEnded {
    pub gamelog: Gamelog,
    pub client_infos: Vec<ClientInfo>,
}

pub type SessionResult = Result<SessionEnded, ServerError>;

/// Kills a running session from outside. The first reason wins; later calls
/// are no-ops.
#[derive(Clone)]
pub struct KillHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl KillHandle {
    /// Returns whether this call was the one that killed the session.
    pub fn kill(&self, reason: &str) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.to_string());
            true
        })
    }
}

pub struct Session {
    id: String,
    namespace: Arc<GameNamespace>,
    config: SessionConfig,
    settings: GameSettingsManager,
    clients: Vec<AttachedClient>,
    /// Seat index to roster slot.
    seat_to_slot: Vec<usize>,
    /// Roster slot to seat index, for playing clients only.
    slot_to_seat: HashMap<usize, usize>,
    player_ids: Vec<String>,
    game: Arc<RwLock<Game>>,
    ctx: Arc<GameContext>,
    inbound: mpsc::UnboundedReceiver<(usize, ClientIncoming)>,
    scribe_events: mpsc::UnboundedSender<ScribeEvent>,
    scribe_handle: JoinHandle<Vec<Delta>>,
    logged_rx: mpsc::UnboundedReceiver<Delta>,
    kill_rx: watch::Receiver<Option<String>>,
    /// Cleared once the terminal delta has been forwarded.
    forwarding: bool,
}

enum LoopOutcome {
    Over,
    Fatal(String),
}

/// One wakeup of the session's select loop.
enum Tick {
    Killed,
    KillDisarmed,
    LogicDone(Result<Result<(), ServerError>, tokio::task::JoinError>),
    Incoming(usize, ClientIncoming),
    InboundClosed,
    Logged(Delta),
    ScribeGone,
    Watchdog,
}

impl Session {
    /// Seats the clients, builds the game and wires up the delta pipeline.
    /// Must be called within a tokio runtime.
    pub fn new(params: SessionParams) -> Result<(Self, KillHandle), ServerError> {
        let SessionParams {
            session_id,
            namespace,
            settings,
            clients,
            inbound,
            config,
        } = params;

        let players: Vec<usize> = clients
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.pending.spectating)
            .map(|(slot, _)| slot)
            .collect();
        let requested: Vec<Option<usize>> = players
            .iter()
            .map(|&slot| clients[slot].pending.index)
            .collect();
        let seats = assign_seats(&requested, namespace.required_players)?;
        let seat_to_slot: Vec<usize> = seats.iter().map(|&p| players[p]).collect();
        let slot_to_seat: HashMap<usize, usize> = seat_to_slot
            .iter()
            .enumerate()
            .map(|(seat, &slot)| (slot, seat))
            .collect();

        let slots: Vec<PlayerSlot> = seat_to_slot
            .iter()
            .map(|&slot| PlayerSlot {
                name: clients[slot].pending.name.clone(),
                client_type: clients[slot].pending.client_type.clone(),
            })
            .collect();

        let mut game = Game::new(
            &namespace.game_name,
            &session_id,
            Arc::clone(&namespace.schema),
            &settings,
        )?;
        let player_ids = game.add_players(
            &slots,
            settings.max_player_time(),
            &settings.player_names(),
        )?;
        namespace.logic.init(&mut game)?;
        let game = Arc::new(RwLock::new(game));

        let (scribe_tx, scribe_rx) = mpsc::unbounded_channel();
        let (logged_tx, logged_rx) = mpsc::unbounded_channel();
        let scribe_handle = spawn_scribe(Arc::clone(&game), scribe_rx, logged_tx);

        let next_order = Arc::new(AtomicU64::new(0));
        let ais: Vec<Arc<AiManager>> = seat_to_slot
            .iter()
            .enumerate()
            .map(|(seat, &slot)| {
                AiManager::new(
                    player_ids[seat].clone(),
                    seat,
                    Arc::clone(&namespace),
                    Arc::clone(&game),
                    clients[slot].outbound.clone(),
                    scribe_tx.clone(),
                    Arc::clone(&next_order),
                    Arc::clone(&clients[slot].flags),
                    config.timeouts_enabled,
                )
            })
            .collect();
        let ctx = GameContext::new(Arc::clone(&game), ais);

        let (kill_tx, kill_rx) = watch::channel(None);
        let session = Self {
            id: session_id,
            namespace,
            config,
            settings,
            clients,
            seat_to_slot,
            slot_to_seat,
            player_ids,
            game,
            ctx,
            inbound,
            scribe_events: scribe_tx,
            scribe_handle,
            logged_rx,
            kill_rx,
            forwarding: true,
        };
        Ok((session, KillHandle { tx: Arc::new(kill_tx) }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the match to its single terminal result.
    pub async fn run(mut self) -> SessionResult {
        info!(
            "session {} of {} starting with {} clients",
            self.id,
            self.namespace.game_name,
            self.clients.len()
        );

        for (slot, client) in self.clients.iter().enumerate() {
            let player_id = self
                .slot_to_seat
                .get(&slot)
                .map(|&seat| self.player_ids[seat].clone());
            let _ = client.outbound.send(ServerEvent::Start { player_id });
        }
        let _ = self.scribe_events.send(ScribeEvent::Created);

        let mut logic = {
            let logic = Arc::clone(&self.namespace.logic);
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move { logic.run(ctx).await })
        };

        let watchdog = watchdog_duration(
            self.settings.max_player_time(),
            self.namespace.required_players,
            self.config.timeouts_enabled,
        );
        let watchdog_sleep = tokio::time::sleep(watchdog);
        tokio::pin!(watchdog_sleep);

        let mut kill_rx = self.kill_rx.clone();
        let mut kill_armed = true;
        let mut inbound_open = true;
        let mut logged_open = true;
        let outcome = loop {
            if let Some(reason) = kill_rx.borrow().clone() {
                break LoopOutcome::Fatal(reason);
            }
            let tick = tokio::select! {
                changed = kill_rx.changed(), if kill_armed => match changed {
                    Ok(()) => Tick::Killed,
                    // The kill handle was dropped; nobody can kill us now.
                    Err(_) => Tick::KillDisarmed,
                },
                result = &mut logic => Tick::LogicDone(result),
                incoming = self.inbound.recv(), if inbound_open => match incoming {
                    Some((slot, incoming)) => Tick::Incoming(slot, incoming),
                    None => Tick::InboundClosed,
                },
                delta = self.logged_rx.recv(), if logged_open => match delta {
                    Some(delta) => Tick::Logged(delta),
                    None => Tick::ScribeGone,
                },
                _ = &mut watchdog_sleep => Tick::Watchdog,
            };
            match tick {
                Tick::Killed => {
                    let reason = kill_rx
                        .borrow()
                        .clone()
                        .unwrap_or_else(|| "session killed".to_string());
                    break LoopOutcome::Fatal(reason);
                }
                Tick::KillDisarmed => kill_armed = false,
                Tick::LogicDone(result) => {
                    break match result {
                        Ok(Ok(())) => LoopOutcome::Over,
                        Ok(Err(err)) => LoopOutcome::Fatal(err.to_string()),
                        Err(join_err) => {
                            LoopOutcome::Fatal(format!("game logic panicked: {join_err}"))
                        }
                    };
                }
                Tick::Incoming(slot, incoming) => self.route(slot, incoming).await,
                Tick::InboundClosed => inbound_open = false,
                Tick::Logged(delta) => self.forward_delta(&delta).await,
                Tick::ScribeGone => logged_open = false,
                Tick::Watchdog => {
                    break LoopOutcome::Fatal(format!(
                        "session exceeded its {}s watchdog",
                        watchdog.as_secs()
                    ));
                }
            }
        };

        match outcome {
            LoopOutcome::Over => self.game_over().await,
            LoopOutcome::Fatal(reason) => {
                logic.abort();
                self.fail(reason).await
            }
        }
    }

    /// Routes one inbound client message to the owning AI manager.
    async fn route(&self, slot: usize, incoming: ClientIncoming) {
        let seat = self.slot_to_seat.get(&slot).copied();
        match incoming {
            ClientIncoming::Disconnected => match seat {
                Some(seat) => self.ctx.ai(seat).fault_disconnect().await,
                None => info!("spectator {slot} left session {}", self.id),
            },
            ClientIncoming::Event(ClientEvent::Finished {
                order_index,
                returned,
            }) => match seat {
                Some(seat) => {
                    let ai = self.ctx.ai(seat);
                    if !ai.deliver(order_index, returned).await {
                        ai.fault_timeout("sent an unexpected or out-of-order answer")
                            .await;
                    }
                }
                None => warn!("spectator {slot} sent a finished event"),
            },
            ClientIncoming::Event(ClientEvent::Run(run)) => match seat {
                Some(seat) => self.ctx.ai(seat).handle_run(run).await,
                None => warn!("spectator {slot} sent a run event"),
            },
        }
    }

    /// Pushes one logged delta to every client, then stops forwarding for
    /// good once the terminal delta has gone out.
    async fn forward_delta(&mut self, delta: &Delta) {
        if !self.forwarding || is_empty_diff(&delta.game) {
            return;
        }
        for client in &self.clients {
            let event = if client.pending.meta_deltas {
                ServerEvent::MetaDelta(delta.clone())
            } else {
                ServerEvent::Delta(delta.game.clone())
            };
            let _ = client.outbound.send(event);
        }
        let game = self.game.read().await;
        if self.namespace.logic.is_game_over(&game) {
            self.forwarding = false;
        }
    }

    async fn game_over(mut self) -> SessionResult {
        info!("session {} game over", self.id);
        let _ = self.scribe_events.send(ScribeEvent::GameOver);
        let deltas = match (&mut self.scribe_handle).await {
            Ok(deltas) => deltas,
            Err(err) => return self.fail(format!("gamelog scribe failed: {err}")).await,
        };
        // Deltas recorded since the loop exited are still queued; flush them
        // before the over event so clients see the final state first.
        while let Ok(delta) = self.logged_rx.try_recv() {
            self.forward_delta(&delta).await;
        }

        let (gamelog, client_infos) = {
            let game = self.game.read().await;
            let seat_flags: Vec<Arc<ClientFlags>> = self
                .seat_to_slot
                .iter()
                .map(|&slot| Arc::clone(&self.clients[slot].flags))
                .collect();
            let gamelog = build_gamelog(&game, &self.settings.random_seed(), deltas, &seat_flags);
            let client_infos = self.client_infos(&game);
            (gamelog, client_infos)
        };

        let filename = gamelog_filename(&gamelog);
        let url = gamelog_url(self.config.gamelog_url_base.as_deref(), &filename);
        let vis = visualizer_url(self.config.visualizer_url.as_deref(), url.as_deref());
        let over = ServerEvent::Over {
            gamelog_url: url,
            visualizer_url: vis,
            message: Some(format!("The game is over; gamelog: {filename}")),
        };
        for client in &self.clients {
            let _ = client.outbound.send(over.clone());
        }

        self.teardown().await;
        Ok(SessionEnded {
            gamelog,
            client_infos,
        })
    }

    async fn fail(self, reason: String) -> SessionResult {
        error!("session {} fatal: {reason}", self.id);
        let fatal = ServerEvent::Fatal {
            message: format!("An unhandled fatal error occurred on the server: {reason}"),
        };
        for client in &self.clients {
            let _ = client.outbound.send(fatal.clone());
        }
        self.scribe_handle.abort();
        self.teardown().await;
        Err(ServerError::Fatal(reason))
    }

    /// Common teardown: wait the grace delay so slow clients drain the final
    /// message, then drop everything (closing the outbound channels flushes
    /// and shuts the sockets down).
    async fn teardown(&self) {
        tokio::time::sleep(self.config.grace_delay).await;
        info!("session {} ended", self.id);
    }

    fn client_infos(&self, game: &Game) -> Vec<ClientInfo> {
        self.clients
            .iter()
            .enumerate()
            .map(|(slot, client)| {
                let player = self.slot_to_seat.get(&slot).map(|&seat| {
                    let id = &self.player_ids[seat];
                    let won = game.attr_bool(id, ATTR_WON) == Some(true);
                    let reason_attr = if won { ATTR_REASON_WON } else { ATTR_REASON_LOST };
                    PlayerReport {
                        index: seat,
                        won,
                        lost: game.attr_bool(id, ATTR_LOST) == Some(true),
                        reason: game.attr_string(id, reason_attr).unwrap_or_default(),
                        disconnected: !won
                            && client.flags.disconnected.load(Ordering::SeqCst),
                        timed_out: !won && client.flags.timed_out.load(Ordering::SeqCst),
                    }
                });
                ClientInfo {
                    name: client.pending.name.clone(),
                    spectating: client.pending.spectating,
                    player,
                }
            })
            .collect()
    }
}

/// Assigns each playing client a seat: explicit requests first, then
/// arrival order backfills the gaps. Conflicts are configuration errors.
fn assign_seats(requested: &[Option<usize>], seat_count: usize) -> Result<Vec<usize>, ServerError> {
    if requested.len() != seat_count {
        return Err(ServerError::Config(format!(
            "game requires {seat_count} players but {} connected",
            requested.len()
        )));
    }
    let mut seats: Vec<Option<usize>> = vec![None; seat_count];
    for (player, request) in requested.iter().enumerate() {
        if let Some(seat) = *request {
            if seat >= seat_count {
                return Err(ServerError::Config(format!(
                    "player {player} requested seat {seat}, but the game has {seat_count} seats"
                )));
            }
            if seats[seat].is_some() {
                return Err(ServerError::Config(format!(
                    "seat {seat} was requested by more than one player"
                )));
            }
            seats[seat] = Some(player);
        }
    }
    let mut unseated = (0..requested.len()).filter(|&p| requested[p].is_none());
    let seats = seats
        .into_iter()
        .map(|taken| taken.or_else(|| unseated.next()));
    // Counts match, so every seat gets a player.
    seats
        .map(|seat| {
            seat.ok_or_else(|| ServerError::Config("could not fill every seat".to_string()))
        })
        .collect()
}

/// How long the whole session may take before it is declared wedged.
fn watchdog_duration(max_player_time_ns: u64, seats: usize, timeouts_enabled: bool) -> Duration {
    if !timeouts_enabled || max_player_time_ns == 0 {
        return WATCHDOG_FALLBACK;
    }
    let budget = max_player_time_ns.saturating_mul(seats as u64).saturating_mul(2);
    Duration::from_nanos(budget) + WATCHDOG_PADDING
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{attach, PendingClient};
    use crate::games;
    use serde_json::json;
    use tokio::io::duplex;

    #[test]
    fn seats_respect_explicit_requests_then_arrival_order() {
        // Arrival order: b wants seat 0, a and c take the rest in order.
        let seats = assign_seats(&[None, Some(0), None], 3).unwrap();
        assert_eq!(seats, vec![1, 0, 2]);

        let seats = assign_seats(&[None, None], 2).unwrap();
        assert_eq!(seats, vec![0, 1]);

        let seats = assign_seats(&[Some(1), Some(0)], 2).unwrap();
        assert_eq!(seats, vec![1, 0]);
    }

    #[test]
    fn seat_conflicts_are_config_errors() {
        assert!(matches!(
            assign_seats(&[Some(0), Some(0)], 2),
            Err(ServerError::Config(_))
        ));
        assert!(matches!(
            assign_seats(&[Some(5), None], 2),
            Err(ServerError::Config(_))
        ));
        assert!(matches!(
            assign_seats(&[None], 2),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn watchdog_scales_with_the_budget_and_falls_back() {
        let one_minute_ns = 60 * 1_000_000_000u64;
        let scaled = watchdog_duration(one_minute_ns, 2, true);
        assert_eq!(scaled, Duration::from_secs(4 * 60) + WATCHDOG_PADDING);

        assert_eq!(watchdog_duration(0, 2, true), WATCHDOG_FALLBACK);
        assert_eq!(watchdog_duration(one_minute_ns, 2, false), WATCHDOG_FALLBACK);
    }

    fn test_params(clients: Vec<AttachedClient>, inbound: mpsc::UnboundedReceiver<(usize, ClientIncoming)>) -> SessionParams {
        let namespace = games::nim::namespace().unwrap();
        let settings = GameSettingsManager::new(&namespace.settings, &json!({}));
        SessionParams {
            session_id: "1".into(),
            namespace,
            settings,
            clients,
            inbound,
            config: SessionConfig {
                grace_delay: Duration::from_millis(10),
                ..SessionConfig::default()
            },
        }
    }

    fn two_duplex_clients(
        inbound_tx: &mpsc::UnboundedSender<(usize, ClientIncoming)>,
    ) -> (Vec<AttachedClient>, Vec<tokio::io::DuplexStream>) {
        let mut clients = Vec::new();
        let mut far_sides = Vec::new();
        for slot in 0..2 {
            let (server_side, client_side) = duplex(64 * 1024);
            far_sides.push(client_side);
            clients.push(attach(
                server_side,
                slot,
                PendingClient {
                    name: format!("player{slot}"),
                    index: None,
                    client_type: "Test".into(),
                    spectating: false,
                    meta_deltas: false,
                },
                inbound_tx.clone(),
            ));
        }
        (clients, far_sides)
    }

    #[tokio::test]
    async fn killing_twice_yields_one_fatal_result() {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (clients, _far_sides) = two_duplex_clients(&inbound_tx);
        let (session, kill) = Session::new(test_params(clients, inbound_rx)).unwrap();

        assert!(kill.kill("first reason"));
        assert!(!kill.kill("second reason"));

        match session.run().await {
            Err(ServerError::Fatal(reason)) => assert_eq!(reason, "first reason"),
            other => panic!("expected a fatal result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn too_few_players_fail_construction() {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (mut clients, _far_sides) = two_duplex_clients(&inbound_tx);
        clients.truncate(1);
        let err = match Session::new(test_params(clients, inbound_rx)) {
            Ok(_) => panic!("one client should not satisfy a two-player game"),
            Err(err) => err,
        };
        assert!(matches!(err, ServerError::Config(_)));
    }
}
