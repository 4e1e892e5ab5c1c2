//! The delta/gamelog schema and the worker <-> parent process messages.
//!
//! A gamelog is the canonical, replayable record of one match: session
//! metadata plus the ordered sequence of every delta that was streamed to
//! clients. It must be reconstructible purely from the delta manager's flush
//! history and the session's metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{GameObjectRef, OrderData, RunData, DELTA_LIST_LENGTH, DELTA_REMOVED};

/// One tick of the match record: the minimal game-state diff plus at most
/// one event describing the AI interaction that triggered it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Delta {
    /// The nested diff of game state since the previous delta.
    pub game: Value,
    /// The triggering event, if any (the initial-state delta has none).
    #[serde(flatten)]
    pub event: Option<DeltaEvent>,
}

/// The AI interaction that triggered a delta. Externally tagged so the wire
/// shape is `{"order": ...}` / `{"ran": ...}` / etc.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DeltaEvent {
    Order(OrderData),
    Ran(RanEventData),
    Finished(FinishedEventData),
    Invalid(InvalidEventData),
}

/// Event payload: a client's run request was executed (or rejected).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RanEventData {
    pub player: GameObjectRef,
    pub run: RunData,
    pub returned: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<String>,
}

/// Event payload: a client answered an order.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FinishedEventData {
    pub player: GameObjectRef,
    pub order: OrderData,
    pub returned: Value,
}

/// Event payload: a client's run request was vetoed before execution.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InvalidEventData {
    pub player: GameObjectRef,
    pub run: RunData,
    pub message: String,
}

/// The delta-encoding sentinels, recorded in every gamelog so replayers do
/// not have to hardcode them.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeltaConstants {
    #[serde(rename = "DELTA_REMOVED")]
    pub delta_removed: String,
    #[serde(rename = "DELTA_LIST_LENGTH")]
    pub delta_list_length: String,
}

impl Default for DeltaConstants {
    fn default() -> Self {
        Self {
            delta_removed: DELTA_REMOVED.to_string(),
            delta_list_length: DELTA_LIST_LENGTH.to_string(),
        }
    }
}

/// A player's final outcome as recorded in the gamelog.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayerOutcome {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub reason: String,
    pub disconnected: bool,
    pub timed_out: bool,
}

/// The persisted match record.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Gamelog {
    pub game_name: String,
    pub game_session: String,
    /// Unix epoch milliseconds when the match ended.
    pub epoch: u64,
    pub random_seed: String,
    /// The frozen setting values the match was played with.
    pub settings: Value,
    pub constants: DeltaConstants,
    pub deltas: Vec<Delta>,
    pub winners: Vec<PlayerOutcome>,
    pub losers: Vec<PlayerOutcome>,
}

/// Per-client summary reported by the worker when a session ends.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub spectating: bool,
    /// Present only for clients that played a seat.
    #[serde(flatten)]
    pub player: Option<PlayerReport>,
}

/// The player-specific half of a [`ClientInfo`].
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReport {
    pub index: usize,
    pub won: bool,
    pub lost: bool,
    pub reason: String,
    pub disconnected: bool,
    pub timed_out: bool,
}

/// Control messages the parent process sends its session worker.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Announces one client of the roster; its socket arrives separately.
    Client {
        #[serde(rename = "clientInfo")]
        client_info: WorkerClientInfo,
    },
    /// All clients delivered; the worker should construct the session.
    Done,
}

/// The roster entry carried by a [`WorkerMessage::Client`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerClientInfo {
    /// The client transport class the parent attached (e.g. "TCPClient").
    #[serde(rename = "className")]
    pub class_name: String,
    /// The seat index this client requested, if any.
    pub index: Option<usize>,
    pub name: String,
    /// The client's declared AI runtime language.
    #[serde(rename = "type")]
    pub client_type: String,
    pub spectating: bool,
    #[serde(rename = "metaDeltas")]
    pub meta_deltas: bool,
}

/// The worker's single terminal report back to its parent.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamelog: Option<Gamelog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_infos: Option<Vec<ClientInfo>>,
}
