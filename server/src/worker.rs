//! The session worker: one process, one match.
//!
//! A worker is launched by the lobby/arbiter parent with its session handed
//! down through the `WORKER_SESSION_DATA` environment variable. The parent
//! then announces each client of the roster on the control channel (stdin in
//! production); the worker accepts one TCP connection per announcement, in
//! the same order. After `done`, the session runs to its terminal result and
//! the worker reports exactly once: a gamelog on success, an error otherwise.

use std::env;

use log::info;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use shared::{WorkerMessage, WorkerReport};

use crate::client::{attach, PendingClient};
use crate::errors::ServerError;
use crate::namespace::GameRegistry;
use crate::session::{Session, SessionConfig, SessionParams, SessionResult};
use crate::settings::GameSettingsManager;

pub const WORKER_ENV: &str = "WORKER_SESSION_DATA";

fn default_timeouts() -> bool {
    true
}

/// Everything the parent hands a worker at spawn time.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSessionData {
    pub session_id: String,
    pub game_name: String,
    #[serde(default)]
    pub game_settings: Value,
    #[serde(default)]
    pub gamelog_url_base: Option<String>,
    #[serde(default)]
    pub visualizer_url: Option<String>,
    #[serde(default = "default_timeouts")]
    pub timeouts_enabled: bool,
}

impl WorkerSessionData {
    pub fn parse(raw: &str) -> Result<Self, ServerError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads the spawn-time data, or `None` when the process was not
    /// launched as a worker.
    pub fn from_env() -> Result<Option<Self>, ServerError> {
        match env::var(WORKER_ENV) {
            Ok(raw) => Self::parse(&raw).map(Some),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(ServerError::Config(format!("unreadable {WORKER_ENV}: {err}"))),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeouts_enabled: self.timeouts_enabled,
            gamelog_url_base: self.gamelog_url_base.clone(),
            visualizer_url: self.visualizer_url.clone(),
            ..SessionConfig::default()
        }
    }
}

/// Runs one whole session. Returns the terminal report and the process exit
/// code the parent expects: 0 with a gamelog, 1 with an error.
pub async fn run_worker(
    data: WorkerSessionData,
    registry: &GameRegistry,
    listener: TcpListener,
    mut control: mpsc::Receiver<WorkerMessage>,
    config: SessionConfig,
) -> (WorkerReport, i32) {
    match run_session(data, registry, listener, &mut control, config).await {
        Ok(ended) => (
            WorkerReport {
                error: None,
                gamelog: Some(ended.gamelog),
                client_infos: Some(ended.client_infos),
            },
            0,
        ),
        Err(err) => (
            WorkerReport {
                error: Some(err.to_string()),
                ..WorkerReport::default()
            },
            1,
        ),
    }
}

async fn run_session(
    data: WorkerSessionData,
    registry: &GameRegistry,
    listener: TcpListener,
    control: &mut mpsc::Receiver<WorkerMessage>,
    config: SessionConfig,
) -> SessionResult {
    let namespace = registry.lookup(&data.game_name).ok_or_else(|| {
        ServerError::Config(format!("unknown game '{}'", data.game_name))
    })?;

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let mut clients = Vec::new();
    loop {
        match control.recv().await {
            Some(WorkerMessage::Client { client_info }) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                info!(
                    "session {}: accepted client '{}' from {addr}",
                    data.session_id, client_info.name
                );
                let pending = PendingClient::from(client_info);
                let slot = clients.len();
                clients.push(attach(stream, slot, pending, inbound_tx.clone()));
            }
            Some(WorkerMessage::Done) => break,
            None => {
                return Err(ServerError::Fatal(
                    "control channel closed before the roster was complete".into(),
                ))
            }
        }
    }
    // The roster is complete; no further connections are expected.
    drop(listener);

    let settings = GameSettingsManager::new(&namespace.settings, &data.game_settings);
    let (session, kill) = Session::new(SessionParams {
        session_id: data.session_id,
        namespace,
        settings,
        clients,
        inbound: inbound_rx,
        config,
    })?;

    let signal_kill = kill.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_kill.kill("worker interrupted by signal");
        }
    });

    session.run().await
}
