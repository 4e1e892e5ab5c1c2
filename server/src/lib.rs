//! A turn-based game server: hosts one match per worker process, speaking an
//! EOT-delimited JSON event protocol with AI clients.
//!
//! The pipeline, bottom to top: game state lives in a delta-mergeable tree
//! that tracks minimal diffs; a scribe snapshots those diffs into the
//! gamelog after every meaningful event; per-seat AI managers order clients
//! and validate their runs under per-player time budgets; the session ties
//! clients, game and delta pipeline together and ends exactly once.

pub mod ai_manager;
pub mod client;
pub mod delta_manager;
pub mod delta_mergeable;
pub mod errors;
pub mod game;
pub mod game_manager;
pub mod game_object;
pub mod gamelog;
pub mod games;
pub mod namespace;
pub mod sanitize;
pub mod schema;
pub mod session;
pub mod settings;
pub mod worker;

pub use errors::ServerError;
pub use namespace::{GameNamespace, GameRegistry};
pub use session::{KillHandle, Session, SessionConfig, SessionEnded, SessionParams};
pub use worker::{run_worker, WorkerSessionData, WORKER_ENV};
