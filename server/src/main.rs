use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use server::worker::{run_worker, WorkerSessionData, WORKER_ENV};
use server::GameRegistry;
use shared::WorkerMessage;

/// Hosts a single game session handed down by a parent lobby process.
#[derive(Parser, Debug)]
#[command(name = "arbiter-worker")]
struct Args {
    /// Address to accept client connections on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let data = match WorkerSessionData::from_env() {
        Ok(Some(data)) => data,
        Ok(None) => {
            eprintln!(
                "{WORKER_ENV} is not set; this binary must be launched as a session worker"
            );
            return ExitCode::FAILURE;
        }
        Err(err) => {
            eprintln!("invalid {WORKER_ENV}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut registry = GameRegistry::new();
    if let Err(err) = server::games::register_builtins(&mut registry) {
        eprintln!("could not register games: {err}");
        return ExitCode::FAILURE;
    }

    let listener = match TcpListener::bind((args.host.as_str(), args.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("could not bind {}:{}: {err}", args.host, args.port);
            return ExitCode::FAILURE;
        }
    };
    if let Ok(addr) = listener.local_addr() {
        info!("worker for session {} listening on {addr}", data.session_id);
    }

    // The parent drives the roster over stdin, one JSON message per line.
    let (control_tx, control_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<WorkerMessage>(line.trim()) {
                    Ok(message) => {
                        if control_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        error!("unparsable control message: {err}");
                        break;
                    }
                },
                Ok(None) | Err(_) => break,
            }
        }
    });

    let config = data.session_config();
    let (report, code) = run_worker(data, &registry, listener, control_rx, config).await;

    match serde_json::to_string(&report) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("could not serialize the worker report: {err}");
            return ExitCode::FAILURE;
        }
    }
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
