//! Socket plumbing for one connected client.
//!
//! [`attach`] splits a stream into a reader task and a writer task. The
//! reader un-frames and parses events onto the session's inbound channel,
//! tagged with the client's roster slot; the writer drains an outbound
//! channel of server events onto the socket. Dropping the outbound sender is
//! how the session closes a connection: queued events are flushed first.

use std::sync::Arc;

use log::warn;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use shared::{frame, ClientEvent, FrameDecoder, ServerEvent, WorkerClientInfo};

use crate::ai_manager::ClientFlags;

/// What is known about a client before the session exists.
#[derive(Debug, Clone)]
pub struct PendingClient {
    pub name: String,
    /// The seat this client asked for, if any.
    pub index: Option<usize>,
    pub client_type: String,
    pub spectating: bool,
    /// Whether this client wants deltas wrapped with their triggering event.
    pub meta_deltas: bool,
}

impl From<WorkerClientInfo> for PendingClient {
    fn from(info: WorkerClientInfo) -> Self {
        Self {
            name: info.name,
            index: info.index,
            client_type: info.client_type,
            spectating: info.spectating,
            meta_deltas: info.meta_deltas,
        }
    }
}

/// One message from a client socket to the session.
#[derive(Debug)]
pub enum ClientIncoming {
    Event(ClientEvent),
    /// The socket closed or sent something unparsable.
    Disconnected,
}

/// A client with its socket tasks running.
pub struct AttachedClient {
    pub pending: PendingClient,
    pub outbound: mpsc::UnboundedSender<ServerEvent>,
    pub flags: Arc<ClientFlags>,
}

/// Spawns the reader and writer tasks for one client stream.
pub fn attach<S>(
    stream: S,
    slot: usize,
    pending: PendingClient,
    inbound: mpsc::UnboundedSender<(usize, ClientIncoming)>,
) -> AttachedClient
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let flags = Arc::new(ClientFlags::default());
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        'read: loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if let Err(err) = decoder.extend(&buf[..n]) {
                warn!("client {slot} overflowed the frame buffer: {err}");
                break;
            }
            while let Some(bytes) = decoder.next_frame() {
                match serde_json::from_slice::<ClientEvent>(&bytes) {
                    Ok(event) => {
                        if inbound.send((slot, ClientIncoming::Event(event))).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("client {slot} sent an unparsable message: {err}");
                        break 'read;
                    }
                }
            }
        }
        let _ = inbound.send((slot, ClientIncoming::Disconnected));
    });

    tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            match frame(&event) {
                Ok(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!("could not frame event for client {slot}: {err}"),
            }
        }
        let _ = writer.shutdown().await;
    });

    AttachedClient {
        pending,
        outbound: outbound_tx,
        flags,
    }
}
