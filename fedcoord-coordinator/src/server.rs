//! UDP JSON command server.
//!
//! The transport for the API facade: one datagram carries one JSON
//! [`ApiRequest`], the reply datagram carries one JSON [`ApiResponse`].
//! The server owns no coordinator state; it forwards each operation to the
//! engine task and relays the reply. Request logging records the operation
//! and client id only, never token material.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResponse};
use crate::tasks::{EngineMessage, Task, TaskHandle};

/// Largest accepted request datagram.
const MAX_DATAGRAM: usize = 256 * 1024;

/// How long a forwarded operation may wait on the engine before the caller
/// gets `internal_error`. The engine still finishes the command either way.
const ENGINE_TIMEOUT: Duration = Duration::from_secs(30);

/// The command server task.
pub struct ApiServer {
    socket: UdpSocket,
    engine: TaskHandle<EngineMessage>,
}

impl ApiServer {
    /// Binds the server socket.
    pub async fn bind(addr: SocketAddr, engine: TaskHandle<EngineMessage>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "command server listening");
        Ok(Self { socket, engine })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves requests until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("command server shutting down");
                        break;
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => self.handle_datagram(&buf[..len], peer).await,
                        Err(e) => {
                            warn!(error = %e, "datagram receive failed");
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        let request: ApiRequest = match serde_json::from_slice(data) {
            Ok(request) => request,
            Err(e) => {
                debug!(%peer, error = %e, "unparseable request");
                self.reply(
                    peer,
                    &ApiResponse::error("malformed_request", format!("invalid request: {e}")),
                )
                .await;
                return;
            }
        };

        debug!(%peer, op = request.op(), client = request.client_id(), "request");

        let (tx, rx) = oneshot::channel();
        if self
            .engine
            .send(EngineMessage::Api {
                request,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            self.reply(
                peer,
                &ApiResponse::error("internal_error", "coordinator is shutting down"),
            )
            .await;
            return;
        }

        let response = match tokio::time::timeout(ENGINE_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) | Err(_) => {
                ApiResponse::error("internal_error", "operation did not complete in time")
            }
        };

        self.reply(peer, &response).await;
    }

    async fn reply(&self, peer: SocketAddr, response: &ApiResponse) {
        let data = match serde_json::to_vec(response) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "response serialization failed");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&data, peer).await {
            warn!(%peer, error = %e, "response send failed");
        }
    }
}
