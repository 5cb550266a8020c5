//! Test helpers for integration tests
//!
//! Mock servers bound to ephemeral ports and small async helpers for
//! driving gateway sockets and waiting on shard events.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use axum::Router;
use chat_gateway::protocol::{GatewayMessage, OpCode};
use chat_gateway::{Event, ShardEvent};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Upper bound for any single wait in a test
pub const WAIT: Duration = Duration::from_secs(5);

/// Axum app served on an ephemeral local port
pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(app: Router) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { addr, handle })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Gateway server handing every accepted socket to the test
pub struct MockGateway {
    server: TestServer,
    connections: mpsc::UnboundedReceiver<WebSocket>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        let (tx, connections) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/",
            get(move |ws: WebSocketUpgrade| {
                let tx = tx.clone();
                async move {
                    ws.on_upgrade(move |socket| async move {
                        let _ = tx.send(socket);
                    })
                }
            }),
        );

        Ok(Self {
            server: TestServer::start(app).await?,
            connections,
        })
    }

    pub fn url(&self) -> String {
        self.server.ws_url()
    }

    /// Wait for the client to open the next connection
    pub async fn accept(&mut self) -> Result<GatewaySocket> {
        let socket = tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .context("no gateway connection within timeout")?
            .context("gateway server stopped")?;
        Ok(GatewaySocket { socket })
    }

    /// `true` when no connection arrives within `window`
    pub async fn stays_idle(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.connections.recv())
            .await
            .is_err()
    }
}

/// Server side of one gateway connection
pub struct GatewaySocket {
    socket: WebSocket,
}

impl GatewaySocket {
    pub async fn send(&mut self, message: &GatewayMessage) -> Result<()> {
        self.socket.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    /// Next frame from the client; `None` once the client closed
    pub async fn recv(&mut self) -> Result<Option<GatewayMessage>> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.recv())
                .await
                .context("no frame from client within timeout")?;
            match message {
                Some(Ok(Message::Text(text))) => return Ok(Some(GatewayMessage::from_json(&text)?)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Next frame with `op`, skipping heartbeats and anything else
    pub async fn recv_op(&mut self, op: OpCode) -> Result<GatewayMessage> {
        loop {
            match self.recv().await? {
                Some(message) if message.op == op => return Ok(message),
                Some(_) => {}
                None => bail!("client closed before sending {op}"),
            }
        }
    }

    /// Wait for the client's close frame and return its code
    pub async fn recv_close(&mut self) -> Result<Option<u16>> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.recv())
                .await
                .context("client did not close within timeout")?;
            match message {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|frame| frame.code)),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    pub async fn close(mut self, code: u16, reason: &'static str) -> Result<()> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await?;
        Ok(())
    }
}

/// Wait until an event matching `predicate` arrives
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ShardEvent>,
    mut predicate: F,
) -> Result<ShardEvent>
where
    F: FnMut(&Event) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event.event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => bail!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(WAIT, wait)
        .await
        .context("expected event did not arrive")?
}
