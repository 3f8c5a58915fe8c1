use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const OUTBOUND_QUEUE: usize = 32;
const INBOUND_QUEUE: usize = 256;

/// One transport message. Each frame keeps its own message boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Outbound: request a normal closure with the given reason.
    /// Inbound: the remote end closed the connection.
    Close(Option<String>),
}

/// An open, message-oriented connection split into its two directions.
///
/// Sending into `outbound` fails once the connection is gone; `inbound` yields
/// `Frame::Close` or ends when the remote side goes away.
pub struct FrameLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
    pub tasks: LinkTasks,
}

impl FrameLink {
    pub fn new(outbound: mpsc::Sender<Frame>, inbound: mpsc::Receiver<Frame>) -> Self {
        Self {
            outbound,
            inbound,
            tasks: LinkTasks::default(),
        }
    }
}

/// Background I/O tasks owned by a [`FrameLink`].
#[derive(Default)]
pub struct LinkTasks {
    handles: Vec<JoinHandle<()>>,
}

impl LinkTasks {
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn abort_all(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Waits up to `grace` for each task to finish on its own, then aborts it.
    pub async fn shutdown(self, grace: Duration) {
        for mut handle in self.handles {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                debug!("Transport task did not finish within {:?}, aborting", grace);
                handle.abort();
            }
        }
    }
}

/// Opens connections to relay endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameLink, String>;
}

/// [`Connector`] over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<FrameLink, String> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| e.to_string())?;
        info!("🌐 WebSocket open to {}", url);

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(INBOUND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let (message, closing) = match frame {
                    Frame::Text(text) => (Message::Text(text), false),
                    Frame::Binary(data) => (Message::Binary(data), false),
                    Frame::Close(reason) => (
                        Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: reason.unwrap_or_default().into(),
                        })),
                        true,
                    ),
                };

                if let Err(e) = sink.send(message).await {
                    warn!("⚠️ WebSocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        let reader = tokio::spawn(async move {
            let mut close_reason = None;
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => Frame::Text(text),
                    Ok(Message::Binary(data)) => Frame::Binary(data),
                    Ok(Message::Close(frame)) => {
                        close_reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("⚠️ WebSocket receive failed: {}", e);
                        break;
                    }
                };

                if in_tx.send(frame).await.is_err() {
                    debug!("Inbound consumer gone, WebSocket reader stopping");
                    return;
                }
            }
            let _ = in_tx.send(Frame::Close(close_reason)).await;
            debug!("WebSocket reader stopped");
        });

        let mut link = FrameLink::new(out_tx, in_rx);
        link.tasks.push(writer);
        link.tasks.push(reader);
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_tasks_abort_stuck_task() {
        let mut tasks = LinkTasks::default();
        tasks.push(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        tasks.push(tokio::spawn(async {}));

        let started = std::time::Instant::now();
        tasks.shutdown(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_websocket_connect_refused() {
        let result = WebSocketConnector.connect("ws://127.0.0.1:9/player").await;
        assert!(result.is_err());
    }
}
