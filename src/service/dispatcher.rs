use crate::{
    network::{decode_text, Envelope, Frame, Inbound, LegacySignal},
    service::{
        events::SessionEvent,
        handshake::HandshakeOutcome,
        session::Shared,
    },
    utils::{format_file_size, sanitize_filename},
    Result,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receiver side of a file transfer: bytes buffered between
/// `file_send_begin` and `file_send_complete`.
#[derive(Debug)]
pub struct InboundTransfer {
    pub sender_id: Option<String>,
    pub file_name: String,
    pub expected_size: Option<u64>,
    pub buffer: Vec<u8>,
}

impl InboundTransfer {
    fn new(sender_id: Option<String>, file_name: String, expected_size: Option<u64>) -> Self {
        let capacity = expected_size.unwrap_or(0).min(64 * 1024 * 1024) as usize;
        Self {
            sender_id,
            file_name,
            expected_size,
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.buffer.len() as u64
    }
}

/// Interprets inbound frames, one at a time, in arrival order.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    inbound: Option<InboundTransfer>,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            inbound: None,
        }
    }

    #[cfg(test)]
    pub fn inbound(&self) -> Option<&InboundTransfer> {
        self.inbound.as_ref()
    }

    pub async fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Text(text) => self.handle_text(&text).await,
            Frame::Binary(data) => self.handle_binary(data),
            Frame::Close(_) => {}
        }
    }

    async fn handle_text(&mut self, text: &str) {
        debug!("⬇️ Received TEXT: {}", text);

        match decode_text(text) {
            Ok(Inbound::Envelope(envelope)) => self.handle_envelope(envelope).await,
            Ok(Inbound::Unknown(kind)) => info!("ℹ️ Unhandled message type: {}", kind),
            Ok(Inbound::Legacy(signal)) => self.handle_legacy(signal),
            Err(e) => warn!("⚠️ Skipping message: {}", e),
        }
    }

    fn handle_legacy(&self, signal: LegacySignal) {
        let outcome = match signal {
            LegacySignal::Ready => HandshakeOutcome::Ready,
            LegacySignal::Failed(reason) => HandshakeOutcome::Failed(reason),
        };
        if !self.shared.handshake.resolve(outcome) {
            debug!("Legacy signal received with no pending send");
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let shared = &self.shared;

        match envelope {
            Envelope::ConnectionInfo { message } => {
                info!("🔗 Connected through instance: {}", message);
                shared.set_instance_name(Some(message.clone()));
                shared.events.publish(SessionEvent::InstanceInfo(Some(message)));
            }

            Envelope::UserListUpdate { users } => {
                let count = shared.roster.replace(&users, &shared.participant_id);
                info!("📋 User list updated, {} users available", count);
                shared.events.publish(SessionEvent::RosterChanged);
            }

            Envelope::ConnectAccepted { with_user_id } => {
                info!("✅ Connection accepted by {}", with_user_id);
                shared.peer_link.accept(&with_user_id);
                shared.events.publish(SessionEvent::ConnectionStatusChanged {
                    peer_id: Some(with_user_id),
                    accepted: true,
                });
            }

            Envelope::ConnectRejected { with_user_id } => {
                info!("❌ Connection rejected by {}", with_user_id);
                shared.peer_link.reject(&with_user_id);
                shared.events.publish(SessionEvent::ConnectionStatusChanged {
                    peer_id: Some(with_user_id),
                    accepted: false,
                });
            }

            Envelope::Disconnected { user_id } => {
                info!("⛔️ Disconnected from {}", user_id);
                if shared.peer_link.remote_disconnected(&user_id) {
                    shared.events.publish(SessionEvent::ConnectionStatusChanged {
                        peer_id: Some(user_id),
                        accepted: false,
                    });
                }
            }

            Envelope::FileSendBegin {
                from_user_id,
                file_name,
                file_size,
                ..
            } => {
                if shared.handshake.resolve(HandshakeOutcome::Ready) {
                    debug!("file_send_begin resolved the pending send handshake");
                }
                if let Some(previous) = self.inbound.take() {
                    warn!(
                        "⚠️ Discarding unfinished transfer '{}' ({} received)",
                        previous.file_name,
                        format_file_size(previous.bytes_received())
                    );
                }
                info!(
                    "⬇️ Receiving file '{}' from {}",
                    file_name,
                    from_user_id.as_deref().unwrap_or("unknown sender")
                );
                self.inbound = Some(InboundTransfer::new(from_user_id, file_name, file_size));
            }

            Envelope::FileSendComplete { .. } => match self.inbound.take() {
                Some(transfer) => {
                    if let Err(e) = self.store(transfer).await {
                        error!("❌ Failed to store received file: {}", e);
                    }
                }
                None => debug!("file_send_complete with no open transfer, ignoring"),
            },

            other @ (Envelope::SessionAuth { .. }
            | Envelope::Connect { .. }
            | Envelope::Disconnect) => {
                info!("ℹ️ Ignoring client-bound '{}' message from relay", other.kind());
            }
        }
    }

    fn handle_binary(&mut self, data: Vec<u8>) {
        match self.inbound.as_mut() {
            Some(transfer) => transfer.buffer.extend_from_slice(&data),
            None => debug!("Dropping {} binary bytes, no open transfer", data.len()),
        }
    }

    async fn store(&self, transfer: InboundTransfer) -> Result<PathBuf> {
        let dir = self.shared.settings.download_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(sanitize_filename(&transfer.file_name));
        let bytes = transfer.bytes_received();
        if let Some(expected) = transfer.expected_size {
            if expected != bytes {
                warn!(
                    "⚠️ '{}' declared {} bytes but {} arrived",
                    transfer.file_name, expected, bytes
                );
            }
        }

        tokio::fs::write(&path, &transfer.buffer).await?;
        info!(
            "✅ File received from {}, saved as {:?} ({})",
            transfer.sender_id.as_deref().unwrap_or("unknown sender"),
            path,
            format_file_size(bytes)
        );

        self.shared.events.publish(SessionEvent::FileReceived {
            from: transfer.sender_id,
            path: path.clone(),
            bytes,
        });
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Settings, service::events::EventReceiver, utils::ParticipantId};

    fn dispatcher(download_dir: Option<PathBuf>) -> (Dispatcher, Arc<Shared>, EventReceiver) {
        let mut settings = Settings::default();
        settings.transfer.download_dir = download_dir;
        let shared = Arc::new(Shared::new(settings, ParticipantId::from("me")));
        let events = shared.events.subscribe();
        (Dispatcher::new(shared.clone()), shared, events)
    }

    fn text(json: &str) -> Frame {
        Frame::Text(json.to_string())
    }

    #[tokio::test]
    async fn test_connection_info_records_instance() {
        let (mut dispatcher, shared, mut events) = dispatcher(None);
        dispatcher
            .handle_frame(text(r#"{"type":"connection_info","message":"relay-2"}"#))
            .await;

        assert_eq!(shared.instance_name().as_deref(), Some("relay-2"));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::InstanceInfo(Some("relay-2".to_string()))
        );
    }

    #[tokio::test]
    async fn test_empty_user_list_still_raises_event() {
        let (mut dispatcher, shared, mut events) = dispatcher(None);
        dispatcher
            .handle_frame(text(r#"{"type":"user_list_update","users":[{"userId":"a"}]}"#))
            .await;
        dispatcher
            .handle_frame(text(r#"{"type":"user_list_update","users":[]}"#))
            .await;

        assert!(shared.roster.is_empty());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::RosterChanged);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::RosterChanged);
    }

    #[tokio::test]
    async fn test_disconnected_only_clears_matching_peer() {
        let (mut dispatcher, shared, mut events) = dispatcher(None);
        dispatcher
            .handle_frame(text(r#"{"type":"connect_accepted","withUserId":"a"}"#))
            .await;
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ConnectionStatusChanged {
                peer_id: Some("a".to_string()),
                accepted: true
            }
        );

        dispatcher
            .handle_frame(text(r#"{"type":"disconnected","userId":"b"}"#))
            .await;
        assert!(shared.peer_link.get().is_linked());
        assert!(events.try_recv().is_err());

        dispatcher
            .handle_frame(text(r#"{"type":"disconnected","userId":"a"}"#))
            .await;
        assert_eq!(shared.peer_link.get().peer_id(), None);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ConnectionStatusChanged {
                peer_id: Some("a".to_string()),
                accepted: false
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_skipped() {
        let (mut dispatcher, shared, mut events) = dispatcher(None);
        dispatcher.handle_frame(text(r#"{"type":"connect_accepted"}"#)).await;
        dispatcher.handle_frame(text(r#"{"type":"chat","payload":"hi"}"#)).await;
        dispatcher.handle_frame(text("not json")).await;

        assert_eq!(shared.peer_link.get().peer_id(), None);
        assert!(events.try_recv().is_err());

        dispatcher
            .handle_frame(text(r#"{"type":"connection_info","message":"still alive"}"#))
            .await;
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_binary_without_open_transfer_is_dropped() {
        let (mut dispatcher, _shared, _events) = dispatcher(None);
        dispatcher.handle_frame(Frame::Binary(vec![1, 2, 3])).await;
        assert!(dispatcher.inbound().is_none());

        dispatcher
            .handle_frame(text(r#"{"type":"file_send_complete","fileName":"x"}"#))
            .await;
        assert!(dispatcher.inbound().is_none());
    }

    #[tokio::test]
    async fn test_inbound_transfer_reconstructs_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (mut dispatcher, _shared, mut events) = dispatcher(Some(dir.path().to_path_buf()));
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        dispatcher
            .handle_frame(text(
                r#"{"type":"file_send_begin","fromUserId":"alice","fileName":"../photo.png","fileSize":100000}"#,
            ))
            .await;
        for chunk in payload.chunks(32 * 1024) {
            dispatcher.handle_frame(Frame::Binary(chunk.to_vec())).await;
        }
        assert_eq!(dispatcher.inbound().unwrap().bytes_received(), 100_000);

        dispatcher
            .handle_frame(text(r#"{"type":"file_send_complete","fileName":"photo.png"}"#))
            .await;
        assert!(dispatcher.inbound().is_none());

        let path = dir.path().join("photo.png");
        assert_eq!(std::fs::read(&path).unwrap(), payload);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::FileReceived {
                from: Some("alice".to_string()),
                path,
                bytes: 100_000
            }
        );
    }

    #[tokio::test]
    async fn test_legacy_signals_resolve_handshake() {
        let (mut dispatcher, shared, _events) = dispatcher(None);

        let (guard, rx) = shared.handshake.arm().unwrap();
        dispatcher.handle_frame(text("file_receive_ready")).await;
        assert_eq!(rx.await.unwrap(), HandshakeOutcome::Ready);
        drop(guard);

        let (_guard, rx) = shared.handshake.arm().unwrap();
        dispatcher.handle_frame(text("FILE_FAILED quota")).await;
        assert_eq!(
            rx.await.unwrap(),
            HandshakeOutcome::Failed("FILE_FAILED quota".to_string())
        );
    }

    #[tokio::test]
    async fn test_file_send_begin_resolves_pending_send() {
        let (mut dispatcher, shared, _events) = dispatcher(None);
        let (_guard, rx) = shared.handshake.arm().unwrap();

        dispatcher
            .handle_frame(text(r#"{"type":"file_send_begin","fromUserId":"me","fileName":"loop.txt"}"#))
            .await;

        assert_eq!(rx.await.unwrap(), HandshakeOutcome::Ready);
        assert_eq!(dispatcher.inbound().unwrap().file_name, "loop.txt");
    }
}
