use crate::{
    error::TransferError,
    network::{Envelope, Frame},
    service::{events::SessionEvent, handshake::HandshakeOutcome, session::Shared},
    utils::format_file_size,
    RelayshareError,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Summary of a completed outbound transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub target_id: String,
    pub file_name: String,
    pub bytes_sent: u64,
    pub chunks: usize,
}

/// Integer upload percentage, floored. An empty payload counts as complete.
pub fn progress_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (u128::from(sent.min(total)) * 100 / u128::from(total)) as u8
}

/// Sender side of the file transfer protocol.
pub(crate) struct TransferCoordinator {
    shared: Arc<Shared>,
}

impl TransferCoordinator {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// `file_send_begin`, wait for the receiver, stream fixed-size binary
    /// chunks with pacing, then `file_send_complete`. Nothing is retried.
    pub async fn send_file(
        &self,
        target_id: &str,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<TransferReport, TransferError> {
        let shared = &self.shared;
        if !shared.is_connected() {
            warn!("⚠️ Not connected, cannot send file");
            return Err(TransferError::NotConnected);
        }

        let (_guard, ready) = shared.handshake.arm().map_err(|e| {
            warn!("⚠️ Outbound transfer already in progress, rejecting '{}'", file_name);
            e
        })?;

        let total = bytes.len() as u64;
        info!(
            "📤 Starting file upload '{}' ({}) to {}",
            file_name,
            format_file_size(total),
            target_id
        );

        let begin = Envelope::file_send_begin(target_id, file_name, total);
        shared.send_envelope(&begin).await.map_err(to_transfer_error)?;
        debug!("📤 Sent file header, waiting for ready signal...");

        let timeout = shared.settings.ready_timeout();
        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(HandshakeOutcome::Ready)) => {}
            Ok(Ok(HandshakeOutcome::Failed(reason))) => {
                error!("❌ Receiver refused '{}': {}", file_name, reason);
                return Err(TransferError::HandshakeRejected);
            }
            Ok(Ok(HandshakeOutcome::Cancelled)) | Ok(Err(_)) => {
                warn!("⚠️ Session closed while waiting to send '{}'", file_name);
                return Err(TransferError::NotConnected);
            }
            Err(_) => {
                error!("❌ Timeout waiting for receiver to accept '{}'", file_name);
                return Err(TransferError::HandshakeTimeout);
            }
        }

        let chunk_size = shared.settings.transfer.chunk_size.max(1);
        let pacing = shared.settings.pacing_delay();
        let chunk_count = bytes.chunks(chunk_size).len();
        let mut sent = 0u64;

        for (index, chunk) in bytes.chunks(chunk_size).enumerate() {
            if !shared.is_connected() {
                error!("❌ Connection closed during upload of '{}'", file_name);
                return Err(TransferError::MidStreamDisconnect);
            }

            shared
                .send_frame(Frame::Binary(chunk.to_vec()))
                .await
                .map_err(|_| TransferError::MidStreamDisconnect)?;

            sent += chunk.len() as u64;
            shared
                .events
                .publish(SessionEvent::UploadProgress(progress_percent(sent, total)));

            if index + 1 < chunk_count && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }

        if !shared.is_connected() {
            error!("❌ Connection closed before completion message for '{}'", file_name);
            return Err(TransferError::MidStreamDisconnect);
        }
        let complete = Envelope::file_send_complete(target_id, file_name);
        shared
            .send_envelope(&complete)
            .await
            .map_err(|_| TransferError::MidStreamDisconnect)?;

        info!("✅ Successfully sent file '{}' to {}", file_name, target_id);
        Ok(TransferReport {
            target_id: target_id.to_string(),
            file_name: file_name.to_string(),
            bytes_sent: sent,
            chunks: chunk_count,
        })
    }
}

fn to_transfer_error(err: RelayshareError) -> TransferError {
    match err {
        RelayshareError::Transfer(e) => e,
        _ => TransferError::MidStreamDisconnect,
    }
}
