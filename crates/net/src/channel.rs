//! Delivery classes and stream framing over QUIC.
//!
//! Reliable packets travel on one long-lived unidirectional stream per
//! connection, each prefixed with its length, so they arrive in send order.
//! Unreliable packets are sent as QUIC datagrams.

use crate::protocol::MAX_PACKET_LEN;
use anyhow::{Context, Result};
use quinn::{ReadExactError, RecvStream, SendStream};
use tracing::trace;

/// Delivery guarantee requested for an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Ordered and retransmitted until acknowledged.
    Reliable,
    /// Best effort, may be dropped or reordered.
    Unreliable,
}

impl Delivery {
    /// Check if this delivery class is reliable.
    pub fn is_reliable(&self) -> bool {
        matches!(self, Delivery::Reliable)
    }
}

/// Write one length-prefixed frame to a reliable stream.
///
/// Frame format: [length: u32 LE][data: bytes]
pub async fn write_frame(stream: &mut SendStream, data: &[u8]) -> Result<()> {
    if data.len() > MAX_PACKET_LEN {
        return Err(anyhow::anyhow!(
            "Frame too large: {} bytes (maximum {})",
            data.len(),
            MAX_PACKET_LEN
        ));
    }

    let len = data.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .await
        .context("Failed to write length prefix")?;
    stream
        .write_all(data)
        .await
        .context("Failed to write frame data")?;

    trace!("Sent {} bytes on reliable stream", data.len());
    Ok(())
}

/// Read the next frame from a reliable stream.
///
/// Returns `None` once the peer finished the stream cleanly.
pub async fn read_frame(stream: &mut RecvStream) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(()) => {}
        Err(ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(err) => return Err(err).context("Failed to read length prefix"),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_PACKET_LEN {
        return Err(anyhow::anyhow!(
            "Frame too large: {} bytes (maximum {})",
            len,
            MAX_PACKET_LEN
        ));
    }

    let mut data = vec![0u8; len];
    stream
        .read_exact(&mut data)
        .await
        .context("Failed to read frame data")?;

    trace!("Received {} bytes on reliable stream", data.len());
    Ok(Some(data))
}
