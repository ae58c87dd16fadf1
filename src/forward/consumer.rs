use std::net::SocketAddr;

use tracing::info;

use crate::frames::envelope::Envelope;

/// Downstream receiver of the envelopes decoded by the collector.
///
/// The consumer is shared by all connections and invoked concurrently from their tasks.
pub trait EnvelopeConsumer: Send + Sync + 'static {
    fn on_envelope(&self, peer: SocketAddr, envelope: &Envelope<'_>);
}

/// Logs the origin of every received envelope.
#[derive(Debug, Default)]
pub struct LogSink {
    /// Number of leading payload bytes to include in hexadecimal form.
    payload_preview: usize,
}

impl LogSink {
    pub fn new(payload_preview: usize) -> Self {
        Self { payload_preview }
    }

    fn preview(&self, payload: &[u8]) -> Option<String> {
        if self.payload_preview == 0 {
            return None;
        }
        let shown = payload.len().min(self.payload_preview);
        Some(hex::encode(&payload[..shown]))
    }
}

impl EnvelopeConsumer for LogSink {
    fn on_envelope(&self, peer: SocketAddr, envelope: &Envelope<'_>) {
        match self.preview(&envelope.payload) {
            Some(preview) => info!(
                %peer,
                source = %envelope.source_address,
                bytes = envelope.payload.len(),
                %preview,
                "frame received"
            ),
            None => info!(
                %peer,
                source = %envelope.source_address,
                bytes = envelope.payload.len(),
                "frame received"
            ),
        }
    }
}
