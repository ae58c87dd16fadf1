use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{Error, FramingError};
use crate::forward::consumer::EnvelopeConsumer;
use crate::forward::transport::FrameReader;
use crate::frames::envelope::{Envelope, MAX_ENVELOPE_LEN};

/// Pause after a failed accept, so that a persistent failure (e.g. exhausted file
/// descriptors) does not turn into a busy loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts agent connections and hands every decoded envelope to the consumer.
pub struct Collector {
    listener: TcpListener,
    consumer: Arc<dyn EnvelopeConsumer>,
}

/// What happened on a connection, reported when it closes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub envelopes: u64,
    pub malformed: u64,
}

impl Collector {
    pub async fn bind(address: &str, consumer: Arc<dyn EnvelopeConsumer>) -> Result<Self, Error> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| Error::Listen {
                address: address.to_string(),
                source,
            })?;
        Ok(Self { listener, consumer })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until the task is dropped; each one is handled by its own task.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "agent connected");
                    let consumer = self.consumer.clone();
                    tokio::spawn(async move {
                        let summary = receive(stream, peer, consumer.as_ref()).await;
                        info!(
                            %peer,
                            envelopes = summary.envelopes,
                            malformed = summary.malformed,
                            "agent disconnected"
                        );
                    });
                }
                Err(e) => {
                    warn!(error = %e, "cannot accept connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Decodes the envelopes arriving on one connection until it closes or loses framing.
///
/// Malformed envelopes are skipped: framing is explicit, so the next frame is still aligned.
pub async fn receive<R: AsyncRead + Unpin>(
    stream: R,
    peer: SocketAddr,
    consumer: &dyn EnvelopeConsumer,
) -> ConnectionSummary {
    let mut reader = FrameReader::new(stream, MAX_ENVELOPE_LEN);
    let mut summary = ConnectionSummary::default();
    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(%peer, "connection closed by agent");
                return summary;
            }
            Err(FramingError::Io(e)) => {
                warn!(%peer, error = %e, "connection failed");
                return summary;
            }
            Err(e @ FramingError::TooLarge { .. }) => {
                warn!(%peer, error = %e, "framing lost, closing connection");
                return summary;
            }
        };

        match Envelope::decode(frame) {
            Ok(envelope) => {
                summary.envelopes += 1;
                consumer.on_envelope(peer, &envelope);
            }
            Err(e) => {
                summary.malformed += 1;
                warn!(%peer, error = %e, "envelope skipped");
            }
        }
    }
}
