use tracing::trace;

use crate::capture::FrameSource;
use crate::error::CaptureError;
use crate::forward::client::ForwardingClient;
use crate::forward::transport::Connector;
use crate::frames::envelope::MAX_ENVELOPE_LEN;
use crate::frames::filter::FrameFilter;

/// Handles captured frames (reads them from the capture source and sends the matching ones
/// to the collector), one at a time and in capture order.
///
/// Returns only when the capture source fails, which is not recoverable
/// (interrupted reads are retried).
/// Transmission failures are handled by the client: the affected frame is dropped
/// and forwarding resumes with the next captured frame.
pub async fn forward<S, C>(
    source: &mut S,
    filter: &FrameFilter,
    client: &mut ForwardingClient<C>,
) -> CaptureError
where
    S: FrameSource,
    C: Connector,
{
    let mut wire = Vec::with_capacity(MAX_ENVELOPE_LEN);
    loop {
        {
            // wait until there is a captured frame
            let frame = match tokio::task::block_in_place(|| source.read()) {
                Ok(frame) => frame,
                Err(CaptureError::Interrupted) => continue,
                Err(e) => return e,
            };
            let Some(envelope) = filter.envelope(&frame) else {
                trace!(bytes = frame.len(), "frame rejected");
                continue;
            };
            // the frame may alias the capture buffer: encode before the next read
            envelope.encode_into(&mut wire);
        }

        // failures are logged and counted by the client
        let _ = client.send(&wire).await;
    }
}
