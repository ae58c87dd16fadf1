use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ForwardError;
use crate::forward::backoff::{Backoff, ReconnectConfig};
use crate::forward::transport::{Connector, FrameSink};

/// Observable state of the connection to the collector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Streaming,
}

enum Link<S> {
    Disconnected,
    Connecting,
    Streaming(S),
}

/// Counters of the forwarding activity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub sent: u64,
    pub dropped: u64,
    pub connections: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    connections: AtomicU64,
}

/// Read access to the counters of a client, from any task.
#[derive(Clone, Debug, Default)]
pub struct StatsHandle(Arc<Counters>);

impl StatsHandle {
    pub fn snapshot(&self) -> ForwardStats {
        ForwardStats {
            sent: self.0.sent.load(Ordering::Relaxed),
            dropped: self.0.dropped.load(Ordering::Relaxed),
            connections: self.0.connections.load(Ordering::Relaxed),
        }
    }
}

/// Owns the persistent connection to the collector and transparently re-establishes it.
///
/// A frame whose transmission fails is dropped: the connection is torn down and a new
/// one is opened on the next call to [`ForwardingClient::send`].
pub struct ForwardingClient<C: Connector> {
    connector: C,
    backoff: Backoff,
    link: Link<C::Link>,
    stats: StatsHandle,
}

impl<C: Connector> ForwardingClient<C> {
    pub fn new(connector: C, reconnect: &ReconnectConfig) -> Self {
        Self {
            connector,
            backoff: Backoff::new(reconnect),
            link: Link::Disconnected,
            stats: StatsHandle::default(),
        }
    }

    pub fn state(&self) -> ClientState {
        match self.link {
            Link::Disconnected => ClientState::Disconnected,
            Link::Connecting => ClientState::Connecting,
            Link::Streaming(_) => ClientState::Streaming,
        }
    }

    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Sends one encoded envelope, connecting first if needed.
    ///
    /// The link is detached while the frame is written, so a send cancelled halfway
    /// leaves the client disconnected rather than on a stream with broken framing.
    pub async fn send(&mut self, frame: &[u8]) -> Result<(), ForwardError> {
        let mut sink = match mem::replace(&mut self.link, Link::Disconnected) {
            Link::Streaming(sink) => sink,
            Link::Disconnected | Link::Connecting => {
                self.link = Link::Connecting;
                let sink = self.connect().await;
                self.link = Link::Disconnected;
                sink
            }
        };

        match sink.send_frame(frame).await {
            Ok(()) => {
                self.link = Link::Streaming(sink);
                self.stats.0.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(source) => {
                self.stats.0.dropped.fetch_add(1, Ordering::Relaxed);
                let err = ForwardError::Send {
                    remote: self.connector.remote().to_string(),
                    source,
                };
                warn!(error = %err, "connection lost, frame dropped");
                Err(err)
            }
        }
    }

    async fn connect(&mut self) -> C::Link {
        loop {
            debug!(
                remote = self.connector.remote(),
                attempt = self.backoff.attempt(),
                "connecting"
            );
            match self.connector.connect().await {
                Ok(sink) => {
                    self.backoff.reset();
                    self.stats.0.connections.fetch_add(1, Ordering::Relaxed);
                    info!(remote = self.connector.remote(), "connected to collector");
                    return sink;
                }
                Err(source) => {
                    let delay = self.backoff.next_delay();
                    let err = ForwardError::Connect {
                        remote: self.connector.remote().to_string(),
                        source,
                    };
                    warn!(error = %err, retry_in = ?delay, "cannot reach collector");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::forward::backoff::ReconnectConfig;
    use crate::forward::client::{ClientState, ForwardStats, ForwardingClient};
    use crate::forward::transport::{Connector, FrameSink};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Scripted outcome of an operation on a mock link.
    #[derive(Copy, Clone, Debug)]
    pub(crate) enum Outcome {
        Ok,
        Fail,
    }

    /// In-memory collector reachable through [`MockConnector`].
    #[derive(Default)]
    pub(crate) struct MockCollector {
        /// Outcomes of the next connection attempts; empty means success.
        pub(crate) connects: VecDeque<Outcome>,
        /// Outcomes of the next writes; empty means success.
        pub(crate) writes: VecDeque<Outcome>,
        pub(crate) connect_attempts: usize,
        pub(crate) received: Vec<Vec<u8>>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockConnector(pub(crate) Arc<Mutex<MockCollector>>);

    pub(crate) struct MockLink(Arc<Mutex<MockCollector>>);

    #[async_trait]
    impl Connector for MockConnector {
        type Link = MockLink;

        async fn connect(&self) -> io::Result<MockLink> {
            let mut collector = self.0.lock().unwrap();
            collector.connect_attempts += 1;
            match collector.connects.pop_front().unwrap_or(Outcome::Ok) {
                Outcome::Ok => Ok(MockLink(self.0.clone())),
                Outcome::Fail => Err(io::ErrorKind::ConnectionRefused.into()),
            }
        }

        fn remote(&self) -> &str {
            "mock:7777"
        }
    }

    #[async_trait]
    impl FrameSink for MockLink {
        async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            let mut collector = self.0.lock().unwrap();
            match collector.writes.pop_front().unwrap_or(Outcome::Ok) {
                Outcome::Ok => {
                    collector.received.push(frame.to_vec());
                    Ok(())
                }
                Outcome::Fail => Err(io::ErrorKind::BrokenPipe.into()),
            }
        }
    }

    pub(crate) fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            base_delay_ms: 1,
            max_delay_ms: 4,
            connect_timeout_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_connects_lazily_on_first_send() {
        let connector = MockConnector::default();
        let mut client = ForwardingClient::new(connector.clone(), &fast_reconnect());
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(connector.0.lock().unwrap().connect_attempts, 0);

        client.send(b"one").await.unwrap();
        assert_eq!(client.state(), ClientState::Streaming);
        client.send(b"two").await.unwrap();

        let collector = connector.0.lock().unwrap();
        assert_eq!(collector.connect_attempts, 1);
        assert_eq!(collector.received, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_send_failure_drops_frame_and_reconnects() {
        let connector = MockConnector::default();
        let mut client = ForwardingClient::new(connector.clone(), &fast_reconnect());

        client.send(b"before").await.unwrap();
        connector.0.lock().unwrap().writes.push_back(Outcome::Fail);
        assert!(client.send(b"in-flight").await.is_err());
        assert_eq!(client.state(), ClientState::Disconnected);

        // collector unreachable for a while, then back
        connector
            .0
            .lock()
            .unwrap()
            .connects
            .extend([Outcome::Fail, Outcome::Fail, Outcome::Fail]);
        client.send(b"after").await.unwrap();
        assert_eq!(client.state(), ClientState::Streaming);

        let collector = connector.0.lock().unwrap();
        assert_eq!(collector.connect_attempts, 5);
        assert_eq!(
            collector.received,
            vec![b"before".to_vec(), b"after".to_vec()]
        );
        assert_eq!(
            client.stats_handle().snapshot(),
            ForwardStats {
                sent: 2,
                dropped: 1,
                connections: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_retries_initial_connection() {
        let connector = MockConnector::default();
        connector
            .0
            .lock()
            .unwrap()
            .connects
            .extend([Outcome::Fail, Outcome::Fail]);
        let mut client = ForwardingClient::new(connector.clone(), &fast_reconnect());

        client.send(b"first").await.unwrap();
        assert_eq!(connector.0.lock().unwrap().connect_attempts, 3);
        assert_eq!(client.backoff.attempt(), 0);
    }

    #[tokio::test]
    async fn test_stats_handle_follows_client() {
        let connector = MockConnector::default();
        let mut client = ForwardingClient::new(connector, &fast_reconnect());
        let handle = client.stats_handle();
        assert_eq!(handle.snapshot(), ForwardStats::default());

        client.send(b"one").await.unwrap();
        assert_eq!(handle.snapshot().sent, 1);
        assert_eq!(handle.snapshot().connections, 1);
    }

    #[tokio::test]
    async fn test_cancelled_connect_resumes_on_next_send() {
        let connector = MockConnector::default();
        connector
            .0
            .lock()
            .unwrap()
            .connects
            .extend([Outcome::Fail; 10_000]);
        let mut client = ForwardingClient::new(connector.clone(), &fast_reconnect());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), client.send(b"lost")).await;
        assert!(cancelled.is_err());
        assert_eq!(client.state(), ClientState::Connecting);

        connector.0.lock().unwrap().connects.clear();
        client.send(b"kept").await.unwrap();
        assert_eq!(client.state(), ClientState::Streaming);
        assert_eq!(connector.0.lock().unwrap().received, vec![b"kept".to_vec()]);
    }
}
