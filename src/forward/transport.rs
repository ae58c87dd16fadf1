use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::FramingError;

/// Length of the big-endian prefix announcing the size of each frame on the stream.
const LENGTH_PREFIX_LEN: usize = 4;

/// Opens outbound links to the collector.
#[async_trait]
pub trait Connector: Send + Sync {
    type Link: FrameSink;

    async fn connect(&self) -> io::Result<Self::Link>;

    /// Printable address of the remote end.
    fn remote(&self) -> &str;
}

/// Writing half of an established link; each call transmits exactly one frame.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Connects to the collector over TCP.
pub struct TcpConnector {
    remote: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(remote: String, connect_timeout: Duration) -> Self {
        Self {
            remote,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Link = TcpLink;

    async fn connect(&self) -> io::Result<TcpLink> {
        let connect = TcpStream::connect(self.remote.as_str());
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(TcpLink::new(stream))
    }

    fn remote(&self) -> &str {
        &self.remote
    }
}

/// Established TCP link, writing length-prefixed frames.
pub struct TcpLink {
    stream: TcpStream,
    write_buffer: BytesMut,
}

impl TcpLink {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            write_buffer: BytesMut::with_capacity(64 * 1024),
        }
    }
}

#[async_trait]
impl FrameSink for TcpLink {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;

        // prefix and frame go out in a single write
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(&len.to_be_bytes());
        self.write_buffer.extend_from_slice(frame);

        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await
    }
}

/// Splits a byte stream into the frames written by a [`FrameSink`].
pub struct FrameReader<R> {
    reader: R,
    max_frame_len: usize,
    read_buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_len: usize) -> Self {
        Self {
            reader,
            max_frame_len,
            read_buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly on a frame boundary.
    /// The returned slice is valid until the next call.
    pub async fn next_frame(&mut self) -> Result<Option<&[u8]>, FramingError> {
        let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
        match self.reader.read_exact(&mut len_bytes[..1]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        self.reader.read_exact(&mut len_bytes[1..]).await?;

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.max_frame_len {
            return Err(FramingError::TooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        self.read_buffer.resize(len, 0);
        self.reader.read_exact(&mut self.read_buffer[..]).await?;
        Ok(Some(&self.read_buffer[..]))
    }
}
