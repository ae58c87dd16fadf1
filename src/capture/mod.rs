use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

pub mod datalink;

/// Kind of header the captured frames start with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LinkLayer {
    /// Ethernet II frames, as read from a layer-2 channel.
    #[default]
    Ethernet,
    /// IP datagrams without link-layer header, as read from a layer-3 channel.
    Ip,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// Frames alias the capture buffer and are only valid until the next read.
    #[default]
    ZeroCopy,
    /// Every frame is copied into its own allocation.
    Copy,
}

/// A lazy, potentially infinite sequence of raw frames.
pub trait FrameSource {
    /// Blocks until the next frame is available.
    ///
    /// A borrowed frame stays valid until the next call; callers must extract
    /// everything they need before reading again.
    /// [`CaptureError::Interrupted`] only means that no frame was read and the call can be
    /// repeated; other errors are not recoverable, the device cannot be reopened.
    fn read(&mut self) -> Result<Cow<'_, [u8]>, CaptureError>;
}
