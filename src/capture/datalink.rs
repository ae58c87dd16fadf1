use std::borrow::Cow;
use std::io;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use pnet::datalink::{self, Channel, ChannelType, Config, DataLinkReceiver, NetworkInterface};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::{CaptureMode, FrameSource, LinkLayer};
use crate::error::CaptureError;

const ETHERTYPE_IPV4: u16 = 0x0800;

/// Frames buffered between per-interface readers and the pipeline.
const MERGE_QUEUE_DEPTH: usize = 1024;

/// Capture settings shared by all interfaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureOptions {
    pub mode: CaptureMode,
    pub link_layer: LinkLayer,
    pub promiscuous: bool,
    /// Size of the kernel receive buffer (bytes).
    pub read_buffer_size: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            mode: CaptureMode::ZeroCopy,
            link_layer: LinkLayer::Ethernet,
            promiscuous: true,
            read_buffer_size: 65_536,
        }
    }
}

/// Raw frames read from one or more network interfaces through packet sockets.
pub struct DatalinkSource {
    mode: CaptureMode,
    inner: Inner,
}

enum Inner {
    /// The only interface is read on the calling thread.
    Direct {
        interface: String,
        rx: Box<dyn DataLinkReceiver>,
    },
    /// Each interface is read on its own thread and frames are merged in arrival order.
    Merged {
        frames: Receiver<Result<Vec<u8>, CaptureError>>,
    },
}

impl DatalinkSource {
    /// Opens a capture channel on each of the named interfaces.
    pub fn open(names: &[String], options: &CaptureOptions) -> Result<Self, CaptureError> {
        let available = datalink::interfaces();
        let mut receivers = Vec::with_capacity(names.len());
        for name in names {
            let interface = available
                .iter()
                .find(|iface| &iface.name == name)
                .ok_or_else(|| CaptureError::InterfaceNotFound(name.clone()))?;
            receivers.push((name.clone(), open_channel(interface, options)?));
            info!(interface = %name, link_layer = ?options.link_layer, "capture opened");
        }
        Self::from_receivers(receivers, options.mode)
    }

    fn from_receivers(
        mut receivers: Vec<(String, Box<dyn DataLinkReceiver>)>,
        mode: CaptureMode,
    ) -> Result<Self, CaptureError> {
        let inner = match receivers.len() {
            0 => return Err(CaptureError::Closed),
            1 => {
                let (interface, rx) = receivers.remove(0);
                Inner::Direct { interface, rx }
            }
            _ => {
                if mode == CaptureMode::ZeroCopy {
                    warn!("zero-copy capture is only available on a single interface; frames will be copied");
                }
                Inner::Merged {
                    frames: spawn_readers(receivers)?,
                }
            }
        };

        Ok(Self { mode, inner })
    }
}

impl FrameSource for DatalinkSource {
    fn read(&mut self) -> Result<Cow<'_, [u8]>, CaptureError> {
        match &mut self.inner {
            Inner::Direct { interface, rx } => match rx.next() {
                Ok(frame) => match self.mode {
                    CaptureMode::ZeroCopy => Ok(Cow::Borrowed(frame)),
                    CaptureMode::Copy => Ok(Cow::Owned(frame.to_vec())),
                },
                // a borrowed frame cannot be returned from a retry loop: the caller reads again
                Err(source) if source.kind() == io::ErrorKind::Interrupted => {
                    Err(CaptureError::Interrupted)
                }
                Err(source) => Err(CaptureError::Device {
                    interface: interface.clone(),
                    source,
                }),
            },
            Inner::Merged { frames } => match frames.recv() {
                Ok(frame) => frame.map(Cow::Owned),
                Err(_) => Err(CaptureError::Closed),
            },
        }
    }
}

/// Returns the interfaces that can be captured from.
pub fn list_interfaces() -> Vec<NetworkInterface> {
    datalink::interfaces()
}

fn open_channel(
    interface: &NetworkInterface,
    options: &CaptureOptions,
) -> Result<Box<dyn DataLinkReceiver>, CaptureError> {
    let channel_type = match options.link_layer {
        LinkLayer::Ethernet => ChannelType::Layer2,
        LinkLayer::Ip => ChannelType::Layer3(ETHERTYPE_IPV4),
    };
    let config = Config {
        read_buffer_size: options.read_buffer_size,
        read_timeout: None,
        channel_type,
        promiscuous: options.promiscuous,
        ..Config::default()
    };

    match datalink::channel(interface, config) {
        Ok(Channel::Ethernet(_tx, rx)) => Ok(rx),
        Ok(_) => Err(CaptureError::UnsupportedChannel(interface.name.clone())),
        Err(source) => Err(CaptureError::Open {
            interface: interface.name.clone(),
            source,
        }),
    }
}

fn spawn_readers(
    receivers: Vec<(String, Box<dyn DataLinkReceiver>)>,
) -> Result<Receiver<Result<Vec<u8>, CaptureError>>, CaptureError> {
    let (tx, frames) = mpsc::sync_channel(MERGE_QUEUE_DEPTH);
    for (interface, rx) in receivers {
        let tx = tx.clone();
        thread::Builder::new()
            .name(format!("capture-{interface}"))
            .spawn({
                let interface = interface.clone();
                move || read_interface(interface, rx, tx)
            })
            .map_err(|source| CaptureError::Open { interface, source })?;
    }
    Ok(frames)
}

// blocks on a full queue, so overflow is left to the kernel buffer
fn read_interface(
    interface: String,
    mut rx: Box<dyn DataLinkReceiver>,
    tx: SyncSender<Result<Vec<u8>, CaptureError>>,
) {
    loop {
        match rx.next() {
            Ok(frame) => {
                if tx.send(Ok(frame.to_vec())).is_err() {
                    debug!(%interface, "capture consumer gone");
                    return;
                }
            }
            Err(source) if source.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => {
                let _ = tx.send(Err(CaptureError::Device { interface, source }));
                return;
            }
        }
    }
}
