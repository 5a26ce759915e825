//! MAVLink link utilities used by the lib
//!
//! The wire protocol itself is handled by the [mavlink] crate. This module only
//! moves decoded messages between the link and the subsystems: the [Transport]
//! trait is the blocking seam to the wire, [MavDispatch] fans incoming messages
//! out to the subsystems and [WaitForMessage] is the small helper every
//! request/response exchange is built on.

use crate::{Error, Result};
use async_broadcast::{broadcast, InactiveReceiver};
use async_trait::async_trait;
use flume as channel;
use flume::{Receiver, Sender};
use log::{debug, warn};
use mavlink::ardupilotmega::MavMessage;
use mavlink::error::MessageReadError;
use mavlink::{MavConnection, MavHeader, MavlinkVersion, Message};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

/// A decoded MAVLink message together with the header it was received with
pub type Frame = (MavHeader, MavMessage);

// Message ids the subsystems subscribe to
pub(crate) const HEARTBEAT_ID: u32 = 0;
pub(crate) const SYS_STATUS_ID: u32 = 1;
pub(crate) const PARAM_VALUE_ID: u32 = 22;
pub(crate) const ATTITUDE_ID: u32 = 30;
pub(crate) const GLOBAL_POSITION_INT_ID: u32 = 33;
pub(crate) const VFR_HUD_ID: u32 = 74;
pub(crate) const COMMAND_ACK_ID: u32 = 77;

const IDLE_POLL: Duration = Duration::from_millis(10);
const MESSAGE_HISTORY: usize = 256;

/// Blocking access to a MAVLink link
///
/// Implemented for the connections returned by [mavlink::connect]. Any other
/// implementation, for example an in-memory simulated vehicle, can be passed to
/// [Vehicle::connect_from_transport()](crate::Vehicle::connect_from_transport).
///
/// Both functions are called from blocking threads, never from async tasks.
pub trait Transport: Send + Sync + 'static {
    /// Receive the next message
    ///
    /// Returns `Ok(None)` when no message is currently available or when the
    /// received frame could not be decoded. An error means the link is lost.
    fn recv(&self) -> Result<Option<Frame>>;

    /// Send a message with the given header
    fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<()>;
}

/// Connection type returned by [mavlink::connect] for the ArduPilot dialect
pub type MavlinkConnection = Box<dyn MavConnection<MavMessage> + Send + Sync>;

impl Transport for MavlinkConnection {
    fn recv(&self) -> Result<Option<Frame>> {
        match MavConnection::recv(self.as_ref()) {
            Ok(frame) => Ok(Some(frame)),
            Err(MessageReadError::Io(e)) => match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Ok(None),
                _ => Err(Error::Link(format!("{}", e))),
            },
            // Messages that do not parse are ignored
            Err(e) => {
                debug!("Dropping undecodable frame: {:?}", e);
                Ok(None)
            }
        }
    }

    fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<()> {
        MavConnection::send(self.as_ref(), header, message)
            .map(|_| ())
            .map_err(|e| Error::Link(format!("{:?}", e)))
    }
}

/// Open a MAVLink connection
///
/// `address` is in the format of the [mavlink] crate, for example
/// `udpin:0.0.0.0:14550` or `serial:/dev/ttyACM0:115200`. See
/// [ConnectionString](crate::connection::ConnectionString) to convert the
/// more permissive formats accepted on the command line.
pub async fn open_transport(address: &str, version: MavlinkVersion) -> Result<MavlinkConnection> {
    let address = address.to_owned();

    tokio::task::spawn_blocking(move || -> Result<MavlinkConnection> {
        let mut connection = mavlink::connect::<MavMessage>(&address)?;
        connection.set_protocol_version(version);
        Ok(connection)
    })
    .await?
}

/// Downlink message dispatcher
///
/// Reads the transport on a dedicated thread and forwards each message to the
/// receiver registered for its message id, and to the broadcast of all
/// messages.
///
/// The reader thread is detached: a transport read can block until the next
/// frame arrives, and nothing waiting on the thread must hang with it.
pub(crate) struct MavDispatch {
    transport: Arc<dyn Transport>,
    message_channels: BTreeMap<u32, Sender<Frame>>,
    all_messages: async_broadcast::Sender<Frame>,
    all_messages_receiver: InactiveReceiver<Frame>,
    disconnect: Arc<AtomicBool>,
    closed: Sender<String>,
}

impl MavDispatch {
    pub fn new(
        transport: Arc<dyn Transport>,
        disconnect: Arc<AtomicBool>,
        closed: Sender<String>,
    ) -> Self {
        let (mut all_messages, receiver) = broadcast(MESSAGE_HISTORY);
        all_messages.set_overflow(true);
        all_messages.set_await_active(false);

        MavDispatch {
            transport,
            message_channels: BTreeMap::new(),
            all_messages,
            all_messages_receiver: receiver.deactivate(),
            disconnect,
            closed,
        }
    }

    /// Claim the messages of one message id
    ///
    /// Returns `None` if the id has already been claimed.
    #[allow(clippy::map_entry)]
    pub fn get_message_receiver(&mut self, message_id: u32) -> Option<Receiver<Frame>> {
        if self.message_channels.contains_key(&message_id) {
            None
        } else {
            let (tx, rx) = channel::unbounded();
            self.message_channels.insert(message_id, tx);
            Some(rx)
        }
    }

    /// Claim the messages of several message ids on a single receiver
    ///
    /// Returns `None`, and claims nothing, if any of the ids has already been claimed.
    pub fn get_messages_receiver(&mut self, message_ids: &[u32]) -> Option<Receiver<Frame>> {
        if message_ids.iter().any(|id| self.message_channels.contains_key(id)) {
            return None;
        }

        let (tx, rx) = channel::unbounded();
        for id in message_ids {
            self.message_channels.insert(*id, tx.clone());
        }
        Some(rx)
    }

    /// Broadcast receiver of every received message
    pub fn all_messages(&self) -> InactiveReceiver<Frame> {
        self.all_messages_receiver.clone()
    }

    /// Start the reader thread
    ///
    /// The returned receiver is disconnected once the thread has exited.
    pub fn run(self) -> Result<Receiver<()>> {
        let (finished, finished_rx) = channel::bounded::<()>(0);

        std::thread::Builder::new()
            .name("mavlink-reader".to_owned())
            .spawn(move || {
                let _finished = finished;

                let reason = loop {
                    if self.disconnect.load(Relaxed) {
                        break "Disconnect requested".to_owned();
                    }

                    match self.transport.recv() {
                        Ok(Some(frame)) => {
                            let id = frame.1.message_id();
                            if let Some(channel) = self.message_channels.get(&id) {
                                let _ = channel.send(frame.clone());
                            }
                            let _ = self.all_messages.try_broadcast(frame);
                        }
                        Ok(None) => std::thread::sleep(IDLE_POLL),
                        Err(e) => {
                            warn!("Link lost: {}", e);
                            self.disconnect.store(true, Relaxed);
                            break format!("{}", e);
                        }
                    }
                };

                let _ = self.closed.send(reason);
            })?;

        Ok(finished_rx)
    }
}

#[async_trait]
pub(crate) trait WaitForMessage {
    /// Wait for the first message accepted by `predicate`, dropping the others
    async fn wait_message<F>(&self, predicate: F) -> Result<Frame>
    where
        F: Fn(&MavMessage) -> bool + Send + Sync;
}

#[async_trait]
impl WaitForMessage for channel::Receiver<Frame> {
    async fn wait_message<F>(&self, predicate: F) -> Result<Frame>
    where
        F: Fn(&MavMessage) -> bool + Send + Sync,
    {
        loop {
            let frame = self.recv_async().await?;
            if predicate(&frame.1) {
                return Ok(frame);
            }
        }
    }
}

/// Drop every message currently queued in a receiver
pub(crate) fn drain(receiver: &Receiver<Frame>) {
    while receiver.try_recv().is_ok() {}
}
