//! Push targets for streamed events.

use crate::error::{GridError, Result};
use crossbeam_channel::{bounded, select, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::event::GridEvent;

/// Why a sink stopped accepting events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The subscriber closed the connection.
    Closed,
    /// The receiving side was dropped.
    ReceiverDropped,
    /// The subscriber stopped reading and the buffer stayed full.
    BufferOverflow,
}

/// Callback run when a sink disconnects.
pub type DisconnectCallback = Box<dyn FnOnce(DisconnectReason) + Send>;

/// One-way push target for a single subscriber.
pub trait Sink: Send + Sync {
    /// Push one event. Fails with `SinkDisconnected` once the subscriber is
    /// gone.
    fn push(&self, event: GridEvent) -> Result<()>;

    /// Register a callback run at most once, when the sink disconnects.
    /// Runs immediately if the sink is already disconnected.
    fn on_disconnect(&self, callback: DisconnectCallback);

    fn is_disconnected(&self) -> bool;
}

/// Sink configuration.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Max buffered events before pushes start waiting.
    /// Default: 1000
    pub buffer_size: usize,

    /// How long a push may wait on a full buffer before the subscriber is
    /// dropped as too slow.
    /// Default: 5s
    pub push_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            push_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct ConnectionState {
    reason: Option<DisconnectReason>,
    callbacks: Vec<DisconnectCallback>,
    /// Dropped on disconnect, which makes `closed` ready.
    closed_guard: Option<Sender<()>>,
}

/// Connection state shared by both ends of a channel sink.
struct Connection {
    state: Mutex<ConnectionState>,
    closed: Receiver<()>,
}

impl Connection {
    fn new() -> Self {
        let (guard, closed) = bounded(0);
        Self {
            state: Mutex::new(ConnectionState {
                closed_guard: Some(guard),
                ..Default::default()
            }),
            closed,
        }
    }

    fn reason(&self) -> Option<DisconnectReason> {
        self.state.lock().reason
    }

    fn disconnect(&self, reason: DisconnectReason) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason);
            state.closed_guard = None;
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback(reason);
        }
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        let fired = {
            let mut state = self.state.lock();
            match state.reason {
                Some(reason) => Some((reason, callback)),
                None => {
                    state.callbacks.push(callback);
                    None
                }
            }
        };

        if let Some((reason, callback)) = fired {
            callback(reason);
        }
    }
}

/// In-process sink backed by a bounded crossbeam channel.
pub struct ChannelSink {
    sender: Sender<GridEvent>,
    connection: Arc<Connection>,
    push_timeout: Duration,
}

impl ChannelSink {
    /// Create a connected sink and its receiving side.
    pub fn pair(config: SinkConfig) -> (ChannelSink, Subscriber) {
        let (sender, receiver) = bounded(config.buffer_size);
        let connection = Arc::new(Connection::new());

        let sink = ChannelSink {
            sender,
            connection: Arc::clone(&connection),
            push_timeout: config.push_timeout,
        };
        let subscriber = Subscriber {
            receiver,
            connection,
        };
        (sink, subscriber)
    }

    /// Why the sink disconnected, if it did.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.connection.reason()
    }
}

impl Sink for ChannelSink {
    fn push(&self, event: GridEvent) -> Result<()> {
        if self.connection.reason().is_some() {
            return Err(GridError::SinkDisconnected);
        }

        select! {
            send(self.sender, event) -> res => match res {
                Ok(()) => Ok(()),
                Err(_) => {
                    self.connection.disconnect(DisconnectReason::ReceiverDropped);
                    Err(GridError::SinkDisconnected)
                }
            },
            recv(self.connection.closed) -> _ => Err(GridError::SinkDisconnected),
            default(self.push_timeout) => {
                warn!(
                    timeout_ms = self.push_timeout.as_millis() as u64,
                    "subscriber buffer full, dropping slow subscriber"
                );
                self.connection.disconnect(DisconnectReason::BufferOverflow);
                Err(GridError::SinkDisconnected)
            },
        }
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        self.connection.on_disconnect(callback);
    }

    fn is_disconnected(&self) -> bool {
        self.connection.reason().is_some()
    }
}

/// Receiving side of a [`ChannelSink`].
///
/// Dropping the subscriber disconnects the sink.
pub struct Subscriber {
    receiver: Receiver<GridEvent>,
    connection: Arc<Connection>,
}

impl Subscriber {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<GridEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<GridEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<GridEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Close the connection. Pushes fail from now on and disconnect
    /// callbacks run.
    pub fn disconnect(&self) {
        self.connection.disconnect(DisconnectReason::Closed);
    }

    pub fn is_disconnected(&self) -> bool {
        self.connection.reason().is_some()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.connection.disconnect(DisconnectReason::ReceiverDropped);
    }
}
