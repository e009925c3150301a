pub mod actor;
pub mod handler;
pub mod hub;
pub mod protocol;

pub use hub::{DispatchReport, Hub, HubSettings};

use axum::extract::ws::Message;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Process-unique identifier of one live socket.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection as seen by the hub.
///
/// `Connecting -> Registered -> Unregistering -> Closed`. A connection that
/// fails identity resolution never leaves `Connecting` before it is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Unregistering = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Registered,
            2 => Self::Unregistering,
            _ => Self::Closed,
        }
    }
}

/// Why a frame could not be handed to a connection's writer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
    #[error("write timed out")]
    Timeout,
}

/// Hub-side handle to one live socket.
///
/// Cloning is cheap; all clones refer to the same connection. The socket itself
/// is owned by the connection's writer task, which drains the bounded outbound
/// queue behind `tx`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    user_id: String,
    tx: mpsc::Sender<Message>,
    state: AtomicU8,
    close_tx: watch::Sender<bool>,
}

/// The socket-facing end of a connection: the outbound frame queue and the
/// close signal.
#[derive(Debug)]
pub struct ConnectionOutlet {
    pub rx: mpsc::Receiver<Message>,
    pub closed: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// Create a handle for `user_id` with an outbound queue of `capacity` frames.
    pub fn new(user_id: &str, capacity: usize) -> (Self, ConnectionOutlet) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (close_tx, closed) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                user_id: user_id.to_string(),
                tx,
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                close_tx,
            }),
        };
        (handle, ConnectionOutlet { rx, closed })
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Atomically move from `from` to `to`. Returns false if the connection
    /// was not in `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Signal the connection's tasks to close the socket. Idempotent.
    pub fn close(&self) {
        self.inner.close_tx.send_replace(true);
    }

    pub fn is_close_requested(&self) -> bool {
        *self.inner.close_tx.borrow()
    }

    /// Enqueue a frame without waiting.
    pub fn try_send(&self, frame: Message) -> Result<(), WriteError> {
        self.inner.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WriteError::Full,
            mpsc::error::TrySendError::Closed(_) => WriteError::Closed,
        })
    }

    /// Enqueue a frame, waiting at most `timeout` for queue space.
    pub async fn send_timeout(&self, frame: Message, timeout: Duration) -> Result<(), WriteError> {
        if self.is_close_requested() {
            return Err(WriteError::Closed);
        }
        self.inner
            .tx
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => WriteError::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => WriteError::Closed,
            })
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ConnectionHandle {}
