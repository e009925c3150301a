//! Connection registry ("hub") and live fan-out.
//!
//! The registry maps a user id to that user's live connections (one per
//! device/tab). Mutation is owned by a single coordinator task that serializes
//! registrations, unregistrations and broadcasts arriving on three channels.
//! Targeted dispatch runs on the caller's task and only reads the registry:
//! it snapshots the handles for the target users under a short shard lock and
//! then writes to each connection with a bounded timeout. A failed write
//! unregisters that connection and never affects the other targets.

use axum::extract::ws::Message;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::ws::protocol::ServerEvent;
use crate::ws::{ConnectionHandle, ConnectionState, WriteError};

/// user id -> live connections of that user
type Registry = Arc<DashMap<String, Vec<ConnectionHandle>>>;

/// Tuning for connection writes.
#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    /// Upper bound a dispatch waits for room in one connection's queue.
    pub write_timeout: Duration,
    /// Outbound frames buffered per connection.
    pub outbound_queue: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
            outbound_queue: 64,
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections the frame was handed to. A broadcast to a connection that
    /// is behind on writes counts here while its write is still waiting.
    pub delivered: usize,
    /// Connections whose write failed (now unregistered).
    pub failed: usize,
    /// Target users with no live connection.
    pub offline: usize,
}

struct Registration {
    conn: ConnectionHandle,
    done: oneshot::Sender<()>,
}

struct Unregistration {
    conn: ConnectionHandle,
    done: oneshot::Sender<()>,
}

struct BroadcastRequest {
    frame: Message,
    done: oneshot::Sender<DispatchReport>,
}

/// Handle to the process-wide connection registry.
///
/// Constructed once at start-up with [`Hub::spawn`] and cloned into request
/// handlers. The coordinator task stops when the last clone is dropped.
#[derive(Clone)]
pub struct Hub {
    registry: Registry,
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<Unregistration>,
    broadcast_tx: mpsc::UnboundedSender<BroadcastRequest>,
    settings: HubSettings,
}

impl Hub {
    /// Create the registry and spawn its coordinator on the current runtime.
    pub fn spawn(settings: HubSettings) -> Self {
        let registry: Registry = Arc::new(DashMap::new());
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();

        let coordinator = Coordinator {
            registry: registry.clone(),
            unregister_tx: unregister_tx.downgrade(),
            write_timeout: settings.write_timeout,
        };
        tokio::spawn(coordinator.run(register_rx, unregister_rx, broadcast_rx));

        Self {
            registry,
            register_tx,
            unregister_tx,
            broadcast_tx,
            settings,
        }
    }

    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Register a freshly upgraded, authenticated connection.
    ///
    /// Returns once the coordinator has applied the registration.
    pub async fn register(&self, conn: &ConnectionHandle) {
        let (done, wait) = oneshot::channel();
        let request = Registration {
            conn: conn.clone(),
            done,
        };
        if self.register_tx.send(request).is_err() {
            tracing::warn!(conn_id = conn.id(), "Hub stopped, closing connection");
            conn.close();
            conn.set_state(ConnectionState::Closed);
            return;
        }
        let _ = wait.await;
    }

    /// Remove a connection and close its socket. Safe to call repeatedly.
    pub async fn unregister(&self, conn: &ConnectionHandle) {
        let (done, wait) = oneshot::channel();
        let request = Unregistration {
            conn: conn.clone(),
            done,
        };
        if self.unregister_tx.send(request).is_err() {
            conn.close();
            conn.set_state(ConnectionState::Closed);
            return;
        }
        let _ = wait.await;
    }

    /// Send an event to every registered connection.
    pub async fn broadcast(&self, event: &ServerEvent) -> DispatchReport {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode broadcast event");
                return DispatchReport::default();
            }
        };
        let (done, wait) = oneshot::channel();
        if self.broadcast_tx.send(BroadcastRequest { frame, done }).is_err() {
            return DispatchReport::default();
        }
        wait.await.unwrap_or_default()
    }

    /// Deliver an event to every live connection of the given users.
    ///
    /// Users without a connection are skipped. Each write is bounded by the
    /// configured write timeout; a failing connection is unregistered.
    pub async fn dispatch(&self, member_ids: &[String], event: &ServerEvent) -> DispatchReport {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode dispatch event");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for member_id in member_ids {
            if !seen.insert(member_id.as_str()) {
                continue;
            }
            // Clone out of the shard so no lock is held across the writes
            let conns = self
                .registry
                .get(member_id)
                .map(|entry| entry.value().clone())
                .unwrap_or_default();
            if conns.is_empty() {
                report.offline += 1;
            }
            targets.extend(conns);
        }

        let timeout = self.settings.write_timeout;
        let results = join_all(
            targets
                .iter()
                .map(|conn| conn.send_timeout(frame.clone(), timeout)),
        )
        .await;

        for (conn, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        user_id = %conn.user_id(),
                        conn_id = conn.id(),
                        error = %e,
                        "Dispatch write failed, unregistering connection"
                    );
                    self.unregister(conn).await;
                }
            }
        }

        report
    }

    /// Number of live connections of one user.
    pub fn connections_of(&self, user_id: &str) -> usize {
        self.registry.get(user_id).map(|conns| conns.len()).unwrap_or(0)
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.iter().map(|entry| entry.value().len()).sum()
    }
}

/// Sole writer of the registry.
struct Coordinator {
    registry: Registry,
    /// Weak so the coordinator stops once every `Hub` clone is gone.
    unregister_tx: mpsc::WeakUnboundedSender<Unregistration>,
    write_timeout: Duration,
}

impl Coordinator {
    async fn run(
        self,
        mut register_rx: mpsc::UnboundedReceiver<Registration>,
        mut unregister_rx: mpsc::UnboundedReceiver<Unregistration>,
        mut broadcast_rx: mpsc::UnboundedReceiver<BroadcastRequest>,
    ) {
        tracing::debug!("Hub coordinator started");
        loop {
            tokio::select! {
                Some(Registration { conn, done }) = register_rx.recv() => {
                    self.register(conn);
                    let _ = done.send(());
                }
                Some(Unregistration { conn, done }) = unregister_rx.recv() => {
                    self.unregister(&conn);
                    let _ = done.send(());
                }
                Some(BroadcastRequest { frame, done }) = broadcast_rx.recv() => {
                    let report = self.broadcast(&frame);
                    let _ = done.send(report);
                }
                else => break,
            }
        }

        // Hub dropped: close whatever is still registered
        for entry in self.registry.iter() {
            for conn in entry.value() {
                conn.close();
                conn.set_state(ConnectionState::Closed);
            }
        }
        self.registry.clear();
        tracing::debug!("Hub coordinator stopped");
    }

    fn register(&self, conn: ConnectionHandle) {
        if !conn.transition(ConnectionState::Connecting, ConnectionState::Registered) {
            // Re-registering a live connection replaces its entry below;
            // anything already unregistering stays dead.
            if conn.state() != ConnectionState::Registered {
                tracing::debug!(
                    conn_id = conn.id(),
                    state = ?conn.state(),
                    "Ignoring registration of closed connection"
                );
                return;
            }
        }

        let user_id = conn.user_id().to_string();
        let first_for_user = {
            let mut conns = self.registry.entry(user_id.clone()).or_default();
            conns.retain(|existing| existing.id() != conn.id());
            conns.push(conn.clone());
            conns.len() == 1
        };

        tracing::debug!(
            user_id = %user_id,
            conn_id = conn.id(),
            connections = self.registry.get(&user_id).map(|c| c.len()).unwrap_or(0),
            "Connection registered"
        );

        if first_for_user {
            self.announce_presence(&user_id, true);
        }
    }

    fn unregister(&self, conn: &ConnectionHandle) {
        let was_registered =
            conn.transition(ConnectionState::Registered, ConnectionState::Unregistering);
        if !was_registered
            && !conn.transition(ConnectionState::Connecting, ConnectionState::Unregistering)
        {
            // Already unregistering or closed
            return;
        }

        let user_id = conn.user_id();
        let mut removed = false;
        if let Some(mut conns) = self.registry.get_mut(user_id) {
            let before = conns.len();
            conns.retain(|existing| existing.id() != conn.id());
            removed = conns.len() != before;
        }
        let last_for_user = self
            .registry
            .remove_if(user_id, |_, conns| conns.is_empty())
            .is_some();

        conn.close();
        conn.set_state(ConnectionState::Closed);

        tracing::debug!(user_id = %user_id, conn_id = conn.id(), "Connection unregistered");

        if removed && last_for_user {
            self.announce_presence(user_id, false);
        }
    }

    /// Write a frame to every registered connection without blocking the loop.
    fn broadcast(&self, frame: &Message) -> DispatchReport {
        let targets: Vec<ConnectionHandle> = self
            .registry
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();

        let mut report = DispatchReport::default();
        let mut failed = Vec::new();
        for conn in targets {
            match conn.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(WriteError::Full) => {
                    self.finish_write_later(conn, frame.clone());
                    report.delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %conn.user_id(),
                        conn_id = conn.id(),
                        error = %e,
                        "Broadcast write failed, unregistering connection"
                    );
                    report.failed += 1;
                    failed.push(conn);
                }
            }
        }

        for conn in &failed {
            self.unregister(conn);
        }
        report
    }

    /// Wait for room in a busy connection's queue off the coordinator loop.
    /// Only a queue that stays full for `write_timeout` unregisters it.
    fn finish_write_later(&self, conn: ConnectionHandle, frame: Message) {
        let write_timeout = self.write_timeout;
        let unregister_tx = self.unregister_tx.clone();
        tokio::spawn(async move {
            let Err(e) = conn.send_timeout(frame, write_timeout).await else {
                return;
            };
            tracing::warn!(
                user_id = %conn.user_id(),
                conn_id = conn.id(),
                error = %e,
                "Broadcast write failed, unregistering connection"
            );
            match unregister_tx.upgrade() {
                Some(tx) => {
                    let (done, _) = oneshot::channel();
                    let _ = tx.send(Unregistration { conn, done });
                }
                None => conn.close(),
            }
        });
    }

    fn announce_presence(&self, user_id: &str, online: bool) {
        let event = ServerEvent::Presence {
            user_id: user_id.to_string(),
            online,
        };
        match event.to_frame() {
            Ok(frame) => {
                self.broadcast(&frame);
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode presence event"),
        }
    }
}
