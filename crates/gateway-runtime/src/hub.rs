// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Tenant-scoped broadcast hub
//!
//! A single actor task owns the registry of connected clients, grouped by
//! tenant. Registrations, removals, broadcasts and snapshots travel through
//! one command queue and are applied in the order they were issued, so a
//! broadcast reaches exactly the clients registered when it was sent and the
//! registry is never observed half-updated.
//!
//! Broadcasts are serialised once by the caller and enqueued without
//! blocking. Each queued broadcast holds a permit from a bounded semaphore;
//! when no permit is left the event is dropped. The actor copies the shared
//! message into each client's bounded mailbox with a non-blocking send; a
//! client whose mailbox is full is evicted instead of slowing down the rest
//! of the tenant.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use shared_types::{HubMessage, TenantId};
use tokio::{
    runtime::Handle,
    sync::{
        OwnedSemaphorePermit, Semaphore,
        mpsc::{self, error::TryRecvError, error::TrySendError},
        oneshot,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::HubConfig,
    error::{HubError, RuntimeError, RuntimeResult},
};

/// Opaque identity of a connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

type Mailbox = mpsc::Sender<Arc<str>>;

enum Command {
    Register {
        id: ClientId,
        tenant: TenantId,
        mailbox: Mailbox,
    },
    Unregister {
        id: ClientId,
    },
    Broadcast {
        tenant: TenantId,
        message: Arc<str>,
        // Released once the broadcast has been fanned out
        permit: OwnedSemaphorePermit,
    },
    Snapshot {
        reply: oneshot::Sender<BTreeMap<TenantId, usize>>,
    },
}

// `connected` is raised before a registration is enqueued and lowered by the
// actor for every registration it removes or discards.
#[derive(Debug, Default)]
struct HubStats {
    connected: AtomicUsize,
    delivered: AtomicU64,
    dropped_broadcasts: AtomicU64,
    evicted_clients: AtomicU64,
}

#[derive(Debug)]
struct HubShared {
    commands: mpsc::UnboundedSender<Command>,
    broadcast_slots: Arc<Semaphore>,
    mailbox_capacity: usize,
    next_client_id: AtomicU64,
    stats: Arc<HubStats>,
    cancellation_token: CancellationToken,
}

impl Drop for HubShared {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// Handle to the broadcast hub actor
///
/// Cloning is cheap and every clone talks to the same actor. The actor stops
/// on [`BroadcastHub::shutdown`] or when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubShared>,
}

impl BroadcastHub {
    /// Spawn the hub actor on the current Tokio runtime
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no Tokio runtime
    /// is available.
    pub fn new(config: HubConfig) -> RuntimeResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| RuntimeError::NoRuntime {
            component: "broadcast-hub",
        })?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(HubStats::default());
        let cancellation_token = CancellationToken::new();

        runtime.spawn(run_hub(
            command_rx,
            Arc::clone(&stats),
            cancellation_token.clone(),
        ));

        debug!(
            mailbox_capacity = config.mailbox_capacity,
            broadcast_queue_capacity = config.broadcast_queue_capacity,
            "broadcast hub started"
        );

        Ok(Self {
            inner: Arc::new(HubShared {
                commands,
                broadcast_slots: Arc::new(Semaphore::new(config.broadcast_queue_capacity)),
                mailbox_capacity: config.mailbox_capacity,
                next_client_id: AtomicU64::new(1),
                stats,
                cancellation_token,
            }),
        })
    }

    /// Register a new client for `tenant`
    ///
    /// The client counts towards [`BroadcastHub::connected_clients`] as soon
    /// as this returns. The returned subscription owns the client's mailbox;
    /// dropping it unregisters the client.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the hub has stopped.
    pub fn register(&self, tenant: TenantId) -> Result<Subscription, HubError> {
        let id = ClientId(self.inner.next_client_id.fetch_add(1, Ordering::Relaxed));
        let (mailbox, receiver) = mpsc::channel(self.inner.mailbox_capacity);

        self.inner.stats.connected.fetch_add(1, Ordering::SeqCst);
        let sent = self.inner.commands.send(Command::Register {
            id,
            tenant: tenant.clone(),
            mailbox,
        });
        if sent.is_err() {
            self.inner.stats.connected.fetch_sub(1, Ordering::SeqCst);
            return Err(HubError::Closed);
        }

        Ok(Subscription {
            id,
            tenant,
            mailbox: receiver,
            commands: self.inner.commands.clone(),
        })
    }

    /// Remove a client and close its mailbox; unknown clients are ignored
    pub fn unregister(&self, id: ClientId) {
        // A stopped hub has already closed every mailbox
        let _ = self.inner.commands.send(Command::Unregister { id });
    }

    /// Send an event to every client currently registered for `tenant`
    ///
    /// Never waits: if `broadcast_queue_capacity` broadcasts are already
    /// queued the event is dropped and counted.
    ///
    /// # Errors
    ///
    /// Returns `HubError::QueueFull` when the event was dropped,
    /// `HubError::Closed` when the hub has stopped, and
    /// `HubError::Serialization` if the payload cannot be encoded.
    pub fn broadcast_to_tenant(
        &self,
        tenant: &TenantId,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        if self.inner.commands.is_closed() {
            return Err(HubError::Closed);
        }
        let message = HubMessage::new(event_type, tenant.clone(), payload);
        let encoded: Arc<str> = serde_json::to_string(&message)?.into();

        let Ok(permit) = Arc::clone(&self.inner.broadcast_slots).try_acquire_owned() else {
            let dropped = self
                .inner
                .stats
                .dropped_broadcasts
                .fetch_add(1, Ordering::Relaxed)
                + 1;
            warn!(
                %tenant,
                event_type,
                dropped_total = dropped,
                "broadcast queue full, dropping event"
            );
            return Err(HubError::QueueFull {
                tenant: tenant.to_string(),
            });
        };

        self.inner
            .commands
            .send(Command::Broadcast {
                tenant: tenant.clone(),
                message: encoded,
                permit,
            })
            .map_err(|_| HubError::Closed)
    }

    /// Consistent view of the registry: clients per tenant
    ///
    /// Reflects every registration, removal and broadcast issued before the
    /// call.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the hub has stopped.
    pub async fn tenant_counts(&self) -> Result<BTreeMap<TenantId, usize>, HubError> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Snapshot { reply })
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Point-in-time number of connected clients across all tenants
    ///
    /// Registrations count immediately; removals and evictions count once
    /// the actor has applied them.
    pub fn connected_clients(&self) -> usize {
        self.inner.stats.connected.load(Ordering::SeqCst)
    }

    /// Broadcasts dropped because the hub queue was full
    pub fn dropped_broadcasts(&self) -> u64 {
        self.inner.stats.dropped_broadcasts.load(Ordering::Relaxed)
    }

    /// Clients evicted because their mailbox was full
    pub fn evicted_clients(&self) -> u64 {
        self.inner.stats.evicted_clients.load(Ordering::Relaxed)
    }

    /// Messages placed into client mailboxes
    pub fn delivered_messages(&self) -> u64 {
        self.inner.stats.delivered.load(Ordering::Relaxed)
    }

    /// Stop the actor and close every mailbox; idempotent
    pub fn shutdown(&self) {
        if !self.inner.cancellation_token.is_cancelled() {
            self.inner.cancellation_token.cancel();
            info!("broadcast hub shutdown requested");
        }
    }
}

/// A registered client's end of the hub
///
/// Yields serialised [`HubMessage`] JSON strings in broadcast order. Once the
/// client is evicted or the hub stops, the remaining messages can still be
/// drained and then the mailbox reports closed.
#[derive(Debug)]
pub struct Subscription {
    id: ClientId,
    tenant: TenantId,
    mailbox: mpsc::Receiver<Arc<str>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// Client identity
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Tenant this client is registered under
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Wait for the next message; `None` once the mailbox is closed and drained
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.mailbox.recv().await
    }

    /// Take the next message if one is queued
    ///
    /// # Errors
    ///
    /// Returns `TryRecvError::Empty` when nothing is queued and
    /// `TryRecvError::Disconnected` once the mailbox has been closed.
    pub fn try_recv(&mut self) -> Result<Arc<str>, TryRecvError> {
        self.mailbox.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unregister { id: self.id });
    }
}

struct Registry {
    tenants: HashMap<TenantId, HashMap<ClientId, Mailbox>>,
    clients: HashMap<ClientId, TenantId>,
    stats: Arc<HubStats>,
}

impl Registry {
    fn new(stats: Arc<HubStats>) -> Self {
        Self {
            tenants: HashMap::new(),
            clients: HashMap::new(),
            stats,
        }
    }

    fn register(&mut self, id: ClientId, tenant: TenantId, mailbox: Mailbox) {
        debug!(client = %id, %tenant, "client registered");
        self.clients.insert(id, tenant.clone());
        self.tenants.entry(tenant).or_default().insert(id, mailbox);
    }

    /// Dropping the removed sender closes the client's mailbox
    fn unregister(&mut self, id: ClientId) -> bool {
        let Some(tenant) = self.clients.remove(&id) else {
            return false;
        };
        self.stats.connected.fetch_sub(1, Ordering::SeqCst);
        if let Some(clients) = self.tenants.get_mut(&tenant) {
            clients.remove(&id);
            if clients.is_empty() {
                self.tenants.remove(&tenant);
                debug!(%tenant, "last client left, tenant removed");
            }
        }
        debug!(client = %id, %tenant, "client unregistered");
        true
    }

    fn deliver(&mut self, tenant: &TenantId, message: &Arc<str>) {
        let Some(clients) = self.tenants.get(tenant) else {
            return;
        };

        let mut stalled = Vec::new();
        for (id, mailbox) in clients {
            match mailbox.try_send(Arc::clone(message)) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    warn!(client = %id, %tenant, "client mailbox full, evicting");
                    self.stats.evicted_clients.fetch_add(1, Ordering::Relaxed);
                    stalled.push(*id);
                }
                Err(TrySendError::Closed(_)) => stalled.push(*id),
            }
        }

        for id in stalled {
            self.unregister(id);
        }
    }

    fn counts(&self) -> BTreeMap<TenantId, usize> {
        self.tenants
            .iter()
            .map(|(tenant, clients)| (tenant.clone(), clients.len()))
            .collect()
    }

    fn len(&self) -> usize {
        self.clients.len()
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register {
                id,
                tenant,
                mailbox,
            } => self.register(id, tenant, mailbox),
            Command::Unregister { id } => {
                self.unregister(id);
            }
            Command::Broadcast {
                tenant,
                message,
                permit,
            } => {
                self.deliver(&tenant, &message);
                drop(permit);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.counts());
            }
        }
    }

    /// Close every mailbox, including those of registrations still queued
    fn close(self, commands: &mut mpsc::UnboundedReceiver<Command>) -> usize {
        commands.close();
        let mut discarded = 0;
        while let Ok(command) = commands.try_recv() {
            if matches!(command, Command::Register { .. }) {
                discarded += 1;
            }
        }
        let closed = self.len();
        self.stats
            .connected
            .fetch_sub(closed + discarded, Ordering::SeqCst);
        closed
    }
}

async fn run_hub(
    mut commands: mpsc::UnboundedReceiver<Command>,
    stats: Arc<HubStats>,
    cancellation_token: CancellationToken,
) {
    let mut registry = Registry::new(stats);

    loop {
        tokio::select! {
            biased;
            () = cancellation_token.cancelled() => break,
            Some(command) = commands.recv() => registry.apply(command),
            else => break,
        }
    }

    let closed = registry.close(&mut commands);
    info!(closed_mailboxes = closed, "broadcast hub stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn hub(mailbox_capacity: usize, broadcast_queue_capacity: usize) -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            mailbox_capacity,
            broadcast_queue_capacity,
        })
        .unwrap()
    }

    async fn next(subscription: &mut Subscription) -> serde_json::Value {
        let message = timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("message not delivered in time")
            .expect("mailbox closed");
        serde_json::from_str(&message).unwrap()
    }

    #[tokio::test]
    async fn delivers_only_to_the_addressed_tenant() {
        let hub = hub(8, 8);
        let mut acme_one = hub.register(tenant("acme")).unwrap();
        let mut acme_two = hub.register(tenant("acme")).unwrap();
        let mut globex = hub.register(tenant("globex")).unwrap();

        hub.broadcast_to_tenant(&tenant("acme"), "order.updated", json!({"order_id": 1}))
            .unwrap();

        let expected = json!({
            "type": "order.updated",
            "tenant_id": "acme",
            "payload": {"order_id": 1}
        });
        assert_eq!(next(&mut acme_one).await, expected);
        assert_eq!(next(&mut acme_two).await, expected);

        hub.tenant_counts().await.unwrap();
        assert!(matches!(globex.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(hub.delivered_messages(), 2);
    }

    #[tokio::test]
    async fn counts_clients_across_tenants() {
        let hub = hub(8, 8);
        let mut subscriptions = Vec::new();
        for (name, clients) in [("a", 2), ("b", 1), ("c", 4)] {
            for _ in 0..clients {
                subscriptions.push(hub.register(tenant(name)).unwrap());
            }
        }

        assert_eq!(hub.connected_clients(), 7);
        let counts = hub.tenant_counts().await.unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(hub.connected_clients(), 7);

        let (tenant_b, others): (Vec<_>, Vec<_>) = subscriptions
            .into_iter()
            .partition(|s| s.tenant().as_str() == "b");
        for subscription in &tenant_b {
            hub.unregister(subscription.id());
        }

        let counts = hub.tenant_counts().await.unwrap();
        assert!(!counts.contains_key(&tenant("b")));
        assert_eq!(counts.get(&tenant("a")), Some(&2));
        assert_eq!(counts.get(&tenant("c")), Some(&4));
        assert_eq!(hub.connected_clients(), 6);

        // unregistering again, explicitly and through drop, is a no-op
        for subscription in &tenant_b {
            hub.unregister(subscription.id());
        }
        drop(tenant_b);
        assert_eq!(hub.tenant_counts().await.unwrap().len(), 2);
        assert_eq!(hub.connected_clients(), 6);
        drop(others);
    }

    #[tokio::test]
    async fn saturated_client_is_evicted_without_blocking_others() {
        let hub = hub(1, 16);
        let mut stalled = hub.register(tenant("acme")).unwrap();
        let mut healthy = hub.register(tenant("acme")).unwrap();
        let acme = tenant("acme");

        hub.broadcast_to_tenant(&acme, "tick", json!(1)).unwrap();
        assert_eq!(next(&mut healthy).await["payload"], json!(1));

        // stalled never reads, so its single-slot mailbox is now full
        hub.broadcast_to_tenant(&acme, "tick", json!(2)).unwrap();
        assert_eq!(next(&mut healthy).await["payload"], json!(2));

        let counts = hub.tenant_counts().await.unwrap();
        assert_eq!(counts.get(&acme), Some(&1));
        assert_eq!(hub.evicted_clients(), 1);

        hub.broadcast_to_tenant(&acme, "tick", json!(3)).unwrap();
        assert_eq!(next(&mut healthy).await["payload"], json!(3));

        // the evicted client keeps what it had and then sees a closed mailbox
        let first: serde_json::Value =
            serde_json::from_str(&stalled.try_recv().unwrap()).unwrap();
        assert_eq!(first["payload"], json!(1));
        assert!(matches!(stalled.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn full_broadcast_queue_drops_and_counts() {
        let hub = hub(8, 2);
        let acme = tenant("acme");

        // current-thread runtime: the actor cannot drain until we yield
        hub.broadcast_to_tenant(&acme, "a", json!(null)).unwrap();
        hub.broadcast_to_tenant(&acme, "b", json!(null)).unwrap();
        let result = hub.broadcast_to_tenant(&acme, "c", json!(null));

        assert!(matches!(result, Err(HubError::QueueFull { .. })));
        assert_eq!(hub.dropped_broadcasts(), 1);
    }

    #[tokio::test]
    async fn preserves_order_from_one_sender() {
        let hub = hub(32, 32);
        let acme = tenant("acme");
        let mut subscription = hub.register(acme.clone()).unwrap();

        for i in 0..20 {
            hub.broadcast_to_tenant(&acme, "seq", json!(i)).unwrap();
        }
        for i in 0..20 {
            assert_eq!(next(&mut subscription).await["payload"], json!(i));
        }
    }

    #[tokio::test]
    async fn late_registration_misses_earlier_broadcast() {
        let hub = hub(8, 8);
        let acme = tenant("acme");
        let mut early = hub.register(acme.clone()).unwrap();

        hub.broadcast_to_tenant(&acme, "before-register", json!(1)).unwrap();
        let mut late = hub.register(acme.clone()).unwrap();
        hub.broadcast_to_tenant(&acme, "after-register", json!(2)).unwrap();

        assert_eq!(next(&mut early).await["type"], "before-register");
        assert_eq!(next(&mut early).await["type"], "after-register");
        assert_eq!(next(&mut late).await["type"], "after-register");
        hub.tenant_counts().await.unwrap();
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn unregister_after_broadcast_still_delivers() {
        let hub = hub(8, 8);
        let acme = tenant("acme");
        let mut subscription = hub.register(acme.clone()).unwrap();

        hub.broadcast_to_tenant(&acme, "farewell", json!(null)).unwrap();
        hub.unregister(subscription.id());

        assert_eq!(next(&mut subscription).await["type"], "farewell");
        let closed = timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(hub.connected_clients(), 0);
    }

    #[tokio::test]
    async fn broadcast_slots_are_released_after_delivery() {
        let hub = hub(8, 1);
        let acme = tenant("acme");
        let mut subscription = hub.register(acme.clone()).unwrap();

        hub.broadcast_to_tenant(&acme, "first", json!(null)).unwrap();
        assert!(matches!(
            hub.broadcast_to_tenant(&acme, "second", json!(null)),
            Err(HubError::QueueFull { .. })
        ));

        assert_eq!(next(&mut subscription).await["type"], "first");
        hub.broadcast_to_tenant(&acme, "third", json!(null)).unwrap();
        assert_eq!(next(&mut subscription).await["type"], "third");
        assert_eq!(hub.dropped_broadcasts(), 1);
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let hub = hub(8, 8);
        let subscription = hub.register(tenant("acme")).unwrap();
        assert_eq!(hub.tenant_counts().await.unwrap().len(), 1);

        drop(subscription);
        assert!(hub.tenant_counts().await.unwrap().is_empty());
        assert_eq!(hub.connected_clients(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_mailboxes() {
        let hub = hub(8, 8);
        let mut subscription = hub.register(tenant("acme")).unwrap();
        hub.tenant_counts().await.unwrap();

        hub.shutdown();
        hub.shutdown();

        let closed = timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(hub.connected_clients(), 0);
        assert!(matches!(
            hub.register(tenant("acme")),
            Err(HubError::Closed)
        ));
        assert!(matches!(
            hub.broadcast_to_tenant(&tenant("acme"), "late", json!(null)),
            Err(HubError::Closed)
        ));
    }

    #[test]
    fn requires_runtime() {
        assert!(matches!(
            BroadcastHub::new(HubConfig::default()),
            Err(RuntimeError::NoRuntime { .. })
        ));
    }
}
