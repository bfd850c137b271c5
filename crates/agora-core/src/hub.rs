//! The hub coordinator.
//!
//! A single task owns the membership map and the set of taken names. Every
//! admission, departure and broadcast arrives on one bounded inbox and is
//! applied to completion before the next, so state transitions are totally
//! ordered without any lock.

use crate::member::{ConnectionId, Member, Outbound, OutboundSender};
use agora_protocol::{CloseReason, Envelope};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Error envelope content sent when the hub is full.
pub const CAPACITY_MESSAGE: &str = "Server is at capacity. Please try again later.";

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The coordinator task is gone.
    #[error("Hub is not running")]
    Closed,
}

/// Why an admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Membership is at its limit.
    #[error("server is at capacity")]
    CapacityExceeded,

    /// Another member already uses the display name.
    #[error("display name is already in use")]
    DuplicateName,
}

/// Result of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The connection is now a member.
    Admitted,
    /// The connection was refused and its queue closed.
    Rejected(Rejection),
}

impl AdmitOutcome {
    /// Whether the connection became a member.
    #[must_use]
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// A connection asking to join.
#[derive(Debug)]
pub struct Admission {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Sanitized display name.
    pub name: String,
    /// Strong sender for the connection's outbound queue. Ownership moves to
    /// the hub.
    pub outbound: OutboundSender,
}

impl Admission {
    /// Create an admission request.
    #[must_use]
    pub fn new(id: ConnectionId, name: impl Into<String>, outbound: OutboundSender) -> Self {
        Self {
            id,
            name: name.into(),
            outbound,
        }
    }
}

/// Events consumed by the coordinator.
#[derive(Debug)]
pub enum HubEvent {
    /// Register a connection.
    Admit {
        /// The candidate.
        admission: Admission,
        /// Where to report the outcome.
        reply: Option<oneshot::Sender<AdmitOutcome>>,
    },
    /// Unregister a connection. No-op for non-members.
    Depart(ConnectionId),
    /// Deliver an envelope to every member.
    Broadcast(Envelope),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of members.
    pub max_clients: usize,
    /// Capacity of the coordinator's inbox.
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_clients: 100,
            event_capacity: 1024,
        }
    }
}

/// Snapshot published after every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Current number of members.
    pub members: usize,
    /// Slow consumers evicted since start.
    pub evictions: u64,
}

/// The coordinator.
pub struct Hub {
    /// Members indexed by connection.
    members: HashMap<ConnectionId, Member>,
    /// Display names of current members.
    names: HashSet<String>,
    /// Inbox.
    events: mpsc::Receiver<HubEvent>,
    /// Stats publisher.
    stats: watch::Sender<HubStats>,
    /// Slow consumers evicted so far.
    evictions: u64,
    /// Configuration.
    config: HubConfig,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        info!("Creating hub with config: {:?}", config);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (stats_tx, stats_rx) = watch::channel(HubStats::default());

        let hub = Self {
            members: HashMap::new(),
            names: HashSet::new(),
            events: events_rx,
            stats: stats_tx,
            evictions: 0,
            config,
        };
        let handle = HubHandle {
            events: events_tx,
            stats: stats_rx,
        };
        (hub, handle)
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process events until every handle is dropped.
    pub async fn run(mut self) {
        info!(max_clients = self.config.max_clients, "Hub running");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        info!("Hub stopped");
    }

    /// Apply one event and publish the resulting stats.
    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Admit { admission, reply } => {
                let outcome = self.admit(admission);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            HubEvent::Depart(id) => {
                self.depart(&id);
            }
            HubEvent::Broadcast(envelope) => {
                self.broadcast(envelope);
            }
        }
        self.stats.send_replace(self.stats());
    }

    /// Register a connection, or reject it and close its queue.
    pub fn admit(&mut self, admission: Admission) -> AdmitOutcome {
        let Admission { id, name, outbound } = admission;

        if self.members.len() >= self.config.max_clients {
            warn!(
                connection = %id,
                clients = self.members.len(),
                max = self.config.max_clients,
                "Rejected: server at capacity"
            );
            let _ = outbound.try_send(Envelope::error(CAPACITY_MESSAGE).into());
            return AdmitOutcome::Rejected(Rejection::CapacityExceeded);
        }

        if self.names.contains(&name) || self.members.contains_key(&id) {
            warn!(connection = %id, name = %name, "Rejected: name already taken");
            // The close instruction must fit; the error envelope only if room remains.
            if outbound.capacity() > 1 {
                let _ = outbound.try_send(
                    Envelope::error(format!(
                        "A user named '{name}' is already connected to the chat. Please choose another name."
                    ))
                    .into(),
                );
            }
            let _ = outbound.try_send(Outbound::Close(CloseReason::name_taken()));
            return AdmitOutcome::Rejected(Rejection::DuplicateName);
        }

        let _ = outbound
            .try_send(Envelope::system(format!("Welcome! You are connected as {name}")).into());
        self.names.insert(name.clone());
        self.members.insert(
            id.clone(),
            Member {
                name: name.clone(),
                outbound,
            },
        );
        info!(
            connection = %id,
            name = %name,
            clients = self.members.len(),
            "Client connected"
        );

        self.deliver(Envelope::system(format!("{name} joined the chat")), Some(&id));
        AdmitOutcome::Admitted
    }

    /// Unregister a connection, close its queue and notify the rest.
    ///
    /// Returns `false` if the connection was not a member.
    pub fn depart(&mut self, id: &ConnectionId) -> bool {
        let Some(Member { name, outbound }) = self.members.remove(id) else {
            trace!(connection = %id, "Depart for non-member ignored");
            return false;
        };
        self.names.remove(&name);
        drop(outbound);

        info!(
            connection = %id,
            name = %name,
            clients = self.members.len(),
            "Client disconnected"
        );

        self.deliver(Envelope::system(format!("{name} left the chat")), None);
        true
    }

    /// Deliver an envelope to every member, the author included.
    ///
    /// An envelope stamped with a connection that is no longer a member is
    /// dropped, since its name may already belong to someone else.
    ///
    /// Returns the number of members the envelope was queued for.
    pub fn broadcast(&mut self, envelope: Envelope) -> usize {
        if let Some(author) = envelope.connection_id.as_deref() {
            if !self.members.contains_key(&ConnectionId::from(author)) {
                debug!(connection = %author, "Dropping broadcast from non-member");
                return 0;
            }
        }
        self.deliver(envelope, None)
    }

    fn deliver(&mut self, envelope: Envelope, except: Option<&ConnectionId>) -> usize {
        let envelope = Arc::new(envelope);
        let mut delivered = 0;
        let mut slow = Vec::new();

        for (id, member) in &self.members {
            if except == Some(id) {
                continue;
            }
            match member
                .outbound
                .try_send(Outbound::Envelope(Arc::clone(&envelope)))
            {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => slow.push(id.clone()),
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "Writer gone, skipping until depart");
                }
            }
        }

        for id in &slow {
            self.evict(id);
        }

        trace!(kind = %envelope.kind, recipients = delivered, "Delivered");
        delivered
    }

    /// Drop a slow consumer without notifying the others.
    fn evict(&mut self, id: &ConnectionId) {
        if let Some(member) = self.members.remove(id) {
            self.names.remove(&member.name);
            self.evictions += 1;
            warn!(
                connection = %id,
                name = %member.name,
                clients = self.members.len(),
                "Evicted slow consumer"
            );
        }
    }

    /// Current stats.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            members: self.members.len(),
            evictions: self.evictions,
        }
    }

    /// Number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether a connection is a member.
    #[must_use]
    pub fn is_member(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    /// Whether a display name is in use.
    #[must_use]
    pub fn is_name_taken(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Display names currently in use.
    #[must_use]
    pub fn taken_names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    /// Display names of current members, one per member.
    #[must_use]
    pub fn member_names(&self) -> Vec<String> {
        self.members.values().map(|m| m.name.clone()).collect()
    }
}

/// Cloneable handle to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    stats: watch::Receiver<HubStats>,
}

impl HubHandle {
    /// Ask the hub to admit a connection and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn admit(&self, admission: Admission) -> Result<AdmitOutcome, HubError> {
        let (reply, outcome) = oneshot::channel();
        self.send(HubEvent::Admit {
            admission,
            reply: Some(reply),
        })
        .await?;
        outcome.await.map_err(|_| HubError::Closed)
    }

    /// Tell the hub a connection is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn depart(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(HubEvent::Depart(id)).await
    }

    /// Submit an envelope for fan-out.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast(envelope)).await
    }

    /// Latest published stats.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        *self.stats.borrow()
    }

    /// Subscribe to stats updates.
    #[must_use]
    pub fn watch_stats(&self) -> watch::Receiver<HubStats> {
        self.stats.clone()
    }

    /// Whether the hub has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{outbound_queue, OutboundReceiver};
    use agora_protocol::MessageKind;

    fn hub_with_capacity(max_clients: usize) -> (Hub, HubHandle) {
        Hub::new(HubConfig {
            max_clients,
            ..Default::default()
        })
    }

    fn join(hub: &mut Hub, id: &str, name: &str) -> (AdmitOutcome, OutboundReceiver) {
        join_with_queue(hub, id, name, 16)
    }

    fn join_with_queue(
        hub: &mut Hub,
        id: &str,
        name: &str,
        capacity: usize,
    ) -> (AdmitOutcome, OutboundReceiver) {
        let (tx, rx) = outbound_queue(capacity);
        let outcome = hub.admit(Admission::new(id.into(), name, tx));
        (outcome, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn envelopes(items: &[Outbound]) -> Vec<(MessageKind, String)> {
        items
            .iter()
            .filter_map(|item| match item {
                Outbound::Envelope(e) => Some((e.kind, e.content.clone())),
                Outbound::Close(_) => None,
            })
            .collect()
    }

    fn is_closed(rx: &mut OutboundReceiver) -> bool {
        matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        )
    }

    fn assert_bijection(hub: &Hub) {
        let mut taken = hub.taken_names();
        let mut members = hub.member_names();
        taken.sort();
        members.sort();
        assert_eq!(taken, members);
    }

    #[test]
    fn test_admit_sends_welcome_and_notifies_others() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());

        let (outcome, mut alice) = join(&mut hub, "a", "alice");
        assert!(outcome.is_admitted());
        assert_eq!(
            envelopes(&drain(&mut alice)),
            vec![(
                MessageKind::System,
                "Welcome! You are connected as alice".to_string()
            )]
        );

        let (_, mut bob) = join(&mut hub, "b", "bob");
        assert_eq!(
            envelopes(&drain(&mut alice)),
            vec![(MessageKind::System, "bob joined the chat".to_string())]
        );
        // The newcomer only gets its welcome.
        assert_eq!(drain(&mut bob).len(), 1);
        assert_eq!(hub.member_count(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (_, mut first) = join(&mut hub, "a1", "alice");
        drain(&mut first);

        let (outcome, mut second) = join(&mut hub, "a2", "alice");
        assert_eq!(outcome, AdmitOutcome::Rejected(Rejection::DuplicateName));

        let items = drain(&mut second);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Outbound::Envelope(e) if e.kind == MessageKind::Error));
        assert!(matches!(&items[1], Outbound::Close(c) if c.code == 1008));
        assert!(is_closed(&mut second));

        assert!(hub.is_member(&"a1".into()));
        assert!(!hub.is_member(&"a2".into()));
        assert_eq!(hub.member_count(), 1);
        assert!(drain(&mut first).is_empty());
        assert_bijection(&hub);
    }

    #[test]
    fn test_duplicate_name_close_survives_single_slot_queue() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        join(&mut hub, "a1", "alice");

        let (outcome, mut second) = join_with_queue(&mut hub, "a2", "alice", 1);
        assert_eq!(outcome, AdmitOutcome::Rejected(Rejection::DuplicateName));

        let items = drain(&mut second);
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Outbound::Close(c) if c.code == 1008));
        assert!(is_closed(&mut second));
    }

    #[test]
    fn test_broadcast_from_evicted_author_dropped() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (_, mut alice) = join(&mut hub, "a", "alice");
        // Bob's queue only fits the welcome, so the join notice evicts him.
        let (_, _bob) = join_with_queue(&mut hub, "b", "bob", 1);
        let (_, _carol) = join(&mut hub, "c", "carol");
        assert!(!hub.is_member(&"b".into()));

        // Someone else takes the freed name.
        let (outcome, _b2) = join(&mut hub, "b2", "bob");
        assert!(outcome.is_admitted());
        drain(&mut alice);

        // A chat still in flight from the evicted connection goes nowhere.
        assert_eq!(hub.broadcast(Envelope::chat("stale", "bob", "b")), 0);
        assert!(drain(&mut alice).is_empty());

        // Server broadcasts carry no author and always go out.
        assert_eq!(hub.broadcast(Envelope::system("notice")), 3);
    }

    #[test]
    fn test_capacity_rejected() {
        let (mut hub, _handle) = hub_with_capacity(3);
        let mut members: Vec<_> = ["alice", "bob", "carol"]
            .iter()
            .map(|name| join(&mut hub, name, name).1)
            .collect();
        for rx in &mut members {
            drain(rx);
        }

        let (outcome, mut extra) = join(&mut hub, "dave", "dave");
        assert_eq!(outcome, AdmitOutcome::Rejected(Rejection::CapacityExceeded));
        assert_eq!(
            envelopes(&drain(&mut extra)),
            vec![(MessageKind::Error, CAPACITY_MESSAGE.to_string())]
        );
        assert!(is_closed(&mut extra));

        assert_eq!(hub.member_count(), 3);
        assert!(!hub.is_name_taken("dave"));
        for rx in &mut members {
            assert!(drain(rx).is_empty());
        }
    }

    #[test]
    fn test_capacity_checked_before_name() {
        let (mut hub, _handle) = hub_with_capacity(1);
        join(&mut hub, "a1", "alice");
        let (outcome, _) = join(&mut hub, "a2", "alice");
        assert_eq!(outcome, AdmitOutcome::Rejected(Rejection::CapacityExceeded));
    }

    #[test]
    fn test_broadcast_reaches_everyone_including_author() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (_, mut alice) = join(&mut hub, "a", "alice");
        let (_, mut bob) = join(&mut hub, "b", "bob");
        drain(&mut alice);
        drain(&mut bob);

        let delivered = hub.broadcast(Envelope::chat("hello", "alice", "a"));
        assert_eq!(delivered, 2);

        for rx in [&mut alice, &mut bob] {
            let items = drain(rx);
            assert_eq!(items.len(), 1);
            match &items[0] {
                Outbound::Envelope(e) => {
                    assert_eq!(e.kind, MessageKind::Chat);
                    assert_eq!(e.content, "hello");
                    assert_eq!(e.username.as_deref(), Some("alice"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_depart_notifies_and_is_idempotent() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (_, mut alice) = join(&mut hub, "a", "alice");
        let (_, mut bob) = join(&mut hub, "b", "bob");
        drain(&mut alice);
        drain(&mut bob);

        assert!(hub.depart(&"b".into()));
        assert!(is_closed(&mut bob));
        assert!(!hub.is_name_taken("bob"));
        assert_eq!(
            envelopes(&drain(&mut alice)),
            vec![(MessageKind::System, "bob left the chat".to_string())]
        );

        assert!(!hub.depart(&"b".into()));
        assert!(!hub.depart(&"nobody".into()));
        assert!(drain(&mut alice).is_empty());
        assert_bijection(&hub);
    }

    #[test]
    fn test_slow_consumer_evicted_without_notice() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (_, mut alice) = join(&mut hub, "a", "alice");
        // Room for the welcome only.
        let (_, mut bob) = join_with_queue(&mut hub, "b", "bob", 1);
        drain(&mut alice);

        let delivered = hub.broadcast(Envelope::chat("hello", "alice", "a"));
        assert_eq!(delivered, 1);
        assert!(!hub.is_member(&"b".into()));
        assert!(!hub.is_name_taken("bob"));
        assert_eq!(hub.stats().evictions, 1);

        // Bob keeps what was queued before eviction, then sees the close.
        let items = drain(&mut bob);
        assert_eq!(
            envelopes(&items),
            vec![(
                MessageKind::System,
                "Welcome! You are connected as bob".to_string()
            )]
        );
        assert!(is_closed(&mut bob));

        // Alice got the chat and no "left" notice.
        assert_eq!(
            envelopes(&drain(&mut alice)),
            vec![(MessageKind::Chat, "hello".to_string())]
        );

        // A late depart from the evicted connection changes nothing.
        assert!(!hub.depart(&"b".into()));
        assert_bijection(&hub);
    }

    #[test]
    fn test_slow_consumer_evicted_on_join_notice() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (_, _alice) = join_with_queue(&mut hub, "a", "alice", 1);

        let (outcome, _bob) = join(&mut hub, "b", "bob");
        assert!(outcome.is_admitted());
        assert!(!hub.is_member(&"a".into()));
        assert!(!hub.is_name_taken("alice"));
        assert_bijection(&hub);
    }

    #[test]
    fn test_closed_writer_is_skipped_not_evicted() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        let (_, alice) = join(&mut hub, "a", "alice");
        drop(alice);

        assert_eq!(hub.broadcast(Envelope::chat("x", "alice", "a")), 0);
        assert!(hub.is_member(&"a".into()));
        assert_eq!(hub.stats().evictions, 0);
    }

    #[test]
    fn test_name_reusable_after_depart() {
        let (mut hub, _handle) = Hub::new(HubConfig::default());
        join(&mut hub, "a1", "alice");
        hub.depart(&"a1".into());

        let (outcome, _) = join(&mut hub, "a2", "alice");
        assert!(outcome.is_admitted());
        assert_bijection(&hub);
    }

    #[test]
    fn test_bijection_over_event_sequence() {
        let (mut hub, _handle) = hub_with_capacity(5);
        let names = ["alice", "bob", "carol", "dave", "erin", "frank"];
        let mut queues = Vec::new();
        // Simple LCG so the sequence is varied but deterministic.
        let mut seed: u32 = 7;

        for step in 0..200 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let pick = (seed >> 16) as usize;
            let id = format!("c{}", pick % 9);
            if pick % 3 == 0 {
                hub.depart(&id.as_str().into());
            } else {
                let (_, rx) = join(&mut hub, &format!("{id}-{step}"), names[pick % names.len()]);
                queues.push(rx);
                let (_, rx) = join(&mut hub, &id, names[(pick / 7) % names.len()]);
                queues.push(rx);
            }
            if step % 10 == 0 {
                hub.broadcast(Envelope::system("tick"));
            }
            for rx in &mut queues {
                drain(rx);
            }

            assert_bijection(&hub);
            assert!(hub.member_count() <= 5);
        }
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (handle, task) = Hub::spawn(HubConfig::default());
        let mut stats = handle.watch_stats();

        let (tx, mut rx) = outbound_queue(8);
        let outcome = handle
            .admit(Admission::new("a".into(), "alice", tx))
            .await
            .unwrap();
        assert!(outcome.is_admitted());
        assert_eq!(handle.stats().members, 1);

        handle
            .broadcast(Envelope::chat("hi", "alice", "a"))
            .await
            .unwrap();
        handle.depart("a".into()).await.unwrap();

        let mut kinds = Vec::new();
        while let Some(item) = rx.recv().await {
            if let Outbound::Envelope(e) = item {
                kinds.push(e.kind);
            }
        }
        assert_eq!(kinds, vec![MessageKind::System, MessageKind::Chat]);

        stats.wait_for(|s| s.members == 0).await.unwrap();

        drop(stats);
        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_hub() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);

        assert!(handle.is_closed());
        let (tx, _rx) = outbound_queue(1);
        assert!(matches!(
            handle.admit(Admission::new("a".into(), "alice", tx)).await,
            Err(HubError::Closed)
        ));
        assert!(handle.depart("a".into()).await.is_err());
    }
}
