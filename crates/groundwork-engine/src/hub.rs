//! Realtime graph hub
//!
//! Per-application fan-out of graph-change events to streaming
//! subscribers. A single dispatcher task owns the subscriber map; all
//! mutations arrive by message. Delivery is best-effort: a full
//! broadcast channel drops the publish after a bounded wait and never
//! back-pressures workflow progress. A failed delivery unregisters that
//! subscriber only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Messages delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum GraphMessage {
    /// Full graph snapshot, sent once on registration.
    Snapshot(serde_json::Value),
    /// Incremental update.
    Update(serde_json::Value),
    /// Liveness probe; subscribers answer with `pong`.
    Ping,
}

/// Builds the initial snapshot for a subscriber.
#[async_trait]
pub trait GraphSource: Send + Sync + 'static {
    async fn snapshot(&self, app_name: &str) -> anyhow::Result<serde_json::Value>;
}

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bound of the command/broadcast channel.
    pub broadcast_buffer: usize,
    /// Bound of each subscriber's delivery channel.
    pub subscriber_buffer: usize,
    /// How long a publish may wait on a full channel before dropping.
    pub publish_timeout: Duration,
    /// Protocol ping cadence.
    pub ping_interval: Duration,
    /// Read deadline; a subscriber with no pong within it is dropped.
    pub read_deadline: Duration,
    /// Drain budget on shutdown.
    pub shutdown_drain: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_buffer: 256,
            subscriber_buffer: 64,
            publish_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_secs(30),
            read_deadline: Duration::from_secs(60),
            shutdown_drain: Duration::from_secs(5),
        }
    }
}

/// Hub errors
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The publish was dropped (full buffer past the wait budget).
    #[error("broadcast dropped: hub busy")]
    Dropped,

    /// The hub has shut down.
    #[error("hub is closed")]
    Closed,
}

/// A registered subscriber's receiving half.
pub struct Subscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<GraphMessage>,
}

enum Command {
    Register {
        app_name: String,
        reply: oneshot::Sender<Subscription>,
    },
    Unregister {
        app_name: String,
        id: Uuid,
    },
    Pong {
        app_name: String,
        id: Uuid,
    },
    Broadcast {
        app_name: String,
        payload: serde_json::Value,
    },
}

struct Subscriber {
    tx: mpsc::Sender<GraphMessage>,
    last_seen: Instant,
}

/// Handle to the dispatcher task.
pub struct GraphHub {
    cmd_tx: mpsc::Sender<Command>,
    shutdown_tx: watch::Sender<bool>,
    config: HubConfig,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl GraphHub {
    /// Spawn the dispatcher and return the hub handle.
    pub fn new(source: Arc<dyn GraphSource>, config: HubConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.broadcast_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(dispatch_loop(source, config.clone(), cmd_rx, shutdown_rx));

        Self {
            cmd_tx,
            shutdown_tx,
            config,
            dispatcher: parking_lot::Mutex::new(Some(dispatcher)),
        }
    }

    /// Register a subscriber for an application. The first message is a
    /// full snapshot.
    pub async fn register(&self, app_name: &str) -> Result<Subscription, HubError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register {
                app_name: app_name.to_string(),
                reply,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn unregister(&self, app_name: &str, id: Uuid) {
        let _ = self
            .cmd_tx
            .send(Command::Unregister {
                app_name: app_name.to_string(),
                id,
            })
            .await;
    }

    /// Refresh a subscriber's read deadline.
    pub async fn pong(&self, app_name: &str, id: Uuid) {
        let _ = self
            .cmd_tx
            .send(Command::Pong {
                app_name: app_name.to_string(),
                id,
            })
            .await;
    }

    /// Publish an update to every subscriber of an application. Waits at
    /// most the publish timeout on a full buffer, then drops.
    pub async fn broadcast(
        &self,
        app_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        let command = Command::Broadcast {
            app_name: app_name.to_string(),
            payload,
        };
        match self.cmd_tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HubError::Closed),
            Err(mpsc::error::TrySendError::Full(command)) => {
                match tokio::time::timeout(self.config.publish_timeout, self.cmd_tx.send(command))
                    .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(HubError::Closed),
                    Err(_) => {
                        error!(app = %app_name, "graph broadcast dropped after publish timeout");
                        Err(HubError::Dropped)
                    }
                }
            }
        }
    }

    /// Close all subscribers and drain in-flight broadcasts up to the
    /// shutdown budget.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.config.shutdown_drain, handle)
                .await
                .is_err()
            {
                warn!("hub dispatcher did not drain before deadline");
            }
        }
    }
}

async fn dispatch_loop(
    source: Arc<dyn GraphSource>,
    config: HubConfig,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut subscribers: HashMap<String, HashMap<Uuid, Subscriber>> = HashMap::new();
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    Some(command) => {
                        handle_command(&source, &config, &mut subscribers, command).await;
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                sweep(&mut subscribers, config.read_deadline);
            }
            _ = shutdown_rx.changed() => {
                // drain whatever is already queued, then close everyone
                while let Ok(command) = cmd_rx.try_recv() {
                    handle_command(&source, &config, &mut subscribers, command).await;
                }
                let total: usize = subscribers.values().map(|s| s.len()).sum();
                info!(subscribers = total, "hub shutting down");
                subscribers.clear();
                break;
            }
        }
    }

    debug!("hub dispatcher exited");
}

async fn handle_command(
    source: &Arc<dyn GraphSource>,
    config: &HubConfig,
    subscribers: &mut HashMap<String, HashMap<Uuid, Subscriber>>,
    command: Command,
) {
    match command {
        Command::Register { app_name, reply } => {
            let (tx, rx) = mpsc::channel(config.subscriber_buffer);
            let id = Uuid::now_v7();

            let snapshot = match source.snapshot(&app_name).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(app = %app_name, "snapshot query failed: {}", e);
                    serde_json::json!({ "nodes": [] })
                }
            };
            let _ = tx.try_send(GraphMessage::Snapshot(snapshot));

            subscribers.entry(app_name.clone()).or_default().insert(
                id,
                Subscriber {
                    tx,
                    last_seen: Instant::now(),
                },
            );
            debug!(app = %app_name, %id, "subscriber registered");
            let _ = reply.send(Subscription { id, rx });
        }

        Command::Unregister { app_name, id } => {
            if let Some(app_subs) = subscribers.get_mut(&app_name) {
                app_subs.remove(&id);
                if app_subs.is_empty() {
                    subscribers.remove(&app_name);
                }
            }
            debug!(app = %app_name, %id, "subscriber unregistered");
        }

        Command::Pong { app_name, id } => {
            if let Some(subscriber) = subscribers
                .get_mut(&app_name)
                .and_then(|subs| subs.get_mut(&id))
            {
                subscriber.last_seen = Instant::now();
            }
        }

        Command::Broadcast { app_name, payload } => {
            let Some(app_subs) = subscribers.get_mut(&app_name) else {
                return;
            };
            let mut dead = Vec::new();
            for (id, subscriber) in app_subs.iter() {
                if subscriber
                    .tx
                    .try_send(GraphMessage::Update(payload.clone()))
                    .is_err()
                {
                    // a stalled or closed subscriber never affects others
                    dead.push(*id);
                }
            }
            for id in dead {
                warn!(app = %app_name, %id, "dropping unresponsive subscriber");
                app_subs.remove(&id);
            }
            if app_subs.is_empty() {
                subscribers.remove(&app_name);
            }
        }
    }
}

fn sweep(subscribers: &mut HashMap<String, HashMap<Uuid, Subscriber>>, deadline: Duration) {
    subscribers.retain(|app_name, app_subs| {
        app_subs.retain(|id, subscriber| {
            if subscriber.last_seen.elapsed() > deadline {
                warn!(app = %app_name, %id, "subscriber missed read deadline");
                return false;
            }
            subscriber.tx.try_send(GraphMessage::Ping).is_ok()
        });
        !app_subs.is_empty()
    });
}

/// Snapshot source backed by the resource store: one node per resource
/// instance with its lifecycle state.
pub struct ResourceGraphSource {
    store: Arc<dyn crate::persistence::ResourceStore>,
}

impl ResourceGraphSource {
    pub fn new(store: Arc<dyn crate::persistence::ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl GraphSource for ResourceGraphSource {
    async fn snapshot(&self, app_name: &str) -> anyhow::Result<serde_json::Value> {
        let resources = self.store.list_resources(app_name).await?;
        let nodes: Vec<serde_json::Value> = resources
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "name": r.resource_name,
                    "type": r.resource_type,
                    "state": r.state,
                    "health": r.health_status,
                })
            })
            .collect();
        Ok(serde_json::json!({ "app": app_name, "nodes": nodes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySource;

    #[async_trait]
    impl GraphSource for EmptySource {
        async fn snapshot(&self, app_name: &str) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({ "app": app_name, "nodes": [] }))
        }
    }

    fn hub() -> GraphHub {
        GraphHub::new(Arc::new(EmptySource), HubConfig::default())
    }

    #[tokio::test]
    async fn snapshot_arrives_first() {
        let hub = hub();
        let mut sub = hub.register("shop").await.unwrap();

        let first = sub.rx.recv().await.unwrap();
        assert!(matches!(first, GraphMessage::Snapshot(_)));
    }

    #[tokio::test]
    async fn fanout_preserves_order_across_subscribers() {
        let hub = hub();
        let mut subs = Vec::new();
        for _ in 0..3 {
            let mut sub = hub.register("shop").await.unwrap();
            // consume snapshot
            let _ = sub.rx.recv().await.unwrap();
            subs.push(sub);
        }

        for n in 0..10 {
            hub.broadcast("shop", serde_json::json!({ "seq": n }))
                .await
                .unwrap();
        }

        for sub in &mut subs {
            for n in 0..10 {
                let message = sub.rx.recv().await.unwrap();
                match message {
                    GraphMessage::Update(payload) => {
                        assert_eq!(payload["seq"], serde_json::json!(n));
                    }
                    other => panic!("unexpected message: {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_peers() {
        let hub = hub();
        let mut keep = hub.register("shop").await.unwrap();
        let _ = keep.rx.recv().await.unwrap();
        let drop_me = hub.register("shop").await.unwrap();

        hub.broadcast("shop", serde_json::json!({ "seq": 0 }))
            .await
            .unwrap();
        assert!(matches!(
            keep.rx.recv().await.unwrap(),
            GraphMessage::Update(_)
        ));

        drop(drop_me);
        hub.broadcast("shop", serde_json::json!({ "seq": 1 }))
            .await
            .unwrap();
        let message = keep.rx.recv().await.unwrap();
        assert_eq!(
            message,
            GraphMessage::Update(serde_json::json!({ "seq": 1 }))
        );
    }

    #[tokio::test]
    async fn broadcasts_are_scoped_per_app() {
        let hub = hub();
        let mut a = hub.register("app-a").await.unwrap();
        let _ = a.rx.recv().await.unwrap();
        let mut b = hub.register("app-b").await.unwrap();
        let _ = b.rx.recv().await.unwrap();

        hub.broadcast("app-a", serde_json::json!({ "only": "a" }))
            .await
            .unwrap();

        assert!(matches!(
            a.rx.recv().await.unwrap(),
            GraphMessage::Update(_)
        ));
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_subscribers() {
        let hub = hub();
        let mut sub = hub.register("shop").await.unwrap();
        let _ = sub.rx.recv().await.unwrap();

        hub.shutdown().await;
        assert!(sub.rx.recv().await.is_none());
    }
}
