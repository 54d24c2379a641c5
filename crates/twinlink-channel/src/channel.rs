//! [`UpdateChannel`] – the persistent relay connection.
//!
//! State machine: `Connecting → Open → Closed → Reconnecting → Connecting →
//! …`, terminating in `Abandoned` once the reconnect budget is spent.  The
//! current state is published through a [`watch`] channel so the hosting
//! application can observe the terminal condition and alert an operator.
//!
//! Inbound frames are decoded and dispatched into the shared
//! [`TwinSession`][twinlink_engine::TwinSession]: updates go through the
//! propagation engine, selections through the selection state.  Malformed
//! frames are logged and dropped without disturbing the connection.  There
//! is no replay of missed updates – most-recent state wins.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Notify, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use twinlink_engine::{DeltaMode, SelectionOrigin, SharedSession};
use twinlink_types::{ConnectionState, TwinError};

use crate::backoff::ReconnectPolicy;
use crate::pending::PendingQueue;
use crate::protocol::{self, ChannelMessage, WireKind};

/// Static configuration of one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Relay endpoint, e.g. `ws://localhost:8767`.
    pub url: String,
    /// How update triples are interpreted.
    pub kind: WireKind,
    /// Propagation mode applied to decoded deltas.
    pub mode: DeltaMode,
    pub policy: ReconnectPolicy,
    /// Capacity of the not-yet-ready holding queue.
    pub pending_capacity: usize,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: WireKind::default(),
            mode: DeltaMode::AdditiveLocal,
            policy: ReconnectPolicy::default(),
            pending_capacity: 32,
        }
    }
}

/// Point-in-time health snapshot for operator tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealth {
    pub state: ConnectionState,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub pending: usize,
}

pub struct UpdateChannel {
    config: ChannelConfig,
    session: SharedSession,
    state_tx: watch::Sender<ConnectionState>,
    /// Bumped by [`shutdown`][Self::shutdown]; a reconnect timer that fires
    /// under an older generation is a detected no-op.
    generation: AtomicU64,
    shutdown: Notify,
    pending: StdMutex<PendingQueue>,
    connected_since: StdMutex<Option<DateTime<Utc>>>,
    last_message_at: StdMutex<Option<DateTime<Utc>>>,
}

impl UpdateChannel {
    pub fn new(config: ChannelConfig, session: SharedSession) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let pending = PendingQueue::new(config.pending_capacity);
        Self {
            config,
            session,
            state_tx,
            generation: AtomicU64::new(0),
            shutdown: Notify::new(),
            pending: StdMutex::new(pending),
            connected_since: StdMutex::new(None),
            last_message_at: StdMutex::new(None),
        }
    }

    /// Observe connection state changes, including the terminal
    /// [`ConnectionState::Abandoned`].
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn health(&self) -> ChannelHealth {
        ChannelHealth {
            state: *self.state_tx.borrow(),
            connected_since: *self.connected_since.lock().unwrap(),
            last_message_at: *self.last_message_at.lock().unwrap(),
            pending: self.pending.lock().unwrap().len(),
        }
    }

    /// Stop the channel.  Both a sleeping reconnect timer and an idle open
    /// connection wake up and exit.
    pub fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Drive the channel until shut down or abandoned.
    ///
    /// # Errors
    ///
    /// [`TwinError::ReconnectExhausted`] when the retry budget is spent.  A
    /// [`shutdown`][Self::shutdown] produces `Ok(())`.
    pub async fn run(&self) -> Result<(), TwinError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut attempts: u32 = 0;

        loop {
            if self.generation.load(Ordering::SeqCst) != generation {
                info!("channel shut down");
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            debug!(url = %self.config.url, "connecting to relay");

            match connect_async(self.config.url.as_str()).await {
                Ok((ws, _response)) => {
                    attempts = 0;
                    *self.connected_since.lock().unwrap() = Some(Utc::now());
                    self.set_state(ConnectionState::Open);
                    info!(url = %self.config.url, "update channel open");

                    match self.serve(ws, generation).await {
                        Ok(()) => info!("relay closed the connection"),
                        Err(e) => warn!(error = %e, "connection lost"),
                    }
                    *self.connected_since.lock().unwrap() = None;
                    self.set_state(ConnectionState::Closed);
                }
                Err(e) => {
                    warn!(url = %self.config.url, error = %e, "connect failed");
                }
            }

            if self.generation.load(Ordering::SeqCst) != generation {
                info!("channel shut down");
                return Ok(());
            }

            if self.config.policy.exhausted(attempts) {
                error!(attempts, "reconnect attempts exhausted; abandoning channel");
                self.set_state(ConnectionState::Abandoned { attempts });
                return Err(TwinError::ReconnectExhausted { attempts });
            }

            let delay = self.config.policy.delay(attempts);
            attempts += 1;
            self.set_state(ConnectionState::Reconnecting { attempt: attempts });
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = attempts,
                "scheduling reconnect"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => {}
            }
            if self.generation.load(Ordering::SeqCst) != generation {
                info!("stale reconnect timer; channel superseded");
                return Ok(());
            }
        }
    }

    /// Pump one established connection until it closes.
    async fn serve(
        &self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        generation: u64,
    ) -> Result<(), TwinError> {
        let (mut tx, mut rx) = ws.split();

        // Announce an already-active selection so the relay's other peers
        // converge on it.  Nothing else is replayed.
        let announce = {
            let session = self.session.lock().await;
            session.selection().map(protocol::encode_select)
        };
        if let Some(frame) = announce {
            tx.send(Message::Text(frame.into()))
                .await
                .map_err(|e| TwinError::Connection(e.to_string()))?;
        }

        // The registry may have become ready while we were disconnected.
        self.flush_pending().await;

        loop {
            let message = tokio::select! {
                message = rx.next() => message,
                _ = self.shutdown.notified() => return Ok(()),
            };
            if self.generation.load(Ordering::SeqCst) != generation {
                return Ok(());
            }
            match message {
                Some(Ok(Message::Text(text))) => {
                    *self.last_message_at.lock().unwrap() = Some(Utc::now());
                    self.handle_frame(text.as_str()).await;
                }
                Some(Ok(Message::Ping(payload))) => {
                    if tx.send(Message::Pong(payload)).await.is_err() {
                        return Ok(());
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TwinError::Connection(e.to_string())),
            }
        }
    }

    /// Decode and dispatch one frame.  All failures are local: log, drop,
    /// keep the connection.
    async fn handle_frame(&self, text: &str) {
        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        match message {
            ChannelMessage::Select { name } => {
                self.session
                    .lock()
                    .await
                    .select(name, SelectionOrigin::Remote);
            }
            ChannelMessage::Update { name, location } => {
                let delta = protocol::frame_to_delta(&location, self.config.kind);
                self.apply_or_queue(name, delta).await;
            }
        }
    }

    async fn apply_or_queue(&self, name: String, delta: twinlink_engine::Delta) {
        // Anything still parked from the not-ready window goes first so
        // per-entity arrival order is preserved.
        self.flush_pending().await;

        let mut session = self.session.lock().await;
        if !session.is_ready() {
            drop(session);
            let mut pending = self.pending.lock().unwrap();
            if pending.push(name.clone(), delta) {
                debug!(entity = %name, queued = pending.len(), "registry not ready; update queued");
            }
            return;
        }

        match session
            .propagate_delta(&name, &delta, self.config.mode)
            .await
        {
            Ok(touched) => debug!(entity = %name, touched, "update applied"),
            Err(e) => warn!(entity = %name, error = %e, "dropping update"),
        }
    }

    /// Apply queued updates once the registry is ready.  Each queued entry
    /// is applied exactly once; if the registry is still not ready the
    /// entries are re-queued untouched.
    pub async fn flush_pending(&self) {
        let drained = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                return;
            }
            pending.drain()
        };

        let mut session = self.session.lock().await;
        if !session.is_ready() {
            drop(session);
            let mut pending = self.pending.lock().unwrap();
            for update in drained {
                pending.push(update.name, update.delta);
            }
            return;
        }

        let count = drained.len();
        for update in drained {
            match session
                .propagate_delta(&update.name, &update.delta, self.config.mode)
                .await
            {
                Ok(touched) => debug!(entity = %update.name, touched, "queued update applied"),
                Err(e) => warn!(entity = %update.name, error = %e, "dropping queued update"),
            }
        }
        info!(count, "flushed pending updates");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::accept_async;
    use twinlink_engine::TwinSession;
    use twinlink_math::{EPSILON, euler_deg_to_quat, same_rotation};
    use twinlink_scene::{PartFilter, SimScene};

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts,
        }
    }

    async fn ready_session(scene: SimScene) -> (Arc<SimScene>, SharedSession) {
        let scene = Arc::new(scene);
        let session = TwinSession::shared(
            Arc::clone(&scene) as Arc<dyn twinlink_scene::SceneBackend>,
            PartFilter::default(),
        );
        twinlink_engine::refresh_shared(&session).await;
        (scene, session)
    }

    /// One-shot relay: sends `frames`, then collects everything the client
    /// sent and closes.
    async fn spawn_relay(frames: Vec<String>) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();

            let mut received = Vec::new();
            // Pick up the client's selection announce, if any.
            if let Ok(Some(Ok(Message::Text(text)))) =
                tokio::time::timeout(Duration::from_millis(200), rx.next()).await
            {
                received.push(text.as_str().to_string());
            }

            for frame in frames {
                tx.send(Message::Text(frame.into())).await.unwrap();
            }
            let _ = tx.send(Message::Close(None)).await;
            // Drain until the client acknowledges the close.
            while let Ok(Some(Ok(message))) =
                tokio::time::timeout(Duration::from_millis(500), rx.next()).await
            {
                if let Message::Text(text) = message {
                    received.push(text.as_str().to_string());
                }
            }
            received
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn malformed_frame_does_not_kill_the_connection() {
        let (scene, ids) = SimScene::demo_chain(2, 1.0);
        let (scene, session) = ready_session(scene).await;

        let (addr, relay) = spawn_relay(vec![
            "{not json".to_string(),
            r#"{"name": "part_1", "location": [0.0, 90.0, 0.0]}"#.to_string(),
        ])
        .await;

        let mut config = ChannelConfig::new(format!("ws://{addr}"));
        config.policy = fast_policy(0);
        let channel = UpdateChannel::new(config, session);

        // The relay closes after its frames; a zero-attempt budget turns
        // that into a quick terminal state.
        let result = channel.run().await;
        assert!(matches!(
            result,
            Err(TwinError::ReconnectExhausted { attempts: 0 })
        ));

        // The valid update (after the malformed one) was applied.
        let pose = scene.pose_of(ids[0]).unwrap();
        assert!(same_rotation(pose.orientation, euler_deg_to_quat(0.0, 90.0, 0.0)));
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn active_selection_is_announced_on_open() {
        let (scene, _ids) = SimScene::demo_chain(2, 1.0);
        let (_scene, session) = ready_session(scene).await;
        session
            .lock()
            .await
            .select("part_2", SelectionOrigin::Local);

        let (addr, relay) = spawn_relay(Vec::new()).await;

        let mut config = ChannelConfig::new(format!("ws://{addr}"));
        config.policy = fast_policy(0);
        let channel = UpdateChannel::new(config, session);
        let _ = channel.run().await;

        let received = relay.await.unwrap();
        assert_eq!(received, vec![r#"{"select":"part_2"}"#.to_string()]);
    }

    #[tokio::test]
    async fn remote_selection_reaches_the_session() {
        let (scene, _ids) = SimScene::demo_chain(2, 1.0);
        let (_scene, session) = ready_session(scene).await;

        let (addr, relay) = spawn_relay(vec![r#"{"select": "part_1"}"#.to_string()]).await;

        let mut config = ChannelConfig::new(format!("ws://{addr}"));
        config.policy = fast_policy(0);
        let channel = UpdateChannel::new(config, Arc::clone(&session));
        let _ = channel.run().await;

        assert_eq!(session.lock().await.selection(), Some("part_1"));
        relay.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_exhaustion_follows_the_backoff_schedule() {
        // Bind then drop a listener so the port refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let scene = SimScene::new();
        let session = TwinSession::shared(Arc::new(scene), PartFilter::default());
        let channel = UpdateChannel::new(ChannelConfig::new(format!("ws://{addr}")), session);
        let mut state = channel.watch_state();

        let started = tokio::time::Instant::now();
        let result = channel.run().await;

        assert_eq!(result, Err(TwinError::ReconnectExhausted { attempts: 5 }));
        assert_eq!(
            *state.borrow_and_update(),
            ConnectionState::Abandoned { attempts: 5 }
        );
        // Five scheduled retries: 1 + 2 + 4 + 8 + 10 seconds of (paused)
        // timer waits; the sixth failure schedules nothing.
        assert_eq!(started.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test]
    async fn shutdown_cancels_a_sleeping_reconnect_timer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let scene = SimScene::new();
        let session = TwinSession::shared(Arc::new(scene), PartFilter::default());
        let mut config = ChannelConfig::new(format!("ws://{addr}"));
        // Long enough that the test only passes if shutdown interrupts it.
        config.policy = ReconnectPolicy {
            base: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            max_attempts: 5,
        };
        let channel = Arc::new(UpdateChannel::new(config, session));

        let runner = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.run().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("shutdown must interrupt the backoff sleep")
            .unwrap();
        assert_eq!(result, Ok(()));
        assert!(!channel.watch_state().borrow().is_terminal());
    }

    #[tokio::test]
    async fn shutdown_interrupts_an_idle_open_connection() {
        let (scene, _ids) = SimScene::demo_chain(1, 0.0);
        let (_scene, session) = ready_session(scene).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = accept_async(stream).await.unwrap();
            // Hold the connection open without sending anything.
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let channel = Arc::new(UpdateChannel::new(
            ChannelConfig::new(format!("ws://{addr}")),
            session,
        ));
        let runner = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.run().await })
        };

        let mut state = channel.watch_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Open),
        )
        .await
        .expect("channel must reach the open state")
        .unwrap();

        channel.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("shutdown must interrupt an idle connection")
            .unwrap();
        assert_eq!(result, Ok(()));
        relay.abort();
    }

    #[tokio::test]
    async fn updates_queue_until_registry_ready_and_flush_once() {
        let (scene, ids) = SimScene::demo_chain(2, 1.0);
        let scene = Arc::new(scene);
        let session = TwinSession::shared(
            Arc::clone(&scene) as Arc<dyn twinlink_scene::SceneBackend>,
            PartFilter::default(),
        );
        let channel = UpdateChannel::new(
            ChannelConfig::new("ws://unused.invalid"),
            Arc::clone(&session),
        );

        // Registry empty: the same frame twice collapses to one queued entry.
        let frame = r#"{"name": "part_1", "location": [0.0, 90.0, 0.0]}"#;
        channel.handle_frame(frame).await;
        channel.handle_frame(frame).await;
        assert_eq!(channel.health().pending, 1);

        // Still not ready: a flush re-queues rather than dropping.
        channel.flush_pending().await;
        assert_eq!(channel.health().pending, 1);

        twinlink_engine::refresh_shared(&session).await;
        channel.flush_pending().await;
        assert_eq!(channel.health().pending, 0);

        // Applied exactly once: 90°, not 180°.
        let pose = scene.pose_of(ids[0]).unwrap();
        assert!(same_rotation(pose.orientation, euler_deg_to_quat(0.0, 90.0, 0.0)));

        // A second flush is a no-op.
        channel.flush_pending().await;
        let pose = scene.pose_of(ids[0]).unwrap();
        assert!(same_rotation(pose.orientation, euler_deg_to_quat(0.0, 90.0, 0.0)));
    }

    #[tokio::test]
    async fn translation_wire_kind_applies_world_frame_moves() {
        let (scene, ids) = SimScene::demo_chain(3, 0.0);
        let (scene, session) = ready_session(scene).await;

        let (addr, relay) = spawn_relay(vec![
            r#"{"name": "part_1", "location": [1.0, 0.0, 0.0]}"#.to_string(),
        ])
        .await;

        let mut config = ChannelConfig::new(format!("ws://{addr}"));
        config.kind = WireKind::Translation;
        config.mode = DeltaMode::WorldFrame;
        config.policy = fast_policy(0);
        let channel = UpdateChannel::new(config, session);
        let _ = channel.run().await;

        // The root's local position absorbs the whole move; descendants
        // keep identity locals because the chain moved rigidly.
        let root_pose = scene.pose_of(ids[0]).unwrap();
        assert!((root_pose.position - DVec3::X).length() < EPSILON);
        for id in &ids[1..] {
            let pose = scene.pose_of(*id).unwrap();
            assert!(pose.position.length() < EPSILON, "pose={pose:?}");
        }
        relay.await.unwrap();
    }
}
