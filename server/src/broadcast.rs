//! Tick driver and snapshot broadcaster.
//!
//! The driver advances the world at a fixed rate and publishes a snapshot
//! every few ticks on a `watch` channel. The broadcaster picks up the latest
//! snapshot and fans it out through a bounded pool of send tasks, so one
//! slow client can delay at most one pool slot for one send timeout.

use crate::arena::{Arena, RemovalReason};
use crate::framing::write_frame;
use crate::sessions::SessionWriter;
use log::{debug, error, warn};
use shared::protocol::snapshot_frame;
use shared::view::cull_for_viewer;
use shared::WorldSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, timeout, MissedTickBehavior};

pub type SnapshotSender = watch::Sender<Option<Arc<WorldSnapshot>>>;
pub type SnapshotReceiver = watch::Receiver<Option<Arc<WorldSnapshot>>>;

/// How snapshots are delivered.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Concurrent sends in flight.
    pub workers: usize,
    pub send_timeout: Duration,
    /// Send each player only what their camera can see.
    pub cull: bool,
}

/// Pool size for a server admitting `max_players`.
pub fn default_workers(max_players: usize) -> usize {
    (max_players / 4).clamp(4, 64)
}

/// Advances the arena `fps` times per second until the snapshot channel closes.
pub async fn run_tick_driver(arena: Arc<Arena>, fps: u32, broadcast_every: u32, snapshots: SnapshotSender) {
    let fps = fps.max(1);
    let broadcast_every = broadcast_every.max(1);
    let mut ticker = interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks: u64 = 0;

    loop {
        ticker.tick().await;
        ticks += 1;

        let publish = ticks % broadcast_every as u64 == 0;
        let (killed, snapshot) = arena.advance(publish).await;

        // the tick never waits on a socket; notices go out on their own tasks
        for identity in killed {
            if let Some(departure) = arena.detach_session(&identity, RemovalReason::Killed).await {
                tokio::spawn(departure.close());
            }
        }

        if let Some(snapshot) = snapshot {
            if snapshots.send(Some(Arc::new(snapshot))).is_err() {
                debug!("Snapshot channel closed, stopping tick driver");
                break;
            }
        }

        if ticks % fps as u64 == 0 {
            let status = arena.status().await;
            debug!(
                "Tick {}: {} agents, {} resources, {} sessions",
                status.tick, status.agents, status.resources, status.sessions
            );
        }
    }
}

/// Delivers every published snapshot to all sessions until the driver stops.
///
/// Snapshots published while a broadcast is still going are skipped in
/// favour of the newest one.
pub async fn run_broadcaster(arena: Arc<Arena>, mut snapshots: SnapshotReceiver, config: BroadcastConfig) {
    let pool = Arc::new(Semaphore::new(config.workers.max(1)));

    while snapshots.changed().await.is_ok() {
        let latest = snapshots.borrow_and_update().clone();
        let Some(snapshot) = latest else {
            continue;
        };

        let failed = broadcast_snapshot(&arena, snapshot, &pool, &config).await;
        for identity in failed {
            if let Some(departure) = arena.detach_session(&identity, RemovalReason::SendFailed).await {
                tokio::spawn(departure.close());
            }
        }
    }
}

enum Payload {
    Shared(Arc<Vec<u8>>),
    Culled(Arc<WorldSnapshot>),
}

fn frame_for(payload: &Payload, identity: &str) -> Option<Arc<Vec<u8>>> {
    match payload {
        Payload::Shared(frame) => Some(Arc::clone(frame)),
        Payload::Culled(snapshot) => {
            let view = cull_for_viewer(snapshot, identity)?;
            match snapshot_frame(&view) {
                Ok(frame) => Some(Arc::new(frame)),
                Err(e) => {
                    error!("Failed to encode snapshot for {}: {}", identity, e);
                    None
                }
            }
        }
    }
}

async fn send_to(writer: SessionWriter, frame: &[u8], send_timeout: Duration) -> bool {
    let mut out = match timeout(send_timeout, writer.lock()).await {
        Ok(out) => out,
        Err(_) => return false,
    };
    write_frame(&mut *out, frame, send_timeout).await.is_ok()
}

/// Sends one snapshot to every registered session and returns the
/// identities whose send failed or timed out.
///
/// With culling on, players whose agent is missing from the snapshot are
/// skipped; their removal is already under way.
pub async fn broadcast_snapshot(
    arena: &Arena,
    snapshot: Arc<WorldSnapshot>,
    pool: &Arc<Semaphore>,
    config: &BroadcastConfig,
) -> Vec<String> {
    let payload = if config.cull {
        Payload::Culled(snapshot)
    } else {
        match snapshot_frame(&snapshot) {
            Ok(frame) => Payload::Shared(Arc::new(frame)),
            Err(e) => {
                error!("Failed to encode snapshot for tick {}: {}", snapshot.tick, e);
                return Vec::new();
            }
        }
    };
    let payload = Arc::new(payload);

    let mut sends = Vec::new();
    for (identity, writer) in arena.session_writers().await {
        let Ok(permit) = Arc::clone(pool).acquire_owned().await else {
            break;
        };
        let payload = Arc::clone(&payload);
        let send_timeout = config.send_timeout;

        sends.push(tokio::spawn(async move {
            let _permit = permit;
            let frame = frame_for(&payload, &identity)?;
            if send_to(writer, &frame, send_timeout).await {
                None
            } else {
                warn!("Snapshot send to {} failed", identity);
                Some(identity)
            }
        }));
    }

    let mut failed = Vec::new();
    for send in sends {
        match send.await {
            Ok(Some(identity)) => failed.push(identity),
            Ok(None) => {}
            Err(e) => error!("Broadcast task panicked: {}", e),
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::read_message;
    use crate::sessions::session_writer;
    use shared::{Message, Position, World, WorldConfig};
    use std::net::SocketAddr;
    use tokio::io::DuplexStream;
    use tokio::sync::Notify;

    const LIMIT: Duration = Duration::from_secs(1);

    fn test_arena() -> Arena {
        let world = World::new(WorldConfig {
            resource_floor: 0,
            rng_seed: Some(3),
            ..WorldConfig::default()
        });
        Arena::new(world, 8, LIMIT)
    }

    fn config(cull: bool) -> BroadcastConfig {
        BroadcastConfig {
            workers: 2,
            send_timeout: LIMIT,
            cull,
        }
    }

    async fn join(arena: &Arena, port: u16) -> (String, DuplexStream) {
        let (local, mut peer) = tokio::io::duplex(1024 * 1024);
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let identity = arena
            .register(addr, session_writer(local), Arc::new(Notify::new()))
            .await
            .unwrap();
        read_message(&mut peer, LIMIT).await.unwrap();
        (identity, peer)
    }

    async fn move_agent(arena: &Arena, identity: &str, x: i32, y: i32) {
        arena
            .with_world(|w| {
                let color = w.agent(identity).map(|a| a.color).unwrap();
                w.remove_agent(identity);
                w.add_agent(identity, Position::new(x, y), color);
            })
            .await;
    }

    async fn next_snapshot(peer: &mut DuplexStream) -> WorldSnapshot {
        match read_message(peer, LIMIT).await.unwrap() {
            Message::WorldSnapshot(snapshot) => snapshot,
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_default_workers_bounds() {
        assert_eq!(default_workers(1), 4);
        assert_eq!(default_workers(200), 50);
        assert_eq!(default_workers(10_000), 64);
    }

    #[tokio::test]
    async fn test_full_snapshot_reaches_everyone() {
        let arena = test_arena();
        let (a, mut peer_a) = join(&arena, 1).await;
        let (b, mut peer_b) = join(&arena, 2).await;
        move_agent(&arena, &a, 300, 300).await;
        move_agent(&arena, &b, 2700, 2700).await;

        let pool = Arc::new(Semaphore::new(2));
        let snapshot = Arc::new(arena.snapshot().await);
        let failed = broadcast_snapshot(&arena, snapshot, &pool, &config(false)).await;
        assert!(failed.is_empty());

        for peer in [&mut peer_a, &mut peer_b] {
            let snapshot = next_snapshot(peer).await;
            assert!(snapshot.agent(&a).is_some());
            assert!(snapshot.agent(&b).is_some());
        }
    }

    #[tokio::test]
    async fn test_culled_snapshot_hides_distant_agents() {
        let arena = test_arena();
        let (a, mut peer_a) = join(&arena, 1).await;
        let (b, _peer_b) = join(&arena, 2).await;
        move_agent(&arena, &a, 300, 300).await;
        move_agent(&arena, &b, 2700, 2700).await;

        let pool = Arc::new(Semaphore::new(2));
        let snapshot = Arc::new(arena.snapshot().await);
        broadcast_snapshot(&arena, snapshot, &pool, &config(true)).await;

        let seen = next_snapshot(&mut peer_a).await;
        assert!(seen.agent(&a).is_some());
        assert!(seen.agent(&b).is_none());
    }

    #[tokio::test]
    async fn test_dead_peer_reported_as_failed() {
        let arena = test_arena();
        let (a, peer_a) = join(&arena, 1).await;
        let (b, mut peer_b) = join(&arena, 2).await;
        move_agent(&arena, &a, 300, 300).await;
        move_agent(&arena, &b, 2700, 2700).await;
        drop(peer_a);

        let pool = Arc::new(Semaphore::new(1));
        let snapshot = Arc::new(arena.snapshot().await);
        let failed = broadcast_snapshot(&arena, snapshot, &pool, &config(false)).await;

        assert_eq!(failed, vec![a]);
        next_snapshot(&mut peer_b).await;
    }

    #[tokio::test]
    async fn test_broadcaster_removes_failed_sessions() {
        let arena = Arc::new(test_arena());
        let (a, peer_a) = join(&arena, 1).await;
        drop(peer_a);

        let (tx, rx) = watch::channel(None);
        let broadcaster = tokio::spawn(run_broadcaster(Arc::clone(&arena), rx, config(false)));

        tx.send(Some(Arc::new(arena.snapshot().await))).unwrap();
        for _ in 0..50 {
            if arena.status().await.sessions == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(arena.status().await.sessions, 0);
        assert!(arena.with_world(|w| !w.contains_agent(&a)).await);

        drop(tx);
        timeout(LIMIT, broadcaster).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tick_driver_keeps_pace_when_killed_peer_stops_reading() {
        let arena = Arc::new(test_arena());
        // the unread identity frame leaves no room for the death notice
        let (local, peer) = tokio::io::duplex(24);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let identity = arena
            .register(addr, session_writer(local), Arc::new(Notify::new()))
            .await
            .unwrap();
        move_agent(&arena, &identity, 2, 1500).await;

        let (tx, _rx) = watch::channel(None);
        let driver = tokio::spawn(run_tick_driver(Arc::clone(&arena), 100, 1, tx));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let ticks = arena.status().await.tick;
        driver.abort();

        assert_eq!(arena.status().await.sessions, 0);
        assert!(ticks >= 100, "tick driver stalled at {} ticks", ticks);
        drop(peer);
    }

    #[tokio::test]
    async fn test_tick_driver_publishes_and_stops() {
        let arena = Arc::new(test_arena());
        let (tx, mut rx) = watch::channel(None);
        let driver = tokio::spawn(run_tick_driver(Arc::clone(&arena), 200, 2, tx));

        timeout(LIMIT, rx.changed()).await.unwrap().unwrap();
        let published = rx.borrow_and_update().clone().unwrap();
        assert_eq!(published.tick % 2, 0);

        drop(rx);
        timeout(LIMIT, driver).await.unwrap().unwrap();
    }
}
