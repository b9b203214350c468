//! Connection pool: cap enforcement, reuse, eviction, sweep.

mod support;

use std::time::Duration;

use ontconf::{BreakerConfig, PoolConfig};
use ontrol::ErrorKind;
use pretty_assertions::assert_eq;
use support::{plane_with, FakeRouter, FakeState};

fn small_pool() -> PoolConfig {
    PoolConfig {
        max_per_router: 2,
        idle_timeout_secs: 300,
        max_lifetime_secs: 1800,
        cleanup_interval_secs: 30,
        probe_timeout_secs: 2,
    }
}

const DIAL: Duration = Duration::from_secs(5);

#[tokio::test]
async fn cap_rejects_the_third_borrow_until_one_returns() {
    let fake = FakeRouter::start(FakeState::named("alpha")).await;
    let plane = plane_with(
        vec![fake.router("alpha")],
        small_pool(),
        BreakerConfig::default(),
    )
    .await;
    let router = plane.directory.get("alpha").expect("router");

    let first = plane.pool.acquire(&router, DIAL).await.expect("first");
    let second = plane.pool.acquire(&router, DIAL).await.expect("second");

    let err = plane.pool.acquire(&router, DIAL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert_eq!(plane.pool.connection_count("alpha").await, 2);

    // Returning either borrow unblocks the third caller.
    plane.pool.release(first).await;
    let third = plane.pool.acquire(&router, DIAL).await.expect("third");

    plane.pool.release(second).await;
    plane.pool.release(third).await;
}

#[tokio::test]
async fn release_then_acquire_reuses_the_same_connection() {
    let fake = FakeRouter::start(FakeState::named("alpha")).await;
    let plane = plane_with(
        vec![fake.router("alpha")],
        small_pool(),
        BreakerConfig::default(),
    )
    .await;
    let router = plane.directory.get("alpha").expect("router");

    let conn = plane.pool.acquire(&router, DIAL).await.expect("acquire");
    let slot = conn.slot_id();
    plane.pool.release(conn).await;

    let again = plane.pool.acquire(&router, DIAL).await.expect("reacquire");
    assert_eq!(again.slot_id(), slot, "healthy idle connection is reused");
    plane.pool.release(again).await;

    // One TCP connection served both borrows.
    assert_eq!(fake.connections(), 1);
}

#[tokio::test]
async fn borrow_probe_evicts_dead_connections_and_redials() {
    let fake = FakeRouter::start(FakeState::named("alpha")).await;
    let plane = plane_with(
        vec![fake.router("alpha")],
        small_pool(),
        BreakerConfig::default(),
    )
    .await;
    let router = plane.directory.get("alpha").expect("router");

    let conn = plane.pool.acquire(&router, DIAL).await.expect("acquire");
    let dead_slot = conn.slot_id();
    plane.pool.release(conn).await;

    // The fake dies; the pooled stream dies with it, the on-borrow probe
    // evicts it, and the fallback dial fails too.
    fake.kill();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = plane.pool.acquire(&router, DIAL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkUnreachable);
    assert_eq!(
        plane.pool.connection_count("alpha").await,
        0,
        "dead connection {dead_slot} was evicted and the failed dial left no slot"
    );
}

#[tokio::test]
async fn sweep_evicts_idle_connections_past_their_timeout() {
    let fake = FakeRouter::start(FakeState::named("alpha")).await;
    let mut config = small_pool();
    config.idle_timeout_secs = 0; // anything idle is already too old
    let plane = plane_with(
        vec![fake.router("alpha")],
        config,
        BreakerConfig::default(),
    )
    .await;
    let router = plane.directory.get("alpha").expect("router");

    let conn = plane.pool.acquire(&router, DIAL).await.expect("acquire");
    plane.pool.release(conn).await;
    assert_eq!(plane.pool.idle_count("alpha").await, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    plane.pool.sweep().await;
    assert_eq!(plane.pool.connection_count("alpha").await, 0);
}

#[tokio::test]
async fn in_use_connections_survive_the_sweep() {
    let fake = FakeRouter::start(FakeState::named("alpha")).await;
    let mut config = small_pool();
    config.idle_timeout_secs = 0;
    let plane = plane_with(
        vec![fake.router("alpha")],
        config,
        BreakerConfig::default(),
    )
    .await;
    let router = plane.directory.get("alpha").expect("router");

    let conn = plane.pool.acquire(&router, DIAL).await.expect("acquire");
    tokio::time::sleep(Duration::from_millis(20)).await;
    plane.pool.sweep().await;
    assert_eq!(
        plane.pool.connection_count("alpha").await,
        1,
        "borrowed connections are never reaped"
    );
    plane.pool.release(conn).await;
}

#[tokio::test]
async fn shutdown_closes_everything_and_refuses_new_borrows() {
    let fake = FakeRouter::start(FakeState::named("alpha")).await;
    let plane = plane_with(
        vec![fake.router("alpha")],
        small_pool(),
        BreakerConfig::default(),
    )
    .await;
    let router = plane.directory.get("alpha").expect("router");

    let conn = plane.pool.acquire(&router, DIAL).await.expect("acquire");
    plane.pool.release(conn).await;

    plane.pool.shutdown().await;
    assert_eq!(plane.pool.connection_count("alpha").await, 0);

    let err = plane.pool.acquire(&router, DIAL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}
