//! Behavioral tests for the bounded connection pool: capacity bounds, LRU
//! eviction, health-probe replacement, idle reclamation, and the fail-fast
//! busy-slot semantics.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use remex::prelude::*;

fn pool_with(max_connections: usize, factory_config: &EngineConfig) -> ConnectionPool {
    let pool_config = PoolConfig::new()
        .max_connections(max_connections)
        .idle_timeout(Duration::from_millis(100))
        .cleanup_interval(Duration::from_millis(25));
    ConnectionPool::with_config(Arc::new(factory_config.clone()), pool_config)
}

#[tokio::test]
async fn acquire_creates_then_reuses_the_same_connection() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());
    let web = host("web01");

    let first = pool.acquire(&web, &factory).await.unwrap();
    let first_conn = first.connection();
    pool.release(first.key()).await;

    let second = pool.acquire(&web, &factory).await.unwrap();
    let second_conn = second.connection();
    pool.release(second.key()).await;

    // The creator ran exactly once; both leases saw the same handle.
    assert_eq!(factory.connect_count(), 1);
    assert!(Arc::ptr_eq(&first_conn, &second_conn));
    assert_eq!(
        pool.get_stats().await,
        PoolStats {
            total: 1,
            in_use: 0,
            idle: 1
        }
    );
}

#[tokio::test]
async fn reuse_runs_the_canary_probe() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());
    let web = host("web01");

    let handle = pool.acquire(&web, &factory).await.unwrap();
    pool.release(handle.key()).await;
    let handle = pool.acquire(&web, &factory).await.unwrap();
    pool.release(handle.key()).await;

    let executed = factory.connection_for("web01").unwrap().executed();
    assert_eq!(executed, vec!["echo test".to_string()]);
}

#[tokio::test]
async fn size_never_exceeds_max_connections() {
    let factory = MockFactory::new();
    let pool = pool_with(2, &test_config());

    for name in ["a", "b", "c", "d", "e"] {
        let handle = pool.acquire(&host(name), &factory).await.unwrap();
        assert!(pool.get_stats().await.total <= 2, "bound violated at {name}");
        pool.release(handle.key()).await;
    }
}

#[tokio::test]
async fn lru_eviction_prefers_the_oldest_idle_entry() {
    let factory = MockFactory::new();
    let pool = pool_with(2, &test_config());

    let a = pool.acquire(&host("hostA"), &factory).await.unwrap();
    pool.release(a.key()).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let b = pool.acquire(&host("hostB"), &factory).await.unwrap();
    pool.release(b.key()).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let c = pool.acquire(&host("hostC"), &factory).await.unwrap();
    pool.release(c.key()).await;

    // A was least recently used, so A went, B stayed.
    assert_eq!(pool.get_stats().await.total, 2);
    assert!(factory.connection_for("hostA").unwrap().is_closed());
    assert!(!factory.connection_for("hostB").unwrap().is_closed());

    // Reacquiring B must not create a new connection.
    let b2 = pool.acquire(&host("hostB"), &factory).await.unwrap();
    pool.release(b2.key()).await;
    assert_eq!(factory.connect_count(), 3);
}

#[tokio::test]
async fn capacity_pressure_evicts_an_in_use_entry_as_a_last_resort() {
    let factory = MockFactory::new();
    let pool = pool_with(1, &test_config());

    let a = pool.acquire(&host("hostA"), &factory).await.unwrap();
    // A is still leased; acquiring a different host must close it anyway
    // rather than deadlock.
    let b = pool.acquire(&host("hostB"), &factory).await.unwrap();

    assert!(factory.connection_for("hostA").unwrap().is_closed());
    assert_eq!(pool.get_stats().await.total, 1);
    pool.release(b.key()).await;
    pool.release(a.key()).await;
}

#[tokio::test]
async fn second_acquire_for_a_busy_host_fails_fast() {
    let factory = MockFactory::new();
    let pool = pool_with(1, &test_config());
    let web = host("hostA");

    let first = pool.acquire(&web, &factory).await.unwrap();
    let second = pool.acquire(&web, &factory).await;
    assert!(matches!(second, Err(Error::HostBusy { .. })));

    // Only one connection was ever opened for the key.
    assert_eq!(factory.connect_count(), 1);
    pool.release(first.key()).await;
}

#[tokio::test]
async fn failed_health_probe_replaces_the_connection() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());
    let web = host("web01");

    let handle = pool.acquire(&web, &factory).await.unwrap();
    pool.release(handle.key()).await;

    let stale = factory.connection_for("web01").unwrap();
    stale.set_healthy(false);

    let fresh = pool.acquire(&web, &factory).await.unwrap();
    pool.release(fresh.key()).await;

    assert_eq!(factory.connect_count(), 2);
    assert!(stale.is_closed());
    let replacement = factory.connection_for("web01").unwrap();
    assert!(!Arc::ptr_eq(&stale, &replacement));
    assert_eq!(pool.get_stats().await.total, 1);
}

#[tokio::test]
async fn idle_sweep_reclaims_old_idle_entries_only() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());

    let idle = pool.acquire(&host("idle01"), &factory).await.unwrap();
    pool.release(idle.key()).await;
    let busy = pool.acquire(&host("busy01"), &factory).await.unwrap();

    // Both entries age past the idle timeout; only the released one goes.
    tokio::time::sleep(Duration::from_millis(150)).await;
    pool.sweep_idle().await;

    let stats = pool.get_stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.in_use, 1);
    assert!(factory.connection_for("idle01").unwrap().is_closed());
    assert!(!factory.connection_for("busy01").unwrap().is_closed());
    pool.release(busy.key()).await;
}

#[tokio::test]
async fn started_pool_sweeps_in_the_background() {
    let factory = MockFactory::new();
    let pool = Arc::new(pool_with(4, &test_config()));
    pool.start();

    let handle = pool.acquire(&host("web01"), &factory).await.unwrap();
    pool.release(handle.key()).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.get_stats().await.total, 0);
    pool.close_all().await;
}

#[tokio::test]
async fn release_bumps_the_timestamp_and_protects_from_the_sweep() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());
    let web = host("web01");

    let handle = pool.acquire(&web, &factory).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    // Older than the idle timeout, but the release refreshes the timestamp.
    pool.release(handle.key()).await;
    pool.sweep_idle().await;

    assert_eq!(pool.get_stats().await.total, 1);
}

#[tokio::test]
async fn remove_closes_and_deletes() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());
    let web = host("web01");

    let handle = pool.acquire(&web, &factory).await.unwrap();
    let key = handle.key().to_string();
    pool.release(&key).await;
    pool.remove(&key).await;

    assert!(factory.connection_for("web01").unwrap().is_closed());
    assert_eq!(pool.get_stats().await.total, 0);
}

#[tokio::test]
async fn connect_failure_propagates_and_refunds_nothing() {
    let factory = MockFactory::new();
    factory.set_behavior("down01", HostBehavior::failing_connect("no route to host"));
    let pool = pool_with(4, &test_config());

    let result = pool.acquire(&host("down01"), &factory).await;
    assert!(matches!(result, Err(Error::Connection { .. })));
    assert_eq!(pool.get_stats().await.total, 0);

    // The next acquire re-evaluates capacity from scratch and succeeds once
    // the host comes back.
    factory.set_behavior("down01", HostBehavior::default());
    let handle = pool.acquire(&host("down01"), &factory).await.unwrap();
    pool.release(handle.key()).await;
    assert_eq!(pool.get_stats().await.total, 1);
}

#[tokio::test]
async fn close_all_closes_everything_and_rejects_new_acquires() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());

    let a = pool.acquire(&host("a"), &factory).await.unwrap();
    pool.release(a.key()).await;
    let b = pool.acquire(&host("b"), &factory).await.unwrap();
    pool.release(b.key()).await;

    pool.close_all().await;

    assert_eq!(pool.get_stats().await.total, 0);
    for connection in factory.connections() {
        assert!(connection.is_closed());
    }
    let result = pool.acquire(&host("a"), &factory).await;
    assert!(matches!(result, Err(Error::PoolClosed)));
}

#[tokio::test]
async fn stats_track_in_use_and_idle() {
    let factory = MockFactory::new();
    let pool = pool_with(4, &test_config());

    let a = pool.acquire(&host("a"), &factory).await.unwrap();
    let b = pool.acquire(&host("b"), &factory).await.unwrap();
    pool.release(b.key()).await;

    assert_eq!(
        pool.get_stats().await,
        PoolStats {
            total: 2,
            in_use: 1,
            idle: 1
        }
    );
    pool.release(a.key()).await;
}
