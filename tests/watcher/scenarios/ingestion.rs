use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use delegation_watcher::{Delegation, Outcome, PollerConfig};

use crate::support::helpers::{start_watcher, wait_until};
use crate::support::memory_store::MemoryStore;
use crate::support::mock_tzkt::{unreachable_endpoint, ChainFixture, MockTzktServer};

fn poller_cfg(start_level: u64) -> PollerConfig {
    PollerConfig {
        start_level,
        retry_attempts: 2,
    }
}

fn seeded_row(block: u64) -> Delegation {
    Delegation {
        timestamp: format!("2024-01-{:02}T00:00:00Z", (block % 27) + 1)
            .parse()
            .unwrap(),
        amount: block * 100,
        delegator: format!("tz1-{block}"),
        block,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_start_backfills_the_gap_in_order() -> Result<()> {
    let fixture = ChainFixture::default();
    fixture.set_head(102);
    fixture.add_delegation(101, "tz1A", 10, "2024-01-01T00:00:00Z");
    fixture.add_delegation(102, "tz1B", 20, "2024-01-02T00:00:00Z");
    let server = MockTzktServer::start(fixture.clone()).await?;

    let store = Arc::new(MemoryStore::default());
    let watcher = start_watcher(server.url(), store.clone(), poller_cfg(100));

    wait_until("tip to reach 102", Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.level() == 102 }
    })
    .await?;

    // Empty level 100 produced no row; 101 and 102 arrived in level order.
    let rows = store.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].block, 101);
    assert_eq!(rows[0].delegator, "tz1A");
    assert_eq!(rows[0].amount, 10);
    assert_eq!(rows[1].block, 102);
    assert_eq!(rows[1].delegator, "tz1B");
    assert_eq!(rows[1].amount, 20);

    // Each level in [100, 102] was fetched exactly once, ascending.
    assert_eq!(fixture.requested_levels(), vec![100, 101, 102]);

    let outcome = watcher.stop().await;
    assert!(!outcome.is_fatal());
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn streamed_heads_follow_the_backfilled_range() -> Result<()> {
    let fixture = ChainFixture::default();
    fixture.set_head(100);
    fixture.add_delegation(98, "tz1C", 30, "2024-02-01T00:00:00Z");
    fixture.add_delegation(99, "tz1D", 40, "2024-02-02T00:00:00Z");
    fixture.add_delegation(100, "tz1E", 50, "2024-02-03T00:00:00Z");
    fixture.add_delegation(101, "tz1F", 60, "2024-02-04T00:00:00Z");
    let server = MockTzktServer::start(fixture.clone()).await?;

    let store = Arc::new(MemoryStore::default());
    store.seed(vec![seeded_row(97)]);
    let watcher = start_watcher(server.url(), store.clone(), poller_cfg(0));

    server
        .wait_for_sessions(1, Duration::from_secs(5))
        .await?;
    // Announce a new head while backfill for [98, 100] may still be running;
    // the streamed fetch must wait its turn.
    server.push_head(101);

    wait_until("tip to reach 101", Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.level() == 101 }
    })
    .await?;

    assert_eq!(fixture.requested_levels(), vec![98, 99, 100, 101]);

    let blocks: Vec<u64> = store.rows().iter().map(|row| row.block).collect();
    assert_eq!(blocks, vec![97, 98, 99, 100, 101]);

    let outcome = watcher.stop().await;
    assert!(!outcome.is_fatal());
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reorg_rolls_back_everything_at_or_above_the_level() -> Result<()> {
    let fixture = ChainFixture::default();
    fixture.set_head(60);
    let server = MockTzktServer::start(fixture).await?;

    let store = Arc::new(MemoryStore::default());
    store.seed(vec![
        seeded_row(48),
        seeded_row(49),
        seeded_row(50),
        seeded_row(55),
        seeded_row(60),
    ]);
    let watcher = start_watcher(server.url(), store.clone(), poller_cfg(0));

    server
        .wait_for_sessions(1, Duration::from_secs(5))
        .await?;
    server.push_reorg(50);

    wait_until("rollback to land", Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.level() <= 49 }
    })
    .await?;

    let blocks: Vec<u64> = store.rows().iter().map(|row| row.block).collect();
    assert_eq!(blocks, vec![48, 49]);
    assert_eq!(watcher.telemetry.reorg_messages(), 1);

    let outcome = watcher.stop().await;
    assert!(!outcome.is_fatal());
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_reconnects_surface_one_fatal_error() -> Result<()> {
    let url = unreachable_endpoint().await?;
    let store = Arc::new(MemoryStore::default());
    let watcher = start_watcher(&url, store.clone(), poller_cfg(0));

    let outcome = watcher.wait_for_outcome(Duration::from_secs(30)).await?;
    match outcome {
        Outcome::Fatal(err) => {
            let message = format!("{err}");
            assert!(
                message.starts_with("maximum reconnection attempts reached"),
                "unexpected fatal message: {message}"
            );
        }
        Outcome::Clean => panic!("expected a fatal outcome"),
    }

    assert!(store.rows().is_empty(), "no pipeline messages should land");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tip_lookup_failure_is_fatal_and_skips_backfill() -> Result<()> {
    let fixture = ChainFixture::default();
    fixture.set_head(101);
    let server = MockTzktServer::start(fixture.clone()).await?;

    let store = Arc::new(MemoryStore::default());
    store.fail_level_reads();
    let watcher = start_watcher(server.url(), store.clone(), poller_cfg(0));

    let outcome = watcher.wait_for_outcome(Duration::from_secs(10)).await?;
    match outcome {
        Outcome::Fatal(err) => {
            assert!(format!("{err}").starts_with("Error getting current database level"));
        }
        Outcome::Clean => panic!("expected a fatal outcome"),
    }

    assert!(fixture.requested_levels().is_empty(), "no backfill issued");
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backfill_failure_mid_range_is_fatal_after_partial_progress() -> Result<()> {
    let fixture = ChainFixture::default();
    fixture.set_head(103);
    fixture.add_delegation(101, "tz1G", 70, "2024-03-01T00:00:00Z");
    fixture.add_delegation(102, "tz1H", 80, "2024-03-02T00:00:00Z");
    fixture.fail_level(103);
    let server = MockTzktServer::start(fixture.clone()).await?;

    let store = Arc::new(MemoryStore::default());
    store.seed(vec![seeded_row(100)]);
    let watcher = start_watcher(server.url(), store.clone(), poller_cfg(0));

    let outcome = watcher.wait_for_outcome(Duration::from_secs(15)).await?;
    match outcome {
        Outcome::Fatal(err) => {
            let message = format!("{err}");
            assert!(
                message.starts_with("Error fetching past delegations"),
                "unexpected fatal message: {message}"
            );
            assert!(message.contains("Error fetching delegations for level 103"));
        }
        Outcome::Clean => panic!("expected a fatal outcome"),
    }

    // Levels were attempted in order and the failing one was retried.
    let requested = fixture.requested_levels();
    assert_eq!(&requested[..3], &[101, 102, 103]);
    assert!(requested[3..].iter().all(|level| *level == 103));

    server.shutdown().await;
    Ok(())
}
