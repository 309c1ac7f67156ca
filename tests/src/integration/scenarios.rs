//! # Connection Scenarios
//!
//! End-to-end behaviour of one connection: blocks reach clients one height
//! at a time, watched mempool transactions reach both the tracker and the
//! client mirror, failures are retried, and shutdown is clean.
//!
//! Tests with a 1s interval run on tokio's paused clock, so "within two
//! intervals" is measured in virtual time.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chain_conn::testing::{address, script, tx_paying, tx_spending, unrelated_tx};
    use chain_conn::{BackendConfig, MockMethod, Notification};
    use bitcoin::{OutPoint, Txid};
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::integration::harness::{
        block_heights_until, config_with_interval, connect_at, drain_now, wait_until,
        FAST_POLL_MS,
    };

    fn relevant_txids(rx: &mut UnboundedReceiver<Notification>) -> Vec<Txid> {
        drain_now(rx)
            .into_iter()
            .filter_map(|n| match n {
                Notification::RelevantTx { tx, .. } => Some(tx.compute_txid()),
                _ => None,
            })
            .collect()
    }

    const ONE_SECOND: Duration = Duration::from_secs(1);
    const TWO_INTERVALS: Duration = Duration::from_secs(2);
    const GENEROUS: Duration = Duration::from_secs(5);

    // =========================================================================
    // BLOCKS
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_client_follows_backend_from_100_to_105() {
        let (mock, conn) = connect_at(100, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.notify_blocks();
        let mut rx = client.take_notifications().unwrap();
        client.start().unwrap();
        conn.start();

        mock.mine_blocks(4);
        let heights = block_heights_until(&mut rx, 104, TWO_INTERVALS, |_| {}).await;
        assert_eq!(heights, vec![101, 102, 103, 104]);
        assert_eq!(client.best_block().height, 104);

        let initial = client.best_block().height;
        mock.mine_blocks(1);
        let heights = block_heights_until(&mut rx, 105, TWO_INTERVALS, |_| {}).await;
        assert_eq!(heights, vec![initial + 1]);
        assert_eq!(client.best_block(), mock.best_block());
        assert_eq!(conn.best_block(), mock.best_block());

        conn.stop().await;
    }

    #[tokio::test]
    async fn test_long_run_sees_every_height_once() {
        let (mock, conn) = connect_at(0, config_with_interval(FAST_POLL_MS)).await;
        let client = conn.new_client().unwrap();
        client.notify_blocks();
        let mut rx = client.take_notifications().unwrap();
        client.start().unwrap();
        conn.start();

        for _ in 0..10 {
            mock.mine_blocks(3);
            tokio::time::sleep(Duration::from_millis(7)).await;
        }

        let mut recoveries = Vec::new();
        let heights = block_heights_until(&mut rx, 30, GENEROUS, |n| {
            if matches!(
                n,
                Notification::HeightGapDetected { .. } | Notification::CaughtUp { .. }
            ) {
                recoveries.push(n);
            }
        })
        .await;
        assert_eq!(heights, (1..=30).collect::<Vec<_>>());
        assert!(recoveries.is_empty(), "unexpected recovery: {:?}", recoveries);
        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_rpc_failure_retried() {
        let (mock, conn) = connect_at(100, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.notify_blocks();
        let mut rx = client.take_notifications().unwrap();
        client.start().unwrap();
        conn.start();

        mock.set_failing(MockMethod::BlockByHeight, true);
        mock.mine_blocks(3);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(conn.best_block().height, 100);
        assert_eq!(client.best_block().height, 100);
        assert!(mock.call_count(MockMethod::BlockByHeight) >= 2);

        mock.set_failing(MockMethod::BlockByHeight, false);
        let heights = block_heights_until(&mut rx, 103, TWO_INTERVALS, |_| {}).await;
        assert_eq!(heights, vec![101, 102, 103]);

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reorg_at_same_height_keeps_watermark() {
        let (mock, conn) = connect_at(100, config_with_interval(1_000)).await;
        conn.start();
        let before = conn.best_block();

        mock.reorg(3);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(conn.best_block(), before);

        // The competing branch grows past the watermark; walking resumes.
        mock.mine_blocks(1);
        assert!(wait_until(TWO_INTERVALS, || conn.best_block().height == 101).await);
        assert_eq!(conn.best_block(), mock.best_block());

        conn.stop().await;
    }

    #[tokio::test]
    async fn test_lagging_client_catches_up() {
        let config = BackendConfig {
            client_buffer_size: 1,
            ..config_with_interval(FAST_POLL_MS)
        };
        let (mock, conn) = connect_at(100, config).await;
        let client = conn.new_client().unwrap();
        client.notify_blocks();
        let mut rx = client.take_notifications().unwrap();
        conn.start();

        // Not started yet: 101 fills the buffer, 102..=105 are dropped.
        mock.mine_blocks(5);
        assert!(wait_until(GENEROUS, || conn.best_block().height == 105).await);

        client.start().unwrap();
        assert!(wait_until(GENEROUS, || client.best_block().height == 101).await);

        mock.mine_blocks(1);
        let mut gap = None;
        let mut caught_up = None;
        let heights = block_heights_until(&mut rx, 106, GENEROUS, |n| match n {
            Notification::HeightGapDetected { local, incoming } => gap = Some((local, incoming)),
            Notification::CaughtUp { from, to } => caught_up = Some((from.height, to.height)),
            _ => {}
        })
        .await;

        assert_eq!(heights, (101..=106).collect::<Vec<_>>());
        assert_eq!(gap, Some((101, 106)));
        assert_eq!(caught_up, Some((101, 105)));
        assert_eq!(client.best_block(), mock.best_block());

        conn.stop().await;
    }

    #[tokio::test]
    async fn test_explicit_catch_up_after_dropped_blocks() {
        let config = BackendConfig {
            client_buffer_size: 1,
            auto_catch_up: false,
            ..config_with_interval(FAST_POLL_MS)
        };
        let (mock, conn) = connect_at(50, config).await;
        let client = conn.new_client().unwrap();
        client.watch_script(script(1));

        let funding = tx_paying(script(1), 1);
        mock.add_to_mempool(funding.clone());
        mock.mine_mempool();
        mock.mine_blocks(2);

        // Not started: 51 sits in the buffer, 52 and 53 are dropped.
        conn.start();
        assert!(wait_until(GENEROUS, || conn.best_block().height == 53).await);
        assert_eq!(client.best_block().height, 50);

        let mut rx = client.take_notifications().unwrap();
        assert_eq!(client.catch_up().await.unwrap(), mock.best_block());

        let filtered: Vec<_> = drain_now(&mut rx)
            .into_iter()
            .filter_map(|n| match n {
                Notification::FilteredBlockConnected {
                    stamp,
                    relevant_txs,
                } => Some((stamp.height, relevant_txs)),
                _ => None,
            })
            .collect();
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered[0], (51, vec![funding.clone()]));
        assert!(client.is_watching_outpoint(&OutPoint::new(funding.compute_txid(), 0)));

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_reaches_client_without_block_subscription() {
        let (mock, conn) = connect_at(20, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.watch_script(script(6));
        let mut rx = client.take_notifications().unwrap();
        client.start().unwrap();
        conn.start();

        let txid = mock.add_to_mempool(tx_paying(script(6), 1));
        assert!(wait_until(TWO_INTERVALS, || client.mempool_contains(&txid)).await);

        let stamp = mock.mine_mempool();
        assert!(wait_until(TWO_INTERVALS, || client.best_block() == stamp).await);

        let mut confirmed_in = None;
        let mut filtered = None;
        for n in drain_now(&mut rx) {
            match n {
                Notification::RelevantTx {
                    tx,
                    block: Some(block),
                } if tx.compute_txid() == txid => confirmed_in = Some(block),
                Notification::FilteredBlockConnected {
                    stamp,
                    relevant_txs,
                } => filtered = Some((stamp, relevant_txs.len())),
                Notification::BlockConnected(_) => panic!("block not subscribed"),
                _ => {}
            }
        }
        assert_eq!(confirmed_in, Some(stamp));
        assert_eq!(filtered, Some((stamp, 1)));

        conn.stop().await;
    }

    // =========================================================================
    // MEMPOOL
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_watched_tx_reaches_tracker_and_mirror() {
        let (mock, conn) = connect_at(100, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        let watched = address(7);
        client.watch_address(&watched);
        let mut rx = client.take_notifications().unwrap();
        client.start().unwrap();
        conn.start();

        let txid = mock.add_to_mempool(tx_paying(watched.script_pubkey(), 1));
        assert!(
            wait_until(TWO_INTERVALS, || conn.mempool_contains(&txid)
                && client.mempool_contains(&txid))
            .await
        );

        // Further ticks neither refetch nor renotify.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(mock.call_count(MockMethod::RawTransaction), 1);
        let relevant = drain_now(&mut rx)
            .into_iter()
            .filter(|n| matches!(n, Notification::RelevantTx { .. }))
            .count();
        assert_eq!(relevant, 1);
        assert_eq!(client.mempool_len(), 1);

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mined_tx_leaves_tracker_and_mirror() {
        let (mock, conn) = connect_at(100, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.watch_script(script(2));
        client.notify_blocks();
        client.start().unwrap();
        conn.start();

        let tx = tx_paying(script(2), 1);
        let txid = mock.add_to_mempool(tx.clone());
        assert!(wait_until(TWO_INTERVALS, || client.mempool_contains(&txid)).await);

        mock.mine_mempool();
        assert!(
            wait_until(TWO_INTERVALS, || !client.mempool_contains(&txid)
                && !conn.mempool_contains(&txid))
            .await
        );
        assert_eq!(client.best_block().height, 101);

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_tx_leaves_mirror() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.watch_script(script(3));
        client.start().unwrap();
        conn.start();

        let txid = mock.add_to_mempool(tx_paying(script(3), 1));
        assert!(wait_until(TWO_INTERVALS, || client.mempool_contains(&txid)).await);

        mock.remove_from_mempool(&txid);
        assert!(wait_until(TWO_INTERVALS, || !client.mempool_contains(&txid)).await);
        assert!(!conn.mempool_contains(&txid));

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_before_client_starts_leaves_no_mirror_entry() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.watch_script(script(1));
        let mut rx = client.take_notifications().unwrap();
        conn.start();

        // Add and removal both queue up behind the unstarted handler.
        let txid = mock.add_to_mempool(tx_paying(script(1), 1));
        assert!(wait_until(TWO_INTERVALS, || conn.mempool_contains(&txid)).await);
        mock.remove_from_mempool(&txid);
        assert!(wait_until(TWO_INTERVALS, || !conn.mempool_contains(&txid)).await);

        client.start().unwrap();
        tokio::time::sleep(ONE_SECOND).await;

        assert_eq!(relevant_txids(&mut rx), vec![txid]);
        assert!(!client.mempool_contains(&txid));
        assert_eq!(client.mempool_len(), 0);

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_spend_of_watched_output_is_relevant() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.watch_script(script(4));
        let mut rx = client.take_notifications().unwrap();
        client.start().unwrap();
        conn.start();

        let funding = tx_paying(script(4), 1);
        let funding_id = mock.add_to_mempool(funding);
        assert!(wait_until(TWO_INTERVALS, || client.mempool_contains(&funding_id)).await);

        // Pays someone else, but spends the output we were paid.
        let spend = tx_spending(OutPoint::new(funding_id, 0), script(99), 2);
        let spend_id = mock.add_to_mempool(spend);
        assert!(wait_until(TWO_INTERVALS, || client.mempool_contains(&spend_id)).await);

        assert_eq!(relevant_txids(&mut rx), vec![funding_id, spend_id]);

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tx_fetch_failure_retried_next_tick() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.watch_script(script(5));
        client.start().unwrap();
        conn.start();

        let tx = tx_paying(script(5), 1);
        let txid = tx.compute_txid();
        mock.fail_transaction(txid, true);
        mock.add_to_mempool(tx);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!conn.mempool_contains(&txid));
        assert!(!client.mempool_contains(&txid));

        mock.fail_transaction(txid, false);
        assert!(wait_until(TWO_INTERVALS, || client.mempool_contains(&txid)).await);

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disjoint_watch_lists_stay_disjoint() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let alice = conn.new_client().unwrap();
        let bob = conn.new_client().unwrap();
        alice.watch_script(script(0xa1));
        bob.watch_script(script(0xb0));
        let mut alice_rx = alice.take_notifications().unwrap();
        let mut bob_rx = bob.take_notifications().unwrap();
        alice.start().unwrap();
        bob.start().unwrap();
        conn.start();

        let to_alice = mock.add_to_mempool(tx_paying(script(0xa1), 1));
        let to_bob = mock.add_to_mempool(tx_paying(script(0xb0), 2));
        let to_nobody = mock.add_to_mempool(unrelated_tx(3));

        assert!(
            wait_until(TWO_INTERVALS, || alice.mempool_contains(&to_alice)
                && bob.mempool_contains(&to_bob))
            .await
        );
        assert!(conn.mempool_contains(&to_nobody));

        assert!(!alice.mempool_contains(&to_bob));
        assert!(!bob.mempool_contains(&to_alice));
        assert!(!alice.mempool_contains(&to_nobody));

        assert_eq!(relevant_txids(&mut alice_rx), vec![to_alice]);
        assert_eq!(relevant_txids(&mut bob_rx), vec![to_bob]);

        conn.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_all_mempool_sees_everything() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.notify_all_mempool();
        client.start().unwrap();
        conn.start();

        let ids: Vec<_> = (0..5).map(|n| mock.add_to_mempool(unrelated_tx(n))).collect();
        assert!(wait_until(TWO_INTERVALS, || ids.iter().all(|id| client.mempool_contains(id))).await);
        assert_eq!(conn.mempool_len(), 5);

        conn.stop().await;
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let client = conn.new_client().unwrap();
        client.start().unwrap();
        conn.start();
        tokio::time::sleep(ONE_SECOND).await;

        conn.stop().await;
        assert!(client.is_stopped());
        assert_eq!(conn.client_count(), 0);

        let calls = mock.call_count(MockMethod::BestBlock);
        mock.mine_blocks(2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.call_count(MockMethod::BestBlock), calls);
        assert_eq!(conn.best_block().height, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_client_gets_nothing_more() {
        let (mock, conn) = connect_at(10, config_with_interval(1_000)).await;
        let kept = conn.new_client().unwrap();
        let removed = conn.new_client().unwrap();
        kept.notify_blocks();
        removed.notify_blocks();
        kept.start().unwrap();
        removed.start().unwrap();
        conn.start();

        mock.mine_blocks(1);
        assert!(wait_until(TWO_INTERVALS, || removed.best_block().height == 11).await);

        assert!(conn.remove_client(removed.id()).is_some());
        mock.mine_blocks(2);
        assert!(wait_until(TWO_INTERVALS, || kept.best_block().height == 13).await);
        assert_eq!(removed.best_block().height, 11);

        removed.stop().await;
        conn.stop().await;
    }

    #[tokio::test]
    async fn test_create_checks_network() {
        let mock = Arc::new(chain_conn::MockChainBackend::new(bitcoin::Network::Signet));
        let result = chain_conn::Connection::with_backend(BackendConfig::for_testing(), mock).await;
        assert!(matches!(
            result,
            Err(chain_conn::ChainConnError::NetworkMismatch { .. })
        ));
    }
}
