//! # Chain Connection Benchmarks
//!
//! | Path | Work per call |
//! |------|---------------|
//! | `filter_block` | every tx of a block against a watch-list |
//! | `diff_mempool` | one backend listing against the tracked set |
//! | `dispatch_transaction` | one mempool tx fanned out to N clients |

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash, CompactTarget, TxMerkleNode, Txid};
use chain_conn::algorithms::{diff_mempool, filter_block};
use chain_conn::testing::{script, tx_paying};
use chain_conn::{BackendConfig, Connection, MockChainBackend, WatchList};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn block_of(tx_count: u32) -> Block {
    Block {
        header: Header {
            version: BlockVersion::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 0,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: 0,
        },
        txdata: (0..tx_count)
            .map(|n| tx_paying(script((n % 251) as u8), n))
            .collect(),
    }
}

fn bench_filter_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_block");

    for tx_count in [100u32, 1_000, 4_000] {
        let block = block_of(tx_count);
        let mut watch = WatchList::new();
        for tag in 0..20u8 {
            watch.add_script(script(tag));
        }

        group.throughput(Throughput::Elements(u64::from(tx_count)));
        group.bench_with_input(BenchmarkId::from_parameter(tx_count), &block, |b, block| {
            b.iter(|| {
                let mut watch = watch.clone();
                black_box(filter_block(&mut watch, block))
            })
        });
    }
    group.finish();
}

fn bench_diff_mempool(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_mempool");

    for size in [1_000u32, 10_000, 50_000] {
        let txid = |n: u32| {
            let mut bytes = [0u8; 32];
            bytes[..4].copy_from_slice(&n.to_le_bytes());
            Txid::from_byte_array(bytes)
        };
        // Half the listing is already known, plus some departed ids.
        let known: HashSet<Txid> = (0..size / 2).chain(size..size + 100).map(txid).collect();
        let listing: Vec<Txid> = (0..size).map(txid).collect();

        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &listing, |b, listing| {
            b.iter(|| black_box(diff_mempool(&known, listing)))
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let _enter = runtime.enter();
    let mut group = c.benchmark_group("dispatch_transaction");

    for clients in [1usize, 10, 100] {
        let conn = runtime.block_on(async {
            let config = BackendConfig {
                client_buffer_size: 1_024,
                ..BackendConfig::for_testing()
            };
            Connection::with_backend(config, Arc::new(MockChainBackend::default()))
                .await
                .expect("mock connection")
        });
        // Started, so handlers drain the buffers while we dispatch.
        for n in 0..clients {
            let client = conn.new_client().expect("connection running");
            client.watch_script(script((n % 4) as u8));
            client.start().expect("fresh client starts");
        }
        let dispatcher = conn.dispatcher();
        let tx = Arc::new(tx_paying(script(0), 1));

        group.bench_with_input(BenchmarkId::from_parameter(clients), &tx, |b, tx| {
            b.iter(|| black_box(dispatcher.dispatch_transaction(tx.clone())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_filter_block, bench_diff_mempool, bench_fan_out);
criterion_main!(benches);
