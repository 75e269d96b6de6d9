mod common;

use std::sync::Arc;

use common::{coinbase, spend_tx, temp_dir, ChainBuilder, MockForest};

use utbridge_bridgenode::config::{BridgeConfig, Network};
use utbridge_bridgenode::driver::Driver;
use utbridge_bridgenode::error::BridgeError;
use utbridge_bridgenode::proofs::read_proof;
use utbridge_bridgenode::rev::InputRev;
use utbridge_bridgenode::ttldb::TtlDb;
use utbridge_storage::memory::MemoryStore;

/// Eight blocks: plain spends, a same-block spend, a multi-input spend and
/// a spend of a spender's output.
fn build_chain() -> ChainBuilder {
    let mut chain = ChainBuilder::new();
    chain.add_coinbase_block(&[10, 20]);
    chain.add_coinbase_block(&[30, 40, 50]);
    chain.add_spend_block(&[(1, 0, 1), (2, 0, 2)], &[15]);

    // Height 4 spends one of its own outputs.
    let (outpoint_a, rev_a) = chain.outpoint(1, 0, 0);
    let tx_a = spend_tx(vec![outpoint_a], &[60, 61]);
    let tx_b = spend_tx(
        vec![utbridge_primitives::OutPoint {
            hash: tx_a.txid(),
            index: 1,
        }],
        &[62],
    );
    let rev_b = InputRev {
        height: 4,
        coinbase: false,
        amount: 61,
        pk_script: vec![0x52],
    };
    chain.add_block(
        vec![coinbase(4, &[50]), tx_a, tx_b],
        vec![vec![rev_a], vec![rev_b]],
    );

    chain.add_spend_block(&[(4, 1, 0), (2, 0, 0)], &[70]);
    chain.add_coinbase_block(&[80]);
    chain.add_spend_block(&[(6, 0, 0), (3, 1, 0)], &[81, 82]);
    chain.add_spend_block(&[(7, 1, 1)], &[83]);
    chain
}

fn config(block_dir: &std::path::Path, data_dir: &std::path::Path) -> BridgeConfig {
    BridgeConfig::new(Network::Regtest, block_dir, data_dir)
}

fn artifact_bytes(config: &BridgeConfig) -> Vec<(&'static str, Vec<u8>)> {
    [
        ("locations", config.location_index_path()),
        ("lastheight", config.last_location_height_path()),
        ("txids", config.txid_file_path()),
        ("txidoffsets", config.txid_offset_path()),
        ("proof", config.proof_file_path()),
        ("proofoffsets", config.proof_offset_path()),
    ]
    .into_iter()
    .map(|(name, path)| (name, std::fs::read(&path).unwrap_or_default()))
    .collect()
}

#[test]
fn end_to_end_build() {
    let chain = build_chain();
    let block_dir = temp_dir("e2e_blocks");
    let data_dir = temp_dir("e2e_data");
    chain.write_containers(&block_dir, 5, &[]);

    let config = config(&block_dir, &data_dir);
    let store = Arc::new(MemoryStore::new());
    let driver = Driver::new(config.clone(), Arc::clone(&store), MockForest::new());
    let summary = driver.run().expect("run");
    assert_eq!(summary.height, 8);
    assert_eq!(summary.last_location_height, 8);

    // One proof per height, addressable through the offset table.
    for height in 1..=8i32 {
        let record = read_proof(
            &config.proof_file_path(),
            &config.proof_offset_path(),
            height,
        )
        .expect("proof");
        assert_eq!(record.height, height as u32);
    }

    // Every external spend landed in the TTL database; the same-block spend
    // of height 4 did not.
    let ttl = TtlDb::new(Arc::clone(&store));
    let expected = [
        ((1, 1), 3),
        ((2, 2), 3),
        ((1, 0), 4),
        ((2, 0), 5),
        ((4, 1), 5),
        ((6, 0), 7),
        ((3, 1), 7),
        ((7, 2), 8),
    ];
    for ((create_height, position), destroy_height) in expected {
        assert_eq!(
            ttl.get(create_height, position).expect("get"),
            Some(destroy_height),
            "({create_height}, {position})"
        );
    }
    assert_eq!(ttl.get(4, 2).expect("get"), None, "same-block spend leaked");
    assert_eq!(ttl.get(1, 7).expect("get"), None);

    let _ = std::fs::remove_dir_all(&block_dir);
    let _ = std::fs::remove_dir_all(&data_dir);
}

#[test]
fn phased_arrival_matches_single_shot() {
    let chain = build_chain();

    // Control: everything in one run.
    let control_blocks = temp_dir("phase_control_blocks");
    let control_data = temp_dir("phase_control_data");
    chain.write_first(&control_blocks, 8, 100);
    let control_config = config(&control_blocks, &control_data);
    Driver::new(
        control_config.clone(),
        Arc::new(MemoryStore::new()),
        MockForest::new(),
    )
    .run()
    .expect("control run");

    // Phased: four blocks, a run, four more, another run.
    let block_dir = temp_dir("phase_blocks");
    let data_dir = temp_dir("phase_data");
    let phased_config = config(&block_dir, &data_dir);
    let store = Arc::new(MemoryStore::new());

    chain.write_first(&block_dir, 4, 100);
    let summary = Driver::new(phased_config.clone(), Arc::clone(&store), MockForest::new())
        .run()
        .expect("first phase");
    assert_eq!(summary.height, 4);

    chain.write_first(&block_dir, 8, 100);
    let summary = Driver::new(
        phased_config.clone(),
        Arc::clone(&store),
        MockForest::replayed(&chain, 4),
    )
    .run()
    .expect("second phase");
    assert_eq!(summary.height, 8);

    assert_eq!(artifact_bytes(&control_config), artifact_bytes(&phased_config));

    let _ = std::fs::remove_dir_all(&control_blocks);
    let _ = std::fs::remove_dir_all(&control_data);
    let _ = std::fs::remove_dir_all(&block_dir);
    let _ = std::fs::remove_dir_all(&data_dir);
}

#[test]
fn restart_after_proof_failure_is_idempotent() {
    let chain = build_chain();

    let control_blocks = temp_dir("crash_control_blocks");
    let control_data = temp_dir("crash_control_data");
    chain.write_first(&control_blocks, 8, 100);
    let control_config = config(&control_blocks, &control_data);
    Driver::new(
        control_config.clone(),
        Arc::new(MemoryStore::new()),
        MockForest::new(),
    )
    .run()
    .expect("control run");

    let block_dir = temp_dir("crash_blocks");
    let data_dir = temp_dir("crash_data");
    let crash_config = config(&block_dir, &data_dir);
    chain.write_first(&block_dir, 8, 100);
    let store = Arc::new(MemoryStore::new());

    // The oracle dies on the sixth block; five proofs are on disk and the
    // txid pipeline may have drained further ahead.
    let mut forest = MockForest::new();
    forest.fail_at_prove = Some(6);
    let result = Driver::new(crash_config.clone(), Arc::clone(&store), forest).run();
    assert!(matches!(result, Err(BridgeError::Proof(_))));

    // Restart with the accumulator restored to its height-5 snapshot.
    let summary = Driver::new(
        crash_config.clone(),
        Arc::clone(&store),
        MockForest::replayed(&chain, 5),
    )
    .run()
    .expect("restart");
    assert_eq!(summary.height, 8);

    assert_eq!(artifact_bytes(&control_config), artifact_bytes(&crash_config));

    let _ = std::fs::remove_dir_all(&control_blocks);
    let _ = std::fs::remove_dir_all(&control_data);
    let _ = std::fs::remove_dir_all(&block_dir);
    let _ = std::fs::remove_dir_all(&data_dir);
}

#[test]
fn stop_before_ordering_leaves_a_clean_slate() {
    let chain = build_chain();
    let block_dir = temp_dir("stop_blocks");
    let data_dir = temp_dir("stop_data");
    chain.write_first(&block_dir, 8, 100);
    let stop_config = config(&block_dir, &data_dir);
    let store = Arc::new(MemoryStore::new());

    let driver = Driver::new(stop_config.clone(), Arc::clone(&store), MockForest::new());
    driver.stop_signal().request_stop();
    let summary = driver.run().expect("stopped run");
    assert_eq!(summary.height, 0);

    // The next run starts fresh and completes.
    let summary = Driver::new(stop_config, Arc::clone(&store), MockForest::new())
        .run()
        .expect("full run");
    assert_eq!(summary.height, 8);

    let _ = std::fs::remove_dir_all(&block_dir);
    let _ = std::fs::remove_dir_all(&data_dir);
}
