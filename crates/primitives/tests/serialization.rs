use utbridge_primitives::encoding::{from_bytes, to_bytes, ByteReader, ByteWriter};
use utbridge_primitives::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxIn, TxOut};

fn seq_hash(start: u8) -> Hash256 {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

fn push_hash_le(buffer: &mut Vec<u8>, start: u8) {
    for byte in 0u8..=0x1f {
        buffer.push(start.wrapping_add(byte));
    }
}

#[test]
fn serialize_block_header() {
    let header = BlockHeader {
        version: 4,
        prev_block: seq_hash(0x00),
        merkle_root: seq_hash(0x20),
        time: 0x0102_0304,
        bits: 0x0a0b_0c0d,
        nonce: 0xdead_beef,
    };

    let encoded = header.encode();
    let mut expected = Vec::new();
    expected.extend_from_slice(&4i32.to_le_bytes());
    push_hash_le(&mut expected, 0x00);
    push_hash_le(&mut expected, 0x20);
    expected.extend_from_slice(&0x0102_0304u32.to_le_bytes());
    expected.extend_from_slice(&0x0a0b_0c0du32.to_le_bytes());
    expected.extend_from_slice(&0xdead_beefu32.to_le_bytes());

    assert_eq!(encoded.len(), utbridge_primitives::HEADER_SIZE);
    assert_eq!(encoded, expected);

    let decoded = BlockHeader::decode(&encoded).expect("decode header");
    assert_eq!(decoded, header);
}

#[test]
fn header_prev_hash_window() {
    // The ordering pass reads the previous-block hash straight out of
    // serialized header bytes 4..36.
    let header = BlockHeader {
        version: 1,
        prev_block: seq_hash(0x40),
        merkle_root: seq_hash(0x60),
        time: 7,
        bits: 8,
        nonce: 9,
    };
    let encoded = header.encode();
    assert_eq!(&encoded[4..36], &header.prev_block[..]);
}

#[test]
fn serialize_transaction_roundtrip() {
    let tx = Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint {
                hash: seq_hash(0x11),
                index: 3,
            },
            script_sig: vec![0x51],
            sequence: u32::MAX,
        }],
        outputs: vec![
            TxOut {
                value: 50_000,
                script_pubkey: vec![0x76, 0xa9],
            },
            TxOut {
                value: 0,
                script_pubkey: vec![0x6a, 0x01, 0xff],
            },
        ],
        lock_time: 0,
    };

    let encoded = to_bytes(&tx);
    let decoded: Transaction = from_bytes(&encoded).expect("decode tx");
    assert_eq!(decoded, tx);
    assert_eq!(decoded.txid(), tx.txid());
    assert!(!decoded.outputs[0].is_unspendable());
    assert!(decoded.outputs[1].is_unspendable());

    // Leftover bytes are an error, not ignored.
    let mut padded = encoded;
    padded.push(0x00);
    assert!(from_bytes::<Transaction>(&padded).is_err());
}

#[test]
fn coinbase_detection() {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: vec![0x03, 0x01, 0x02, 0x03],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 625_000_000,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    };
    assert!(coinbase.is_coinbase());

    let spend = Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint {
                hash: seq_hash(0x01),
                index: 0,
            },
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }],
        outputs: Vec::new(),
        lock_time: 0,
    };
    assert!(!spend.is_coinbase());
}

#[test]
fn block_roundtrip() {
    let tx = Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: vec![0x01, 0x00],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 5_000_000_000,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    };
    let block = Block {
        header: BlockHeader {
            version: 2,
            prev_block: seq_hash(0x80),
            merkle_root: tx.txid(),
            time: 1_231_006_505,
            bits: 0x1d00_ffff,
            nonce: 2_083_236_893,
        },
        transactions: vec![tx],
    };

    let encoded = block.encode();
    let decoded = Block::decode(&encoded).expect("decode block");
    assert_eq!(decoded.header, block.header);
    assert_eq!(decoded.transactions, block.transactions);
    assert_eq!(decoded.header.hash(), block.header.hash());
}

#[test]
fn compact_size_canonical_encoding() {
    let mut writer = ByteWriter::new();
    writer.count(0xfc);
    writer.count(0xfd);
    writer.count(0x1_0000);
    let bytes = writer.finish();
    assert_eq!(bytes[0], 0xfc);
    assert_eq!(bytes[1], 0xfd);
    assert_eq!(&bytes[2..4], &0xfdu16.to_le_bytes());
    assert_eq!(bytes[4], 0xfe);

    let mut reader = ByteReader::new(&bytes);
    assert_eq!(reader.count().expect("fc"), 0xfc);
    assert_eq!(reader.count().expect("fd"), 0xfd);
    assert_eq!(reader.count().expect("10000"), 0x1_0000);
    assert!(reader.done());

    // Non-canonical: 0xfc encoded with the 0xfd marker.
    let non_canonical = [0xfdu8, 0xfc, 0x00];
    let mut reader = ByteReader::new(&non_canonical);
    assert!(reader.count().is_err());
}
