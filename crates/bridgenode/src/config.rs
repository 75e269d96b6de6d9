//! Network selection and on-disk layout.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::blockfiles;
use crate::error::BridgeError;

pub const MAINNET_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];
pub const TESTNET_MAGIC: [u8; 4] = [0x0b, 0x11, 0x09, 0x07];
pub const REGTEST_MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn magic(self) -> [u8; 4] {
        match self {
            Network::Mainnet => MAINNET_MAGIC,
            Network::Testnet => TESTNET_MAGIC,
            Network::Regtest => REGTEST_MAGIC,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Some(Network::Mainnet),
            "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

/// Where the container files live and where the artifacts go.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub network: Network,
    /// Directory holding `blkNNNNN.dat` and `revNNNNN.dat`.
    pub block_dir: PathBuf,
    /// Directory the artifacts are written under.
    pub data_dir: PathBuf,
}

impl BridgeConfig {
    pub fn new(network: Network, block_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            network,
            block_dir: block_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn offset_dir(&self) -> PathBuf {
        self.data_dir.join("offsetdata")
    }

    pub fn proof_dir(&self) -> PathBuf {
        self.data_dir.join("proofdata")
    }

    pub fn ttl_index_dir(&self) -> PathBuf {
        self.data_dir.join("ttldata")
    }

    pub fn ttl_db_dir(&self) -> PathBuf {
        self.data_dir.join("ttldb")
    }

    pub fn location_index_path(&self) -> PathBuf {
        self.offset_dir().join("offsetfile")
    }

    pub fn last_location_height_path(&self) -> PathBuf {
        self.offset_dir().join("lastoffsetheight")
    }

    pub fn scan_cursor_path(&self) -> PathBuf {
        self.offset_dir().join("scancursor")
    }

    pub fn proof_file_path(&self) -> PathBuf {
        self.proof_dir().join("proof.dat")
    }

    pub fn proof_offset_path(&self) -> PathBuf {
        self.proof_dir().join("proofoffset.dat")
    }

    pub fn txid_file_path(&self) -> PathBuf {
        self.ttl_index_dir().join("txids.dat")
    }

    pub fn txid_offset_path(&self) -> PathBuf {
        self.ttl_index_dir().join("txidoffsets.dat")
    }

    pub fn ensure_dirs(&self) -> Result<(), BridgeError> {
        std::fs::create_dir_all(self.offset_dir())?;
        std::fs::create_dir_all(self.proof_dir())?;
        std::fs::create_dir_all(self.ttl_index_dir())?;
        std::fs::create_dir_all(self.ttl_db_dir())?;
        Ok(())
    }

    /// Checks the first container file against the configured magic, so a
    /// testnet directory is refused before any artifact is touched.
    pub fn check_network_magic(&self) -> Result<(), BridgeError> {
        if !self.block_dir.is_dir() {
            return Err(BridgeError::Config(format!(
                "block directory {} does not exist",
                self.block_dir.display()
            )));
        }
        let first = blockfiles::block_file_path(&self.block_dir, 0);
        if !first.exists() {
            return Err(BridgeError::Config(format!(
                "no container files in {}",
                self.block_dir.display()
            )));
        }
        let mut magic = [0u8; 4];
        File::open(&first)?.read_exact(&mut magic)?;
        if magic != self.network.magic() {
            return Err(BridgeError::Config(format!(
                "{} does not match the {:?} network magic",
                first.display(),
                self.network
            )));
        }
        Ok(())
    }
}
