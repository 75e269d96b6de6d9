use utbridge_primitives::encoding::WireError;
use utbridge_storage::StoreError;

/// Error taxonomy of the indexing core.
///
/// Every arm is fatal: the driver flushes what it can, persists resumption
/// state if safe and exits. Retry is the operator's job via process restart.
#[derive(Debug)]
pub enum BridgeError {
    /// Wrong network magic, missing directories.
    Config(String),
    /// Artifact inconsistency: offset inversion, unfindable txid prefix,
    /// pending-map overflow. Artifacts are likely corrupt; delete and rebuild.
    Integrity(String),
    Io(std::io::Error),
    /// Accumulator prove/verify failure.
    Proof(String),
    Store(StoreError),
    Decode(WireError),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Config(message) => write!(f, "configuration: {message}"),
            BridgeError::Integrity(message) => write!(f, "integrity: {message}"),
            BridgeError::Io(err) => write!(f, "{err}"),
            BridgeError::Proof(message) => write!(f, "proof: {message}"),
            BridgeError::Store(err) => write!(f, "{err}"),
            BridgeError::Decode(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err)
    }
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        BridgeError::Store(err)
    }
}

impl From<WireError> for BridgeError {
    fn from(err: WireError) -> Self {
        BridgeError::Decode(err)
    }
}
