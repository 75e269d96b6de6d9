//! Transaction types and serialization.

use crate::encoding::{to_bytes, ByteReader, ByteWriter, Wire, WireError};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;
use crate::Hash256;

const OP_RETURN: u8 = 0x6a;
const MAX_SCRIPT_SIZE: usize = 10_000;

#[derive(Clone, Debug, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Wire for TxIn {
    fn put(&self, writer: &mut ByteWriter) {
        self.prevout.put(writer);
        writer.var_bytes(&self.script_sig);
        writer.u32(self.sequence);
    }

    fn parse(reader: &mut ByteReader) -> Result<Self, WireError> {
        Ok(Self {
            prevout: OutPoint::parse(reader)?,
            script_sig: reader.var_bytes()?,
            sequence: reader.u32()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    /// Provably unspendable outputs never enter the accumulator.
    pub fn is_unspendable(&self) -> bool {
        (!self.script_pubkey.is_empty() && self.script_pubkey[0] == OP_RETURN)
            || self.script_pubkey.len() > MAX_SCRIPT_SIZE
    }
}

impl Wire for TxOut {
    fn put(&self, writer: &mut ByteWriter) {
        writer.i64(self.value);
        writer.var_bytes(&self.script_pubkey);
    }

    fn parse(reader: &mut ByteReader) -> Result<Self, WireError> {
        Ok(Self {
            value: reader.i64()?,
            script_pubkey: reader.var_bytes()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        sha256d(&to_bytes(self))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }
}

impl Wire for Transaction {
    fn put(&self, writer: &mut ByteWriter) {
        writer.i32(self.version);
        writer.count(self.inputs.len());
        for input in &self.inputs {
            input.put(writer);
        }
        writer.count(self.outputs.len());
        for output in &self.outputs {
            output.put(writer);
        }
        writer.u32(self.lock_time);
    }

    fn parse(reader: &mut ByteReader) -> Result<Self, WireError> {
        let version = reader.i32()?;
        let input_count = reader.count()?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxIn::parse(reader)?);
        }
        let output_count = reader.count()?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOut::parse(reader)?);
        }
        let lock_time = reader.u32()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}
