// Copyright (C) 2026 Silo Storage Systems
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::io::{Read, Write};

use crate::codec::{read_next, write_next, Error as codec_error, SiloMessageCodec};

/// A generic 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);
impl_byte_array_newtype!(Hash256, 32);
impl_array_hexstring_fmt!(Hash256);
impl_byte_array_serde!(Hash256);
impl_byte_array_message_codec!(Hash256, 32);

/// Identifier of a file contract: the ID of the first file contract in the
/// contract's formation transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContractId(pub [u8; 32]);
impl_byte_array_newtype!(ContractId, 32);
impl_array_hexstring_fmt!(ContractId);
impl_byte_array_serde!(ContractId);
impl_byte_array_message_codec!(ContractId, 32);

/// The Merkle root of a 4 MiB sector; its content address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SectorRoot(pub [u8; 32]);
impl_byte_array_newtype!(SectorRoot, 32);
impl_array_hexstring_fmt!(SectorRoot);
impl_byte_array_serde!(SectorRoot);
impl_byte_array_message_codec!(SectorRoot, 32);

/// The hash of a set of unlock conditions; where coins get sent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 32]);
impl_byte_array_newtype!(Address, 32);
impl_array_hexstring_fmt!(Address);
impl_byte_array_serde!(Address);
impl_byte_array_message_codec!(Address, 32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockId(pub [u8; 32]);
impl_byte_array_newtype!(BlockId, 32);
impl_array_hexstring_fmt!(BlockId);
impl_byte_array_serde!(BlockId);
impl_byte_array_message_codec!(BlockId, 32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransactionId(pub [u8; 32]);
impl_byte_array_newtype!(TransactionId, 32);
impl_array_hexstring_fmt!(TransactionId);
impl_byte_array_serde!(TransactionId);
impl_byte_array_message_codec!(TransactionId, 32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OutputId(pub [u8; 32]);
impl_byte_array_newtype!(OutputId, 32);
impl_array_hexstring_fmt!(OutputId);
impl_byte_array_serde!(OutputId);
impl_byte_array_message_codec!(OutputId, 32);

impl From<Hash256> for ContractId {
    fn from(h: Hash256) -> ContractId {
        ContractId(h.0)
    }
}

impl From<Hash256> for Address {
    fn from(h: Hash256) -> Address {
        Address(h.0)
    }
}

impl From<Hash256> for TransactionId {
    fn from(h: Hash256) -> TransactionId {
        TransactionId(h.0)
    }
}

impl From<Hash256> for OutputId {
    fn from(h: Hash256) -> OutputId {
        OutputId(h.0)
    }
}

impl From<SectorRoot> for Hash256 {
    fn from(r: SectorRoot) -> Hash256 {
        Hash256(r.0)
    }
}

/// A 16-byte ASCII-padded protocol identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Specifier(pub [u8; 16]);
impl_byte_array_message_codec!(Specifier, 16);

impl Specifier {
    pub const fn new(s: &str) -> Specifier {
        let bytes = s.as_bytes();
        assert!(bytes.len() <= 16, "specifier too long");
        let mut buf = [0u8; 16];
        let mut i = 0;
        while i < bytes.len() {
            buf[i] = bytes[i];
            i += 1;
        }
        Specifier(buf)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(16);
        match std::str::from_utf8(&self.0[..end]) {
            Ok(s) => f.write_str(s),
            Err(_) => f.write_str(&crate::util::hash::to_hex(&self.0)),
        }
    }
}

impl fmt::Debug for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Specifier({})", self)
    }
}

/// An amount of currency, counted in the chain's base unit. The wire form
/// is a length-prefixed big-endian integer with leading zeros trimmed;
/// the JSON form is a base-10 string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub const fn new(value: u128) -> Currency {
        Currency(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Currency) -> Option<Currency> {
        self.0.checked_add(other.0).map(Currency)
    }

    pub fn checked_sub(self, other: Currency) -> Option<Currency> {
        self.0.checked_sub(other.0).map(Currency)
    }

    pub fn checked_mul_u64(self, n: u64) -> Option<Currency> {
        self.0.checked_mul(n as u128).map(Currency)
    }

    pub fn saturating_sub(self, other: Currency) -> Currency {
        Currency(self.0.saturating_sub(other.0))
    }

    /// Big-endian bytes with leading zeros trimmed; empty for zero.
    pub fn to_be_trimmed(&self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        bytes[start..].to_vec()
    }

    pub fn from_be_trimmed(bytes: &[u8]) -> Option<Currency> {
        if bytes.len() > 16 {
            return None;
        }
        let mut buf = [0u8; 16];
        buf[16 - bytes.len()..].copy_from_slice(bytes);
        Some(Currency(u128::from_be_bytes(buf)))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Currency({})", self.0)
    }
}

impl SiloMessageCodec for Currency {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        let bytes = self.to_be_trimmed();
        write_next(fd, &(bytes.len() as u64))?;
        fd.write_all(&bytes).map_err(codec_error::WriteError)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<Currency, codec_error> {
        let len: u64 = read_next(fd)?;
        if len > 16 {
            return Err(codec_error::DeserializeError(format!(
                "Currency value is too large ({} bytes)",
                len
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        fd.read_exact(&mut bytes).map_err(codec_error::ReadError)?;
        Currency::from_be_trimmed(&bytes).ok_or_else(|| {
            codec_error::DeserializeError("Currency value overflows u128".to_string())
        })
    }
}

impl serde::Serialize for Currency {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Currency {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Currency, D::Error> {
        let value = <String as serde::Deserialize>::deserialize(d)?;
        value
            .parse::<u128>()
            .map(Currency)
            .map_err(|_| serde::de::Error::custom("failed to parse Currency"))
    }
}

/// A (height, block id) pair identifying a point on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainIndex {
    pub height: u64,
    pub id: BlockId,
}

impl SiloMessageCodec for ChainIndex {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), codec_error> {
        write_next(fd, &self.height)?;
        write_next(fd, &self.id)
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<ChainIndex, codec_error> {
        let height: u64 = read_next(fd)?;
        let id: BlockId = read_next(fd)?;
        Ok(ChainIndex { height, id })
    }
}

impl fmt::Display for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.height)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn specifier_padding() {
        let s = Specifier::new("LoopSettings");
        assert_eq!(&s.0[..12], b"LoopSettings");
        assert_eq!(&s.0[12..], &[0u8; 4]);
        assert_eq!(s.to_string(), "LoopSettings");
    }

    #[test]
    fn currency_wire_roundtrip() {
        for value in [0u128, 1, 255, 256, 1 << 63, u128::MAX] {
            let c = Currency(value);
            let bytes = c.serialize_to_vec();
            let mut fd = &bytes[..];
            assert_eq!(Currency::consensus_deserialize(&mut fd).unwrap(), c);
        }
        // zero encodes as an empty byte string
        assert_eq!(Currency::ZERO.serialize_to_vec(), vec![0u8; 8]);
    }

    #[test]
    fn currency_json_is_a_string() {
        let c = Currency(123456789);
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"123456789\"");
        let c2: Currency = serde_json::from_str("\"123456789\"").unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn hash256_hex_roundtrip() {
        let h = Hash256([0xab; 32]);
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
    }
}
