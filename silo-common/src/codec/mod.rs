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

use std::io::{Read, Write};
use std::{error, fmt, io, mem};

#[macro_use]
pub mod macros;

/// Maximum length of an encoded protocol object. Anything larger is treated
/// as an attack on the decoder.
pub const MAX_MESSAGE_LEN: u64 = 1 << 24;

#[derive(Debug)]
pub enum Error {
    /// Failed to encode
    SerializeError(String),
    /// Failed to read
    ReadError(io::Error),
    /// Failed to decode
    DeserializeError(String),
    /// Failed to write
    WriteError(io::Error),
    /// Array too long
    ArrayTooLong,
    /// Underflow -- not enough bytes to form the message
    UnderflowError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SerializeError(ref s) => write!(f, "serialization error: {}", s),
            Error::ReadError(ref e) => write!(f, "read error: {}", e),
            Error::DeserializeError(ref s) => write!(f, "deserialization error: {}", s),
            Error::WriteError(ref e) => write!(f, "write error: {}", e),
            Error::ArrayTooLong => write!(f, "array too long"),
            Error::UnderflowError(ref s) => write!(f, "underflow error: {}", s),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::ReadError(ref e) => Some(e),
            Error::WriteError(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Helper trait for the types that make up protocol messages. The encoding
/// is little-endian with u64 length prefixes for variable-length data.
pub trait SiloMessageCodec {
    /// serialize implementors _should never_ error unless there is an
    /// underlying failure in writing to the `fd`
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), Error>
    where
        Self: Sized;
    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<Self, Error>
    where
        Self: Sized;
    /// Convenience for serialization to a vec.
    /// This function unwraps any underlying serialization error
    fn serialize_to_vec(&self) -> Vec<u8>
    where
        Self: Sized,
    {
        let mut bytes = vec![];
        self.consensus_serialize(&mut bytes)
            .expect("BUG: serialization to buffer failed.");
        bytes
    }
}

pub fn write_next<T: SiloMessageCodec, W: Write>(fd: &mut W, item: &T) -> Result<(), Error> {
    item.consensus_serialize(fd)
}

pub fn read_next<T: SiloMessageCodec, R: Read>(fd: &mut R) -> Result<T, Error> {
    let item: T = T::consensus_deserialize(fd)?;
    Ok(item)
}

fn read_next_vec<T: SiloMessageCodec + Sized, R: Read>(
    fd: &mut R,
    num_items: u64,
    max_items: u64,
) -> Result<Vec<T>, Error> {
    let len = u64::consensus_deserialize(fd)?;

    if max_items > 0 {
        if len > max_items {
            // too many items
            return Err(Error::DeserializeError(format!(
                "Array has too many items ({} > {})",
                len, max_items
            )));
        }
    } else if len != num_items {
        // inexact item count
        return Err(Error::DeserializeError(format!(
            "Array has incorrect number of items ({} != {})",
            len, num_items
        )));
    }

    if (mem::size_of::<T>() as u128) * (len as u128) > MAX_MESSAGE_LEN as u128 {
        return Err(Error::DeserializeError(format!(
            "Message occupies too many bytes (tried to allocate {}*{}={})",
            mem::size_of::<T>() as u128,
            len,
            (mem::size_of::<T>() as u128) * (len as u128)
        )));
    }

    let mut ret = Vec::with_capacity(len as usize);
    for _i in 0..len {
        let next_item = T::consensus_deserialize(fd)?;
        ret.push(next_item);
    }

    Ok(ret)
}

pub fn read_next_at_most<R: Read, T: SiloMessageCodec + Sized>(
    fd: &mut R,
    max_items: u64,
) -> Result<Vec<T>, Error> {
    read_next_vec::<T, R>(fd, 0, max_items)
}

pub fn read_next_exact<R: Read, T: SiloMessageCodec + Sized>(
    fd: &mut R,
    num_items: u64,
) -> Result<Vec<T>, Error> {
    read_next_vec::<T, R>(fd, num_items, 0)
}

impl_silo_message_codec_for_int!(u8; [0; 1]);
impl_silo_message_codec_for_int!(u16; [0; 2]);
impl_silo_message_codec_for_int!(u32; [0; 4]);
impl_silo_message_codec_for_int!(u64; [0; 8]);
impl_silo_message_codec_for_int!(i64; [0; 8]);

impl SiloMessageCodec for bool {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), Error> {
        write_next(fd, &(u8::from(*self)))
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<bool, Error> {
        match read_next(fd)? {
            0u8 => Ok(false),
            1u8 => Ok(true),
            x => Err(Error::DeserializeError(format!(
                "Invalid boolean byte 0x{:02x}",
                x
            ))),
        }
    }
}

impl<T> SiloMessageCodec for Vec<T>
where
    T: SiloMessageCodec + Sized,
{
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), Error> {
        let len = self.len() as u64;
        write_next(fd, &len)?;
        for item in self {
            write_next(fd, item)?;
        }
        Ok(())
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<Vec<T>, Error> {
        read_next_at_most(fd, u64::MAX)
    }
}

/// Length-prefixed raw byte strings. `Vec<u8>` would encode each byte
/// through the integer codec, so byte payloads get their own helpers.
pub fn write_next_bytes<W: Write>(fd: &mut W, bytes: &[u8]) -> Result<(), Error> {
    write_next(fd, &(bytes.len() as u64))?;
    fd.write_all(bytes).map_err(Error::WriteError)
}

pub fn read_next_bytes<R: Read>(fd: &mut R, max_len: u64) -> Result<Vec<u8>, Error> {
    let len: u64 = read_next(fd)?;
    if len > max_len {
        return Err(Error::DeserializeError(format!(
            "Byte string is too long ({} > {})",
            len, max_len
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    fd.read_exact(&mut bytes).map_err(Error::ReadError)?;
    Ok(bytes)
}

impl SiloMessageCodec for String {
    fn consensus_serialize<W: Write>(&self, fd: &mut W) -> Result<(), Error> {
        write_next_bytes(fd, self.as_bytes())
    }

    fn consensus_deserialize<R: Read>(fd: &mut R) -> Result<String, Error> {
        let bytes = read_next_bytes(fd, MAX_MESSAGE_LEN)?;
        String::from_utf8(bytes)
            .map_err(|_e| Error::DeserializeError("Invalid UTF-8 string".to_string()))
    }
}
