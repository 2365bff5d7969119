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

/// Borrowed from Andrew Poelstra's rust-bitcoin
#[macro_export]
macro_rules! impl_byte_array_newtype {
    ($thing:ident, $len:expr) => {
        impl $thing {
            /// Instantiates from a slice of bytes. Returns None if the slice
            /// is the wrong length.
            pub fn from_bytes(inp: &[u8]) -> Option<$thing> {
                match inp.len() {
                    $len => {
                        let mut ret = [0u8; $len];
                        ret.copy_from_slice(inp);
                        Some($thing(ret))
                    }
                    _ => None,
                }
            }

            /// Instantiates from a hex string. Returns None on bad input.
            pub fn from_hex(hex_str: &str) -> Option<$thing> {
                let bytes = $crate::util::hash::hex_bytes(hex_str).ok()?;
                $thing::from_bytes(&bytes)
            }

            pub fn to_bytes(&self) -> [u8; $len] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                $crate::util::hash::to_hex(&self.0)
            }
        }

        impl std::convert::AsRef<[u8]> for $thing {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

#[macro_export]
macro_rules! impl_array_hexstring_fmt {
    ($thing:ident) => {
        impl std::fmt::Debug for $thing {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($thing), self.to_hex())
            }
        }

        impl std::fmt::Display for $thing {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

/// Hex-string serde representation, for the JSON-facing byte arrays.
#[macro_export]
macro_rules! impl_byte_array_serde {
    ($thing:ident) => {
        impl serde::Serialize for $thing {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.to_hex().as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $thing {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<$thing, D::Error> {
                let inst_str = <String as serde::Deserialize>::deserialize(d)?;
                $thing::from_hex(&inst_str).ok_or(serde::de::Error::custom(concat!(
                    "failed to parse ",
                    stringify!($thing)
                )))
            }
        }
    };
}
