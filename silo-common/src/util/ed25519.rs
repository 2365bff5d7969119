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

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;

use crate::types::Hash256;

pub const PUBLIC_KEY_ENCODED_SIZE: usize = 32;
pub const SIGNATURE_ENCODED_SIZE: usize = 64;

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PublicKey(pub [u8; 32]);
impl_byte_array_newtype!(PublicKey, 32);
impl_array_hexstring_fmt!(PublicKey);
impl_byte_array_serde!(PublicKey);
impl_byte_array_message_codec!(PublicKey, 32);

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 64]);
impl_byte_array_newtype!(Signature, 64);
impl_array_hexstring_fmt!(Signature);
impl_byte_array_serde!(Signature);
impl_byte_array_message_codec!(Signature, 64);

impl Default for Signature {
    fn default() -> Signature {
        Signature([0u8; 64])
    }
}

impl PublicKey {
    /// Verify `sig` over the 32-byte message `msg`. A key that does not
    /// decode to a curve point never verifies.
    pub fn verify(&self, msg: &Hash256, sig: &Signature) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        vk.verify(msg.as_bytes(), &ed25519_dalek::Signature::from_bytes(&sig.0))
            .is_ok()
    }

    /// Verify `sig` over an arbitrary-length message.
    pub fn verify_bytes(&self, msg: &[u8], sig: &Signature) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        vk.verify(msg, &ed25519_dalek::Signature::from_bytes(&sig.0))
            .is_ok()
    }
}

/// An Ed25519 private key.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    pub fn generate() -> PrivateKey {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        PrivateKey::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; 32]) -> PrivateKey {
        PrivateKey {
            key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.key.verifying_key().to_bytes())
    }

    pub fn sign(&self, msg: &Hash256) -> Signature {
        Signature(self.key.sign(msg.as_bytes()).to_bytes())
    }

    pub fn sign_bytes(&self, msg: &[u8]) -> Signature {
        Signature(self.key.sign(msg).to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // never print key material
        write!(f, "PrivateKey({})", self.public_key())
    }
}
