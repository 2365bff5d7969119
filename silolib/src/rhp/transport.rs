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

//! The encrypted point-to-point channel: an X25519 handshake
//! authenticated by the host's Ed25519 identity, then length-prefixed
//! ChaCha20-Poly1305 frames with per-direction sequence-number nonces.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use rand::RngCore;
use silo_common::codec::{read_next, write_next, SiloMessageCodec};
use silo_common::types::{Hash256, Specifier};
use silo_common::util::ed25519::{PrivateKey, PublicKey};
use silo_common::util::hash::Blake2bSum;

use crate::rhp::wire::{HandshakeRequest, HandshakeResponse, RpcError};
use crate::rhp::{Error, CIPHER_CHACHA20_POLY1305, LOOP_ENTER};

/// Timeout for the plaintext handshake messages.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const TRANSCRIPT_PREFIX: &[u8] = b"silo/rhp/session|";
const KEY_LABEL_RENTER_TO_HOST: &[u8] = b"renter-to-host";
const KEY_LABEL_HOST_TO_RENTER: &[u8] = b"host-to-renter";

/// The hash the host signs to authenticate the handshake.
fn transcript_hash(renter_eph: &[u8; 32], host_eph: &[u8; 32], cipher: &Specifier) -> Hash256 {
    let mut h = Blake2bSum::prefixed(TRANSCRIPT_PREFIX);
    h.update(renter_eph);
    h.update(host_eph);
    h.update(cipher.as_bytes());
    h.finalize()
}

/// Expand the ECDH secret into one key per direction.
fn derive_key(shared: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let mut h = Blake2bSum::keyed(shared);
    h.update(label);
    h.finalize().0
}

fn ecdh(secret: &[u8; 32], peer_public: &[u8; 32]) -> Result<[u8; 32], Error> {
    let shared = MontgomeryPoint(*peer_public).mul_clamped(*secret).to_bytes();
    // a low-order peer point yields an all-zero secret
    if shared == [0u8; 32] {
        return Err(Error::HandshakeError("low-order ephemeral key".into()));
    }
    Ok(shared)
}

struct Half {
    stream: TcpStream,
    cipher: ChaCha20Poly1305,
    seq: u64,
}

impl Half {
    fn nonce(&self) -> Nonce {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.seq.to_le_bytes());
        *Nonce::from_slice(&nonce)
    }
}

/// An established session channel. Read and write halves carry
/// independent keys and sequence numbers, so one thread can stream
/// responses while another watches for a stop signal.
pub struct Transport {
    reader: Mutex<Half>,
    writer: Mutex<Half>,
}

impl Transport {
    /// Host side of the handshake.
    pub fn accept(stream: TcpStream, host_key: &PrivateKey) -> Result<Transport, Error> {
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let mut plain = &stream;

        let enter: Specifier = read_next(&mut plain)?;
        if enter != LOOP_ENTER {
            return Err(Error::HandshakeError(format!(
                "expected session entry, got {}",
                enter
            )));
        }
        let request: HandshakeRequest = read_next(&mut plain)?;
        if !request.ciphers.contains(&CIPHER_CHACHA20_POLY1305) {
            return Err(Error::HandshakeError("no supported cipher".into()));
        }

        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let host_eph = X25519_BASEPOINT.mul_clamped(secret).to_bytes();
        let shared = ecdh(&secret, &request.ephemeral_key)?;

        let cipher = CIPHER_CHACHA20_POLY1305;
        let transcript = transcript_hash(&request.ephemeral_key, &host_eph, &cipher);
        let response = HandshakeResponse {
            ephemeral_key: host_eph,
            host_key: host_key.public_key(),
            signature: host_key.sign(&transcript),
            cipher,
        };
        let mut plain_w = &stream;
        write_next(&mut plain_w, &response)?;
        plain_w.flush()?;

        let recv_key = derive_key(&shared, KEY_LABEL_RENTER_TO_HOST);
        let send_key = derive_key(&shared, KEY_LABEL_HOST_TO_RENTER);
        Transport::new(stream, recv_key, send_key)
    }

    /// Renter side of the handshake; returns the host's authenticated
    /// identity alongside the channel.
    pub fn dial(stream: TcpStream) -> Result<(Transport, PublicKey), Error> {
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let renter_eph = X25519_BASEPOINT.mul_clamped(secret).to_bytes();

        let mut plain_w = &stream;
        write_next(&mut plain_w, &LOOP_ENTER)?;
        write_next(
            &mut plain_w,
            &HandshakeRequest {
                ephemeral_key: renter_eph,
                ciphers: vec![CIPHER_CHACHA20_POLY1305],
            },
        )?;
        plain_w.flush()?;

        let mut plain = &stream;
        let response: HandshakeResponse = read_next(&mut plain)?;
        if response.cipher != CIPHER_CHACHA20_POLY1305 {
            return Err(Error::HandshakeError(format!(
                "host selected unsupported cipher {}",
                response.cipher
            )));
        }
        let transcript = transcript_hash(&renter_eph, &response.ephemeral_key, &response.cipher);
        if !response.host_key.verify(&transcript, &response.signature) {
            return Err(Error::HandshakeError(
                "host identity signature does not verify".into(),
            ));
        }
        let shared = ecdh(&secret, &response.ephemeral_key)?;

        let send_key = derive_key(&shared, KEY_LABEL_RENTER_TO_HOST);
        let recv_key = derive_key(&shared, KEY_LABEL_HOST_TO_RENTER);
        let transport = Transport::new(stream, recv_key, send_key)?;
        Ok((transport, response.host_key))
    }

    fn new(stream: TcpStream, recv_key: [u8; 32], send_key: [u8; 32]) -> Result<Transport, Error> {
        let write_stream = stream.try_clone()?;
        Ok(Transport {
            reader: Mutex::new(Half {
                stream,
                cipher: ChaCha20Poly1305::new_from_slice(&recv_key)
                    .map_err(|e| Error::CryptoError(e.to_string()))?,
                seq: 0,
            }),
            writer: Mutex::new(Half {
                stream: write_stream,
                cipher: ChaCha20Poly1305::new_from_slice(&send_key)
                    .map_err(|e| Error::CryptoError(e.to_string()))?,
                seq: 0,
            }),
        })
    }

    /// Seal and send one frame: `u64 plaintext_len | ciphertext | tag`.
    fn write_frame(&self, plaintext: &[u8], timeout: Duration) -> Result<(), Error> {
        let mut writer = self.writer.lock().unwrap();
        writer.stream.set_write_timeout(Some(timeout))?;
        let nonce = writer.nonce();
        let ciphertext = writer
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::CryptoError("failed to seal frame".into()))?;
        writer.seq += 1;
        writer
            .stream
            .write_all(&(plaintext.len() as u64).to_le_bytes())?;
        writer.stream.write_all(&ciphertext)?;
        writer.stream.flush()?;
        Ok(())
    }

    /// Receive and open one frame of at most `max_len` plaintext bytes.
    fn read_frame(&self, max_len: u64, timeout: Duration) -> Result<Vec<u8>, Error> {
        let mut reader = self.reader.lock().unwrap();
        reader.stream.set_read_timeout(Some(timeout))?;
        let mut len_buf = [0u8; 8];
        if let Err(e) = reader.stream.read_exact(&mut len_buf) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(Error::PeerClosed);
            }
            return Err(Error::IOError(e));
        }
        let len = u64::from_le_bytes(len_buf);
        if len > max_len {
            return Err(Error::CodecError(silo_common::codec::Error::DeserializeError(
                format!("frame of {} bytes exceeds limit {}", len, max_len),
            )));
        }
        let mut ciphertext = vec![0u8; len as usize + 16];
        reader.stream.read_exact(&mut ciphertext)?;
        let nonce = reader.nonce();
        let plaintext = reader
            .cipher
            .decrypt(&nonce, ciphertext.as_slice())
            .map_err(|_| Error::CryptoError("failed to open frame".into()))?;
        reader.seq += 1;
        Ok(plaintext)
    }

    /// Send a bare object frame (requests, specifiers, signatures).
    pub fn write_object<T: SiloMessageCodec>(
        &self,
        obj: &T,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.write_frame(&obj.serialize_to_vec(), timeout)
    }

    /// Read a bare object frame.
    pub fn read_object<T: SiloMessageCodec>(
        &self,
        max_len: u64,
        timeout: Duration,
    ) -> Result<T, Error> {
        let frame = self.read_frame(max_len, timeout)?;
        let mut fd = &frame[..];
        Ok(T::consensus_deserialize(&mut fd)?)
    }

    /// Read the next RPC identifier.
    pub fn read_id(&self, timeout: Duration) -> Result<Specifier, Error> {
        self.read_object(MIN_FRAME, timeout)
    }

    /// Send a response object, flagged as success.
    pub fn write_response<T: SiloMessageCodec>(
        &self,
        obj: &T,
        timeout: Duration,
    ) -> Result<(), Error> {
        let mut frame = vec![0u8];
        obj.consensus_serialize(&mut frame)
            .map_err(Error::CodecError)?;
        self.write_frame(&frame, timeout)
    }

    /// Send an rpcError in place of a response object.
    pub fn write_error(&self, err: &RpcError, timeout: Duration) -> Result<(), Error> {
        let mut frame = vec![1u8];
        err.consensus_serialize(&mut frame)
            .map_err(Error::CodecError)?;
        self.write_frame(&frame, timeout)
    }

    /// Read a response object, surfacing a peer rpcError as
    /// [`Error::RpcError`].
    pub fn read_response<T: SiloMessageCodec>(
        &self,
        max_len: u64,
        timeout: Duration,
    ) -> Result<T, Error> {
        let frame = self.read_frame(max_len, timeout)?;
        let Some((&flag, body)) = frame.split_first() else {
            return Err(Error::CodecError(
                silo_common::codec::Error::UnderflowError("empty response frame".into()),
            ));
        };
        let mut fd = body;
        match flag {
            0 => Ok(T::consensus_deserialize(&mut fd)?),
            1 => Err(Error::RpcError(RpcError::consensus_deserialize(&mut fd)?)),
            x => Err(Error::CodecError(
                silo_common::codec::Error::DeserializeError(format!(
                    "invalid response flag 0x{:02x}",
                    x
                )),
            )),
        }
    }
}

/// Smallest useful frame limit; fits any specifier or signature frame.
const MIN_FRAME: u64 = 1024;

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn transport_pair() -> (Transport, Transport, PublicKey) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let host_key = PrivateKey::generate();
        let host_pub = host_key.public_key();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            Transport::accept(stream, &host_key).unwrap()
        });
        let stream = TcpStream::connect(addr).unwrap();
        let (renter, seen_key) = Transport::dial(stream).unwrap();
        let host = server.join().unwrap();
        assert_eq!(seen_key, host_pub);
        (renter, host, host_pub)
    }

    #[test]
    fn handshake_and_frames_roundtrip() {
        let (renter, host, _) = transport_pair();
        let timeout = Duration::from_secs(5);

        renter
            .write_object(&crate::rhp::RPC_SETTINGS_ID, timeout)
            .unwrap();
        let id = host.read_id(timeout).unwrap();
        assert_eq!(id, crate::rhp::RPC_SETTINGS_ID);

        // response in the other direction
        host.write_response(&42u64, timeout).unwrap();
        let x: u64 = renter.read_response(1024, timeout).unwrap();
        assert_eq!(x, 42);

        // error responses surface as Error::RpcError
        host.write_error(&RpcError::invalid_request("nope"), timeout)
            .unwrap();
        match renter.read_response::<u64>(1024, timeout) {
            Err(Error::RpcError(e)) => assert_eq!(e.error_type, super::super::wire::ERR_INVALID_REQUEST),
            other => panic!("expected rpc error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn sequence_numbers_advance() {
        let (renter, host, _) = transport_pair();
        let timeout = Duration::from_secs(5);
        for i in 0..5u64 {
            renter.write_object(&i, timeout).unwrap();
        }
        for i in 0..5u64 {
            let x: u64 = host.read_object(1024, timeout).unwrap();
            assert_eq!(x, i);
        }
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let (renter, host, _) = transport_pair();
        let timeout = Duration::from_secs(5);
        renter
            .write_frame(&vec![0u8; 4096], timeout)
            .unwrap();
        assert!(matches!(
            host.read_frame(1024, timeout),
            Err(Error::CodecError(_))
        ));
    }
}
