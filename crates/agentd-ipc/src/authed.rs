//! Authenticated framing.
//!
//! Wraps the framed transport with an AEAD: each frame is a `DATA_PACKET`
//! whose payload is `(nonce_be64, ciphertext || mac)`. Both directions
//! keep a 64-bit counter starting at zero after handshake; every frame
//! bumps its direction's counter by exactly one, so replay, reordering and
//! omission all surface as authentication failures and drop the session.
//!
//! The framing is agnostic to the AEAD behind [`CryptoSuite`]; the default
//! suite is ChaCha20-Poly1305. Key establishment happens elsewhere — a
//! session starts from a caller-provided shared secret.

use crate::blocking;
use crate::error::IpcError;
use crate::nonblock::SocketContext;
use agentd_wire::mem::{WipingBuf, wipe};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use std::os::unix::io::RawFd;

/// An authenticated-encryption suite pluggable under the framing.
pub trait CryptoSuite {
    /// Seals `plaintext` under the direction nonce, returning
    /// `ciphertext || mac`.
    fn seal(&self, nonce: u64, plaintext: &[u8]) -> Result<Vec<u8>, IpcError>;

    /// Opens `sealed` under the direction nonce, returning the plaintext.
    fn open(&self, nonce: u64, sealed: &[u8]) -> Result<Vec<u8>, IpcError>;
}

/// The default suite: ChaCha20-Poly1305 under a 32-byte session secret.
pub struct ChaCha20Poly1305Suite {
    cipher: ChaCha20Poly1305,
}

impl ChaCha20Poly1305Suite {
    /// Builds a suite from a shared session secret.
    pub fn new(shared_secret: &[u8; 32]) -> ChaCha20Poly1305Suite {
        ChaCha20Poly1305Suite {
            cipher: ChaCha20Poly1305::new(Key::from_slice(shared_secret)),
        }
    }

    fn nonce_bytes(nonce: u64) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[4..].copy_from_slice(&nonce.to_be_bytes());
        out
    }
}

impl CryptoSuite for ChaCha20Poly1305Suite {
    fn seal(&self, nonce: u64, plaintext: &[u8]) -> Result<Vec<u8>, IpcError> {
        let raw = Self::nonce_bytes(nonce);
        self.cipher
            .encrypt(Nonce::from_slice(&raw), plaintext)
            .map_err(|_| IpcError::AuthFailure)
    }

    fn open(&self, nonce: u64, sealed: &[u8]) -> Result<Vec<u8>, IpcError> {
        let raw = Self::nonce_bytes(nonce);
        self.cipher
            .decrypt(Nonce::from_slice(&raw), sealed)
            .map_err(|_| IpcError::AuthFailure)
    }
}

fn seal_frame(
    suite: &dyn CryptoSuite,
    iv_out: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, IpcError> {
    let sealed = suite.seal(iv_out, plaintext)?;
    let mut frame = Vec::with_capacity(8 + sealed.len());
    frame.extend_from_slice(&iv_out.to_be_bytes());
    frame.extend_from_slice(&sealed);
    Ok(frame)
}

fn open_frame(
    suite: &dyn CryptoSuite,
    iv_in: u64,
    mut frame: Vec<u8>,
) -> Result<WipingBuf, IpcError> {
    if frame.len() < 8 {
        wipe(&mut frame);
        return Err(IpcError::AuthFailure);
    }

    let mut raw_iv = [0u8; 8];
    raw_iv.copy_from_slice(&frame[..8]);
    let frame_iv = u64::from_be_bytes(raw_iv);
    if frame_iv != iv_in {
        wipe(&mut frame);
        return Err(IpcError::AuthFailure);
    }

    let result = suite.open(iv_in, &frame[8..]);
    wipe(&mut frame);
    result.map(WipingBuf::new)
}

/// Writes one authenticated frame on a blocking socket and bumps the send
/// counter.
pub fn write_authed_block(
    fd: RawFd,
    suite: &dyn CryptoSuite,
    iv_out: &mut u64,
    plaintext: &[u8],
) -> Result<(), IpcError> {
    let mut frame = seal_frame(suite, *iv_out, plaintext)?;
    let result = blocking::write_data(fd, &frame);
    wipe(&mut frame);
    result?;
    *iv_out += 1;
    Ok(())
}

/// Reads one authenticated frame on a blocking socket, verifies the
/// receive counter and MAC, and bumps the counter.
///
/// Any verification failure is fatal: the caller must drop the session.
pub fn read_authed_block(
    fd: RawFd,
    suite: &dyn CryptoSuite,
    iv_in: &mut u64,
) -> Result<WipingBuf, IpcError> {
    let frame = blocking::read_data(fd)?;
    let plaintext = open_frame(suite, *iv_in, frame)?;
    *iv_in += 1;
    Ok(plaintext)
}

/// Queues one authenticated frame on a socket context and bumps the send
/// counter.
pub fn write_authed(
    ctx: &mut SocketContext,
    suite: &dyn CryptoSuite,
    iv_out: &mut u64,
    plaintext: &[u8],
) -> Result<(), IpcError> {
    let mut frame = seal_frame(suite, *iv_out, plaintext)?;
    ctx.write_data(&frame);
    wipe(&mut frame);
    *iv_out += 1;
    Ok(())
}

/// Reads one authenticated frame off a socket context's input buffer.
///
/// Reports *would-block* while the frame is incomplete; the receive
/// counter only advances on successful verification.
pub fn read_authed(
    ctx: &mut SocketContext,
    suite: &dyn CryptoSuite,
    iv_in: &mut u64,
) -> Result<WipingBuf, IpcError> {
    let frame = ctx.read_data()?;
    let plaintext = open_frame(suite, *iv_in, frame)?;
    *iv_in += 1;
    Ok(plaintext)
}
