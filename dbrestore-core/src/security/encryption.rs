//! Streaming AES-GCM envelope with PBKDF2-SHA256 key derivation.
//!
//! Encrypted dumps and pre-restore backups use a chunked envelope so they can
//! be produced and consumed without holding the whole file in memory:
//!
//! ```text
//! "Salted__" | salt (8) | base nonce (12) | { len: u32 BE | ciphertext+tag }* | 0u32
//! ```
//!
//! Each chunk is sealed independently. The nonce of chunk `i` is the base
//! nonce with its last 8 bytes replaced by `i` in big-endian order, so chunks
//! cannot be reordered or replayed without failing authentication.
//!
//! # Security Guarantees
//! - AES-GCM-256 authenticated encryption per chunk
//! - PBKDF2-HMAC-SHA256 key derivation with a random per-stream salt
//! - Key material is zeroed on drop
//!
//! The reader parses the header lazily on the first `read`, which means a
//! wrong passphrase surfaces as a decryption error on the first read rather
//! than at construction time.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use sha2::Sha256;
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

use crate::error::DbRestoreError;

/// Envelope magic written at the start of every encrypted stream
pub const ENVELOPE_MAGIC: &[u8; 8] = b"Salted__";

/// Per-stream salt size in bytes
pub const SALT_SIZE: usize = 8;

/// PBKDF2 iteration count for key derivation
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Plaintext bytes sealed per chunk by [`EncryptingWriter`]
pub const CHUNK_SIZE: usize = 64 * 1024;

const AES_GCM_NONCE_SIZE: usize = 12;
const AES_GCM_TAG_SIZE: usize = 16;
const AES_KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = ENVELOPE_MAGIC.len() + SALT_SIZE + AES_GCM_NONCE_SIZE;

/// Upper bound on a single sealed chunk; guards allocations against a
/// corrupted length prefix.
const MAX_SEALED_CHUNK: usize = 16 * 1024 * 1024;

fn derive_key(passphrase: &str, salt: &[u8]) -> Zeroizing<[u8; AES_KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut *key);
    key
}

/// Computes the nonce for chunk `counter` from the stream's base nonce.
pub fn chunk_nonce(
    base_nonce: &[u8; AES_GCM_NONCE_SIZE],
    counter: u64,
) -> [u8; AES_GCM_NONCE_SIZE] {
    let mut nonce = *base_nonce;
    nonce[AES_GCM_NONCE_SIZE - 8..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn decryption_error(context: impl Into<String>) -> io::Error {
    DbRestoreError::Decryption {
        context: context.into(),
    }
    .into_io()
}

struct CipherState {
    cipher: Aes256Gcm,
    base_nonce: [u8; AES_GCM_NONCE_SIZE],
}

/// Outcome of filling a fixed buffer from a reader that may be at EOF.
enum Fill {
    Full,
    Empty,
    Partial,
}

fn fill_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(match filled {
        0 => Fill::Empty,
        n if n == buf.len() => Fill::Full,
        _ => Fill::Partial,
    })
}

/// Decrypting `Read` adapter for the chunked envelope.
pub struct DecryptingReader<R> {
    inner: R,
    passphrase: Zeroizing<String>,
    state: Option<CipherState>,
    plaintext: Zeroizing<Vec<u8>>,
    position: usize,
    counter: u64,
    finished: bool,
}

impl<R: Read> DecryptingReader<R> {
    /// Wraps `inner`; no bytes are read until the first `read` call.
    ///
    /// # Errors
    /// Returns a configuration error if the passphrase is empty.
    pub fn new(inner: R, passphrase: &str) -> crate::Result<Self> {
        if passphrase.is_empty() {
            return Err(DbRestoreError::configuration(
                "Encryption passphrase must not be empty",
            ));
        }
        Ok(Self {
            inner,
            passphrase: Zeroizing::new(passphrase.to_string()),
            state: None,
            plaintext: Zeroizing::new(Vec::new()),
            position: 0,
            counter: 0,
            finished: false,
        })
    }

    fn read_header(&mut self) -> io::Result<CipherState> {
        let mut header = [0u8; HEADER_SIZE];
        match fill_exact(&mut self.inner, &mut header)? {
            Fill::Full => {}
            Fill::Empty | Fill::Partial => {
                return Err(decryption_error("stream too short for encryption header"));
            }
        }

        let (magic, rest) = header.split_at(ENVELOPE_MAGIC.len());
        if magic != ENVELOPE_MAGIC {
            return Err(decryption_error(
                "missing envelope header (file is not encrypted or is corrupted)",
            ));
        }
        let (salt, nonce) = rest.split_at(SALT_SIZE);

        let key = derive_key(&self.passphrase, salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        let mut base_nonce = [0u8; AES_GCM_NONCE_SIZE];
        base_nonce.copy_from_slice(nonce);

        Ok(CipherState { cipher, base_nonce })
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        if self.state.is_none() {
            self.state = Some(self.read_header()?);
        }

        let mut length = [0u8; 4];
        match fill_exact(&mut self.inner, &mut length)? {
            Fill::Full => {}
            // Streams written without an end marker still end on a chunk boundary.
            Fill::Empty => {
                self.finished = true;
                return Ok(());
            }
            Fill::Partial => {
                return Err(decryption_error(format!(
                    "truncated length prefix for chunk {}",
                    self.counter
                )));
            }
        }

        let sealed_len = u32::from_be_bytes(length) as usize;
        if sealed_len == 0 {
            self.finished = true;
            return Ok(());
        }
        if !(AES_GCM_TAG_SIZE..=MAX_SEALED_CHUNK).contains(&sealed_len) {
            return Err(decryption_error(format!(
                "invalid length {} for chunk {}",
                sealed_len, self.counter
            )));
        }

        let mut sealed = vec![0u8; sealed_len];
        if !matches!(fill_exact(&mut self.inner, &mut sealed)?, Fill::Full) {
            return Err(decryption_error(format!(
                "truncated ciphertext for chunk {}",
                self.counter
            )));
        }

        let Some(state) = self.state.as_ref() else {
            return Err(decryption_error("cipher state missing after header"));
        };
        let nonce = chunk_nonce(&state.base_nonce, self.counter);
        let plaintext = state
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|_| {
                decryption_error(format!(
                    "failed to decrypt chunk {} (wrong key or corrupted data)",
                    self.counter
                ))
            })?;

        self.plaintext = Zeroizing::new(plaintext);
        self.position = 0;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| decryption_error("chunk counter overflow"))?;
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.position >= self.plaintext.len() {
            if self.finished {
                return Ok(0);
            }
            self.next_chunk()?;
        }

        let available = &self.plaintext[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

/// Encrypting `Write` adapter producing the chunked envelope.
///
/// [`EncryptingWriter::finish`] must be called to seal the final partial
/// chunk and write the end marker.
pub struct EncryptingWriter<W: Write> {
    inner: W,
    cipher: Aes256Gcm,
    base_nonce: [u8; AES_GCM_NONCE_SIZE],
    pending: Zeroizing<Vec<u8>>,
    counter: u64,
}

impl<W: Write> EncryptingWriter<W> {
    /// Writes the envelope header to `inner` with a fresh salt and base nonce.
    ///
    /// # Errors
    /// Returns error if the passphrase is empty or the header cannot be written.
    pub fn new(mut inner: W, passphrase: &str) -> crate::Result<Self> {
        if passphrase.is_empty() {
            return Err(DbRestoreError::configuration(
                "Encryption passphrase must not be empty",
            ));
        }

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let mut base_nonce = [0u8; AES_GCM_NONCE_SIZE];
        OsRng.fill_bytes(&mut base_nonce);

        let key = derive_key(passphrase, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));

        inner
            .write_all(ENVELOPE_MAGIC)
            .and_then(|()| inner.write_all(&salt))
            .and_then(|()| inner.write_all(&base_nonce))
            .map_err(|e| DbRestoreError::io("Failed to write encryption header", e))?;

        Ok(Self {
            inner,
            cipher,
            base_nonce,
            pending: Zeroizing::new(Vec::with_capacity(CHUNK_SIZE)),
            counter: 0,
        })
    }

    fn seal(&mut self, plaintext: &[u8]) -> io::Result<()> {
        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| decryption_error(format!("failed to seal chunk {}", self.counter)))?;
        let length = u32::try_from(sealed.len())
            .map_err(|_| decryption_error("sealed chunk larger than u32::MAX"))?;

        self.inner.write_all(&length.to_be_bytes())?;
        self.inner.write_all(&sealed)?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| decryption_error("chunk counter overflow"))?;
        Ok(())
    }

    /// Seals buffered data, writes the end marker and returns the inner writer.
    ///
    /// # Errors
    /// Returns error if the final chunk or the end marker cannot be written.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            let remaining = std::mem::take(&mut *self.pending);
            self.seal(&remaining)?;
        }
        self.inner.write_all(&0u32.to_be_bytes())?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while self.pending.len() >= CHUNK_SIZE {
            let rest = self.pending.split_off(CHUNK_SIZE);
            let chunk = std::mem::replace(&mut *self.pending, rest);
            self.seal(&chunk)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
