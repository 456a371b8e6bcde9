//! Reader pipeline: file, optional decryption, optional decompression.
//!
//! The layers are detected from the file name (`dump.sql.gz.enc` is a
//! gzip-compressed dump inside the encrypted envelope). Each layer owns the
//! one beneath it, so dropping the [`PreparedReader`] releases the layers in
//! reverse order of opening. Early returns while the chain is being built
//! release whatever was already opened the same way.

use crate::compression::{self, CompressionKind};
use crate::error::DbRestoreError;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read buffer placed directly over the source file.
pub const SOURCE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Buffer between the decrypting layer and the decoder's magic check.
const DECODER_BUFFER_SIZE: usize = 256 * 1024;

/// Extension marking an encrypted source.
pub const ENCRYPTED_EXTENSION: &str = "enc";

/// Layers detected from a source file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    /// Wrapped in the encrypted envelope
    pub encrypted: bool,
    /// Compression beneath the envelope
    pub compression: CompressionKind,
}

impl SourceFormat {
    /// Detects the layers from `path`'s extensions.
    ///
    /// # Example
    /// ```rust
    /// use dbrestore_core::compression::CompressionKind;
    /// use dbrestore_core::restore::pipeline::SourceFormat;
    /// use std::path::Path;
    ///
    /// let format = SourceFormat::detect(Path::new("backup/all.sql.zst.enc"));
    /// assert!(format.encrypted);
    /// assert_eq!(format.compression, CompressionKind::Zstd);
    /// ```
    pub fn detect(path: &Path) -> Self {
        let encrypted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ENCRYPTED_EXTENSION));
        let inner = if encrypted {
            path.with_extension("")
        } else {
            path.to_path_buf()
        };
        Self {
            encrypted,
            compression: CompressionKind::from_path(&inner),
        }
    }
}

/// One opened layer of a reader chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// The buffered source
    Source,
    /// Envelope decryption
    Decrypt,
    /// Stream decompression
    Decompress(CompressionKind),
}

/// Composed reader over a dump plus the layers it was built from.
pub struct PreparedReader {
    reader: Box<dyn Read + Send>,
    layers: Vec<Layer>,
    source: PathBuf,
}

impl std::fmt::Debug for PreparedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedReader")
            .field("source", &self.source)
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl PreparedReader {
    /// Layers in the order they were opened.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Source path this reader was opened from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Releases every layer, outermost first.
    pub fn close(self) {
        debug!(
            "Closing reader chain for {} ({} layers)",
            self.source.display(),
            self.layers.len()
        );
        drop(self);
    }
}

impl Read for PreparedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Opens `path` and composes decryption and decompression layers on top.
///
/// # Errors
/// - file not found or unreadable
/// - [`DbRestoreError::DecryptionUnavailable`] for an `.enc` file without key
/// - [`DbRestoreError::Decompression`] if the magic bytes do not match the
///   extension
///
/// A wrong key on an encrypted, uncompressed file is only detected on the
/// first read from the returned reader.
pub fn open_and_prepare_reader(path: &Path, key: Option<&str>) -> crate::Result<PreparedReader> {
    let file = File::open(path).map_err(|e| {
        DbRestoreError::io(format!("Failed to open dump file {}", path.display()), e)
    })?;
    prepare_reader(Box::new(file), path, key)
}

/// Composes the reader chain over an already-opened source.
///
/// `path` is only used for format detection and messages.
pub fn prepare_reader(
    source: Box<dyn Read + Send>,
    path: &Path,
    key: Option<&str>,
) -> crate::Result<PreparedReader> {
    let format = SourceFormat::detect(path);
    let mut layers = vec![Layer::Source];
    let mut reader: Box<dyn Read + Send> =
        Box::new(BufReader::with_capacity(SOURCE_BUFFER_SIZE, source));

    if format.encrypted {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return Err(DbRestoreError::DecryptionUnavailable {
                path: path.to_path_buf(),
            });
        };
        reader = decrypting(reader, key)?;
        layers.push(Layer::Decrypt);
    }

    if format.compression != CompressionKind::None {
        let mut buffered = BufReader::with_capacity(DECODER_BUFFER_SIZE, reader);
        compression::verify_magic(&mut buffered, format.compression)?;
        reader = compression::decoder(format.compression, buffered)?;
        layers.push(Layer::Decompress(format.compression));
    }

    debug!("Prepared reader for {}: {:?}", path.display(), layers);

    Ok(PreparedReader {
        reader,
        layers,
        source: path.to_path_buf(),
    })
}

#[cfg(feature = "encryption")]
fn decrypting(inner: Box<dyn Read + Send>, key: &str) -> crate::Result<Box<dyn Read + Send>> {
    let reader = crate::security::encryption::DecryptingReader::new(inner, key)?;
    Ok(Box::new(reader))
}

#[cfg(not(feature = "encryption"))]
fn decrypting(_inner: Box<dyn Read + Send>, _key: &str) -> crate::Result<Box<dyn Read + Send>> {
    Err(DbRestoreError::unsupported_feature(
        "encrypted dump files",
        "encryption",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that records how many times it was opened and released.
    struct CountingSource {
        inner: Cursor<Vec<u8>>,
        closed: Arc<AtomicUsize>,
    }

    impl Read for CountingSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for CountingSource {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting(data: Vec<u8>) -> (Box<dyn Read + Send>, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: Cursor::new(data),
            closed: Arc::clone(&closed),
        };
        (Box::new(source), closed)
    }

    #[test]
    fn test_detect_format_stacks_extensions() {
        let plain = SourceFormat::detect(Path::new("all.sql"));
        assert!(!plain.encrypted);
        assert_eq!(plain.compression, CompressionKind::None);

        let stacked = SourceFormat::detect(Path::new("all.sql.gz.enc"));
        assert!(stacked.encrypted);
        assert_eq!(stacked.compression, CompressionKind::Gzip);

        let enc_only = SourceFormat::detect(Path::new("all.sql.enc"));
        assert!(enc_only.encrypted);
        assert_eq!(enc_only.compression, CompressionKind::None);
    }

    #[test]
    fn test_plain_source_passes_through() {
        let (source, closed) = counting(b"USE `app`;\nSELECT 1;\n".to_vec());
        let mut reader = prepare_reader(source, Path::new("all.sql"), None).unwrap();
        assert_eq!(reader.layers(), &[Layer::Source]);

        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "USE `app`;\nSELECT 1;\n");

        reader.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_key_releases_source() {
        let (source, closed) = counting(b"Salted__".to_vec());
        let err = prepare_reader(source, Path::new("all.sql.enc"), None).unwrap_err();
        assert!(matches!(err, DbRestoreError::DecryptionUnavailable { .. }));
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let (source, closed) = counting(b"Salted__".to_vec());
        let err = prepare_reader(source, Path::new("all.sql.enc"), Some("")).unwrap_err();
        assert!(matches!(err, DbRestoreError::DecryptionUnavailable { .. }));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_bad_magic_releases_source() {
        let (source, closed) = counting(b"USE `app`;\n".to_vec());
        let err = prepare_reader(source, Path::new("all.sql.zst"), None).unwrap_err();
        assert!(matches!(err, DbRestoreError::Decompression { .. }));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_gzip_source_decodes() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"USE `app`;\n").unwrap();
        let (source, closed) = counting(encoder.finish().unwrap());

        let mut reader = prepare_reader(source, Path::new("all.sql.gz"), None).unwrap();
        assert_eq!(
            reader.layers(),
            &[Layer::Source, Layer::Decompress(CompressionKind::Gzip)]
        );
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "USE `app`;\n");

        drop(reader);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[cfg(all(feature = "compression", feature = "encryption"))]
    #[test]
    fn test_encrypted_compressed_source_decodes() {
        use crate::security::encryption::EncryptingWriter;

        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"USE `sales`;\nINSERT INTO t VALUES (1);\n").unwrap();
        let mut sealed = EncryptingWriter::new(Vec::new(), "pipeline-key").unwrap();
        sealed.write_all(&gz.finish().unwrap()).unwrap();
        let (source, closed) = counting(sealed.finish().unwrap());

        let mut reader =
            prepare_reader(source, Path::new("all.sql.gz.enc"), Some("pipeline-key")).unwrap();
        assert_eq!(
            reader.layers(),
            &[
                Layer::Source,
                Layer::Decrypt,
                Layer::Decompress(CompressionKind::Gzip)
            ]
        );
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert!(text.starts_with("USE `sales`;"));

        reader.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = open_and_prepare_reader(Path::new("/nonexistent/dump.sql"), None).unwrap_err();
        assert!(matches!(err, DbRestoreError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/dump.sql"));
    }
}
