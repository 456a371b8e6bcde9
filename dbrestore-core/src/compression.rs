//! Compression detection and streaming decoders.
//!
//! The format is chosen from the file extension and then confirmed against
//! the stream's magic bytes before any decoder is built, so a mislabeled file
//! fails at open time instead of halfway through a restore.

use crate::error::DbRestoreError;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Read};
use std::path::Path;

/// Supported compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Plain stream
    #[default]
    None,
    /// gzip, including multi-member files from parallel compressors
    Gzip,
    /// Zstandard
    Zstd,
    /// xz / LZMA2
    Xz,
    /// Raw zlib
    Zlib,
}

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

impl CompressionKind {
    /// Detects the format from the last extension of `path`.
    ///
    /// Callers strip any encryption suffix first.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("gz") => Self::Gzip,
            Some("zst") => Self::Zstd,
            Some("xz") => Self::Xz,
            Some("zlib") => Self::Zlib,
            _ => Self::None,
        }
    }

    /// File extension (without dot) for this format.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gz"),
            Self::Zstd => Some("zst"),
            Self::Xz => Some("xz"),
            Self::Zlib => Some("zlib"),
        }
    }

    fn magic_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Gzip | Self::Zlib => 2,
            Self::Zstd => ZSTD_MAGIC.len(),
            Self::Xz => XZ_MAGIC.len(),
        }
    }

    /// Checks whether `header` starts with this format's signature.
    pub fn matches_magic(self, header: &[u8]) -> bool {
        match self {
            Self::None => true,
            Self::Gzip => header.starts_with(GZIP_MAGIC),
            Self::Zstd => header.starts_with(ZSTD_MAGIC),
            Self::Xz => header.starts_with(XZ_MAGIC),
            // CMF must declare deflate and CMF/FLG must be a multiple of 31.
            Self::Zlib => match header {
                [cmf, flg, ..] => {
                    cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0
                }
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Xz => "xz",
            Self::Zlib => "zlib",
        };
        f.write_str(name)
    }
}

/// Peeks at the buffered stream and verifies the magic bytes for `kind`.
///
/// Nothing is consumed. Errors raised while filling the buffer (for example
/// a decryption failure underneath) are returned with their original type.
pub fn verify_magic<R: BufRead>(reader: &mut R, kind: CompressionKind) -> crate::Result<()> {
    let needed = kind.magic_len();
    if needed == 0 {
        return Ok(());
    }

    let header = reader
        .fill_buf()
        .map_err(|e| DbRestoreError::from_stream_error("Failed to read stream header", e))?;
    if header.len() < needed {
        return Err(DbRestoreError::Decompression {
            context: format!("stream too short for {} header", kind),
        });
    }
    if !kind.matches_magic(header) {
        return Err(DbRestoreError::Decompression {
            context: format!("invalid {} header (bad magic bytes)", kind),
        });
    }
    Ok(())
}

/// Maps raw codec errors to [`DbRestoreError::Decompression`] while letting
/// typed errors from lower layers through unchanged.
struct ClassifyErrors<R> {
    inner: R,
    kind: CompressionKind,
}

impl<R: Read> Read for ClassifyErrors<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            if e.get_ref().is_some_and(|inner| inner.is::<DbRestoreError>()) {
                e
            } else {
                DbRestoreError::Decompression {
                    context: format!("{} stream: {}", self.kind, e),
                }
                .into_io()
            }
        })
    }
}

/// Builds a streaming decoder for `kind` over a buffered reader.
///
/// # Errors
/// Returns an unsupported-feature error when compression support is not
/// compiled in, or a decompression error if the decoder cannot start.
#[cfg(feature = "compression")]
pub fn decoder<R>(kind: CompressionKind, inner: R) -> crate::Result<Box<dyn Read + Send>>
where
    R: BufRead + Send + 'static,
{
    let decoded: Box<dyn Read + Send> = match kind {
        CompressionKind::None => Box::new(inner),
        CompressionKind::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(inner)),
        CompressionKind::Zlib => Box::new(flate2::bufread::ZlibDecoder::new(inner)),
        CompressionKind::Xz => Box::new(xz2::bufread::XzDecoder::new_multi_decoder(inner)),
        CompressionKind::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(inner).map_err(
            |e| DbRestoreError::Decompression {
                context: format!("failed to initialize zstd decoder: {}", e),
            },
        )?),
    };
    Ok(Box::new(ClassifyErrors {
        inner: decoded,
        kind,
    }))
}

/// Builds a streaming decoder for `kind` over a buffered reader.
#[cfg(not(feature = "compression"))]
pub fn decoder<R>(kind: CompressionKind, inner: R) -> crate::Result<Box<dyn Read + Send>>
where
    R: BufRead + Send + 'static,
{
    match kind {
        CompressionKind::None => Ok(Box::new(inner)),
        other => Err(DbRestoreError::unsupported_feature(
            format!("{} decompression", other),
            "compression",
        )),
    }
}

#[cfg(all(test, feature = "compression"))]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::path::PathBuf;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decode(kind: CompressionKind, data: Vec<u8>) -> crate::Result<Vec<u8>> {
        let mut reader = io::BufReader::new(Cursor::new(data));
        verify_magic(&mut reader, kind)?;
        let mut decoded = decoder(kind, reader)?;
        let mut out = Vec::new();
        decoded
            .read_to_end(&mut out)
            .map_err(|e| DbRestoreError::from_stream_error("decode", e))?;
        Ok(out)
    }

    #[test]
    fn test_detect_from_extension() {
        let cases = [
            ("all.sql.gz", CompressionKind::Gzip),
            ("all.sql.GZ", CompressionKind::Gzip),
            ("all.sql.zst", CompressionKind::Zstd),
            ("all.sql.xz", CompressionKind::Xz),
            ("all.sql.zlib", CompressionKind::Zlib),
            ("all.sql", CompressionKind::None),
            ("dump", CompressionKind::None),
        ];
        for (name, expected) in cases {
            assert_eq!(CompressionKind::from_path(&PathBuf::from(name)), expected, "{}", name);
        }
    }

    #[test]
    fn test_gzip_multi_member_decodes_fully() {
        let mut data = gzip(b"USE `a`;\n");
        data.extend(gzip(b"USE `b`;\n"));
        assert_eq!(decode(CompressionKind::Gzip, data).unwrap(), b"USE `a`;\nUSE `b`;\n");
    }

    #[test]
    fn test_zstd_xz_zlib_decode() {
        let plain = b"CREATE TABLE t (id INT);\n".repeat(50);

        let zstd_data = zstd::stream::encode_all(Cursor::new(&plain), 3).unwrap();
        assert_eq!(decode(CompressionKind::Zstd, zstd_data).unwrap(), plain);

        let mut xz = xz2::write::XzEncoder::new(Vec::new(), 6);
        xz.write_all(&plain).unwrap();
        assert_eq!(decode(CompressionKind::Xz, xz.finish().unwrap()).unwrap(), plain);

        let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        zlib.write_all(&plain).unwrap();
        assert_eq!(decode(CompressionKind::Zlib, zlib.finish().unwrap()).unwrap(), plain);
    }

    #[test]
    fn test_bad_magic_rejected_before_decoding() {
        let err = decode(CompressionKind::Gzip, b"USE `a`;\n".to_vec()).unwrap_err();
        assert!(matches!(err, DbRestoreError::Decompression { .. }));
        assert!(err.to_string().contains("bad magic"));

        let err = decode(CompressionKind::Zstd, vec![0x28]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_corrupt_body_reports_decompression_error() {
        let mut data = gzip(&b"INSERT INTO t VALUES (1);\n".repeat(100));
        let middle = data.len() / 2;
        for byte in &mut data[middle..middle + 4] {
            *byte ^= 0xff;
        }
        let err = decode(CompressionKind::Gzip, data).unwrap_err();
        assert!(matches!(err, DbRestoreError::Decompression { .. }));
    }

    #[test]
    fn test_zlib_magic_checksum() {
        assert!(CompressionKind::Zlib.matches_magic(&[0x78, 0x9c]));
        assert!(CompressionKind::Zlib.matches_magic(&[0x78, 0x01]));
        assert!(!CompressionKind::Zlib.matches_magic(&[0x78, 0x00]));
        assert!(!CompressionKind::Zlib.matches_magic(b"US"));
    }
}
