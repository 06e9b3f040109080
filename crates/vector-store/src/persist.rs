//! Binary vector index artifact.
//!
//! ```text
//! offset  size  field
//! 0       8     magic "SIFTVEC\0"
//! 8       4     format_version (u32)
//! 12      4     dimension D (u32)
//! 16      8     vector_count N (u64)
//! 24      1     similarity_metric (0 = inner product)
//! 25      3     reserved, zero
//! 28      8     snapshot version (u64)
//! 36      N*D*4 vector data, row-major f32
//! ..      N*8   vector_id -> chunk_id table (u64)
//! ..      32    blake3 of everything above
//! ```
//!
//! All integers and floats are little-endian.

use crate::error::IndexError;
use crate::index::{FlatSnapshot, SimilarityMetric};
use std::path::Path;

pub const MAGIC: [u8; 8] = *b"SIFTVEC\0";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 36;
const CHECKSUM_LEN: usize = 32;

type IndexResult<T> = std::result::Result<T, IndexError>;

/// Decoded artifact header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub format_version: u32,
    pub dimension: usize,
    pub vector_count: usize,
    pub metric: SimilarityMetric,
    pub snapshot_version: u64,
}

#[must_use]
pub fn encode(snapshot: &FlatSnapshot) -> Vec<u8> {
    let count = snapshot.len();
    let mut out =
        Vec::with_capacity(HEADER_LEN + snapshot.data().len() * 4 + count * 8 + CHECKSUM_LEN);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(snapshot.dimension() as u32).to_le_bytes());
    out.extend_from_slice(&(count as u64).to_le_bytes());
    out.push(snapshot.metric().code());
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&snapshot.version().to_le_bytes());
    for value in snapshot.data() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    for chunk_id in snapshot.chunk_ids() {
        out.extend_from_slice(&chunk_id.to_le_bytes());
    }
    let checksum = blake3::hash(&out);
    out.extend_from_slice(checksum.as_bytes());
    out
}

/// Parse and validate the fixed-size header.
pub fn decode_header(bytes: &[u8]) -> IndexResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::Corrupt(format!(
            "artifact is {} bytes, shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    if bytes[..8] != MAGIC {
        return Err(IndexError::Corrupt("bad magic".to_string()));
    }
    let format_version = read_u32(bytes, 8);
    if format_version != FORMAT_VERSION {
        return Err(IndexError::UnsupportedFormat {
            found: format_version,
            expected: FORMAT_VERSION,
        });
    }
    let metric = SimilarityMetric::from_code(bytes[24]).ok_or_else(|| {
        IndexError::Corrupt(format!("unknown similarity metric {}", bytes[24]))
    })?;
    let vector_count = usize::try_from(read_u64(bytes, 16))
        .map_err(|_| IndexError::Corrupt("vector count overflows".to_string()))?;
    Ok(Header {
        format_version,
        dimension: read_u32(bytes, 12) as usize,
        vector_count,
        metric,
        snapshot_version: read_u64(bytes, 28),
    })
}

/// Decode an artifact, failing fast if its dimension differs from `expected_dimension`.
pub fn decode(bytes: &[u8], expected_dimension: usize) -> IndexResult<FlatSnapshot> {
    let header = decode_header(bytes)?;
    if header.dimension != expected_dimension {
        return Err(IndexError::DimensionMismatch {
            expected: expected_dimension,
            actual: header.dimension,
        });
    }

    let floats = header
        .vector_count
        .checked_mul(header.dimension)
        .ok_or_else(|| IndexError::Corrupt("vector data size overflows".to_string()))?;
    let data_end = floats
        .checked_mul(4)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| IndexError::Corrupt("vector data size overflows".to_string()))?;
    let ids_end = header
        .vector_count
        .checked_mul(8)
        .and_then(|n| n.checked_add(data_end))
        .ok_or_else(|| IndexError::Corrupt("id table size overflows".to_string()))?;
    if bytes.len() != ids_end + CHECKSUM_LEN {
        return Err(IndexError::Corrupt(format!(
            "expected {} bytes for {} vectors, found {}",
            ids_end + CHECKSUM_LEN,
            header.vector_count,
            bytes.len()
        )));
    }
    if blake3::hash(&bytes[..ids_end]).as_bytes() != &bytes[ids_end..] {
        return Err(IndexError::Corrupt("checksum mismatch".to_string()));
    }

    let data = bytes[HEADER_LEN..data_end]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let chunk_ids = bytes[data_end..ids_end]
        .chunks_exact(8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect();

    FlatSnapshot::from_parts(
        header.snapshot_version,
        header.dimension,
        header.metric,
        data,
        chunk_ids,
    )
}

pub async fn save(snapshot: &FlatSnapshot, path: impl AsRef<Path>) -> IndexResult<()> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = encode(snapshot);
    let tmp = path.with_extension("bin.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    log::debug!(
        "Saved vector index v{} ({} vectors) to {}",
        snapshot.version(),
        snapshot.len(),
        path.display()
    );
    Ok(())
}

pub async fn load(path: impl AsRef<Path>, expected_dimension: usize) -> IndexResult<FlatSnapshot> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await?;
    let snapshot = decode(&bytes, expected_dimension)?;
    log::debug!(
        "Loaded vector index v{} ({} vectors) from {}",
        snapshot.version(),
        snapshot.len(),
        path.display()
    );
    Ok(snapshot)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn snapshot() -> FlatSnapshot {
        FlatSnapshot::build(
            3,
            vec![
                (10, vec![1.0, 0.0, 0.0]),
                (11, vec![0.0, 0.6, 0.8]),
                (42, vec![0.0, 0.0, 1.0]),
            ],
        )
        .unwrap()
        .with_version(7)
    }

    #[test]
    fn header_fields_are_little_endian() {
        let bytes = encode(&snapshot());
        let header = decode_header(&bytes).unwrap();
        assert_eq!(
            header,
            Header {
                format_version: FORMAT_VERSION,
                dimension: 3,
                vector_count: 3,
                metric: SimilarityMetric::InnerProduct,
                snapshot_version: 7,
            }
        );
        assert_eq!(&bytes[12..16], &3u32.to_le_bytes());
        assert_eq!(bytes.len(), HEADER_LEN + 3 * 3 * 4 + 3 * 8 + 32);
    }

    #[test]
    fn rejects_wrong_dimension() {
        let bytes = encode(&snapshot());
        assert!(matches!(
            decode(&bytes, 4),
            Err(IndexError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn rejects_unknown_format_version() {
        let mut bytes = encode(&snapshot());
        bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes, 3),
            Err(IndexError::UnsupportedFormat {
                found: 2,
                expected: 1
            })
        ));
    }

    #[test]
    fn detects_flipped_bits_and_truncation() {
        let mut bytes = encode(&snapshot());
        bytes[HEADER_LEN + 5] ^= 0x40;
        assert!(matches!(decode(&bytes, 3), Err(IndexError::Corrupt(_))));

        let bytes = encode(&snapshot());
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1], 3),
            Err(IndexError::Corrupt(_))
        ));
        assert!(matches!(decode(&bytes[..10], 3), Err(IndexError::Corrupt(_))));
    }

    #[tokio::test]
    async fn save_then_load_preserves_search_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index").join("vectors.bin");
        let original = snapshot();
        save(&original, &path).await.unwrap();

        let loaded = load(&path, 3).await.unwrap();
        assert_eq!(loaded, original);
        for query in [[1.0, 0.0, 0.0], [0.0, 0.8, 0.6], [0.3, 0.3, 0.9]] {
            assert_eq!(
                loaded.search(&query, 3).unwrap(),
                original.search(&query, 3).unwrap()
            );
        }
        assert!(!path.with_extension("bin.tmp").exists());
    }

    #[tokio::test]
    async fn missing_artifact_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = load(tmp.path().join("absent.bin"), 3).await.unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }
}
