//! Content-addressed chunk URLs for streamed disk images.
//!
//! A chunk URL has the form `<baseUrl>/<contentHash>.chunk#<index>`. The hash
//! segment is the cache key, so identical chunks at different offsets (or in
//! different images) share a cache entry. The index only lives in the URL
//! fragment, which lets the fetcher work out which chunk a response belongs
//! to without defeating HTTP caching.

use std::io::Read;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ChunkError;

const CHUNK_SUFFIX: &str = ".chunk";

/// Largest chunk a spec can be built with; one chunk is buffered in memory
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Retrieval descriptor for a chunked disk image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedFileSpec {
    /// Logical file name (e.g. "System 7.5.3.dsk")
    pub name: String,

    /// URL prefix chunk hashes are appended to
    pub base_url: String,

    /// Total image size in bytes
    pub total_size: u64,

    /// Content hash of each chunk, in order
    pub chunks: Vec<String>,

    /// Size of every chunk except possibly the last
    pub chunk_size: u64,

    /// Chunk indices to fetch eagerly at startup
    #[serde(default)]
    pub prefetch_chunks: Vec<usize>,
}

impl ChunkedFileSpec {
    /// Build a spec by hashing an in-memory image.
    pub fn from_bytes(
        name: &str,
        base_url: &str,
        data: &[u8],
        chunk_size: u64,
    ) -> std::io::Result<Self> {
        Self::from_reader(name, base_url, data, chunk_size)
    }

    /// Build a spec by streaming `reader` one chunk at a time.
    ///
    /// Only one chunk is held in memory, so multi-gigabyte images can be
    /// processed directly from disk.
    pub fn from_reader<R: Read>(
        name: &str,
        base_url: &str,
        mut reader: R,
        chunk_size: u64,
    ) -> std::io::Result<Self> {
        let buf_len = match usize::try_from(chunk_size) {
            Ok(len) if len > 0 && chunk_size <= MAX_CHUNK_SIZE => len,
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "chunk size must be between 1 and {} bytes, got {}",
                        MAX_CHUNK_SIZE, chunk_size
                    ),
                ))
            }
        };

        let mut chunks = Vec::new();
        let mut total_size = 0u64;
        let mut buf = vec![0u8; buf_len];

        loop {
            let mut filled = 0;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            chunks.push(hex::encode(Sha256::digest(&buf[..filled])));
            total_size += filled as u64;
            if filled < buf.len() {
                break;
            }
        }

        debug!(
            "Hashed {} into {} chunks ({} bytes)",
            name,
            chunks.len(),
            total_size
        );

        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            total_size,
            chunks,
            chunk_size,
            prefetch_chunks: Vec::new(),
        })
    }

    /// Set the eagerly fetched chunk indices
    pub fn with_prefetch(mut self, prefetch_chunks: Vec<usize>) -> Self {
        self.prefetch_chunks = prefetch_chunks;
        self
    }

    /// Number of chunks the image size calls for
    pub fn expected_chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.total_size.div_ceil(self.chunk_size)
    }

    /// Check the chunk table against the declared sizes.
    pub fn validate(&self) -> Result<(), ChunkError> {
        let inconsistent = |reason: String| ChunkError::InconsistentSpec {
            name: self.name.clone(),
            reason,
        };

        if self.chunk_size == 0 {
            return Err(inconsistent("chunk size is zero".to_string()));
        }
        let expected = self.expected_chunk_count();
        if self.chunks.len() as u64 != expected {
            return Err(inconsistent(format!(
                "{} chunks listed, {} expected for {} bytes",
                self.chunks.len(),
                expected,
                self.total_size
            )));
        }
        if let Some(bad) = self
            .chunks
            .iter()
            .find(|hash| !is_content_hash(hash))
        {
            return Err(inconsistent(format!("chunk hash {:?} is not lowercase hex", bad)));
        }
        if let Some(&bad) = self.prefetch_chunks.iter().find(|&&i| i >= self.chunks.len()) {
            return Err(inconsistent(format!("prefetch chunk {} out of range", bad)));
        }
        Ok(())
    }

    /// Byte range of the image covered by chunk `index`
    pub fn chunk_range(&self, index: usize) -> Result<Range<u64>, ChunkError> {
        self.check_index(index)?;
        let start = (index as u64).saturating_mul(self.chunk_size);
        let end = start.saturating_add(self.chunk_size).min(self.total_size);
        Ok(start..end)
    }

    /// Index of the chunk containing byte `offset`
    pub fn chunk_index_for_offset(&self, offset: u64) -> Option<usize> {
        if self.chunk_size == 0 || offset >= self.total_size {
            return None;
        }
        Some((offset / self.chunk_size) as usize)
    }

    /// URLs of the eagerly fetched chunks, in declaration order
    pub fn prefetch_urls(&self) -> Result<Vec<String>, ChunkError> {
        self.prefetch_chunks
            .iter()
            .map(|&index| chunk_url(self, index))
            .collect()
    }

    fn check_index(&self, index: usize) -> Result<(), ChunkError> {
        if index >= self.chunks.len() {
            return Err(ChunkError::IndexOutOfRange {
                name: self.name.clone(),
                index,
                count: self.chunks.len(),
            });
        }
        Ok(())
    }
}

/// URL of chunk `index` of `spec`
pub fn chunk_url(spec: &ChunkedFileSpec, index: usize) -> Result<String, ChunkError> {
    spec.check_index(index)?;
    Ok(format!(
        "{}/{}{}#{}",
        spec.base_url, spec.chunks[index], CHUNK_SUFFIX, index
    ))
}

/// Split a chunk URL into its content hash and index.
pub fn parse_chunk_url(url: &str) -> Result<(&str, usize), ChunkError> {
    let malformed = || ChunkError::MalformedUrl(url.to_string());

    let (head, fragment) = url.rsplit_once('#').ok_or_else(malformed)?;
    if fragment.is_empty() || !fragment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let index: usize = fragment.parse().map_err(|_| malformed())?;

    let (_, file) = head
        .strip_suffix(CHUNK_SUFFIX)
        .and_then(|rest| rest.rsplit_once('/'))
        .ok_or_else(malformed)?;
    if !is_content_hash(file) {
        return Err(malformed());
    }

    Ok((file, index))
}

/// URL of the chunk following the one `url` refers to.
///
/// The first spec whose chunk table has the parsed hash at the parsed index
/// is used.
pub fn next_chunk_url(url: &str, specs: &[ChunkedFileSpec]) -> Result<String, ChunkError> {
    let (hash, index) = parse_chunk_url(url)?;
    let spec = specs
        .iter()
        .find(|spec| spec.chunks.get(index).map(String::as_str) == Some(hash))
        .ok_or_else(|| ChunkError::SpecNotFound(url.to_string()))?;
    chunk_url(spec, index + 1)
}

fn is_content_hash(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ChunkedFileSpec {
        ChunkedFileSpec {
            name: "System.dsk".to_string(),
            base_url: "/Disk/System".to_string(),
            total_size: 250,
            chunks: vec!["a1".to_string(), "b2".to_string(), "c3".to_string()],
            chunk_size: 100,
            prefetch_chunks: vec![0, 2],
        }
    }

    #[test]
    fn test_chunk_url_format() {
        assert_eq!(chunk_url(&spec(), 1).unwrap(), "/Disk/System/b2.chunk#1");
    }

    #[test]
    fn test_next_chunk_url_round_trip() {
        let spec = spec();
        let url = chunk_url(&spec, 1).unwrap();
        let next = next_chunk_url(&url, std::slice::from_ref(&spec)).unwrap();
        assert_eq!(next, chunk_url(&spec, 2).unwrap());
    }

    #[test]
    fn test_next_chunk_url_picks_matching_spec() {
        let mut other = spec();
        other.name = "Apps.dsk".to_string();
        other.base_url = "https://cdn.example/Apps".to_string();
        other.chunks = vec!["ff".to_string(), "b2".to_string(), "99".to_string()];

        let url = "https://elsewhere/b2.chunk#1";
        let specs = [spec(), other];
        assert_eq!(
            next_chunk_url(url, &specs).unwrap(),
            "/Disk/System/c3.chunk#2"
        );

        // Same hash at a different index only matches the spec that has it there.
        let url = "https://elsewhere/ff.chunk#0";
        assert_eq!(
            next_chunk_url(url, &specs).unwrap(),
            "https://cdn.example/Apps/b2.chunk#1"
        );
    }

    #[test]
    fn test_next_chunk_url_unknown_hash() {
        let err = next_chunk_url("/Disk/System/dead.chunk#1", &[spec()]).unwrap_err();
        assert!(matches!(err, ChunkError::SpecNotFound(_)));

        // Known hash, wrong index.
        let err = next_chunk_url("/Disk/System/a1.chunk#1", &[spec()]).unwrap_err();
        assert!(matches!(err, ChunkError::SpecNotFound(_)));
    }

    #[test]
    fn test_malformed_urls() {
        for url in [
            "/Disk/System/a1.chunk",
            "/Disk/System/a1.chunk#",
            "/Disk/System/a1.chunk#-1",
            "/Disk/System/a1.chunk#1x",
            "/Disk/System/A1.chunk#1",
            "/Disk/System/a1.bin#1",
            "/Disk/System/.chunk#1",
            "a1.chunk#1",
        ] {
            assert!(
                matches!(parse_chunk_url(url), Err(ChunkError::MalformedUrl(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_last_chunk_has_no_successor() {
        let err = next_chunk_url("/Disk/System/c3.chunk#2", &[spec()]).unwrap_err();
        assert!(matches!(err, ChunkError::IndexOutOfRange { index: 3, .. }));
    }

    #[test]
    fn test_chunk_ranges() {
        let spec = spec();
        assert_eq!(spec.chunk_range(0).unwrap(), 0..100);
        assert_eq!(spec.chunk_range(2).unwrap(), 200..250);
        assert!(spec.chunk_range(3).is_err());
        assert_eq!(spec.chunk_index_for_offset(199), Some(1));
        assert_eq!(spec.chunk_index_for_offset(250), None);
    }

    #[test]
    fn test_chunk_range_saturates_on_huge_chunk_size() {
        let mut huge = spec();
        huge.chunk_size = 1 << 63;
        huge.total_size = u64::MAX;
        assert_eq!(huge.chunk_range(1).unwrap(), (1 << 63)..u64::MAX);
        assert_eq!(huge.chunk_range(2).unwrap(), u64::MAX..u64::MAX);
    }

    #[test]
    fn test_validate() {
        assert!(spec().validate().is_ok());

        let mut short = spec();
        short.chunks.pop();
        assert!(matches!(
            short.validate(),
            Err(ChunkError::InconsistentSpec { .. })
        ));

        let mut bad_prefetch = spec();
        bad_prefetch.prefetch_chunks = vec![3];
        assert!(bad_prefetch.validate().is_err());
    }

    #[test]
    fn test_prefetch_urls() {
        assert_eq!(
            spec().prefetch_urls().unwrap(),
            vec!["/Disk/System/a1.chunk#0", "/Disk/System/c3.chunk#2"]
        );
    }

    #[test]
    fn test_from_bytes_dedups_identical_content() {
        let mut data = vec![0u8; 64];
        data.extend(vec![1u8; 32]);
        data.extend(vec![0u8; 32]);
        data.extend(vec![7u8; 10]);

        let spec = ChunkedFileSpec::from_bytes("img.dsk", "/Disk/img/", &data, 32).unwrap();
        assert_eq!(spec.total_size, 138);
        assert_eq!(spec.chunks.len(), 5);
        assert_eq!(spec.base_url, "/Disk/img");
        assert_eq!(spec.chunks[0], spec.chunks[1]);
        assert_eq!(spec.chunks[0], spec.chunks[3]);
        assert_ne!(spec.chunks[0], spec.chunks[2]);
        assert_eq!(spec.chunks[0].len(), 64);
        spec.validate().unwrap();
    }

    #[test]
    fn test_from_reader_rejects_unreasonable_chunk_sizes() {
        for chunk_size in [0, MAX_CHUNK_SIZE + 1, u64::MAX] {
            let err = ChunkedFileSpec::from_bytes("img.dsk", "/Disk", &[1, 2, 3], chunk_size)
                .unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_spec_json_is_camel_case() {
        let json = serde_json::to_value(spec()).unwrap();
        assert_eq!(json["baseUrl"], "/Disk/System");
        assert_eq!(json["totalSize"], 250);
        assert_eq!(json["chunkSize"], 100);
        assert_eq!(json["prefetchChunks"][1], 2);
    }
}
