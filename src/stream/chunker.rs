//! Fixed-size splitting and in-order reassembly of payloads.

use crate::error::ApiError;

/// Splits payloads into pieces of at most `chunk_size` bytes.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize) -> Result<Self, ApiError> {
        if chunk_size == 0 {
            return Err(ApiError::ValidationError(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `data` in order. Every piece but the last is exactly
    /// `chunk_size` long; empty input yields no pieces.
    pub fn chunk<'a>(&self, data: &'a [u8]) -> Vec<&'a [u8]> {
        data.chunks(self.chunk_size).collect()
    }

    /// Number of pieces `chunk` produces for `len` bytes.
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.chunk_size as u64)
    }

    /// Concatenate chunks given in index order.
    pub fn reassemble<I, B>(chunks: I) -> Vec<u8>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut payload = Vec::new();
        for chunk in chunks {
            payload.extend_from_slice(chunk.as_ref());
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(Chunker::new(0).is_err());
    }

    #[test]
    fn test_exact_multiple_and_short_tail() {
        let chunker = Chunker::new(4).unwrap();
        let data: Vec<u8> = (0..8).collect();
        let pieces = chunker.chunk(&data);
        assert_eq!(pieces.len(), 2);
        assert!(pieces.iter().all(|p| p.len() == 4));

        let data: Vec<u8> = (0..10).collect();
        let pieces = chunker.chunk(&data);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[2], &[8, 9]);
        assert_eq!(chunker.chunk_count(10), 3);
    }

    #[test]
    fn test_empty_input() {
        let chunker = Chunker::new(4).unwrap();
        assert!(chunker.chunk(&[]).is_empty());
        assert_eq!(chunker.chunk_count(0), 0);
        assert!(Chunker::reassemble(chunker.chunk(&[])).is_empty());
    }

    proptest! {
        #[test]
        fn prop_reassemble_inverts_chunk(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            chunk_size in 1usize..512,
        ) {
            let chunker = Chunker::new(chunk_size).unwrap();
            let pieces = chunker.chunk(&data);
            prop_assert_eq!(pieces.len() as u64, chunker.chunk_count(data.len() as u64));
            prop_assert_eq!(Chunker::reassemble(pieces), data);
        }
    }
}
