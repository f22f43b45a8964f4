use std::ops::Range;

/// Contiguous byte range of the candidate being partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: usize,
    pub len: usize,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Splits `candidate` into `n` balanced chunks, in order.
///
/// With `q = len / n` and `r = len % n`, the first `r` chunks hold `q + 1`
/// bytes and the remaining ones hold `q`.
///
/// # Panics
///
/// Panics if `n` is zero or larger than `candidate.len()`.
pub fn partition(candidate: &[u8], n: usize) -> Vec<Chunk> {
    assert!(
        n >= 1 && n <= candidate.len(),
        "cannot split {} bytes into {n} chunks",
        candidate.len()
    );
    (0..n).map(|index| chunk_at(candidate.len(), index, n)).collect()
}

/// Range of chunk `index` when `len` bytes are split into `n` chunks.
pub fn chunk_at(len: usize, index: usize, n: usize) -> Chunk {
    assert!(
        n >= 1 && n <= len,
        "cannot split {len} bytes into {n} chunks"
    );
    assert!(index < n, "chunk index {index} out of range for {n} chunks");
    let q = len / n;
    let r = len % n;
    Chunk {
        start: index * q + index.min(r),
        len: q + usize::from(index < r),
    }
}

/// Bytes of chunk `index` alone.
pub fn chunk(candidate: &[u8], index: usize, n: usize) -> Vec<u8> {
    candidate[chunk_at(candidate.len(), index, n).range()].to_vec()
}

/// `candidate` with chunk `index` deleted; the remaining bytes keep their order.
pub fn complement(candidate: &[u8], index: usize, n: usize) -> Vec<u8> {
    let removed = chunk_at(candidate.len(), index, n);
    let mut out = Vec::with_capacity(candidate.len() - removed.len);
    out.extend_from_slice(&candidate[..removed.start]);
    out.extend_from_slice(&candidate[removed.end()..]);
    out
}
