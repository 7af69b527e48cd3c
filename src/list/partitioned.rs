use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::Error;
use crate::list::monotonic::{self, MonotonicList};
use crate::Result;

/// Number of items per sub-list.
pub const QUANTUM: u64 = 2048;

/// Compress a non-decreasing list into a two-level partitioned Elias-Fano
/// block.
///
/// The input is cut into sub-lists of [`QUANTUM`] items. Each sub-list is
/// rebased to its first item and Elias-Fano coded on its own, so its universe
/// is the span within the chunk rather than the full range; the first items
/// of sub-lists 1.. go into an upper "chunks" list (the first sub-list is
/// implicitly based at 0). Layout:
///
/// ```text
/// u32 n_chunks | u32[n_chunks] chunk byte offsets (absolute within block)
///             | chunks MonotonicList | concatenated sub-lists
/// ```
///
/// An empty input is encoded with a zero-length chunk table; readers report
/// a zero-length list and queries never dereference it.
pub fn compress(items: &[u64]) -> Result<Vec<u8>> {
    if items.len() as u64 >= 1 << 32 {
        return Err(Error::ListOverflow(items.len() as u64));
    }

    // Minima of sub-lists 1.., the upper-level list.
    let mut chunks: Vec<u64> = Vec::new();
    // Byte offset of each sub-list within the merged buffer.
    let mut chunk_index: Vec<u64> = Vec::new();
    let mut merged: Vec<u8> = Vec::new();
    let mut sq: Vec<u64> = Vec::new();
    let mut prefix = 0u64;

    if !items.is_empty() {
        chunk_index.push(0);
    }
    for (ix, &item) in items.iter().enumerate() {
        if ix > 0 && ix as u64 % QUANTUM == 0 {
            chunks.push(item);
            prefix = item;
            merged.extend_from_slice(&monotonic::compress(&sq)?);
            chunk_index.push(merged.len() as u64);
            sq.clear();
        }
        assert!(item >= prefix, "list is not monotonic");
        sq.push(item - prefix);
    }
    if !sq.is_empty() {
        merged.extend_from_slice(&monotonic::compress(&sq)?);
    }

    let chunk_bytes = if chunks.is_empty() {
        // A bare zero-length header; never dereferenced by lookups.
        let mut b = Vec::new();
        b.write_u32::<LittleEndian>(0)?;
        b.write_u16::<LittleEndian>(1)?;
        b.write_u16::<LittleEndian>(0)?;
        b
    } else {
        monotonic::compress(&chunks)?
    };

    let offset = (4 + 4 * chunk_index.len() + chunk_bytes.len()) as u64;
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(chunk_index.len() as u32)?;
    for &pos in &chunk_index {
        assert!(pos + offset < 1 << 32);
        out.write_u32::<LittleEndian>((pos + offset) as u32)?;
    }
    out.extend_from_slice(&chunk_bytes);
    out.extend_from_slice(&merged);
    while out.len() & 3 != 0 {
        out.push(0);
    }
    Ok(out)
}

/// Zero-copy reader over a [`compress`]ed block.
#[derive(Debug, Clone, Copy)]
pub struct PartitionedList<'a> {
    b: &'a [u8],
    n: u64,
    num_chunks: u64,
    chunks: MonotonicList<'a>,
}

impl<'a> PartitionedList<'a> {
    /// Parse a block starting at the beginning of `b`. Cheap enough to run
    /// per query; [`validate`](Self::validate) deep-checks every sub-list
    /// once at load time.
    pub fn parse(b: &'a [u8]) -> Result<Self> {
        if b.len() < 4 {
            return Err(Error::Corrupt("partitioned list header"));
        }
        let num_chunks = LittleEndian::read_u32(&b[0..4]) as u64;
        let table_end = 4usize
            .checked_add(4 * num_chunks as usize)
            .filter(|&end| end <= b.len())
            .ok_or(Error::Corrupt("partitioned list chunk table"))?;
        let chunks = MonotonicList::parse(&b[table_end..])?;

        let mut n = 0u64;
        if num_chunks > 0 {
            let last = Self::sub_checked(b, num_chunks - 1)?;
            n = (num_chunks - 1) * QUANTUM + last.len();
        }
        Ok(Self {
            b,
            n,
            num_chunks,
            chunks,
        })
    }

    /// Check that every sub-list parses and has the expected length.
    pub fn validate(&self) -> Result<()> {
        for i in 0..self.num_chunks {
            let sub = Self::sub_checked(self.b, i)?;
            if i + 1 < self.num_chunks && sub.len() != QUANTUM {
                return Err(Error::Corrupt("short interior chunk"));
            }
        }
        Ok(())
    }

    fn sub_checked(b: &'a [u8], chunk: u64) -> Result<MonotonicList<'a>> {
        let at = 4 + 4 * chunk as usize;
        let off = LittleEndian::read_u32(&b[at..at + 4]) as usize;
        MonotonicList::parse(b.get(off..).ok_or(Error::Corrupt("chunk offset out of bounds"))?)
    }

    /// Number of items in the list.
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// The value at position `ix`.
    pub fn lookup(&self, ix: u64) -> u64 {
        assert!(ix < self.n, "index {ix} out of bounds for length {}", self.n);
        let chunk = ix / QUANTUM;
        self.base(chunk) + self.sub(chunk).lookup(ix % QUANTUM)
    }

    /// The values at `ix` and `ix + 1`, handling the chunk crossing at
    /// `ix % QUANTUM == QUANTUM - 1`.
    pub fn lookup_pair(&self, ix: u64) -> (u64, u64) {
        assert!(ix + 1 < self.n, "pair at {ix} out of bounds for length {}", self.n);
        let chunk = ix / QUANTUM;
        let within = ix % QUANTUM;
        if within + 1 < QUANTUM {
            let base = self.base(chunk);
            let (a, b) = self.sub(chunk).lookup_pair(within);
            (base + a, base + b)
        } else {
            (self.lookup(ix), self.lookup(ix + 1))
        }
    }

    /// Smallest position in `[p1, p2)` holding exactly `v`, if any.
    pub fn search(&self, p1: u64, p2: u64, v: u64) -> Option<u64> {
        let mut lo = p1;
        let mut hi = p2.min(self.n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.lookup(mid) < v {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < p2.min(self.n) && self.lookup(lo) == v).then_some(lo)
    }

    /// Like [`search`](Self::search) with the running-prefix convention: the
    /// value at `p1 - 1` (0 when `p1 == 0`) is added to `v` before comparing.
    pub fn search_prefix(&self, p1: u64, p2: u64, v: u64) -> Option<u64> {
        let prefix = if p1 == 0 { 0 } else { self.lookup(p1 - 1) };
        self.search(p1, p2, v + prefix)
    }

    // Base value of `chunk`: the stored minimum of every chunk but the first.
    #[inline]
    fn base(&self, chunk: u64) -> u64 {
        if chunk == 0 {
            0
        } else {
            self.chunks.lookup(chunk - 1)
        }
    }

    #[inline]
    fn sub(&self, chunk: u64) -> MonotonicList<'a> {
        let at = 4 + 4 * chunk as usize;
        let off = LittleEndian::read_u32(&self.b[at..at + 4]) as usize;
        MonotonicList::parse(&self.b[off..]).expect("chunks are validated by parse")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn roundtrip(items: &[u64]) -> Vec<u8> {
        let b = compress(items).unwrap();
        let pl = PartitionedList::parse(&b).unwrap();
        assert_eq!(pl.len(), items.len() as u64);
        for (i, &v) in items.iter().enumerate() {
            assert_eq!(pl.lookup(i as u64), v, "mismatch at index {i}");
        }
        b
    }

    #[test]
    fn test_empty() {
        let b = compress(&[]).unwrap();
        let pl = PartitionedList::parse(&b).unwrap();
        assert_eq!(pl.len(), 0);
        assert_eq!(pl.search(0, 0, 5), None);
        assert_eq!(pl.search_prefix(0, 0, 5), None);
    }

    #[test]
    fn test_single_chunk() {
        roundtrip(&[42]);
        let items: Vec<u64> = (0..2000).map(|i| i * 2).collect();
        roundtrip(&items);
    }

    #[test]
    fn test_chunk_boundaries() {
        for len in [QUANTUM - 1, QUANTUM, QUANTUM + 1, 3 * QUANTUM, 3 * QUANTUM + 7] {
            let items: Vec<u64> = (0..len).map(|i| i * 5 + (i % 3)).collect();
            let b = roundtrip(&items);
            let pl = PartitionedList::parse(&b).unwrap();
            for ix in 0..len - 1 {
                let (a, b) = pl.lookup_pair(ix);
                assert_eq!((a, b), (items[ix as usize], items[ix as usize + 1]));
            }
        }
    }

    #[test]
    fn test_random_search() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut items: Vec<u64> = (0..3 * QUANTUM).map(|_| rng.gen_range(0..10_000_000)).collect();
        items.sort_unstable();
        items.dedup();
        let b = compress(&items).unwrap();
        let pl = PartitionedList::parse(&b).unwrap();
        let n = items.len() as u64;
        for _ in 0..200 {
            let ix = rng.gen_range(0..items.len());
            assert_eq!(pl.search(0, n, items[ix]), Some(ix as u64));
        }
        // A value strictly between two neighbours is never found.
        for w in items.windows(2).take(50) {
            if w[1] > w[0] + 1 {
                assert_eq!(pl.search(0, n, w[0] + 1), None);
            }
        }
    }

    #[test]
    fn test_search_prefix_spans_chunks() {
        // Simulated per-parent prefix sums: parent A owns [0, QUANTUM + 10)
        // with raw children 0.., parent B the rest.
        let mut items: Vec<u64> = (0..QUANTUM + 10).map(|i| i * 2).collect();
        let bias = *items.last().unwrap();
        items.extend((0..QUANTUM).map(|i| bias + i * 3));
        let b = compress(&items).unwrap();
        let pl = PartitionedList::parse(&b).unwrap();
        let split = QUANTUM + 10;
        let n = items.len() as u64;
        assert_eq!(pl.search_prefix(0, split, 8), Some(4));
        assert_eq!(pl.search_prefix(split, n, 9), Some(split + 3));
        assert_eq!(pl.search_prefix(split, n, 10), None);
    }
}
