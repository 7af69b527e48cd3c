use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::bits::{retrieve, select, BitArray};
use crate::error::Error;
use crate::Result;

/// A skip-index entry is recorded once per this many items.
pub const QUANTUM: u64 = 128;

/// Compress a non-decreasing list of integers into an Elias-Fano coded byte
/// block.
///
/// Each value is split into `low_bits` low bits, packed densely, and a high
/// part, unary-coded into a bitmap: the i-th item's high part `h` sets bit
/// `h + i`. A skip entry every [`QUANTUM`] items bounds the bitmap scan for
/// random access. The block layout is
///
/// ```text
/// u32 n | u16 low_bits | u16 high_bits | u32[] skip | low strip | high strip
/// ```
///
/// padded to a 4-byte boundary. The universe is taken to be the final (and
/// largest) item.
///
/// The input must be non-empty; lists of 2^32 or more items are refused.
pub fn compress(items: &[u64]) -> Result<Vec<u8>> {
    let n = items.len() as u64;
    assert!(n > 0, "cannot compress an empty list");
    if n >= 1 << 32 {
        return Err(Error::ListOverflow(n));
    }
    let u = *items.last().unwrap();
    let (low_bits, high_bits) = split_bits(n, u);

    let mut low = BitArray::new();
    let high_size = n + (u >> low_bits);
    let mut high = vec![0u8; ((high_size + 7) >> 3) as usize];
    let mut skip: Vec<u32> = Vec::new();

    let mut last = 0u64;
    let mut hbit = 0u64;
    for (ix, &item) in items.iter().enumerate() {
        let ix = ix as u64;
        assert!(item >= last, "list is not monotonic");
        assert!(item <= u);
        low.append(item, low_bits);
        if high_bits > 0 {
            if ix > 0 && ix % QUANTUM == 0 {
                // Where the scan for this quantum's first item begins: one
                // past the previous item's bit.
                assert!(hbit + 1 < 1 << 32);
                skip.push((hbit + 1) as u32);
            }
            hbit = (item >> low_bits) + ix;
            high[(hbit >> 3) as usize] |= 1 << (hbit & 7);
        }
        last = item;
    }
    low.finish();

    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(n as u32)?;
    out.write_u16::<LittleEndian>(low_bits as u16)?;
    out.write_u16::<LittleEndian>(high_bits as u16)?;
    for s in &skip {
        out.write_u32::<LittleEndian>(*s)?;
    }
    out.write_all(low.as_bytes())?;
    out.write_all(&high)?;
    while out.len() & 3 != 0 {
        out.push(0);
    }
    Ok(out)
}

/// Low/high split for a list of `n` items over universe `u`.
fn split_bits(n: u64, u: u64) -> (u32, u32) {
    if u == 0 {
        // Degenerate: every item is zero.
        return (1, 0);
    }
    let ratio = u / n;
    let low_bits = if ratio >= 2 { ratio.ilog2() } else { 1 };
    let high_bits = (u.ilog2() + 1).saturating_sub(low_bits);
    (low_bits, high_bits)
}

/// Zero-copy reader over a [`compress`]ed block.
///
/// All operations cost O(1) header arithmetic plus at most one bounded scan
/// of [`QUANTUM`] high-strip bits.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicList<'a> {
    n: u64,
    low_bits: u32,
    high_bits: u32,
    skip: &'a [u8],
    low: &'a [u8],
    high: &'a [u8],
}

impl<'a> MonotonicList<'a> {
    /// Parse a block starting at the beginning of `b`. Trailing bytes beyond
    /// the block are ignored, so `b` may extend to the end of the artifact.
    pub fn parse(b: &'a [u8]) -> Result<Self> {
        if b.len() < 8 {
            return Err(Error::Corrupt("monotonic list header"));
        }
        let n = LittleEndian::read_u32(&b[0..4]) as u64;
        let low_bits = LittleEndian::read_u16(&b[4..6]) as u32;
        let high_bits = LittleEndian::read_u16(&b[6..8]) as u32;
        if low_bits == 0 || low_bits > 57 {
            return Err(Error::Corrupt("monotonic list bit split"));
        }
        let skip_len = if high_bits > 0 && n > 0 {
            ((n - 1) / QUANTUM) as usize * 4
        } else {
            0
        };
        let low_len = ((n * low_bits as u64 + 7) / 8) as usize;
        let skip_end = 8 + skip_len;
        let low_end = skip_end + low_len;
        if low_end > b.len() {
            return Err(Error::Corrupt("monotonic list strips"));
        }
        Ok(Self {
            n,
            low_bits,
            high_bits,
            skip: &b[8..skip_end],
            low: &b[skip_end..low_end],
            high: &b[low_end..],
        })
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
        let low = retrieve(self.low, ix * self.low_bits as u64, self.low_bits);
        if self.high_bits == 0 {
            return low;
        }
        let pos = self.high_pos(ix);
        ((pos - ix) << self.low_bits) | low
    }

    /// The values at `ix` and `ix + 1`. Cheaper than two lookups because the
    /// high-strip scan continues from the first hit.
    pub fn lookup_pair(&self, ix: u64) -> (u64, u64) {
        assert!(ix + 1 < self.n, "pair at {ix} out of bounds for length {}", self.n);
        let low1 = retrieve(self.low, ix * self.low_bits as u64, self.low_bits);
        let low2 = retrieve(self.low, (ix + 1) * self.low_bits as u64, self.low_bits);
        if self.high_bits == 0 {
            return (low1, low2);
        }
        let pos1 = self.high_pos(ix);
        let pos2 = select(self.high, pos1 + 1, 1);
        (
            ((pos1 - ix) << self.low_bits) | low1,
            ((pos2 - ix - 1) << self.low_bits) | low2,
        )
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

    /// Like [`search`](Self::search), but the stored values carry a running
    /// prefix: the value at `p1 - 1` (or 0 when `p1 == 0`) is added to `v`
    /// before comparing.
    pub fn search_prefix(&self, p1: u64, p2: u64, v: u64) -> Option<u64> {
        let prefix = if p1 == 0 { 0 } else { self.lookup(p1 - 1) };
        self.search(p1, p2, v + prefix)
    }

    // Bit position of item `ix`'s 1-bit in the high strip.
    #[inline]
    fn high_pos(&self, ix: u64) -> u64 {
        let q = (ix / QUANTUM) as usize;
        let start = if q == 0 {
            0
        } else {
            LittleEndian::read_u32(&self.skip[(q - 1) * 4..q * 4]) as u64
        };
        select(self.high, start, ix % QUANTUM + 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn roundtrip(items: &[u64]) {
        let b = compress(items).unwrap();
        let ml = MonotonicList::parse(&b).unwrap();
        assert_eq!(ml.len(), items.len() as u64);
        for (i, &v) in items.iter().enumerate() {
            assert_eq!(ml.lookup(i as u64), v, "mismatch at index {i}");
        }
    }

    #[test]
    fn test_single_element() {
        roundtrip(&[17]);
        roundtrip(&[0]);
    }

    #[test]
    fn test_all_zero() {
        roundtrip(&[0; 500]);
    }

    #[test]
    fn test_random_lists() {
        let mut rng = StdRng::seed_from_u64(0x1337);
        for _ in 0..50 {
            let len = rng.gen_range(1..1000);
            let mut items: Vec<u64> = (0..len).map(|_| rng.gen_range(0..2_000_000)).collect();
            items.sort_unstable();
            roundtrip(&items);
        }
    }

    #[test]
    fn test_large_strided() {
        let items: Vec<u64> = (0..1_380_000).map(|i| i * 17).collect();
        let b = compress(&items).unwrap();
        let ml = MonotonicList::parse(&b).unwrap();
        assert_eq!(ml.lookup(1_343_085), 1_343_085 * 17);
        assert_eq!(ml.lookup(0), 0);
        assert_eq!(ml.lookup(1_379_999), 1_379_999 * 17);
    }

    #[test]
    fn test_lookup_pair() {
        let items: Vec<u64> = (0..300).map(|i| i * 3 + i % 2).collect();
        let b = compress(&items).unwrap();
        let ml = MonotonicList::parse(&b).unwrap();
        for i in 0..299 {
            let (a, b) = ml.lookup_pair(i);
            assert_eq!(a, items[i as usize]);
            assert_eq!(b, items[i as usize + 1]);
        }
    }

    #[test]
    fn test_search() {
        let items = vec![3, 3, 7, 9, 9, 9, 12, 40, 41, 60];
        let b = compress(&items).unwrap();
        let ml = MonotonicList::parse(&b).unwrap();
        assert_eq!(ml.search(0, 10, 9), Some(3));
        assert_eq!(ml.search(0, 10, 3), Some(0));
        assert_eq!(ml.search(1, 10, 3), Some(1));
        assert_eq!(ml.search(0, 10, 60), Some(9));
        assert_eq!(ml.search(0, 10, 8), None);
        assert_eq!(ml.search(4, 6, 12), None);
        assert_eq!(ml.search(3, 3, 9), None);
    }

    #[test]
    fn test_search_prefix() {
        // Two parent ranges with a running prefix: raw children of the
        // second parent are biased by the last value of the first.
        let items = vec![2, 5, 9, 9 + 1, 9 + 4];
        let b = compress(&items).unwrap();
        let ml = MonotonicList::parse(&b).unwrap();
        assert_eq!(ml.search_prefix(0, 3, 5), Some(1));
        assert_eq!(ml.search_prefix(3, 5, 1), Some(3));
        assert_eq!(ml.search_prefix(3, 5, 4), Some(4));
        assert_eq!(ml.search_prefix(3, 5, 5), None);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(MonotonicList::parse(&[1, 2, 3]).is_err());
        let b = compress(&[1, 2, 3]).unwrap();
        assert!(MonotonicList::parse(&b[..6]).is_err());
    }

    #[test]
    #[should_panic(expected = "not monotonic")]
    fn test_non_monotonic_input() {
        let _ = compress(&[5, 4]);
    }
}
