//! Variable-length coding for frequency-rank streams.
//!
//! Each n-gram level stores one small rank per node (an index into that
//! level's ascending table of observed counts). Ranks are assigned the
//! self-delimiting prefix codes `0, 1, 00, 01, 10, 11, 000, ...` in order of
//! decreasing popularity, so the ranks that occur most often cost one or two
//! bits. Code boundaries live in a parallel `startbits` array (a 1-bit at
//! the first bit of every code word), with a skip entry every [`QUANTUM`]
//! codes to bound the scan.

use std::cmp::Reverse;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::bits::{retrieve, select, BitArray};
use crate::error::Error;
use crate::Result;

/// A skip-index entry is recorded once per this many code words.
pub const QUANTUM: u64 = 1024;

/// Compress a stream of frequency ranks. Layout:
///
/// ```text
/// u16 num_ranks | u16[num_ranks] ranks in popularity order
/// u32 num_skip  | u32[num_skip] startbits positions
/// u32 num_bits  | cwbits [ceil(num_bits/8)] | startbits [ceil(num_bits/8)]
/// ```
pub fn compress(ranks: &[u32]) -> Result<Vec<u8>> {
    // Popularity count per rank.
    let mut cnt: Vec<(u32, u64)> = Vec::new();
    for &r in ranks {
        let r = r as usize;
        if r >= cnt.len() {
            cnt.resize(r + 1, (0, 0));
        }
        cnt[r].0 = r as u32;
        cnt[r].1 += 1;
    }
    let mut by_popularity: Vec<(u32, u64)> = cnt.into_iter().filter(|&(_, c)| c > 0).collect();
    by_popularity.sort_by_key(|&(r, c)| (Reverse(c), r));
    assert!(by_popularity.len() < 1 << 16, "too many distinct ranks");

    // Code word for the k-th most popular rank: the value (k+2) - 2^b in
    // b = floor(log2(k+2)) bits, which enumerates 0, 1, 00, 01, 10, 11, ...
    let mut codebook: Vec<(u64, u32)> = Vec::new();
    for (k, &(rank, _)) in by_popularity.iter().enumerate() {
        let b = (k as u64 + 2).ilog2();
        let cw = (k as u64 + 2) - (1 << b);
        let rank = rank as usize;
        if rank >= codebook.len() {
            codebook.resize(rank + 1, (0, 0));
        }
        codebook[rank] = (cw, b);
    }

    let mut cwbits = BitArray::new();
    let mut startbits = BitArray::new();
    let mut skip: Vec<u32> = Vec::new();
    for (ix, &r) in ranks.iter().enumerate() {
        if ix > 0 && ix as u64 % QUANTUM == 0 {
            skip.push(startbits.num_bits() as u32);
        }
        let (cw, b) = codebook[r as usize];
        cwbits.append(cw, b);
        startbits.append(1, b);
    }
    // Guard bit so the final code's length can be measured.
    startbits.append(1, 1);
    cwbits.append(0, 1);
    let num_bits = startbits.num_bits();
    cwbits.finish();
    startbits.finish();
    debug_assert_eq!(cwbits.as_bytes().len(), startbits.as_bytes().len());

    let mut out = Vec::new();
    out.write_u16::<LittleEndian>(by_popularity.len() as u16)?;
    for &(rank, _) in &by_popularity {
        debug_assert!(rank < 1 << 16);
        out.write_u16::<LittleEndian>(rank as u16)?;
    }
    out.write_u32::<LittleEndian>(skip.len() as u32)?;
    for &pos in &skip {
        out.write_u32::<LittleEndian>(pos)?;
    }
    assert!(num_bits < 1 << 32);
    out.write_u32::<LittleEndian>(num_bits as u32)?;
    out.write_all(cwbits.as_bytes())?;
    out.write_all(startbits.as_bytes())?;
    Ok(out)
}

/// Zero-copy reader over a [`compress`]ed rank stream.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyList<'a> {
    ranks: &'a [u8],
    skip: &'a [u8],
    cwbits: &'a [u8],
    startbits: &'a [u8],
}

impl<'a> FrequencyList<'a> {
    /// Parse a stream starting at the beginning of `b`; trailing bytes are
    /// ignored.
    pub fn parse(b: &'a [u8]) -> Result<Self> {
        if b.len() < 2 {
            return Err(Error::Corrupt("frequency stream header"));
        }
        let num_ranks = LittleEndian::read_u16(&b[0..2]) as usize;
        let ranks_end = 2 + 2 * num_ranks;
        if ranks_end + 4 > b.len() {
            return Err(Error::Corrupt("frequency rank table"));
        }
        let num_skip = LittleEndian::read_u32(&b[ranks_end..ranks_end + 4]) as usize;
        let skip_end = ranks_end + 4 + 4 * num_skip;
        if skip_end + 4 > b.len() {
            return Err(Error::Corrupt("frequency skip table"));
        }
        let num_bits = LittleEndian::read_u32(&b[skip_end..skip_end + 4]) as u64;
        let num_bytes = ((num_bits + 7) / 8) as usize;
        let cw_start = skip_end + 4;
        if cw_start + 2 * num_bytes > b.len() {
            return Err(Error::Corrupt("frequency bit arrays"));
        }
        Ok(Self {
            ranks: &b[2..ranks_end],
            skip: &b[ranks_end + 4..skip_end],
            cwbits: &b[cw_start..cw_start + num_bytes],
            startbits: &b[cw_start + num_bytes..cw_start + 2 * num_bytes],
        })
    }

    /// The rank stored at position `ix`.
    pub fn lookup(&self, ix: u64) -> u32 {
        let q = (ix / QUANTUM) as usize;
        let start = if q == 0 {
            0
        } else {
            LittleEndian::read_u32(&self.skip[(q - 1) * 4..q * 4]) as u64
        };
        let p = select(self.startbits, start, ix % QUANTUM + 1);
        let next = select(self.startbits, p + 1, 1);
        let bits = (next - p) as u32;
        let cw = retrieve(self.cwbits, p, bits);
        let k = (cw + (1 << bits) - 2) as usize;
        LittleEndian::read_u16(&self.ranks[k * 2..k * 2 + 2]) as u32
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn roundtrip(ranks: &[u32]) {
        let b = compress(ranks).unwrap();
        let fl = FrequencyList::parse(&b).unwrap();
        for (i, &r) in ranks.iter().enumerate() {
            assert_eq!(fl.lookup(i as u64), r, "mismatch at index {i}");
        }
    }

    #[test]
    fn test_single() {
        roundtrip(&[0]);
        roundtrip(&[9]);
    }

    #[test]
    fn test_empty_stream_parses() {
        let b = compress(&[]).unwrap();
        assert!(FrequencyList::parse(&b).is_ok());
    }

    #[test]
    fn test_skewed_stream() {
        // Zipf-ish: mostly rank 0, a tail of rarer ranks.
        let mut rng = StdRng::seed_from_u64(99);
        let ranks: Vec<u32> = (0..5000)
            .map(|_| {
                let roll: f64 = rng.gen();
                if roll < 0.6 {
                    0
                } else if roll < 0.85 {
                    1
                } else {
                    rng.gen_range(2..40)
                }
            })
            .collect();
        roundtrip(&ranks);
    }

    #[test]
    fn test_crosses_skip_quantum() {
        let ranks: Vec<u32> = (0..3000).map(|i| (i % 17) as u32).collect();
        let b = compress(&ranks).unwrap();
        let fl = FrequencyList::parse(&b).unwrap();
        // Spot-check right at and around the quantum boundaries.
        for ix in [0u64, 1023, 1024, 1025, 2047, 2048, 2999] {
            assert_eq!(fl.lookup(ix), (ix % 17) as u32);
        }
    }

    #[test]
    fn test_uniform_large_rank_space() {
        let ranks: Vec<u32> = (0..2000).map(|i| (i * 7 % 300) as u32).collect();
        roundtrip(&ranks);
    }
}
