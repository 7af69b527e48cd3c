//! The memory-mapped n-gram store reader.
//!
//! The artifact is one file: a 16-byte version tag, ten u32 section offsets,
//! and the section bodies. [`NgramStore::open`] maps the file, verifies the
//! tag, decodes the small tables (frequency buckets, vocabulary blob) and
//! keeps everything else as byte ranges into the map. Queries are pure reads
//! against the map and may run concurrently from any number of threads.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::GzDecoder;
use itertools::Itertools;
use memmap2::{Mmap, MmapOptions};

use crate::alphabet::Alphabet;
use crate::error::Error;
use crate::freqs::FrequencyList;
use crate::list::{MonotonicList, PartitionedList};
use crate::trie;
use crate::{Result, WordId, MAX_ORDER};

/// The artifact version tag; readers refuse anything else.
pub const VERSION: &[u8; 16] = b"Reynir 001.00.00";

/// Per-id vocabulary index entries are kept for ids below this cutoff.
pub const VOCAB_INDEX_CUTOFF: usize = 1024;

/// Above the cutoff, one vocabulary index entry covers this many tokens.
pub const VOCAB_QUANTUM_SIZE: usize = 64;

/// Section offset slots in the artifact header, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Section {
    Trie = 0,
    Freqs = 1,
    UnigramPtrs = 2,
    Bigrams = 3,
    BigramPtrs = 4,
    Trigrams = 5,
    UnigramFreqs = 6,
    BigramFreqs = 7,
    TrigramFreqs = 8,
    Vocab = 9,
}

pub const NUM_SECTIONS: usize = 10;

const ALL_SECTIONS: [Section; NUM_SECTIONS] = [
    Section::Trie,
    Section::Freqs,
    Section::UnigramPtrs,
    Section::Bigrams,
    Section::BigramPtrs,
    Section::Trigrams,
    Section::UnigramFreqs,
    Section::BigramFreqs,
    Section::TrigramFreqs,
    Section::Vocab,
];

/// A read-only view of a built artifact.
///
/// All handles derived from the store are byte ranges into a single
/// [`Mmap`]; dropping the store releases the map. Because queries take
/// `&self` and the store owns the map, use-after-close is unrepresentable.
pub struct NgramStore {
    mmap: Mmap,
    alphabet: Alphabet,
    offsets: [usize; NUM_SECTIONS],
    // Frequency buckets per level, ascending; level 0 is the grand total.
    freqs: [Vec<u64>; MAX_ORDER + 1],
    // The decompressed vocabulary blob of null-terminated tokens.
    vocab_blob: Vec<u8>,
    vocab_entries: usize,
    // Whether id 0 is the empty (sentence boundary) token.
    has_empty: bool,
    log_ucnt: f64,
}

impl NgramStore {
    /// Map an artifact with the default (Icelandic) alphabet.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_alphabet(path, Alphabet::icelandic())
    }

    /// Map an artifact built with the given alphabet.
    pub fn open_with_alphabet(path: &Path, alphabet: Alphabet) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let header_len = VERSION.len() + 4 * NUM_SECTIONS;
        if mmap.len() < header_len {
            return Err(Error::Corrupt("file shorter than the header"));
        }
        if &mmap[..VERSION.len()] != VERSION {
            return Err(Error::VersionMismatch);
        }

        let mut offsets = [0usize; NUM_SECTIONS];
        for s in ALL_SECTIONS {
            let at = VERSION.len() + 4 * s as usize;
            let off = LittleEndian::read_u32(&mmap[at..at + 4]) as usize;
            if off < header_len || off >= mmap.len() {
                return Err(Error::Corrupt("section offset outside the file"));
            }
            offsets[s as usize] = off;
        }

        let freqs = Self::read_freq_tables(&mmap, offsets[Section::Freqs as usize])?;
        let (vocab_blob, vocab_entries) =
            Self::read_vocab(&mmap, offsets[Section::Vocab as usize])?;
        let has_empty = vocab_blob.first() == Some(&0);
        let log_ucnt = ((freqs[0].first().copied().unwrap_or(0) + 1) as f64).ln();

        let store = Self {
            mmap,
            alphabet,
            offsets,
            freqs,
            vocab_blob,
            vocab_entries,
            has_empty,
            log_ucnt,
        };
        store.validate_lists()?;
        Ok(store)
    }

    fn read_freq_tables(mmap: &Mmap, off: usize) -> Result<[Vec<u64>; MAX_ORDER + 1]> {
        let mut tables: [Vec<u64>; MAX_ORDER + 1] = Default::default();
        let mut at = off;
        for table in tables.iter_mut() {
            if at + 4 > mmap.len() {
                return Err(Error::Corrupt("frequency table header"));
            }
            let n = LittleEndian::read_u32(&mmap[at..at + 4]) as usize;
            at += 4;
            if at + 4 * n > mmap.len() {
                return Err(Error::Corrupt("frequency table values"));
            }
            table.reserve(n);
            for _ in 0..n {
                table.push(LittleEndian::read_u32(&mmap[at..at + 4]) as u64);
                at += 4;
            }
        }
        if tables[0].is_empty() {
            return Err(Error::Corrupt("missing unigram total"));
        }
        Ok(tables)
    }

    fn read_vocab(mmap: &Mmap, off: usize) -> Result<(Vec<u8>, usize)> {
        if off + 4 > mmap.len() {
            return Err(Error::Corrupt("vocab header"));
        }
        let entries = LittleEndian::read_u32(&mmap[off..off + 4]) as usize;
        let blob_off = off + 4 + 4 * entries;
        if blob_off > mmap.len() {
            return Err(Error::Corrupt("vocab index"));
        }
        let mut blob = Vec::new();
        GzDecoder::new(&mmap[blob_off..]).read_to_end(&mut blob)?;
        Ok((blob, entries))
    }

    // Parse every list section once so the per-query accessors can assume
    // well-formed data.
    fn validate_lists(&self) -> Result<()> {
        let up = MonotonicList::parse(self.section(Section::UnigramPtrs))?;
        if up.is_empty() {
            return Err(Error::Corrupt("empty unigram pointer list"));
        }
        MonotonicList::parse(self.section(Section::BigramPtrs))?;
        PartitionedList::parse(self.section(Section::Bigrams))?.validate()?;
        PartitionedList::parse(self.section(Section::Trigrams))?.validate()?;
        FrequencyList::parse(self.section(Section::UnigramFreqs))?;
        FrequencyList::parse(self.section(Section::BigramFreqs))?;
        FrequencyList::parse(self.section(Section::TrigramFreqs))?;
        Ok(())
    }

    #[inline]
    fn section(&self, s: Section) -> &[u8] {
        &self.mmap[self.offsets[s as usize]..]
    }

    #[inline]
    fn unigram_ptrs(&self) -> MonotonicList<'_> {
        MonotonicList::parse(self.section(Section::UnigramPtrs)).expect("validated at load")
    }

    #[inline]
    fn bigram_ptrs(&self) -> MonotonicList<'_> {
        MonotonicList::parse(self.section(Section::BigramPtrs)).expect("validated at load")
    }

    #[inline]
    fn bigrams(&self) -> PartitionedList<'_> {
        PartitionedList::parse(self.section(Section::Bigrams)).expect("validated at load")
    }

    #[inline]
    fn trigrams(&self) -> PartitionedList<'_> {
        PartitionedList::parse(self.section(Section::Trigrams)).expect("validated at load")
    }

    #[inline]
    fn freq_list(&self, s: Section) -> FrequencyList<'_> {
        FrequencyList::parse(self.section(s)).expect("validated at load")
    }

    // The count stored for position `ix` of the given level's rank stream.
    #[inline]
    fn freq_value(&self, level: usize, s: Section, ix: u64) -> u64 {
        let rank = self.freq_list(s).lookup(ix);
        self.freqs[level][rank as usize]
    }

    /// Number of tokens in the vocabulary.
    pub fn vocab_size(&self) -> u64 {
        self.unigram_ptrs().len() - 1
    }

    /// The grand total of unigram occurrences (level-0 frequency).
    pub fn unigram_total(&self) -> u64 {
        self.freqs[0][0]
    }

    /// Whether id 0 is the empty (sentence boundary) token.
    pub fn has_empty_token(&self) -> bool {
        self.has_empty
    }

    /// Map a token to its vocabulary id. Tokens with out-of-alphabet
    /// characters and unknown tokens are `None`; the empty token maps to 0
    /// when it is enrolled.
    pub fn word_to_id(&self, word: &str) -> Option<WordId> {
        if word.is_empty() {
            return self.has_empty.then_some(0);
        }
        let key = self.alphabet.encode(word)?;
        trie::lookup(self.section(Section::Trie), &key)
    }

    /// Map a vocabulary id back to its token text.
    ///
    /// Ids below [`VOCAB_INDEX_CUTOFF`] hit a per-id index entry; larger ids
    /// locate a [`VOCAB_QUANTUM_SIZE`] block and scan forward through the
    /// null-terminated tokens.
    pub fn id_to_word(&self, id: WordId) -> String {
        let n = id as usize;
        let (q, mut r) = if n < VOCAB_INDEX_CUTOFF {
            (n, 0)
        } else {
            let t = (n - VOCAB_INDEX_CUTOFF) / VOCAB_QUANTUM_SIZE;
            (VOCAB_INDEX_CUTOFF + t, (n - VOCAB_INDEX_CUTOFF) % VOCAB_QUANTUM_SIZE)
        };
        let mut p = if q == 0 {
            0
        } else {
            self.vocab_entry(q - 1) as usize
        };
        while r > 0 {
            p += self.token_len(p) + 1;
            r -= 1;
        }
        // The end offset comes from the next index entry when one exists;
        // the last few tokens of a small vocabulary are found by scanning.
        let end = if n < VOCAB_INDEX_CUTOFF && n < self.vocab_entries {
            self.vocab_entry(n) as usize - 1
        } else {
            p + self.token_len(p)
        };
        self.alphabet.decode(&self.vocab_blob[p..end])
    }

    #[inline]
    fn vocab_entry(&self, ix: usize) -> u32 {
        debug_assert!(ix < self.vocab_entries);
        let at = self.offsets[Section::Vocab as usize] + 4 + 4 * ix;
        LittleEndian::read_u32(&self.mmap[at..at + 4])
    }

    #[inline]
    fn token_len(&self, p: usize) -> usize {
        self.vocab_blob[p..]
            .iter()
            .position(|&b| b == 0)
            .expect("vocab blob tokens are null-terminated")
    }

    /// Raw stored frequency of the unigram `i0`, or `None` for an unknown
    /// token.
    pub fn unigram_frequency(&self, i0: Option<WordId>) -> Option<u64> {
        let i0 = i0?;
        Some(self.freq_value(1, Section::UnigramFreqs, i0 as u64))
    }

    /// Raw stored frequency of the bigram `(i0, i1)`, or `None` when it is
    /// not in the store.
    pub fn bigram_frequency(&self, i0: Option<WordId>, i1: Option<WordId>) -> Option<u64> {
        let (i0, i1) = (i0?, i1?);
        if self.has_empty && i0 == 0 && i1 == 0 {
            return None;
        }
        let (p1, p2) = self.unigram_ptrs().lookup_pair(i0 as u64);
        let i = self.bigrams().search_prefix(p1, p2, i1 as u64)?;
        Some(self.freq_value(2, Section::BigramFreqs, i))
    }

    /// Raw stored frequency of the trigram `(i0, i1, i2)`, or `None` when it
    /// is not in the store.
    pub fn trigram_frequency(
        &self,
        i0: Option<WordId>,
        i1: Option<WordId>,
        i2: Option<WordId>,
    ) -> Option<u64> {
        let (i0, i1, i2) = (i0?, i1?, i2?);
        if self.has_empty {
            // The builder compacts boundary trigrams into bigrams, so the
            // degenerate shapes dispatch accordingly.
            if i0 == 0 && i1 == 0 && i2 == 0 {
                return None;
            }
            if i0 == 0 && i1 == 0 {
                // (0, 0, w2) was folded into the (0, w2) bigram.
                return self.bigram_frequency(Some(i1), Some(i2));
            }
            if i1 == 0 && i2 == 0 {
                // (w0, 0, 0) was folded into the (w0, 0) bigram.
                return self.bigram_frequency(Some(i0), Some(i1));
            }
        }
        let up = self.unigram_ptrs();
        let bigrams = self.bigrams();
        let (p1, p2) = up.lookup_pair(i0 as u64);
        let i = bigrams.search_prefix(p1, p2, i1 as u64)?;
        let (p1, p2) = self.bigram_ptrs().lookup_pair(i);
        if p1 >= p2 {
            return None;
        }
        // The trigram level stores w2 remapped to its position among the
        // sorted bigram children of w1.
        let (q1, q2) = up.lookup_pair(i1 as u64);
        let remapped = bigrams.search_prefix(q1, q2, i2 as u64)?;
        let j = self.trigrams().search_prefix(p1, p2, remapped - q1)?;
        Some(self.freq_value(3, Section::TrigramFreqs, j))
    }

    /// `ln P(i0)` with add-one smoothing against the unigram total.
    pub fn unigram_logprob(&self, i0: Option<WordId>) -> f64 {
        ln1(self.unigram_frequency(i0)) - self.log_ucnt
    }

    /// `ln P(i1 | i0)` with add-one smoothing.
    pub fn bigram_logprob(&self, i0: Option<WordId>, i1: Option<WordId>) -> f64 {
        ln1(self.bigram_frequency(i0, i1)) - ln1(self.unigram_frequency(i0))
    }

    /// `ln P(i2 | i0, i1)` with add-one smoothing.
    pub fn trigram_logprob(
        &self,
        i0: Option<WordId>,
        i1: Option<WordId>,
        i2: Option<WordId>,
    ) -> f64 {
        ln1(self.trigram_frequency(i0, i1, i2)) - ln1(self.bigram_frequency(i0, i1))
    }

    /// The at most `k` most likely successors of the unigram `i0`, best
    /// first, as `(token, logprob)` pairs.
    pub fn unigram_succ(&self, k: usize, i0: Option<WordId>) -> Vec<(String, f64)> {
        let Some(i0) = i0 else { return Vec::new() };
        let (p1, p2) = self.unigram_ptrs().lookup_pair(i0 as u64);
        if p1 >= p2 {
            return Vec::new();
        }
        let bigrams = self.bigrams();
        let prefix = if p1 == 0 { 0 } else { bigrams.lookup(p1 - 1) };
        let lp0 = ((self.freq_value(1, Section::UnigramFreqs, i0 as u64) + 1) as f64).ln();
        let mut result = Vec::with_capacity((p2 - p1) as usize);
        for i in p1..p2 {
            let id = (bigrams.lookup(i) - prefix) as WordId;
            let lpi = ((self.freq_value(2, Section::BigramFreqs, i) + 1) as f64).ln();
            result.push((id, lpi - lp0));
        }
        self.rank_successors(result, k)
    }

    /// The at most `k` most likely successors of the bigram `(i0, i1)`.
    pub fn bigram_succ(
        &self,
        k: usize,
        i0: Option<WordId>,
        i1: Option<WordId>,
    ) -> Vec<(String, f64)> {
        let (Some(i0), Some(i1)) = (i0, i1) else { return Vec::new() };
        let up = self.unigram_ptrs();
        let bigrams = self.bigrams();
        let (p1, p2) = up.lookup_pair(i0 as u64);
        if p1 >= p2 {
            return Vec::new();
        }
        let Some(i) = bigrams.search_prefix(p1, p2, i1 as u64) else {
            return Vec::new();
        };
        let (p1, p2) = self.bigram_ptrs().lookup_pair(i);
        if p1 >= p2 {
            return Vec::new();
        }
        // Successor ids are remapped positions into the bigram children of
        // i1; decode through that list.
        let (q1, _) = up.lookup_pair(i1 as u64);
        let prefix_bi = if q1 == 0 { 0 } else { bigrams.lookup(q1 - 1) };
        let trigrams = self.trigrams();
        let prefix_tri = if p1 == 0 { 0 } else { trigrams.lookup(p1 - 1) };
        let lp0 = ((self.freq_value(2, Section::BigramFreqs, i) + 1) as f64).ln();
        let mut result = Vec::with_capacity((p2 - p1) as usize);
        for r in p1..p2 {
            let remapped = trigrams.lookup(r) - prefix_tri;
            let id = (bigrams.lookup(q1 + remapped) - prefix_bi) as WordId;
            let lpi = ((self.freq_value(3, Section::TrigramFreqs, r) + 1) as f64).ln();
            result.push((id, lpi - lp0));
        }
        self.rank_successors(result, k)
    }

    fn rank_successors(&self, candidates: Vec<(WordId, f64)>, k: usize) -> Vec<(String, f64)> {
        candidates
            .into_iter()
            .sorted_by(|a, b| b.1.total_cmp(&a.1))
            .take(k)
            .map(|(id, lp)| (self.id_to_word(id), lp))
            .collect()
    }
}

#[inline]
fn ln1(freq: Option<u64>) -> f64 {
    ((freq.unwrap_or(0) + 1) as f64).ln()
}
