//! The build pipeline: TSV in, artifact out.
//!
//! Two passes over the input. The first pass counts token occurrences and
//! fixes the vocabulary: ids are assigned in descending occurrence order so
//! the most common tokens get the smallest (cheapest to encode) ids, with
//! the empty boundary token pinned to id 0 when present. The second pass
//! accumulates the three-level trigram count tree, which is then compacted,
//! bucketed and serialized section by section.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};
use std::{collections::BTreeMap, fmt, fs};

use itertools::Itertools;
use log::info;
use rustc_hash::FxHashMap;

use crate::alphabet::Alphabet;
use crate::error::Error;
use crate::list::{monotonic, partitioned};
use crate::store::{Section, VOCAB_INDEX_CUTOFF, VOCAB_QUANTUM_SIZE};
use crate::trie::Trie;
use crate::{freqs, Result, WordId, MAX_ORDER};

pub mod serialize;

use serialize::{ArtifactWriter, FreqTables, StreamWriter, VocabSection};

/// Compiles a trigram TSV into a binary artifact.
pub struct Builder {
    alphabet: Alphabet,
    add_all_bigrams: bool,
}

/// Summary of a completed build.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub lines: u64,
    pub skipped: u64,
    pub vocab_size: u64,
    pub unigram_total: u64,
    pub bigrams: u64,
    pub trigrams: u64,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines ({} skipped), {} tokens, {} bigrams, {} trigrams, \
             {} bytes written in {:.1?}",
            self.lines,
            self.skipped,
            self.vocab_size,
            self.bigrams,
            self.trigrams,
            self.bytes_written,
            self.elapsed,
        )
    }
}

// One level of the build-time trigram count tree. A BTreeMap keeps the
// children in id order, which the serializer depends on.
#[derive(Debug, Default)]
struct Level {
    cnt: u64,
    children: BTreeMap<WordId, Level>,
}

// A parsed input line: three alphabet-encoded tokens and a count.
struct Line {
    words: [Vec<u8>; 3],
    count: u64,
}

impl Builder {
    pub fn new(alphabet: Alphabet) -> Self {
        Self {
            alphabet,
            add_all_bigrams: false,
        }
    }

    /// Also enroll `(w1, w2)` and the unigram `w2` for every input trigram.
    /// Required unless the input guarantees that every `(w0, w1, w2)` is
    /// followed by a `(w1, w2, w3)` trigram (as sliding-window corpora do).
    pub fn add_all_bigrams(mut self, yes: bool) -> Self {
        self.add_all_bigrams = yes;
        self
    }

    /// Build the artifact at `out` from the trigram file at `tsv`.
    pub fn build(&self, tsv: &Path, out: &Path) -> Result<BuildStats> {
        let start = Instant::now();
        let mut stats = BuildStats::default();

        let (vocab_list, using_empty) = self.scan_vocab(tsv, &mut stats)?;
        stats.vocab_size = vocab_list.len() as u64;
        info!("vocabulary pass done: {} tokens", vocab_list.len());

        // Assign ids in list order and build the token trie.
        let mut trie = Trie::new(using_empty);
        let mut ids: FxHashMap<Vec<u8>, WordId> =
            FxHashMap::with_capacity_and_hasher(vocab_list.len(), Default::default());
        for (expected, word) in vocab_list.iter().enumerate() {
            if expected == 0 && word.is_empty() {
                ids.insert(Vec::new(), 0);
                continue;
            }
            let id = trie.add(word);
            debug_assert_eq!(id as usize, expected);
            ids.insert(word.clone(), id);
        }

        // The vocab blob and its two-tier index: one entry per id below the
        // cutoff, then one entry per quantum of tokens.
        let mut blob: Vec<u8> = Vec::new();
        let mut vocab_index: Vec<u32> = Vec::new();
        for (ix, word) in vocab_list.iter().enumerate() {
            if ix > 0 && (ix < VOCAB_INDEX_CUTOFF || ix % VOCAB_QUANTUM_SIZE == 0) {
                vocab_index.push(blob.len() as u32);
            }
            blob.extend_from_slice(word);
            blob.push(0);
        }
        drop(vocab_list);

        let (root, ucnt) = self.count_trigrams(tsv, &ids, using_empty)?;
        stats.unigram_total = ucnt;
        info!("trigram pass done: unigram total {ucnt}");

        // Bucket the distinct counts seen at each level; ranks into these
        // tables are what the frequency streams store.
        let mut buckets: [std::collections::BTreeSet<u64>; MAX_ORDER + 1] = Default::default();
        buckets[0].insert(ucnt);
        for (_, n0) in &root.children {
            buckets[1].insert(n0.cnt);
            for (_, n1) in &n0.children {
                buckets[2].insert(n1.cnt);
                for (_, n2) in &n1.children {
                    buckets[3].insert(n2.cnt);
                }
            }
        }
        // Ids that never occur in first position still need a rank.
        buckets[1].insert(0);
        for level in &buckets {
            if let Some(&max) = level.iter().next_back() {
                if max >= 1 << 32 {
                    return Err(Error::CountOverflow(max));
                }
            }
        }
        let freq_tables: Vec<Vec<u64>> =
            buckets.iter().map(|b| b.iter().copied().collect()).collect();
        let ranks: Vec<FxHashMap<u64, u32>> = freq_tables
            .iter()
            .map(|t| t.iter().enumerate().map(|(i, &v)| (v, i as u32)).collect())
            .collect();

        let artifact =
            self.assemble(&trie, &root, &freq_tables, &ranks, &vocab_index, &blob, &mut stats)?;
        fs::write(out, &artifact)?;
        stats.bytes_written = artifact.len() as u64;
        stats.elapsed = start.elapsed();
        info!("wrote {} ({} bytes)", out.display(), artifact.len());
        Ok(stats)
    }

    // First pass: count how many input lines each token occurs in (once per
    // position) and order the vocabulary by descending occurrence. The
    // empty token, when seen, is forced to the front so it gets id 0.
    fn scan_vocab(&self, tsv: &Path, stats: &mut BuildStats) -> Result<(Vec<Vec<u8>>, bool)> {
        let mut occurrences: FxHashMap<Vec<u8>, u64> = FxHashMap::default();
        let mut reader = BufReader::new(File::open(tsv)?);
        let mut line = String::new();
        let mut lineno = 0u64;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            lineno += 1;
            if line.trim().is_empty() {
                continue;
            }
            stats.lines += 1;
            let Some(parsed) = self.parse_line(&line, lineno)? else {
                stats.skipped += 1;
                continue;
            };
            for word in parsed.words {
                *occurrences.entry(word).or_insert(0) += 1;
            }
        }

        let using_empty = occurrences.contains_key(&b""[..]);
        let vocab_list: Vec<Vec<u8>> = occurrences
            .into_iter()
            .sorted_by(|(wa, ca), (wb, cb)| {
                // Empty first, then count descending, ties by token bytes so
                // that builds are deterministic.
                wb.is_empty()
                    .cmp(&wa.is_empty())
                    .then(cb.cmp(ca))
                    .then(wa.cmp(wb))
            })
            .map(|(w, _)| w)
            .collect();
        Ok((vocab_list, using_empty))
    }

    // Second pass: accumulate counts into the three-level tree and apply
    // the boundary compaction.
    fn count_trigrams(
        &self,
        tsv: &Path,
        ids: &FxHashMap<Vec<u8>, WordId>,
        using_empty: bool,
    ) -> Result<(Level, u64)> {
        let mut root = Level::default();
        let mut ucnt = 0u64;
        let mut reader = BufReader::new(File::open(tsv)?);
        let mut line = String::new();
        let mut lineno = 0u64;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            lineno += 1;
            if line.trim().is_empty() {
                continue;
            }
            let Some(parsed) = self.parse_line(&line, lineno)? else {
                continue;
            };
            if parsed.words.iter().all(|w| w.is_empty()) {
                continue;
            }
            let i0 = ids[&parsed.words[0]];
            let i1 = ids[&parsed.words[1]];
            let i2 = ids[&parsed.words[2]];
            let c = parsed.count;

            // Sliding-window input lists every position of every sentence,
            // so crediting only the first token (and first bigram) of each
            // triple counts each occurrence exactly once.
            {
                let n0 = root.children.entry(i0).or_default();
                n0.cnt += c;
                let n1 = n0.children.entry(i1).or_default();
                n1.cnt += c;
                let n2 = n1.children.entry(i2).or_default();
                n2.cnt += c;
            }
            if self.add_all_bigrams {
                root.children.entry(i2).or_default().cnt += c;
                let n1 = root.children.entry(i1).or_default();
                n1.cnt += c;
                n1.children.entry(i2).or_default().cnt += c;
                ucnt += 3 * c;
            } else {
                ucnt += c;
            }
        }
        root.cnt = ucnt;

        if using_empty {
            compact_boundaries(&mut root);
        }
        Ok((root, ucnt))
    }

    // Parse one line into three encoded tokens and a count. `None` means the
    // line contains out-of-alphabet characters and should be skipped.
    fn parse_line(&self, line: &str, lineno: u64) -> Result<Option<Line>> {
        let line = line.trim_end();
        let mut fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            // Empty boundary tokens only survive a plain tab split.
            fields = line.split('\t').collect();
        }
        if fields.len() != 4 {
            return Err(Error::MalformedLine { line: lineno });
        }
        let mut words: [Vec<u8>; 3] = Default::default();
        for (slot, field) in words.iter_mut().zip(&fields[..3]) {
            match self.alphabet.encode(field) {
                Some(encoded) => *slot = encoded,
                None => return Ok(None),
            }
        }
        let count = fields[3].parse::<u64>().map_err(|_| Error::BadCount {
            line: lineno,
            field: fields[3].to_string(),
        })?;
        Ok(Some(Line { words, count }))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        trie: &Trie,
        root: &Level,
        freq_tables: &[Vec<u64>],
        ranks: &[FxHashMap<u64, u32>],
        vocab_index: &[u32],
        vocab_blob: &[u8],
        stats: &mut BuildStats,
    ) -> Result<Vec<u8>> {
        let vocab_size = trie.len() as u64;
        let mut w = ArtifactWriter::new();

        w.label("[frequencies]");
        w.begin(Section::Freqs);
        FreqTables(freq_tables).write_to(&mut w)?;

        w.label("[trie]");
        w.begin(Section::Trie);
        w.write_bytes(&trie.write());

        w.label("[ngrams]");

        // Unigram pointers: UP[i]..UP[i+1] spans the bigram children of i.
        let mut up: Vec<u64> = Vec::with_capacity(vocab_size as usize + 1);
        up.push(0);
        let mut ix = 0u64;
        for i in 0..vocab_size as WordId {
            if let Some(n0) = root.children.get(&i) {
                ix += n0.children.len() as u64;
            }
            up.push(ix);
        }
        w.begin(Section::UnigramPtrs);
        w.write_bytes(&monotonic::compress(&up)?);

        let unigram_ranks: Vec<u32> = (0..vocab_size as WordId)
            .map(|i| {
                let cnt = root.children.get(&i).map(|n| n.cnt).unwrap_or(0);
                ranks[1][&cnt]
            })
            .collect();
        w.begin(Section::UnigramFreqs);
        w.write_bytes(&freqs::compress(&unigram_ranks)?);

        // The bigram and trigram levels in one sweep, mirroring the reader's
        // prefix-sum and remapping conventions.
        let mut bigram_ptrs: Vec<u64> = Vec::new();
        let mut bi_ids: Vec<u64> = Vec::new();
        let mut tri_ids: Vec<u64> = Vec::new();
        let mut bi_ranks: Vec<u32> = Vec::new();
        let mut tri_ranks: Vec<u32> = Vec::new();
        let mut bi_prefix = 0u64;
        let mut tri_prefix = 0u64;
        let mut ix = 0u64;
        for (&w0, n0) in &root.children {
            if n0.children.is_empty() {
                continue;
            }
            for (&w1, n1) in &n0.children {
                bi_ids.push(w1 as u64 + bi_prefix);
                bigram_ptrs.push(ix);
                bi_ranks.push(ranks[2][&n1.cnt]);
                if n1.children.is_empty() {
                    continue;
                }
                ix += n1.children.len() as u64;
                // Store each w2 as its position among the sorted bigram
                // children of w1, which is a far smaller number than the id
                // itself (Pibiri & Venturini).
                let w1_children = root
                    .children
                    .get(&w1)
                    .map(|n| n.children.keys().copied().collect::<Vec<_>>())
                    .unwrap_or_default();
                for (&w2, n2) in &n1.children {
                    let remapped = w1_children
                        .binary_search(&w2)
                        .map_err(|_| Error::MissingBigram(w0, w1, w2))?;
                    tri_ids.push(remapped as u64 + tri_prefix);
                    tri_ranks.push(ranks[3][&n2.cnt]);
                }
                tri_prefix = *tri_ids.last().unwrap();
            }
            bi_prefix = *bi_ids.last().unwrap();
        }
        bigram_ptrs.push(ix);
        stats.bigrams = bi_ids.len() as u64;
        stats.trigrams = tri_ids.len() as u64;
        info!("{} bigrams, {} trigrams", bi_ids.len(), tri_ids.len());

        w.begin(Section::Bigrams);
        w.write_bytes(&partitioned::compress(&bi_ids)?);
        w.begin(Section::BigramPtrs);
        w.write_bytes(&monotonic::compress(&bigram_ptrs)?);
        w.begin(Section::Trigrams);
        w.write_bytes(&partitioned::compress(&tri_ids)?);
        w.begin(Section::BigramFreqs);
        w.write_bytes(&freqs::compress(&bi_ranks)?);
        w.begin(Section::TrigramFreqs);
        w.write_bytes(&freqs::compress(&tri_ranks)?);

        w.label("[vocab]");
        w.begin(Section::Vocab);
        VocabSection {
            index: vocab_index,
            blob: vocab_blob,
        }
        .write_to(&mut w)?;

        Ok(w.finish())
    }
}

// Fold the double-boundary trigrams into bigrams: the counts of (0, 0, w2)
// move to the (0, w2) bigram and the counts of (w0, 0, 0) move to (w0, 0).
// No information is lost and the trigram list shrinks by one entry per
// sentence-initial and sentence-final token.
fn compact_boundaries(root: &mut Level) {
    let mut cut = 0u64;
    if let Some(n0) = root.children.get_mut(&0) {
        let moved: Vec<(WordId, u64)> = n0
            .children
            .get(&0)
            .map(|n00| n00.children.iter().map(|(&w2, l)| (w2, l.cnt)).collect())
            .unwrap_or_default();
        cut += moved.len() as u64;
        for (w2, cnt) in moved {
            n0.children.entry(w2).or_default().cnt = cnt;
        }
        if let Some(n00) = n0.children.get_mut(&0) {
            n00.cnt = 0;
            n00.children.clear();
        }
    }
    for n0 in root.children.values_mut() {
        if let Some(nz) = n0.children.get_mut(&0) {
            if let Some(cnt) = nz.children.get(&0).map(|n| n.cnt) {
                nz.cnt = cnt;
                nz.children.remove(&0);
                cut += 1;
            }
        }
    }
    if cut > 0 {
        info!("compacted {cut} boundary trigrams");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    fn builder() -> Builder {
        Builder::new(Alphabet::icelandic())
    }

    fn write_tsv(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_malformed_line_aborts() {
        let tsv = write_tsv("a\tb\tc\t4\nx\ty\t2\n");
        let out = tempfile::NamedTempFile::new().unwrap();
        let err = builder().build(tsv.path(), out.path()).unwrap_err();
        assert!(matches!(err, Error::MalformedLine { line: 2 }));
    }

    #[test]
    fn test_bad_count_aborts() {
        let tsv = write_tsv("a\tb\tc\tfour\n");
        let out = tempfile::NamedTempFile::new().unwrap();
        let err = builder().build(tsv.path(), out.path()).unwrap_err();
        assert!(matches!(err, Error::BadCount { line: 1, .. }));
    }

    #[test]
    fn test_out_of_alphabet_lines_are_skipped() {
        let tsv = write_tsv("a\tb\tc\t4\n\u{42f}\tb\tc\t9\n");
        let out = tempfile::NamedTempFile::new().unwrap();
        let stats = builder()
            .add_all_bigrams(true)
            .build(tsv.path(), out.path())
            .unwrap();
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.vocab_size, 3);
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let tsv = write_tsv("a\tb\tc\t4\n\n   \na\tb\td\t2\n");
        let out = tempfile::NamedTempFile::new().unwrap();
        let stats = builder()
            .add_all_bigrams(true)
            .build(tsv.path(), out.path())
            .unwrap();
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn test_id_order_is_occurrence_then_bytes() {
        // "b" dominates the occurrence count; "a"/"c"/"d" tie at one
        // occurrence each and fall back to byte order.
        let tsv = write_tsv("b\ta\tb\t1\nb\tc\tb\t1\nd\tb\tb\t1\n");
        let out = tempfile::NamedTempFile::new().unwrap();
        builder()
            .add_all_bigrams(true)
            .build(tsv.path(), out.path())
            .unwrap();
        let store = crate::NgramStore::open(out.path()).unwrap();
        assert_eq!(store.word_to_id("b"), Some(0));
        // a, c, d all occur once; byte order decides.
        assert_eq!(store.word_to_id("a"), Some(1));
        assert_eq!(store.word_to_id("c"), Some(2));
        assert_eq!(store.word_to_id("d"), Some(3));
    }
}
