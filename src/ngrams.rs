//! The query facade: word-level n-gram lookups routed by arity.

use std::path::Path;

use crate::alphabet::Alphabet;
use crate::store::NgramStore;
use crate::{Result, WordId, MAX_ORDER};

/// High-level query interface over a built artifact.
///
/// Queries take tokens as strings, truncate n-grams longer than three words
/// to their final three, and never fail: unknown tokens and absent n-grams
/// simply yield zero frequency (and the corresponding smoothed
/// probabilities). All methods are pure reads and safe to call from many
/// threads at once.
pub struct Ngrams {
    store: NgramStore,
}

impl Ngrams {
    /// Open an artifact with the default (Icelandic) alphabet.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            store: NgramStore::open(path)?,
        })
    }

    /// Open an artifact built with a custom alphabet.
    pub fn open_with_alphabet(path: &Path, alphabet: Alphabet) -> Result<Self> {
        Ok(Self {
            store: NgramStore::open_with_alphabet(path, alphabet)?,
        })
    }

    /// Access the underlying store for id-level queries.
    pub fn store(&self) -> &NgramStore {
        &self.store
    }

    /// Whether `word` exists in the vocabulary. The empty string is never
    /// reported as contained.
    pub fn contains(&self, word: &str) -> bool {
        !word.is_empty() && self.store.word_to_id(word).is_some()
    }

    /// The adjusted frequency of the n-gram: one more than the stored count
    /// when the n-gram is in the store, 0 when it (or any of its tokens) is
    /// unknown.
    pub fn freq(&self, words: &[&str]) -> u64 {
        let raw = match self.tail(words, MAX_ORDER) {
            &[w0] => self.store.unigram_frequency(self.id(w0)),
            &[w0, w1] => self.store.bigram_frequency(self.id(w0), self.id(w1)),
            &[w0, w1, w2] => {
                self.store
                    .trigram_frequency(self.id(w0), self.id(w1), self.id(w2))
            }
            _ => unreachable!("tail yields 1..=3 words"),
        };
        raw.map(|c| c + 1).unwrap_or(0)
    }

    /// `freq + 1`; at least 1 for every n-gram, known or not.
    pub fn adj_freq(&self, words: &[&str]) -> u64 {
        self.freq(words) + 1
    }

    /// The smoothed conditional log-probability of the final word given its
    /// predecessors. Always finite and at most 0.
    pub fn logprob(&self, words: &[&str]) -> f64 {
        match self.tail(words, MAX_ORDER) {
            &[w0] => self.store.unigram_logprob(self.id(w0)),
            &[w0, w1] => self.store.bigram_logprob(self.id(w0), self.id(w1)),
            &[w0, w1, w2] => self
                .store
                .trigram_logprob(self.id(w0), self.id(w1), self.id(w2)),
            _ => unreachable!("tail yields 1..=3 words"),
        }
    }

    /// `exp(logprob)`, always in (0, 1].
    pub fn prob(&self, words: &[&str]) -> f64 {
        self.logprob(words).exp()
    }

    /// The at most `k` most likely successors of a 1- or 2-token prefix,
    /// best first, as `(token, logprob)` pairs. Longer prefixes are
    /// truncated to their final two tokens.
    pub fn succ(&self, k: usize, words: &[&str]) -> Vec<(String, f64)> {
        match self.tail(words, MAX_ORDER - 1) {
            &[w0] => self.store.unigram_succ(k, self.id(w0)),
            &[w0, w1] => self.store.bigram_succ(k, self.id(w0), self.id(w1)),
            _ => unreachable!("tail yields 1..=2 words"),
        }
    }

    /// Release the store and its memory map. Dropping the value does the
    /// same; this spelling just makes the intent explicit.
    pub fn close(self) {}

    fn id(&self, word: &str) -> Option<WordId> {
        self.store.word_to_id(word)
    }

    fn tail<'a, 'b>(&self, words: &'a [&'b str], max: usize) -> &'a [&'b str] {
        assert!(!words.is_empty(), "at least one word is required");
        &words[words.len().saturating_sub(max)..]
    }
}
