use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::Result;

/// The character set tokens are drawn from.
///
/// Each character gets a 1-based index so that tokens can be stored as byte
/// strings over `{1..126}` with 0 acting as the terminator. The set is a
/// build parameter: the artifact does not carry it, so readers must be
/// configured with the same alphabet the builder used.
#[derive(Debug, Clone)]
pub struct Alphabet {
    chars: Vec<char>,
    index: FxHashMap<char, u8>,
}

/// The character set of the Icelandic reference corpus (126 characters, the
/// maximum an alphabet can hold).
const ICELANDIC: &str = concat!(
    "!$%'(),-./0123456789:;?ABCDEFGHIJKLMNOPQRSTUVWXYZ[]abcdefghijklmnopqrstuvwxyz",
    "°²³´µÀÁÄÅÆÉÍÐÓÖØÚÜÝÞßàáäåæçèéêëíîïðóôöøúüýþʹ‘’“”€",
);

impl Alphabet {
    /// Build an alphabet from the given characters, in order. Index 1 goes to
    /// the first character. At most 126 distinct characters are allowed, and
    /// duplicates are rejected.
    pub fn new(chars: &str) -> Result<Self> {
        let chars: Vec<char> = chars.chars().collect();
        if chars.len() >= 127 {
            return Err(Error::AlphabetTooLarge(chars.len()));
        }
        let mut index = FxHashMap::default();
        for (i, &ch) in chars.iter().enumerate() {
            if index.insert(ch, (i + 1) as u8).is_some() {
                return Err(Error::AlphabetDuplicate(ch));
            }
        }
        Ok(Self { chars, index })
    }

    /// The alphabet used by the Icelandic trigram corpus.
    pub fn icelandic() -> Self {
        Self::new(ICELANDIC).expect("the built-in alphabet is valid")
    }

    /// Number of characters in the alphabet.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Encode a token as alphabet byte indices, or `None` if any character
    /// falls outside the alphabet.
    pub fn encode(&self, word: &str) -> Option<Vec<u8>> {
        word.chars().map(|ch| self.index.get(&ch).copied()).collect()
    }

    /// Decode a byte-index string back to text. Bytes outside `1..=len` have
    /// no defined meaning and must not occur in a well-formed store.
    pub fn decode(&self, bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|&b| self.chars[(b - 1) as usize])
            .collect()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::icelandic()
    }
}
