use std::io;

use thiserror::Error;

/// Everything that can go wrong while building or loading a store.
///
/// Query misses are not errors: an unknown token or an absent n-gram yields a
/// zero frequency (or an empty successor list), never an `Err`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("alphabet has {0} characters, the maximum is 126")]
    AlphabetTooLarge(usize),

    #[error("alphabet contains duplicate character {0:?}")]
    AlphabetDuplicate(char),

    #[error("line {line}: expected four fields (w0, w1, w2, count)")]
    MalformedLine { line: u64 },

    #[error("line {line}: bad count field {field:?}")]
    BadCount { line: u64, field: String },

    #[error("sequence of {0} entries exceeds the 32-bit index space")]
    ListOverflow(u64),

    #[error("frequency count {0} exceeds the 32-bit range")]
    CountOverflow(u64),

    #[error("trigram ({0}, {1}, {2}) has no matching ({1}, {2}) bigram; \
             input does not satisfy the bigram guarantee (use --all-bigrams?)")]
    MissingBigram(u32, u32, u32),

    #[error("artifact version tag mismatch")]
    VersionMismatch,

    #[error("artifact is truncated or corrupt: {0}")]
    Corrupt(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}
