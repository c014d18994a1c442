//! Text-or-binary sniffing for record items.
//!
//! Items carry no type on disk, so loading a record guesses: a small file
//! whose sampled prefix has no NUL and few control bytes is text; anything
//! else is referenced by path as binary.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::config::ClassifyConfig;
use crate::dump_dir::open_no_follow;

/// Outcome of sniffing one item file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
    /// Text content. When the file fit in the sample it is complete;
    /// otherwise the caller has to load the rest.
    Text { sample: Vec<u8>, complete: bool },
    Binary(BinaryReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryReason {
    TooLarge(u64),
    ContainsNul,
    TooManyControlBytes,
}

/// Sniffs the item file at `path`. `name` is the item name, checked against
/// the always-text list. Symlinks are refused.
pub fn sniff(path: &Path, name: &str, config: &ClassifyConfig) -> io::Result<Sniffed> {
    let mut file = open_no_follow(path)?;

    let size = file.seek(SeekFrom::End(0))?;
    if size > config.text_size_limit {
        debug!("'{}' is {} bytes, treating as binary", path.display(), size);
        return Ok(Sniffed::Binary(BinaryReason::TooLarge(size)));
    }
    file.seek(SeekFrom::Start(0))?;

    let mut sample = Vec::with_capacity(config.sample_size);
    file.by_ref()
        .take(config.sample_size as u64)
        .read_to_end(&mut sample)?;
    let complete = sample.len() < config.sample_size;

    if config.is_always_text(name) {
        return Ok(Sniffed::Text { sample, complete });
    }

    match check_sample(&sample, config.bad_char_ratio) {
        Ok(()) => Ok(Sniffed::Text { sample, complete }),
        Err(reason) => {
            debug!("'{}' looks binary: {:?}", path.display(), reason);
            Ok(Sniffed::Binary(reason))
        }
    }
}

/// Decides whether `sample` looks like text.
///
/// A NUL anywhere is binary. Otherwise text needs fewer than one bad byte
/// per `ratio` sampled bytes, where bad bytes are DEL and control bytes
/// other than C whitespace. Bytes of 0x80 and above are bad only when the
/// sample is not UTF-8; a code point cut off by the sample end is fine.
pub fn check_sample(sample: &[u8], ratio: usize) -> Result<(), BinaryReason> {
    if sample.contains(&0) {
        return Err(BinaryReason::ContainsNul);
    }

    let utf8 = match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };

    // Starting at 1 keeps the division defined and biases short samples
    // towards text.
    let mut bad = 1usize;
    for &b in sample {
        let control = b < b' ' && !is_c_space(b);
        let high = b >= 0x80 && !utf8;
        if control || b == 0x7f || high {
            bad += 1;
        }
    }

    let total = sample.len() + ratio;
    if total / bad >= ratio {
        Ok(())
    } else {
        Err(BinaryReason::TooManyControlBytes)
    }
}

/// Whitespace as C's `isspace` sees it in the "C" locale.
fn is_c_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

/// Strips a trailing newline from a one-line value.
pub(crate) fn strip_single_newline(mut text: String) -> String {
    if let Some(pos) = text.find('\n') {
        if pos + 1 == text.len() {
            text.pop();
        }
    }
    text
}
