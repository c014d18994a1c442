//! Star rating of backtrace usefulness.
//!
//! Every frame gets a rank by the debug information it shows. Ranks are
//! weighted so that frames near the crash count the most, and the weighted
//! score against the best possible score gives 0-4 stars.

use super::Frame;

/// Rendered into Python tracebacks. Those are always rated 4.
const PYTHON_MARKER: &str = "Local variables in innermost frame:\n";

/// Evidence available for one frame, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameRank {
    /// `#0 0x0000dead in ?? ()`
    MissingEverything = 0,
    /// `#0 0x0000dead in ?? () from /usr/lib/libfoobar.so.4`
    MissingFunction = 1,
    /// `#0 0x0000dead in foobar ()`
    MissingLibrary = 2,
    /// `#0 0x0000dead in FooBar::FooBar () from /usr/lib/libfoobar.so.4`
    MissingSourceFile = 3,
    /// `#0 0x0000dead in FooBar::crash (this=0x0) at /home/user/foobar.cpp:204`
    Good = 4,
}

impl FrameRank {
    pub const BEST: FrameRank = FrameRank::Good;

    /// Ranks the text of one frame. Tabs and newlines must already be
    /// spaces.
    pub fn of_text(text: &str) -> Self {
        if text.contains(" at ") {
            return FrameRank::Good;
        }
        // " in ??" is no function.
        let function = text
            .find(" in ")
            .is_some_and(|pos| !text[pos + 4..].starts_with('?'));
        let library = text.contains(" from ");
        match (function, library) {
            (true, true) => FrameRank::MissingSourceFile,
            (true, false) => FrameRank::MissingLibrary,
            (false, true) => FrameRank::MissingFunction,
            (false, false) => FrameRank::MissingEverything,
        }
    }

    /// Ranks a parsed frame.
    pub fn of_frame(frame: &Frame) -> Self {
        if frame.source_file.is_some() {
            return FrameRank::Good;
        }
        match (frame.function.is_some(), frame.library.is_some()) {
            (true, true) => FrameRank::MissingSourceFile,
            (true, false) => FrameRank::MissingLibrary,
            (false, true) => FrameRank::MissingFunction,
            (false, false) => FrameRank::MissingEverything,
        }
    }

    pub fn value(self) -> u64 {
        self as u64
    }
}

/// Weighted score of a frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rating {
    pub score: u64,
    /// Score if every frame ranked [`FrameRank::Good`].
    pub best: u64,
}

impl Rating {
    /// Rates ranks given innermost frame first. The innermost of `n` frames
    /// weighs `n`, the outermost weighs 1.
    pub fn from_ranks<I>(ranks: I) -> Self
    where
        I: IntoIterator<Item = FrameRank>,
    {
        let ranks: Vec<FrameRank> = ranks.into_iter().collect();
        let n = ranks.len() as u64;
        ranks
            .iter()
            .enumerate()
            .fold(Rating::default(), |acc, (i, rank)| {
                let weight = n - i as u64;
                Rating {
                    score: acc.score + rank.value() * weight,
                    best: acc.best + FrameRank::BEST.value() * weight,
                }
            })
    }

    /// 0-4 stars: at least 80% of the best score is 4, 60% is 3, 40% is 2,
    /// 20% is 1. No frames at all is 0.
    pub fn stars(&self) -> u8 {
        if self.best == 0 {
            return 0;
        }
        let (score, best) = (self.score * 10, self.best);
        if score >= best * 8 {
            4
        } else if score >= best * 6 {
            3
        } else if score >= best * 4 {
            2
        } else if score >= best * 2 {
            1
        } else {
            0
        }
    }
}

/// Rates a textual backtrace, returning 0-4 stars.
///
/// Python tracebacks are not rated and get 4.
pub fn rate_text(text: &str) -> u8 {
    if text.contains(PYTHON_MARKER) {
        return 4;
    }
    Rating::from_ranks(
        split_frames(text)
            .iter()
            .map(|frame| FrameRank::of_text(&frame.text)),
    )
    .stars()
}

/// One frame cut out of backtrace text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameText {
    pub number: String,
    /// Everything after the `#`, up to the next frame, with tabs and
    /// newlines turned into spaces.
    pub text: String,
}

/// Cuts `text` into frames at every line starting with `#` and a digit.
///
/// A frame repeating the number of the one before it is merged into it:
/// gdb prints the crash frame once on its own and again in its thread.
pub fn split_frames(text: &str) -> Vec<FrameText> {
    let mut frames: Vec<FrameText> = Vec::new();
    let mut in_frame = false;

    for line in text.split('\n') {
        let header = line
            .strip_prefix('#')
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
        match header {
            Some(rest) => {
                let number: String = rest.chars().take_while(char::is_ascii_digit).collect();
                let body = flatten(rest);
                match frames.last_mut() {
                    Some(last) if last.number == number => {
                        last.text.push(' ');
                        last.text.push_str(&body);
                    }
                    _ => frames.push(FrameText { number, text: body }),
                }
                in_frame = true;
            }
            None if in_frame => {
                if let Some(last) = frames.last_mut() {
                    last.text.push(' ');
                    last.text.push_str(&flatten(line));
                }
            }
            None => {}
        }
    }
    frames
}

fn flatten(s: &str) -> String {
    s.replace('\t', " ")
}
