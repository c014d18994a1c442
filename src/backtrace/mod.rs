//! Backtrace model and its quality.
//!
//! A [`Backtrace`] is the already-parsed tree of threads and frames a
//! debugger frontend hands over. The rating in [`rating`] works either on
//! that model or directly on the `backtrace` item's text.

pub mod rating;

use rating::{FrameRank, Rating};

/// Functions whose presence marks a thread as the one that aborted.
const EXIT_FUNCTIONS: &[&str] = &["__run_exit_handlers", "raise", "exit", "abort", "__chk_fail"];

/// Frames kept when rating the area around the crash.
const CRASH_AREA_FRAMES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub number: u32,
    /// `None` when gdb printed `??`.
    pub function: Option<String>,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
    /// Shared object the frame's code lives in.
    pub library: Option<String>,
    /// `<signal handler called>` frame.
    pub signal_handler: bool,
}

impl Frame {
    /// A frame in `function`, with nothing else known.
    pub fn in_function(number: u32, function: impl Into<String>) -> Frame {
        Frame {
            number,
            function: Some(function.into()),
            ..Frame::default()
        }
    }

    /// Sets the source location.
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Frame {
        self.source_file = Some(file.into());
        self.source_line = Some(line);
        self
    }

    /// Sets the shared object.
    pub fn in_library(mut self, library: impl Into<String>) -> Frame {
        self.library = Some(library.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thread {
    pub number: u32,
    /// Innermost frame first.
    pub frames: Vec<Frame>,
}

impl Thread {
    /// Fraction of frames with a known function or a signal handler. An
    /// empty thread has nothing missing and scores 1.
    pub fn quality(&self) -> f32 {
        let (ok, all) = self.quality_counts();
        if all == 0 {
            return 1.0;
        }
        ok as f32 / all as f32
    }

    fn quality_counts(&self) -> (usize, usize) {
        let ok = self
            .frames
            .iter()
            .filter(|f| f.signal_handler || f.function.is_some())
            .count();
        (ok, self.frames.len())
    }

    fn has_exit_frame(&self) -> bool {
        self.frames.iter().any(|f| {
            f.function
                .as_deref()
                .is_some_and(|name| EXIT_FUNCTIONS.contains(&name))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backtrace {
    pub threads: Vec<Thread>,
    /// The frame gdb reported on its own before the thread list.
    pub crash: Option<Frame>,
}

impl Backtrace {
    /// The thread that crashed, if it can be told apart.
    ///
    /// That is the only thread, else the one thread whose top frame calls
    /// the crash frame's function. When several do, the one that went
    /// through an exit or abort function wins if it is unique.
    pub fn crash_thread(&self) -> Option<&Thread> {
        match self.threads.as_slice() {
            [] => return None,
            [only] => return Some(only),
            _ => {}
        }
        self.crash_thread_matching(false)
            .or_else(|| self.crash_thread_matching(true))
    }

    fn crash_thread_matching(&self, require_exit: bool) -> Option<&Thread> {
        let crash_function = self.crash.as_ref()?.function.as_deref()?;
        let mut found = None;
        for thread in &self.threads {
            let same_name = thread
                .frames
                .first()
                .and_then(|f| f.function.as_deref())
                == Some(crash_function);
            if same_name && (!require_exit || thread.has_exit_frame()) {
                if found.is_some() {
                    return None;
                }
                found = Some(thread);
            }
        }
        found
    }

    /// Fraction of all frames, over all threads, with a known function.
    /// No frames at all scores 0.
    pub fn quality_simple(&self) -> f32 {
        let (ok, all) = self
            .threads
            .iter()
            .map(Thread::quality_counts)
            .fold((0, 0), |(ok, all), (o, a)| (ok + o, all + a));
        if all == 0 {
            return 0.0;
        }
        ok as f32 / all as f32
    }

    /// Mix of whole-backtrace quality (25%), crash thread quality (35%) and
    /// the quality of the crash thread's top frames (40%).
    pub fn quality_complex(&self) -> f32 {
        let whole = self.quality_simple();
        let crash_thread = match self.crash_thread() {
            Some(thread) => thread,
            None => return whole,
        };
        let thread = crash_thread.quality();
        let top = Thread {
            number: crash_thread.number,
            frames: crash_thread
                .frames
                .iter()
                .take(CRASH_AREA_FRAMES)
                .cloned()
                .collect(),
        }
        .quality();
        0.25 * whole + 0.35 * thread + 0.4 * top
    }

    /// Weighted frame rating of the crash thread, or of all threads when
    /// the crash thread is unknown.
    pub fn rating(&self) -> Rating {
        match self.crash_thread() {
            Some(thread) => Rating::from_ranks(thread.frames.iter().map(FrameRank::of_frame)),
            None => Rating::from_ranks(
                self.threads
                    .iter()
                    .flat_map(|t| t.frames.iter())
                    .map(FrameRank::of_frame),
            ),
        }
    }
}

/// Maps a [`Backtrace::quality_complex`] value to 0-4 stars.
pub fn quality_stars(quality: f32) -> u8 {
    if quality < 0.6 {
        0
    } else if quality < 0.7 {
        1
    } else if quality < 0.8 {
        2
    } else if quality < 0.9 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown(number: u32) -> Frame {
        Frame {
            number,
            ..Frame::default()
        }
    }

    /// Thread 2 sits in poll, thread 1 crashed in crash_fn.
    fn two_threads() -> Backtrace {
        Backtrace {
            threads: vec![
                Thread {
                    number: 2,
                    frames: vec![
                        Frame::in_function(0, "poll").in_library("/lib64/libc.so.6"),
                        unknown(1),
                    ],
                },
                Thread {
                    number: 1,
                    frames: vec![
                        Frame::in_function(0, "crash_fn").at("crasher.c", 5),
                        Frame::in_function(1, "main").at("crasher.c", 10),
                    ],
                },
            ],
            crash: Some(Frame::in_function(0, "crash_fn").at("crasher.c", 5)),
        }
    }

    #[test]
    fn crash_thread_is_found_by_top_function() {
        assert_eq!(two_threads().crash_thread().unwrap().number, 1);
    }

    #[test]
    fn single_thread_is_the_crash_thread() {
        let bt = Backtrace {
            threads: vec![Thread {
                number: 1,
                frames: vec![unknown(0)],
            }],
            crash: None,
        };
        assert_eq!(bt.crash_thread().unwrap().number, 1);
        assert_eq!(Backtrace::default().crash_thread(), None);
    }

    #[test]
    fn ambiguous_crash_thread_prefers_the_aborting_one() {
        let frame = |function: &str| Frame::in_function(0, function);
        let bt = Backtrace {
            threads: vec![
                Thread {
                    number: 1,
                    frames: vec![frame("raise"), frame("abort"), frame("main")],
                },
                Thread {
                    number: 2,
                    frames: vec![frame("raise"), frame("worker")],
                },
            ],
            crash: Some(frame("raise")),
        };
        assert_eq!(bt.crash_thread().unwrap().number, 1);

        let no_crash = Backtrace {
            crash: None,
            ..bt
        };
        assert_eq!(no_crash.crash_thread(), None);
    }

    #[test]
    fn signal_handler_frames_count_as_known() {
        let thread = Thread {
            number: 1,
            frames: vec![
                Frame {
                    signal_handler: true,
                    ..unknown(0)
                },
                unknown(1),
            ],
        };
        assert!((thread.quality() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn quality_scores() {
        let bt = two_threads();
        // 3 of 4 frames have a function.
        assert!((bt.quality_simple() - 0.75).abs() < 1e-6);
        let q = bt.quality_complex();
        assert!((q - (0.25 * 0.75 + 0.35 + 0.4)).abs() < 1e-6);
        assert_eq!(quality_stars(q), 4);

        assert_eq!(Backtrace::default().quality_simple(), 0.0);
        assert_eq!(Thread::default().quality(), 1.0);
    }

    #[test]
    fn quality_star_buckets() {
        assert_eq!(quality_stars(0.59), 0);
        assert_eq!(quality_stars(0.6), 1);
        assert_eq!(quality_stars(0.75), 2);
        assert_eq!(quality_stars(0.85), 3);
        assert_eq!(quality_stars(0.9), 4);
    }

    #[test]
    fn model_rating_uses_crash_thread() {
        assert_eq!(two_threads().rating().stars(), 4);
        assert_eq!(Backtrace::default().rating().stars(), 0);
    }
}
