//! Dumpster - on-disk crash problem records and the tooling around them
//!
//! A crash catcher drops each captured problem into its own directory (a
//! "dump directory"). Analyzers, reporters and UIs then cooperate on that
//! record through a small set of primitives provided here.
//!
//! # Features
//!
//! - Atomic record creation and an advisory per-record lock
//! - Classified in-memory view of a record (text vs binary, editable, listed)
//! - Rule-driven event engine that runs shell handlers against a record
//! - Backtrace quality rating (0-4 stars)
//! - Deterministic deduplication hash (DUPHASH)
//!
//! # Example
//!
//! ```rust,no_run
//! use dumpster::{Config, DumpDir, EventRunner, ProblemData};
//!
//! let config = Config::default();
//! let dd = DumpDir::create("/var/spool/dumpster/ccpp-42", Some(500), &config.dump_dir)?;
//! dd.create_basic_files(Some(500))?;
//! dd.save_text("reason", "Process /usr/bin/foo was killed by signal 11")?;
//! dd.close();
//!
//! let outcome = EventRunner::new(&config)
//!     .run("/var/spool/dumpster/ccpp-42".as_ref(), "post-create")?;
//! println!("post-create: {:?}", outcome);
//!
//! let data = ProblemData::for_reporting("/var/spool/dumpster/ccpp-42", &config)?;
//! println!("reason: {:?}", data.get_content("reason"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backtrace;
pub mod config;
pub mod dump_dir;
pub mod event;
pub mod hash;
pub mod items;
pub mod problem_data;

pub use backtrace::rating::{rate_text, FrameRank, Rating};
pub use backtrace::{quality_stars, Backtrace, Frame, Thread};
pub use config::{
    ClassifyConfig, ConditionMatch, Config, ConfigError, DumpDirConfig, EventConfig, HashConfig,
    LockPolicy,
};
pub use dump_dir::{delete_dump_dir, DeleteOutcome, DumpDir, DumpDirError, Item, OpenOptions};
pub use event::{EventError, EventRunner, RunOutcome};
pub use hash::{fingerprint, hash_hex, ContentHasher, HashAlgorithm, DUPHASH};
pub use problem_data::{parse_exclude_list, Editability, Entry, ProblemData};
