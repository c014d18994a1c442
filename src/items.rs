//! Well-known item names inside a record.

/// Epoch seconds of the first occurrence. Every valid record has it.
pub const TIME: &str = "time";
pub const UID: &str = "uid";
pub const COUNT: &str = "count";
pub const ANALYZER: &str = "analyzer";
pub const EXECUTABLE: &str = "executable";
pub const PACKAGE: &str = "package";
pub const COMPONENT: &str = "component";
pub const CMDLINE: &str = "cmdline";
pub const REASON: &str = "reason";
pub const COMMENT: &str = "comment";
pub const REPRODUCE: &str = "reproduce";
pub const BACKTRACE: &str = "backtrace";
pub const RATING: &str = "rating";
pub const KERNEL: &str = "kernel";
pub const ARCHITECTURE: &str = "architecture";
pub const HOSTNAME: &str = "hostname";
pub const OS_RELEASE: &str = "os_release";
/// Older records stored `os_release` under this name.
pub const LEGACY_RELEASE: &str = "release";
pub const REPORTED_TO: &str = "reported_to";
pub use crate::hash::DUPHASH;
