//! Process-wide configuration.
//!
//! A [`Config`] is built once per process, either from defaults or from a
//! TOML file, and handed by reference to every component that needs a
//! policy value. Nothing in the crate reads global state.
//!
//! # Example
//!
//! ```toml
//! [dump_dir]
//! file_mode = 0o640
//! lock_policy = "fail-fast"
//!
//! [classify]
//! editable = ["comment", "reproduce", "backtrace"]
//! text_size_limit = 204800
//!
//! [event]
//! rule_file = "/etc/dumpster/report_event.conf"
//! condition_match = "token"
//!
//! [hash]
//! algorithm = "sha1"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::hash::HashAlgorithm;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Can't read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dump_dir: DumpDirConfig,
    pub classify: ClassifyConfig,
    pub event: EventConfig,
    pub hash: HashConfig,
}

impl Config {
    /// Loads configuration from a TOML file. Missing keys take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What `open` does when another process holds the record lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicy {
    /// Sleep and retry until the holder goes away.
    #[default]
    Wait,
    /// Return [`DumpDirError::Locked`](crate::DumpDirError::Locked) at once.
    FailFast,
    /// Fall back to a read-only, unlocked handle.
    BestEffort,
}

/// Store settings: file modes, ownership and lock timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DumpDirConfig {
    /// Mode for item files. The directory gets the read bits mirrored into
    /// the execute bits.
    pub file_mode: u32,
    /// Account that owns records created on behalf of another user.
    pub owner_user: String,
    pub lock_policy: LockPolicy,
    /// Sleep after a lock vanished between our symlink attempt and readlink.
    pub symlink_retry_ms: u64,
    /// Sleep while `open` waits for another holder.
    pub wait_for_other_ms: u64,
    /// Sleep while `create` waits for its own fresh directory.
    pub create_lock_ms: u64,
    /// Sleep after locking a directory that has no `time` item yet.
    pub no_time_file_ms: u64,
    pub no_time_file_tries: u32,
    /// Sleep between `rmdir` retries while deleting.
    pub rmdir_retry_ms: u64,
    pub rmdir_tries: u32,
}

impl Default for DumpDirConfig {
    fn default() -> Self {
        Self {
            file_mode: 0o640,
            owner_user: "abrt".into(),
            lock_policy: LockPolicy::Wait,
            symlink_retry_ms: 10,
            wait_for_other_ms: 500,
            create_lock_ms: 10,
            no_time_file_ms: 50,
            no_time_file_tries: 10,
            rmdir_retry_ms: 10,
            rmdir_tries: 50,
        }
    }
}

impl DumpDirConfig {
    pub(crate) fn dir_mode(&self) -> u32 {
        self.file_mode | ((self.file_mode & 0o444) >> 2)
    }

    pub(crate) fn sleep(ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Policy lists and limits used when turning record items into
/// problem data entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Items a user may edit before reporting.
    pub editable: Vec<String>,
    /// Items trusted to be text without sampling.
    pub always_text: Vec<String>,
    /// Items shown in short listings.
    pub listed: Vec<String>,
    /// Items holding a decimal epoch timestamp.
    pub unix_time: Vec<String>,
    /// Bytes sampled by the text/binary heuristic.
    pub sample_size: usize,
    /// Files larger than this are never treated as text.
    pub text_size_limit: u64,
    /// Text must have fewer than one bad byte per this many.
    pub bad_char_ratio: usize,
    /// Items left out when loading a record for reporting.
    pub exclude_from_report: Vec<String>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            editable: strings(&["comment", "reproduce", "backtrace"]),
            always_text: strings(&["cmdline", "backtrace"]),
            listed: strings(&["uid", "package", "executable", "time", "count"]),
            unix_time: strings(&["time"]),
            sample_size: 4 * 1024,
            text_size_limit: 200 * 1024,
            bad_char_ratio: 50,
            exclude_from_report: Vec::new(),
        }
    }
}

impl ClassifyConfig {
    pub(crate) fn is_editable(&self, name: &str) -> bool {
        self.editable.iter().any(|n| n == name)
    }

    pub(crate) fn is_always_text(&self, name: &str) -> bool {
        self.always_text.iter().any(|n| n == name)
    }

    pub(crate) fn is_listed(&self, name: &str) -> bool {
        self.listed.iter().any(|n| n == name)
    }

    pub(crate) fn is_unix_time(&self, name: &str) -> bool {
        self.unix_time.iter().any(|n| n == name)
    }
}

/// How a `NAME=VALUE` condition compares against the item's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionMatch {
    /// VALUE must be the whole leading token of the item: the item starts
    /// with VALUE and the next character, if any, is whitespace.
    #[default]
    Token,
    /// The item only has to start with VALUE.
    Prefix,
}

/// Event engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub rule_file: PathBuf,
    pub shell: PathBuf,
    pub condition_match: ConditionMatch,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            rule_file: PathBuf::from("/etc/dumpster/report_event.conf"),
            shell: PathBuf::from("/bin/sh"),
            condition_match: ConditionMatch::Token,
        }
    }
}

/// Deduplication hash settings.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    pub algorithm: HashAlgorithm,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_builtin_policy() {
        let config = Config::default();
        assert_eq!(config.dump_dir.file_mode, 0o640);
        assert_eq!(config.dump_dir.dir_mode(), 0o750);
        assert!(config.classify.is_editable("comment"));
        assert!(config.classify.is_always_text("cmdline"));
        assert!(config.classify.is_listed("count"));
        assert!(config.classify.is_unix_time("time"));
        assert_eq!(config.classify.text_size_limit, 200 * 1024);
        assert_eq!(config.event.condition_match, ConditionMatch::Token);
        assert_eq!(config.hash.algorithm, HashAlgorithm::Sha1);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [dump_dir]
            lock_policy = "fail-fast"

            [event]
            rule_file = "/tmp/rules.conf"
            condition_match = "prefix"

            [hash]
            algorithm = "sha256"
            "#,
        )
        .unwrap();

        assert_eq!(config.dump_dir.lock_policy, LockPolicy::FailFast);
        assert_eq!(config.dump_dir.wait_for_other_ms, 500);
        assert_eq!(config.event.rule_file, PathBuf::from("/tmp/rules.conf"));
        assert_eq!(config.event.condition_match, ConditionMatch::Prefix);
        assert_eq!(config.event.shell, PathBuf::from("/bin/sh"));
        assert_eq!(config.hash.algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.classify.sample_size, 4096);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load("/nonexistent/dumpster.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[dump_dir\nfile_mode = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
