//! In-memory, classified view of a record.
//!
//! A [`ProblemData`] maps item names to [`Entry`] values. It is filled
//! either through the API or by loading a [`DumpDir`], and can be written
//! back out as a fresh record.

pub mod classify;

use std::collections::btree_map::{self, BTreeMap};
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use serde::Serialize;
use tracing::{error, warn};

use crate::config::{ClassifyConfig, Config, DumpDirConfig};
use crate::dump_dir::{validate_item_name, DumpDir, DumpDirError};
use crate::hash::{fingerprint, HashAlgorithm, DUPHASH};
use crate::items;
use classify::Sniffed;

/// Value stored in `analyzer` by [`ProblemData::ensure_basics`].
pub const ANALYZER_NAME: &str = "dumpster";

/// Whether a user may change an entry before reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Editability {
    Editable,
    #[default]
    NotEditable,
}

/// One problem data entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    /// Binary payload, referenced by the full path of its item file.
    Binary { path: PathBuf },
    Text {
        content: String,
        editable: Editability,
        /// Shown in short listings.
        list: bool,
        /// Content is a decimal epoch timestamp.
        unix_time: bool,
    },
}

impl Entry {
    /// A plain text entry: not editable, not listed.
    pub fn text(content: impl Into<String>) -> Self {
        Entry::Text {
            content: content.into(),
            editable: Editability::NotEditable,
            list: false,
            unix_time: false,
        }
    }

    pub fn binary(path: impl Into<PathBuf>) -> Self {
        Entry::Binary { path: path.into() }
    }

    /// Marks a text entry editable. Binary entries are never editable.
    pub fn editable(mut self) -> Self {
        if let Entry::Text { editable, .. } = &mut self {
            *editable = Editability::Editable;
        }
        self
    }

    pub fn listed(mut self) -> Self {
        if let Entry::Text { list, .. } = &mut self {
            *list = true;
        }
        self
    }

    pub fn unix_time(mut self) -> Self {
        if let Entry::Text { unix_time, .. } = &mut self {
            *unix_time = true;
        }
        self
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Entry::Binary { .. })
    }

    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            Entry::Text {
                editable: Editability::Editable,
                ..
            }
        )
    }

    pub fn is_listed(&self) -> bool {
        matches!(self, Entry::Text { list: true, .. })
    }

    /// Text content, or `None` for binary entries.
    pub fn content(&self) -> Option<&str> {
        match self {
            Entry::Text { content, .. } => Some(content),
            Entry::Binary { .. } => None,
        }
    }

    /// Human-readable rendering of a timestamp entry in the local time
    /// zone. `None` for other entries and for content that isn't a number;
    /// callers then show the raw content.
    pub fn format(&self) -> Option<String> {
        match self {
            Entry::Text {
                content,
                unix_time: true,
                ..
            } => {
                let secs: i64 = content.trim().parse().ok()?;
                let time = Local.timestamp_opt(secs, 0).single()?;
                Some(time.format("%c").to_string())
            }
            _ => None,
        }
    }
}

/// Classified problem data, keyed by item name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProblemData {
    entries: BTreeMap<String, Entry>,
}

impl ProblemData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry`, replacing any previous entry for `name` whole.
    pub fn add(&mut self, name: impl Into<String>, entry: Entry) -> Option<Entry> {
        self.entries.insert(name.into(), entry)
    }

    /// Shorthand for adding a plain text entry.
    pub fn add_text(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.add(name, Entry::text(content));
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Text content of `name`, if it exists and is text.
    pub fn get_content(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Entry::content)
    }

    /// Text content of an entry the caller knows must exist.
    ///
    /// # Panics
    ///
    /// If `name` is missing or binary. That is a bug in the caller, not a
    /// runtime condition.
    #[track_caller]
    pub fn expect_content(&self, name: &str) -> &str {
        match self.get(name) {
            Some(Entry::Text { content, .. }) => content,
            Some(Entry::Binary { .. }) => panic!("problem data entry '{name}' is binary"),
            None => panic!("problem data has no '{name}' entry"),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Entry> {
        self.entries.iter()
    }

    /// Loads every item of `dd`.
    pub fn from_dump_dir(dd: &DumpDir, config: &ClassifyConfig) -> Result<Self, DumpDirError> {
        let mut data = Self::new();
        data.load_from_dump_dir(dd, config, &[])?;
        Ok(data)
    }

    /// Opens the record at `path`, loads it minus the configured
    /// report exclusions, and closes it.
    pub fn for_reporting<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self, DumpDirError> {
        let dd = DumpDir::open(path, &config.dump_dir)?;
        let mut data = Self::new();
        data.load_from_dump_dir(&dd, &config.classify, &config.classify.exclude_from_report)?;
        dd.close();
        Ok(data)
    }

    /// Adds one entry per item of `dd`, classifying each, and skipping the
    /// names in `exclude`.
    ///
    /// Editable items are loaded as text. Other items are sniffed: text
    /// ones are loaded, binary ones are stored as their full path. A
    /// one-line text value loses its trailing newline. Symlinked items are
    /// skipped.
    pub fn load_from_dump_dir(
        &mut self,
        dd: &DumpDir,
        config: &ClassifyConfig,
        exclude: &[String],
    ) -> Result<(), DumpDirError> {
        for item in dd.items()? {
            let item = item?;
            if exclude.iter().any(|e| *e == item.name) {
                continue;
            }
            if item.is_symlink {
                warn!("Skipping symlinked item '{}'", item.path.display());
                continue;
            }

            let editable = config.is_editable(&item.name);
            let content = if editable {
                dd.load_text(&item.name)?
            } else {
                let sniffed = classify::sniff(&item.path, &item.name, config)
                    .map_err(|e| DumpDirError::from_io(&item.path, e))?;
                match sniffed {
                    Sniffed::Binary(_) => {
                        self.add(item.name, Entry::binary(item.path));
                        continue;
                    }
                    Sniffed::Text {
                        sample,
                        complete: true,
                    } => String::from_utf8_lossy(&sample).into_owned(),
                    Sniffed::Text { .. } => dd.load_text(&item.name)?,
                }
            };

            let mut entry = Entry::text(classify::strip_single_newline(content));
            if editable {
                entry = entry.editable();
            }

            if config.is_listed(&item.name) {
                entry = entry.listed();
            }
            if config.is_unix_time(&item.name) {
                entry = entry.unix_time();
            }
            self.add(item.name, entry);
        }
        Ok(())
    }

    /// Writes the text entries into a new record under `parent` and returns
    /// it open and locked.
    ///
    /// Binary entries are not copied; attach them separately. Entries whose
    /// names can't be item names are logged and left out.
    pub fn to_dump_dir<P: AsRef<Path>>(
        &self,
        parent: P,
        owner: Option<u32>,
        config: &DumpDirConfig,
    ) -> Result<DumpDir, DumpDirError> {
        let name = format!(
            "dumpster-tmp-{}-{}",
            Local::now().format("%Y-%m-%d-%H:%M:%S%.6f"),
            std::process::id()
        );
        let dd = DumpDir::create(parent.as_ref().join(name), owner, config)?;
        dd.create_basic_files(owner)?;

        for (name, entry) in &self.entries {
            let content = match entry {
                Entry::Text { content, .. } => content,
                Entry::Binary { .. } => continue,
            };
            if validate_item_name(name).is_err() {
                error!("Problem data field name contains disallowed chars: '{}'", name);
                continue;
            }
            dd.save_text(name, content)?;
        }
        Ok(dd)
    }

    /// Deduplication fingerprint over the text entries.
    pub fn duphash(&self, algorithm: HashAlgorithm) -> String {
        fingerprint(
            algorithm,
            self.entries
                .iter()
                .filter(|(name, _)| name.as_str() != DUPHASH)
                .filter_map(|(name, entry)| entry.content().map(|c| (name.as_str(), c))),
        )
    }

    /// Fills in `analyzer` and `duphash` when they are missing.
    pub fn ensure_basics(&mut self, config: &Config) {
        if !self.contains(items::ANALYZER) {
            self.add_text(items::ANALYZER, ANALYZER_NAME);
        }
        if !self.contains(DUPHASH) {
            let hash = self.duphash(config.hash.algorithm);
            self.add_text(DUPHASH, hash);
        }
    }
}

impl<'a> IntoIterator for &'a ProblemData {
    type Item = (&'a String, &'a Entry);
    type IntoIter = btree_map::Iter<'a, String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Splits a comma-separated exclusion list, dropping blanks.
pub fn parse_exclude_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
