//! Rule file parsing.
//!
//! ```text
//! # comment
//! EVENT=post-create analyzer=CCpp   dumpster-analyze-ccpp
//! EVENT=report component~=^(gnome|gtk)
//!         reporter-bugzilla --product GNOME
//! include conf.d/*.conf
//! ```
//!
//! A rule is `[NAME=VALUE | NAME~=REGEX]... COMMAND`. A physical line
//! starting with a blank continues the rule above it.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{glob_with, MatchOptions};
use regex::Regex;
use tracing::{debug, warn};

use super::EventError;
use crate::config::ConditionMatch;

/// Nesting limit for `include`.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Name that conditions use to test the event itself.
pub const EVENT_VAR: &str = "EVENT";

/// One condition of a rule.
#[derive(Debug, Clone)]
pub enum Condition {
    /// `NAME=VALUE`
    Equals { name: String, value: String },
    /// `NAME~=REGEX`, true when any line of the item matches.
    Regex { name: String, regex: Regex },
}

impl Condition {
    fn parse(word: &str) -> Result<Condition, EventError> {
        // Callers only pass words containing '='.
        let (name, value) = word.split_once('=').unwrap_or((word, ""));
        match name.strip_suffix('~') {
            Some(name) => {
                let regex = Regex::new(value).map_err(|source| EventError::BadRegex {
                    pattern: value.to_string(),
                    source,
                })?;
                Ok(Condition::Regex {
                    name: name.to_string(),
                    regex,
                })
            }
            None => Ok(Condition::Equals {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Condition::Equals { name, .. } | Condition::Regex { name, .. } => name,
        }
    }

    /// Tests the condition against the actual value of its name.
    pub fn matches(&self, actual: &str, mode: ConditionMatch) -> bool {
        match self {
            Condition::Equals { value, .. } => value_matches(actual, value, mode),
            Condition::Regex { regex, .. } => actual.split('\n').any(|line| regex.is_match(line)),
        }
    }
}

/// Whether `actual` satisfies `NAME=expected`.
///
/// In [`ConditionMatch::Token`] mode `expected` has to be the whole leading
/// token of `actual`; in [`ConditionMatch::Prefix`] mode a plain prefix is
/// enough.
pub fn value_matches(actual: &str, expected: &str, mode: ConditionMatch) -> bool {
    let rest = match actual.as_bytes().strip_prefix(expected.as_bytes()) {
        Some(rest) => rest,
        None => return false,
    };
    match mode {
        ConditionMatch::Prefix => true,
        ConditionMatch::Token => rest.first().map_or(true, |&b| is_space(b)),
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub conditions: Vec<Condition>,
    /// Shell command, never empty.
    pub command: String,
}

impl Rule {
    /// Parses one logical rule. Returns `None` for text with no command.
    pub fn parse(text: &str) -> Result<Option<Rule>, EventError> {
        let mut rest = text.trim_start_matches(|c: char| c.is_ascii() && is_space(c as u8));
        let mut conditions = Vec::new();

        loop {
            let word_end = rest
                .find(|c: char| c.is_ascii() && is_space(c as u8))
                .unwrap_or(rest.len());
            let word = &rest[..word_end];
            if word.is_empty() || !word.contains('=') {
                break;
            }
            conditions.push(Condition::parse(word)?);
            rest = rest[word_end..].trim_start_matches(|c: char| c.is_ascii() && is_space(c as u8));
        }

        let command = rest.trim_end();
        if command.is_empty() {
            return Ok(None);
        }
        Ok(Some(Rule {
            conditions,
            command: command.to_string(),
        }))
    }

    /// Values of the rule's `EVENT=` conditions.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::Equals { name, value } if name == EVENT_VAR => Some(value.as_str()),
            _ => None,
        })
    }
}

/// Rules of a rule file, includes expanded, in file order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RuleSet, EventError> {
        let mut set = RuleSet::default();
        set.load_file(path.as_ref(), 0)?;
        Ok(set)
    }

    /// Parses rule text. Relative includes are resolved against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<RuleSet, EventError> {
        let mut set = RuleSet::default();
        set.parse_text(text, base_dir, 0)?;
        Ok(set)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn load_file(&mut self, path: &Path, depth: usize) -> Result<(), EventError> {
        let text = fs::read_to_string(path).map_err(|source| EventError::ConfigUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        self.parse_text(&text, base_dir, depth)
    }

    fn parse_text(&mut self, text: &str, base_dir: &Path, depth: usize) -> Result<(), EventError> {
        for logical in logical_lines(text) {
            let line = logical.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(pattern) = include_pattern(line) {
                if depth >= MAX_INCLUDE_DEPTH {
                    warn!("Include nesting too deep, ignoring 'include {}'", pattern);
                    continue;
                }
                let pattern = if Path::new(pattern).is_absolute() {
                    PathBuf::from(pattern)
                } else {
                    base_dir.join(pattern)
                };
                for path in expand_glob(&pattern)? {
                    debug!("Including '{}'", path.display());
                    self.load_file(&path, depth + 1)?;
                }
                continue;
            }

            if let Some(rule) = Rule::parse(line)? {
                debug!("Adding '{}'", rule.command);
                self.rules.push(rule);
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Joins continuation lines (those starting with a blank) onto the line
/// before them, separated by '\n'.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let continues = line.starts_with([' ', '\t']);
        match lines.last_mut() {
            Some(last) if continues => {
                last.push('\n');
                last.push_str(line);
            }
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

fn include_pattern(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("include")?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let pattern = rest.trim();
    (!pattern.is_empty()).then_some(pattern)
}

/// Expands `pattern` like glob(3). Matches come back sorted; a pattern
/// matching nothing, wildcards or not, expands to no files.
fn expand_glob(pattern: &Path) -> Result<Vec<PathBuf>, EventError> {
    let text = pattern.to_string_lossy();
    let options = MatchOptions {
        // Wildcards don't match a leading dot.
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let entries = glob_with(&text, options).map_err(|source| EventError::BadGlob {
        pattern: text.to_string(),
        source,
    })?;

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Can't expand 'include {}': {}", text, e);
                None
            }
        })
        .collect();
    matches.sort();
    Ok(matches)
}

/// C `isspace` in the "C" locale.
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}
