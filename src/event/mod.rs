//! Event execution engine.
//!
//! An event ("post-create", "report_Bugzilla", ...) is run against a record
//! by walking the rule file top to bottom. Every rule whose conditions hold
//! has its command run through the shell in the record's directory. The
//! first handler that fails stops the run.
//!
//! # Example
//!
//! ```rust,no_run
//! use dumpster::{Config, EventRunner, RunOutcome};
//! use std::path::Path;
//!
//! let config = Config::default();
//! let mut runner = EventRunner::new(&config).on_output(|line| {
//!     println!("{}", line);
//!     line.to_string()
//! });
//! match runner.run(Path::new("/var/spool/dumpster/ccpp-1"), "post-create")? {
//!     RunOutcome::NoMatchingAction => eprintln!("nothing to do"),
//!     outcome => std::process::exit(outcome.exit_code()),
//! }
//! # Ok::<(), dumpster::EventError>(())
//! ```

pub mod process;
pub mod rules;

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dump_dir::{validate_item_name, DumpDir, DumpDirError};
use crate::problem_data::ProblemData;
use process::HandlerProcess;
use rules::{Rule, RuleSet, EVENT_VAR};

/// Environment variable carrying the record's absolute path.
pub const DUMP_DIR_ENV: &str = "DUMP_DIR";
/// Environment variable carrying the event name.
pub const EVENT_ENV: &str = "EVENT";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Can't open '{path}': {source}")]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Bad regexp '{pattern}': {source}")]
    BadRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Bad include pattern '{pattern}': {source}")]
    BadGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error(transparent)]
    DumpDir(#[from] DumpDirError),

    #[error("Can't run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result of running an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// At least one handler ran and all of them succeeded.
    Success,
    /// No rule matched, so nothing ran.
    NoMatchingAction,
    /// A handler exited non-zero, or died of a signal (128 + N).
    HandlerFailed(i32),
    /// The post-run callback returned non-zero.
    PostRunFailed(i32),
}

impl RunOutcome {
    /// Sentinel exit code for [`RunOutcome::NoMatchingAction`].
    pub const NO_MATCH_CODE: i32 = -1;

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::NoMatchingAction => Self::NO_MATCH_CODE,
            RunOutcome::HandlerFailed(code) | RunOutcome::PostRunFailed(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == RunOutcome::Success
    }
}

type OutputCallback<'a> = Box<dyn FnMut(&str) -> String + 'a>;
type PostRunCallback<'a> = Box<dyn FnMut(&Path) -> i32 + 'a>;

/// Runs events against records.
pub struct EventRunner<'a> {
    config: &'a Config,
    rule_file: PathBuf,
    on_output: Option<OutputCallback<'a>>,
    on_post_run: Option<PostRunCallback<'a>>,
}

impl<'a> EventRunner<'a> {
    /// Uses the rule file named in `config`.
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            rule_file: config.event.rule_file.clone(),
            on_output: None,
            on_post_run: None,
        }
    }

    /// Overrides the rule file.
    pub fn rule_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rule_file = path.into();
        self
    }

    /// Called with each line of handler output as it arrives. The returned
    /// text is what gets logged.
    pub fn on_output(mut self, callback: impl FnMut(&str) -> String + 'a) -> Self {
        self.on_output = Some(Box::new(callback));
        self
    }

    /// Called with the record path after each handler that succeeded. A
    /// non-zero return stops the run.
    pub fn on_post_run(mut self, callback: impl FnMut(&Path) -> i32 + 'a) -> Self {
        self.on_post_run = Some(Box::new(callback));
        self
    }

    /// Runs `event` against the record at `dir`.
    ///
    /// Conditions of each rule are checked right before it would run, so
    /// items written by earlier handlers count. The record is not kept
    /// locked while a handler runs.
    pub fn run(&mut self, dir: &Path, event: &str) -> Result<RunOutcome, EventError> {
        let rules = RuleSet::load(&self.rule_file)?;
        // Handlers may chdir; give them a path that still works.
        let full_path = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        let env = [
            (DUMP_DIR_ENV, full_path.as_os_str()),
            (EVENT_ENV, OsStr::new(event)),
        ];

        let mut outcome = RunOutcome::NoMatchingAction;
        for rule in &rules {
            if !self.rule_matches(rule, Some(dir), Some(event))? {
                continue;
            }

            info!("Executing '{}'", rule.command);
            let mut handler =
                HandlerProcess::spawn(&self.config.event.shell, &rule.command, dir, env)
                    .map_err(|source| EventError::Spawn {
                        command: rule.command.clone(),
                        source,
                    })?;
            debug!("Started handler pid {}", handler.id());
            loop {
                let line = match handler.next_line() {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Can't read output of '{}': {}", rule.command, e);
                        handler.kill();
                        return Err(e.into());
                    }
                };
                let logged = match self.on_output.as_mut() {
                    Some(callback) => callback(&line),
                    None => line,
                };
                info!("{}", logged);
            }

            let code = handler.wait()?;
            if code != 0 {
                warn!("'{}' exited with {}", rule.command, code);
                return Ok(RunOutcome::HandlerFailed(code));
            }

            if let Some(post_run) = self.on_post_run.as_mut() {
                let code = post_run(dir);
                if code != 0 {
                    return Ok(RunOutcome::PostRunFailed(code));
                }
            }
            outcome = RunOutcome::Success;
        }
        Ok(outcome)
    }

    /// Runs `event` on `data` through a temporary record under `parent`.
    ///
    /// `data` is replaced with what the record holds afterwards, so items
    /// added by handlers show up. Binary entries are carried over from the
    /// old `data`; binary items handlers wrote are dropped with the record.
    pub fn run_on_problem_data(
        &mut self,
        data: &mut ProblemData,
        event: &str,
        parent: &Path,
    ) -> Result<RunOutcome, EventError> {
        let dd = data.to_dump_dir(parent, None, &self.config.dump_dir)?;
        let path = dd.path().to_path_buf();
        dd.close();

        let result = self.run(&path, event).and_then(|outcome| {
            let dd = DumpDir::open(&path, &self.config.dump_dir)?;
            let reloaded = ProblemData::from_dump_dir(&dd, &self.config.classify)?;
            dd.close();
            Ok((outcome, without_dangling(reloaded, data)))
        });

        if let Err(e) = crate::dump_dir::delete_dump_dir(&path, &self.config.dump_dir) {
            warn!("Can't remove temporary record '{}': {}", path.display(), e);
        }

        let (outcome, reloaded) = result?;
        *data = reloaded;
        Ok(outcome)
    }

    /// Lists the events whose name starts with `prefix` that have a rule.
    ///
    /// With a record, the rule's other conditions have to hold for it;
    /// without one they are assumed to. Names come in rule file order,
    /// without repeats.
    pub fn list_possible_events(
        &self,
        dir: Option<&Path>,
        prefix: &str,
    ) -> Result<Vec<String>, EventError> {
        let rules = RuleSet::load(&self.rule_file)?;
        let mut events: Vec<String> = Vec::new();
        for rule in &rules {
            let names: Vec<&str> = rule
                .events()
                .filter(|name| name.starts_with(prefix))
                .collect();
            if names.is_empty() || !self.rule_matches(rule, dir, None)? {
                continue;
            }
            for name in names {
                if !events.iter().any(|e| e == name) {
                    events.push(name.to_string());
                }
            }
        }
        Ok(events)
    }

    /// Checks a rule's conditions. `EVENT` conditions are tested against
    /// `event` when given and skipped otherwise; the rest against the
    /// record's items when `dir` is given and skipped otherwise.
    fn rule_matches(
        &self,
        rule: &Rule,
        dir: Option<&Path>,
        event: Option<&str>,
    ) -> Result<bool, EventError> {
        let mode = self.config.event.condition_match;
        let mut record: Option<DumpDir> = None;

        for condition in &rule.conditions {
            let name = condition.name();
            if name == EVENT_VAR {
                match event {
                    Some(event) if !condition.matches(event, mode) => return Ok(false),
                    _ => continue,
                }
            }

            let dir = match dir {
                Some(dir) => dir,
                None => continue,
            };
            if validate_item_name(name).is_err() {
                debug!("Condition on '{}' can never hold", name);
                return Ok(false);
            }
            if record.is_none() {
                record = Some(DumpDir::open(dir, &self.config.dump_dir)?);
            }
            // An unreadable item fails the condition like a missing one.
            let actual = match record.as_ref().map(|dd| dd.load_text_opt(name)) {
                Some(Ok(actual)) => actual,
                Some(Err(e)) => {
                    debug!("Can't read '{}' for '{}': {}", name, rule.command, e);
                    None
                }
                None => None,
            };
            match actual {
                Some(actual) if condition.matches(&actual, mode) => {}
                _ => {
                    debug!("Condition on '{}' does not hold, skipping '{}'", name, rule.command);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Drops binary entries pointing into the deleted record and restores the
/// ones the caller had.
fn without_dangling(reloaded: ProblemData, original: &ProblemData) -> ProblemData {
    let mut result = ProblemData::new();
    for (name, entry) in reloaded.iter() {
        if !entry.is_binary() {
            result.add(name.clone(), entry.clone());
        }
    }
    for (name, entry) in original.iter() {
        if entry.is_binary() && !result.contains(name) {
            result.add(name.clone(), entry.clone());
        }
    }
    result
}
