//! On-disk problem records ("dump directories").
//!
//! A record is a directory holding one regular file per item. The file name
//! is the item name and the file content is the item content, binary-safe.
//! Writers serialize through an advisory lock (see [`lock`]); readers may
//! open without it.
//!
//! # Lifecycle
//!
//! ```text
//! create() ──► open+locked ──► close() ──► (on disk, unlocked)
//!                                  ▲                 │
//!                                  └──── open() ◄────┘
//!                                                    │
//!                                           delete() ──► gone
//! ```
//!
//! Creation is atomic: the record is assembled in a hidden staging
//! directory next to its final location and renamed into place only once
//! its mandatory `time` item exists. A concurrent reader either sees no
//! record or a complete one.
//!
//! # Example
//!
//! ```rust,no_run
//! use dumpster::{Config, DumpDir};
//!
//! let config = Config::default();
//! let dd = DumpDir::create("/var/spool/dumpster/ccpp-1", None, &config.dump_dir)?;
//! dd.save_text("reason", "SIGSEGV in main")?;
//! dd.close();
//!
//! let dd = DumpDir::open("/var/spool/dumpster/ccpp-1", &config.dump_dir)?;
//! assert_eq!(dd.load_text("reason")?, "SIGSEGV in main");
//! # Ok::<(), dumpster::DumpDirError>(())
//! ```

pub(crate) mod lock;

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::{fchown, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{geteuid, Uid, User};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{DumpDirConfig, LockPolicy};
use crate::items;
use lock::LockAttempt;

/// Store errors.
#[derive(Debug, Error)]
pub enum DumpDirError {
    #[error("'{0}' does not exist")]
    NotFound(PathBuf),

    #[error("'{0}' already exists")]
    AlreadyExists(PathBuf),

    #[error("Permission denied: '{0}'")]
    PermissionDenied(PathBuf),

    #[error("'{0}' is not a dump directory")]
    NotADumpDir(PathBuf),

    #[error("Invalid item name '{0}'")]
    InvalidName(String),

    #[error("'{0}' is a symbolic link, refusing to follow it")]
    SymlinkRefused(PathBuf),

    #[error("'{0}' is not opened for writing")]
    ReadOnly(PathBuf),

    #[error("'{path}' is locked by process {pid}")]
    Locked { path: PathBuf, pid: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DumpDirError {
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if source.raw_os_error() == Some(Errno::ELOOP as i32) {
            return DumpDirError::SymlinkRefused(path);
        }
        match source.kind() {
            io::ErrorKind::NotFound => DumpDirError::NotFound(path),
            io::ErrorKind::PermissionDenied => DumpDirError::PermissionDenied(path),
            io::ErrorKind::AlreadyExists => DumpDirError::AlreadyExists(path),
            _ => DumpDirError::Io { path, source },
        }
    }
}

type Result<T> = std::result::Result<T, DumpDirError>;

/// What [`DumpDir::delete`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    /// The directory was already gone. Deleting is idempotent.
    AlreadyAbsent,
}

/// One entry produced by [`DumpDir::items`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub path: PathBuf,
    /// Symlinked items are listed, but loading them fails with
    /// [`DumpDirError::SymlinkRefused`].
    pub is_symlink: bool,
}

/// Checks that `name` can be stored as an item: non-empty, no path
/// separator, no leading '.', no NUL.
pub fn validate_item_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\0') {
        return Err(DumpDirError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Options for opening an existing record.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    read_only: bool,
    fail_quietly: bool,
    lock_policy: Option<LockPolicy>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open without taking the lock. The handle can read but not write.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Don't log an error when the record is missing or unreadable.
    pub fn fail_quietly(mut self, fail_quietly: bool) -> Self {
        self.fail_quietly = fail_quietly;
        self
    }

    /// Overrides the configured [`LockPolicy`].
    pub fn lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = Some(policy);
        self
    }

    pub fn open<P: AsRef<Path>>(&self, path: P, config: &DumpDirConfig) -> Result<DumpDir> {
        let path = normalize(path.as_ref());
        let result = self.open_inner(&path, config);
        if let Err(e) = &result {
            let quiet = self.fail_quietly
                && matches!(e, DumpDirError::NotFound(_) | DumpDirError::PermissionDenied(_));
            if !quiet {
                error!("{}", e);
            }
        }
        result
    }

    fn open_inner(&self, path: &Path, config: &DumpDirConfig) -> Result<DumpDir> {
        let meta = fs::metadata(path).map_err(|e| {
            if e.raw_os_error() == Some(Errno::ENOTDIR as i32) {
                DumpDirError::NotFound(path.to_path_buf())
            } else {
                DumpDirError::from_io(path, e)
            }
        })?;
        if !meta.is_dir() {
            return Err(DumpDirError::NotFound(path.to_path_buf()));
        }

        let mut dd = DumpDir {
            path: path.to_path_buf(),
            locked: false,
            uid: None,
            gid: None,
            file_mode: meta.mode() & 0o666,
            config: config.clone(),
        };
        if geteuid().is_root() {
            // Later writes must keep the record's ownership.
            dd.uid = Some(meta.uid());
            dd.gid = Some(meta.gid());
        }

        if self.read_only {
            return Ok(dd);
        }
        let policy = self.lock_policy.unwrap_or(config.lock_policy);
        dd.locked = dd.lock_for_open(policy)?;
        Ok(dd)
    }
}

/// An open handle on a record.
///
/// Dropping the handle releases its lock.
#[derive(Debug)]
pub struct DumpDir {
    path: PathBuf,
    locked: bool,
    uid: Option<u32>,
    gid: Option<u32>,
    file_mode: u32,
    config: DumpDirConfig,
}

impl DumpDir {
    /// Creates a new record at `path` and returns it open and locked.
    ///
    /// With `owner` set to the crashed user's uid, the record is handed to
    /// the configured owner account and that user's group. `None` skips
    /// ownership changes.
    pub fn create<P: AsRef<Path>>(
        path: P,
        owner: Option<u32>,
        config: &DumpDirConfig,
    ) -> Result<DumpDir> {
        let path = normalize(path.as_ref());
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.starts_with('.') => name.to_string(),
            _ => {
                error!("Bad dir name '{}'", path.display());
                return Err(DumpDirError::InvalidName(path.display().to_string()));
            }
        };
        if fs::symlink_metadata(&path).is_ok() {
            return Err(DumpDirError::AlreadyExists(path));
        }

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| DumpDirError::from_io(&parent, e))?;

        let staging = parent.join(format!(".{}.new-{}", name, std::process::id()));
        fs::create_dir(&staging).map_err(|e| {
            let err = DumpDirError::from_io(&staging, e);
            error!("Can't create directory '{}': {}", staging.display(), err);
            err
        })?;

        let mut dd = DumpDir {
            path: staging.clone(),
            locked: false,
            uid: None,
            gid: None,
            file_mode: config.file_mode,
            config: config.clone(),
        };
        match dd.populate_and_publish(&path, owner) {
            Ok(()) => {
                dd.path = path;
                info!("Created dump directory '{}'", dd.path.display());
                Ok(dd)
            }
            Err(e) => {
                dd.locked = false;
                if let Err(cleanup) = remove_tree(&staging, false, config) {
                    warn!("Can't remove '{}': {}", staging.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    fn populate_and_publish(&mut self, target: &Path, owner: Option<u32>) -> Result<()> {
        loop {
            match lock::try_lock(&self.path, &self.config)
                .map_err(|e| DumpDirError::from_io(&self.path, e))?
            {
                LockAttempt::Acquired => break,
                LockAttempt::HeldBy(_) => DumpDirConfig::sleep(self.config.create_lock_ms),
            }
        }
        self.locked = true;

        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.config.dir_mode()))
            .map_err(|e| DumpDirError::from_io(&self.path, e))?;

        if let Some(crashed_uid) = owner {
            self.resolve_owner(crashed_uid);
            if let Err(e) = std::os::unix::fs::chown(&self.path, self.uid, self.gid) {
                warn!(
                    "Can't change '{}' ownership to {:?}:{:?}: {}",
                    self.path.display(),
                    self.uid,
                    self.gid,
                    e
                );
            }
        }

        self.save_text(items::TIME, &chrono::Utc::now().timestamp().to_string())?;

        // rename(2) silently replaces an empty directory, so look once more.
        if fs::symlink_metadata(target).is_ok() {
            return Err(DumpDirError::AlreadyExists(target.to_path_buf()));
        }
        fs::rename(&self.path, target).map_err(|e| {
            let code = e.raw_os_error();
            if code == Some(Errno::ENOTEMPTY as i32) || code == Some(Errno::EEXIST as i32) {
                DumpDirError::AlreadyExists(target.to_path_buf())
            } else {
                DumpDirError::from_io(target, e)
            }
        })
    }

    fn resolve_owner(&mut self, crashed_uid: u32) {
        let owner_uid = match User::from_name(&self.config.owner_user) {
            Ok(Some(user)) => user.uid.as_raw(),
            _ => {
                warn!("User '{}' does not exist, using uid 0", self.config.owner_user);
                0
            }
        };
        let gid = match User::from_uid(Uid::from_raw(crashed_uid)) {
            Ok(Some(user)) => user.gid.as_raw(),
            _ => {
                warn!("User {} does not exist, using gid 0", crashed_uid);
                0
            }
        };
        self.uid = Some(owner_uid);
        self.gid = Some(gid);
    }

    /// Opens an existing record with the configured lock policy.
    pub fn open<P: AsRef<Path>>(path: P, config: &DumpDirConfig) -> Result<DumpDir> {
        OpenOptions::new().open(path, config)
    }

    /// Returns true if the lock was taken, false if the handle is read-only.
    fn lock_for_open(&self, policy: LockPolicy) -> Result<bool> {
        let mut tries_left = self.config.no_time_file_tries.max(1);
        loop {
            match lock::try_lock(&self.path, &self.config) {
                Ok(LockAttempt::Acquired) => {}
                Ok(LockAttempt::HeldBy(pid)) => {
                    if policy == LockPolicy::BestEffort {
                        debug!("'{}' is locked, opening read-only", self.path.display());
                        return Ok(false);
                    }
                    // Waiting on our own pid would never end.
                    if policy == LockPolicy::FailFast || pid == lock::our_pid() {
                        return Err(DumpDirError::Locked {
                            path: self.path.clone(),
                            pid,
                        });
                    }
                    DumpDirConfig::sleep(self.config.wait_for_other_ms);
                    continue;
                }
                Err(e)
                    if policy == LockPolicy::BestEffort
                        && e.kind() == io::ErrorKind::PermissionDenied =>
                {
                    debug!("'{}' is not writable, opening read-only", self.path.display());
                    return Ok(false);
                }
                Err(e) => return Err(DumpDirError::from_io(&self.path, e)),
            }

            // We may have beaten a creator or a deleter to the lock.
            if fs::symlink_metadata(self.path.join(items::TIME)).is_ok() {
                return Ok(true);
            }
            lock::unlock(&self.path);
            debug!("Unlocked '{}' (no time file)", self.path.display());
            tries_left -= 1;
            if tries_left == 0 {
                return Err(DumpDirError::NotADumpDir(self.path.clone()));
            }
            DumpDirConfig::sleep(self.config.no_time_file_ms);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when this handle holds the record lock.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Owner applied to items written through this handle, if any.
    pub fn owner(&self) -> Option<(u32, u32)> {
        self.uid.zip(self.gid)
    }

    /// True if `name` exists as a file or directory.
    pub fn exists(&self, name: &str) -> bool {
        if validate_item_name(name).is_err() {
            return false;
        }
        fs::metadata(self.path.join(name))
            .map(|m| m.is_file() || m.is_dir())
            .unwrap_or(false)
    }

    /// Loads an item as text. A missing item is [`DumpDirError::NotFound`].
    ///
    /// This is lossy: bytes that aren't valid UTF-8 come back as U+FFFD, so
    /// a binary item read this way is altered. Use
    /// [`load_binary_opt`](DumpDir::load_binary_opt) for the exact bytes.
    pub fn load_text(&self, name: &str) -> Result<String> {
        self.load_text_opt(name)?
            .ok_or_else(|| DumpDirError::NotFound(self.path.join(name)))
    }

    /// Loads an item as text, or `None` if it does not exist.
    ///
    /// Invalid UTF-8 sequences are replaced with U+FFFD, as in
    /// [`load_text`](DumpDir::load_text). Symlinked items are refused.
    pub fn load_text_opt(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .load_binary_opt(name)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Loads an item's raw bytes, or `None` if it does not exist.
    pub fn load_binary_opt(&self, name: &str) -> Result<Option<Vec<u8>>> {
        validate_item_name(name)?;
        match read_no_follow(&self.path.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if name == items::LEGACY_RELEASE {
                    return self.load_binary_opt(items::OS_RELEASE);
                }
                Ok(None)
            }
            Err(e) => Err(DumpDirError::from_io(&self.path.join(name), e)),
        }
    }

    /// Writes `text` as item `name`, replacing any previous content.
    pub fn save_text(&self, name: &str, text: &str) -> Result<()> {
        self.save_binary(name, text.as_bytes())
    }

    /// Writes `data` as item `name`, replacing any previous content.
    pub fn save_binary(&self, name: &str, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        validate_item_name(name)?;

        let full_path = self.path.join(name);
        match fs::remove_file(&full_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DumpDirError::from_io(&full_path, e)),
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(self.file_mode)
            .custom_flags(OFlag::O_NOFOLLOW.bits())
            .open(&full_path)
            .map_err(|e| DumpDirError::from_io(&full_path, e))?;

        if self.uid.is_some() {
            if let Err(e) = fchown(&file, self.uid, self.gid) {
                warn!(
                    "Can't change '{}' ownership to {:?}:{:?}: {}",
                    full_path.display(),
                    self.uid,
                    self.gid,
                    e
                );
            }
        }

        file.write_all(data)
            .map_err(|e| DumpDirError::from_io(&full_path, e))
    }

    /// Lists the record's items: regular files and symlinks, skipping
    /// hidden bookkeeping entries such as the lock.
    ///
    /// The iterator reads the directory lazily and can be consumed once.
    pub fn items(&self) -> Result<Items> {
        let inner = fs::read_dir(&self.path).map_err(|e| {
            error!("Can't open directory '{}'", self.path.display());
            DumpDirError::from_io(&self.path, e)
        })?;
        Ok(Items {
            dir: self.path.clone(),
            inner,
        })
    }

    /// Writes the items every fresh record carries: `time`, `uid` (when
    /// known), kernel release, architecture, hostname and OS release.
    pub fn create_basic_files(&self, uid: Option<u32>) -> Result<()> {
        self.save_text(items::TIME, &chrono::Utc::now().timestamp().to_string())?;
        if let Some(uid) = uid {
            self.save_text(items::UID, &uid.to_string())?;
        }

        match nix::sys::utsname::uname() {
            Ok(uts) => {
                self.save_text(items::KERNEL, &uts.release().to_string_lossy())?;
                self.save_text(items::ARCHITECTURE, &uts.machine().to_string_lossy())?;
                self.save_text(items::HOSTNAME, &uts.nodename().to_string_lossy())?;
            }
            Err(e) => warn!("uname failed: {}", e),
        }

        if let Some(release) = os_release() {
            self.save_text(items::OS_RELEASE, &release)?;
        }
        Ok(())
    }

    /// Resets mode and ownership of every regular item to the record's.
    ///
    /// Handlers running as root may leave root-owned files behind. Does
    /// nothing when the handle carries no owner.
    pub fn sanitize_mode_and_owner(&self) -> Result<()> {
        let (uid, gid) = match self.owner() {
            Some(owner) => owner,
            None => return Ok(()),
        };
        self.ensure_writable()?;

        for item in self.items()? {
            let item = item?;
            let meta = match fs::symlink_metadata(&item.path) {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            if meta.mode() & 0o777 != self.file_mode {
                if let Err(e) =
                    fs::set_permissions(&item.path, fs::Permissions::from_mode(self.file_mode))
                {
                    warn!("Can't change mode of '{}': {}", item.path.display(), e);
                }
            }
            if meta.uid() != uid || meta.gid() != gid {
                if let Err(e) = std::os::unix::fs::chown(&item.path, Some(uid), Some(gid)) {
                    warn!(
                        "Can't change '{}' ownership to {}:{}: {}",
                        item.path.display(),
                        uid,
                        gid,
                        e
                    );
                }
            }
        }
        Ok(())
    }

    /// Appends `line` to the `reported_to` item unless it is already there.
    pub fn add_reported_to(&self, line: &str) -> Result<()> {
        let updated = match self.load_text_opt(items::REPORTED_TO)? {
            Some(existing) => {
                if existing.lines().any(|l| l == line) {
                    return Ok(());
                }
                let mut updated = existing;
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(line);
                updated.push('\n');
                updated
            }
            None => format!("{}\n", line),
        };
        self.save_text(items::REPORTED_TO, &updated)
    }

    /// Removes the record recursively and releases the lock.
    pub fn delete(mut self) -> Result<DeleteOutcome> {
        self.ensure_writable()?;
        let outcome = remove_tree(&self.path, true, &self.config);
        // The lock went with the tree.
        self.locked = false;
        match &outcome {
            Ok(DeleteOutcome::Removed) => info!("Deleted '{}'", self.path.display()),
            Ok(DeleteOutcome::AlreadyAbsent) => debug!("'{}' already gone", self.path.display()),
            Err(e) => error!("{}", e),
        }
        outcome
    }

    /// Releases the lock and invalidates the handle.
    pub fn close(self) {}

    fn ensure_writable(&self) -> Result<()> {
        if self.locked {
            Ok(())
        } else {
            Err(DumpDirError::ReadOnly(self.path.clone()))
        }
    }
}

impl Drop for DumpDir {
    fn drop(&mut self) {
        if self.locked {
            self.locked = false;
            lock::unlock(&self.path);
        }
    }
}

/// Lazy listing of a record's items. See [`DumpDir::items`].
#[derive(Debug)]
pub struct Items {
    dir: PathBuf,
    inner: fs::ReadDir,
}

impl Iterator for Items {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(DumpDirError::from_io(&self.dir, e))),
            };
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with('.') {
                continue;
            }
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => return Some(Err(DumpDirError::from_io(&entry.path(), e))),
            };
            if file_type.is_file() || file_type.is_symlink() {
                return Some(Ok(Item {
                    name,
                    path: entry.path(),
                    is_symlink: file_type.is_symlink(),
                }));
            }
        }
    }
}

/// Opens and deletes the record at `path`. A missing record is reported as
/// [`DeleteOutcome::AlreadyAbsent`].
pub fn delete_dump_dir<P: AsRef<Path>>(path: P, config: &DumpDirConfig) -> Result<DeleteOutcome> {
    match OpenOptions::new().fail_quietly(true).open(path, config) {
        Ok(dd) => dd.delete(),
        Err(DumpDirError::NotFound(_)) => Ok(DeleteOutcome::AlreadyAbsent),
        Err(e) => Err(e),
    }
}

pub(crate) fn read_no_follow(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = open_no_follow(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

pub(crate) fn open_no_follow(path: &Path) -> io::Result<File> {
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NOFOLLOW.bits())
        .open(path)
}

fn remove_tree(dir: &Path, skip_lock_file: bool, config: &DumpDirConfig) -> Result<DeleteOutcome> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e)
            if e.kind() == io::ErrorKind::NotFound
                || e.raw_os_error() == Some(Errno::ENOTDIR as i32) =>
        {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        Err(e) => return Err(DumpDirError::from_io(dir, e)),
    };

    let mut had_lock = false;
    for entry in entries {
        let entry = entry.map_err(|e| DumpDirError::from_io(dir, e))?;
        if skip_lock_file && entry.file_name() == lock::LOCK_FILE {
            had_lock = true;
            continue;
        }
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map_err(|e| DumpDirError::from_io(&path, e))?
            .is_dir();
        if is_dir {
            remove_tree(&path, false, config)?;
        } else {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(DumpDirError::from_io(&path, e)),
            }
        }
    }

    if had_lock {
        lock::unlock(dir);
        // An opener may grab the lock between our unlink and rmdir. It backs
        // off once it sees no `time` item, so just retry.
        for _ in 0..config.rmdir_tries {
            if fs::remove_dir(dir).is_ok() {
                return Ok(DeleteOutcome::Removed);
            }
            DumpDirConfig::sleep(config.rmdir_retry_ms);
        }
    }

    match fs::remove_dir(dir) {
        Ok(()) => Ok(DeleteOutcome::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
        Err(e) => Err(DumpDirError::from_io(dir, e)),
    }
}

/// Drops trailing slashes and `.` components.
fn normalize(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

fn os_release() -> Option<String> {
    for candidate in ["/etc/system-release", "/etc/redhat-release"] {
        if let Ok(text) = fs::read_to_string(candidate) {
            return Some(text.trim_end().to_string());
        }
    }
    let text = fs::read_to_string("/etc/os-release").ok()?;
    text.lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getuid, User};
    use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
    use tempfile::tempdir;

    fn fast_config() -> DumpDirConfig {
        DumpDirConfig {
            wait_for_other_ms: 5,
            no_time_file_ms: 1,
            no_time_file_tries: 3,
            rmdir_retry_ms: 1,
            ..DumpDirConfig::default()
        }
    }

    #[test]
    fn create_returns_locked_record_with_time() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ccpp-1");
        let dd = DumpDir::create(&path, None, &fast_config()).unwrap();

        assert!(dd.is_locked());
        assert_eq!(dd.path(), path.as_path());
        assert!(dd.exists(items::TIME));
        assert!(fs::symlink_metadata(path.join(lock::LOCK_FILE)).is_ok());

        dd.close();
        assert!(fs::symlink_metadata(path.join(lock::LOCK_FILE)).is_err());
    }

    #[test]
    fn owner_is_applied_to_record_and_items() {
        let me = User::from_uid(getuid()).unwrap().unwrap();
        let (uid, gid) = (me.uid.as_raw(), me.gid.as_raw());
        let config = DumpDirConfig {
            owner_user: me.name.clone(),
            ..fast_config()
        };
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("owned");

        let dd = DumpDir::create(&path, Some(uid), &config).unwrap();
        assert_eq!(dd.owner(), Some((uid, gid)));
        dd.save_binary("data", b"payload").unwrap();

        for item in [path.clone(), path.join(items::TIME), path.join("data")] {
            let meta = fs::metadata(&item).unwrap();
            assert_eq!((meta.uid(), meta.gid()), (uid, gid), "{}", item.display());
        }
        assert_eq!(
            fs::metadata(&path).unwrap().mode() & 0o777,
            config.dir_mode()
        );
    }

    #[test]
    fn sanitize_resets_item_modes() {
        let me = User::from_uid(getuid()).unwrap().unwrap();
        let config = DumpDirConfig {
            owner_user: me.name.clone(),
            ..fast_config()
        };
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("owned");
        let dd = DumpDir::create(&path, Some(me.uid.as_raw()), &config).unwrap();
        dd.save_text("reason", "boom").unwrap();
        fs::set_permissions(path.join("reason"), fs::Permissions::from_mode(0o600)).unwrap();

        dd.sanitize_mode_and_owner().unwrap();
        let meta = fs::metadata(path.join("reason")).unwrap();
        assert_eq!(meta.mode() & 0o777, config.file_mode);
        assert_eq!(meta.uid(), me.uid.as_raw());
    }

    #[test]
    fn sanitize_without_owner_changes_nothing() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("plain");
        let dd = DumpDir::create(&path, None, &fast_config()).unwrap();
        assert_eq!(dd.owner(), None);
        dd.save_text("reason", "boom").unwrap();
        fs::set_permissions(path.join("reason"), fs::Permissions::from_mode(0o600)).unwrap();

        dd.sanitize_mode_and_owner().unwrap();
        assert_eq!(fs::metadata(path.join("reason")).unwrap().mode() & 0o777, 0o600);
    }

    #[test]
    fn text_loads_replace_invalid_utf8() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();
        dd.save_binary("blob", b"ok\xffok").unwrap();

        assert_eq!(dd.load_text("blob").unwrap(), "ok\u{fffd}ok");
        assert_eq!(
            dd.load_binary_opt("blob").unwrap().as_deref(),
            Some(&b"ok\xffok"[..])
        );
    }

    #[test]
    fn create_twice_fails_without_leftovers() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ccpp-1");
        DumpDir::create(&path, None, &fast_config()).unwrap().close();

        let err = DumpDir::create(&path, None, &fast_config()).unwrap_err();
        assert!(matches!(err, DumpDirError::AlreadyExists(_)));

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["ccpp-1".to_string()]);
    }

    #[test]
    fn create_makes_missing_parents() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("a/b/ccpp-2");
        DumpDir::create(&path, None, &fast_config()).unwrap();
        assert!(path.join(items::TIME).is_file());
    }

    #[test]
    fn create_rejects_dot_names() {
        let tmp = tempdir().unwrap();
        let err = DumpDir::create(tmp.path().join(".."), None, &fast_config()).unwrap_err();
        assert!(matches!(err, DumpDirError::InvalidName(_)));
        let err = DumpDir::create(tmp.path().join(".hidden"), None, &fast_config()).unwrap_err();
        assert!(matches!(err, DumpDirError::InvalidName(_)));
    }

    #[test]
    fn create_sets_directory_mode() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ccpp-3");
        DumpDir::create(&path, None, &fast_config()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn text_round_trips_unchanged() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();

        for content in ["", "one line\n", "no newline", "multi\nline\ntext\n", "ünïcødé ✓"] {
            dd.save_text("item", content).unwrap();
            assert_eq!(dd.load_text("item").unwrap(), content);
        }
    }

    #[test]
    fn save_replaces_instead_of_appending() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();
        dd.save_text("reason", "first, and quite long").unwrap();
        dd.save_binary("reason", b"2nd").unwrap();
        assert_eq!(dd.load_text("reason").unwrap(), "2nd");
    }

    #[test]
    fn binary_round_trips() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();
        let data: Vec<u8> = (0..=255u8).collect();
        dd.save_binary("coredump", &data).unwrap();
        assert_eq!(dd.load_binary_opt("coredump").unwrap(), Some(data));
    }

    #[test]
    fn missing_items_are_distinguished() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();
        assert!(matches!(dd.load_text("nope"), Err(DumpDirError::NotFound(_))));
        assert_eq!(dd.load_text_opt("nope").unwrap(), None);
        assert!(!dd.exists("nope"));
    }

    #[test]
    fn symlinked_items_are_refused() {
        let tmp = tempdir().unwrap();
        let secret = tmp.path().join("secret");
        fs::write(&secret, "do not read").unwrap();

        let path = tmp.path().join("r");
        let dd = DumpDir::create(&path, None, &fast_config()).unwrap();
        symlink(&secret, path.join("link")).unwrap();

        assert!(matches!(dd.load_text("link"), Err(DumpDirError::SymlinkRefused(_))));
        assert!(matches!(dd.load_text_opt("link"), Err(DumpDirError::SymlinkRefused(_))));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        let dd = DumpDir::create(&path, None, &fast_config()).unwrap();
        dd.save_text("good", "1").unwrap();

        for name in ["", ".hidden", "../escape", "a/b", ".lock"] {
            assert!(
                matches!(dd.save_text(name, "x"), Err(DumpDirError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(!tmp.path().join("escape").exists());
        assert_eq!(dd.load_text("good").unwrap(), "1");
    }

    #[test]
    fn read_only_handle_cannot_write() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        DumpDir::create(&path, None, &fast_config()).unwrap().close();

        let dd = OpenOptions::new()
            .read_only(true)
            .open(&path, &fast_config())
            .unwrap();
        assert!(!dd.is_locked());
        assert!(dd.load_text(items::TIME).is_ok());
        assert!(matches!(dd.save_text("x", "y"), Err(DumpDirError::ReadOnly(_))));
    }

    #[test]
    fn open_missing_record_is_not_found() {
        let tmp = tempdir().unwrap();
        let err = OpenOptions::new()
            .fail_quietly(true)
            .open(tmp.path().join("nope"), &fast_config())
            .unwrap_err();
        assert!(matches!(err, DumpDirError::NotFound(_)));
    }

    #[test]
    fn open_plain_directory_is_not_a_dump_dir() {
        let tmp = tempdir().unwrap();
        let plain = tmp.path().join("plain");
        fs::create_dir(&plain).unwrap();

        let err = DumpDir::open(&plain, &fast_config()).unwrap_err();
        assert!(matches!(err, DumpDirError::NotADumpDir(_)));
        assert!(fs::symlink_metadata(plain.join(lock::LOCK_FILE)).is_err());
    }

    #[test]
    fn lock_policies_against_a_foreign_holder() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        DumpDir::create(&path, None, &fast_config()).unwrap().close();
        // pid 1 is always alive.
        symlink("1", path.join(lock::LOCK_FILE)).unwrap();

        let err = OpenOptions::new()
            .lock_policy(LockPolicy::FailFast)
            .open(&path, &fast_config())
            .unwrap_err();
        assert!(matches!(err, DumpDirError::Locked { ref pid, .. } if pid == "1"));

        let dd = OpenOptions::new()
            .lock_policy(LockPolicy::BestEffort)
            .open(&path, &fast_config())
            .unwrap();
        assert!(!dd.is_locked());
        drop(dd);
        // A read-only handle must not remove someone else's lock.
        assert_eq!(fs::read_link(path.join(lock::LOCK_FILE)).unwrap(), PathBuf::from("1"));
    }

    #[test]
    fn second_handle_in_same_process_is_refused() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        let _held = DumpDir::create(&path, None, &fast_config()).unwrap();

        let err = DumpDir::open(&path, &fast_config()).unwrap_err();
        assert!(matches!(err, DumpDirError::Locked { .. }));
    }

    #[test]
    fn items_skip_lock_and_directories() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        let dd = DumpDir::create(&path, None, &fast_config()).unwrap();
        dd.save_text("reason", "x").unwrap();
        fs::create_dir(path.join("subdir")).unwrap();
        symlink("/etc/passwd", path.join("link")).unwrap();

        let mut listed: Vec<Item> = dd.items().unwrap().map(|i| i.unwrap()).collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<&str> = listed.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["link", "reason", "time"]);
        assert!(listed[0].is_symlink);
        assert_eq!(listed[1].path, path.join("reason"));
    }

    #[test]
    fn delete_is_idempotent() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        let dd = DumpDir::create(&path, None, &fast_config()).unwrap();
        dd.save_text("reason", "x").unwrap();
        fs::create_dir(path.join("nested")).unwrap();
        fs::write(path.join("nested/file"), "y").unwrap();

        assert_eq!(dd.delete().unwrap(), DeleteOutcome::Removed);
        assert!(!path.exists());
        assert_eq!(
            delete_dump_dir(&path, &fast_config()).unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
    }

    #[test]
    fn delete_through_read_only_handle_is_refused() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        DumpDir::create(&path, None, &fast_config()).unwrap().close();
        let dd = OpenOptions::new().read_only(true).open(&path, &fast_config()).unwrap();
        assert!(matches!(dd.delete(), Err(DumpDirError::ReadOnly(_))));
        assert!(path.exists());
    }

    #[test]
    fn reported_to_lines_are_not_duplicated() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();
        dd.add_reported_to("Bugzilla: URL=http://b/1").unwrap();
        dd.add_reported_to("Logger: file:///tmp/log").unwrap();
        dd.add_reported_to("Bugzilla: URL=http://b/1").unwrap();
        assert_eq!(
            dd.load_text(items::REPORTED_TO).unwrap(),
            "Bugzilla: URL=http://b/1\nLogger: file:///tmp/log\n"
        );
    }

    #[test]
    fn basic_files_are_written() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();
        dd.create_basic_files(Some(1234)).unwrap();
        assert_eq!(dd.load_text(items::UID).unwrap(), "1234");
        assert!(dd.load_text(items::TIME).unwrap().parse::<i64>().is_ok());
        assert!(!dd.load_text(items::KERNEL).unwrap().is_empty());
        assert!(!dd.load_text(items::ARCHITECTURE).unwrap().is_empty());
    }

    #[test]
    fn legacy_release_name_reads_os_release() {
        let tmp = tempdir().unwrap();
        let dd = DumpDir::create(tmp.path().join("r"), None, &fast_config()).unwrap();
        dd.save_text(items::OS_RELEASE, "Fedora release 14").unwrap();
        assert_eq!(dd.load_text(items::LEGACY_RELEASE).unwrap(), "Fedora release 14");
    }

    #[test]
    fn trailing_slashes_are_ignored() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("r");
        DumpDir::create(&path, None, &fast_config()).unwrap().close();
        let with_slash = format!("{}/", path.display());
        let dd = DumpDir::open(&with_slash, &fast_config()).unwrap();
        assert_eq!(dd.path(), path.as_path());
    }
}
