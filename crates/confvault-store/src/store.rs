//! Host-keyed configuration store on top of a [`VcsBackend`].
//!
//! ```text
//! {root}/
//!   {captured}/{segments}/
//!     {hostname}/
//!       running-config
//!       startup-config
//! ```
//!
//! A store starts `Uninitialized` and becomes `Open` through [`VersionedStore::init`]
//! (no repository yet) or [`VersionedStore::open`] (repository present). All
//! reads, writes, and commits require `Open`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use confvault_core::types::{normalize_line, normalize_lines, ConfigSnapshot};

use crate::error::{Result, StoreError};
use crate::layout::RepositoryPath;
use crate::vcs::{CommitId, VcsBackend};

pub const DEFAULT_AUTHOR_NAME: &str = "confvault";
pub const DEFAULT_AUTHOR_EMAIL: &str = "nobody@nowhere.com";

/// Commit identity written into a freshly initialized repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreIdentity {
    pub name: String,
    pub email: String,
}

impl Default for StoreIdentity {
    fn default() -> Self {
        Self {
            name: DEFAULT_AUTHOR_NAME.to_string(),
            email: DEFAULT_AUTHOR_EMAIL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Open,
}

pub struct VersionedStore {
    root: PathBuf,
    backend: Box<dyn VcsBackend>,
    state: StoreState,
}

impl VersionedStore {
    /// Create a store handle for `root`. Nothing touches the disk until
    /// [`init`](Self::init), [`open`](Self::open), or [`prepare`](Self::prepare).
    pub fn new(root: impl Into<PathBuf>, backend: Box<dyn VcsBackend>) -> Result<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(StoreError::MissingRoot);
        }
        Ok(Self {
            root,
            backend,
            state: StoreState::Uninitialized,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn exists(&self) -> bool {
        self.backend.exists(&self.root)
    }

    /// Create the repository and record the commit identity.
    pub fn init(&mut self, identity: &StoreIdentity) -> Result<()> {
        if self.exists() {
            return Err(StoreError::AlreadyInitialized(self.root.clone()));
        }

        self.backend.init(&self.root)?;
        self.backend.config_set("user.name", &identity.name)?;
        self.backend.config_set("user.email", &identity.email)?;
        self.state = StoreState::Open;

        tracing::info!(
            root = %self.root.display(),
            author = %identity.name,
            "Initialized repository"
        );
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        if !self.exists() {
            return Err(StoreError::NotInitialized(self.root.clone()));
        }

        self.backend.open(&self.root)?;
        self.state = StoreState::Open;

        tracing::info!(root = %self.root.display(), "Opened repository");
        Ok(())
    }

    /// Open the repository if it exists, initialize it otherwise.
    pub fn prepare(&mut self, identity: &StoreIdentity) -> Result<()> {
        if self.exists() {
            self.open()
        } else {
            self.init(identity)
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            StoreState::Open => Ok(()),
            StoreState::Uninitialized => Err(StoreError::NotOpen),
        }
    }

    fn full_path(&self, path: &RepositoryPath, file: &str) -> PathBuf {
        self.root.join(path.file(file))
    }

    /// Read the last stored copy of a file. Missing files (or host
    /// directories) read as empty.
    pub fn read(&self, path: &RepositoryPath, file: &str) -> Result<Vec<String>> {
        self.ensure_open()?;

        let target = self.full_path(path, file);
        match fs::read_to_string(&target) {
            Ok(contents) => Ok(contents.lines().map(normalize_line).collect()),
            Err(e) if is_missing(&e, &target) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `lines` to a host file unless the stored copy is already equal
    /// line-for-line after normalization. Lines with embedded terminators
    /// are split first. Returns whether the file changed.
    pub fn write<S: AsRef<str>>(
        &mut self,
        path: &RepositoryPath,
        file: &str,
        lines: &[S],
    ) -> Result<bool> {
        self.ensure_open()?;

        let lines = normalize_lines(lines);
        if self.read(path, file)? == lines {
            tracing::debug!(path = %path, file, "No change");
            return Ok(false);
        }

        let target = self.full_path(path, file);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        write_lines(&target, &lines)?;

        tracing::debug!(
            path = %path,
            file,
            lines = lines.len(),
            "Saved"
        );
        Ok(true)
    }

    /// Write every file of a snapshot. Files the device returned empty are
    /// skipped so the last good copy survives. Returns the number of files
    /// that changed.
    pub fn save_snapshot(
        &mut self,
        hostname: &str,
        path: &RepositoryPath,
        snapshot: &ConfigSnapshot,
    ) -> Result<usize> {
        let mut changed = 0;

        for (file, lines) in snapshot.files() {
            let Some(lines) = lines else {
                tracing::warn!(host = %hostname, file, "Empty from device");
                continue;
            };
            if self.write(path, file, lines)? {
                changed += 1;
            }
        }

        Ok(changed)
    }

    /// Stage everything under the root.
    pub fn add_all(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.backend.add(".")
    }

    /// Commit staged changes. Returns `None` when nothing was staged.
    pub fn commit(&mut self, message: &str) -> Result<Option<CommitId>> {
        self.ensure_open()?;

        let id = self.backend.commit(message)?;
        match &id {
            Some(id) => tracing::info!(commit = %id, message, "Committed"),
            None => tracing::debug!("Nothing staged, no commit"),
        }
        Ok(id)
    }
}

/// A file counts as missing when it does not exist or when its directory is
/// not a directory (a host path shadowed by a regular file).
fn is_missing(e: &io::Error, target: &Path) -> bool {
    e.kind() == io::ErrorKind::NotFound || !target.parent().is_some_and(Path::is_dir)
}

/// Replace `target` with `lines`, each newline-terminated. Written to a
/// sibling temp file and renamed so a crash never leaves a half file.
fn write_lines(target: &Path, lines: &[String]) -> io::Result<()> {
    let mut tmp_name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = target.with_file_name(tmp_name);

    {
        let mut out = io::BufWriter::new(fs::File::create(&tmp)?);
        for line in lines {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }

    fs::rename(&tmp, target)
}
