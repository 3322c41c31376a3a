//! Version-control backends.
//!
//! The store only needs a narrow slice of a VCS: detect, create, or open a
//! repository, set configuration values, stage paths, and commit. The
//! [`GitCli`] backend drives the `git` binary as a child process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;

use crate::error::{Result, StoreError};

/// Identifier of a created commit (the full object id for git).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported backend kinds, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    #[default]
    Git,
}

impl VcsKind {
    /// Construct a backend of this kind driving `program`.
    pub fn backend(&self, program: &str) -> Box<dyn VcsBackend> {
        match self {
            Self::Git => Box::new(GitCli::new(program)),
        }
    }
}

/// Trait for version-control backends behind a [`crate::VersionedStore`].
pub trait VcsBackend: Send {
    /// Whether a repository already exists at `root`.
    fn exists(&self, root: &Path) -> bool;

    /// Create an empty repository at `root` and bind to it.
    fn init(&mut self, root: &Path) -> Result<()>;

    /// Bind to the existing repository at `root`.
    fn open(&mut self, root: &Path) -> Result<()>;

    /// Set a repository-local configuration value.
    fn config_set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Stage a path (relative to the root) including deletions.
    fn add(&mut self, pathspec: &str) -> Result<()>;

    /// Commit everything staged. Returns `None` when nothing was staged.
    fn commit(&mut self, message: &str) -> Result<Option<CommitId>>;
}

/// Git backend that shells out to the `git` binary.
pub struct GitCli {
    program: String,
    root: Option<PathBuf>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            root: None,
        }
    }

    fn root(&self) -> Result<&Path> {
        self.root.as_deref().ok_or(StoreError::NotOpen)
    }

    fn output(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        tracing::trace!(program = %self.program, ?args, dir = %dir.display(), "Running git");

        Command::new(&self.program)
            .current_dir(dir)
            .args(args)
            .output()
            .map_err(|source| StoreError::BackendUnavailable {
                program: self.program.clone(),
                source,
            })
    }

    /// Run a git command and fail on a non-zero exit.
    fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.output(dir, args)?;
        if !output.status.success() {
            return Err(StoreError::BackendFailed {
                command: format!("{} {}", self.program, args.join(" ")),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl VcsBackend for GitCli {
    fn exists(&self, root: &Path) -> bool {
        root.join(".git").exists()
    }

    fn init(&mut self, root: &Path) -> Result<()> {
        std::fs::create_dir_all(root)?;
        self.run(root, &["init", "--quiet"])?;
        self.root = Some(root.to_path_buf());
        Ok(())
    }

    fn open(&mut self, root: &Path) -> Result<()> {
        self.run(root, &["rev-parse", "--git-dir"])?;
        self.root = Some(root.to_path_buf());
        Ok(())
    }

    fn config_set(&mut self, key: &str, value: &str) -> Result<()> {
        self.run(self.root()?, &["config", key, value])?;
        Ok(())
    }

    fn add(&mut self, pathspec: &str) -> Result<()> {
        self.run(self.root()?, &["add", "--all", "--", pathspec])?;
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<Option<CommitId>> {
        let root = self.root()?;

        // Exit 0: index matches HEAD (or the empty tree on an unborn branch).
        let staged = self.output(root, &["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            return Ok(None);
        }

        self.run(root, &["commit", "--quiet", "-m", message])?;
        let id = self.run(root, &["rev-parse", "HEAD"])?;
        Ok(Some(CommitId(id)))
    }
}
