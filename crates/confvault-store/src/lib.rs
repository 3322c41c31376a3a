//! confvault-store: Versioned storage for device configurations.
//!
//! Each host's configuration files live under a directory derived from its
//! hostname (see [`layout::PathMapper`]). Files are only rewritten when their
//! content changed, and all changes of a run are committed to the backing
//! version-control system in a single commit.

pub mod error;
pub mod layout;
pub mod store;
pub mod vcs;

pub use error::StoreError;
pub use layout::{PathMapper, RepositoryPath};
pub use store::{StoreIdentity, StoreState, VersionedStore};
pub use vcs::{CommitId, GitCli, VcsBackend, VcsKind};
