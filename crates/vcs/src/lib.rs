//! Git plumbing for mixer: URL form conversion, repository operations and
//! the clone-or-pull repository cache.

mod cache;
mod repo;
mod url;

pub use cache::RepoCache;
pub use repo::{ChangeKind, FileChange, GitRepo};
pub use url::{is_git_url, is_http, is_ssh, to_http, to_ssh};

/// Default remote name.
pub const ORIGIN: &str = "origin";
