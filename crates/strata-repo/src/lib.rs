//! Strata remote fetching
//!
//! This crate resolves remote entries of a unit's `resources` list:
//!
//! - **Git remotes**: `https://host/org/repo//dir?ref=v1`, `git@host:org/repo.git//dir`,
//!   `github.com/org/repo/dir?ref=v1`
//! - **HTTP files**: `https://host/path/manifest.yaml`
//!
//! ## Key Features
//!
//! - **Single-flight**: a reference requested by several units is fetched once
//! - **Content-addressed cache**: fetched content lives under its sha256 digest
//! - **Digest pins**: `?digest=sha256:...` is verified after every fetch
//! - **Timeouts**: every network fetch is bounded
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use strata_repo::{RemoteCache, RemoteRef};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RemoteCache::new(RemoteCache::default_dir(), Duration::from_secs(60))?;
//! let remote = RemoteRef::parse("github.com/org/repo/deploy/base?ref=v1.0.0")?;
//! let fetched = cache.fetch(&remote).await?;
//! println!("{} -> {:?}", fetched.digest, fetched.content);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Notes
//!
//! - Bearer tokens are never sent after a cross-origin redirect
//! - Git subdirectories may not escape the checkout, and symlinks are not hashed

pub mod cache;
pub mod error;
pub mod git;
pub mod http;
pub mod reference;

pub use cache::{FetchedRemote, RemoteCache, RemoteContent, tree_digest};
pub use error::{RepoError, Result};
pub use http::{HttpFetcher, compute_digest, digest_matches};
pub use reference::{RemoteRef, RemoteSource, is_remote, normalize_digest};
