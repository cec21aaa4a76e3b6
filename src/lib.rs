//! git-wire is a pure-library implementation of Git's client/server wire
//! protocol: pkt-line framing, capability negotiation, the reference
//! advertisement, fetch negotiation with shallow support, push with
//! per-reference status, sideband multiplexing, and the transports that
//! carry it all (local child process, SSH, anonymous git wire, smart HTTP).
//!
//! Storage is pluggable behind the [`storage::Storage`] trait, with an
//! in-memory store, a filesystem `.git` store, and a transactional
//! composition of a base store with a temporary overlay.
//!
//! A fetch, end to end:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use git_wire::protocol::Service;
//! use git_wire::protocol::request::FetchRequest;
//! use git_wire::storage::MemoryStorage;
//! use git_wire::transport::{self, CancelFlag, Endpoint};
//!
//! # fn main() -> Result<(), git_wire::errors::GitError> {
//! let storage = Arc::new(MemoryStorage::default());
//! let endpoint = Endpoint::new("https://example.com/org/repo.git")?;
//! let mut session = transport::open_session(storage, &endpoint, None)?;
//! let mut conn = session.handshake(Service::UploadPack, &[], CancelFlag::new())?;
//!
//! let mut request = FetchRequest::default();
//! for reference in conn.remote_refs(false) {
//!     if let Some(oid) = reference.oid() {
//!         request.wants.insert(oid);
//!     }
//! }
//! match conn.fetch(&request, None) {
//!     Ok(()) => {}
//!     Err(e) if e.is_no_change() => {}
//!     Err(e) => return Err(e),
//! }
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod hash;
pub mod internal;
pub mod protocol;
pub mod reference;
pub mod storage;
pub mod transport;
