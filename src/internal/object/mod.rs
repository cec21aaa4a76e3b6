//! Typed views over raw Git object bytes.
//!
//! The wire-protocol pipelines only need narrow slices of the object model:
//! commit headers drive the depth walk and the closure computation, tree
//! entries extend the closure, and tag headers provide peeled advertisement
//! lines and `include-tag` support. These are summaries over the raw bytes
//! held by storage, not a general-purpose object library.

pub mod commit;
pub mod tag;
pub mod tree;
pub mod types;

pub use commit::CommitSummary;
pub use tag::TagSummary;
pub use tree::{TreeEntry, TreeSummary};
pub use types::ObjectType;
