//! Reference model: named pointers into the object store.
//!
//! A reference is either a hash reference holding one object id, or a
//! symbolic reference holding another reference's name. Names are
//! slash-separated paths in the `refs/` namespace plus a handful of
//! distinguished top-level names.

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::storage::ReferenceStore;

/// Distinguished reference names outside the `refs/` namespace.
pub const HEAD: &str = "HEAD";
pub const FETCH_HEAD: &str = "FETCH_HEAD";
pub const ORIG_HEAD: &str = "ORIG_HEAD";
pub const MERGE_HEAD: &str = "MERGE_HEAD";

/// A named pointer: either directly at an object, or at another reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Hash { name: String, oid: ObjectHash },
    Symbolic { name: String, target: String },
}

impl Reference {
    pub fn hash(name: impl Into<String>, oid: ObjectHash) -> Reference {
        Reference::Hash {
            name: name.into(),
            oid,
        }
    }

    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Reference {
        Reference::Symbolic {
            name: name.into(),
            target: target.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Reference::Hash { name, .. } => name,
            Reference::Symbolic { name, .. } => name,
        }
    }

    /// The object id, for hash references.
    pub fn oid(&self) -> Option<ObjectHash> {
        match self {
            Reference::Hash { oid, .. } => Some(*oid),
            Reference::Symbolic { .. } => None,
        }
    }

    /// The target name, for symbolic references.
    pub fn target(&self) -> Option<&str> {
        match self {
            Reference::Symbolic { target, .. } => Some(target),
            Reference::Hash { .. } => None,
        }
    }
}

/// Follow symbolic reference chains until a hash reference is reached.
///
/// Symbolic references form a directed graph that may contain cycles (for
/// example `HEAD -> HEAD`); a visited set turns those into
/// [`GitError::SymrefCycle`] instead of an unbounded walk.
pub fn resolve(store: &dyn ReferenceStore, name: &str) -> Result<Reference, GitError> {
    let mut visited = std::collections::HashSet::new();
    let mut current = name.to_string();
    loop {
        if !visited.insert(current.clone()) {
            return Err(GitError::SymrefCycle(current));
        }
        match store.reference(&current)? {
            Reference::Hash { name, oid } => return Ok(Reference::Hash { name, oid }),
            Reference::Symbolic { target, .. } => current = target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, ObjectHash};
    use crate::storage::memory::MemoryStorage;
    use crate::storage::ReferenceStore;

    /// Chains resolve through intermediate symbolic references.
    #[test]
    fn resolve_chain() {
        let storage = MemoryStorage::new(HashKind::Sha1);
        let oid = ObjectHash::compute(HashKind::Sha1, b"tip");
        storage
            .set_reference(&Reference::hash("refs/heads/main", oid))
            .unwrap();
        storage
            .set_reference(&Reference::symbolic(HEAD, "refs/heads/main"))
            .unwrap();

        let resolved = resolve(&storage, HEAD).unwrap();
        assert_eq!(resolved.oid(), Some(oid));
        assert_eq!(resolved.name(), "refs/heads/main");
    }

    /// A self-referential symref fails with a cycle error.
    #[test]
    fn resolve_detects_cycle() {
        let storage = MemoryStorage::new(HashKind::Sha1);
        storage
            .set_reference(&Reference::symbolic(HEAD, HEAD))
            .unwrap();
        assert!(matches!(
            resolve(&storage, HEAD),
            Err(GitError::SymrefCycle(_))
        ));
    }

    /// A two-step cycle is also caught.
    #[test]
    fn resolve_detects_long_cycle() {
        let storage = MemoryStorage::new(HashKind::Sha1);
        storage
            .set_reference(&Reference::symbolic("refs/a", "refs/b"))
            .unwrap();
        storage
            .set_reference(&Reference::symbolic("refs/b", "refs/a"))
            .unwrap();
        assert!(matches!(
            resolve(&storage, "refs/a"),
            Err(GitError::SymrefCycle(_))
        ));
    }

    /// Missing references surface the not-found sentinel.
    #[test]
    fn resolve_missing() {
        let storage = MemoryStorage::new(HashKind::Sha1);
        assert!(matches!(
            resolve(&storage, HEAD),
            Err(GitError::ReferenceNotFound(_))
        ));
    }
}
