//! Entry-level view of a tree object, enough to extend the object closure
//! during pack generation.

use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};

/// One `<mode> <name>\0<raw-hash>` record of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    pub name: String,
    pub oid: ObjectHash,
}

impl TreeEntry {
    /// True when the entry points at a nested tree.
    pub fn is_tree(&self) -> bool {
        self.mode == 0o40000
    }

    /// Submodule entries (gitlinks) reference commits in another repository
    /// and must not be followed by the closure walk.
    pub fn is_gitlink(&self) -> bool {
        self.mode == 0o160000
    }
}

/// Parsed tree entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSummary {
    pub id: ObjectHash,
    pub entries: Vec<TreeEntry>,
}

impl TreeSummary {
    /// Parse raw tree content. Entry hashes are raw bytes sized by the
    /// repository's hash kind, so the caller must supply it.
    pub fn parse(id: ObjectHash, kind: HashKind, data: &[u8]) -> Result<TreeSummary, GitError> {
        let mut entries = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let space = memchr::memchr(b' ', rest)
                .ok_or_else(|| GitError::InvalidTree("missing mode separator".to_string()))?;
            let mode = std::str::from_utf8(&rest[..space])
                .ok()
                .and_then(|s| u32::from_str_radix(s, 8).ok())
                .ok_or_else(|| GitError::InvalidTree("bad entry mode".to_string()))?;
            rest = &rest[space + 1..];

            let nul = memchr::memchr(0, rest)
                .ok_or_else(|| GitError::InvalidTree("missing name terminator".to_string()))?;
            let name = String::from_utf8_lossy(&rest[..nul]).into_owned();
            rest = &rest[nul + 1..];

            if rest.len() < kind.size() {
                return Err(GitError::InvalidTree(format!(
                    "truncated hash for entry `{name}`"
                )));
            }
            let oid = ObjectHash::from_bytes(kind, &rest[..kind.size()])?;
            rest = &rest[kind.size()..];

            entries.push(TreeEntry { mode, name, oid });
        }
        Ok(TreeSummary { id, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::TreeSummary;
    use crate::hash::{HashKind, ObjectHash};

    fn raw_tree() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"100644 hello.txt\0");
        data.extend_from_slice(&[0x11; 20]);
        data.extend_from_slice(b"40000 sub\0");
        data.extend_from_slice(&[0x22; 20]);
        data.extend_from_slice(b"160000 vendored\0");
        data.extend_from_slice(&[0x33; 20]);
        data
    }

    /// Entries parse in order with mode, name and raw hash.
    #[test]
    fn parse_entries() {
        let tree =
            TreeSummary::parse(ObjectHash::zero(HashKind::Sha1), HashKind::Sha1, &raw_tree())
                .unwrap();
        assert_eq!(tree.entries.len(), 3);
        assert_eq!(tree.entries[0].name, "hello.txt");
        assert_eq!(tree.entries[0].mode, 0o100644);
        assert!(!tree.entries[0].is_tree());
        assert!(tree.entries[1].is_tree());
        assert!(tree.entries[2].is_gitlink());
        assert_eq!(tree.entries[1].oid.as_ref(), &[0x22; 20]);
    }

    /// A truncated hash is rejected, not silently dropped.
    #[test]
    fn truncated_hash_is_error() {
        let mut data = raw_tree();
        data.truncate(data.len() - 1);
        assert!(
            TreeSummary::parse(ObjectHash::zero(HashKind::Sha1), HashKind::Sha1, &data).is_err()
        );
    }
}
