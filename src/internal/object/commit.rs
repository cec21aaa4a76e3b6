//! Header-level view of a commit object.
//!
//! The negotiation pipelines never need the full commit model; they need the
//! tree the commit points at, the parent chain to walk history, and the
//! committer timestamp to answer `deepen-since`. Everything else (message,
//! signatures) stays opaque in the raw bytes.

use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::GitError;
use crate::hash::ObjectHash;

/// Parsed commit header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_ids: Vec<ObjectHash>,
    /// Committer timestamp, seconds since the Unix epoch.
    pub committer_time: i64,
}

impl CommitSummary {
    /// Parse the header of a raw commit object (content without the
    /// `commit <len>\0` envelope). Header lines run until the first blank
    /// line; continuation lines (leading space, e.g. inside `gpgsig`) are
    /// skipped.
    pub fn parse(id: ObjectHash, data: &[u8]) -> Result<CommitSummary, GitError> {
        let mut tree_id: Option<ObjectHash> = None;
        let mut parent_ids = Vec::new();
        let mut committer_time: Option<i64> = None;

        for line in data.lines() {
            if line.is_empty() {
                break; // header ends, message follows
            }
            if line.starts_with(b" ") {
                continue;
            }
            if let Some(rest) = line.strip_prefix(b"tree ") {
                tree_id = Some(parse_hash(rest)?);
            } else if let Some(rest) = line.strip_prefix(b"parent ") {
                parent_ids.push(parse_hash(rest)?);
            } else if let Some(rest) = line.strip_prefix(b"committer ") {
                committer_time = Some(parse_signature_time(rest)?);
            }
        }

        Ok(CommitSummary {
            id,
            tree_id: tree_id
                .ok_or_else(|| GitError::InvalidCommit("missing tree header".to_string()))?,
            parent_ids,
            committer_time: committer_time
                .ok_or_else(|| GitError::InvalidCommit("missing committer header".to_string()))?,
        })
    }
}

fn parse_hash(hex: &[u8]) -> Result<ObjectHash, GitError> {
    let s = hex
        .to_str()
        .map_err(|_| GitError::InvalidCommit("non-utf8 hash field".to_string()))?;
    ObjectHash::from_str(s.trim_end())
}

/// A signature line reads `Name <email> <epoch-secs> <zone>`; the timestamp
/// is the second-to-last whitespace-separated token.
fn parse_signature_time(line: &[u8]) -> Result<i64, GitError> {
    let s = line
        .to_str()
        .map_err(|_| GitError::InvalidCommit("non-utf8 committer line".to_string()))?;
    let mut fields = s.split_whitespace().rev();
    let _zone = fields.next();
    let epoch = fields
        .next()
        .ok_or_else(|| GitError::InvalidCommit("truncated committer line".to_string()))?;
    epoch
        .parse::<i64>()
        .map_err(|_| GitError::InvalidCommit(format!("bad committer timestamp `{epoch}`")))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::CommitSummary;
    use crate::hash::{HashKind, ObjectHash};

    fn raw_commit() -> &'static [u8] {
        b"tree 341e54913a3a43069f2927cc0f703e5a9f730df1\n\
parent e8d3ffab552895c19b9fcf7aa264d277cde33881\n\
parent 918c48b83bd081e863dbe1b80f8998f058cd8294\n\
author benjamin.747 <benjamin.747@outlook.com> 1757467768 +0800\n\
committer benjamin.747 <benjamin.747@outlook.com> 1757491219 +0800\n\
\n\
merge upstream\n"
    }

    /// Header parsing extracts tree, both parents, and the committer epoch.
    #[test]
    fn parse_merge_commit() {
        let id = ObjectHash::zero(HashKind::Sha1);
        let commit = CommitSummary::parse(id, raw_commit()).unwrap();
        assert_eq!(
            commit.tree_id,
            ObjectHash::from_str("341e54913a3a43069f2927cc0f703e5a9f730df1").unwrap()
        );
        assert_eq!(commit.parent_ids.len(), 2);
        assert_eq!(commit.committer_time, 1757491219);
    }

    /// `parent`-looking lines inside the message must not be picked up.
    #[test]
    fn header_ends_at_blank_line() {
        let data = b"tree 341e54913a3a43069f2927cc0f703e5a9f730df1\n\
committer a <a@b> 1700000000 +0000\n\
\n\
parent 918c48b83bd081e863dbe1b80f8998f058cd8294 is not an ancestor\n";
        let commit = CommitSummary::parse(ObjectHash::zero(HashKind::Sha1), data).unwrap();
        assert!(commit.parent_ids.is_empty());
    }

    /// Signature continuation lines are skipped, not parsed as headers.
    #[test]
    fn gpgsig_continuation_is_ignored() {
        let data = b"tree 341e54913a3a43069f2927cc0f703e5a9f730df1\n\
committer a <a@b> 1700000000 +0000\n\
gpgsig -----BEGIN PGP SIGNATURE-----\n\
 tree 0000000000000000000000000000000000000000\n\
 -----END PGP SIGNATURE-----\n\
\n\
signed\n";
        let commit = CommitSummary::parse(ObjectHash::zero(HashKind::Sha1), data).unwrap();
        assert_eq!(
            commit.tree_id,
            ObjectHash::from_str("341e54913a3a43069f2927cc0f703e5a9f730df1").unwrap()
        );
    }

    /// A commit without a committer header is malformed.
    #[test]
    fn missing_committer_is_error() {
        let data = b"tree 341e54913a3a43069f2927cc0f703e5a9f730df1\n\nmsg\n";
        assert!(CommitSummary::parse(ObjectHash::zero(HashKind::Sha1), data).is_err());
    }
}
