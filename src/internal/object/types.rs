//! Object type enumeration shared by the pack codec and the storage layer.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// In Git, each object type is assigned a unique integer value, which is used
/// to identify the type of the object in pack entries.
///
/// * `Commit` (1): records an author, committer, message and parent commits.
/// * `Tree` (2): represents a directory.
/// * `Blob` (3): stores the content of a file.
/// * `Tag` (4): an annotated tag pointing at another object.
/// * `OffsetDelta` (6): a delta whose base is located by a backwards offset
///   within the same pack.
/// * `HashDelta` (7): a delta whose base is named by its object hash.
///
/// The delta variants only exist inside pack streams; once a pack is indexed
/// every stored object has one of the four base types.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
    OffsetDelta = 6,
    HashDelta,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "OffsetDelta"),
            ObjectType::HashDelta => write!(f, "HashDelta"),
        }
    }
}

impl ObjectType {
    /// ASCII representation used in loose-object headers and hash preimages.
    /// Delta types never appear there.
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            ObjectType::Commit => COMMIT_OBJECT_TYPE,
            ObjectType::Tree => TREE_OBJECT_TYPE,
            ObjectType::Blob => BLOB_OBJECT_TYPE,
            ObjectType::Tag => TAG_OBJECT_TYPE,
            _ => unreachable!("delta types have no canonical name"),
        }
    }

    /// Parse a string representation of a Git object type.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(GitError::InvalidObjectType(s.to_string())),
        }
    }

    /// Convert object type to its 3-bit pack header type id.
    pub fn to_pack_type_u8(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
            ObjectType::OffsetDelta => 6,
            ObjectType::HashDelta => 7,
        }
    }

    /// Decode a 3-bit pack header type id.
    pub fn from_pack_type_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::HashDelta),
            _ => Err(GitError::InvalidObjectType(format!(
                "pack object type number {number}"
            ))),
        }
    }

    /// True for the four addressable object types; false for deltas.
    pub fn is_base(&self) -> bool {
        !matches!(self, ObjectType::OffsetDelta | ObjectType::HashDelta)
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectType;

    /// Base types round-trip through the 3-bit pack encoding.
    #[test]
    fn pack_type_round_trip() {
        for ty in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
            ObjectType::OffsetDelta,
            ObjectType::HashDelta,
        ] {
            assert_eq!(ObjectType::from_pack_type_u8(ty.to_pack_type_u8()).unwrap(), ty);
        }
        assert!(ObjectType::from_pack_type_u8(5).is_err());
        assert!(ObjectType::from_pack_type_u8(0).is_err());
    }

    /// Name parsing covers the four base types only.
    #[test]
    fn from_string_rejects_unknown() {
        assert_eq!(ObjectType::from_string("commit").unwrap(), ObjectType::Commit);
        assert_eq!(ObjectType::from_string("tag").unwrap(), ObjectType::Tag);
        assert!(ObjectType::from_string("snapshot").is_err());
    }

    /// Delta types are not base types.
    #[test]
    fn delta_is_not_base() {
        assert!(ObjectType::Blob.is_base());
        assert!(!ObjectType::OffsetDelta.is_base());
        assert!(!ObjectType::HashDelta.is_base());
    }
}
