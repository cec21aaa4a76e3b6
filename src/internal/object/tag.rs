//! Header-level view of an annotated tag object, used for peeled
//! advertisement entries and `include-tag`.

use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;

/// Parsed tag header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSummary {
    pub id: ObjectHash,
    pub target: ObjectHash,
    pub target_type: ObjectType,
    pub name: String,
}

impl TagSummary {
    /// Parse the header of a raw annotated tag object.
    pub fn parse(id: ObjectHash, data: &[u8]) -> Result<TagSummary, GitError> {
        let mut target: Option<ObjectHash> = None;
        let mut target_type: Option<ObjectType> = None;
        let mut name: Option<String> = None;

        for line in data.lines() {
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix(b"object ") {
                let s = rest
                    .to_str()
                    .map_err(|_| GitError::InvalidTag("non-utf8 object field".to_string()))?;
                target = Some(ObjectHash::from_str(s.trim_end())?);
            } else if let Some(rest) = line.strip_prefix(b"type ") {
                let s = rest
                    .to_str()
                    .map_err(|_| GitError::InvalidTag("non-utf8 type field".to_string()))?;
                target_type = Some(ObjectType::from_string(s.trim_end())?);
            } else if let Some(rest) = line.strip_prefix(b"tag ") {
                name = Some(String::from_utf8_lossy(rest).trim_end().to_string());
            }
        }

        Ok(TagSummary {
            id,
            target: target
                .ok_or_else(|| GitError::InvalidTag("missing object header".to_string()))?,
            target_type: target_type
                .ok_or_else(|| GitError::InvalidTag("missing type header".to_string()))?,
            name: name.ok_or_else(|| GitError::InvalidTag("missing tag header".to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::TagSummary;
    use crate::hash::{HashKind, ObjectHash};
    use crate::internal::object::types::ObjectType;

    /// Tag headers yield target, target type and tag name.
    #[test]
    fn parse_annotated_tag() {
        let data = b"object 6ecf0ef2c2dffb796033e5a02219af86ec6584e5\n\
type commit\n\
tag v1.0.0\n\
tagger a <a@b> 1700000000 +0000\n\
\n\
release\n";
        let tag = TagSummary::parse(ObjectHash::zero(HashKind::Sha1), data).unwrap();
        assert_eq!(
            tag.target,
            ObjectHash::from_str("6ecf0ef2c2dffb796033e5a02219af86ec6584e5").unwrap()
        );
        assert_eq!(tag.target_type, ObjectType::Commit);
        assert_eq!(tag.name, "v1.0.0");
    }

    /// A tag without an object header is malformed.
    #[test]
    fn missing_object_is_error() {
        let data = b"type commit\ntag v1\n\nmsg\n";
        assert!(TagSummary::parse(ObjectHash::zero(HashKind::Sha1), data).is_err());
    }
}
