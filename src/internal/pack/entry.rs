//! Lightweight representation of a decoded Git object coming out of a pack
//! stream, with its content hash attached.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::types::ObjectType;

/// Git object data from a pack file. Delta entries never surface here; the
/// decoder resolves them to their base type before constructing an `Entry`.
#[derive(Eq, Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    pub hash: ObjectHash,
}

impl Entry {
    /// Build an entry from raw object content, computing its hash over the
    /// Git `<type> <len>\0<content>` preimage.
    pub fn new(kind: HashKind, obj_type: ObjectType, data: Vec<u8>) -> Entry {
        let hash = ObjectHash::from_type_and_data(kind, obj_type, &data);
        Entry {
            obj_type,
            data,
            hash,
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.obj_type == other.obj_type && self.hash == other.hash
    }
}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj_type.hash(state);
        self.hash.hash(state);
    }
}
