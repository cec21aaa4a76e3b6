//! Storage abstraction: six orthogonal collections (objects, references, the
//! index, the shallow set, the config document, nested submodule storage)
//! behind one [`Storage`] supertrait, with in-memory, filesystem `.git` and
//! transactional implementations.

pub mod dotgit;
pub mod memory;
pub mod transactional;

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::config::RepositoryConfig;
use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::types::ObjectType;
use crate::reference::Reference;

pub use dotgit::DotGitStorage;
pub use memory::MemoryStorage;
pub use transactional::TransactionalStorage;

/// An object as storage sees it: declared type, raw content, derived hash.
///
/// Content hashes to its id by construction, so storing an object by id is
/// naturally idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedObject {
    obj_type: ObjectType,
    data: Bytes,
    hash: ObjectHash,
}

impl EncodedObject {
    pub fn new(kind: HashKind, obj_type: ObjectType, data: Bytes) -> EncodedObject {
        let hash = ObjectHash::from_type_and_data(kind, obj_type, &data);
        EncodedObject {
            obj_type,
            data,
            hash,
        }
    }

    pub fn obj_type(&self) -> ObjectType {
        self.obj_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash(&self) -> ObjectHash {
        self.hash
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Object-level transaction: staged writes apply on commit, vanish on
/// rollback.
pub trait ObjectTransaction {
    fn set_encoded_object(&mut self, obj: EncodedObject) -> Result<ObjectHash, GitError>;
    fn commit(self: Box<Self>) -> Result<(), GitError>;
    fn rollback(self: Box<Self>) -> Result<(), GitError>;
}

/// Content-addressed object storage.
pub trait ObjectStore: Send + Sync {
    /// The hash algorithm every stored id uses.
    fn hash_kind(&self) -> HashKind;

    /// Switch the object format. Only permitted while the store holds zero
    /// objects; afterwards the format is fixed.
    fn set_object_format(&self, kind: HashKind) -> Result<(), GitError>;

    /// Allocate an in-progress object bound to this store's hash kind.
    fn new_encoded_object(&self, obj_type: ObjectType, data: Vec<u8>) -> EncodedObject {
        EncodedObject::new(self.hash_kind(), obj_type, data.into())
    }

    /// Idempotent store; returns the computed id.
    fn set_encoded_object(&self, obj: EncodedObject) -> Result<ObjectHash, GitError>;

    fn has_encoded_object(&self, oid: &ObjectHash) -> Result<bool, GitError>;

    fn encoded_object_size(&self, oid: &ObjectHash) -> Result<u64, GitError>;

    /// Look up by id. `obj_type` of `None` means any type; a mismatch between
    /// the requested and the stored type reports [`GitError::ObjectNotFound`].
    fn encoded_object(
        &self,
        obj_type: Option<ObjectType>,
        oid: &ObjectHash,
    ) -> Result<EncodedObject, GitError>;

    /// Enumerate objects of a type (or every object). Order is unspecified
    /// but stable within one call.
    fn iter_encoded_objects(
        &self,
        obj_type: Option<ObjectType>,
    ) -> Result<Vec<EncodedObject>, GitError>;

    /// Open an object-level transaction.
    fn begin(&self) -> Result<Box<dyn ObjectTransaction + '_>, GitError>;

    /// Modification time of a loose object, for staleness queries. Backends
    /// without loose objects report [`GitError::PackedObjectsNotSupported`].
    fn loose_object_time(&self, _oid: &ObjectHash) -> Result<DateTime<Utc>, GitError> {
        Err(GitError::PackedObjectsNotSupported)
    }
}

/// Named reference storage.
pub trait ReferenceStore: Send + Sync {
    /// Unconditional upsert.
    fn set_reference(&self, reference: &Reference) -> Result<(), GitError>;

    /// Compare-and-swap: apply `new` only if the currently stored reference
    /// equals `old` (`None` meaning "must not exist"), otherwise report
    /// [`GitError::ReferenceHasChanged`].
    fn check_and_set_reference(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> Result<(), GitError>;

    fn reference(&self, name: &str) -> Result<Reference, GitError>;

    /// Snapshot of all references.
    fn iter_references(&self) -> Result<Vec<Reference>, GitError>;

    /// Idempotent removal.
    fn remove_reference(&self, name: &str) -> Result<(), GitError>;

    /// Invite the store to coalesce loose references into a packed form.
    /// May be a no-op.
    fn pack_refs(&self) -> Result<(), GitError>;
}

/// One record of the flat index document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub oid: ObjectHash,
    pub mode: u32,
    pub size: u32,
    pub mtime_secs: u32,
}

/// The single index document of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub version: u32,
    pub entries: Vec<IndexEntry>,
    /// When the index was last written, for racy-index detection.
    pub mod_time: DateTime<Utc>,
}

impl Default for Index {
    fn default() -> Self {
        Index {
            version: 2,
            entries: Vec::new(),
            mod_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Index document storage.
pub trait IndexStore: Send + Sync {
    fn set_index(&self, index: &Index) -> Result<(), GitError>;
    fn index(&self) -> Result<Index, GitError>;
}

/// Shallow-root storage: the commits whose parents are deliberately absent.
pub trait ShallowStore: Send + Sync {
    /// Replace the shallow set.
    fn set_shallow(&self, oids: &[ObjectHash]) -> Result<(), GitError>;
    fn shallow(&self) -> Result<Vec<ObjectHash>, GitError>;
}

/// Config document storage.
pub trait ConfigStore: Send + Sync {
    fn config(&self) -> Result<RepositoryConfig, GitError>;
    fn set_config(&self, config: &RepositoryConfig) -> Result<(), GitError>;
}

/// Nested storage for submodules, keyed by module name.
pub trait ModuleStore: Send + Sync {
    fn module(&self, name: &str) -> Result<Arc<dyn Storage>, GitError>;
}

/// The umbrella trait the pipelines program against.
pub trait Storage:
    ObjectStore + ReferenceStore + IndexStore + ShallowStore + ConfigStore + ModuleStore
{
}

impl<T> Storage for T where
    T: ObjectStore + ReferenceStore + IndexStore + ShallowStore + ConfigStore + ModuleStore
{
}
