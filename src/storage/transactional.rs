//! Transactional storage: a read-through composition of a base store with a
//! temporary in-memory overlay and an explicit commit/rollback boundary.
//!
//! Reads consult the overlay first and honor per-component deletion sets, so
//! a reference removed inside the transaction is absent to readers even while
//! the base still holds it. Writes land in the overlay only. Not safe for
//! concurrent use across the base/overlay pair.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::config::RepositoryConfig;
use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::types::ObjectType;
use crate::reference::Reference;
use crate::storage::memory::MemoryStorage;
use crate::storage::{
    ConfigStore, EncodedObject, Index, IndexStore, ModuleStore, ObjectStore, ObjectTransaction,
    ReferenceStore, ShallowStore, Storage,
};

/// Base storer plus temporary overlay.
pub struct TransactionalStorage {
    base: Arc<dyn Storage>,
    temp: MemoryStorage,
    deleted_refs: Mutex<BTreeSet<String>>,
    index_written: Mutex<bool>,
    shallow_written: Mutex<bool>,
    config_written: Mutex<bool>,
}

impl TransactionalStorage {
    pub fn new(base: Arc<dyn Storage>) -> TransactionalStorage {
        let kind = base.hash_kind();
        TransactionalStorage {
            base,
            temp: MemoryStorage::new(kind),
            deleted_refs: Mutex::new(BTreeSet::new()),
            index_written: Mutex::new(false),
            shallow_written: Mutex::new(false),
            config_written: Mutex::new(false),
        }
    }

    /// Replay the overlay onto the base: objects, then reference deletions,
    /// then reference sets, then index, shallow and config.
    pub fn commit(self) -> Result<(), GitError> {
        for obj in self.temp.iter_encoded_objects(None)? {
            self.base.set_encoded_object(obj)?;
        }
        for name in self.deleted_refs.lock().expect("lock poisoned").iter() {
            self.base.remove_reference(name)?;
        }
        for reference in self.temp.iter_references()? {
            self.base.set_reference(&reference)?;
        }
        if *self.index_written.lock().expect("lock poisoned") {
            self.base.set_index(&self.temp.index()?)?;
        }
        if *self.shallow_written.lock().expect("lock poisoned") {
            self.base.set_shallow(&self.temp.shallow()?)?;
        }
        if *self.config_written.lock().expect("lock poisoned") {
            self.base.set_config(&self.temp.config()?)?;
        }
        Ok(())
    }

    /// Drop the overlay without touching the base.
    pub fn rollback(self) -> Result<(), GitError> {
        Ok(())
    }
}

impl ObjectStore for TransactionalStorage {
    fn hash_kind(&self) -> HashKind {
        self.temp.hash_kind()
    }

    fn set_object_format(&self, kind: HashKind) -> Result<(), GitError> {
        self.base.set_object_format(kind)?;
        self.temp.set_object_format(kind)
    }

    fn set_encoded_object(&self, obj: EncodedObject) -> Result<ObjectHash, GitError> {
        self.temp.set_encoded_object(obj)
    }

    fn has_encoded_object(&self, oid: &ObjectHash) -> Result<bool, GitError> {
        if self.temp.has_encoded_object(oid)? {
            return Ok(true);
        }
        self.base.has_encoded_object(oid)
    }

    fn encoded_object_size(&self, oid: &ObjectHash) -> Result<u64, GitError> {
        match self.temp.encoded_object_size(oid) {
            Ok(size) => Ok(size),
            Err(GitError::ObjectNotFound(_)) => self.base.encoded_object_size(oid),
            Err(e) => Err(e),
        }
    }

    fn encoded_object(
        &self,
        obj_type: Option<ObjectType>,
        oid: &ObjectHash,
    ) -> Result<EncodedObject, GitError> {
        match self.temp.encoded_object(obj_type, oid) {
            Ok(obj) => Ok(obj),
            Err(GitError::ObjectNotFound(_)) => self.base.encoded_object(obj_type, oid),
            Err(e) => Err(e),
        }
    }

    fn iter_encoded_objects(
        &self,
        obj_type: Option<ObjectType>,
    ) -> Result<Vec<EncodedObject>, GitError> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for obj in self.temp.iter_encoded_objects(obj_type)? {
            seen.insert(obj.hash());
            out.push(obj);
        }
        for obj in self.base.iter_encoded_objects(obj_type)? {
            if seen.insert(obj.hash()) {
                out.push(obj);
            }
        }
        Ok(out)
    }

    fn begin(&self) -> Result<Box<dyn ObjectTransaction + '_>, GitError> {
        self.temp.begin()
    }
}

impl ReferenceStore for TransactionalStorage {
    fn set_reference(&self, reference: &Reference) -> Result<(), GitError> {
        self.deleted_refs
            .lock()
            .expect("lock poisoned")
            .remove(reference.name());
        self.temp.set_reference(reference)
    }

    fn check_and_set_reference(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> Result<(), GitError> {
        if let Some(expected) = old {
            let current = self.reference(new.name())?;
            if &current != expected {
                return Err(GitError::ReferenceHasChanged);
            }
        }
        self.set_reference(new)
    }

    fn reference(&self, name: &str) -> Result<Reference, GitError> {
        if self
            .deleted_refs
            .lock()
            .expect("lock poisoned")
            .contains(name)
        {
            return Err(GitError::ReferenceNotFound(name.to_string()));
        }
        match self.temp.reference(name) {
            Ok(reference) => Ok(reference),
            Err(GitError::ReferenceNotFound(_)) => self.base.reference(name),
            Err(e) => Err(e),
        }
    }

    fn iter_references(&self) -> Result<Vec<Reference>, GitError> {
        let deleted = self.deleted_refs.lock().expect("lock poisoned").clone();
        let mut merged: std::collections::BTreeMap<String, Reference> =
            std::collections::BTreeMap::new();
        for reference in self.base.iter_references()? {
            merged.insert(reference.name().to_string(), reference);
        }
        for reference in self.temp.iter_references()? {
            merged.insert(reference.name().to_string(), reference);
        }
        for name in &deleted {
            merged.remove(name);
        }
        Ok(merged.into_values().collect())
    }

    fn remove_reference(&self, name: &str) -> Result<(), GitError> {
        self.deleted_refs
            .lock()
            .expect("lock poisoned")
            .insert(name.to_string());
        self.temp.remove_reference(name)
    }

    fn pack_refs(&self) -> Result<(), GitError> {
        Ok(())
    }
}

impl IndexStore for TransactionalStorage {
    fn set_index(&self, index: &Index) -> Result<(), GitError> {
        *self.index_written.lock().expect("lock poisoned") = true;
        self.temp.set_index(index)
    }

    fn index(&self) -> Result<Index, GitError> {
        if *self.index_written.lock().expect("lock poisoned") {
            self.temp.index()
        } else {
            self.base.index()
        }
    }
}

impl ShallowStore for TransactionalStorage {
    fn set_shallow(&self, oids: &[ObjectHash]) -> Result<(), GitError> {
        *self.shallow_written.lock().expect("lock poisoned") = true;
        self.temp.set_shallow(oids)
    }

    fn shallow(&self) -> Result<Vec<ObjectHash>, GitError> {
        if *self.shallow_written.lock().expect("lock poisoned") {
            self.temp.shallow()
        } else {
            self.base.shallow()
        }
    }
}

impl ConfigStore for TransactionalStorage {
    fn config(&self) -> Result<RepositoryConfig, GitError> {
        if *self.config_written.lock().expect("lock poisoned") {
            self.temp.config()
        } else {
            self.base.config()
        }
    }

    fn set_config(&self, config: &RepositoryConfig) -> Result<(), GitError> {
        *self.config_written.lock().expect("lock poisoned") = true;
        self.temp.set_config(config)
    }
}

impl ModuleStore for TransactionalStorage {
    fn module(&self, name: &str) -> Result<Arc<dyn Storage>, GitError> {
        self.base.module(name)
    }
}
