//! In-memory storage, the backend of choice for tests and for the temporary
//! half of the transactional composition. All mutations are serialized
//! through concurrent maps and locks; alternates and loose-object staleness
//! queries are not supported.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use dashmap::DashMap;

use crate::config::RepositoryConfig;
use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::types::ObjectType;
use crate::reference::Reference;
use crate::storage::{
    ConfigStore, EncodedObject, Index, IndexStore, ModuleStore, ObjectStore, ObjectTransaction,
    ReferenceStore, ShallowStore, Storage,
};

/// Associative-container storage keyed by object id and reference name.
pub struct MemoryStorage {
    kind: RwLock<HashKind>,
    objects: DashMap<ObjectHash, EncodedObject>,
    refs: DashMap<String, Reference>,
    shallow: RwLock<Vec<ObjectHash>>,
    index: RwLock<Option<Index>>,
    config: RwLock<RepositoryConfig>,
    modules: DashMap<String, Arc<MemoryStorage>>,
}

impl MemoryStorage {
    pub fn new(kind: HashKind) -> MemoryStorage {
        MemoryStorage {
            kind: RwLock::new(kind),
            objects: DashMap::new(),
            refs: DashMap::new(),
            shallow: RwLock::new(Vec::new()),
            index: RwLock::new(None),
            config: RwLock::new(RepositoryConfig::with_object_format(kind)),
            modules: DashMap::new(),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        MemoryStorage::new(HashKind::Sha1)
    }
}

impl ObjectStore for MemoryStorage {
    fn hash_kind(&self) -> HashKind {
        *self.kind.read().expect("kind lock poisoned")
    }

    fn set_object_format(&self, kind: HashKind) -> Result<(), GitError> {
        let mut current = self.kind.write().expect("kind lock poisoned");
        if *current == kind {
            return Ok(());
        }
        if !self.objects.is_empty() {
            return Err(GitError::ObjectFormatFixed);
        }
        *current = kind;
        let mut config = self.config.write().expect("config lock poisoned");
        *config = RepositoryConfig::with_object_format(kind);
        Ok(())
    }

    fn set_encoded_object(&self, obj: EncodedObject) -> Result<ObjectHash, GitError> {
        let hash = obj.hash();
        self.objects.insert(hash, obj);
        Ok(hash)
    }

    fn has_encoded_object(&self, oid: &ObjectHash) -> Result<bool, GitError> {
        Ok(self.objects.contains_key(oid))
    }

    fn encoded_object_size(&self, oid: &ObjectHash) -> Result<u64, GitError> {
        self.objects
            .get(oid)
            .map(|obj| obj.value().size())
            .ok_or_else(|| GitError::ObjectNotFound(oid.to_string()))
    }

    fn encoded_object(
        &self,
        obj_type: Option<ObjectType>,
        oid: &ObjectHash,
    ) -> Result<EncodedObject, GitError> {
        let obj = self
            .objects
            .get(oid)
            .ok_or_else(|| GitError::ObjectNotFound(oid.to_string()))?;
        if let Some(wanted) = obj_type {
            if obj.value().obj_type() != wanted {
                return Err(GitError::ObjectNotFound(format!(
                    "{oid} is a {}, not a {wanted}",
                    obj.value().obj_type()
                )));
            }
        }
        Ok(obj.value().clone())
    }

    fn iter_encoded_objects(
        &self,
        obj_type: Option<ObjectType>,
    ) -> Result<Vec<EncodedObject>, GitError> {
        Ok(self
            .objects
            .iter()
            .filter(|entry| obj_type.is_none_or(|t| entry.value().obj_type() == t))
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn begin(&self) -> Result<Box<dyn ObjectTransaction + '_>, GitError> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            staged: Vec::new(),
        }))
    }
}

/// Staged object writes against a [`MemoryStorage`].
struct MemoryTransaction<'a> {
    store: &'a MemoryStorage,
    staged: Vec<EncodedObject>,
}

impl ObjectTransaction for MemoryTransaction<'_> {
    fn set_encoded_object(&mut self, obj: EncodedObject) -> Result<ObjectHash, GitError> {
        let hash = obj.hash();
        self.staged.push(obj);
        Ok(hash)
    }

    fn commit(self: Box<Self>) -> Result<(), GitError> {
        for obj in self.staged {
            self.store.set_encoded_object(obj)?;
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), GitError> {
        Ok(())
    }
}

impl ReferenceStore for MemoryStorage {
    fn set_reference(&self, reference: &Reference) -> Result<(), GitError> {
        self.refs
            .insert(reference.name().to_string(), reference.clone());
        Ok(())
    }

    fn check_and_set_reference(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> Result<(), GitError> {
        match old {
            // Without an expectation this degenerates to a plain set.
            None => self.set_reference(new),
            Some(expected) => {
                let entry = self.refs.entry(new.name().to_string());
                match entry {
                    dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                        if occupied.get() != expected {
                            return Err(GitError::ReferenceHasChanged);
                        }
                        occupied.insert(new.clone());
                        Ok(())
                    }
                    dashmap::mapref::entry::Entry::Vacant(_) => {
                        Err(GitError::ReferenceHasChanged)
                    }
                }
            }
        }
    }

    fn reference(&self, name: &str) -> Result<Reference, GitError> {
        self.refs
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| GitError::ReferenceNotFound(name.to_string()))
    }

    fn iter_references(&self) -> Result<Vec<Reference>, GitError> {
        let mut refs: Vec<Reference> = self.refs.iter().map(|r| r.value().clone()).collect();
        refs.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(refs)
    }

    fn remove_reference(&self, name: &str) -> Result<(), GitError> {
        self.refs.remove(name);
        Ok(())
    }

    fn pack_refs(&self) -> Result<(), GitError> {
        // Everything already lives in one map.
        Ok(())
    }
}

impl IndexStore for MemoryStorage {
    fn set_index(&self, index: &Index) -> Result<(), GitError> {
        let mut stored = index.clone();
        // Stamp the write time to emulate racy-index detection.
        stored.mod_time = Utc::now();
        *self.index.write().expect("index lock poisoned") = Some(stored);
        Ok(())
    }

    fn index(&self) -> Result<Index, GitError> {
        Ok(self
            .index
            .read()
            .expect("index lock poisoned")
            .clone()
            .unwrap_or_default())
    }
}

impl ShallowStore for MemoryStorage {
    fn set_shallow(&self, oids: &[ObjectHash]) -> Result<(), GitError> {
        *self.shallow.write().expect("shallow lock poisoned") = oids.to_vec();
        Ok(())
    }

    fn shallow(&self) -> Result<Vec<ObjectHash>, GitError> {
        Ok(self.shallow.read().expect("shallow lock poisoned").clone())
    }
}

impl ConfigStore for MemoryStorage {
    fn config(&self) -> Result<RepositoryConfig, GitError> {
        Ok(self.config.read().expect("config lock poisoned").clone())
    }

    fn set_config(&self, config: &RepositoryConfig) -> Result<(), GitError> {
        *self.config.write().expect("config lock poisoned") = config.clone();
        Ok(())
    }
}

impl ModuleStore for MemoryStorage {
    fn module(&self, name: &str) -> Result<Arc<dyn Storage>, GitError> {
        let module = self
            .modules
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStorage::new(self.hash_kind())))
            .value()
            .clone();
        Ok(module)
    }
}
