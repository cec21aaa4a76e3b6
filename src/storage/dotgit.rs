//! Filesystem storage over a standard `.git` directory: loose objects under
//! `objects/`, loose references plus `packed-refs`, `HEAD`, `config`,
//! `shallow`, a binary `index`, and nested module storage under `modules/`.
//!
//! Worktree layouts are honored: a `.git` *file* holding a `gitdir:` pointer
//! is followed, and a `commondir` file splits the per-worktree directory
//! (HEAD, index) from the shared one (objects, refs, config).

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::config::RepositoryConfig;
use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::types::ObjectType;
use crate::reference::{HEAD, Reference};
use crate::storage::{
    ConfigStore, EncodedObject, Index, IndexEntry, IndexStore, ModuleStore, ObjectStore,
    ObjectTransaction, ReferenceStore, ShallowStore, Storage,
};

const INDEX_MAGIC: &[u8; 4] = b"DIRC";

/// Storage rooted at a `.git` directory.
pub struct DotGitStorage {
    /// The per-worktree git directory (HEAD, index).
    dir: PathBuf,
    /// The shared directory (objects, refs, config, shallow, modules).
    /// Identical to `dir` outside linked worktrees.
    common: PathBuf,
    kind: RwLock<HashKind>,
    modules: DashMap<String, Arc<DotGitStorage>>,
}

impl DotGitStorage {
    /// Open an existing repository. `path` may be a worktree root (its
    /// `.git` entry is followed, whether directory or gitdir pointer file)
    /// or a git directory itself (bare repositories).
    pub fn open(path: &Path) -> Result<DotGitStorage, GitError> {
        let dotgit = path.join(".git");
        let dir = if dotgit.is_dir() {
            dotgit
        } else if dotgit.is_file() {
            // A `.git` file holds `gitdir: <path>` pointing at the real
            // git directory (submodules, linked worktrees).
            let text = fs::read_to_string(&dotgit)?;
            let target = text
                .strip_prefix("gitdir:")
                .map(str::trim)
                .ok_or_else(|| GitError::RepositoryNotFound)?;
            let target = PathBuf::from(target);
            if target.is_absolute() {
                target
            } else {
                path.join(target)
            }
        } else if path.join("objects").is_dir() && path.join("HEAD").is_file() {
            path.to_path_buf()
        } else {
            return Err(GitError::RepositoryNotFound);
        };

        let common = match fs::read_to_string(dir.join("commondir")) {
            Ok(text) => {
                let target = PathBuf::from(text.trim());
                if target.is_absolute() {
                    target
                } else {
                    dir.join(target)
                }
            }
            Err(_) => dir.clone(),
        };

        let storage = DotGitStorage {
            dir,
            common,
            kind: RwLock::new(HashKind::Sha1),
            modules: DashMap::new(),
        };
        let kind = storage.config()?.object_format;
        *storage.kind.write().expect("kind lock poisoned") = kind;
        Ok(storage)
    }

    /// Create a fresh git directory at `dir` (the git directory itself, not a
    /// worktree root) and open it.
    pub fn init(dir: &Path, kind: HashKind) -> Result<DotGitStorage, GitError> {
        fs::create_dir_all(dir.join("objects/info"))?;
        fs::create_dir_all(dir.join("objects/pack"))?;
        fs::create_dir_all(dir.join("refs/heads"))?;
        fs::create_dir_all(dir.join("refs/tags"))?;
        write_file_atomic(dir, &dir.join("HEAD"), b"ref: refs/heads/master\n")?;
        let config = RepositoryConfig::with_object_format(kind);
        write_file_atomic(dir, &dir.join("config"), config.encode().as_bytes())?;
        DotGitStorage::open(dir)
    }

    fn loose_object_path(&self, oid: &ObjectHash) -> PathBuf {
        let hex = oid.to_string();
        self.common.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn read_loose_object(&self, oid: &ObjectHash) -> Result<(ObjectType, Vec<u8>), GitError> {
        let path = self.loose_object_path(oid);
        let compressed = fs::read(&path)
            .map_err(|_| GitError::ObjectNotFound(oid.to_string()))?;
        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;

        let nul = memchr::memchr(0, &raw).ok_or_else(|| {
            GitError::ObjectNotFound(format!("{oid}: malformed loose object header"))
        })?;
        let header = std::str::from_utf8(&raw[..nul]).map_err(|_| {
            GitError::ObjectNotFound(format!("{oid}: non-utf8 loose object header"))
        })?;
        let (type_name, len_text) = header.split_once(' ').ok_or_else(|| {
            GitError::ObjectNotFound(format!("{oid}: malformed loose object header"))
        })?;
        let obj_type = ObjectType::from_string(type_name)?;
        let declared: usize = len_text.parse().map_err(|_| {
            GitError::ObjectNotFound(format!("{oid}: bad loose object length"))
        })?;
        let data = raw[nul + 1..].to_vec();
        if data.len() != declared {
            return Err(GitError::ObjectNotFound(format!(
                "{oid}: loose object length mismatch"
            )));
        }
        Ok((obj_type, data))
    }

    fn loose_ref_path(&self, name: &str) -> PathBuf {
        if name.starts_with("refs/") {
            self.common.join(name)
        } else {
            // HEAD and the other distinguished names are per-worktree.
            self.dir.join(name)
        }
    }

    fn read_loose_ref(&self, name: &str) -> Option<Reference> {
        let text = fs::read_to_string(self.loose_ref_path(name)).ok()?;
        parse_ref_file(name, &text)
    }

    fn packed_refs(&self) -> Result<Vec<Reference>, GitError> {
        let path = self.common.join("packed-refs");
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return Ok(Vec::new()),
        };
        let mut refs = Vec::new();
        for line in text.lines() {
            let line = line.trim_end();
            // Comment header and peeled (`^<hex>`) annotations.
            if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            if let Some((hex, name)) = line.split_once(' ') {
                if let Ok(oid) = hex.parse::<ObjectHash>() {
                    refs.push(Reference::hash(name, oid));
                }
            }
        }
        Ok(refs)
    }

    fn rewrite_packed_refs(&self, refs: &[Reference]) -> Result<(), GitError> {
        let path = self.common.join("packed-refs");
        if refs.is_empty() {
            match fs::remove_file(&path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        let mut text = String::from("# pack-refs with: peeled fully-peeled sorted \n");
        let mut sorted: Vec<&Reference> = refs.iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));
        for reference in sorted {
            if let Some(oid) = reference.oid() {
                text.push_str(&format!("{oid} {}\n", reference.name()));
            }
        }
        write_file_atomic(&self.common, &path, text.as_bytes())
    }

    fn walk_loose_refs(&self, dir: &Path, prefix: &str, out: &mut Vec<Reference>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let full = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                self.walk_loose_refs(&path, &full, out);
            } else if let Some(reference) = self.read_loose_ref(&full) {
                out.push(reference);
            }
        }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index")
    }
}

fn parse_ref_file(name: &str, text: &str) -> Option<Reference> {
    let line = text.lines().next()?.trim_end();
    if let Some(target) = line.strip_prefix("ref:") {
        Some(Reference::symbolic(name, target.trim()))
    } else {
        line.parse::<ObjectHash>()
            .ok()
            .map(|oid| Reference::hash(name, oid))
    }
}

/// Write-then-rename so readers never observe a half-written file. The
/// temporary lives next to the target to stay on one filesystem.
fn write_file_atomic(base: &Path, path: &Path, content: &[u8]) -> Result<(), GitError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = tempfile::NamedTempFile::new_in(base)?;
    tmp.write_all(content)?;
    tmp.persist(path)
        .map_err(|e| GitError::IOError(e.error))?;
    Ok(())
}

impl ObjectStore for DotGitStorage {
    fn hash_kind(&self) -> HashKind {
        *self.kind.read().expect("kind lock poisoned")
    }

    fn set_object_format(&self, kind: HashKind) -> Result<(), GitError> {
        let mut current = self.kind.write().expect("kind lock poisoned");
        if *current == kind {
            return Ok(());
        }
        if !self.iter_encoded_objects(None)?.is_empty() {
            return Err(GitError::ObjectFormatFixed);
        }
        *current = kind;
        drop(current);
        self.set_config(&RepositoryConfig::with_object_format(kind))
    }

    fn set_encoded_object(&self, obj: EncodedObject) -> Result<ObjectHash, GitError> {
        let hash = obj.hash();
        let path = self.loose_object_path(&hash);
        if path.exists() {
            // Content addresses itself, so an existing file is the same object.
            return Ok(hash);
        }
        let mut raw = Vec::with_capacity(obj.size() as usize + 32);
        raw.extend_from_slice(obj.obj_type().to_bytes());
        raw.push(b' ');
        raw.extend_from_slice(obj.size().to_string().as_bytes());
        raw.push(0);
        raw.extend_from_slice(obj.data());

        let mut deflater = ZlibEncoder::new(Vec::new(), Compression::default());
        deflater.write_all(&raw)?;
        let compressed = deflater.finish()?;
        write_file_atomic(self.common.join("objects").as_path(), &path, &compressed)?;
        Ok(hash)
    }

    fn has_encoded_object(&self, oid: &ObjectHash) -> Result<bool, GitError> {
        Ok(self.loose_object_path(oid).is_file())
    }

    fn encoded_object_size(&self, oid: &ObjectHash) -> Result<u64, GitError> {
        let (_, data) = self.read_loose_object(oid)?;
        Ok(data.len() as u64)
    }

    fn encoded_object(
        &self,
        obj_type: Option<ObjectType>,
        oid: &ObjectHash,
    ) -> Result<EncodedObject, GitError> {
        let (stored_type, data) = self.read_loose_object(oid)?;
        if let Some(wanted) = obj_type {
            if stored_type != wanted {
                return Err(GitError::ObjectNotFound(format!(
                    "{oid} is a {stored_type}, not a {wanted}"
                )));
            }
        }
        Ok(EncodedObject::new(self.hash_kind(), stored_type, data.into()))
    }

    fn iter_encoded_objects(
        &self,
        obj_type: Option<ObjectType>,
    ) -> Result<Vec<EncodedObject>, GitError> {
        let mut out = Vec::new();
        let objects_dir = self.common.join("objects");
        let entries = match fs::read_dir(&objects_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(out),
        };
        for fanout in entries.flatten() {
            let fan_name = fanout.file_name().to_string_lossy().into_owned();
            if fan_name.len() != 2 || !fanout.path().is_dir() {
                continue; // pack/ and info/
            }
            for file in fs::read_dir(fanout.path())?.flatten() {
                let rest = file.file_name().to_string_lossy().into_owned();
                let Ok(oid) = format!("{fan_name}{rest}").parse::<ObjectHash>() else {
                    continue;
                };
                let (stored_type, data) = self.read_loose_object(&oid)?;
                if obj_type.is_none_or(|t| t == stored_type) {
                    out.push(EncodedObject::new(self.hash_kind(), stored_type, data.into()));
                }
            }
        }
        Ok(out)
    }

    fn begin(&self) -> Result<Box<dyn ObjectTransaction + '_>, GitError> {
        Ok(Box::new(DotGitTransaction {
            store: self,
            staged: Vec::new(),
        }))
    }

    fn loose_object_time(&self, oid: &ObjectHash) -> Result<DateTime<Utc>, GitError> {
        let meta = fs::metadata(self.loose_object_path(oid))
            .map_err(|_| GitError::ObjectNotFound(oid.to_string()))?;
        let mtime = meta.modified()?;
        Ok(DateTime::<Utc>::from(mtime))
    }
}

/// Staged object writes against a [`DotGitStorage`].
struct DotGitTransaction<'a> {
    store: &'a DotGitStorage,
    staged: Vec<EncodedObject>,
}

impl ObjectTransaction for DotGitTransaction<'_> {
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

impl ReferenceStore for DotGitStorage {
    fn set_reference(&self, reference: &Reference) -> Result<(), GitError> {
        let content = match reference {
            Reference::Hash { oid, .. } => format!("{oid}\n"),
            Reference::Symbolic { target, .. } => format!("ref: {target}\n"),
        };
        write_file_atomic(
            &self.common,
            &self.loose_ref_path(reference.name()),
            content.as_bytes(),
        )
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
        if let Some(reference) = self.read_loose_ref(name) {
            return Ok(reference);
        }
        self.packed_refs()?
            .into_iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| GitError::ReferenceNotFound(name.to_string()))
    }

    fn iter_references(&self) -> Result<Vec<Reference>, GitError> {
        let mut merged: std::collections::BTreeMap<String, Reference> =
            std::collections::BTreeMap::new();
        for reference in self.packed_refs()? {
            merged.insert(reference.name().to_string(), reference);
        }
        let mut loose = Vec::new();
        self.walk_loose_refs(&self.common.join("refs"), "refs", &mut loose);
        for reference in loose {
            merged.insert(reference.name().to_string(), reference);
        }
        if let Some(head) = self.read_loose_ref(HEAD) {
            merged.insert(HEAD.to_string(), head);
        }
        Ok(merged.into_values().collect())
    }

    fn remove_reference(&self, name: &str) -> Result<(), GitError> {
        match fs::remove_file(self.loose_ref_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let remaining: Vec<Reference> = self
            .packed_refs()?
            .into_iter()
            .filter(|r| r.name() != name)
            .collect();
        self.rewrite_packed_refs(&remaining)
    }

    fn pack_refs(&self) -> Result<(), GitError> {
        let mut loose = Vec::new();
        self.walk_loose_refs(&self.common.join("refs"), "refs", &mut loose);

        let mut packed = self.packed_refs()?;
        for reference in &loose {
            // Symbolic refs stay loose; only hash refs pack.
            if reference.oid().is_none() {
                continue;
            }
            packed.retain(|r| r.name() != reference.name());
            packed.push(reference.clone());
        }
        self.rewrite_packed_refs(&packed)?;

        for reference in &loose {
            if reference.oid().is_some() {
                let _ = fs::remove_file(self.loose_ref_path(reference.name()));
            }
        }
        Ok(())
    }
}

impl IndexStore for DotGitStorage {
    fn set_index(&self, index: &Index) -> Result<(), GitError> {
        let kind = self.hash_kind();
        let mut out = Vec::new();
        out.extend_from_slice(INDEX_MAGIC);
        out.write_u32::<BigEndian>(index.version)?;
        out.write_u32::<BigEndian>(index.entries.len() as u32)?;

        for entry in &index.entries {
            let start = out.len();
            out.write_u32::<BigEndian>(entry.mtime_secs)?; // ctime
            out.write_u32::<BigEndian>(0)?;
            out.write_u32::<BigEndian>(entry.mtime_secs)?;
            out.write_u32::<BigEndian>(0)?;
            out.write_u32::<BigEndian>(0)?; // dev
            out.write_u32::<BigEndian>(0)?; // ino
            out.write_u32::<BigEndian>(entry.mode)?;
            out.write_u32::<BigEndian>(0)?; // uid
            out.write_u32::<BigEndian>(0)?; // gid
            out.write_u32::<BigEndian>(entry.size)?;
            out.extend_from_slice(entry.oid.as_ref());
            let name_len = entry.path.len().min(0xFFF) as u16;
            out.write_u16::<BigEndian>(name_len)?;
            out.extend_from_slice(entry.path.as_bytes());
            // Pad with NULs to an 8-byte multiple, at least one.
            let written = out.len() - start;
            let pad = 8 - (written % 8);
            out.extend(std::iter::repeat_n(0u8, pad));
        }

        let checksum = ObjectHash::compute(kind, &out);
        out.extend_from_slice(checksum.as_ref());
        write_file_atomic(&self.dir, &self.index_path(), &out)
    }

    fn index(&self) -> Result<Index, GitError> {
        let path = self.index_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(_) => return Ok(Index::default()),
        };
        let kind = self.hash_kind();
        if raw.len() < 12 + kind.size() {
            return Err(GitError::InvalidIndexFile(path.display().to_string()));
        }
        let body_len = raw.len() - kind.size();
        let checksum = ObjectHash::from_bytes(kind, &raw[body_len..])?;
        if ObjectHash::compute(kind, &raw[..body_len]) != checksum {
            return Err(GitError::InvalidIndexFile(format!(
                "{}: checksum mismatch",
                path.display()
            )));
        }

        let mut cursor = std::io::Cursor::new(&raw[..body_len]);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(GitError::InvalidIndexFile(path.display().to_string()));
        }
        let version = cursor.read_u32::<BigEndian>()?;
        let count = cursor.read_u32::<BigEndian>()? as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let start = cursor.position() as usize;
            let ctime_secs = cursor.read_u32::<BigEndian>()?;
            let _ctime_nsec = cursor.read_u32::<BigEndian>()?;
            let mut mtime_secs = cursor.read_u32::<BigEndian>()?;
            let _mtime_nsec = cursor.read_u32::<BigEndian>()?;
            if mtime_secs == 0 {
                mtime_secs = ctime_secs;
            }
            let _dev = cursor.read_u32::<BigEndian>()?;
            let _ino = cursor.read_u32::<BigEndian>()?;
            let mode = cursor.read_u32::<BigEndian>()?;
            let _uid = cursor.read_u32::<BigEndian>()?;
            let _gid = cursor.read_u32::<BigEndian>()?;
            let size = cursor.read_u32::<BigEndian>()?;
            let oid = ObjectHash::from_stream(kind, &mut cursor)?;
            let flags = cursor.read_u16::<BigEndian>()?;
            let name_len = (flags & 0xFFF) as usize;
            let mut name = vec![0u8; name_len];
            cursor.read_exact(&mut name)?;
            let written = cursor.position() as usize - start;
            let pad = 8 - (written % 8);
            let mut skip = vec![0u8; pad];
            cursor.read_exact(&mut skip)?;

            entries.push(IndexEntry {
                path: String::from_utf8_lossy(&name).into_owned(),
                oid,
                mode,
                size,
                mtime_secs,
            });
        }

        let mod_time = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(Index {
            version,
            entries,
            mod_time,
        })
    }
}

impl ShallowStore for DotGitStorage {
    fn set_shallow(&self, oids: &[ObjectHash]) -> Result<(), GitError> {
        let path = self.common.join("shallow");
        if oids.is_empty() {
            match fs::remove_file(&path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        let mut text = String::new();
        for oid in oids {
            text.push_str(&format!("{oid}\n"));
        }
        write_file_atomic(&self.common, &path, text.as_bytes())
    }

    fn shallow(&self) -> Result<Vec<ObjectHash>, GitError> {
        let text = match fs::read_to_string(self.common.join("shallow")) {
            Ok(text) => text,
            Err(_) => return Ok(Vec::new()),
        };
        let mut oids = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if !line.is_empty() {
                oids.push(line.parse::<ObjectHash>()?);
            }
        }
        Ok(oids)
    }
}

impl ConfigStore for DotGitStorage {
    fn config(&self) -> Result<RepositoryConfig, GitError> {
        match fs::read_to_string(self.common.join("config")) {
            Ok(text) => RepositoryConfig::decode(&text),
            Err(_) => Ok(RepositoryConfig::default()),
        }
    }

    fn set_config(&self, config: &RepositoryConfig) -> Result<(), GitError> {
        write_file_atomic(
            &self.common,
            &self.common.join("config"),
            config.encode().as_bytes(),
        )
    }
}

impl ModuleStore for DotGitStorage {
    fn module(&self, name: &str) -> Result<Arc<dyn Storage>, GitError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.value().clone());
        }
        let dir = self.common.join("modules").join(name);
        let storage = if dir.is_dir() {
            DotGitStorage::open(&dir)?
        } else {
            DotGitStorage::init(&dir, self.hash_kind())?
        };
        let storage = Arc::new(storage);
        self.modules.insert(name.to_string(), storage.clone());
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn fresh() -> (tempfile::TempDir, DotGitStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = DotGitStorage::init(&dir.path().join("repo.git"), HashKind::Sha1).unwrap();
        (dir, storage)
    }

    /// Loose objects round-trip through zlib with their declared type.
    #[test]
    fn loose_object_round_trip() {
        let (_tmp, storage) = fresh();
        let obj = EncodedObject::new(HashKind::Sha1, ObjectType::Blob, Bytes::from_static(b"data"));
        let oid = storage.set_encoded_object(obj).unwrap();

        assert!(storage.has_encoded_object(&oid).unwrap());
        assert_eq!(storage.encoded_object_size(&oid).unwrap(), 4);
        let loaded = storage.encoded_object(Some(ObjectType::Blob), &oid).unwrap();
        assert_eq!(loaded.data(), b"data");
        assert!(matches!(
            storage.encoded_object(Some(ObjectType::Tree), &oid),
            Err(GitError::ObjectNotFound(_))
        ));
        assert_eq!(storage.iter_encoded_objects(None).unwrap().len(), 1);
        assert!(storage.loose_object_time(&oid).is_ok());
    }

    /// Loose refs, HEAD and packed-refs all surface through the trait.
    #[test]
    fn reference_round_trip() {
        let (_tmp, storage) = fresh();
        let oid = ObjectHash::compute(HashKind::Sha1, b"tip");
        storage
            .set_reference(&Reference::hash("refs/heads/main", oid))
            .unwrap();
        storage
            .set_reference(&Reference::symbolic(HEAD, "refs/heads/main"))
            .unwrap();

        assert_eq!(
            storage.reference("refs/heads/main").unwrap().oid(),
            Some(oid)
        );
        assert_eq!(
            storage.reference(HEAD).unwrap().target(),
            Some("refs/heads/main")
        );
        let names: Vec<_> = storage
            .iter_references()
            .unwrap()
            .into_iter()
            .map(|r| r.name().to_string())
            .collect();
        assert!(names.contains(&"HEAD".to_string()));
        assert!(names.contains(&"refs/heads/main".to_string()));
    }

    /// pack_refs moves loose hash refs into packed-refs and lookups survive.
    #[test]
    fn pack_refs_coalesces() {
        let (_tmp, storage) = fresh();
        let oid = ObjectHash::compute(HashKind::Sha1, b"tip");
        storage
            .set_reference(&Reference::hash("refs/heads/main", oid))
            .unwrap();
        storage.pack_refs().unwrap();

        assert!(!storage.loose_ref_path("refs/heads/main").exists());
        assert_eq!(
            storage.reference("refs/heads/main").unwrap().oid(),
            Some(oid)
        );

        storage.remove_reference("refs/heads/main").unwrap();
        assert!(storage.reference("refs/heads/main").is_err());
    }

    /// The binary index round-trips entries and validates its checksum.
    #[test]
    fn index_round_trip() {
        let (_tmp, storage) = fresh();
        let index = Index {
            version: 2,
            entries: vec![IndexEntry {
                path: "src/lib.rs".to_string(),
                oid: ObjectHash::compute(HashKind::Sha1, b"content"),
                mode: 0o100644,
                size: 7,
                mtime_secs: 1_700_000_000,
            }],
            mod_time: DateTime::<Utc>::UNIX_EPOCH,
        };
        storage.set_index(&index).unwrap();
        let loaded = storage.index().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.entries, index.entries);
        assert!(loaded.mod_time > DateTime::<Utc>::UNIX_EPOCH);
    }

    /// The shallow file holds one hex id per line; empty set removes it.
    #[test]
    fn shallow_round_trip() {
        let (_tmp, storage) = fresh();
        let roots = vec![
            ObjectHash::compute(HashKind::Sha1, b"a"),
            ObjectHash::compute(HashKind::Sha1, b"b"),
        ];
        storage.set_shallow(&roots).unwrap();
        assert_eq!(storage.shallow().unwrap(), roots);
        storage.set_shallow(&[]).unwrap();
        assert!(storage.shallow().unwrap().is_empty());
    }

    /// A `.git` gitdir pointer file is followed to the real directory.
    #[test]
    fn gitdir_pointer_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real.git");
        DotGitStorage::init(&real, HashKind::Sha1).unwrap();
        let worktree = tmp.path().join("worktree");
        fs::create_dir_all(&worktree).unwrap();
        fs::write(worktree.join(".git"), format!("gitdir: {}\n", real.display())).unwrap();

        let storage = DotGitStorage::open(&worktree).unwrap();
        assert!(storage.reference(HEAD).is_ok());
    }

    /// SHA-256 repositories read their object format from the config.
    #[test]
    fn sha256_object_format_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("repo.git");
        DotGitStorage::init(&dir, HashKind::Sha256).unwrap();
        let storage = DotGitStorage::open(&dir).unwrap();
        assert_eq!(storage.hash_kind(), HashKind::Sha256);
    }

    /// Modules are initialized under modules/ and reopened on access.
    #[test]
    fn module_storage() {
        let (_tmp, storage) = fresh();
        let module = storage.module("lib").unwrap();
        let obj = EncodedObject::new(HashKind::Sha1, ObjectType::Blob, Bytes::from_static(b"m"));
        let oid = module.set_encoded_object(obj).unwrap();
        assert!(storage.module("lib").unwrap().has_encoded_object(&oid).unwrap());
    }
}
