//! Shared fixtures: build small repositories directly in storage.

use git_wire::hash::ObjectHash;
use git_wire::internal::object::types::ObjectType;
use git_wire::reference::Reference;
use git_wire::storage::{ObjectStore as _, ReferenceStore as _, Storage};

pub fn store_blob(storage: &dyn Storage, content: &[u8]) -> ObjectHash {
    let obj = storage.new_encoded_object(ObjectType::Blob, content.to_vec());
    storage.set_encoded_object(obj).expect("store blob")
}

pub fn store_tree(storage: &dyn Storage, entries: &[(&str, ObjectHash)]) -> ObjectHash {
    let mut data = Vec::new();
    for (name, oid) in entries {
        data.extend_from_slice(format!("100644 {name}\0").as_bytes());
        data.extend_from_slice(oid.as_ref());
    }
    let obj = storage.new_encoded_object(ObjectType::Tree, data);
    storage.set_encoded_object(obj).expect("store tree")
}

pub fn store_commit(
    storage: &dyn Storage,
    tree: ObjectHash,
    parents: &[ObjectHash],
    time: i64,
    message: &str,
) -> ObjectHash {
    let mut data = Vec::new();
    data.extend_from_slice(format!("tree {tree}\n").as_bytes());
    for parent in parents {
        data.extend_from_slice(format!("parent {parent}\n").as_bytes());
    }
    data.extend_from_slice(
        format!("author tester <tester@example.com> {time} +0000\n").as_bytes(),
    );
    data.extend_from_slice(
        format!("committer tester <tester@example.com> {time} +0000\n").as_bytes(),
    );
    data.push(b'\n');
    data.extend_from_slice(message.as_bytes());
    data.push(b'\n');
    let obj = storage.new_encoded_object(ObjectType::Commit, data);
    storage.set_encoded_object(obj).expect("store commit")
}

/// A linear history of `n` commits, each with its own file content; returns
/// the commit ids oldest-first and points `refs/heads/master` plus a
/// symbolic HEAD at the tip.
pub fn seed_linear_repo(storage: &dyn Storage, n: usize) -> Vec<ObjectHash> {
    let mut commits = Vec::with_capacity(n);
    let mut parent: Option<ObjectHash> = None;
    for i in 0..n {
        let blob = store_blob(storage, format!("content {i}\n").as_bytes());
        let tree = store_tree(storage, &[("file.txt", blob)]);
        let parents: Vec<ObjectHash> = parent.into_iter().collect();
        let commit = store_commit(
            storage,
            tree,
            &parents,
            1_700_000_000 + i as i64 * 100,
            &format!("commit {i}"),
        );
        commits.push(commit);
        parent = Some(commit);
    }
    let tip = *commits.last().expect("at least one commit");
    storage
        .set_reference(&Reference::hash("refs/heads/master", tip))
        .expect("set master");
    storage
        .set_reference(&Reference::symbolic("HEAD", "refs/heads/master"))
        .expect("set HEAD");
    commits
}
