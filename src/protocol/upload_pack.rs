//! Server side of fetch: the reference advertisement and the upload-pack
//! pipeline that parses the client's request, computes the object closure,
//! and streams a packfile back.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::io::{Read, Write};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::commit::CommitSummary;
use crate::internal::object::tag::TagSummary;
use crate::internal::object::tree::TreeSummary;
use crate::internal::object::types::ObjectType;
use crate::internal::pack::{Entry, PackEncoder};
use crate::protocol::advertise::AdvertisedRefs;
use crate::protocol::capability::{Capability, CapabilityList, DEFAULT_AGENT};
use crate::protocol::pktline::{self, Packet, PktReader};
use crate::protocol::request::{self, Depth, FetchRequest, ShallowUpdate};
use crate::protocol::sideband::{self, Muxer};
use crate::protocol::{ProtocolVersion, Service};
use crate::reference::{HEAD, Reference};
use crate::storage::{ObjectStore as _, ReferenceStore as _, ShallowStore as _, Storage};

/// Options of one upload-pack or receive-pack invocation.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Value of the `GIT_PROTOCOL` environment variable, e.g. `version=2`.
    pub git_protocol: Option<String>,
    /// Emit the advertisement and stop (the info/refs GET, or
    /// `--advertise-refs`).
    pub advertise_refs: bool,
    /// Half-duplex smart-HTTP mode: one request, one response.
    pub stateless_rpc: bool,
}

impl ServeOptions {
    /// Protocol version requested by the client, V0 when unset. V2 is
    /// recognized but not implemented by this core.
    pub fn protocol_version(&self) -> Result<ProtocolVersion, GitError> {
        let Some(text) = self.git_protocol.as_deref() else {
            return Ok(ProtocolVersion::V0);
        };
        for field in text.split(':') {
            if let Some(v) = field.strip_prefix("version=") {
                let n: u8 = v.trim().parse().map_err(|_| {
                    GitError::InvalidRequest(format!("bad GIT_PROTOCOL value `{text}`"))
                })?;
                let version = ProtocolVersion::from_number(n)?;
                if version == ProtocolVersion::V2 {
                    return Err(GitError::UnsupportedVersion(2));
                }
                return Ok(version);
            }
        }
        Ok(ProtocolVersion::V0)
    }
}

/// Default capability set a server advertises for a service.
pub fn default_capabilities(
    storage: &dyn Storage,
    service: Service,
) -> Result<CapabilityList, GitError> {
    let mut caps = CapabilityList::new();
    match service {
        Service::UploadPack => {
            caps.add(Capability::MultiAck, None)?;
            caps.add(Capability::MultiAckDetailed, None)?;
            caps.add(Capability::SideBand64k, None)?;
            caps.add(Capability::SideBand, None)?;
            caps.add(Capability::OfsDelta, None)?;
            caps.add(Capability::Shallow, None)?;
            caps.add(Capability::NoProgress, None)?;
            caps.add(Capability::IncludeTag, None)?;
            if let Ok(Reference::Symbolic { target, .. }) = storage.reference(HEAD) {
                let symref = format!("{HEAD}:{target}");
                caps.add(Capability::Symref, Some(symref.as_str()))?;
            }
        }
        Service::ReceivePack => {
            caps.add(Capability::ReportStatus, None)?;
            caps.add(Capability::ReportStatusV2, None)?;
            caps.add(Capability::DeleteRefs, None)?;
            caps.add(Capability::OfsDelta, None)?;
            caps.add(Capability::Atomic, None)?;
            caps.add(Capability::PushOptions, None)?;
        }
        Service::UploadArchive => {
            return Err(GitError::UnsupportedService(service.to_string()));
        }
    }
    caps.add(Capability::Agent, Some(DEFAULT_AGENT))?;
    caps.add(
        Capability::ObjectFormat,
        Some(storage.hash_kind().as_str()),
    )?;
    Ok(caps)
}

/// Build and emit the initial reference advertisement for a service.
pub fn advertise_references(
    storage: &dyn Storage,
    service: Service,
    version: ProtocolVersion,
    with_preamble: bool,
    w: &mut dyn Write,
) -> Result<(), GitError> {
    let mut ad = AdvertisedRefs::new(storage.hash_kind());
    ad.capabilities = default_capabilities(storage, service)?;
    if version >= ProtocolVersion::V1 {
        ad.version = Some(version.number());
    }

    if let Ok(resolved) = crate::reference::resolve(storage, HEAD) {
        ad.head = resolved.oid();
    }
    for reference in storage.iter_references()? {
        let Some(oid) = reference.oid() else { continue };
        if !reference.name().starts_with("refs/") {
            continue;
        }
        ad.refs.insert(reference.name().to_string(), oid);
        // Annotated tags also advertise their peeled target.
        if let Ok((peeled, _)) = peel_to_non_tag(storage, oid) {
            if peeled != oid {
                ad.peeled.insert(reference.name().to_string(), peeled);
            }
        }
    }
    ad.shallows = storage.shallow()?;

    let preamble = with_preamble.then(|| service.as_str());
    ad.encode(w, preamble)
}

/// Serve one upload-pack exchange over the given byte channels.
pub fn upload_pack(
    storage: &dyn Storage,
    r: &mut dyn Read,
    w: &mut dyn Write,
    opts: &ServeOptions,
) -> Result<(), GitError> {
    let version = opts.protocol_version()?;

    if opts.advertise_refs || !opts.stateless_rpc {
        advertise_references(
            storage,
            Service::UploadPack,
            version,
            opts.advertise_refs && opts.stateless_rpc,
            w,
        )?;
        w.flush()?;
        if opts.advertise_refs {
            return Ok(());
        }
    }

    let mut packets = PktReader::new(r);
    // Nothing to serve when the client hangs up or flushes immediately.
    match packets.peek_packet() {
        Err(GitError::IOError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(());
        }
        Err(e) => return Err(e),
        Ok(Packet::Flush) => return Ok(()),
        Ok(_) => {}
    }

    let (req, caps) = request::decode_upload_request(&mut packets)?;
    serve_fetch(storage, req, caps, &mut packets, w)
}

fn serve_fetch<R: Read>(
    storage: &dyn Storage,
    req: FetchRequest,
    caps: CapabilityList,
    packets: &mut PktReader<R>,
    w: &mut dyn Write,
) -> Result<(), GitError> {
    if matches!(req.depth, Depth::Not(_)) || caps.supports(&Capability::DeepenRelative) {
        return Err(GitError::InvalidRequest(
            "unsupported deepen form".to_string(),
        ));
    }
    tracing::debug!(
        wants = req.wants.len(),
        depth = ?req.depth,
        capabilities = %caps,
        "upload-pack request received"
    );

    let haves = request::decode_haves(packets)?;

    let depth_result = if req.depth.is_none() {
        None
    } else {
        let walk = depth_walk(storage, &req)?;
        let announced: BTreeSet<ObjectHash> = req.shallows.iter().copied().collect();
        let update = ShallowUpdate {
            shallows: walk
                .shallow
                .iter()
                .filter(|oid| !announced.contains(*oid))
                .copied()
                .collect(),
            unshallows: announced
                .iter()
                .filter(|oid| !walk.shallow.contains(*oid))
                .copied()
                .collect(),
        };
        update.encode(w)?;
        Some(walk)
    };

    pktline::write_text(w, "NAK\n")?;

    let limit = depth_result.as_ref().map(|walk| &walk.commits);
    let entries = object_closure(
        storage,
        &req.wants,
        &haves,
        limit,
        caps.supports(&Capability::IncludeTag),
    )?;

    match sideband::negotiated_limit(&caps) {
        Some(frame_limit) => {
            let mut mux = Muxer::new(&mut *w, frame_limit);
            if !caps.supports(&Capability::NoProgress) {
                mux.write_progress(&format!("Enumerating objects: {}, done.\n", entries.len()))?;
            }
            PackEncoder::new(storage.hash_kind(), &mut mux).encode(&entries)?;
            drop(mux);
            pktline::write_flush(w)?;
        }
        None => {
            PackEncoder::new(storage.hash_kind(), &mut *w).encode(&entries)?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Follow annotated-tag chains to the first non-tag object.
pub(crate) fn peel_to_non_tag(
    storage: &dyn Storage,
    oid: ObjectHash,
) -> Result<(ObjectHash, ObjectType), GitError> {
    let mut current = oid;
    loop {
        let obj = storage.encoded_object(None, &current)?;
        if obj.obj_type() != ObjectType::Tag {
            return Ok((current, obj.obj_type()));
        }
        let tag = TagSummary::parse(current, obj.data())?;
        current = tag.target;
    }
}

struct DepthWalk {
    /// The commits inside the depth boundary.
    commits: HashSet<ObjectHash>,
    /// Boundary commits whose parents were cut off.
    shallow: BTreeSet<ObjectHash>,
}

/// Walk commits from each want, accumulating depth counts. With a commit
/// count limit, commits reached at the boundary become shallow; with a
/// since-timestamp, commits whose parents are older than the cutoff do.
fn depth_walk(storage: &dyn Storage, req: &FetchRequest) -> Result<DepthWalk, GitError> {
    let mut commits: HashSet<ObjectHash> = HashSet::new();
    let mut shallow: BTreeSet<ObjectHash> = BTreeSet::new();
    let mut queue: VecDeque<(ObjectHash, u32)> = VecDeque::new();
    let mut best_depth: HashMap<ObjectHash, u32> = HashMap::new();

    for want in &req.wants {
        let (peeled, obj_type) = peel_to_non_tag(storage, *want)?;
        if obj_type == ObjectType::Commit {
            queue.push_back((peeled, 1));
        }
    }

    while let Some((oid, depth)) = queue.pop_front() {
        match best_depth.get(&oid) {
            Some(prior) if *prior <= depth => continue,
            _ => {}
        }
        best_depth.insert(oid, depth);
        commits.insert(oid);
        shallow.remove(&oid);

        let obj = storage.encoded_object(Some(ObjectType::Commit), &oid)?;
        let commit = CommitSummary::parse(oid, obj.data())?;
        if commit.parent_ids.is_empty() {
            continue;
        }

        let cut = match &req.depth {
            Depth::Commits(limit) => depth >= *limit,
            Depth::Since(ts) => commit
                .parent_ids
                .iter()
                .all(|p| parent_older_than(storage, p, *ts).unwrap_or(true)),
            _ => false,
        };
        if cut {
            shallow.insert(oid);
            continue;
        }
        for parent in &commit.parent_ids {
            if let Depth::Since(ts) = &req.depth {
                if parent_older_than(storage, parent, *ts).unwrap_or(true) {
                    shallow.insert(oid);
                    continue;
                }
            }
            queue.push_back((*parent, depth + 1));
        }
    }

    Ok(DepthWalk { commits, shallow })
}

fn parent_older_than(
    storage: &dyn Storage,
    oid: &ObjectHash,
    ts: i64,
) -> Result<bool, GitError> {
    let obj = storage.encoded_object(Some(ObjectType::Commit), oid)?;
    let commit = CommitSummary::parse(*oid, obj.data())?;
    Ok(commit.committer_time < ts)
}

/// Compute the objects to send: reachable-from-wants minus
/// reachable-from-haves, optionally limited to a depth-walked commit set,
/// optionally including annotated tags that point into the result.
fn object_closure(
    storage: &dyn Storage,
    wants: &BTreeSet<ObjectHash>,
    haves: &BTreeSet<ObjectHash>,
    commit_limit: Option<&HashSet<ObjectHash>>,
    include_tags: bool,
) -> Result<Vec<Entry>, GitError> {
    let kind = storage.hash_kind();

    // Everything the client already has, ignoring haves unknown to us.
    let mut excluded: HashSet<ObjectHash> = HashSet::new();
    for have in haves {
        if storage.has_encoded_object(have)? {
            collect_reachable(storage, *have, None, &mut excluded)?;
        }
    }

    let mut sent: HashSet<ObjectHash> = HashSet::new();
    let mut entries: Vec<Entry> = Vec::new();
    for want in wants {
        collect_into_entries(
            storage,
            *want,
            commit_limit,
            &excluded,
            &mut sent,
            &mut entries,
        )?;
    }

    if include_tags {
        for reference in storage.iter_references()? {
            let Some(oid) = reference.oid() else { continue };
            if !reference.name().starts_with("refs/tags/") || sent.contains(&oid) {
                continue;
            }
            let Ok(obj) = storage.encoded_object(Some(ObjectType::Tag), &oid) else {
                continue;
            };
            let tag = TagSummary::parse(oid, obj.data())?;
            if sent.contains(&tag.target) {
                sent.insert(oid);
                entries.push(Entry {
                    obj_type: ObjectType::Tag,
                    data: obj.data().to_vec(),
                    hash: oid,
                });
            }
        }
    }

    tracing::debug!(objects = entries.len(), hash_kind = %kind, "object closure computed");
    Ok(entries)
}

/// Reachability walk that only records ids (for the have side).
fn collect_reachable(
    storage: &dyn Storage,
    from: ObjectHash,
    commit_limit: Option<&HashSet<ObjectHash>>,
    seen: &mut HashSet<ObjectHash>,
) -> Result<(), GitError> {
    let mut queue = VecDeque::from([from]);
    while let Some(oid) = queue.pop_front() {
        if !seen.insert(oid) {
            continue;
        }
        let Ok(obj) = storage.encoded_object(None, &oid) else {
            continue;
        };
        match obj.obj_type() {
            ObjectType::Commit => {
                let commit = CommitSummary::parse(oid, obj.data())?;
                queue.push_back(commit.tree_id);
                for parent in commit.parent_ids {
                    if commit_limit.is_none_or(|l| l.contains(&parent)) {
                        queue.push_back(parent);
                    }
                }
            }
            ObjectType::Tree => {
                let tree = TreeSummary::parse(oid, storage.hash_kind(), obj.data())?;
                for entry in tree.entries {
                    if !entry.is_gitlink() {
                        queue.push_back(entry.oid);
                    }
                }
            }
            ObjectType::Tag => {
                let tag = TagSummary::parse(oid, obj.data())?;
                queue.push_back(tag.target);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Reachability walk that materializes pack entries, skipping the excluded
/// set and honoring the commit boundary.
fn collect_into_entries(
    storage: &dyn Storage,
    from: ObjectHash,
    commit_limit: Option<&HashSet<ObjectHash>>,
    excluded: &HashSet<ObjectHash>,
    sent: &mut HashSet<ObjectHash>,
    entries: &mut Vec<Entry>,
) -> Result<(), GitError> {
    let mut queue = VecDeque::from([from]);
    while let Some(oid) = queue.pop_front() {
        if sent.contains(&oid) || excluded.contains(&oid) {
            continue;
        }
        let obj = storage.encoded_object(None, &oid)?;
        sent.insert(oid);
        entries.push(Entry {
            obj_type: obj.obj_type(),
            data: obj.data().to_vec(),
            hash: oid,
        });
        match obj.obj_type() {
            ObjectType::Commit => {
                let commit = CommitSummary::parse(oid, obj.data())?;
                queue.push_back(commit.tree_id);
                for parent in commit.parent_ids {
                    if commit_limit.is_none_or(|l| l.contains(&parent)) {
                        queue.push_back(parent);
                    }
                }
            }
            ObjectType::Tree => {
                let tree = TreeSummary::parse(oid, storage.hash_kind(), obj.data())?;
                for entry in tree.entries {
                    if !entry.is_gitlink() {
                        queue.push_back(entry.oid);
                    }
                }
            }
            ObjectType::Tag => {
                let tag = TagSummary::parse(oid, obj.data())?;
                queue.push_back(tag.target);
            }
            _ => {}
        }
    }
    Ok(())
}
