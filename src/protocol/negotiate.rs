//! Client side of the fetch and push pipelines: capability selection, the
//! negotiation exchange, packfile ingest, and the send-pack sequence.
//!
//! Each pipeline is split into a write phase and a read phase. Full-duplex
//! transports run them back-to-back on live pipes; stateless-RPC transports
//! buffer the write phase, ship it as one request, and run the read phase
//! over the response.

use std::io::{Read, Write};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::protocol::capability::{Capability, CapabilityList, DEFAULT_AGENT};
use crate::protocol::pktline::{self, PktReader};
use crate::protocol::request::{
    self, FetchRequest, PushRequest, ReportStatus, ShallowUpdate,
};
use crate::protocol::sideband::{self, Demuxer};
use crate::storage::{ObjectStore as _, ShallowStore as _, Storage};

/// Where channel-2 progress text lands.
pub type ProgressSink = Box<dyn Write + Send>;

/// Pick the client capability set for a fetch by intersecting the server's
/// advertisement with what this crate implements.
pub fn fetch_capabilities(
    server: &CapabilityList,
    req: &FetchRequest,
    with_progress: bool,
) -> Result<CapabilityList, GitError> {
    let mut caps = CapabilityList::new();
    if server.supports(&Capability::OfsDelta) {
        caps.add(Capability::OfsDelta, None)?;
    }
    if with_progress {
        if server.supports(&Capability::SideBand64k) {
            caps.add(Capability::SideBand64k, None)?;
        } else if server.supports(&Capability::SideBand) {
            caps.add(Capability::SideBand, None)?;
        }
    } else if server.supports(&Capability::NoProgress) {
        caps.add(Capability::NoProgress, None)?;
    }
    if req.include_tags && server.supports(&Capability::IncludeTag) {
        caps.add(Capability::IncludeTag, None)?;
    }
    if !req.depth.is_none() {
        if !server.supports(&Capability::Shallow) {
            return Err(GitError::InvalidRequest(
                "server does not support shallow fetches".to_string(),
            ));
        }
        caps.add(Capability::Shallow, None)?;
    }
    if server.supports(&Capability::Agent) {
        caps.add(Capability::Agent, Some(DEFAULT_AGENT))?;
    }
    Ok(caps)
}

/// Write half of a fetch negotiation: the upload-request, the haves and the
/// final `done`.
///
/// Preconditions: `wants` non-empty. When `wants ⊆ haves` and no shallow or
/// deepen handling is in play, only a flush is written and `None` comes back;
/// the caller closes its write half (tolerating EOF, see
/// [`tolerate_close_eof`]) and surfaces [`GitError::NoChange`].
///
/// In stateless-RPC mode the flush that normally separates haves from `done`
/// is suppressed: HTTP servers read a trailing flush as "no more rounds" and
/// answer without a packfile.
pub fn negotiate_write(
    server_caps: &CapabilityList,
    stateless_rpc: bool,
    with_progress: bool,
    req: &FetchRequest,
    writer: &mut dyn Write,
) -> Result<Option<CapabilityList>, GitError> {
    req.validate()?;

    if req.is_no_change() {
        pktline::write_flush(writer)?;
        writer.flush()?;
        return Ok(None);
    }

    let caps = fetch_capabilities(server_caps, req, with_progress)?;
    tracing::debug!(capabilities = %caps, stateless_rpc, "fetch negotiation starting");

    request::encode_upload_request(writer, &caps, req)?;
    request::encode_haves(writer, &req.haves, stateless_rpc)?;
    writer.flush()?;
    Ok(Some(caps))
}

/// Read half of a fetch negotiation: the shallow-update block (only when a
/// depth was requested) and the ACK/NAK run that precedes the packfile.
pub fn negotiate_read(
    reader: &mut dyn Read,
    depth_requested: bool,
) -> Result<ShallowUpdate, GitError> {
    let mut packets = PktReader::new(reader);
    let shallow_update = if depth_requested {
        ShallowUpdate::decode(&mut packets)
            .map_err(|e| wrap_phase("decoding shallow-update", e))?
    } else {
        ShallowUpdate::default()
    };
    request::decode_server_acks(&mut packets)
        .map_err(|e| wrap_phase("decoding server response", e))?;
    Ok(shallow_update)
}

/// Ingest the packfile that follows a successful negotiation, routing
/// sideband progress to the sink, and apply the shallow update to storage:
/// the shallow set becomes `prior ∪ shallows ∖ unshallows`.
pub fn fetch_pack(
    storage: &dyn Storage,
    negotiated: &CapabilityList,
    progress: Option<ProgressSink>,
    shallow_update: &ShallowUpdate,
    reader: &mut dyn Read,
) -> Result<(), GitError> {
    let kind = storage.hash_kind();
    let indexed = match sideband::negotiated_limit(negotiated) {
        Some(limit) => {
            let mut demux = Demuxer::new(reader, limit, progress);
            let result = crate::internal::pack::PackReader::new(kind, &mut demux)
                .index_into(storage);
            match result {
                Err(e) => {
                    // A channel-3 message explains the failure better than
                    // the I/O error it caused.
                    return Err(demux.take_error().unwrap_or(e));
                }
                Ok(done) => {
                    if let Some(sink_err) = demux.sink_error() {
                        tracing::warn!(error = %sink_err, "progress sink failed during transfer");
                    }
                    done
                }
            }
        }
        None => crate::internal::pack::PackReader::new(kind, reader).index_into(storage)?,
    };
    tracing::debug!(objects = indexed.0, "fetched pack indexed");

    if !shallow_update.is_empty() {
        let merged = apply_shallow_update(&storage.shallow()?, shallow_update);
        storage.set_shallow(&merged)?;
    }
    Ok(())
}

/// Pick the client capability set for a push.
pub fn push_capabilities(
    server: &CapabilityList,
    req: &PushRequest,
    with_progress: bool,
) -> Result<CapabilityList, GitError> {
    let mut caps = CapabilityList::new();
    if server.supports(&Capability::ReportStatus) {
        caps.add(Capability::ReportStatus, None)?;
    }
    if req.atomic {
        if !server.supports(&Capability::Atomic) {
            return Err(GitError::InvalidRequest(
                "server does not support atomic pushes".to_string(),
            ));
        }
        caps.add(Capability::Atomic, None)?;
    }
    if req.quiet && server.supports(&Capability::Quiet) {
        caps.add(Capability::Quiet, None)?;
    }
    if with_progress {
        if server.supports(&Capability::SideBand64k) {
            caps.add(Capability::SideBand64k, None)?;
        } else if server.supports(&Capability::SideBand) {
            caps.add(Capability::SideBand, None)?;
        }
    }
    if !req.push_options.is_empty() {
        if !server.supports(&Capability::PushOptions) {
            return Err(GitError::InvalidRequest(
                "server does not support push options".to_string(),
            ));
        }
        caps.add(Capability::PushOptions, None)?;
    }
    if server.supports(&Capability::Agent) {
        caps.add(Capability::Agent, Some(DEFAULT_AGENT))?;
    }
    Ok(caps)
}

/// Write half of a push: update-requests, push-options and the packfile.
///
/// A request with any create or update command must supply a packfile; a
/// pure-delete request must not.
pub fn send_pack_write(
    server_caps: &CapabilityList,
    req: &PushRequest,
    mut packfile: Option<&mut dyn Read>,
    with_progress: bool,
    writer: &mut dyn Write,
) -> Result<CapabilityList, GitError> {
    req.validate()?;
    if req.is_delete_only() {
        if packfile.is_some() {
            return Err(GitError::InvalidRequest(
                "pure-delete push must not carry a packfile".to_string(),
            ));
        }
    } else if packfile.is_none() {
        return Err(GitError::InvalidRequest(
            "push with creates or updates requires a packfile".to_string(),
        ));
    }

    let caps = push_capabilities(server_caps, req, with_progress)?;
    tracing::debug!(capabilities = %caps, commands = req.commands.len(), "push starting");

    let send_options = caps.supports(&Capability::PushOptions);
    request::encode_update_requests(writer, &caps, req, send_options)
        .map_err(|e| wrap_phase("encoding update-requests", e))?;

    if let Some(pack) = packfile.as_deref_mut() {
        std::io::copy(pack, writer)?;
    }
    writer.flush()?;
    Ok(caps)
}

/// Read half of a push: the report-status, when it was negotiated. Unpack
/// and per-reference failures map to errors after logging each status line.
pub fn send_pack_read(
    negotiated: &CapabilityList,
    progress: Option<ProgressSink>,
    reader: &mut dyn Read,
) -> Result<Option<ReportStatus>, GitError> {
    if !negotiated.supports(&Capability::ReportStatus) {
        return Ok(None);
    }

    let report = match sideband::negotiated_limit(negotiated) {
        Some(limit) => {
            let mut demux = Demuxer::new(reader, limit, progress);
            let mut packets = PktReader::new(&mut demux);
            match ReportStatus::decode(&mut packets) {
                Err(e) => return Err(demux.take_error().unwrap_or(e)),
                Ok(report) => report,
            }
        }
        None => {
            let mut packets = PktReader::new(reader);
            ReportStatus::decode(&mut packets)
                .map_err(|e| wrap_phase("decoding report-status", e))?
        }
    };

    for line in &report.command_statuses {
        tracing::debug!(reference = %line.reference, outcome = ?line.outcome, "push status");
    }
    report.clone().into_result()?;
    Ok(Some(report))
}

/// Merge newly fetched shallow roots: `prior ∪ shallows ∖ unshallows`.
pub fn apply_shallow_update(prior: &[ObjectHash], update: &ShallowUpdate) -> Vec<ObjectHash> {
    let mut merged = prior.to_vec();
    for oid in &update.shallows {
        if !merged.contains(oid) {
            merged.push(*oid);
        }
    }
    merged.retain(|oid| !update.unshallows.contains(oid));
    merged
}

/// The peer may vanish as soon as it has nothing more to say (the no-change
/// flush, or `done` on an empty pack): an EOF or broken pipe from closing
/// the write half is normal termination there.
pub fn tolerate_close_eof(result: Result<(), GitError>) -> Result<(), GitError> {
    match result {
        Ok(()) => Ok(()),
        Err(GitError::IOError(e))
            if e.kind() == std::io::ErrorKind::UnexpectedEof
                || e.kind() == std::io::ErrorKind::BrokenPipe =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn wrap_phase(phase: &str, e: GitError) -> GitError {
    match e {
        GitError::IOError(io) => GitError::IOError(std::io::Error::new(
            io.kind(),
            format!("{phase}: {io}"),
        )),
        GitError::InvalidResponse(msg) => GitError::InvalidResponse(format!("{phase}: {msg}")),
        GitError::InvalidRequest(msg) => GitError::InvalidRequest(format!("{phase}: {msg}")),
        other => other,
    }
}
