//! Request codecs for both directions of the wire protocol: the fetch
//! upload-request (wants, haves, shallow lines, depth), the push
//! update-requests (reference commands, push options), the shallow-update
//! block, the ACK/NAK server response, and the push report-status.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::protocol::capability::CapabilityList;
use crate::protocol::pktline::{self, Packet, PktReader};

/// How many `have` lines ride between flushes in full-duplex negotiation.
pub const HAVES_PER_ROUND: usize = 32;

/// Depth selector of a fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Depth {
    /// Unlimited history.
    #[default]
    None,
    /// At most this many commits from each want.
    Commits(u32),
    /// Commits newer than a Unix timestamp (`deepen-since`).
    Since(i64),
    /// Commits not reachable from a reference (`deepen-not`).
    Not(String),
}

impl Depth {
    pub fn is_none(&self) -> bool {
        matches!(self, Depth::None)
    }
}

/// A fetch request: what the client wants, what it already has, and how deep
/// the history should reach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub wants: BTreeSet<ObjectHash>,
    pub haves: BTreeSet<ObjectHash>,
    /// The client's current shallow roots, announced as `shallow` lines.
    pub shallows: Vec<ObjectHash>,
    pub depth: Depth,
    pub include_tags: bool,
}

impl FetchRequest {
    /// A fetch with no wants cannot be encoded.
    pub fn validate(&self) -> Result<(), GitError> {
        if self.wants.is_empty() {
            return Err(GitError::InvalidRequest("fetch with no wants".to_string()));
        }
        Ok(())
    }

    /// True when the server has nothing the client is missing and no depth
    /// adjustment was requested: the short-circuit path of negotiation.
    pub fn is_no_change(&self) -> bool {
        self.depth.is_none()
            && self.shallows.is_empty()
            && self.wants.iter().all(|w| self.haves.contains(w))
    }
}

/// Encode the upload-request section: wants (capabilities on the first),
/// shallow lines, at most one deepen line, then a flush.
pub fn encode_upload_request(
    w: &mut dyn Write,
    caps: &CapabilityList,
    req: &FetchRequest,
) -> Result<(), GitError> {
    req.validate()?;
    let mut first = true;
    for want in &req.wants {
        if first {
            pktline::write_text(w, &format!("want {want} {caps}\n"))?;
            first = false;
        } else {
            pktline::write_text(w, &format!("want {want}\n"))?;
        }
    }
    for shallow in &req.shallows {
        pktline::write_text(w, &format!("shallow {shallow}\n"))?;
    }
    match &req.depth {
        Depth::None => {}
        Depth::Commits(n) => pktline::write_text(w, &format!("deepen {n}\n"))?,
        Depth::Since(ts) => pktline::write_text(w, &format!("deepen-since {ts}\n"))?,
        Depth::Not(name) => pktline::write_text(w, &format!("deepen-not {name}\n"))?,
    }
    pktline::write_flush(w)?;
    Ok(())
}

/// Decode the upload-request section up to its flush, returning the request
/// and the capability list from the first want line.
pub fn decode_upload_request<R: Read>(
    r: &mut PktReader<R>,
) -> Result<(FetchRequest, CapabilityList), GitError> {
    let mut req = FetchRequest::default();
    let mut caps = CapabilityList::new();
    let mut first = true;

    loop {
        let packet = r.read_packet()?;
        let line = match &packet {
            Packet::Flush => break,
            Packet::Data(_) => packet.text().expect("data packet has text"),
            _ => {
                return Err(GitError::InvalidRequest(
                    "unexpected control packet in upload-request".to_string(),
                ));
            }
        };

        if let Some(rest) = line.strip_prefix("want ") {
            let (hex, cap_text) = match rest.split_once(' ') {
                Some((hex, cap_text)) => (hex, Some(cap_text)),
                None => (rest, None),
            };
            req.wants.insert(ObjectHash::from_str(hex)?);
            if first {
                if let Some(cap_text) = cap_text {
                    caps = CapabilityList::decode(cap_text)?;
                }
                first = false;
            }
        } else if let Some(hex) = line.strip_prefix("shallow ") {
            req.shallows.push(ObjectHash::from_str(hex.trim())?);
        } else if let Some(n) = line.strip_prefix("deepen ") {
            req.depth = Depth::Commits(n.trim().parse().map_err(|_| {
                GitError::InvalidRequest(format!("bad deepen count `{n}`"))
            })?);
        } else if let Some(ts) = line.strip_prefix("deepen-since ") {
            req.depth = Depth::Since(ts.trim().parse().map_err(|_| {
                GitError::InvalidRequest(format!("bad deepen-since timestamp `{ts}`"))
            })?);
        } else if let Some(name) = line.strip_prefix("deepen-not ") {
            req.depth = Depth::Not(name.trim().to_string());
        } else {
            return Err(GitError::InvalidRequest(format!(
                "unexpected upload-request line `{line}`"
            )));
        }
    }

    Ok((req, caps))
}

/// Encode the have section. Full-duplex peers get a flush after every round
/// of [`HAVES_PER_ROUND`] haves and after the final partial round;
/// stateless-RPC peers must NOT see a trailing flush, which HTTP servers
/// read as "no more rounds" and answer without a packfile.
pub fn encode_haves(
    w: &mut dyn Write,
    haves: &BTreeSet<ObjectHash>,
    stateless_rpc: bool,
) -> Result<(), GitError> {
    for (i, have) in haves.iter().enumerate() {
        if i > 0 && i % HAVES_PER_ROUND == 0 && !stateless_rpc {
            pktline::write_flush(w)?;
        }
        pktline::write_text(w, &format!("have {have}\n"))?;
    }
    if !stateless_rpc && !haves.is_empty() {
        pktline::write_flush(w)?;
    }
    pktline::write_text(w, "done\n")?;
    Ok(())
}

/// Server side of the have loop: consume haves (and interleaved round
/// flushes) until `done`. A clean EOF counts as done, covering stateless
/// clients that close after writing.
pub fn decode_haves<R: Read>(r: &mut PktReader<R>) -> Result<BTreeSet<ObjectHash>, GitError> {
    let mut haves = BTreeSet::new();
    loop {
        let packet = match r.try_read_packet()? {
            None => break,
            Some(p) => p,
        };
        let line = match &packet {
            Packet::Flush => continue,
            Packet::Data(_) => packet.text().expect("data packet has text"),
            _ => {
                return Err(GitError::InvalidRequest(
                    "unexpected control packet in have section".to_string(),
                ));
            }
        };
        if line == "done" {
            break;
        }
        if let Some(hex) = line.strip_prefix("have ") {
            haves.insert(ObjectHash::from_str(hex.trim())?);
        } else {
            return Err(GitError::InvalidRequest(format!(
                "unexpected have-section line `{line}`"
            )));
        }
    }
    Ok(haves)
}

/// Shallow boundary changes reported by the server after a deepen request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShallowUpdate {
    pub shallows: Vec<ObjectHash>,
    pub unshallows: Vec<ObjectHash>,
}

impl ShallowUpdate {
    pub fn is_empty(&self) -> bool {
        self.shallows.is_empty() && self.unshallows.is_empty()
    }

    /// Encode `shallow`/`unshallow` lines followed by a flush.
    pub fn encode(&self, w: &mut dyn Write) -> Result<(), GitError> {
        for oid in &self.shallows {
            pktline::write_text(w, &format!("shallow {oid}\n"))?;
        }
        for oid in &self.unshallows {
            pktline::write_text(w, &format!("unshallow {oid}\n"))?;
        }
        pktline::write_flush(w)?;
        Ok(())
    }

    /// Decode a shallow-update block up to its flush.
    pub fn decode<R: Read>(r: &mut PktReader<R>) -> Result<ShallowUpdate, GitError> {
        let mut update = ShallowUpdate::default();
        loop {
            let packet = r.read_packet()?;
            let line = match &packet {
                Packet::Flush => break,
                Packet::Data(_) => packet.text().expect("data packet has text"),
                _ => {
                    return Err(GitError::InvalidResponse(
                        "unexpected control packet in shallow-update".to_string(),
                    ));
                }
            };
            if let Some(hex) = line.strip_prefix("shallow ") {
                update.shallows.push(ObjectHash::from_str(hex.trim())?);
            } else if let Some(hex) = line.strip_prefix("unshallow ") {
                update.unshallows.push(ObjectHash::from_str(hex.trim())?);
            } else {
                return Err(GitError::InvalidResponse(format!(
                    "unexpected shallow-update line `{line}`"
                )));
            }
        }
        Ok(update)
    }
}

/// Client side of the server ACK/NAK block: reads continuation ACKs until the
/// final NAK (or final ACK) that precedes the packfile.
pub fn decode_server_acks<R: Read>(r: &mut PktReader<R>) -> Result<(), GitError> {
    loop {
        let packet = r.read_packet()?;
        let line = match &packet {
            Packet::Flush => continue,
            Packet::Data(_) => packet.text().expect("data packet has text"),
            _ => {
                return Err(GitError::InvalidResponse(
                    "unexpected control packet in server response".to_string(),
                ));
            }
        };
        if line == "NAK" {
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("ACK ") {
            // Continuation ACKs carry a status suffix; a bare `ACK <oid>` is
            // final and also precedes the packfile.
            if !rest.trim_end().contains(' ') {
                return Ok(());
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("ERR ") {
            return Err(GitError::Remote(rest.to_string()));
        }
        return Err(GitError::InvalidResponse(format!(
            "expected ACK or NAK, got `{line}`"
        )));
    }
}

/// What a push command does to its reference, derived from the zero-OID
/// convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Create,
    Delete,
    Update,
    /// Both sides zero: meaningless and rejected by validation.
    Invalid,
}

/// One reference mutation of a push: `{name, old, new}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCommand {
    pub name: String,
    pub old: ObjectHash,
    pub new: ObjectHash,
}

impl RefCommand {
    pub fn new(name: impl Into<String>, old: ObjectHash, new: ObjectHash) -> RefCommand {
        RefCommand {
            name: name.into(),
            old,
            new,
        }
    }

    pub fn action(&self) -> CommandAction {
        match (self.old.is_zero(), self.new.is_zero()) {
            (true, false) => CommandAction::Create,
            (false, true) => CommandAction::Delete,
            (false, false) => CommandAction::Update,
            (true, true) => CommandAction::Invalid,
        }
    }
}

/// A push request: the command list plus negotiated behavior flags.
#[derive(Debug, Clone, Default)]
pub struct PushRequest {
    pub commands: Vec<RefCommand>,
    /// All-or-nothing application on the receiving side.
    pub atomic: bool,
    /// Ask the server to keep quiet on its progress channel.
    pub quiet: bool,
    /// Ordered opaque option strings, forwarded when `push-options` is
    /// negotiated.
    pub push_options: Vec<String>,
}

impl PushRequest {
    /// Reject empty pushes, invalid commands and duplicate reference names.
    pub fn validate(&self) -> Result<(), GitError> {
        if self.commands.is_empty() {
            return Err(GitError::InvalidRequest("push with no commands".to_string()));
        }
        let mut seen = BTreeSet::new();
        for command in &self.commands {
            if command.action() == CommandAction::Invalid {
                return Err(GitError::InvalidRequest(format!(
                    "command for `{}` has zero old and new ids",
                    command.name
                )));
            }
            if !seen.insert(command.name.as_str()) {
                return Err(GitError::InvalidRequest(format!(
                    "duplicate command for reference `{}`",
                    command.name
                )));
            }
        }
        Ok(())
    }

    /// True when every command is a delete, meaning no packfile accompanies
    /// the request.
    pub fn is_delete_only(&self) -> bool {
        self.commands
            .iter()
            .all(|c| c.action() == CommandAction::Delete)
    }
}

/// Encode the update-requests section: `OLD SP NEW SP NAME` lines with the
/// capability block on the first, then a flush, then (when negotiated) the
/// push-options block with its own flush.
pub fn encode_update_requests(
    w: &mut dyn Write,
    caps: &CapabilityList,
    req: &PushRequest,
    send_options: bool,
) -> Result<(), GitError> {
    req.validate()?;
    let mut first = true;
    for command in &req.commands {
        if first {
            pktline::write_text(
                w,
                &format!("{} {} {}\0{caps}\n", command.old, command.new, command.name),
            )?;
            first = false;
        } else {
            pktline::write_text(
                w,
                &format!("{} {} {}\n", command.old, command.new, command.name),
            )?;
        }
    }
    pktline::write_flush(w)?;

    if send_options {
        for option in &req.push_options {
            pktline::write_text(w, &format!("{option}\n"))?;
        }
        pktline::write_flush(w)?;
    }
    Ok(())
}

/// Decode update-requests up to the flush, returning the commands and the
/// capability list from the first line. A flush as the very first packet
/// yields an empty command list (the client had nothing to push).
pub fn decode_update_requests<R: Read>(
    r: &mut PktReader<R>,
) -> Result<(Vec<RefCommand>, CapabilityList), GitError> {
    let mut commands = Vec::new();
    let mut caps = CapabilityList::new();
    let mut first = true;

    loop {
        let packet = r.read_packet()?;
        let line = match &packet {
            Packet::Flush => break,
            Packet::Data(_) => packet.text().expect("data packet has text"),
            _ => {
                return Err(GitError::InvalidRequest(
                    "unexpected control packet in update-requests".to_string(),
                ));
            }
        };

        let (entry, cap_text) = match line.split_once('\0') {
            Some((entry, cap_text)) => (entry, Some(cap_text)),
            None => (line.as_str(), None),
        };
        if first {
            if let Some(cap_text) = cap_text {
                caps = CapabilityList::decode(cap_text)?;
            }
            first = false;
        }

        let mut fields = entry.splitn(3, ' ');
        let (old, new, name) = match (fields.next(), fields.next(), fields.next()) {
            (Some(old), Some(new), Some(name)) if !name.is_empty() => (old, new, name),
            _ => {
                return Err(GitError::InvalidRequest(format!(
                    "malformed update-request line `{entry}`"
                )));
            }
        };
        commands.push(RefCommand::new(
            name,
            ObjectHash::from_str(old)?,
            ObjectHash::from_str(new)?,
        ));
    }

    Ok((commands, caps))
}

/// Decode the push-options block (lines until flush).
pub fn decode_push_options<R: Read>(r: &mut PktReader<R>) -> Result<Vec<String>, GitError> {
    let mut options = Vec::new();
    loop {
        let packet = r.read_packet()?;
        match &packet {
            Packet::Flush => break,
            Packet::Data(_) => options.push(packet.text().expect("data packet has text")),
            _ => {
                return Err(GitError::InvalidRequest(
                    "unexpected control packet in push-options".to_string(),
                ));
            }
        }
    }
    Ok(options)
}

/// Outcome of one push command as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Ok,
    Failed(String),
}

/// One `ok <ref>` / `ng <ref> <reason>` line of a report-status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatusLine {
    pub reference: String,
    pub outcome: CommandOutcome,
}

/// The server's answer to a push when `report-status` was negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    /// `ok`, or the pack indexing error message.
    pub unpack_status: String,
    pub command_statuses: Vec<CommandStatusLine>,
}

impl ReportStatus {
    pub fn ok(references: impl IntoIterator<Item = String>) -> ReportStatus {
        ReportStatus {
            unpack_status: "ok".to_string(),
            command_statuses: references
                .into_iter()
                .map(|reference| CommandStatusLine {
                    reference,
                    outcome: CommandOutcome::Ok,
                })
                .collect(),
        }
    }

    /// Encode `unpack <status>`, one line per command, and a flush.
    pub fn encode(&self, w: &mut dyn Write) -> Result<(), GitError> {
        pktline::write_text(w, &format!("unpack {}\n", self.unpack_status))?;
        for line in &self.command_statuses {
            match &line.outcome {
                CommandOutcome::Ok => {
                    pktline::write_text(w, &format!("ok {}\n", line.reference))?;
                }
                CommandOutcome::Failed(reason) => {
                    pktline::write_text(w, &format!("ng {} {}\n", line.reference, reason))?;
                }
            }
        }
        pktline::write_flush(w)?;
        Ok(())
    }

    /// Decode a report-status up to its flush (or clean EOF).
    pub fn decode<R: Read>(r: &mut PktReader<R>) -> Result<ReportStatus, GitError> {
        let first = r.read_packet()?;
        let unpack_line = first.text().ok_or_else(|| {
            GitError::InvalidResponse("expected unpack status line".to_string())
        })?;
        let unpack_status = unpack_line
            .strip_prefix("unpack ")
            .ok_or_else(|| {
                GitError::InvalidResponse(format!("expected `unpack`, got `{unpack_line}`"))
            })?
            .to_string();

        let mut command_statuses = Vec::new();
        loop {
            let packet = match r.try_read_packet()? {
                None => break,
                Some(Packet::Flush) => break,
                Some(p) => p,
            };
            let line = packet.text().ok_or_else(|| {
                GitError::InvalidResponse("unexpected control packet in report-status".to_string())
            })?;
            if let Some(reference) = line.strip_prefix("ok ") {
                command_statuses.push(CommandStatusLine {
                    reference: reference.to_string(),
                    outcome: CommandOutcome::Ok,
                });
            } else if let Some(rest) = line.strip_prefix("ng ") {
                let (reference, reason) = rest.split_once(' ').unwrap_or((rest, "failed"));
                command_statuses.push(CommandStatusLine {
                    reference: reference.to_string(),
                    outcome: CommandOutcome::Failed(reason.to_string()),
                });
            } else {
                return Err(GitError::InvalidResponse(format!(
                    "unexpected report-status line `{line}`"
                )));
            }
        }

        Ok(ReportStatus {
            unpack_status,
            command_statuses,
        })
    }

    /// Collapse the report into a single result: a non-ok unpack status or
    /// any failed reference becomes an error naming the causes.
    pub fn into_result(self) -> Result<(), GitError> {
        if self.unpack_status != "ok" {
            return Err(GitError::Remote(format!(
                "unpack error: {}",
                self.unpack_status
            )));
        }
        let failures: Vec<String> = self
            .command_statuses
            .iter()
            .filter_map(|line| match &line.outcome {
                CommandOutcome::Failed(reason) => {
                    Some(format!("{}: {}", line.reference, reason))
                }
                CommandOutcome::Ok => None,
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GitError::Remote(format!(
                "reference update rejected: {}",
                failures.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;
    use crate::protocol::capability::Capability;

    fn oid(byte: u8) -> ObjectHash {
        ObjectHash::from_bytes(HashKind::Sha1, &[byte; 20]).unwrap()
    }

    /// Upload-request round-trips with capabilities, shallows and depth.
    #[test]
    fn upload_request_round_trip() {
        let mut req = FetchRequest::default();
        req.wants.insert(oid(0x11));
        req.wants.insert(oid(0x22));
        req.shallows.push(oid(0x33));
        req.depth = Depth::Commits(5);

        let mut caps = CapabilityList::new();
        caps.add(Capability::OfsDelta, None).unwrap();
        caps.add(Capability::Shallow, None).unwrap();

        let mut wire = Vec::new();
        encode_upload_request(&mut wire, &caps, &req).unwrap();

        let mut reader = PktReader::new(wire.as_slice());
        let (decoded, decoded_caps) = decode_upload_request(&mut reader).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded_caps, caps);
    }

    /// Both deepen-since and deepen-not encode and decode.
    #[test]
    fn depth_forms() {
        for depth in [Depth::Since(1700000000), Depth::Not("refs/heads/old".to_string())] {
            let mut req = FetchRequest::default();
            req.wants.insert(oid(0x11));
            req.depth = depth.clone();
            let mut wire = Vec::new();
            encode_upload_request(&mut wire, &CapabilityList::new(), &req).unwrap();
            let mut reader = PktReader::new(wire.as_slice());
            let (decoded, _) = decode_upload_request(&mut reader).unwrap();
            assert_eq!(decoded.depth, depth);
        }
    }

    /// A fetch without wants does not encode.
    #[test]
    fn empty_wants_rejected() {
        let req = FetchRequest::default();
        let mut wire = Vec::new();
        assert!(matches!(
            encode_upload_request(&mut wire, &CapabilityList::new(), &req),
            Err(GitError::InvalidRequest(_))
        ));
    }

    /// Full-duplex haves end with a flush before done; stateless ones do not.
    #[test]
    fn haves_flush_discipline() {
        let haves: BTreeSet<_> = [oid(0x0a), oid(0x0b)].into();

        let mut full = Vec::new();
        encode_haves(&mut full, &haves, false).unwrap();
        let text = String::from_utf8_lossy(&full);
        assert!(text.contains("0000"));
        assert!(text.ends_with("0009done\n"));

        let mut stateless = Vec::new();
        encode_haves(&mut stateless, &haves, true).unwrap();
        let text = String::from_utf8_lossy(&stateless);
        assert!(!text.contains("0000"));
        assert!(text.ends_with("0009done\n"));
    }

    /// More haves than one round inserts intermediate flushes (full-duplex).
    #[test]
    fn haves_round_grouping() {
        let haves: BTreeSet<_> = (0..40u8).map(oid).collect();
        let mut wire = Vec::new();
        encode_haves(&mut wire, &haves, false).unwrap();

        let mut reader = PktReader::new(wire.as_slice());
        let decoded = decode_haves(&mut reader).unwrap();
        assert_eq!(decoded, haves);
    }

    /// Shallow-update blocks round-trip.
    #[test]
    fn shallow_update_round_trip() {
        let update = ShallowUpdate {
            shallows: vec![oid(0x01)],
            unshallows: vec![oid(0x02), oid(0x03)],
        };
        let mut wire = Vec::new();
        update.encode(&mut wire).unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        assert_eq!(ShallowUpdate::decode(&mut reader).unwrap(), update);
    }

    /// The ack decoder stops at NAK and at a final bare ACK.
    #[test]
    fn server_acks() {
        let mut wire = Vec::new();
        pktline::write_text(&mut wire, &format!("ACK {} common\n", oid(0x0a))).unwrap();
        pktline::write_text(&mut wire, "NAK\n").unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        decode_server_acks(&mut reader).unwrap();

        let mut wire = Vec::new();
        pktline::write_text(&mut wire, &format!("ACK {}\n", oid(0x0a))).unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        decode_server_acks(&mut reader).unwrap();
    }

    /// Command actions derive from the zero-OID convention.
    #[test]
    fn command_actions() {
        let zero = ObjectHash::zero(HashKind::Sha1);
        assert_eq!(RefCommand::new("r", zero, oid(1)).action(), CommandAction::Create);
        assert_eq!(RefCommand::new("r", oid(1), zero).action(), CommandAction::Delete);
        assert_eq!(RefCommand::new("r", oid(1), oid(2)).action(), CommandAction::Update);
        assert_eq!(RefCommand::new("r", zero, zero).action(), CommandAction::Invalid);
    }

    /// Duplicate reference names are rejected at validation time.
    #[test]
    fn duplicate_commands_rejected() {
        let zero = ObjectHash::zero(HashKind::Sha1);
        let req = PushRequest {
            commands: vec![
                RefCommand::new("refs/heads/main", zero, oid(1)),
                RefCommand::new("refs/heads/main", zero, oid(2)),
            ],
            ..Default::default()
        };
        assert!(matches!(
            req.validate(),
            Err(GitError::InvalidRequest(_))
        ));
    }

    /// Update-requests round-trip including push options.
    #[test]
    fn update_requests_round_trip() {
        let zero = ObjectHash::zero(HashKind::Sha1);
        let req = PushRequest {
            commands: vec![
                RefCommand::new("refs/heads/x", zero, oid(0x01)),
                RefCommand::new("refs/heads/master", oid(0xab), oid(0xef)),
            ],
            push_options: vec!["ci.skip".to_string(), "reviewer=alice".to_string()],
            ..Default::default()
        };
        let mut caps = CapabilityList::new();
        caps.add(Capability::ReportStatus, None).unwrap();
        caps.add(Capability::PushOptions, None).unwrap();

        let mut wire = Vec::new();
        encode_update_requests(&mut wire, &caps, &req, true).unwrap();

        let mut reader = PktReader::new(wire.as_slice());
        let (commands, decoded_caps) = decode_update_requests(&mut reader).unwrap();
        assert_eq!(commands, req.commands);
        assert!(decoded_caps.supports(&Capability::PushOptions));
        let options = decode_push_options(&mut reader).unwrap();
        assert_eq!(options, req.push_options);
    }

    /// Report-status round-trips and collapses failures into an error.
    #[test]
    fn report_status_round_trip() {
        let report = ReportStatus {
            unpack_status: "ok".to_string(),
            command_statuses: vec![
                CommandStatusLine {
                    reference: "refs/heads/x".to_string(),
                    outcome: CommandOutcome::Ok,
                },
                CommandStatusLine {
                    reference: "refs/heads/master".to_string(),
                    outcome: CommandOutcome::Failed("non-fast-forward".to_string()),
                },
            ],
        };
        let mut wire = Vec::new();
        report.encode(&mut wire).unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        let decoded = ReportStatus::decode(&mut reader).unwrap();
        assert_eq!(decoded, report);
        assert!(decoded.into_result().is_err());

        let all_ok = ReportStatus::ok(vec!["refs/heads/x".to_string()]);
        assert!(all_ok.into_result().is_ok());
    }
}
