//! Reference advertisement codec: the peer's initial announcement of its
//! references, capabilities, symref targets, peeled tags and shallow roots.
//!
//! The wire form is a run of pkt-lines ending in a flush. Capabilities ride
//! behind a NUL on the first line; an empty repository is announced with a
//! synthetic zero-id `capabilities^{}` line so the capability block still has
//! a carrier.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};
use crate::protocol::capability::{Capability, CapabilityList};
use crate::protocol::pktline::{self, Packet, PktReader};
use crate::reference::{HEAD, Reference};

/// Decoded or to-be-encoded reference advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRefs {
    /// Hash algorithm governing zero-id emission.
    pub hash_kind: HashKind,
    /// Protocol version announced through a `version N` line, if any.
    pub version: Option<u8>,
    /// Target of HEAD, when the peer announced one.
    pub head: Option<ObjectHash>,
    pub capabilities: CapabilityList,
    /// Reference name to object id, lexicographically ordered.
    pub refs: BTreeMap<String, ObjectHash>,
    /// Peeled annotated-tag entries, keyed by the tag reference name
    /// (without the `^{}` suffix).
    pub peeled: BTreeMap<String, ObjectHash>,
    /// Shallow roots announced by the peer.
    pub shallows: Vec<ObjectHash>,
}

impl AdvertisedRefs {
    pub fn new(hash_kind: HashKind) -> AdvertisedRefs {
        AdvertisedRefs {
            hash_kind,
            version: None,
            head: None,
            capabilities: CapabilityList::new(),
            refs: BTreeMap::new(),
            peeled: BTreeMap::new(),
            shallows: Vec::new(),
        }
    }

    /// True when the peer announced no references at all. For upload-pack
    /// this is how an empty remote repository manifests.
    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.refs.is_empty()
    }

    /// Materialize the advertisement into reference records: one hash
    /// reference per entry, symbolic references resolved from `symref=`
    /// capabilities, HEAD as either, and (when requested) peeled entries
    /// under their `name^{}` spelling.
    pub fn references(&self, include_peeled: bool) -> Vec<Reference> {
        let mut out = Vec::with_capacity(self.refs.len() + 2);

        let mut symrefs: BTreeMap<String, String> = BTreeMap::new();
        if let Some(values) = self.capabilities.get(&Capability::Symref) {
            for value in values {
                if let Some((from, to)) = value.split_once(':') {
                    symrefs.insert(from.to_string(), to.to_string());
                }
            }
        }

        match symrefs.get(HEAD) {
            Some(target) => out.push(Reference::symbolic(HEAD, target.clone())),
            None => {
                if let Some(oid) = self.head {
                    out.push(Reference::hash(HEAD, oid));
                }
            }
        }

        for (name, oid) in &self.refs {
            out.push(Reference::hash(name.clone(), *oid));
            if let Some(target) = symrefs.get(name) {
                out.push(Reference::symbolic(name.clone(), target.clone()));
            }
        }

        if include_peeled {
            for (name, oid) in &self.peeled {
                out.push(Reference::hash(format!("{name}^{{}}"), *oid));
            }
        }

        out
    }

    /// Encode the advertisement. `smart_http_service` switches on the
    /// stateless-RPC preamble (`# service=<name>` plus flush).
    pub fn encode(
        &self,
        w: &mut dyn Write,
        smart_http_service: Option<&str>,
    ) -> Result<(), GitError> {
        if let Some(service) = smart_http_service {
            pktline::write_text(w, &format!("# service={service}\n"))?;
            pktline::write_flush(w)?;
        }
        if let Some(version) = self.version {
            if version >= 1 {
                pktline::write_text(w, &format!("version {version}\n"))?;
            }
        }

        let caps = self.capabilities.to_string();
        let mut first_written = false;
        if let Some(head) = self.head {
            pktline::write_text(w, &format!("{head} {HEAD}\0{caps}\n"))?;
            first_written = true;
        }

        for (name, oid) in &self.refs {
            if first_written {
                pktline::write_text(w, &format!("{oid} {name}\n"))?;
            } else {
                pktline::write_text(w, &format!("{oid} {name}\0{caps}\n"))?;
                first_written = true;
            }
            if let Some(peeled) = self.peeled.get(name) {
                pktline::write_text(w, &format!("{peeled} {name}^{{}}\n"))?;
            }
        }

        if !first_written {
            // No references: a synthetic zero-id line still carries the
            // capability block.
            let zero = ObjectHash::zero(self.hash_kind);
            pktline::write_text(w, &format!("{zero} capabilities^{{}}\0{caps}\n"))?;
        }

        for oid in &self.shallows {
            pktline::write_text(w, &format!("shallow {oid}\n"))?;
        }

        pktline::write_flush(w)?;
        Ok(())
    }

    /// Decode an advertisement, reading up to and including its flush.
    /// Accepts the smart-HTTP preamble, a `version N` line, `ERR` lines
    /// (surfaced as [`GitError::Remote`]) and shallow lines. A flush as the
    /// very first packet yields an empty advertisement, which callers use to
    /// distinguish an empty remote from an error.
    pub fn decode<R: Read>(hash_kind: HashKind, r: &mut PktReader<R>) -> Result<AdvertisedRefs, GitError> {
        let mut ad = AdvertisedRefs::new(hash_kind);
        let mut seen_first = false;

        loop {
            let packet = r.read_packet()?;
            let line = match &packet {
                Packet::Flush => break,
                Packet::Data(_) => packet.text().expect("data packet has text"),
                _ => {
                    return Err(GitError::InvalidResponse(
                        "unexpected control packet in advertisement".to_string(),
                    ));
                }
            };

            if let Some(rest) = line.strip_prefix("ERR ") {
                return Err(GitError::Remote(rest.to_string()));
            }
            if !seen_first && line.starts_with("# service=") {
                // Smart-HTTP preamble; the flush that follows it terminates
                // the preamble section, not the advertisement.
                match r.read_packet()? {
                    Packet::Flush => continue,
                    _ => {
                        return Err(GitError::InvalidResponse(
                            "missing flush after service preamble".to_string(),
                        ));
                    }
                }
            }
            if !seen_first && line.starts_with("version ") {
                let v = line["version ".len()..].trim();
                ad.version = Some(v.parse::<u8>().map_err(|_| {
                    GitError::InvalidResponse(format!("bad version line `{line}`"))
                })?);
                continue;
            }

            let (entry, caps) = match line.split_once('\0') {
                Some((entry, caps)) => (entry, Some(caps)),
                None => (line.as_str(), None),
            };
            if let Some(caps) = caps {
                if seen_first {
                    return Err(GitError::InvalidResponse(
                        "capability block after the first line".to_string(),
                    ));
                }
                ad.capabilities = CapabilityList::decode(caps)?;
            }
            seen_first = true;

            if let Some(hex) = entry.strip_prefix("shallow ") {
                ad.shallows.push(ObjectHash::from_str(hex.trim())?);
                continue;
            }

            let (hex, name) = entry.split_once(' ').ok_or_else(|| {
                GitError::InvalidResponse(format!("malformed advertisement line `{entry}`"))
            })?;
            let oid = ObjectHash::from_str(hex)?;

            if name == "capabilities^{}" {
                // Synthetic empty-repository line; nothing to record.
                continue;
            } else if name == HEAD {
                ad.head = Some(oid);
            } else if let Some(base) = name.strip_suffix("^{}") {
                ad.peeled.insert(base.to_string(), oid);
            } else {
                ad.refs.insert(name.to_string(), oid);
            }
        }

        Ok(ad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capability::DEFAULT_AGENT;

    fn oid(byte: u8) -> ObjectHash {
        ObjectHash::from_bytes(HashKind::Sha1, &[byte; 20]).unwrap()
    }

    fn sample() -> AdvertisedRefs {
        let mut ad = AdvertisedRefs::new(HashKind::Sha1);
        ad.head = Some(oid(0x11));
        ad.capabilities
            .add(Capability::Symref, Some("HEAD:refs/heads/main"))
            .unwrap();
        ad.capabilities
            .add(Capability::Agent, Some(DEFAULT_AGENT))
            .unwrap();
        ad.capabilities.add(Capability::OfsDelta, None).unwrap();
        ad.refs.insert("refs/heads/main".to_string(), oid(0x11));
        ad.refs.insert("refs/tags/v1.0".to_string(), oid(0x22));
        ad.peeled.insert("refs/tags/v1.0".to_string(), oid(0x33));
        ad
    }

    /// Encode then decode reproduces the advertisement, capability arguments
    /// and peeled entries included.
    #[test]
    fn round_trip() {
        let ad = sample();
        let mut wire = Vec::new();
        ad.encode(&mut wire, None).unwrap();

        let mut reader = PktReader::new(wire.as_slice());
        let decoded = AdvertisedRefs::decode(HashKind::Sha1, &mut reader).unwrap();
        assert_eq!(decoded, ad);
    }

    /// The smart-HTTP preamble is consumed transparently.
    #[test]
    fn round_trip_with_preamble() {
        let ad = sample();
        let mut wire = Vec::new();
        ad.encode(&mut wire, Some("git-upload-pack")).unwrap();
        assert!(wire.starts_with(b"001e# service=git-upload-pack\n0000"));

        let mut reader = PktReader::new(wire.as_slice());
        let decoded = AdvertisedRefs::decode(HashKind::Sha1, &mut reader).unwrap();
        assert_eq!(decoded, ad);
    }

    /// An empty repository encodes the synthetic capabilities line and
    /// decodes back as empty.
    #[test]
    fn empty_repository() {
        let mut ad = AdvertisedRefs::new(HashKind::Sha1);
        ad.capabilities.add(Capability::OfsDelta, None).unwrap();
        let mut wire = Vec::new();
        ad.encode(&mut wire, None).unwrap();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("0000000000000000000000000000000000000000 capabilities^{}"));

        let mut reader = PktReader::new(wire.as_slice());
        let decoded = AdvertisedRefs::decode(HashKind::Sha1, &mut reader).unwrap();
        assert!(decoded.is_empty());
        assert!(decoded.capabilities.supports(&Capability::OfsDelta));
    }

    /// A flush as the very first packet is an empty advertisement.
    #[test]
    fn immediate_flush_is_empty() {
        let mut wire = Vec::new();
        pktline::write_flush(&mut wire).unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        let decoded = AdvertisedRefs::decode(HashKind::Sha1, &mut reader).unwrap();
        assert!(decoded.is_empty());
        assert!(decoded.capabilities.is_empty());
    }

    /// `ERR` lines become remote errors.
    #[test]
    fn err_line_is_remote_error() {
        let mut wire = Vec::new();
        pktline::write_text(&mut wire, "ERR repository unavailable\n").unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        assert!(matches!(
            AdvertisedRefs::decode(HashKind::Sha1, &mut reader),
            Err(GitError::Remote(msg)) if msg == "repository unavailable"
        ));
    }

    /// Symrefs resolve into symbolic reference records; peeled entries are
    /// kept only on request.
    #[test]
    fn references_materialization() {
        let ad = sample();
        let refs = ad.references(true);
        assert!(refs.iter().any(
            |r| matches!(r, Reference::Symbolic { name, target } if name == "HEAD" && target == "refs/heads/main")
        ));
        assert!(refs.iter().any(|r| r.name() == "refs/tags/v1.0^{}"));

        let without = ad.references(false);
        assert!(!without.iter().any(|r| r.name().ends_with("^{}")));
    }

    /// Shallow lines decode into the shallow set.
    #[test]
    fn shallow_lines() {
        let mut ad = sample();
        ad.shallows.push(oid(0x44));
        let mut wire = Vec::new();
        ad.encode(&mut wire, None).unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        let decoded = AdvertisedRefs::decode(HashKind::Sha1, &mut reader).unwrap();
        assert_eq!(decoded.shallows, vec![oid(0x44)]);
    }

    /// Version lines are recorded for protocol 1 and above.
    #[test]
    fn version_line() {
        let mut ad = sample();
        ad.version = Some(1);
        let mut wire = Vec::new();
        ad.encode(&mut wire, None).unwrap();
        let mut reader = PktReader::new(wire.as_slice());
        let decoded = AdvertisedRefs::decode(HashKind::Sha1, &mut reader).unwrap();
        assert_eq!(decoded.version, Some(1));
    }
}
