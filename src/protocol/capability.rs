//! Protocol capability names and the negotiated capability list.
//!
//! Capabilities ride on the first line of the reference advertisement (after
//! a NUL) and on the first want/command line of a request. A list never holds
//! the same name twice, but a single capability may carry multiple values
//! when its cardinality permits (only `symref` today). Unknown names decode
//! without error to stay forward compatible.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::GitError;

/// Agent string sent whenever the peer advertises `agent`.
pub const DEFAULT_AGENT: &str = concat!("git-wire/", env!("CARGO_PKG_VERSION"));

/// Git protocol capabilities known to this crate, plus a forward-compatible
/// catch-all.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Multi-ack capability for upload-pack negotiation
    MultiAck,
    /// Multi-ack-detailed capability for more granular acknowledgment
    MultiAckDetailed,
    /// No-done capability to optimize upload-pack negotiation
    NoDone,
    /// Thin-pack capability for packs with external delta bases
    ThinPack,
    /// Side-band capability for multiplexing data streams (1000-byte frames)
    SideBand,
    /// Side-band-64k capability for larger side-band frames
    SideBand64k,
    /// OFS-delta capability for offset-based delta compression
    OfsDelta,
    /// Shallow capability for depth-limited fetches
    Shallow,
    /// Deepen-since capability for time-based depth
    DeepenSince,
    /// Deepen-not capability for exclusion-based depth
    DeepenNot,
    /// Deepen-relative capability for relative depth specification
    DeepenRelative,
    /// No-progress capability to disable progress reporting
    NoProgress,
    /// Include-tag capability for automatic annotated-tag inclusion
    IncludeTag,
    /// Report-status capability for push status reporting
    ReportStatus,
    /// Report-status-v2 capability for enhanced push status reporting
    ReportStatusV2,
    /// Delete-refs capability for reference deletion
    DeleteRefs,
    /// Quiet capability to suppress server output
    Quiet,
    /// Atomic capability for all-or-nothing pushes
    Atomic,
    /// Push-options capability for additional push metadata
    PushOptions,
    /// Agent capability for client/server identification
    Agent,
    /// Symref capability describing symbolic reference targets
    Symref,
    /// Object-format capability for specifying the hash algorithm
    ObjectFormat,
    /// Session-id capability for session tracking
    SessionId,
    /// Push-cert capability for signed pushes
    PushCert,
    /// Filter capability for partial fetch support
    Filter,
    /// Allow-tip-sha1-in-want capability for fetching hidden tips
    AllowTipSha1InWant,
    /// Allow-reachable-sha1-in-want capability for fetching reachable commits
    AllowReachableSha1InWant,
    /// Unknown capability retained for forward compatibility
    Unknown(String),
}

impl Capability {
    /// Wire name of the capability.
    pub fn as_str(&self) -> &str {
        match self {
            Capability::MultiAck => "multi_ack",
            Capability::MultiAckDetailed => "multi_ack_detailed",
            Capability::NoDone => "no-done",
            Capability::ThinPack => "thin-pack",
            Capability::SideBand => "side-band",
            Capability::SideBand64k => "side-band-64k",
            Capability::OfsDelta => "ofs-delta",
            Capability::Shallow => "shallow",
            Capability::DeepenSince => "deepen-since",
            Capability::DeepenNot => "deepen-not",
            Capability::DeepenRelative => "deepen-relative",
            Capability::NoProgress => "no-progress",
            Capability::IncludeTag => "include-tag",
            Capability::ReportStatus => "report-status",
            Capability::ReportStatusV2 => "report-status-v2",
            Capability::DeleteRefs => "delete-refs",
            Capability::Quiet => "quiet",
            Capability::Atomic => "atomic",
            Capability::PushOptions => "push-options",
            Capability::Agent => "agent",
            Capability::Symref => "symref",
            Capability::ObjectFormat => "object-format",
            Capability::SessionId => "session-id",
            Capability::PushCert => "push-cert",
            Capability::Filter => "filter",
            Capability::AllowTipSha1InWant => "allow-tip-sha1-in-want",
            Capability::AllowReachableSha1InWant => "allow-reachable-sha1-in-want",
            Capability::Unknown(name) => name,
        }
    }

    /// Whether the capability carries a value. The wire token is then
    /// `name=value` instead of a bare `name`.
    fn takes_argument(&self) -> bool {
        matches!(
            self,
            Capability::Agent
                | Capability::Symref
                | Capability::ObjectFormat
                | Capability::SessionId
                | Capability::PushCert
        )
    }

    /// Whether the capability may appear with several values.
    fn allows_multiple(&self) -> bool {
        matches!(self, Capability::Symref)
    }

    fn is_known(&self) -> bool {
        !matches!(self, Capability::Unknown(_))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = std::convert::Infallible;

    /// Never fails: unrecognized names become [`Capability::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "multi_ack" => Capability::MultiAck,
            "multi_ack_detailed" => Capability::MultiAckDetailed,
            "no-done" => Capability::NoDone,
            "thin-pack" => Capability::ThinPack,
            "side-band" => Capability::SideBand,
            "side-band-64k" => Capability::SideBand64k,
            "ofs-delta" => Capability::OfsDelta,
            "shallow" => Capability::Shallow,
            "deepen-since" => Capability::DeepenSince,
            "deepen-not" => Capability::DeepenNot,
            "deepen-relative" => Capability::DeepenRelative,
            "no-progress" => Capability::NoProgress,
            "include-tag" => Capability::IncludeTag,
            "report-status" => Capability::ReportStatus,
            "report-status-v2" => Capability::ReportStatusV2,
            "delete-refs" => Capability::DeleteRefs,
            "quiet" => Capability::Quiet,
            "atomic" => Capability::Atomic,
            "push-options" => Capability::PushOptions,
            "agent" => Capability::Agent,
            "symref" => Capability::Symref,
            "object-format" => Capability::ObjectFormat,
            "session-id" => Capability::SessionId,
            "push-cert" => Capability::PushCert,
            "filter" => Capability::Filter,
            "allow-tip-sha1-in-want" => Capability::AllowTipSha1InWant,
            "allow-reachable-sha1-in-want" => Capability::AllowReachableSha1InWant,
            other => Capability::Unknown(other.to_string()),
        })
    }
}

/// A negotiated set of capabilities: name to ordered value vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityList {
    caps: BTreeMap<String, Vec<String>>,
}

impl CapabilityList {
    pub fn new() -> CapabilityList {
        CapabilityList::default()
    }

    /// Parse a whitespace-separated capability block, e.g. the text after the
    /// NUL on the first advertisement line. One leading space is tolerated.
    /// Unknown names are added silently.
    pub fn decode(raw: &str) -> Result<CapabilityList, GitError> {
        let mut list = CapabilityList::new();
        for token in raw.split_whitespace() {
            match token.split_once('=') {
                Some((name, value)) => {
                    let cap = Capability::from_str(name).expect("infallible");
                    list.add(cap, Some(value))?;
                }
                None => {
                    let cap = Capability::from_str(token).expect("infallible");
                    list.add(cap, None)?;
                }
            }
        }
        Ok(list)
    }

    /// Insert a capability, enforcing its cardinality rules:
    /// - a no-argument capability with a value, or an argumented capability
    ///   with an empty value, is `CapabilityArguments`;
    /// - an argumented capability without a value is
    ///   `CapabilityArgumentsRequired`;
    /// - a second value on a single-valued capability is
    ///   `CapabilityMultipleArguments`.
    ///
    /// Unknown capabilities are exempt, preserving forward compatibility.
    pub fn add(&mut self, cap: Capability, value: Option<&str>) -> Result<(), GitError> {
        if cap.is_known() {
            match value {
                Some(v) => {
                    if !cap.takes_argument() || v.is_empty() {
                        return Err(GitError::CapabilityArguments(cap.as_str().to_string()));
                    }
                }
                None => {
                    if cap.takes_argument() {
                        return Err(GitError::CapabilityArgumentsRequired(
                            cap.as_str().to_string(),
                        ));
                    }
                }
            }
        }

        let values = self.caps.entry(cap.as_str().to_string()).or_default();
        if let Some(v) = value {
            if !values.is_empty() && cap.is_known() && !cap.allows_multiple() {
                return Err(GitError::CapabilityMultipleArguments(
                    cap.as_str().to_string(),
                ));
            }
            values.push(v.to_string());
        }
        Ok(())
    }

    /// Membership test by capability name.
    pub fn supports(&self, cap: &Capability) -> bool {
        self.caps.contains_key(cap.as_str())
    }

    /// Value vector of a capability; empty slice when present without values.
    pub fn get(&self, cap: &Capability) -> Option<&[String]> {
        self.caps.get(cap.as_str()).map(|v| v.as_slice())
    }

    /// First value of a capability, if any.
    pub fn first_value(&self, cap: &Capability) -> Option<&str> {
        self.get(cap).and_then(|v| v.first()).map(|s| s.as_str())
    }

    /// Remove a capability. Removing an absent capability is a no-op.
    pub fn delete(&mut self, cap: &Capability) {
        self.caps.remove(cap.as_str());
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}

impl fmt::Display for CapabilityList {
    /// Tokens in deterministic alphabetical order by capability name, with
    /// repeated values emitted as repeated tokens.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, values) in &self.caps {
            if values.is_empty() {
                if !first {
                    write!(f, " ")?;
                }
                first = false;
                write!(f, "{name}")?;
            } else {
                for value in values {
                    if !first {
                        write!(f, " ")?;
                    }
                    first = false;
                    write!(f, "{name}={value}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decode accepts plain and valued tokens and records unknown names.
    #[test]
    fn decode_mixed_tokens() {
        let list = CapabilityList::decode(
            " multi_ack thin-pack side-band-64k ofs-delta symref=HEAD:refs/heads/main agent=git/2.39.0 new-shiny",
        )
        .unwrap();
        assert!(list.supports(&Capability::MultiAck));
        assert!(list.supports(&Capability::SideBand64k));
        assert_eq!(
            list.first_value(&Capability::Symref),
            Some("HEAD:refs/heads/main")
        );
        assert_eq!(list.first_value(&Capability::Agent), Some("git/2.39.0"));
        assert!(list.supports(&Capability::Unknown("new-shiny".to_string())));
    }

    /// Symref may carry several values, agent may not.
    #[test]
    fn cardinality_rules() {
        let mut list = CapabilityList::new();
        list.add(Capability::Symref, Some("HEAD:refs/heads/main"))
            .unwrap();
        list.add(Capability::Symref, Some("OTHER:refs/heads/dev"))
            .unwrap();
        assert_eq!(list.get(&Capability::Symref).unwrap().len(), 2);

        list.add(Capability::Agent, Some("a/1")).unwrap();
        assert!(matches!(
            list.add(Capability::Agent, Some("b/2")),
            Err(GitError::CapabilityMultipleArguments(_))
        ));
    }

    /// Flag capabilities reject values; argumented ones demand them.
    #[test]
    fn argument_rules() {
        let mut list = CapabilityList::new();
        assert!(matches!(
            list.add(Capability::OfsDelta, Some("nope")),
            Err(GitError::CapabilityArguments(_))
        ));
        assert!(matches!(
            list.add(Capability::Agent, None),
            Err(GitError::CapabilityArgumentsRequired(_))
        ));
        assert!(matches!(
            list.add(Capability::Agent, Some("")),
            Err(GitError::CapabilityArguments(_))
        ));
    }

    /// Display is alphabetical and re-decodes to an equal list.
    #[test]
    fn display_round_trip() {
        let mut list = CapabilityList::new();
        list.add(Capability::SideBand64k, None).unwrap();
        list.add(Capability::Agent, Some(DEFAULT_AGENT)).unwrap();
        list.add(Capability::OfsDelta, None).unwrap();
        list.add(Capability::Symref, Some("HEAD:refs/heads/main"))
            .unwrap();

        let text = list.to_string();
        assert_eq!(
            text,
            format!("agent={DEFAULT_AGENT} ofs-delta side-band-64k symref=HEAD:refs/heads/main")
        );
        assert_eq!(CapabilityList::decode(&text).unwrap(), list);
    }

    /// Delete is idempotent.
    #[test]
    fn delete_twice() {
        let mut list = CapabilityList::decode("ofs-delta shallow").unwrap();
        list.delete(&Capability::Shallow);
        list.delete(&Capability::Shallow);
        assert!(!list.supports(&Capability::Shallow));
        assert!(list.supports(&Capability::OfsDelta));
    }
}
