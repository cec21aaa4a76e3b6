//! The Git wire protocol: pkt-line framing, capability negotiation, sideband
//! multiplexing, the reference advertisement and request codecs, and the
//! client and server halves of the fetch and push pipelines.

pub mod advertise;
pub mod capability;
pub mod negotiate;
pub mod pktline;
pub mod receive_pack;
pub mod request;
pub mod sideband;
pub mod upload_pack;

use std::fmt;
use std::str::FromStr;

use crate::errors::GitError;

/// The services a Git peer can be asked for. The names appear verbatim in
/// child-process argv, SSH exec requests, the smart-HTTP service query and
/// POST path, and the git-daemon request line.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Service {
    UploadPack,
    ReceivePack,
    UploadArchive,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
            Service::UploadArchive => "git-upload-archive",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(Service::UploadPack),
            "git-receive-pack" => Ok(Service::ReceivePack),
            "git-upload-archive" => Ok(Service::UploadArchive),
            _ => Err(GitError::UnsupportedService(s.to_string())),
        }
    }
}

/// Wire protocol versions. Version 2 is recognized during discovery but not
/// implemented by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProtocolVersion {
    #[default]
    V0,
    V1,
    V2,
}

impl ProtocolVersion {
    pub fn from_number(n: u8) -> Result<ProtocolVersion, GitError> {
        match n {
            0 => Ok(ProtocolVersion::V0),
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            other => Err(GitError::UnsupportedVersion(other)),
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            ProtocolVersion::V0 => 0,
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Service names parse and print verbatim.
    #[test]
    fn service_names() {
        assert_eq!(
            "git-upload-pack".parse::<Service>().unwrap(),
            Service::UploadPack
        );
        assert_eq!(
            "git-upload-archive".parse::<Service>().unwrap(),
            Service::UploadArchive
        );
        assert_eq!(Service::ReceivePack.to_string(), "git-receive-pack");
        assert!(matches!(
            "git-frobnicate".parse::<Service>(),
            Err(GitError::UnsupportedService(_))
        ));
    }

    /// Version numbers round-trip; others are unsupported.
    #[test]
    fn protocol_versions() {
        for n in 0..=2 {
            assert_eq!(ProtocolVersion::from_number(n).unwrap().number(), n);
        }
        assert!(matches!(
            ProtocolVersion::from_number(3),
            Err(GitError::UnsupportedVersion(3))
        ));
    }
}
