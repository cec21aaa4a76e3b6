//! The slice of repository configuration this crate owns: the repository
//! format version and the object format (hash algorithm), persisted under
//! `[core]`/`[extensions]` in the `.git/config` file.
//!
//! Full Git config text parsing (includes, globals, remotes, conditional
//! sections) is an external collaborator; the reader here scans only the keys
//! the storage layer needs and leaves everything else untouched.

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::HashKind;

/// Core repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// `core.repositoryformatversion`: 0, or 1 when extensions are in play.
    pub repository_format_version: u32,
    /// `extensions.objectformat`: the hash algorithm of every object id.
    pub object_format: HashKind,
    /// `core.bare`.
    pub bare: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        RepositoryConfig {
            repository_format_version: 0,
            object_format: HashKind::Sha1,
            bare: false,
        }
    }
}

impl RepositoryConfig {
    pub fn with_object_format(kind: HashKind) -> RepositoryConfig {
        RepositoryConfig {
            // SHA-256 repositories require format version 1 with the
            // objectformat extension.
            repository_format_version: if kind == HashKind::Sha256 { 1 } else { 0 },
            object_format: kind,
            bare: false,
        }
    }

    /// Emit the config document text.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str("[core]\n");
        out.push_str(&format!(
            "\trepositoryformatversion = {}\n",
            self.repository_format_version
        ));
        out.push_str(&format!("\tbare = {}\n", self.bare));
        if self.object_format != HashKind::Sha1 {
            out.push_str("[extensions]\n");
            out.push_str(&format!("\tobjectformat = {}\n", self.object_format));
        }
        out
    }

    /// Scan config text for the keys this crate owns. Unknown sections and
    /// keys are skipped without error.
    pub fn decode(text: &str) -> Result<RepositoryConfig, GitError> {
        let mut config = RepositoryConfig::default();
        let mut section = String::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_ascii_lowercase();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match (section.as_str(), key.as_str()) {
                ("core", "repositoryformatversion") => {
                    config.repository_format_version = value.parse().map_err(|_| {
                        GitError::CustomError(format!("bad repositoryformatversion `{value}`"))
                    })?;
                }
                ("core", "bare") => {
                    config.bare = value.eq_ignore_ascii_case("true");
                }
                ("extensions", "objectformat") => {
                    config.object_format = value.parse()?;
                }
                _ => {}
            }
        }
        Ok(config)
    }
}
