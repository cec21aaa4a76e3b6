//! Hash utilities for Git objects with selectable algorithms (SHA-1 and SHA-256).
//! The algorithm is a per-repository choice carried in [`crate::config::RepositoryConfig`];
//! every API that computes or sizes a hash takes the [`HashKind`] explicitly.

use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Serialize};
use sha1::Digest;

use crate::errors::GitError;
use crate::internal::object::types::ObjectType;

/// Supported hash algorithms for object IDs (selector only, no data attached).
/// Defaults to SHA-1, matching repositories that do not declare an
/// `objectformat` extension.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize,
)]
pub enum HashKind {
    #[default]
    Sha1,
    Sha256,
}

impl HashKind {
    /// Byte length of the hash output.
    pub const fn size(&self) -> usize {
        match self {
            HashKind::Sha1 => 20,
            HashKind::Sha256 => 32,
        }
    }

    /// Hex string length of the hash output.
    pub const fn hex_len(&self) -> usize {
        match self {
            HashKind::Sha1 => 40,
            HashKind::Sha256 => 64,
        }
    }

    /// Lowercase name of the hash algorithm as it appears in the
    /// `object-format` capability and in repository configuration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
        }
    }
}

impl Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashKind::Sha1),
            "sha256" => Ok(HashKind::Sha256),
            _ => Err(GitError::InvalidHashValue(format!("hash kind `{s}`"))),
        }
    }
}

/// Concrete object ID value carrying the bytes for the selected algorithm
/// (SHA-1 or SHA-256). The all-zero value is reserved to mean "no object" and
/// signals reference creation or deletion in push commands.
///
/// Ordered lexicographically by raw bytes, compared by value. Supports
/// conversion to/from hex strings, byte slices, and stream reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum ObjectHash {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl Default for ObjectHash {
    fn default() -> Self {
        ObjectHash::Sha1([0u8; 20])
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_ref()))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        match self {
            ObjectHash::Sha1(bytes) => bytes.as_slice(),
            ObjectHash::Sha256(bytes) => bytes.as_slice(),
        }
    }
}

/// Parse hex (40 chars for SHA-1, 64 for SHA-256) into `ObjectHash`.
/// The algorithm is inferred from the string length.
impl FromStr for ObjectHash {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            40 => {
                let mut h = [0u8; 20];
                let bytes =
                    hex::decode(s).map_err(|e| GitError::InvalidHashValue(e.to_string()))?;
                h.copy_from_slice(bytes.as_slice());
                Ok(ObjectHash::Sha1(h))
            }
            64 => {
                let mut h = [0u8; 32];
                let bytes =
                    hex::decode(s).map_err(|e| GitError::InvalidHashValue(e.to_string()))?;
                h.copy_from_slice(bytes.as_slice());
                Ok(ObjectHash::Sha256(h))
            }
            _ => Err(GitError::InvalidHashValue(format!(
                "hex string of length {}",
                s.len()
            ))),
        }
    }
}

impl ObjectHash {
    /// The all-zero hash for a given kind.
    pub fn zero(kind: HashKind) -> ObjectHash {
        match kind {
            HashKind::Sha1 => ObjectHash::Sha1([0u8; 20]),
            HashKind::Sha256 => ObjectHash::Sha256([0u8; 32]),
        }
    }

    /// True when this is the reserved "no object" value.
    pub fn is_zero(&self) -> bool {
        self.as_ref().iter().all(|b| *b == 0)
    }

    /// Return the hash kind for this value.
    pub fn kind(&self) -> HashKind {
        match self {
            ObjectHash::Sha1(_) => HashKind::Sha1,
            ObjectHash::Sha256(_) => HashKind::Sha256,
        }
    }

    /// Return the hash size in bytes.
    pub fn size(&self) -> usize {
        self.kind().size()
    }

    /// Compute the hash of `data` with the requested algorithm.
    pub fn compute(kind: HashKind, data: &[u8]) -> ObjectHash {
        match kind {
            HashKind::Sha1 => {
                let h = sha1::Sha1::digest(data);
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(h.as_ref());
                ObjectHash::Sha1(bytes)
            }
            HashKind::Sha256 => {
                let h = sha2::Sha256::digest(data);
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(h.as_ref());
                ObjectHash::Sha256(bytes)
            }
        }
    }

    /// Hash an object the way Git does: over `<type> <len>\0<content>`.
    pub fn from_type_and_data(kind: HashKind, object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut d: Vec<u8> = Vec::with_capacity(data.len() + 16);
        d.extend(object_type.to_bytes());
        d.push(b' ');
        d.extend(data.len().to_string().as_bytes());
        d.push(b'\x00');
        d.extend(data);
        ObjectHash::compute(kind, &d)
    }

    /// Create `ObjectHash` from raw bytes matching the given hash size.
    pub fn from_bytes(kind: HashKind, bytes: &[u8]) -> Result<ObjectHash, GitError> {
        if bytes.len() != kind.size() {
            return Err(GitError::InvalidHashValue(format!(
                "byte slice of length {}, expected {}",
                bytes.len(),
                kind.size()
            )));
        }
        match kind {
            HashKind::Sha1 => {
                let mut h = [0u8; 20];
                h.copy_from_slice(bytes);
                Ok(ObjectHash::Sha1(h))
            }
            HashKind::Sha256 => {
                let mut h = [0u8; 32];
                h.copy_from_slice(bytes);
                Ok(ObjectHash::Sha256(h))
            }
        }
    }

    /// Read hash bytes from a stream according to the given hash size.
    pub fn from_stream(kind: HashKind, data: &mut impl io::Read) -> io::Result<ObjectHash> {
        match kind {
            HashKind::Sha1 => {
                let mut h = [0u8; 20];
                data.read_exact(&mut h)?;
                Ok(ObjectHash::Sha1(h))
            }
            HashKind::Sha256 => {
                let mut h = [0u8; 32];
                data.read_exact(&mut h)?;
                Ok(ObjectHash::Sha256(h))
            }
        }
    }

    /// Return raw bytes of the hash.
    pub fn to_data(self) -> Vec<u8> {
        self.as_ref().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::str::FromStr;

    use super::{HashKind, ObjectHash};

    /// Hashing "Hello, world!" with SHA-1 should match the known value.
    #[test]
    fn sha1_compute() {
        let sha1 = ObjectHash::compute(HashKind::Sha1, b"Hello, world!");
        assert_eq!(sha1.to_string(), "943a702d06f34599aee1f8da8ef9f7296031d699");
    }

    /// Hashing "Hello, world!" with SHA-256 should match the known value.
    #[test]
    fn sha256_compute() {
        let sha256 = ObjectHash::compute(HashKind::Sha256, b"Hello, world!");
        assert_eq!(
            sha256.to_string(),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }

    /// Hex parsing infers the algorithm from the string length.
    #[test]
    fn from_str_infers_kind() {
        let h1 = ObjectHash::from_str("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        assert_eq!(h1.kind(), HashKind::Sha1);
        let h2 = ObjectHash::from_str(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        )
        .unwrap();
        assert_eq!(h2.kind(), HashKind::Sha256);
        assert!(ObjectHash::from_str("abcdef").is_err());
    }

    /// Raw byte construction must match the declared kind's size.
    #[test]
    fn from_bytes_checks_length() {
        let ok = ObjectHash::from_bytes(HashKind::Sha1, &[0u8; 20]).unwrap();
        assert!(ok.is_zero());
        assert!(ObjectHash::from_bytes(HashKind::Sha1, &[0u8; 32]).is_err());
        assert!(ObjectHash::from_bytes(HashKind::Sha256, &[1u8; 32]).is_ok());
    }

    /// Stream reading consumes exactly the hash size for the kind.
    #[test]
    fn from_stream_reads_exact() {
        let source = [
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ];
        let mut reader = Cursor::new(source);
        let sha1 = ObjectHash::from_stream(HashKind::Sha1, &mut reader).unwrap();
        assert_eq!(sha1.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    /// The zero value is reserved and detectable.
    #[test]
    fn zero_is_zero() {
        assert!(ObjectHash::zero(HashKind::Sha1).is_zero());
        assert!(ObjectHash::zero(HashKind::Sha256).is_zero());
        assert!(!ObjectHash::compute(HashKind::Sha1, b"x").is_zero());
        assert_eq!(
            ObjectHash::zero(HashKind::Sha1).to_string(),
            "0000000000000000000000000000000000000000"
        );
    }

    /// Hashes order lexicographically by raw bytes.
    #[test]
    fn ordering_is_lexicographic() {
        let a = ObjectHash::from_bytes(HashKind::Sha1, &[0u8; 20]).unwrap();
        let b = ObjectHash::from_bytes(HashKind::Sha1, &[1u8; 20]).unwrap();
        assert!(a < b);
    }
}
