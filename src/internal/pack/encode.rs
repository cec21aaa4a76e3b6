//! Pack stream encoder.
//!
//! Writes the `PACK` header, one zlib-deflated entry per object, and the
//! trailing content hash. Every entry is emitted undeltified; producing delta
//! chains is a compression concern that lives outside this crate.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use sha1::Digest;

use crate::errors::GitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::pack::entry::Entry;
use crate::internal::pack::{PACK_MAGIC, PACK_VERSION};

/// Running digest over everything written, matching the repository's hash kind.
pub(crate) enum PackDigest {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl PackDigest {
    pub(crate) fn new(kind: HashKind) -> PackDigest {
        match kind {
            HashKind::Sha1 => PackDigest::Sha1(sha1::Sha1::new()),
            HashKind::Sha256 => PackDigest::Sha256(sha2::Sha256::new()),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            PackDigest::Sha1(d) => d.update(data),
            PackDigest::Sha256(d) => d.update(data),
        }
    }

    /// Finalize a snapshot of the digest without disturbing the running state.
    pub(crate) fn snapshot(&self, kind: HashKind) -> ObjectHash {
        let bytes = match self {
            PackDigest::Sha1(d) => d.clone().finalize().to_vec(),
            PackDigest::Sha256(d) => d.clone().finalize().to_vec(),
        };
        ObjectHash::from_bytes(kind, &bytes).expect("digest size matches kind")
    }
}

/// Streaming pack writer over any byte sink.
pub struct PackEncoder<W: Write> {
    kind: HashKind,
    writer: W,
    digest: PackDigest,
}

impl<W: Write> PackEncoder<W> {
    pub fn new(kind: HashKind, writer: W) -> PackEncoder<W> {
        PackEncoder {
            kind,
            writer,
            digest: PackDigest::new(kind),
        }
    }

    fn write_hashed(&mut self, data: &[u8]) -> Result<(), GitError> {
        self.digest.update(data);
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Encode `entries` as a complete pack stream and return the trailing
    /// checksum. The object count must be known up front, which is why this
    /// takes a slice rather than an iterator.
    pub fn encode(mut self, entries: &[Entry]) -> Result<ObjectHash, GitError> {
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(PACK_MAGIC);
        header.write_u32::<BigEndian>(PACK_VERSION)?;
        header.write_u32::<BigEndian>(entries.len() as u32)?;
        self.write_hashed(&header)?;

        for entry in entries {
            self.write_entry(entry)?;
        }

        let trailer = self.digest.snapshot(self.kind);
        self.writer.write_all(trailer.as_ref())?;
        self.writer.flush()?;
        tracing::debug!(objects = entries.len(), checksum = %trailer, "pack stream encoded");
        Ok(trailer)
    }

    fn write_entry(&mut self, entry: &Entry) -> Result<(), GitError> {
        let mut head = Vec::with_capacity(8);
        let type_bits = entry.obj_type.to_pack_type_u8();
        let mut size = entry.data.len();

        // First byte carries the 3 type bits and the low 4 size bits.
        let mut byte = (type_bits << 4) | (size & 0x0F) as u8;
        size >>= 4;
        while size > 0 {
            head.push(byte | 0x80);
            byte = (size & 0x7F) as u8;
            size >>= 7;
        }
        head.push(byte);
        self.write_hashed(&head)?;

        let mut deflater = ZlibEncoder::new(Vec::new(), Compression::default());
        deflater.write_all(&entry.data)?;
        let compressed = deflater.finish()?;
        self.write_hashed(&compressed)?;
        Ok(())
    }
}
