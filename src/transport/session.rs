//! Session and connection: the per-endpoint handshake, protocol version
//! discovery, and the fetch/push operations bound to one live channel.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::errors::GitError;
use crate::protocol::advertise::AdvertisedRefs;
use crate::protocol::capability::CapabilityList;
use crate::protocol::negotiate::{
    self, ProgressSink, fetch_pack, negotiate_read, negotiate_write, send_pack_read,
    send_pack_write,
};
use crate::protocol::pktline::PktReader;
use crate::protocol::request::{FetchRequest, PushRequest, ReportStatus};
use crate::protocol::{ProtocolVersion, Service};
use crate::reference::Reference;
use crate::storage::{ShallowStore as _, Storage};
use crate::transport::ioutil::CancelFlag;

/// One live byte channel to a peer, as the connection sees it.
///
/// Full-duplex transports expose live pipes; `finish_request` closes the
/// write half. The stateless-RPC transport buffers writes and performs the
/// whole exchange inside `finish_request`, after which the response is
/// readable.
pub(crate) trait Wire: Send {
    fn reader(&mut self) -> &mut dyn Read;
    fn writer(&mut self) -> &mut dyn Write;
    fn finish_request(&mut self) -> Result<(), GitError>;
    fn stateless(&self) -> bool;
    fn close(&mut self) -> Result<(), GitError>;
}

/// A short-lived object produced by a transport for one endpoint, whose sole
/// operation is the handshake.
pub trait Session: Send {
    /// Open the underlying channel, discover the protocol version, read the
    /// initial reference advertisement, and return the live connection.
    ///
    /// `params` are `key=value` strings forwarded to the server (notably
    /// `version=2`, which this core recognizes and rejects). A second
    /// handshake on the same session reports [`GitError::AlreadyConnected`].
    fn handshake(
        &mut self,
        service: Service,
        params: &[String],
        cancel: CancelFlag,
    ) -> Result<Connection, GitError>;
}

/// Discover the version and advertisement from a freshly opened channel.
/// Shared by every transport's handshake.
pub(crate) fn discover(
    service: Service,
    hash_kind: crate::hash::HashKind,
    reader: &mut dyn Read,
) -> Result<(ProtocolVersion, AdvertisedRefs), GitError> {
    let mut packets = PktReader::new(reader);
    let ad = AdvertisedRefs::decode(hash_kind, &mut packets)?;
    let version = ProtocolVersion::from_number(ad.version.unwrap_or(0))?;
    if version == ProtocolVersion::V2 {
        return Err(GitError::UnsupportedVersion(2));
    }
    if service == Service::UploadPack && ad.is_empty() {
        return Err(GitError::EmptyRemoteRepository);
    }
    tracing::debug!(
        version = version.number(),
        refs = ad.refs.len(),
        capabilities = %ad.capabilities,
        "handshake complete"
    );
    Ok((version, ad))
}

/// A connection holds exactly one protocol version for its lifetime, fixed
/// at handshake, and serves one fetch or push before closing.
pub struct Connection {
    service: Service,
    version: ProtocolVersion,
    advertised: AdvertisedRefs,
    wire: Box<dyn Wire>,
    storage: Arc<dyn Storage>,
    cancel: CancelFlag,
    used: bool,
    closed: bool,
}

impl Connection {
    pub(crate) fn new(
        service: Service,
        version: ProtocolVersion,
        advertised: AdvertisedRefs,
        wire: Box<dyn Wire>,
        storage: Arc<dyn Storage>,
        cancel: CancelFlag,
    ) -> Connection {
        Connection {
            service,
            version,
            advertised,
            wire,
            storage,
            cancel,
            used: false,
            closed: false,
        }
    }

    /// The capability set the peer advertised.
    pub fn capabilities(&self) -> &CapabilityList {
        &self.advertised.capabilities
    }

    /// The protocol version fixed at handshake.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// True on half-duplex (smart HTTP) connections.
    pub fn stateless_rpc(&self) -> bool {
        self.wire.stateless()
    }

    /// The advertisement read during the handshake.
    pub fn advertised_refs(&self) -> &AdvertisedRefs {
        &self.advertised
    }

    /// The peer's references materialized from the advertisement, symrefs
    /// resolved and peeled entries included on request.
    pub fn remote_refs(&self, include_peeled: bool) -> Vec<Reference> {
        self.advertised.references(include_peeled)
    }

    fn claim(&mut self, wanted: Service) -> Result<(), GitError> {
        self.cancel.check()?;
        if self.closed {
            return Err(GitError::InvalidRequest(
                "connection is closed".to_string(),
            ));
        }
        if self.used {
            return Err(GitError::InvalidRequest(
                "connection already carried an exchange".to_string(),
            ));
        }
        if self.service != wanted {
            return Err(GitError::UnsupportedService(format!(
                "connection speaks {}, not {}",
                self.service, wanted
            )));
        }
        self.used = true;
        Ok(())
    }

    /// Run a fetch: negotiate, receive the packfile into storage, apply the
    /// shallow update. [`GitError::NoChange`] is the successful no-transfer
    /// termination.
    pub fn fetch(
        &mut self,
        req: &FetchRequest,
        progress: Option<ProgressSink>,
    ) -> Result<(), GitError> {
        self.claim(Service::UploadPack)?;

        let mut req = req.clone();
        if req.shallows.is_empty() {
            // Announce the local shallow roots so the peer can deepen or
            // unshallow them.
            req.shallows = self.storage.shallow()?;
        }

        let stateless = self.wire.stateless();
        let negotiated = negotiate_write(
            &self.advertised.capabilities,
            stateless,
            progress.is_some(),
            &req,
            self.wire.writer(),
        )?;
        let Some(caps) = negotiated else {
            negotiate::tolerate_close_eof(self.wire.finish_request())?;
            return Err(GitError::NoChange);
        };
        self.wire.finish_request()?;

        self.cancel.check()?;
        let shallow_update = negotiate_read(self.wire.reader(), !req.depth.is_none())?;
        self.cancel.check()?;
        fetch_pack(
            self.storage.as_ref(),
            &caps,
            progress,
            &shallow_update,
            self.wire.reader(),
        )
    }

    /// Run a push: send commands, options and the packfile, then read the
    /// status report when the peer supports one.
    pub fn push(
        &mut self,
        req: &PushRequest,
        packfile: Option<&mut dyn Read>,
        progress: Option<ProgressSink>,
    ) -> Result<Option<ReportStatus>, GitError> {
        self.claim(Service::ReceivePack)?;

        let caps = send_pack_write(
            &self.advertised.capabilities,
            req,
            packfile,
            progress.is_some(),
            self.wire.writer(),
        )?;
        if req.is_delete_only() {
            negotiate::tolerate_close_eof(self.wire.finish_request())?;
        } else {
            self.wire.finish_request()?;
        }

        self.cancel.check()?;
        send_pack_read(&caps, progress, self.wire.reader())
    }

    /// Release the underlying process, socket or response body. Cancellation
    /// never does this implicitly; every connection must be closed.
    pub fn close(&mut self) -> Result<(), GitError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.wire.close()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "closing connection during drop failed");
            }
        }
    }
}
