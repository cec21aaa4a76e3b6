//! Anonymous git wire transport: a TCP connection to git-daemon carrying the
//! `git-proto-request` preamble, then the usual pkt-line exchange.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use crate::errors::GitError;
use crate::protocol::{Service, pktline};
use crate::storage::{ObjectStore as _, Storage};
use crate::transport::endpoint::Endpoint;
use crate::transport::ioutil::{CancelFlag, CancelReader, CancelWriter};
use crate::transport::session::{Connection, Session, Wire, discover};
use crate::transport::{AuthMethod, Transport};

/// Transport for `git://` endpoints.
pub struct GitTransport;

impl Transport for GitTransport {
    fn open_session(
        &self,
        storage: Arc<dyn Storage>,
        endpoint: &Endpoint,
        auth: Option<AuthMethod>,
    ) -> Result<Box<dyn Session>, GitError> {
        // The daemon protocol carries no credentials.
        if auth.is_some() {
            return Err(GitError::InvalidAuthMethod);
        }
        Ok(Box::new(GitSession {
            storage,
            endpoint: endpoint.clone(),
            used: false,
        }))
    }
}

struct GitSession {
    storage: Arc<dyn Storage>,
    endpoint: Endpoint,
    used: bool,
}

struct TcpWire {
    stream: TcpStream,
    reader: CancelReader,
    writer: CancelWriter,
}

impl TcpWire {
    fn connect(endpoint: &Endpoint, cancel: CancelFlag) -> Result<TcpWire, GitError> {
        let address = (endpoint.host.as_str(), endpoint.effective_port());
        let stream = TcpStream::connect(address)?;
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;
        Ok(TcpWire {
            stream,
            reader: CancelReader::new(Box::new(read_half), cancel.clone()),
            writer: CancelWriter::new(Box::new(write_half), cancel),
        })
    }
}

impl Wire for TcpWire {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.reader
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.writer
    }

    fn finish_request(&mut self) -> Result<(), GitError> {
        self.writer.finish()?;
        match self.stream.shutdown(Shutdown::Write) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn stateless(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), GitError> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Session for GitSession {
    fn handshake(
        &mut self,
        service: Service,
        params: &[String],
        cancel: CancelFlag,
    ) -> Result<Connection, GitError> {
        if self.used {
            return Err(GitError::AlreadyConnected);
        }
        self.used = true;

        let mut wire = TcpWire::connect(&self.endpoint, cancel.clone())?;

        // `git-proto-request`: service, path, host, then one empty extra
        // section per parameter (`version=2` travels this way).
        let mut request = Vec::new();
        request.extend_from_slice(service.as_str().as_bytes());
        request.push(b' ');
        request.extend_from_slice(self.endpoint.path.as_bytes());
        request.push(0);
        let host = match self.endpoint.port {
            Some(port) => format!("host={}:{port}", self.endpoint.host),
            None => format!("host={}", self.endpoint.host),
        };
        request.extend_from_slice(host.as_bytes());
        request.push(0);
        if !params.is_empty() {
            request.push(0);
            for param in params {
                request.extend_from_slice(param.as_bytes());
                request.push(0);
            }
        }
        pktline::write_data(wire.writer(), &request)?;
        wire.writer().flush()?;

        let (version, advertised) =
            discover(service, self.storage.hash_kind(), wire.reader())?;

        Ok(Connection::new(
            service,
            version,
            advertised,
            Box::new(wire),
            self.storage.clone(),
            cancel,
        ))
    }
}
