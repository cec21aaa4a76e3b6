//! Local transport: spawn the service binary (`git-upload-pack`,
//! `git-receive-pack`, `git-upload-archive`) as a child process and speak
//! pkt-lines over its stdio. Also hosts the child-process wire shared with
//! the SSH transport.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::errors::GitError;
use crate::protocol::Service;
use crate::storage::{ObjectStore as _, Storage};
use crate::transport::endpoint::Endpoint;
use crate::transport::ioutil::{CancelFlag, CancelReader, CancelWriter};
use crate::transport::session::{Connection, Session, Wire, discover};
use crate::transport::{AuthMethod, Transport};

/// Full-duplex wire over a spawned child's stdio. The child's stderr drains
/// into a buffer so a failed handshake can be diagnosed.
pub(crate) struct ChildWire {
    child: Child,
    reader: CancelReader,
    writer: CancelWriter,
    stderr: Arc<Mutex<Vec<u8>>>,
    waited: bool,
}

impl ChildWire {
    pub(crate) fn spawn(mut command: Command, cancel: CancelFlag) -> Result<ChildWire, GitError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        tracing::debug!(command = ?command, "spawning transport child");
        let mut child = command.spawn()?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let mut child_stderr = child.stderr.take().expect("stderr was piped");

        let stderr = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = stderr.clone();
        std::thread::Builder::new()
            .name("git-wire-stderr".to_string())
            .spawn(move || {
                let mut chunk = [0u8; 4096];
                while let Ok(n) = child_stderr.read(&mut chunk) {
                    if n == 0 {
                        break;
                    }
                    stderr_buf.lock().expect("stderr lock").extend_from_slice(&chunk[..n]);
                }
            })
            .expect("spawning stderr drain");

        Ok(ChildWire {
            child,
            reader: CancelReader::new(Box::new(stdout), cancel.clone()),
            writer: CancelWriter::new(Box::new(stdin), cancel),
            stderr,
            waited: false,
        })
    }

    /// Upgrade a generic handshake failure with what the child printed.
    pub(crate) fn interpret_failure(&self, original: GitError) -> GitError {
        let stderr = self.stderr.lock().expect("stderr lock");
        let text = String::from_utf8_lossy(&stderr);
        let lowered = text.to_ascii_lowercase();
        if lowered.contains("not found")
            || lowered.contains("does not exist")
            || lowered.contains("not appear to be a git repository")
        {
            return GitError::RepositoryNotFound;
        }
        if lowered.contains("permission denied") || lowered.contains("access denied") {
            return GitError::AuthorizationFailed;
        }
        if !text.trim().is_empty() {
            return GitError::Remote(text.trim().to_string());
        }
        original
    }
}

impl Wire for ChildWire {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.reader
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.writer
    }

    fn finish_request(&mut self) -> Result<(), GitError> {
        self.writer.finish()
    }

    fn stateless(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), GitError> {
        let _ = self.writer.finish();
        if !self.waited {
            self.waited = true;
            let status = self.child.wait()?;
            tracing::debug!(?status, "transport child exited");
        }
        Ok(())
    }
}

/// Transport for `file://` endpoints and plain local paths.
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn open_session(
        &self,
        storage: Arc<dyn Storage>,
        endpoint: &Endpoint,
        auth: Option<AuthMethod>,
    ) -> Result<Box<dyn Session>, GitError> {
        if auth.is_some() {
            return Err(GitError::InvalidAuthMethod);
        }
        Ok(Box::new(LocalSession {
            storage,
            endpoint: endpoint.clone(),
            used: false,
        }))
    }
}

struct LocalSession {
    storage: Arc<dyn Storage>,
    endpoint: Endpoint,
    used: bool,
}

impl Session for LocalSession {
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

        let mut command = Command::new(service.as_str());
        command.arg(&self.endpoint.path);
        if !params.is_empty() {
            command.env("GIT_PROTOCOL", params.join(":"));
        }

        let mut wire = ChildWire::spawn(command, cancel.clone())?;
        let discovered = discover(service, self.storage.hash_kind(), wire.reader());
        let (version, advertised) = match discovered {
            Ok(result) => result,
            Err(e) => {
                let diagnosed = wire.interpret_failure(e);
                let _ = wire.close();
                return Err(diagnosed);
            }
        };

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
