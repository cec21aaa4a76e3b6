//! SSH transport: spawn the system `ssh` client and run the service on the
//! remote side, speaking pkt-lines over the forwarded stdio.

use std::process::Command;
use std::sync::Arc;

use crate::errors::GitError;
use crate::protocol::Service;
use crate::storage::{ObjectStore as _, Storage};
use crate::transport::endpoint::Endpoint;
use crate::transport::ioutil::CancelFlag;
use crate::transport::local::ChildWire;
use crate::transport::session::{Connection, Session, Wire, discover};
use crate::transport::{AuthMethod, Transport};

/// Transport for `ssh://` endpoints and SCP-like remotes.
pub struct SshTransport;

impl Transport for SshTransport {
    fn open_session(
        &self,
        storage: Arc<dyn Storage>,
        endpoint: &Endpoint,
        auth: Option<AuthMethod>,
    ) -> Result<Box<dyn Session>, GitError> {
        // Key management belongs to the system ssh client and its agent.
        if auth.is_some() {
            return Err(GitError::InvalidAuthMethod);
        }
        Ok(Box::new(SshSession {
            storage,
            endpoint: endpoint.clone(),
            used: false,
        }))
    }
}

struct SshSession {
    storage: Arc<dyn Storage>,
    endpoint: Endpoint,
    used: bool,
}

/// Single-quote a path for the remote shell, the way scp-style tooling does.
fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

impl Session for SshSession {
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

        let mut command = Command::new("ssh");
        if let Some(port) = self.endpoint.port {
            command.arg("-p").arg(port.to_string());
        }
        let destination = if self.endpoint.user.is_empty() {
            self.endpoint.host.clone()
        } else {
            format!("{}@{}", self.endpoint.user, self.endpoint.host)
        };
        command.arg(destination);

        // The remote command carries the protocol request inline, the same
        // way git itself forwards GIT_PROTOCOL over ssh.
        let mut remote = String::new();
        if !params.is_empty() {
            remote.push_str(&format!("GIT_PROTOCOL={} ", params.join(":")));
        }
        remote.push_str(&format!("{} {}", service, shell_quote(&self.endpoint.path)));
        command.arg(remote);

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

#[cfg(test)]
mod tests {
    use super::shell_quote;

    /// Quoting survives embedded single quotes.
    #[test]
    fn quote_paths() {
        assert_eq!(shell_quote("/srv/repo.git"), "'/srv/repo.git'");
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
    }
}
