//! Transports: endpoint parsing, the process-wide scheme registry, and the
//! concrete channel implementations (local child process, SSH, anonymous git
//! wire, smart HTTP).

pub mod endpoint;
pub mod git;
pub mod http;
pub mod ioutil;
pub mod local;
pub mod session;
pub mod ssh;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::errors::GitError;
use crate::protocol::ProtocolVersion;
use crate::storage::Storage;

pub use endpoint::Endpoint;
pub use ioutil::{CancelFlag, CancelReader, CancelWriter};
pub use session::{Connection, Session};

/// Credentials handed to a transport. Only the HTTP transports consume
/// these; the others report [`GitError::InvalidAuthMethod`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Basic { username: String, password: String },
}

/// A dialing strategy for one or more URL schemes.
pub trait Transport: Send + Sync {
    /// Produce a session for an endpoint. The session talks to `storage`
    /// when an operation lands objects or shallow roots locally.
    fn open_session(
        &self,
        storage: Arc<dyn Storage>,
        endpoint: &Endpoint,
        auth: Option<AuthMethod>,
    ) -> Result<Box<dyn Session>, GitError>;

    /// Wire protocol versions this transport can carry.
    fn supported_versions(&self) -> Vec<ProtocolVersion> {
        vec![ProtocolVersion::V0, ProtocolVersion::V1]
    }
}

type Registry = RwLock<HashMap<String, Arc<dyn Transport>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        map.insert("file".to_string(), Arc::new(local::LocalTransport));
        map.insert("ssh".to_string(), Arc::new(ssh::SshTransport));
        map.insert("git".to_string(), Arc::new(git::GitTransport));
        let http = Arc::new(http::HttpTransport);
        map.insert("http".to_string(), http.clone());
        map.insert("https".to_string(), http);
        RwLock::new(map)
    })
}

/// Register a transport for a scheme. Passing `None` removes the scheme, so
/// later lookups fail rather than dispatching into nothing.
pub fn register(scheme: &str, transport: Option<Arc<dyn Transport>>) {
    let mut map = registry().write().expect("registry lock poisoned");
    match transport {
        Some(t) => {
            map.insert(scheme.to_string(), t);
        }
        None => {
            map.remove(scheme);
        }
    }
}

/// Look up the transport for a scheme.
pub fn get(scheme: &str) -> Result<Arc<dyn Transport>, GitError> {
    registry()
        .read()
        .expect("registry lock poisoned")
        .get(scheme)
        .cloned()
        .ok_or_else(|| GitError::UnsupportedScheme(scheme.to_string()))
}

/// Convenience: parse the endpoint, look up its transport, open a session.
pub fn open_session(
    storage: Arc<dyn Storage>,
    endpoint: &Endpoint,
    auth: Option<AuthMethod>,
) -> Result<Box<dyn Session>, GitError> {
    get(&endpoint.protocol)?.open_session(storage, endpoint, auth)
}
