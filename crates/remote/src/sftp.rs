//! SFTP remote filesystem over libssh2.
//!
//! libssh2 is blocking, so every call runs on Tokio's blocking pool. The
//! session serializes requests internally; concurrent callers share it safely
//! but do not gain throughput from it.

use crate::credentials::Credentials;
use crate::error::{ErrorKind, Result};
use crate::{RemoteEntry, RemoteFs, join};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use ferry_storage::Body;
use ssh2::{ErrorCode, HashType, Session, Sftp};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// libssh2's SFTP status codes for a missing file and a denied request.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;

/// Connection settings for [`SftpFs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpOptions {
    /// `host:port` to connect to.
    pub host: String,
    /// Applies to the TCP connect and to every blocking libssh2 call.
    pub timeout: Duration,
}
impl SftpOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), timeout: Duration::from_secs(15 * 60) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An authenticated SFTP session.
pub struct SftpFs {
    host: String,
    sftp: Arc<Sftp>,
    // Keeps the transport alive for as long as the SFTP channel is in use.
    _session: Session,
}

impl SftpFs {
    /// Connect to `options.host` and authenticate with a password.
    ///
    /// The server's host key is not verified; its fingerprint is logged at
    /// debug level.
    pub async fn connect(options: SftpOptions, credentials: Credentials) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::connect_blocking(options, credentials)).await.or_raise(|| ErrorKind::Task)?
    }

    fn connect_blocking(options: SftpOptions, credentials: Credentials) -> Result<Self> {
        let SftpOptions { host, timeout } = options;
        let address = host
            .to_socket_addrs()
            .or_raise(|| ErrorKind::Connect(host.clone()))?
            .next()
            .ok_or_raise(|| ErrorKind::Connect(host.clone()))?;
        let tcp = TcpStream::connect_timeout(&address, timeout).or_raise(|| ErrorKind::Connect(host.clone()))?;

        let mut session = Session::new().or_raise(|| ErrorKind::Connect(host.clone()))?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().or_raise(|| ErrorKind::Connect(host.clone()))?;
        if let Some(hash) = session.host_key_hash(HashType::Sha256) {
            let fingerprint: String = hash.iter().map(|b| format!("{b:02x}")).collect();
            tracing::debug!(host = %host, fingerprint = %fingerprint, "Accepted host key without verification");
        }

        session
            .userauth_password(&credentials.username, &credentials.password)
            .or_raise(|| ErrorKind::Auth(host.clone()))?;
        if !session.authenticated() {
            exn::bail!(ErrorKind::Auth(host));
        }
        let sftp = session.sftp().or_raise(|| ErrorKind::Connect(host.clone()))?;
        tracing::info!(host = %host, username = %credentials.username, "Connected to SFTP server");
        Ok(Self { host, sftp: Arc::new(sftp), _session: session })
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    fn name(&self) -> &str {
        &self.host
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let sftp = Arc::clone(&self.sftp);
        let owned = dir.to_string();
        let listing = tokio::task::spawn_blocking(move || sftp.readdir(Path::new(&owned)))
            .await
            .or_raise(|| ErrorKind::Task)?
            .map_err(|e| classify(&e, dir))?;
        Ok(listing
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                let path = join(dir, &name);
                Some(match stat.is_dir() {
                    true => RemoteEntry::dir(path),
                    false => RemoteEntry { path, is_dir: false, size: stat.size },
                })
            })
            .collect())
    }

    async fn open(&self, path: &str) -> Result<Body> {
        let sftp = Arc::clone(&self.sftp);
        let owned = path.to_string();
        let (file, size) = tokio::task::spawn_blocking(move || {
            let mut file = sftp.open(Path::new(&owned))?;
            let size = file.stat().ok().and_then(|stat| stat.size);
            Ok::<_, ssh2::Error>((file, size))
        })
        .await
        .or_raise(|| ErrorKind::Task)?
        .map_err(|e| classify(&e, path))?;
        let body = Body::from_sync_reader(file);
        Ok(match size {
            Some(size) => body.with_size_hint(size),
            None => body,
        })
    }
}

/// Map an SFTP failure on `path` to the matching error kind.
fn classify(err: &ssh2::Error, path: &str) -> ErrorKind {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => ErrorKind::NotFound(path.to_string()),
        ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => ErrorKind::PermissionDenied(path.to_string()),
        _ => ErrorKind::Protocol(format!("{path}: {err}")),
    }
}
