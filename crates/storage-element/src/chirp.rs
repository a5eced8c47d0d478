//! Chirp storage backend
//!
//! Chirp is a line-oriented remote filesystem protocol: the client sends one
//! request line, the server answers with a status line (negative values are
//! errors) followed by a request-specific body. One connection is kept per
//! backend and requests on it are serialized.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use storage_core::{normalize_prefix, BackendSettings, Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{FileSize, PathStream, StorageBackend};

/// Port a Chirp server listens on when none is given
pub const DEFAULT_PORT: u16 = 9094;

/// Characters the server expects escaped in paths
const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%');

/// Status returned for missing paths
const DOESNT_EXIST: i64 = -3;

/// Status returned when creating something that is already there
const ALREADY_EXISTS: i64 = -4;

const S_IFMT: i64 = 0o170000;
const S_IFDIR: i64 = 0o040000;

/// Subset of the stat record a Chirp server returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChirpStat {
    pub mode: i64,
    pub size: i64,
}

impl ChirpStat {
    /// Parse `dev ino mode nlink uid gid rdev size blksize blocks atime mtime ctime`
    fn parse(line: &str) -> Result<Self> {
        let fields: Vec<i64> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Storage {
                message: format!("malformed stat record '{}': {}", line.trim(), e),
            })?;
        if fields.len() < 13 {
            return Err(Error::Storage {
                message: format!("short stat record '{}'", line.trim()),
            });
        }
        Ok(Self {
            mode: fields[2],
            size: fields[7],
        })
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

type Connection = BufReader<TcpStream>;

/// What a request reads after a successful status line
#[derive(Debug, Clone, Copy)]
enum Body {
    None,
    Stat,
    Names,
}

#[derive(Debug)]
enum Reply {
    Done,
    Stat(ChirpStat),
    Names(Vec<String>),
}

/// Minimal async Chirp client
///
/// A request that times out or fails mid-exchange leaves unread replies on
/// the wire, so the connection is dropped and the next request opens a
/// fresh, re-authenticated one.
#[derive(Debug)]
pub struct ChirpClient {
    server: String,
    methods: Vec<String>,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl ChirpClient {
    /// Connect and authenticate
    ///
    /// # Arguments
    /// * `server` - `host` or `host:port`
    /// * `methods` - Authentication methods, tried in order
    /// * `timeout` - Bound on connecting and on every request
    pub async fn connect(server: &str, methods: &[String], timeout: Duration) -> Result<Self> {
        let address = if server.contains(':') {
            server.to_string()
        } else {
            format!("{}:{}", server, DEFAULT_PORT)
        };

        let conn = open(&address, methods, timeout).await?;
        Ok(Self {
            server: address,
            methods: methods.to_vec(),
            timeout,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Run one request, reconnecting first if the last exchange broke off
    async fn call(&self, request: &str, path: &str, body: Body) -> Result<Reply> {
        let mut guard = self.conn.lock().await;
        let conn = match &mut *guard {
            Some(conn) => conn,
            slot @ None => {
                debug!(server = %self.server, "Reconnecting to chirp server");
                slot.insert(open(&self.server, &self.methods, self.timeout).await?)
            }
        };

        debug!(server = %self.server, request = request.trim(), "Chirp request");
        let outcome = tokio::time::timeout(self.timeout, exchange(conn, request, path, body)).await;

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            // the server answered with an error status, nothing left to read
            Ok(Err(e @ (Error::PathNotFound { .. } | Error::ChirpStatus { .. }))) => Err(e),
            Ok(Err(e)) => {
                *guard = None;
                Err(e)
            }
            Err(_) => {
                *guard = None;
                Err(Error::StorageUnavailable {
                    backend: format!("chirp://{} ({} timed out)", self.server, request.trim()),
                })
            }
        }
    }

    pub async fn stat(&self, path: &str) -> Result<ChirpStat> {
        let request = format!("stat {}\n", encode(path));
        match self.call(&request, path, Body::Stat).await? {
            Reply::Stat(stat) => Ok(stat),
            other => Err(unexpected(&request, other)),
        }
    }

    /// Names in a directory, including `.` and `..`
    pub async fn getdir(&self, path: &str) -> Result<Vec<String>> {
        let request = format!("getdir {}\n", encode(path));
        match self.call(&request, path, Body::Names).await? {
            Reply::Names(names) => Ok(names),
            other => Err(unexpected(&request, other)),
        }
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let request = format!("mkdir {} {}\n", encode(path), mode);
        self.call(&request, path, Body::None).await.map(|_| ())
    }

    /// Remove a file or a whole directory tree
    pub async fn rmall(&self, path: &str) -> Result<()> {
        let request = format!("rmall {}\n", encode(path));
        self.call(&request, path, Body::None).await.map(|_| ())
    }
}

fn unexpected(request: &str, reply: Reply) -> Error {
    Error::Storage {
        message: format!("unexpected reply {:?} to '{}'", reply, request.trim()),
    }
}

fn encode(path: &str) -> String {
    utf8_percent_encode(path, PATH_ESCAPE).to_string()
}

/// Connect to `address` and authenticate within `timeout`
async fn open(address: &str, methods: &[String], timeout: Duration) -> Result<Connection> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| Error::StorageUnavailable {
            backend: format!("chirp://{} (connect timed out)", address),
        })?
        .map_err(|e| Error::StorageUnavailable {
            backend: format!("chirp://{} ({})", address, e),
        })?;

    let mut conn = BufReader::new(stream);
    let subject = tokio::time::timeout(timeout, authenticate(&mut conn, methods))
        .await
        .map_err(|_| Error::StorageUnavailable {
            backend: format!("chirp://{} (authentication timed out)", address),
        })??
        .ok_or_else(|| Error::AuthenticationFailed {
            server: address.to_string(),
        })?;

    info!(server = %address, %subject, "Connected to chirp server");
    Ok(conn)
}

/// Write a request and read its status line and body
async fn exchange(conn: &mut Connection, request: &str, path: &str, body: Body) -> Result<Reply> {
    conn.get_mut().write_all(request.as_bytes()).await?;

    let line = read_line(conn).await?;
    let status: i64 = line.trim().parse().map_err(|_| Error::Storage {
        message: format!("unexpected chirp response '{}'", line.trim()),
    })?;
    match status {
        s if s >= 0 => {}
        DOESNT_EXIST => {
            return Err(Error::PathNotFound {
                path: path.to_string(),
            })
        }
        s => {
            return Err(Error::ChirpStatus {
                request: request.trim().to_string(),
                status: s,
            })
        }
    }

    match body {
        Body::None => Ok(Reply::Done),
        Body::Stat => Ok(Reply::Stat(ChirpStat::parse(&read_line(conn).await?)?)),
        Body::Names => {
            let mut names = Vec::new();
            loop {
                let line = read_line(conn).await?;
                let name = line.trim_end_matches(['\r', '\n']);
                if name.is_empty() {
                    break;
                }
                names.push(name.to_string());
            }
            Ok(Reply::Names(names))
        }
    }
}

async fn read_line(conn: &mut Connection) -> Result<String> {
    let mut line = String::new();
    if conn.read_line(&mut line).await? == 0 {
        return Err(Error::StorageUnavailable {
            backend: "chirp connection closed".to_string(),
        });
    }
    Ok(line)
}

/// Offer each method until the server accepts one; returns the subject
async fn authenticate(conn: &mut Connection, methods: &[String]) -> Result<Option<String>> {
    for method in methods {
        conn.get_mut()
            .write_all(format!("{}\n", method).as_bytes())
            .await?;
        if read_line(conn).await?.trim() != "yes" {
            debug!(%method, "Chirp server declined authentication method");
            continue;
        }
        if read_line(conn).await?.trim() != "yes" {
            debug!(%method, "Chirp authentication failed");
            continue;
        }
        let subject = read_line(conn).await?.trim().to_string();
        return Ok(Some(subject));
    }
    Ok(None)
}

/// Chirp storage backend
#[derive(Debug)]
pub struct ChirpStorage {
    prefix: String,
    client: ChirpClient,
}

impl ChirpStorage {
    /// Connect to `server` and serve logical paths from `prefix`
    pub async fn connect(server: &str, prefix: &str, settings: &BackendSettings) -> Result<Self> {
        let client = ChirpClient::connect(server, &settings.chirp_auth, settings.chirp_timeout).await?;
        Ok(Self {
            prefix: normalize_prefix(prefix),
            client,
        })
    }
}

#[async_trait]
impl StorageBackend for ChirpStorage {
    fn name(&self) -> &'static str {
        "chirp"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    #[instrument(skip(self), fields(backend = "chirp"))]
    async fn exists(&self, pfn: &str) -> Result<bool> {
        match self.client.stat(pfn).await {
            Ok(_) => Ok(true),
            Err(Error::PathNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "chirp"))]
    async fn getsize(&self, pfn: &str) -> Result<FileSize> {
        let stat = self.client.stat(pfn).await?;
        Ok(FileSize::Bytes(stat.size.max(0) as u64))
    }

    #[instrument(skip(self), fields(backend = "chirp"))]
    async fn isdir(&self, pfn: &str) -> Result<bool> {
        Ok(self.client.stat(pfn).await?.is_dir())
    }

    #[instrument(skip(self), fields(backend = "chirp"))]
    async fn isfile(&self, pfn: &str) -> Result<bool> {
        Ok(!self.client.stat(pfn).await?.is_dir())
    }

    #[instrument(skip(self), fields(backend = "chirp"))]
    async fn list(&self, pfn: &str) -> Result<PathStream> {
        let base = pfn.trim_end_matches('/').to_string();
        let entries: Vec<Result<String>> = self
            .client
            .getdir(pfn)
            .await?
            .into_iter()
            .filter(|name| name != "." && name != "..")
            .map(|name| Ok(format!("{}/{}", base, name)))
            .collect();
        Ok(Box::pin(tokio_stream::iter(entries)))
    }

    #[instrument(skip(self), fields(backend = "chirp"))]
    async fn makedirs(&self, pfn: &str) -> Result<()> {
        // ancestors may sit in directories we cannot write, so only missing
        // components are created
        let mut current = String::new();
        for component in pfn.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            match self.client.stat(&current).await {
                Ok(_) => continue,
                Err(Error::PathNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            match self.client.mkdir(&current, 0o755).await {
                Ok(()) => {}
                Err(Error::ChirpStatus {
                    status: ALREADY_EXISTS,
                    ..
                }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "chirp"))]
    async fn remove(&self, pfn: &str) -> Result<()> {
        self.client.rmall(pfn).await
    }
}
