//! Client of the volumed API over the Unix socket.
//!
//! One connection per request: write a single HTTP/1.1 request with
//! `Connection: close`, read until EOF, map the response. No retries.
//!
//! Минимальный HTTP/1.1 - только то, что отдаёт tiny_http:
//! Content-Length или chunked, без keep-alive.

use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::api::{self, *};
use crate::consts::CLIENT_IO_TIMEOUT_SECS;
use crate::error::{Error, ErrorBody, ErrorKind};
use crate::model::{BackupRecord, Snapshot, Volume};

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// No daemon: cannot connect, connection dropped.
    #[error("transport: {0}")]
    Transport(String),

    /// Daemon answered something that is not a valid response.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Daemon refused the request.
    #[error(transparent)]
    Api(#[from] Error),
}

impl ClientError {
    /// Process exit code of a one-shot command failing with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Api(e) => e.kind().exit_code(),
            _ => 1,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Api(e) => Some(e.kind()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    socket: PathBuf,
    io_timeout: Duration,
}

impl Client {
    pub fn new<P: Into<PathBuf>>(socket: P) -> Self {
        Self {
            socket: socket.into(),
            io_timeout: Duration::from_secs(CLIENT_IO_TIMEOUT_SECS),
        }
    }

    pub fn with_io_timeout(mut self, t: Duration) -> Self {
        self.io_timeout = t;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    // ---------- API ----------

    pub fn info(&self) -> ClientResult<InfoResponse> {
        self.get_json(api::INFO)
    }

    pub fn list_volumes(&self) -> ClientResult<Vec<Volume>> {
        self.get_json(api::VOLUMES)
    }

    pub fn create_volume(&self, rq: &VolumeCreateRequest) -> ClientResult<Volume> {
        self.post_json(api::VOLUME_CREATE, rq)
    }

    pub fn delete_volume(&self, rq: &VolumeDeleteRequest) -> ClientResult<()> {
        self.post_json::<_, Empty>(api::VOLUME_DELETE, rq).map(|_| ())
    }

    pub fn inspect_volume(&self, reference: &str) -> ClientResult<Volume> {
        self.post_json(api::VOLUME_INSPECT, &ref_request(reference, None))
    }

    pub fn mount_volume(&self, rq: &VolumeMountRequest) -> ClientResult<Volume> {
        self.post_json(api::VOLUME_MOUNT, rq)
    }

    pub fn umount_volume(&self, reference: &str, timeout_ms: Option<u64>) -> ClientResult<Volume> {
        self.post_json(api::VOLUME_UMOUNT, &ref_request(reference, timeout_ms))
    }

    pub fn create_snapshot(&self, rq: &SnapshotCreateRequest) -> ClientResult<Snapshot> {
        self.post_json(api::SNAPSHOT_CREATE, rq)
    }

    pub fn delete_snapshot(&self, rq: &SnapshotRefRequest) -> ClientResult<()> {
        self.post_json::<_, Empty>(api::SNAPSHOT_DELETE, rq)
            .map(|_| ())
    }

    pub fn inspect_snapshot(&self, reference: &str, volume: Option<&str>) -> ClientResult<Snapshot> {
        let rq = SnapshotRefRequest {
            reference: reference.to_string(),
            volume: volume.map(str::to_string),
            timeout_ms: None,
        };
        self.post_json(api::SNAPSHOT_INSPECT, &rq)
    }

    pub fn backup_snapshot(&self, rq: &BackupCreateRequest) -> ClientResult<BackupRecord> {
        self.post_json(api::BACKUP_CREATE, rq)
    }

    pub fn restore_snapshot(&self, rq: &BackupRestoreRequest) -> ClientResult<Volume> {
        self.post_json(api::BACKUP_RESTORE, rq)
    }

    pub fn list_backups(&self) -> ClientResult<Vec<BackupRecord>> {
        self.get_json(api::BACKUPS)
    }

    pub fn resolve(&self, reference: &str) -> ClientResult<ResolveResponse> {
        self.post_json(api::RESOLVE, &ref_request(reference, None))
    }

    /// Prometheus text.
    pub fn metrics(&self) -> ClientResult<String> {
        let (status, body) = self.request("GET", api::METRICS, None)?;
        if status != 200 {
            return Err(api_error(status, &body).into());
        }
        String::from_utf8(body).map_err(|e| ClientError::Protocol(format!("metrics body: {e}")))
    }

    // ---------- transport ----------

    fn get_json<R: DeserializeOwned>(&self, path: &str) -> ClientResult<R> {
        let (status, body) = self.request("GET", path, None)?;
        decode(status, &body)
    }

    fn post_json<Q: Serialize, R: DeserializeOwned>(&self, path: &str, rq: &Q) -> ClientResult<R> {
        let payload = serde_json::to_vec(rq)
            .map_err(|e| ClientError::Protocol(format!("encode request: {e}")))?;
        let (status, body) = self.request("POST", path, Some(&payload))?;
        decode(status, &body)
    }

    /// Raw round trip: (status, body).
    pub fn request(&self, method: &str, path: &str, body: Option<&[u8]>) -> ClientResult<(u16, Vec<u8>)> {
        let transport =
            |what: &str, e: std::io::Error| ClientError::Transport(format!("{} {}: {}", what, self.socket.display(), e));

        let mut stream = UnixStream::connect(&self.socket).map_err(|e| transport("connect", e))?;
        stream
            .set_read_timeout(Some(self.io_timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.io_timeout)))
            .map_err(|e| transport("configure", e))?;

        let body = body.unwrap_or(&[]);
        let head = format!(
            "{method} {path} HTTP/1.1\r\n\
             Host: volumed\r\n\
             Connection: close\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\r\n",
            body.len()
        );
        stream
            .write_all(head.as_bytes())
            .and_then(|_| stream.write_all(body))
            .and_then(|_| stream.flush())
            .map_err(|e| transport("write", e))?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .map_err(|e| transport("read", e))?;
        parse_response(&raw)
    }
}

fn ref_request(reference: &str, timeout_ms: Option<u64>) -> RefRequest {
    RefRequest {
        reference: reference.to_string(),
        timeout_ms,
    }
}

fn decode<R: DeserializeOwned>(status: u16, body: &[u8]) -> ClientResult<R> {
    if !(200..300).contains(&status) {
        return Err(api_error(status, body).into());
    }
    serde_json::from_slice(body).map_err(|e| ClientError::Protocol(format!("decode response: {e}")))
}

/// Error body -> taxonomy; falls back to the status when the body is not ours.
fn api_error(status: u16, body: &[u8]) -> Error {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(b) => Error::from_body(b),
        Err(_) => {
            let msg = String::from_utf8_lossy(body).trim().to_string();
            let msg = if msg.is_empty() {
                format!("http status {status}")
            } else {
                msg
            };
            Error::from_body(ErrorBody {
                kind: ErrorKind::from_http_status(status),
                message: msg,
                matches: None,
            })
        }
    }
}

/// Status line + headers + body (Content-Length, chunked or until EOF).
pub(crate) fn parse_response(raw: &[u8]) -> ClientResult<(u16, Vec<u8>)> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ClientError::Protocol("response without header terminator".into()))?;
    let head = std::str::from_utf8(&raw[..split])
        .map_err(|_| ClientError::Protocol("response head is not utf-8".into()))?;
    let rest = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let proto = parts.next().unwrap_or_default();
    if !proto.starts_with("HTTP/1.") {
        return Err(ClientError::Protocol(format!("bad status line '{status_line}'")));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClientError::Protocol(format!("bad status line '{status_line}'")))?;

    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    for line in lines {
        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim();
        if k.eq_ignore_ascii_case("content-length") {
            content_length = Some(
                v.parse()
                    .map_err(|_| ClientError::Protocol(format!("bad content-length '{v}'")))?,
            );
        } else if k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked") {
            chunked = true;
        }
    }

    let body = if chunked {
        decode_chunked(rest)?
    } else if let Some(n) = content_length {
        if rest.len() < n {
            return Err(ClientError::Protocol(format!(
                "truncated body: {} of {} bytes",
                rest.len(),
                n
            )));
        }
        rest[..n].to_vec()
    } else {
        rest.to_vec()
    };
    Ok((status, body))
}

fn decode_chunked(mut data: &[u8]) -> ClientResult<Vec<u8>> {
    let bad = |m: &str| ClientError::Protocol(format!("chunked body: {m}"));
    let mut out = Vec::new();
    loop {
        let eol = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| bad("missing chunk size"))?;
        let size_line = std::str::from_utf8(&data[..eol]).map_err(|_| bad("size is not utf-8"))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| bad("bad chunk size"))?;
        data = &data[eol + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size + 2 {
            return Err(bad("truncated chunk"));
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size + 2..];
    }
}
