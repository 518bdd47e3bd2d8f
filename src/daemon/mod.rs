//! volumed daemon: Registry + Driver behind the `/v1` API on a Unix socket.
//!
//! Startup order:
//! 1) create root, take `<root>/lock` (refuse if held);
//! 2) reconcile config with `<root>/volumed.cfg`, validate;
//! 3) init driver, load registry records;
//! 4) remove a stale socket (only now, with the lock held) and bind;
//! 5) spawn `workers` threads looping on `Server::recv`.
//!
//! Teardown: stop flag + `unblock` per worker, join, remove socket, release the lock.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tiny_http::{Header, Request, Response, Server};

use crate::config::DaemonConfig;
use crate::driver;
use crate::error::Error;
use crate::lock::{try_lock_root, RootLock};
use crate::registry::{Registry, RegistryOptions};

pub mod handlers;

pub use handlers::{handle, ApiContext, Reply};

/// Request bodies above this are refused.
const MAX_BODY_BYTES: u64 = 1 << 20;

pub struct Daemon {
    ctx: ApiContext,
    server: Arc<Server>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    socket: PathBuf,
    socket_removed: bool,
    _lock: RootLock,
}

impl Daemon {
    /// Bring the daemon up and start serving. Any failure is fatal and leaves no socket.
    pub fn start(cfg: DaemonConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.root)
            .with_context(|| format!("create root {}", cfg.root.display()))?;
        let lock = try_lock_root(&cfg.root)?;
        debug!("root lock held: {}", lock.path().display());

        let cfg = cfg.reconcile_with_root()?;
        cfg.validate()?;
        info!("volumed {} starting: {}", crate::consts::VERSION, cfg);

        let drv = driver::init(&cfg.driver, &cfg.root, &cfg.driver_opts)
            .with_context(|| format!("init driver '{}'", cfg.driver))?;

        let opts = RegistryOptions::default()
            .with_min_abbrev_len(cfg.min_abbrev_len)
            .with_mounts_dir(cfg.mounts_dir())
            .with_default_volume_size(cfg.default_volume_size)
            .with_driver_timeout(cfg.driver_timeout_ms.map(Duration::from_millis));
        let registry = Registry::open(&cfg.root, drv, opts)
            .with_context(|| format!("load registry from {}", cfg.root.display()))?;
        let stats = registry.stats().context("registry stats")?;
        info!(
            "registry loaded: {} volumes, {} snapshots, {} backup records",
            stats.volumes, stats.snapshots, stats.backups
        );

        let socket = cfg.socket.clone();
        let server = bind_socket(&socket)?;
        info!("listening on {}", socket.display());

        let ctx = ApiContext { registry, cfg };
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(ctx.cfg.workers);
        for id in 0..ctx.cfg.workers {
            let server = Arc::clone(&server);
            let stop = Arc::clone(&stop);
            let ctx = ctx.clone();
            let h = thread::Builder::new()
                .name(format!("volumed-worker-{id}"))
                .spawn(move || worker_loop(id, &server, &ctx, &stop))
                .context("spawn worker thread")?;
            workers.push(h);
        }

        Ok(Self {
            ctx,
            server,
            stop,
            workers,
            socket,
            socket_removed: false,
            _lock: lock,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.ctx.cfg
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Stop workers, remove the socket, release the root lock.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_workers();
        self.remove_socket()
    }

    fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.stop.store(true, Ordering::SeqCst);
        for _ in 0..self.workers.len() {
            self.server.unblock();
        }
        for h in std::mem::take(&mut self.workers) {
            if h.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        info!("workers stopped");
    }

    fn remove_socket(&mut self) -> Result<()> {
        if self.socket_removed {
            return Ok(());
        }
        self.socket_removed = true;
        match fs::remove_file(&self.socket) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!("remove socket {}: {}", self.socket.display(), e)),
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.stop_workers();
        if let Err(e) = self.remove_socket() {
            warn!("{:#}", e);
        }
    }
}

fn bind_socket(socket: &Path) -> Result<Arc<Server>> {
    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir {}", parent.display()))?;
    }
    if socket.exists() {
        // лок root уже у нас - значит сокет остался от упавшего процесса
        warn!("removing stale socket {}", socket.display());
        fs::remove_file(socket)
            .with_context(|| format!("remove stale socket {}", socket.display()))?;
    }
    let server = Server::http_unix(socket)
        .map_err(|e| anyhow!("bind unix socket {}: {}", socket.display(), e))?;
    Ok(Arc::new(server))
}

fn worker_loop(id: usize, server: &Server, ctx: &ApiContext, stop: &AtomicBool) {
    debug!("worker {} started", id);
    loop {
        let rq = match server.recv() {
            Ok(rq) => rq,
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!("worker {}: recv error: {}", id, e);
                continue;
            }
        };
        serve(ctx, rq);
    }
    debug!("worker {} stopped", id);
}

fn serve(ctx: &ApiContext, mut rq: Request) {
    let method = rq.method().as_str().to_string();
    let url = rq.url().to_string();

    let mut body = Vec::new();
    let read = rq
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body);
    let reply = match read {
        Err(e) => Reply {
            status: 400,
            content_type: "application/json",
            body: error_json(&Error::invalid(format!("read request body: {e}"))),
        },
        Ok(_) if body.len() as u64 > MAX_BODY_BYTES => Reply {
            status: 413,
            content_type: "application/json",
            body: error_json(&Error::invalid(format!(
                "request body larger than {MAX_BODY_BYTES} bytes"
            ))),
        },
        Ok(_) => handle(ctx, &method, &url, &body),
    };
    debug!("{} {} -> {}", method, url, reply.status);

    let mut resp = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(ct) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        resp.add_header(ct);
    }
    if let Err(e) = rq.respond(resp) {
        debug!("respond {} {}: {}", method, url, e);
    }
}

fn error_json(e: &Error) -> String {
    serde_json::to_string(&e.to_body()).unwrap_or_default()
}
