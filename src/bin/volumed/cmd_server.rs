use anyhow::{Context, Result};
use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;

use volumed::config::{parse_size, DaemonConfig};
use volumed::Daemon;

use crate::cli::ServerArgs;

/// Default < VOLUMED_* env < flags; root-bound values may still be replaced by
/// `<root>/volumed.cfg` inside `Daemon::start`.
pub fn build_config(socket: PathBuf, args: ServerArgs) -> Result<DaemonConfig> {
    let mut cfg = DaemonConfig::from_env().with_socket(socket);
    if let Some(root) = args.root {
        cfg = cfg.with_root(root);
    }
    if let Some(driver) = args.driver {
        cfg = cfg.with_driver(driver);
    }
    if !args.driver_opts.is_empty() {
        cfg = cfg.with_driver_opts(args.driver_opts);
    }
    if args.mounts_dir.is_some() {
        cfg = cfg.with_mounts_dir(args.mounts_dir);
    }
    if let Some(s) = args.default_volume_size {
        cfg = cfg.with_default_volume_size(parse_size(&s)?);
    }
    if let Some(n) = args.workers {
        cfg = cfg.with_workers(n);
    }
    if let Some(n) = args.min_abbrev_len {
        cfg = cfg.with_min_abbrev_len(n);
    }
    if args.driver_timeout_ms.is_some() {
        cfg = cfg.with_driver_timeout_ms(args.driver_timeout_ms);
    }
    Ok(cfg)
}

pub fn exec(socket: PathBuf, args: ServerArgs) -> Result<()> {
    let cfg = build_config(socket, args)?;
    // до старта: сигнал, пришедший во время загрузки, не должен убить процесс без teardown
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("install SIGINT/SIGTERM handlers")?;
    let daemon = Daemon::start(cfg)?;
    info!(
        "volumed serving {} with {} workers",
        daemon.socket().display(),
        daemon.config().workers
    );
    serve_until(daemon, signals.forever())
}

/// Serve until the first stop signal, then tear down: workers, socket, root lock.
fn serve_until<I: Iterator<Item = i32>>(daemon: Daemon, mut stops: I) -> Result<()> {
    match stops.next() {
        Some(sig) => info!("signal {}: shutting down", sig),
        None => info!("signal source closed: shutting down"),
    }
    daemon.shutdown()?;
    info!("volumed stopped");
    Ok(())
}
