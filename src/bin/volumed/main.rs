use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::path::Path;

use volumed::client::{Client, ClientError};

mod cli;
mod util;
mod cmd_server;
mod cmd_info;
mod cmd_volume;
mod cmd_snapshot;
mod cmd_backup;

fn init_logger(debug: bool, log_file: Option<&Path>) -> Result<()> {
    // Уровень берём из RUST_LOG, иначе дефолт - info. --debug перекрывает.
    let mut b = Builder::from_env(Env::default().default_filter_or("info"));
    b.format_timestamp_millis();
    if debug {
        b.filter_level(LevelFilter::Debug);
    }
    if let Some(p) = log_file {
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .with_context(|| format!("open log file {}", p.display()))?;
        b.target(Target::Pipe(Box::new(f)));
    }
    b.try_init().context("init logger")?;
    Ok(())
}

/// 1 for transport/startup failures, 2..=8 for daemon errors by kind.
fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<ClientError>()
        .map(ClientError::exit_code)
        .unwrap_or(1)
}

fn main() {
    let cli = cli::Cli::parse();
    if let Err(e) = init_logger(cli.debug, cli.log.as_deref()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: cli::Cli) -> Result<()> {
    let client = Client::new(&cli.socket);
    match cli.cmd {
        cli::Cmd::Server(args) =>
            cmd_server::exec(cli.socket, args),

        cli::Cmd::Info =>
            cmd_info::exec(&client, cli.json),

        cli::Cmd::Resolve { reference } =>
            cmd_info::exec_resolve(&client, &reference),

        cli::Cmd::Volume(cmd) =>
            cmd_volume::exec(&client, cmd, cli.json),

        cli::Cmd::Snapshot(cmd) =>
            cmd_snapshot::exec(&client, cmd),

        cli::Cmd::Backup(cmd) =>
            cmd_backup::exec(&client, cmd, cli.json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volumed::Error;

    #[test]
    fn exit_codes_follow_error_kind() {
        let e: anyhow::Error = ClientError::Api(Error::not_found("x")).into();
        assert_eq!(exit_code(&e), 3);
        let e: anyhow::Error = ClientError::Transport("refused".into()).into();
        assert_eq!(exit_code(&e), 1);
        let e = anyhow::anyhow!("startup");
        assert_eq!(exit_code(&e), 1);
    }

    #[test]
    fn server_flags_override_defaults() {
        let args = cli::ServerArgs {
            root: Some("/tmp/vd-root".into()),
            default_volume_size: Some("512M".into()),
            workers: Some(2),
            ..Default::default()
        };
        let cfg = cmd_server::build_config("/tmp/vd.sock".into(), args).unwrap();
        assert_eq!(cfg.root, std::path::PathBuf::from("/tmp/vd-root"));
        assert_eq!(cfg.default_volume_size, 512 << 20);
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.mounts_dir(), std::path::PathBuf::from("/tmp/vd-root/mounts"));
    }
}
