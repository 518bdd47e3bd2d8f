//! Request routing: one route per registry operation, errors mapped to fixed statuses.
//!
//! `handle` is transport-free (method, path, body in; status, body out) so the whole
//! API can be exercised without a socket.

use log::{debug, error};
use serde::{de::DeserializeOwned, Serialize};

use crate::api::{self, *};
use crate::config::DaemonConfig;
use crate::consts::{API_VERSION, VERSION};
use crate::error::{Error, Result};
use crate::metrics;
use crate::registry::{DeletePolicy, Registry};

/// Everything a handler needs; passed explicitly to every request.
#[derive(Clone)]
pub struct ApiContext {
    pub registry: Registry,
    pub cfg: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn json<T: Serialize>(v: &T) -> Result<Reply> {
        Ok(Reply {
            status: 200,
            content_type: "application/json",
            body: serde_json::to_string(v)?,
        })
    }

    fn text(body: String) -> Reply {
        Reply {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body,
        }
    }

    fn error(status: u16, e: &Error) -> Reply {
        let body = serde_json::to_string(&e.to_body()).unwrap_or_else(|_| {
            format!("{{\"kind\":\"{}\",\"message\":\"\"}}", e.kind().as_str())
        });
        Reply {
            status,
            content_type: "application/json",
            body,
        }
    }
}

/// (path, method)
const ROUTES: &[(&str, &str)] = &[
    (api::INFO, "GET"),
    (api::VOLUMES, "GET"),
    (api::VOLUME_CREATE, "POST"),
    (api::VOLUME_DELETE, "POST"),
    (api::VOLUME_INSPECT, "POST"),
    (api::VOLUME_MOUNT, "POST"),
    (api::VOLUME_UMOUNT, "POST"),
    (api::SNAPSHOT_CREATE, "POST"),
    (api::SNAPSHOT_DELETE, "POST"),
    (api::SNAPSHOT_INSPECT, "POST"),
    (api::BACKUP_CREATE, "POST"),
    (api::BACKUP_RESTORE, "POST"),
    (api::BACKUPS, "GET"),
    (api::RESOLVE, "POST"),
    (api::METRICS, "GET"),
];

pub fn handle(ctx: &ApiContext, method: &str, url: &str, body: &[u8]) -> Reply {
    let path = url.split('?').next().unwrap_or(url);

    let reply = match ROUTES.iter().find(|(p, _)| *p == path) {
        None => Reply::error(404, &Error::not_found(format!("no route {path}"))),
        Some((_, want)) if !want.eq_ignore_ascii_case(method) => Reply::error(
            405,
            &Error::invalid(format!("{method} not allowed on {path} (use {want})")),
        ),
        Some(_) => match route(ctx, path, body) {
            Ok(r) => r,
            Err(e) => {
                if e.kind().http_status() >= 500 {
                    error!("{} {}: {}", method, path, e);
                } else {
                    debug!("{} {}: {}", method, path, e);
                }
                Reply::error(e.kind().http_status(), &e)
            }
        },
    };

    metrics::record_request(reply.status < 400);
    reply
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| Error::invalid(format!("bad request body: {e}")))
}

fn opt(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn route(ctx: &ApiContext, path: &str, body: &[u8]) -> Result<Reply> {
    let reg = &ctx.registry;
    match path {
        api::INFO => Reply::json(&info(ctx)?),
        api::VOLUMES => Reply::json(&reg.list_volumes()?),
        api::VOLUME_CREATE => {
            let rq: VolumeCreateRequest = parse(body)?;
            let v = reg.create_volume(&rq.name, rq.size, opt(&rq.fs_type), rq.timeout())?;
            Reply::json(&v)
        }
        api::VOLUME_DELETE => {
            let rq: VolumeDeleteRequest = parse(body)?;
            let policy = if rq.cascade {
                DeletePolicy::Cascade
            } else {
                DeletePolicy::Strict
            };
            reg.delete_volume(&rq.reference, policy, rq.timeout())?;
            Reply::json(&Empty {})
        }
        api::VOLUME_INSPECT => {
            let rq: RefRequest = parse(body)?;
            Reply::json(&reg.inspect_volume(&rq.reference)?)
        }
        api::VOLUME_MOUNT => {
            let rq: VolumeMountRequest = parse(body)?;
            let v = reg.mount_volume(&rq.reference, opt(&rq.mount_point), rq.timeout())?;
            Reply::json(&v)
        }
        api::VOLUME_UMOUNT => {
            let rq: RefRequest = parse(body)?;
            Reply::json(&reg.umount_volume(&rq.reference, rq.timeout())?)
        }
        api::SNAPSHOT_CREATE => {
            let rq: SnapshotCreateRequest = parse(body)?;
            Reply::json(&reg.create_snapshot(&rq.volume, &rq.name, rq.timeout())?)
        }
        api::SNAPSHOT_DELETE => {
            let rq: SnapshotRefRequest = parse(body)?;
            reg.delete_snapshot(&rq.reference, opt(&rq.volume), rq.timeout())?;
            Reply::json(&Empty {})
        }
        api::SNAPSHOT_INSPECT => {
            let rq: SnapshotRefRequest = parse(body)?;
            Reply::json(&reg.inspect_snapshot(&rq.reference, opt(&rq.volume))?)
        }
        api::BACKUP_CREATE => {
            let rq: BackupCreateRequest = parse(body)?;
            let rec = reg.backup_snapshot(
                &rq.reference,
                opt(&rq.volume),
                &rq.dest_url,
                rq.timeout(),
            )?;
            Reply::json(&rec)
        }
        api::BACKUP_RESTORE => {
            let rq: BackupRestoreRequest = parse(body)?;
            Reply::json(&reg.restore_snapshot(&rq.source_url, &rq.name, rq.timeout())?)
        }
        api::BACKUPS => Reply::json(&reg.list_backups()?),
        api::RESOLVE => {
            let rq: RefRequest = parse(body)?;
            let (kind, uuid) = reg.resolve(&rq.reference)?;
            Reply::json(&ResolveResponse { kind, uuid })
        }
        api::METRICS => Ok(Reply::text(metrics::snapshot().to_prometheus())),
        _ => Err(Error::not_found(format!("no route {path}"))),
    }
}

fn info(ctx: &ApiContext) -> Result<InfoResponse> {
    let reg = &ctx.registry;
    let driver = reg.driver();
    Ok(InfoResponse {
        version: VERSION.to_string(),
        api_version: API_VERSION.to_string(),
        root: ctx.cfg.root.display().to_string(),
        socket: ctx.cfg.socket.display().to_string(),
        driver: driver.name().to_string(),
        driver_info: driver.info()?,
        mounts_dir: ctx.cfg.mounts_dir().display().to_string(),
        default_volume_size: ctx.cfg.default_volume_size,
        min_abbrev_len: reg.min_abbrev_len(),
        stats: reg.stats()?,
        verify: match reg.verify() {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::vfs::VfsDriver;
    use crate::error::{ErrorBody, ErrorKind};
    use crate::model::Volume;
    use crate::registry::RegistryOptions;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_root(prefix: &str) -> PathBuf {
        let base = std::env::temp_dir();
        let pid = std::process::id();
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = base.join(format!("volumed-{prefix}-{pid}-{t}"));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn ctx(prefix: &str) -> ApiContext {
        let root = unique_root(prefix);
        let driver = Arc::new(VfsDriver::open(&root.join("vfs")).unwrap());
        let registry = Registry::open(&root, driver, RegistryOptions::default()).unwrap();
        let cfg = DaemonConfig::default().with_root(&root);
        ApiContext { registry, cfg }
    }

    fn kind_of(r: &Reply) -> ErrorKind {
        serde_json::from_str::<ErrorBody>(&r.body).unwrap().kind
    }

    #[test]
    fn create_inspect_delete_over_handlers() {
        let c = ctx("h-crud");
        let r = handle(
            &c,
            "POST",
            api::VOLUME_CREATE,
            br#"{"name":"data1","size":1048576}"#,
        );
        assert_eq!(r.status, 200, "{}", r.body);
        let v: Volume = serde_json::from_str(&r.body).unwrap();
        assert_eq!(v.name, "data1");

        let r = handle(&c, "POST", api::VOLUME_INSPECT, br#"{"ref":"data1"}"#);
        assert_eq!(serde_json::from_str::<Volume>(&r.body).unwrap(), v);

        let r = handle(&c, "POST", api::VOLUME_DELETE, br#"{"ref":"data1"}"#);
        assert_eq!(r.status, 200);
        assert_eq!(r.body, "{}");

        let r = handle(&c, "POST", api::VOLUME_DELETE, br#"{"ref":"data1"}"#);
        assert_eq!(r.status, 404);
        assert_eq!(kind_of(&r), ErrorKind::NotFound);
    }

    #[test]
    fn routing_errors() {
        let c = ctx("h-route");
        let r = handle(&c, "GET", "/v1/nope", b"");
        assert_eq!(r.status, 404);

        let r = handle(&c, "GET", api::VOLUME_CREATE, b"");
        assert_eq!(r.status, 405);
        assert_eq!(kind_of(&r), ErrorKind::InvalidArgument);

        let r = handle(&c, "POST", api::VOLUME_CREATE, b"{not json");
        assert_eq!(r.status, 400);

        let r = handle(&c, "POST", api::VOLUME_CREATE, br#"{"size":0}"#);
        assert_eq!(r.status, 400);

        let r = handle(&c, "POST", api::RESOLVE, br#"{"ref":"abc"}"#);
        assert_eq!(r.status, 400, "short hex ref is an invalid abbreviation");
    }

    #[test]
    fn info_and_metrics() {
        let c = ctx("h-info");
        let r = handle(&c, "GET", api::INFO, b"");
        assert_eq!(r.status, 200);
        let info: InfoResponse = serde_json::from_str(&r.body).unwrap();
        assert_eq!(info.driver, "vfs");
        assert_eq!(info.verify, "ok");

        let r = handle(&c, "GET", api::METRICS, b"");
        assert!(r.body.contains("volumed_requests_total"));
        assert!(r.content_type.starts_with("text/plain"));
    }
}
