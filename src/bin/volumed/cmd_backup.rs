use anyhow::Result;

use volumed::api::{BackupCreateRequest, BackupRestoreRequest};
use volumed::client::Client;

use crate::cli::BackupCmd;
use crate::util::{print_backups, print_json};

pub fn exec(client: &Client, cmd: BackupCmd, json: bool) -> Result<()> {
    match cmd {
        BackupCmd::Create { reference, volume, dest, timeout_ms } => {
            let rq = BackupCreateRequest {
                reference,
                volume,
                dest_url: dest,
                timeout_ms,
            };
            print_json(&client.backup_snapshot(&rq)?)
        }
        BackupCmd::Restore { source, name, timeout_ms } => {
            let rq = BackupRestoreRequest {
                source_url: source,
                name: name.unwrap_or_default(),
                timeout_ms,
            };
            print_json(&client.restore_snapshot(&rq)?)
        }
        BackupCmd::List => {
            let recs = client.list_backups()?;
            if json {
                print_json(&recs)
            } else {
                print_backups(&recs);
                Ok(())
            }
        }
    }
}
