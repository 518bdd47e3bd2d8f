use anyhow::Result;

use volumed::api::{SnapshotCreateRequest, SnapshotRefRequest};
use volumed::client::Client;

use crate::cli::SnapshotCmd;
use crate::util::print_json;

pub fn exec(client: &Client, cmd: SnapshotCmd) -> Result<()> {
    match cmd {
        SnapshotCmd::Create { volume, name, timeout_ms } => {
            let rq = SnapshotCreateRequest {
                volume,
                name: name.unwrap_or_default(),
                timeout_ms,
            };
            print_json(&client.create_snapshot(&rq)?)
        }
        SnapshotCmd::Delete { reference, volume, timeout_ms } => {
            let rq = SnapshotRefRequest { reference: reference.clone(), volume, timeout_ms };
            client.delete_snapshot(&rq)?;
            println!("deleted snapshot {}", reference);
            Ok(())
        }
        SnapshotCmd::Inspect { reference, volume } => {
            print_json(&client.inspect_snapshot(&reference, volume.as_deref())?)
        }
    }
}
