use anyhow::Result;

use volumed::api::{VolumeCreateRequest, VolumeDeleteRequest, VolumeMountRequest};
use volumed::client::Client;

use crate::cli::VolumeCmd;
use crate::util::{print_json, print_volumes, size_arg};

pub fn exec(client: &Client, cmd: VolumeCmd, json: bool) -> Result<()> {
    match cmd {
        VolumeCmd::Create { name, size, fs_type, timeout_ms } => {
            let rq = VolumeCreateRequest {
                name: name.unwrap_or_default(),
                size: size_arg(size)?,
                fs_type,
                timeout_ms,
            };
            print_json(&client.create_volume(&rq)?)
        }
        VolumeCmd::Delete { reference, cascade, timeout_ms } => {
            let rq = VolumeDeleteRequest { reference: reference.clone(), cascade, timeout_ms };
            client.delete_volume(&rq)?;
            println!("deleted volume {}", reference);
            Ok(())
        }
        VolumeCmd::List => {
            let vols = client.list_volumes()?;
            if json {
                print_json(&vols)
            } else {
                print_volumes(&vols);
                Ok(())
            }
        }
        VolumeCmd::Inspect { reference } => print_json(&client.inspect_volume(&reference)?),
        VolumeCmd::Mount { reference, mount_point, timeout_ms } => {
            let rq = VolumeMountRequest { reference, mount_point, timeout_ms };
            print_json(&client.mount_volume(&rq)?)
        }
        VolumeCmd::Umount { reference, timeout_ms } => {
            print_json(&client.umount_volume(&reference, timeout_ms)?)
        }
    }
}
