use anyhow::Result;

use volumed::client::Client;

use crate::util::print_json;

pub fn exec(client: &Client, json: bool) -> Result<()> {
    let info = client.info()?;
    if json {
        return print_json(&info);
    }
    println!("volumed {} (api v{})", info.version, info.api_version);
    println!("  root:                {}", info.root);
    println!("  socket:              {}", info.socket);
    println!("  driver:              {}", info.driver);
    for (k, v) in &info.driver_info {
        println!("    {:<18} {}", format!("{k}:"), v);
    }
    println!("  mounts dir:          {}", info.mounts_dir);
    println!("  default volume size: {}", info.default_volume_size);
    println!("  min abbrev len:      {}", info.min_abbrev_len);
    println!(
        "  volumes:             {} ({} mounted)",
        info.stats.volumes, info.stats.mounted
    );
    println!("  snapshots:           {}", info.stats.snapshots);
    println!("  backup records:      {}", info.stats.backups);
    println!("  index check:         {}", info.verify);
    Ok(())
}

pub fn exec_resolve(client: &Client, reference: &str) -> Result<()> {
    print_json(&client.resolve(reference)?)
}
