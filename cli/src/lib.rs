pub mod logs_cmd;
pub mod run_cmd;

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use forge_core::ForgeConfig;
use forge_core::config::default_config_path;
use forge_core::stream::ViewSnapshot;

/// Loads `--config` when given, otherwise `$FORGE_HOME/forge.toml`.
pub fn load_config(explicit: Option<&Path>) -> Result<ForgeConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path()
            .ok_or_else(|| anyhow!("cannot locate forge home; pass --config or set FORGE_HOME"))?,
    };
    ForgeConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

pub(crate) fn print_snapshot_json(snapshot: &ViewSnapshot) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(snapshot).context("failed to serialize view snapshot")?;
    println!("{rendered}");
    Ok(())
}
