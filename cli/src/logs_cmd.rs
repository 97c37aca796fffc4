use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use forge_core::ForgeConfig;
use forge_core::services::open_record_store;
use forge_core::session::SessionId;
use forge_core::stream::LocalBroadcast;
use forge_core::stream::SessionView;

#[derive(Debug, Parser)]
pub struct LogsArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    /// Print the view snapshot as JSON.
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,
}

/// Offline viewer: no live channel exists in this process, so the view
/// always takes the degraded path and renders the persisted record.
pub async fn run(args: LogsArgs, config: &ForgeConfig) -> Result<ExitCode> {
    if config.records.dir.is_none() {
        bail!("`forge logs` needs [records] dir in forge.toml");
    }
    let records = open_record_store(config)
        .await
        .context("failed to open record store")?;
    let hub = LocalBroadcast::new(config.channel.capacity);
    hub.shutdown();

    let view = SessionView::attach(SessionId::new(args.id), &hub, records.as_ref()).await;
    let snapshot = view.snapshot();
    if args.json {
        crate::print_snapshot_json(&snapshot)?;
    } else {
        for line in &snapshot.lines {
            println!("{line}");
        }
        println!("{}", snapshot.status_line());
    }

    Ok(if view.persisted_record().is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
