use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use forge_core::ForgeConfig;
use forge_core::ForgeServices;
use forge_core::record::ExecutionStatus;
use forge_core::session::SessionId;
use forge_core::session::SessionSpec;
use forge_core::stream::ChaosConfig;
use forge_core::stream::SessionView;

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Session id. A random one is generated when omitted.
    #[arg(long = "id", value_name = "ID")]
    pub id: Option<String>,

    /// Run the command through the configured shell instead of exec'ing it.
    #[arg(long = "shell", default_value_t = false)]
    pub shell: bool,

    /// Extra environment for the session (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Shell step that must succeed before the command starts (repeatable).
    #[arg(long = "bootstrap", value_name = "CMD")]
    pub bootstrap: Vec<String>,

    /// Probability of dropping each live event.
    #[arg(long = "drop-rate", value_name = "P", default_value_t = 0.0)]
    pub drop_rate: f64,

    /// Probability of delivering an event after its successor.
    #[arg(long = "reorder-rate", value_name = "P", default_value_t = 0.0)]
    pub reorder_rate: f64,

    /// Seed for the fault injector.
    #[arg(long = "seed", value_name = "N")]
    pub seed: Option<u64>,

    /// Print the final view snapshot as JSON instead of streaming lines.
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,

    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl RunArgs {
    fn chaos(&self) -> Result<ChaosConfig> {
        for (flag, rate) in [
            ("--drop-rate", self.drop_rate),
            ("--reorder-rate", self.reorder_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{flag} must be between 0 and 1 (got {rate})");
            }
        }
        Ok(ChaosConfig {
            drop_rate: self.drop_rate,
            reorder_rate: self.reorder_rate,
            seed: self.seed,
        })
    }

    fn spec(&self) -> SessionSpec {
        let mut spec = if self.shell {
            SessionSpec::shell(self.command.join(" "))
        } else {
            SessionSpec::local(self.command.iter().cloned())
        };
        for (key, value) in &self.env {
            spec = spec.with_env(key.clone(), value.clone());
        }
        for step in &self.bootstrap {
            spec = spec.with_bootstrap(step.clone());
        }
        spec
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

pub async fn run(args: RunArgs, config: &ForgeConfig) -> Result<ExitCode> {
    let chaos = args.chaos()?;
    let services = ForgeServices::from_config(config, chaos)
        .await
        .context("failed to open record store")?;
    let session_id = args
        .id
        .clone()
        .map(SessionId::new)
        .unwrap_or_else(SessionId::generate);

    // Subscribe before the process starts so its first line is not missed.
    let mut view = services.open_view(session_id.clone()).await;
    let mut handle = services
        .sessions
        .start(Some(session_id.clone()), args.spec())
        .await
        .with_context(|| format!("failed to start session {session_id}"))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0;
    let mut interrupted = false;
    loop {
        let update = tokio::select! {
            update = view.next_update() => update,
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                let response = services.sessions.stop(&session_id).await;
                tracing::info!(session_id = %session_id, status = %response.status, "interrupted");
                continue;
            }
        };
        if update.is_none() {
            break;
        }
        if !args.json {
            printed = print_new_lines(&view, printed);
        }
    }

    let status = handle.wait().await;
    let snapshot = view.snapshot();
    if args.json {
        crate::print_snapshot_json(&snapshot)?;
    } else {
        print_new_lines(&view, printed);
        println!("{}", snapshot.status_line());
    }
    Ok(exit_code(status))
}

fn print_new_lines(view: &SessionView, printed: usize) -> usize {
    let lines = view.lines();
    for line in lines.iter().skip(printed) {
        println!("{line}");
    }
    lines.len()
}

fn exit_code(status: Option<ExecutionStatus>) -> ExitCode {
    match status {
        Some(ExecutionStatus::Done) => ExitCode::SUCCESS,
        Some(ExecutionStatus::Cancelled) => ExitCode::from(130),
        Some(ExecutionStatus::Error) | None => ExitCode::FAILURE,
    }
}
