mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use briefrun::config::BriefrunConfig;
use briefrun::coordinator::{Coordinator, JobStatus};
use briefrun::dify::DifyClient;
use briefrun::error::BriefrunError;
use cli::{Cli, Command};

/// Intervalo entre atualizações do spinner durante um run.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let default_filter = if cli.verbose { "briefrun=debug" } else { "briefrun=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = BriefrunConfig::load(cli.config.as_deref())?;
    if let Some(root) = cli.outputs_root {
        config.outputs_root = root;
    }

    let client = DifyClient::with_base_url(
        config.chat_api_key.clone(),
        config.workflow_api_key.clone(),
        &config.api_base_url,
        config.api_timeout(),
    )
    .context("failed to build the HTTP client")?;
    let coordinator = Coordinator::new(Arc::new(client), &config);

    match cli.command {
        Command::Run { company, queries } => {
            let titles = (!queries.is_empty()).then_some(queries);
            let ticket = surface(coordinator.submit_run(&company, titles.as_deref()).await)?;
            if ticket.status == JobStatus::Completed {
                ui::already_complete(&ticket.company);
                return Ok(());
            }
            run_until_idle(&coordinator, &ticket.company).await?;
        }
        Command::Status { company } => {
            ui::print_json(&surface(coordinator.get_status(company.as_deref()).await)?);
        }
        Command::Results { company } => {
            ui::print_json(&surface(coordinator.results(&company).await)?);
        }
        Command::Delete { company } => {
            let removed = surface(coordinator.delete_results(&company).await)?;
            ui::print_json(&serde_json::json!({ "ok": true, "removed": removed }));
        }
        Command::Proposal { company, force } => {
            let proposal = surface(coordinator.create_proposal(&company, force).await)?;
            println!("{proposal}");
        }
        Command::ProposalProgress { company } => {
            ui::print_json(&surface(coordinator.proposal_progress(&company))?);
        }
        Command::Companies => {
            for name in surface(coordinator.list_companies())? {
                println!("{name}");
            }
        }
        Command::Queries => {
            for (i, title) in coordinator.catalog().titles().iter().enumerate() {
                println!("{}. {title}", i + 1);
            }
        }
    }
    Ok(())
}

/// Acompanha o job com o spinner até o coordenador ficar ocioso.
async fn run_until_idle(coordinator: &Coordinator<DifyClient>, company: &str) -> Result<()> {
    let progress = ui::RunProgress::start(company);
    let idle = coordinator.wait_idle();
    tokio::pin!(idle);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut idle => break,
            _ = ticker.tick() => {
                if let Ok(status) = coordinator.get_status(Some(company)).await
                    && let Some(step_progress) = status.progress
                {
                    progress.update(step_progress);
                }
            }
        }
    }

    let results = surface(coordinator.results(company).await)?;
    let terminal = surface(coordinator.last_terminal(company))?;
    progress.complete(terminal, results.progress);
    Ok(())
}

/// Loga o erro completo e devolve ao usuário apenas a mensagem pública.
fn surface<T>(result: briefrun::error::Result<T>) -> Result<T> {
    result.map_err(|e: BriefrunError| {
        tracing::error!(error = %e, "request failed");
        anyhow!(e.public_message())
    })
}
