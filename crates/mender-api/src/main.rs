mod cli;
mod http;
mod monitor;
mod state;

use std::time::Duration;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::{AppState, EngineOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "mender", &mut std::io::stdout());
        return Ok(());
    }

    mender_observe::init_tracing(cli.log_format, cli.log_filter(), cli.otel)
        .map_err(|e| anyhow::anyhow!(e))?;

    let options = match &cli.command {
        Commands::Serve { engine, .. } | Commands::Run { engine, .. } => EngineOptions {
            memory: engine.memory,
            simulate: engine.simulate,
        },
        _ => EngineOptions::default(),
    };
    let state = AppState::init(options).await?;

    let outcome = match cli.command {
        Commands::Serve { host, port, .. } => {
            cli::serve::serve(&state, host, port, cli.json).await
        }

        Commands::Run {
            file, timeout_secs, ..
        } => {
            let result = cli::workflow::run_workflow(
                &state,
                &file,
                Duration::from_secs(timeout_secs),
                cli.json,
            )
            .await;
            state.dispatcher.shutdown().await;
            result
        }

        Commands::List { limit, skip } => {
            cli::workflow::list_workflows(&state, limit, skip, cli.json).await
        }

        Commands::Show { id } => cli::workflow::show_workflow(&state, &id, cli.json).await,

        Commands::Completions { .. } => unreachable!("handled above"),
    };

    mender_observe::shutdown_tracing();
    outcome
}
