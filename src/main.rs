use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    katha::logging::init().context("init logging")?;

    let cli = katha::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        katha::cli::Command::Generate(args) => {
            katha::pipeline::run(args).await.context("generate")?;
        }
        katha::cli::Command::Index(args) => {
            katha::index::run(args).await.context("index")?;
        }
        katha::cli::Command::Retrieve(args) => {
            katha::retriever::run(args).await.context("retrieve")?;
        }
        katha::cli::Command::Show(args) => {
            katha::story::show(args).context("show")?;
        }
    }

    Ok(())
}
