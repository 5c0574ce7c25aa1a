use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;

use katha::character_cache::CharacterCache;
use katha::illustrator::IllustratorOptions;
use katha::pipeline::{Collaborators, GenerateOptions, StoryPipeline};
use katha::server::{AppState, router};
use katha::settings::Settings;
use katha::story_config::PageSize;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Vector store written by `katha index`.
    #[arg(long, default_value = "db/passages.jsonl")]
    db: PathBuf,

    /// Directory for generated story JSON files.
    #[arg(long, default_value = "stories")]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = PageSize::Large)]
    page_size: PageSize,

    /// Character reference image cache; portraits are generated when set.
    #[arg(long)]
    cache: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    katha::logging::init_with_default("info,tower_http=debug")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting katha-app");

    let settings = Settings::from_env().context("load settings")?;
    let collaborators = Collaborators::from_settings(&settings, &args.db, true)?;
    let options = GenerateOptions {
        page_size: args.page_size,
        character_cache: args
            .cache
            .as_ref()
            .map(|path| CharacterCache::new(path).with_lock_timeout(settings.cache_lock_timeout)),
        illustrator: IllustratorOptions::from_settings(&settings),
        artifact_dir: Some(args.out.clone()),
        ..GenerateOptions::default()
    };

    let app = router(AppState::new(StoryPipeline::new(collaborators, options)));

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
