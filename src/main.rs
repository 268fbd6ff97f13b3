use anyhow::Context;
use lexio::{
    api::routes::create_router,
    build_ingestor,
    cli::{output::Output, Cli, Commands},
    rag::embeddings::build_embedder,
    utils::{logging, toml_config::LexioConfig},
    AppState,
};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let config_exists = cli.config.exists();
    let config = match LexioConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            output.error(&e.to_string());
            std::process::exit(1);
        }
    };

    logging::init(
        &config.server.log_level,
        config.server.log_format,
        cli.verbose,
    )?;

    if !config_exists {
        output.warning(&format!(
            "{} not found, using defaults",
            cli.config.display()
        ));
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, &output).await,
        Commands::Ingest { path, rebuild } => {
            let root = path.unwrap_or_else(|| PathBuf::from(&config.rag.data_dir));
            ingest(config, &root, rebuild, &output).await
        }
        Commands::Config { validate } => show_config(&config, &cli.config, validate, &output),
    }
}

async fn serve(config: LexioConfig, output: &Output) -> anyhow::Result<()> {
    output.banner();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::from_config(config)
        .await
        .context("Failed to initialise backends")?;
    let app = create_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    output.success(&format!("Listening on http://{}", addr));
    tracing::info!(%addr, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn ingest(
    config: LexioConfig,
    root: &Path,
    rebuild: bool,
    output: &Output,
) -> anyhow::Result<()> {
    output.info(&format!("Indexing {}", root.display()));

    let store = config
        .store
        .provider()
        .create_store()
        .await
        .context("Failed to open vector store")?;
    let embedder = build_embedder(&config.embedding).context("Failed to build embedder")?;
    let ingestor = build_ingestor(&config, store, embedder)?;

    let report = ingestor.ingest_path(root, rebuild).await?;
    output.ingest_report(&report);

    if report.files_indexed == 0 && report.files_seen > 0 {
        output.warning("No files were indexed");
    } else {
        output.success("Ingestion complete");
    }
    Ok(())
}

fn show_config(
    config: &LexioConfig,
    path: &Path,
    validate: bool,
    output: &Output,
) -> anyhow::Result<()> {
    if validate {
        output.success(&format!("{} is valid", path.display()));
        return Ok(());
    }

    output.header("Effective configuration");
    println!("{}", config.to_toml_string()?);
    output.hint("Environment variables (LEXIO_*, OLLAMA_URL) are already applied");
    Ok(())
}
