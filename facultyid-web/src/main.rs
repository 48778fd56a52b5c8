use clap::Parser;
use facultyid_core::Config;
use facultyid_web::{run_server, AppState};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facultyid-web")]
#[command(about = "Faculty recognition web service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the system/user fallback chain)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding [server] bind
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = Config::load_or_default(cli.config.as_deref())?;
    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());

    let mut service = facultyid_core::open_service(&config)?;
    service.resolver_mut().engine_mut().warm_up()?;
    if service.registry().is_empty() {
        log::warn!(
            "No faculty details loaded from {}; every match will report missing details",
            config.storage.data_path.display()
        );
    }

    run_server(
        Arc::new(AppState::new(service)),
        &bind,
        config.server.max_body_bytes,
    )
    .await
}
