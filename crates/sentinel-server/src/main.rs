use anyhow::bail;
use clap::Parser;
use sentinel_config::ConfigLoader;
use sentinel_logging::init_logging;
use sentinel_powa::PowaSource;
use sentinel_server::{App, PowaPoolResource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "PoWA statistics analyzer and alerting", long_about = None)]
struct Args {
    /// Config file path (yaml, toml or json)
    #[arg(short, long, default_value = "config/sentinel.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Run a single cycle for every instance and exit
    #[arg(long)]
    once: bool,

    /// Start with defaults and environment overrides when the config file is missing
    #[arg(long)]
    allow_missing_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loader = ConfigLoader::new(&args.config);
    let config = if args.allow_missing_config {
        loader.load_or_default()?
    } else {
        loader.load()?
    };

    init_logging(&config.logging)?;
    info!("Starting Sentinel with config: {}", args.config.display());

    if args.check {
        info!(
            instances = config.instances.len(),
            channels = config.channels.len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    let source = Arc::new(PowaSource::new());
    let app = App::build(config, source.clone())
        .await?
        .with_resource(Arc::new(PowaPoolResource::new(source)));

    if args.once {
        let results = app.run_once().await;
        let mut failed = 0;
        for (instance, result) in &results {
            match result {
                Ok(summary) => info!(
                    instance = %instance,
                    findings = summary.findings,
                    emitted = summary.emitted,
                    "Cycle finished"
                ),
                Err(e) => {
                    failed += 1;
                    error!(instance = %instance, "Cycle failed: {}", e);
                }
            }
        }
        if failed > 0 {
            bail!("{} of {} instances failed", failed, results.len());
        }
        return Ok(());
    }

    let report = app.serve().await?;
    info!(
        signal = ?report.signal,
        cycles_drained = report.cycles_drained,
        resource_failures = report.resource_failures,
        "Sentinel stopped"
    );
    Ok(())
}
