mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use mediahound::classifier;
use mediahound::config::Config;
use mediahound::discovery::{self, Candidate, SessionStatus};
use mediahound::observability;
use mediahound::tasks::cancel_pair;
use mediahound::transcode::Transcoder;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;
    observability::init_tracing(&config.telemetry.log_filter);

    match cli.command {
        Commands::Server(args) => mediahound::api::run(config, args.address).await?,
        Commands::Discover(args) => discover(config, &args.url).await?,
        Commands::Probe => probe(config).await?,
    }

    Ok(())
}

/// One discovery in-process; Ctrl+C cancels it.
async fn discover(config: Config, url: &str) -> Result<(), AnyError> {
    if classifier::is_direct_media_url(url) {
        let extension = classifier::resolve_extension(url, "", &config.discovery.default_extension);
        print_candidates("direct", &[Candidate::new(url, "", extension)])?;
        return Ok(());
    }
    if classifier::is_drm_protected(url, &config.discovery.drm_domains) {
        return Err("This site uses DRM protection. Cannot extract protected content.".into());
    }

    let driver = discovery::default_driver(&config);
    let discoverer = discovery::select_discoverer(&config, driver).await?;

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling discovery");
            handle.cancel();
        }
    });

    let outcome = discoverer
        .discover(url, &signal, Arc::new(|status: SessionStatus| debug!(?status, "Discovery status")))
        .await?;
    info!(
        found = outcome.candidates.len(),
        observed = outcome.observed_responses,
        "Discovery finished"
    );
    print_candidates(discoverer.name(), &outcome.candidates)
}

fn print_candidates(discoverer: &str, candidates: &[Candidate]) -> Result<(), AnyError> {
    let listed: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| {
            json!({
                "index": index,
                "url": c.url,
                "media_type": c.media_type,
                "extension": c.extension,
                "size_bytes": c.size_bytes,
            })
        })
        .collect();

    let report = json!({ "discoverer": discoverer, "candidates": listed });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn probe(config: Config) -> Result<(), AnyError> {
    let driver = discovery::default_driver(&config);
    let discoverer = discovery::select_discoverer(&config, driver).await;
    let transcoder = Transcoder::new(&config.transcode);

    let report = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "discoverer": match &discoverer {
            Ok(d) => json!(d.name()),
            Err(e) => json!({ "error": e.to_string() }),
        },
        "browser_feature": cfg!(feature = "browser"),
        "transcoder": {
            "program": config.transcode.program.display().to_string(),
            "available": transcoder.is_available().await,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
