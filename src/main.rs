//! Toonify - image stylization engine and asset server.
//!
//! This binary starts the HTTP server, stylizes local files and issues
//! download links.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toonify::{
    asset::{AssetEncoder, DeliveryConfig, DeliveryService, OutputFormat},
    batch::{BatchDispatcher, DispatcherConfig, QuotaPolicy},
    config::{Cli, Command, ServeConfig, SignConfig, SignOutputFormat, StylizeConfig},
    server::{create_router, DownloadSigner, RouterConfig},
    store::{FsAssetStore, MemoryLedger},
    style::{EngineConfig, PlateLibrary, StyleEngine, StyleRequest, Treatment},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Stylize(config) => run_stylize(config).await,
        Command::Sign(config) => run_sign(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let signer = match config.download_secret.as_deref().map(DownloadSigner::new) {
        Some(Ok(signer)) => signer,
        Some(Err(e)) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
        None => {
            error!("Configuration error: no download secret");
            return ExitCode::FAILURE;
        }
    };

    info!("Toonify v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Data directory: {}", config.data_dir.display());
    match config.plates_dir {
        Some(ref dir) => info!("  Plates: {}", dir.display()),
        None => info!("  Plates: procedural"),
    }
    info!(
        "  Quota: {} item(s) per 24h for free callers",
        config.daily_limit
    );
    info!(
        "  Cache: {}MB variants, {}px thumbnails",
        config.cache_bytes / (1024 * 1024),
        config.thumb_width
    );
    info!("  Download links: valid for {}s", config.download_ttl);

    let store = match FsAssetStore::open(config.assets_dir()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Failed to open asset store at {}: {}",
                config.assets_dir().display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };
    let ledger = Arc::new(MemoryLedger::new());

    let engine = StyleEngine::new(
        EngineConfig::default().with_plates(PlateLibrary::new(config.plates_dir.clone())),
    );

    let dispatcher = BatchDispatcher::new(
        engine,
        store.clone(),
        ledger,
        DispatcherConfig {
            jpeg_quality: config.jpeg_quality,
            quota: QuotaPolicy::new(config.daily_limit),
            max_workers: None,
        },
    );

    let delivery = DeliveryService::new(
        store,
        DeliveryConfig::new(config.variants_dir())
            .with_thumb_width(config.thumb_width)
            .with_jpeg_quality(config.jpeg_quality)
            .with_memory_capacity(config.cache_bytes),
    );

    let router = create_router(dispatcher, delivery, build_router_config(&config, signer));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!(
        "    curl -H 'x-caller-id: me' http://{}/assets/<asset_name>",
        addr
    );
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "toonify=debug,tower_http=debug"
    } else {
        "toonify=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig, signer: DownloadSigner) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_signer(signer)
        .with_download_ttl(config.download_ttl())
        .with_public_url(config.public_url.clone())
        .with_cache_max_age(config.cache_max_age)
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_max_batch_items(config.max_batch_items);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Stylize Command
// =============================================================================

async fn run_stylize(config: StylizeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let input = match tokio::fs::read(&config.input).await {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error: failed to read {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let treatment = if let Some(ref plate) = config.background {
        Treatment::ReplaceBackground {
            plate: plate.clone(),
        }
    } else if let Some(ref path) = config.reference {
        match tokio::fs::read(path).await {
            Ok(data) => Treatment::DnaTransfer {
                reference: data.into(),
            },
            Err(e) => {
                eprintln!("Error: failed to read {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        StyleRequest::from_identifier(&config.style, config.tier).treatment
    };
    let request = StyleRequest::new(treatment, config.tier);

    let mut engine_config =
        EngineConfig::default().with_plates(PlateLibrary::new(config.plates_dir.clone()));
    if let Some(seed) = config.seed {
        engine_config = engine_config.with_seed(seed);
    }
    let engine = StyleEngine::new(engine_config);
    let format = config.resolve_format();
    let quality = config.quality;

    let rendered = tokio::task::spawn_blocking(move || {
        let result = engine.process(&input, &request)?;
        let encoder = AssetEncoder::new();
        let data = match format {
            OutputFormat::Gif => encoder.encode_animation(&engine.animate(&result.image))?,
            other => encoder.encode(&result.image, other, quality)?,
        };
        Ok::<_, toonify::StyleError>((result, data))
    })
    .await;

    let (result, data) = match rendered {
        Ok(Ok(rendered)) => rendered,
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: worker failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::write(&config.output, &data).await {
        eprintln!("Error: failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        output = %config.output.display(),
        format = %format,
        width = result.image.width(),
        height = result.image.height(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "Stylized image"
    );

    if config.stats {
        let json = serde_json::json!({
            "width": result.image.width(),
            "height": result.image.height(),
            "proc_time_ms": millis(result.elapsed),
            "original": result.input_stats,
            "processed": result.output_stats,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let signer = match DownloadSigner::new(&config.secret) {
        Ok(signer) => signer,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let base_url = config.base_url.as_deref().unwrap_or("");
    let link = signer.download_link(
        base_url,
        &config.asset,
        config.format,
        config.quality,
        Duration::from_secs(config.ttl),
    );

    match config.output {
        SignOutputFormat::Signature => {
            let quality = config.quality.map(|q| q.to_string());
            let mut params = vec![("format", config.format.as_str())];
            if let Some(q) = quality.as_deref() {
                params.push(("quality", q));
            }
            let path = DownloadSigner::download_path(&config.asset);
            println!("{}", signer.sign_with_expiry(&path, link.expires, &params));
        }
        SignOutputFormat::Json => {
            let json = serde_json::json!({
                "url": link.url,
                "expires": link.expires,
                "asset": config.asset,
                "format": config.format,
                "ttl": config.ttl,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        SignOutputFormat::Url => {
            println!("{}", link.url);
            if config.base_url.is_none() {
                eprintln!();
                eprintln!("Tip: Use --base-url to generate a complete URL");
            }
        }
    }

    ExitCode::SUCCESS
}
