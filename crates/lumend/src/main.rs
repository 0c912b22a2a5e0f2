use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use lumend::api;
use lumend::config::Config;
use lumend::format_diagnostics;
use lumend::group::GroupManager;
use lumend::light::light_entity_id;
use lumend::ServiceBus;
use lumend::StateStore;
use lumend::VirtualLight;

/// Virtual composite light daemon
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config files, merged first-wins in the order given
    #[arg(short, long, default_value = "lumend.toml")]
    config: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration; errors arrive pre-formatted with source spans
    let (config, diagnostics) = match Config::from_files(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(1);
        }
    };

    // Surface warnings before logging is up so they are not filtered away
    if !diagnostics.is_empty() {
        eprint!("{}", format_diagnostics(&diagnostics));
    }

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("lumend starting");
    tracing::info!(
        "Loaded {} virtual light(s) and {} group(s)",
        config.lights.len(),
        config.groups.len()
    );

    let store = Arc::new(StateStore::new());
    let bus = Arc::new(ServiceBus::new());

    // Virtual lights first, so group actors find member states already
    // published when they come up.
    let mut light_keys: Vec<&String> = config.lights.keys().collect();
    light_keys.sort();
    for key in light_keys {
        let light_config = &config.lights[key];
        let entity_id = light_entity_id(key);
        tracing::info!(
            "Registering virtual light {} ('{}')",
            entity_id,
            light_config.name.as_deref().unwrap_or(key)
        );

        let light = VirtualLight::new(
            entity_id.clone(),
            light_config.supported_features,
            light_config.effect_list.clone(),
            store.clone(),
        );
        bus.register(&entity_id, Arc::new(light));
    }

    let manager = GroupManager::from_config(store.clone(), bus.clone(), &config);

    // Start the HTTP API if configured
    let mut api_shutdown = None;
    let mut api_task = None;
    if let Some(api_config) = config.api {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let descriptors = manager.descriptors();
        let api_store = store.clone();
        let api_bus = bus.clone();

        api_task = Some(tokio::spawn(async move {
            if let Err(e) = api::serve(
                api_config.listen,
                api_config.port,
                api_store,
                api_bus,
                descriptors,
                shutdown_rx,
            )
            .await
            {
                tracing::error!("HTTP API server error: {}", e);
            }
        }));
        api_shutdown = Some(shutdown_tx);
    }

    tracing::info!("All groups running");
    tracing::info!("Press Ctrl+C to exit");

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    if let Some(shutdown_tx) = api_shutdown {
        let _ = shutdown_tx.send(());
    }
    if let Some(task) = api_task {
        let _ = task.await;
    }

    tracing::info!("Shutting down groups...");
    manager.shutdown().await;

    tracing::info!("lumend shutdown complete");

    Ok(())
}
