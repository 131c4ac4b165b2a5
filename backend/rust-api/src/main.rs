use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use clinsim_api::{
    config::{Config, StorageBackend},
    create_router,
    services::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let provider = init_telemetry()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinsim_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer())
        .init();

    tracing::info!("Starting clinical assessment API");

    let config = Config::load()?;
    tracing::info!(
        "Configuration loaded for environment: {:?}, storage: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
        config.storage
    );

    let app_state = match config.storage {
        StorageBackend::Mongo => {
            let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
            tracing::info!("MongoDB connected");

            let redis_client = redis::Client::open(config.redis_uri.clone())?;
            AppState::new(config, mongo_client, redis_client).await?
        }
        StorageBackend::Memory => AppState::in_memory(config)?,
    };
    let app_state = Arc::new(app_state);

    // Attempt timing reads the corrected clock, so sync before serving
    app_state.clock.start().await;

    let sweeper = spawn_registry_sweeper(app_state.clone());

    let app = create_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&app_state.config.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    app_state.clock.stop().await;
    shutdown_telemetry(provider);
    Ok(())
}

/// Periodically closes expired sessions nobody is watching and frees them.
fn spawn_registry_sweeper(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let every = Duration::from_secs(state.config.engine.registry_sweep_secs);
    tracing::info!("Starting session registry sweep (interval {}s)", every.as_secs());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            state.sessions.sweep_registry().await;
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn init_telemetry() -> anyhow::Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()?;

    let resource = Resource::builder_empty()
        .with_service_name("clinsim-api")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(provider)
}

fn shutdown_telemetry(provider: opentelemetry_sdk::trace::SdkTracerProvider) {
    tracing::info!("Shutting down OpenTelemetry");
    if let Err(e) = provider.shutdown() {
        tracing::warn!("OpenTelemetry shutdown failed: {}", e);
    }
}
