use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use course_eval_api::{
    config::Config,
    services::SmtpEmailSender,
    state::AppState,
    stores::{MemoryTtlStore, RedisTtlStore, Stores, TtlStore},
};

#[derive(Parser)]
#[command(name = "api")]
#[command(about = "Course evaluation API server")]
struct Args {
    /// Check that the shared store is reachable and exit
    #[arg(long)]
    check_store: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = envy::prefixed("COURSE_EVAL_").from_env::<Config>()?;
    config.validate()?;

    // Initialize Sentry for error tracking (must be done early, guard must stay alive)
    let _sentry_guard = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.env.clone().into()),
                ..Default::default()
            },
        ))
    });

    // Set up tracing: JSON in production, human-readable otherwise
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }

    let store: Arc<dyn TtlStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisTtlStore::new(redis::Client::open(url.as_str())?)),
        None => {
            tracing::warn!("no redis_url configured; using in-process store (single instance only)");
            Arc::new(MemoryTtlStore::new())
        }
    };
    let stores = Stores::new(store, &config);

    if args.check_store {
        let reachable = stores.store.health_check().await?;
        anyhow::ensure!(reachable, "store did not answer PING");
        tracing::info!("Store reachable");
        return Ok(());
    }

    let Some(smtp_url) = config.smtp_url.as_deref().filter(|u| !u.is_empty()) else {
        anyhow::bail!("SMTP_URL must be configured");
    };
    let email = SmtpEmailSender::new(smtp_url, &config.email_from, config.code_policy().ttl)?;

    let state = AppState {
        config: config.clone(),
        stores,
        email: Arc::new(email),
    };

    // Request ID header name
    let x_request_id = http::HeaderName::from_static("x-request-id");

    let app = course_eval_api::app(state)
        // Request ID: generate UUID, include in logs, return in response
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &http::Request<axum::body::Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            },
        ))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1MB limit

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
