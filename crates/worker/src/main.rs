use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quill_core::channels::DeliveryChannel;
use quill_db::{MemoryStore, PgStore, Stores};
use quill_events::delivery::email::StaticDirectory;
use quill_events::{
    ChannelRouter, DeliveryDispatcher, DigestScheduler, EmailConfig, EmailDelivery, EngineConfig,
    EventBus, NotificationEngine, WebhookConfig, WebhookDelivery,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod intake;

use config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quill_worker=debug,quill_events=debug".into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let engine_config = EngineConfig::from_env();
    tracing::info!(?engine_config, "Loaded engine configuration");

    // --- Storage ---
    let stores = match &config.database_url {
        Some(url) => {
            let pool = quill_db::create_pool(url, config.max_connections)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connection pool created");

            quill_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            quill_db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");

            Stores::from_backend(Arc::new(PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping notifications in memory");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };

    // --- Delivery ---
    let dispatcher: Arc<dyn DeliveryDispatcher> = Arc::new(build_router()?);

    // --- Event services ---
    let event_bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();

    let engine = Arc::new(NotificationEngine::new(
        stores.clone(),
        Arc::clone(&dispatcher),
        engine_config.clone(),
    ));
    let engine_handle = tokio::spawn(engine.run(event_bus.subscribe(), cancel.clone()));

    let digest_scheduler = DigestScheduler::new(stores, dispatcher, engine_config);
    let digest_cancel = cancel.clone();
    let digest_handle = tokio::spawn(async move {
        digest_scheduler.run(digest_cancel).await;
    });

    let intake_handle = config.stdin_intake.then(|| {
        let reader = tokio::io::BufReader::new(tokio::io::stdin());
        tokio::spawn(intake::run(reader, Arc::clone(&event_bus)))
    });

    tracing::info!("Notification worker started");

    shutdown_signal().await;

    // --- Shutdown ---
    if let Some(handle) = intake_handle {
        handle.abort();
    }

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), digest_handle).await;
    tracing::info!("Digest scheduler stopped");

    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), engine_handle).await;
    tracing::info!("Notification engine stopped");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Route web and push through the webhook gateway and email through SMTP,
/// for whichever of them is configured.
fn build_router() -> anyhow::Result<ChannelRouter> {
    let mut router = ChannelRouter::new();

    match WebhookConfig::from_env() {
        Some(webhook_config) => {
            let webhook: Arc<dyn DeliveryDispatcher> = Arc::new(
                WebhookDelivery::new(webhook_config).context("Failed to build webhook client")?,
            );
            router = router
                .route(DeliveryChannel::Web, Arc::clone(&webhook))
                .route(DeliveryChannel::Push, webhook);
            tracing::info!("Webhook delivery enabled for web and push");
        }
        None => tracing::warn!("NOTIFY_WEBHOOK_URL not set, web and push delivery disabled"),
    }

    match EmailConfig::from_env() {
        Some(email_config) => {
            let directory = StaticDirectory::from_env();
            if directory.is_empty() {
                tracing::warn!("SMTP_RECIPIENTS is empty, every email delivery will fail");
            }
            let email = EmailDelivery::new(email_config, Box::new(directory))
                .context("Failed to build SMTP transport")?;
            router = router.route(DeliveryChannel::Email, Arc::new(email));
            tracing::info!("Email delivery enabled");
        }
        None => tracing::warn!("SMTP_HOST not set, email delivery disabled"),
    }

    Ok(router)
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
