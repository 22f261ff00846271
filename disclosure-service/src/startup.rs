use crate::config::DisclosureConfig;
use crate::services::{
    ChannelDispatcher, Database, DisclosureStore, DocumentGenerator, NotificationDispatcher,
    PlainTextDocumentGenerator,
};
use crate::{build_router, AppState};
use service_core::error::AppError;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

pub struct Application {
    port: u16,
    server: Box<dyn Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: DisclosureConfig) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            AppError::from(e)
        })?;
        db.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            AppError::from(e)
        })?;

        let dispatcher = ChannelDispatcher::new(&config.notification).map_err(|e| {
            tracing::error!("Failed to initialize notification channels: {}", e);
            AppError::ConfigError(anyhow::anyhow!("Notification setup failed: {}", e))
        })?;

        let store: Arc<dyn DisclosureStore> = Arc::new(db);
        let dispatcher: Arc<dyn NotificationDispatcher> = Arc::new(dispatcher);
        let documents: Arc<dyn DocumentGenerator> = Arc::new(PlainTextDocumentGenerator);

        let state = AppState::new(config.clone(), store, dispatcher, documents);

        Self::serve(config, state).await
    }

    /// Bind and serve an already-wired state.
    pub async fn serve(config: DisclosureConfig, state: AppState) -> Result<Self, AppError> {
        spawn_challenge_sweeper(&state, config.verification.sweep_interval_seconds);

        let app = build_router(state.clone());

        let addr = config.common.listen_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

/// Periodically close challenges that expired without being used.
fn spawn_challenge_sweeper(state: &AppState, interval_seconds: u64) {
    if interval_seconds == 0 {
        return;
    }

    let verification = state.agreements.verification().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = verification.sweep_stale().await {
                tracing::warn!(error = %e, "Challenge sweep failed");
            }
        }
    });
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
