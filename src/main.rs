use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use push_outbox_server::adapter::handler::{self, AppState};
use push_outbox_server::adapter::repository::{
    InMemoryNotificationMessageRepository, PostgresNotificationMessageRepository,
};
use push_outbox_server::domain::repository::NotificationMessageRepository;
use push_outbox_server::domain::service::{ProviderRegistry, RetryPolicy};
use push_outbox_server::infrastructure::config::Config;
use push_outbox_server::infrastructure::dispatcher::Dispatcher;
use push_outbox_server::infrastructure::providers::{FakeProvider, FcmProvider, WnsProvider};
use push_outbox_server::infrastructure::{database, telemetry};
use push_outbox_server::usecase::{
    EnqueueNotificationUseCase, GetNotificationUseCase, RequeueNotificationUseCase,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let cfg = Config::load(&config_path)?;

    telemetry::init(&cfg.app.log_level, &cfg.app.log_format);

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting push outbox server"
    );

    // --- Repository wiring: PostgreSQL or InMemory fallback ---
    let message_repo: Arc<dyn NotificationMessageRepository> =
        if let Some(ref db_cfg) = cfg.database {
            info!("connecting to PostgreSQL");
            let pool = Arc::new(database::connect(db_cfg).await?);
            info!("PostgreSQL connection established");
            Arc::new(PostgresNotificationMessageRepository::new(pool))
        } else {
            info!("no database configured, using in-memory outbox store");
            Arc::new(InMemoryNotificationMessageRepository::new())
        };

    // --- Provider wiring ---
    let mut registry = ProviderRegistry::new();
    if cfg.providers.fake.enabled {
        info!("fake provider registered");
        registry.register(Arc::new(FakeProvider::new()))?;
    }
    if let Some(ref wns_cfg) = cfg.providers.wns {
        info!("windows push provider registered");
        registry.register(Arc::new(WnsProvider::new(wns_cfg)?))?;
    }
    if let Some(ref fcm_cfg) = cfg.providers.fcm {
        info!("fcm provider registered");
        registry.register(Arc::new(FcmProvider::new(fcm_cfg)?))?;
    }
    if registry.is_empty() {
        tracing::warn!("no providers registered, every dispatch will dead-letter");
    }
    let registry = Arc::new(registry);

    let retry_policy = RetryPolicy::new(
        cfg.retry.base_delay_secs,
        cfg.retry.max_delay_secs,
        cfg.retry.jitter_factor,
    );

    // --- Background dispatcher ---
    let dispatcher = Arc::new(Dispatcher::new(
        message_repo.clone(),
        registry,
        retry_policy,
        cfg.dispatcher.clone(),
    ));
    let cancel = CancellationToken::new();
    let dispatcher_handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    let state = AppState {
        enqueue_notification_uc: Arc::new(EnqueueNotificationUseCase::new(message_repo.clone())),
        get_notification_uc: Arc::new(GetNotificationUseCase::new(message_repo.clone())),
        requeue_notification_uc: Arc::new(RequeueNotificationUseCase::new(message_repo.clone())),
        message_repo,
    };
    let app = handler::router(state);

    let addr = SocketAddr::new(cfg.server.host.parse()?, cfg.server.port);
    info!("REST server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("REST server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // ディスパッチャに停止を伝え、走行中の配送の書き戻しを待つ
    cancel.cancel();
    let _ = dispatcher_handle.await;

    Ok(())
}
