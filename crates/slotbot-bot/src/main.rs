use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use slotbot_bot::health::{self, HealthState};
use slotbot_bot::{BookingHandler, Dispatcher, DispatcherSettings, StdioTransport};
use slotbot_core::ratelimit::{BotLimiters, ExceededHook};
use slotbot_core::repositories::KeyValueStore;
use slotbot_core::services::SessionStore;
use slotbot_infrastructure::{
    create_pool, create_redis_pool, run_migrations, MemoryStore, PgBookingRepository,
    PgUserRepository, RedisStore,
};
use slotbot_shared::telemetry::init_telemetry;
use slotbot_shared::{AppConfig, Metrics};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const EVENT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    let _guard = init_telemetry(&config.app)?;

    info!("🚀 Starting {} (env={}, instance={})", config.app.name, config.app.env, config.app.instance);

    let metrics = Arc::new(Metrics::new(&config.app.env, &config.app.instance)?);

    // Database
    let pool = create_pool(&config.database).await?;
    info!("✅ Database connection established");
    if config.database.run_migrations {
        run_migrations(&pool).await?;
    }
    let bookings = Arc::new(PgBookingRepository::new(pool.clone()).with_metrics(Arc::clone(&metrics)));
    let users = Arc::new(PgUserRepository::new(pool.clone()).with_metrics(Arc::clone(&metrics)));

    // Sessions
    let store: Arc<dyn KeyValueStore> = if config.redis.enabled {
        let redis = create_redis_pool(&config.redis)?;
        info!("✅ Redis pool created");
        Arc::new(RedisStore::new(redis).with_metrics(Arc::clone(&metrics)))
    } else {
        info!("Redis disabled, keeping sessions in memory");
        Arc::new(MemoryStore::new().with_metrics(Arc::clone(&metrics)))
    };
    let sessions = SessionStore::new(store, config.session_ttl(), config.session.key_prefix.clone());

    // Rate limiting
    let on_exceeded: ExceededHook = {
        let metrics = Arc::clone(&metrics);
        Arc::new(move |limiter: &'static str| metrics.inc_rate_limit_exceeded(limiter))
    };
    let limiters = Arc::new(BotLimiters::from_settings(&config.rate_limit, Some(on_exceeded))?);

    let handler = Arc::new(
        BookingHandler::new(bookings, sessions, config.bot.services.clone())
            .with_users(users)
            .with_metrics(Arc::clone(&metrics)),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        handler,
        Arc::new(StdioTransport::new()),
        limiters,
        Arc::clone(&metrics),
        DispatcherSettings {
            handler_timeout: config.handler_timeout(),
            sweep_interval: Duration::from_secs(config.rate_limit.sweep_interval_secs),
        },
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
            shutdown.cancel();
        }
    });

    let http = if config.metrics.enabled {
        let addr = SocketAddr::from((
            config.metrics.host.parse::<std::net::IpAddr>()?,
            config.metrics.port,
        ));
        let app = health::router(HealthState {
            db: pool.clone(),
            metrics: Arc::clone(&metrics),
        });
        Some(tokio::spawn(health::serve(addr, app, shutdown.clone())))
    } else {
        None
    };

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let reader = StdioTransport::spawn_reader(config.bot.local_chat_id, events_tx, shutdown.clone());

    dispatcher.run(events_rx, shutdown.clone()).await;

    // Stdin may have closed first; stop everything else too.
    shutdown.cancel();
    if let Some(http) = http {
        match http.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Health endpoint failed: {}", e),
            Err(e) => error!("Health endpoint task failed: {}", e),
        }
    }
    reader.abort();
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
