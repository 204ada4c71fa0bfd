use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use backend::bootstrap;
use backend::clock::SystemClock;
use backend::config::AppConfig;
use backend::db::Db;
use backend::db::repository::OrderRepository;
use backend::db::repository_sqlx::SqlxOrderRepository;
use backend::eventlog::{EventLog, EventLogConsumer, KafkaConsumer, KafkaProducer};
use backend::fanout::{self, FanOut};
use backend::http::{self, HttpState};
use backend::intake::Intake;
use backend::intake::menu::StaticMenu;
use backend::kv::{KvStore, RedisKv};
use backend::logger::init_tracing;
use backend::materialiser::Materialiser;
use backend::metrics::Counters;
use backend::rpc::OrderIntakeService;
use tokio::sync::watch;
use tonic::transport::Server as TonicServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("starting pizzeria order-intake / kitchen-dispatch backend");

    let cfg = AppConfig::from_env();

    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;
    let db: Arc<dyn OrderRepository> = Arc::new(SqlxOrderRepository::new(db.pool.clone()));

    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::connect(&cfg.kv_url).await?);
    let clock = Arc::new(SystemClock);

    let producer: Arc<dyn EventLog> = Arc::new(KafkaProducer::new(&cfg)?);
    let consumer: Arc<dyn EventLogConsumer> = Arc::new(KafkaConsumer::new(&cfg)?);

    let scheduler = Arc::new(backend::slot_scheduler::SlotScheduler::new(
        kv.clone(),
        clock.clone(),
        cfg.business_hours(),
        cfg.default_slot_capacity,
    ));

    // TODO: replace with the real menu service's `menu:update`-fed snapshot
    // once that subsystem exists.
    let menu = Arc::new(StaticMenu::new([
        ("margherita".to_string(), 1_200i64),
        ("pepperoni".to_string(), 1_400i64),
        ("extra_cheese".to_string(), 150i64),
    ]));

    let intake = Intake::new(
        scheduler.clone(),
        kv.clone(),
        producer,
        menu,
        clock.clone() as Arc<dyn backend::clock::Clock>,
    );

    let fanout = FanOut::new(kv.clone());

    let ready = Arc::new(AtomicBool::new(false));

    tracing::info!("running bootstrap");
    let summary = bootstrap::run(
        db.clone(),
        kv.clone(),
        consumer.clone(),
        clock.clone() as Arc<dyn backend::clock::Clock>,
    )
    .await?;
    tracing::info!(active = summary.active, pending = summary.pending, "bootstrap complete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let materialiser = Materialiser::new(
        consumer,
        db.clone(),
        kv.clone(),
        fanout.clone(),
        clock.clone() as Arc<dyn backend::clock::Clock>,
    );
    let materialiser_shutdown = shutdown_rx.clone();
    let materialiser_handle = tokio::spawn(async move { materialiser.run(materialiser_shutdown).await });

    let promoter_handle = tokio::spawn(fanout::run_embargo_promoter(
        db.clone(),
        kv.clone(),
        fanout.clone(),
        clock.clone() as Arc<dyn backend::clock::Clock>,
        shutdown_rx.clone(),
    ));

    ready.store(true, std::sync::atomic::Ordering::Relaxed);

    let http_state = HttpState {
        fanout: fanout.clone(),
        scheduler: scheduler.clone(),
        kv: kv.clone(),
        db: db.clone(),
        clock: clock.clone() as Arc<dyn backend::clock::Clock>,
        ready: ready.clone(),
    };
    let http_addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let http_router = http::router(http_state);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let mut http_shutdown = shutdown_rx.clone();
    let http_handle = tokio::spawn(async move {
        axum::serve(http_listener, http_router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
    });

    let rpc_service = OrderIntakeService::new(intake, Counters::default());
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], cfg.grpc_port));
    let mut grpc_shutdown = shutdown_rx.clone();
    let grpc_handle = tokio::spawn(async move {
        TonicServer::builder()
            .add_service(rpc_service.into_server())
            .serve_with_shutdown(grpc_addr, async move {
                let _ = grpc_shutdown.changed().await;
            })
            .await
    });

    tracing::info!(http_addr = %http_addr, grpc_addr = %grpc_addr, "listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(true);

    let _ = http_handle.await;
    let _ = grpc_handle.await;
    promoter_handle.abort();

    match materialiser_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_transient() => {
            tracing::error!(error = %e, "materialiser exited on a transient error during shutdown");
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "materialiser exited on a fatal downstream error");
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!(error = %e, "materialiser task panicked");
            std::process::exit(2);
        }
    }

    Ok(())
}
