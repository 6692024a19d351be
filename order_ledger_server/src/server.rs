use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use ofl_common::Amount;
use order_ledger_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    reconciliation::{ReconciliationScheduler, SystemClock},
    status::StatusMachine,
    traits::ProviderRegistry,
    OrderFlowApi,
    SqliteDatabase,
};
use yookassa_tools::YookassaAdapter;

use crate::{
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    fanout::install_fanout_hook,
    reconciliation_worker::start_reconciliation_worker,
    routes::{gateway_webhook, health},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;

    let mut hooks = EventHooks::default();
    install_fanout_hook(&mut hooks, config.fanout_url.clone());
    let handlers = EventHandlers::new(128, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let mut registry = ProviderRegistry::new();
    let yookassa = YookassaAdapter::new(config.yookassa.clone())
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    registry.register(Arc::new(yookassa));

    let machine = StatusMachine::new(config.min_order_amount);
    let scheduler = ReconciliationScheduler::new(
        OrderFlowApi::new(db.clone(), machine, producers.clone()),
        registry.clone(),
        Arc::new(SystemClock),
        config.reconciliation,
    );
    let interval = config
        .reconciliation
        .expiration_window
        .to_std()
        .unwrap_or_else(|_| Duration::from_secs(30 * 60));
    start_reconciliation_worker(scheduler, interval);

    let srv = create_server_instance(config, db, registry, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    registry: ProviderRegistry,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let options = ServerOptions::from_config(&config);
    let min_order_amount: Amount = config.min_order_amount;
    let host = config.host.clone();
    let port = config.port;
    info!("🚀️ Web server binding to {host}:{port}");
    let srv = HttpServer::new(move || {
        let machine = StatusMachine::new(min_order_amount);
        let orders_api = OrderFlowApi::new(db.clone(), machine, producers.clone());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("ofl::access_log"))
            .app_data(web::Data::new(orders_api))
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(options))
            .service(health)
            .service(gateway_webhook)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
