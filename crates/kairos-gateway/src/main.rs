//! Kairos compile-request router, process entry point.
//!
//! Wires the concrete AWS-backed collaborators (routing table, object store,
//! queue, parameter store) and the event-bus client into the process
//! singletons the router facade dispatches to, then starts the HTTP server.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use aws_config::BehaviorVersion;
use log::{error, info};

use kairos_rs::app_state::AppState;
use kairos_rs::config::Config;
use kairos_rs::logs::configure_logger;
use kairos_rs::routes::{configure_compile, configure_health};
use kairos_rs::services::correlator::Correlator;
use kairos_rs::services::eventbus::{EventBusClient, EventBusSettings};
use kairos_rs::services::forwarder::HttpForwarder;
use kairos_rs::services::queue::QueueSubmitter;
use kairos_rs::services::routing::RoutingResolver;
use kairos_rs::services::stores::{S3ObjectStore, S3RoutingStore, SqsQueuePublisher, SsmParameterStore};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "starting kairos-gateway for environment={} on {}:{}",
        config.environment.as_str(),
        config.router_host,
        config.router_port
    );

    let shared_aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await;

    let routing_store = S3RoutingStore::new(
        aws_sdk_s3::Client::new(&shared_aws_config),
        config.routing_table_name.clone(),
    );
    let parameter_store = SsmParameterStore::new(aws_sdk_ssm::Client::new(&shared_aws_config));
    let object_store = S3ObjectStore::new(aws_sdk_s3::Client::new(&shared_aws_config));
    let queue_publisher = SqsQueuePublisher::new(aws_sdk_sqs::Client::new(&shared_aws_config));

    let routing_resolver = Arc::new(RoutingResolver::new(routing_store, parameter_store, config.clone()));
    let queue_submitter = Arc::new(QueueSubmitter::new(
        object_store.clone(),
        queue_publisher,
        config.clone(),
    ));

    let (event_bus, message_rx) = EventBusClient::connect(EventBusSettings::new(config.websocket_url.clone()));

    let correlator = Arc::new(Correlator::new(event_bus.clone(), object_store, config.clone()));

    let message_loop_correlator = correlator.clone();
    tokio::spawn(async move {
        message_loop_correlator.run_message_loop(message_rx).await;
    });

    let forwarder = Arc::new(HttpForwarder::new());

    let state = AppState {
        config: config.clone(),
        routing_resolver,
        queue_submitter,
        correlator,
        forwarder,
        event_bus,
    };

    let host = config.router_host.clone();
    let port = config.router_port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::new(16 * 1024 * 1024))
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure_health)
            .configure(configure_compile)
    })
    .bind((host.as_str(), port))?
    .run();

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                error!("server error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, closing event bus and exiting");
        }
    }

    Ok(())
}
