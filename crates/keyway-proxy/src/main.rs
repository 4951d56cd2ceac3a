use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use keyway_common::Config;
use keyway_proxy::engine::connection::{handle_connection, ConnectionConfig};
use keyway_proxy::engine::tenant::{RoutingTable, TenantRegistry};
use keyway_proxy::metrics;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config/keyway.yaml";

fn init_production_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .init();

    info!("Production structured logging initialized (JSON)");
}

async fn metrics_handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    match req.uri().path() {
        "/health" => Ok(Response::new(Body::from("OK"))),
        "/metrics" => Ok(Response::new(Body::from(metrics::render_metrics()))),
        _ => {
            let mut not_found = Response::new(Body::from("Not Found"));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

async fn run_metrics_server(port: u16, shutdown: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics::register_metrics();

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(metrics_handler)) });

    let server = Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

    info!(port = port, "Observability server online");

    if let Err(e) = server.await {
        error!(error = %e, "Observability server failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_production_logging();

    let config_path =
        std::env::var("KEYWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::from_file(&config_path)?;
    info!(path = %config_path, tenants = config.routing.tenants.len(), "Configuration loaded");

    let routes = Arc::new(RoutingTable::from_config(&config.routing));
    let registry = Arc::new(TenantRegistry::new());
    let conn_cfg = Arc::new(ConnectionConfig::from_config(
        &config.inspection,
        &config.routing,
    ));
    let master_token = CancellationToken::new();

    if config.metrics.enabled {
        let port = config.metrics.port;
        let metrics_token = master_token.clone();
        tokio::spawn(async move {
            run_metrics_server(port, metrics_token).await;
        });
    }

    let listener = TcpListener::bind(&config.proxy.listen_address).await?;
    info!(
        listen_addr = %config.proxy.listen_address,
        default_upstream = %routes.default_upstream(),
        inspection = conn_cfg.inspect,
        "Keyway started"
    );

    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        let routes = Arc::clone(&routes);
                        let registry = Arc::clone(&registry);
                        let conn_cfg = Arc::clone(&conn_cfg);
                        let conn_token = master_token.clone();

                        tokio::spawn(async move {
                            tokio::select! {
                                res = handle_connection(socket, routes, registry, conn_cfg) => {
                                    if let Err(e) = res {
                                        error!(client_ip = %addr.ip(), error = %e, "Connection error");
                                    }
                                }
                                _ = conn_token.cancelled() => {}
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(active = registry.len(), "Shutdown signal received");
                master_token.cancel();
                break;
            }
        }
    }
    Ok(())
}
