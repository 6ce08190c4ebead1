//! Volume Broker
//!
//! Control plane exposing one volume API over a fleet of heterogeneous
//! backend storage clusters.
//!
//! On startup the broker loads the cluster topology, connects one backend
//! client per cluster, registers every resource those clusters already hold
//! and then serves the REST API until interrupted.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use volume_broker::{
    ApiServer, ApiServerConfig, BackendConfig, BrokerMetrics, Error, HttpBackendConfig, Result,
    ServiceConfig, ServiceState, StorageService, VendorConnector,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Broker - Unified control plane for multi-cluster volume storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0")]
    listen_addr: String,

    /// REST API port
    #[arg(long, env = "PORT", default_value = "8090")]
    port: u16,

    /// Bearer token required on API requests
    #[arg(long, env = "AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Cluster topology document (YAML)
    #[arg(long, env = "TOPOLOGY")]
    topology: Option<PathBuf>,

    /// Resource definition document with volume profiles (YAML)
    #[arg(long, env = "RESOURCES")]
    resources: Option<PathBuf>,

    /// Placement policy (round-robin, weighted)
    #[arg(long, env = "PLACEMENT", default_value = "round-robin")]
    placement: String,

    /// Upper bound on each backend call, in seconds
    #[arg(long, env = "BACKEND_TIMEOUT_SECS", default_value = "30")]
    backend_timeout_secs: u64,

    /// Bearer token presented to HTTP backends
    #[arg(long, env = "BACKEND_AUTH_TOKEN")]
    backend_auth_token: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Volume Broker");
    info!("  Version: {}", volume_broker::VERSION);
    info!("  REST API: {}:{}", args.listen_addr, args.port);
    info!("  Placement: {}", args.placement);
    info!("  Authentication: {}", args.auth_token.is_some());

    let rest_addr = SocketAddr::new(
        args.listen_addr.parse::<IpAddr>().map_err(|e| {
            Error::Configuration(format!("Invalid listen address {}: {}", args.listen_addr, e))
        })?,
        args.port,
    );
    let health_addr = parse_addr(&args.health_addr, "health server")?;
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics server")?;

    let metrics = BrokerMetrics::new()?;

    let connector = Arc::new(VendorConnector::new(BackendConfig {
        http: HttpBackendConfig {
            auth_token: args.backend_auth_token.clone(),
            ..Default::default()
        },
        ..Default::default()
    }));

    let service_config = ServiceConfig {
        topology_path: args.topology.clone(),
        resources_path: args.resources.clone(),
        placement: args.placement.clone(),
        backend_timeout: Duration::from_secs(args.backend_timeout_secs),
    };
    let service = Arc::new(
        StorageService::new(service_config, connector).with_metrics(metrics.clone()),
    );

    // Start health server
    let health_service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_service).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let exported = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, exported).await {
            error!("Metrics server error: {}", e);
        }
    });

    if let Err(e) = service.start().await {
        if e.is_fatal_at_startup() {
            error!("Invalid broker configuration: {}", e);
        } else {
            error!("Backend fleet unavailable during startup: {}", e);
        }
        return Err(e);
    }

    let api_server = ApiServer::new(
        ApiServerConfig {
            rest_addr,
            auth_token: args.auth_token.clone(),
        },
        service.clone(),
    );

    let shutdown = api_server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.shutdown();
        }
    });

    info!("Starting REST API server");
    api_server.run().await?;

    service.stop().await?;
    info!("Volume broker shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, what: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", what, addr, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr, service: Arc<StorageService>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let state = service.state();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if state == ServiceState::Serving => {
                            text_response(StatusCode::OK, "ok")
                        }
                        "/readyz" => {
                            text_response(StatusCode::SERVICE_UNAVAILABLE, state.to_string())
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<BrokerMetrics>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.render() {
                            Ok(text) => {
                                let mut response = text_response(StatusCode::OK, text);
                                response.headers_mut().insert(
                                    CONTENT_TYPE,
                                    HeaderValue::from_static(prometheus::TEXT_FORMAT),
                                );
                                response
                            }
                            Err(e) => text_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                e.to_string(),
                            ),
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
