use std::sync::Arc;

use clap::{Command, ArgMatches};
use gateway_runtime::health::checks::{DependenciesCheck, ProcessHealthCheck, SystemResourcesCheck, ToolCheck};
use gateway_runtime::registry::{self, tools, ToolRegistry};
use gateway_runtime::resilience::circuit_breaker::CircuitBreakerRegistry;
use gateway_runtime::health::{HealthMonitor, HealthMonitorConfig};
use gateway_runtime::metrics::MetricsRegistry;
use gateway_runtime::transport::GatewayState;
use gateway_runtime::{Config, ConfigTransport};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let matches = Command::new("gateway")
        .version(VERSION)
        .about("Execution gateway for a fixed set of security scanning tools")
        .subcommand(Command::new("doctor").about("Check that every registered tool resolves on PATH"))
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match matches.subcommand() {
        Some(("doctor", _)) => {
            if !commands::doctor::run() {
                std::process::exit(1);
            }
        }
        _ => serve(&matches).await,
    }
}

async fn serve(_matches: &ArgMatches) {
    let config_path = std::env::var("MCP_CONFIG_PATH").ok();
    let config = match Config::load(config_path.as_deref().map(std::path::Path::new)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if !commands::doctor::run() {
        tracing::warn!("one or more registered tools are missing from PATH; continuing to start");
    }

    let registry = Arc::new(ToolRegistry::new(&config.tool_include, &config.tool_exclude));
    let breakers = Arc::new(CircuitBreakerRegistry::new());
    registry::register_breakers(&registry, &breakers);

    let metrics = Arc::new(MetricsRegistry::new(0));

    let mut checks: Vec<Arc<dyn gateway_runtime::health::HealthCheck>> = vec![
        Arc::new(SystemResourcesCheck::new(
            config.health.cpu_threshold,
            config.health.memory_threshold,
            config.health.disk_threshold,
        )),
        Arc::new(ProcessHealthCheck::new()),
        Arc::new(DependenciesCheck::new(
            tools::all().into_iter().map(|d| d.command).collect(),
        )),
    ];
    for desc in tools::all() {
        checks.push(Arc::new(ToolCheck::new(
            desc.name.clone(),
            desc.command.clone(),
            Arc::clone(&breakers),
        )));
    }

    let health = Arc::new(HealthMonitor::new(
        HealthMonitorConfig {
            check_interval: config.health.check_interval_duration(),
            check_timeout: std::time::Duration::from_secs(10),
            cpu_threshold: config.health.cpu_threshold,
            memory_threshold: config.health.memory_threshold,
            disk_threshold: config.health.disk_threshold,
        },
        checks,
    ));
    health.start();

    let state = GatewayState {
        registry,
        breakers,
        metrics,
        health: Arc::clone(&health),
        max_args_length: config.security.max_args_length,
    };

    println!("Gateway starting (transport={:?})", config.server.transport);

    let shutdown_grace = std::time::Duration::from_secs_f64(config.server.shutdown_grace_period);

    let result = match config.server.transport {
        ConfigTransport::Stdio => {
            tokio::select! {
                r = gateway_runtime::transport::stdio::serve(state) => r,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
        ConfigTransport::Http => {
            let http_config = gateway_runtime::transport::http::HttpTransportConfig {
                bind_address: config.server.host.clone(),
                port: config.server.port,
                prometheus_enabled: config.metrics.prometheus_enabled,
                ..Default::default()
            };
            tokio::select! {
                r = gateway_runtime::transport::http::serve(state, http_config) => r,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
    };

    tokio::time::timeout(shutdown_grace, health.stop()).await.ok();

    match result {
        Ok(()) => {
            println!("Gateway stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "transport exited with an error");
            std::process::exit(1);
        }
    }
}
