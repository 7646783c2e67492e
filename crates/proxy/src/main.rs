mod config;
mod context;
mod service;
mod upstream;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use mixgate_admin::SharedStateType;
use mixgate_projects::{AdmissionGate, ProjectRegistry};
use mixgate_rate_limit::{RateLimiter, ResetScheduler, Schedule, ScheduledTask};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ProxyConfig;
use crate::service::IngestService;
use crate::upstream::HttpForwarder;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/mixgate.yaml".to_string());

    info!(config_path = %config_path, "starting mixgate");

    let proxy_config = ProxyConfig::load(&config_path)?;
    let app_config = proxy_config.config.clone();
    info!(path = %proxy_config.config_path.display(), "configuration loaded");

    let counters = proxy_config.counter_store()?;
    let registry = Arc::new(ProjectRegistry::new(counters.clone()));
    let limiter = RateLimiter::new(counters.clone(), app_config.rate_limit.calls_per_hour);
    let gate = AdmissionGate::new(registry.clone(), limiter, proxy_config.store_timeout());
    info!(
        calls_per_hour = app_config.rate_limit.calls_per_hour,
        timeout_ms = app_config.rate_limit.store_timeout_ms,
        "rate limiter configured"
    );

    let admin = mixgate_admin::new_shared_state(app_config.clone(), registry, counters);
    let forwarder = Arc::new(HttpForwarder::new(app_config.forwarder.clone())?);

    let scheduler = if app_config.rate_limit.reset_enabled {
        let task = Arc::new(MeteredReset {
            state: admin.clone(),
        });
        let scheduler = Arc::new(ResetScheduler::new(task, Schedule::TopOfHour));
        let runner = scheduler.clone();
        tokio::spawn(async move { runner.run().await });
        Some(scheduler)
    } else {
        info!("hourly counter reset disabled");
        None
    };

    let ingest = Arc::new(IngestService {
        gate,
        forwarder,
        admin: admin.clone(),
    });

    let listen = app_config.server.listen.clone();
    let admin_listen = app_config.server.admin.listen.clone();

    tokio::select! {
        result = service::run_ingest_server(ingest, &listen) => {
            if let Err(e) = result {
                error!(error = %e, "ingestion server error");
            }
        }
        result = mixgate_admin::run_admin_server(admin, &admin_listen) => {
            if let Err(e) = result {
                error!(error = %e, "admin API server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }
    info!("mixgate stopped");
    Ok(())
}

/// Hourly reset that also records the pass in the admin metrics.
struct MeteredReset {
    state: SharedStateType,
}

#[async_trait]
impl ScheduledTask for MeteredReset {
    fn name(&self) -> &'static str {
        "project-counter-reset"
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.state.run_reset().await?;
        Ok(())
    }
}
