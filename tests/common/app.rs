use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;
use tokio::sync::broadcast;

use evi_backend::config::{Config, EviEnvConfig, WorkerConfig};
use evi_backend::evi::config::EviConfig;
use evi_backend::evi::engine::EviEngine;
use evi_backend::routes::build_router;
use evi_backend::state::AppState;
use evi_backend::store::Store;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<Store>,
    pub shutdown_tx: broadcast::Sender<()>,
    _temp_dir: TempDir,
}

// Config is built directly so parallel tests never race on env vars.
fn test_config(sled_path: String) -> Config {
    Config {
        host: std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
        port: 3000,
        log_level: "info".to_string(),
        enable_file_logs: false,
        log_dir: "./logs".to_string(),
        sled_path,
        cors_origin: "*".to_string(),
        worker: WorkerConfig {
            is_leader: false,
            decay_tick_cron: "0 0 2 * * *".to_string(),
        },
        evi: EviEnvConfig {
            forecast_success_rate: 0.85,
            idempotency_retention_days: 30,
        },
    }
}

pub async fn spawn_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let sled_path = temp_dir.path().join("evi-test.sled");
    let config = test_config(sled_path.to_string_lossy().to_string());

    let store = Arc::new(Store::open(&config.sled_path).expect("open store"));
    store.run_migrations().expect("run migrations");

    let engine = Arc::new(EviEngine::new(EviConfig::from_env(&config.evi), store.clone()));
    let (shutdown_tx, _) = broadcast::channel::<()>(8);
    let state = AppState::new(store.clone(), engine, &config, shutdown_tx.clone());
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        store,
        shutdown_tx,
        _temp_dir: temp_dir,
    }
}
