//! Entry point for the payroll engine binary.
//!
//! Starts the HTTP API over either an in-memory store or a JSON file
//! store (`PAYROLL_DATA_DIR`).  Legal parameters are loaded from
//! `PAYROLL_PARAMS_DIR`; when that directory holds no parameter files
//! the reference figures are registered for `PAYROLL_REFERENCE_YEAR`
//! only, so any other period still fails as unknown.

use anyhow::{Context, Result};
use payroll_engine::api::{self, AppState};
use payroll_engine::config::AppConfig;
use payroll_engine::directory::{seed_reference_data, StoreDirectory};
use payroll_engine::engine::PayrollRunner;
use payroll_engine::params::{load_parameters_from_dir, reference_parameters};
use payroll_engine::store::{Collection, JsonFileStore, MemoryStore, RecordStore};
use payroll_engine::telemetry;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    telemetry::init(&config.telemetry)?;

    let store: Arc<dyn RecordStore> = match &config.storage.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "using JSON file store");
            Arc::new(JsonFileStore::open(dir)?)
        }
        None => {
            warn!("PAYROLL_DATA_DIR not set; records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    if config.storage.seed_reference_data && store.get_all(Collection::Concepts)?.is_empty() {
        seed_reference_data(store.as_ref())?;
    }

    let mut parameters = load_parameters_from_dir(&config.engine.params_dir)?;
    if parameters.is_empty() {
        warn!(
            dir = %config.engine.params_dir.display(),
            year = config.engine.reference_year,
            "no legal parameter files found; registering reference figures"
        );
        parameters.register_year(config.engine.reference_year, reference_parameters()?)?;
    }

    let directory = Arc::new(StoreDirectory::new(store.clone()));
    let runner = PayrollRunner::new(
        directory,
        store.clone(),
        Arc::new(parameters),
        config.engine.worker_threads,
    )?;
    let state = Arc::new(AppState::new(Arc::new(runner), store));

    api::serve(config.server.socket_addr()?, state).await
}
