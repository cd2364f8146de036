#![allow(dead_code)]

use payroll_engine::concepts::ConceptCatalog;
use payroll_engine::directory::{seed_reference_data, Directory, Roster, StoreDirectory};
use payroll_engine::error::PayrollError;
use payroll_engine::engine::PayrollRunner;
use payroll_engine::models::{
    Amount, ContractType, CostCenter, GratificationMode, HealthSystem, MonthlyMovement,
    MovementItem, PayrollPeriod, Worker,
};
use payroll_engine::params::{reference_parameters, ParameterTable};
use payroll_engine::store::{put, Collection, MemoryStore, RecordStore, StoreError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const YEAR: i32 = 2025;

pub fn march() -> PayrollPeriod {
    PayrollPeriod::new(2, YEAR).expect("valid period")
}

pub fn worker(id: &str, base_salary: Amount) -> Worker {
    Worker {
        id: id.to_string(),
        rut: format!("{id}.111.222-3"),
        first_name: "Camila".into(),
        paternal_surname: "Rojas".into(),
        maternal_surname: String::new(),
        job_title: "Analista".into(),
        cost_center_id: "cc1".into(),
        base_salary,
        health_system: HealthSystem::Fonasa,
        isapre_name: None,
        afp_name: "Provida".into(),
        has_unemployment_insurance: true,
        contract_type_id: "ct1".into(),
        gratification_mode: GratificationMode::Computed,
    }
}

pub fn movement(worker_id: &str, period: PayrollPeriod, items: &[(&str, f64)]) -> MonthlyMovement {
    MonthlyMovement::new(
        worker_id,
        period,
        items
            .iter()
            .map(|(code, amount)| MovementItem {
                concept_code: code.to_string(),
                amount: *amount,
            })
            .collect(),
    )
}

pub fn parameters() -> ParameterTable {
    let mut table = ParameterTable::new();
    table
        .register_year(YEAR, reference_parameters().expect("reference parameters"))
        .expect("reference parameters validate");
    table
}

/// Seeded store holding `workers`.
pub fn seeded_store(workers: &[Worker]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed_reference_data(&*store).expect("seed reference data");
    for w in workers {
        put(&*store, w).expect("store worker");
    }
    store
}

pub fn runner_over(store: Arc<dyn RecordStore>, threads: usize) -> PayrollRunner {
    let directory = Arc::new(StoreDirectory::new(store.clone()));
    PayrollRunner::new(directory, store, Arc::new(parameters()), threads).expect("runner builds")
}

/// Store wrapper whose calculation writes fail for chosen keys while
/// `broken` is set.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub broken: AtomicBool,
    pub failing_prefix: String,
}

impl FlakyStore {
    pub fn new(failing_prefix: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            broken: AtomicBool::new(true),
            failing_prefix: failing_prefix.to_string(),
        }
    }

    pub fn heal(&self) {
        self.broken.store(false, Ordering::SeqCst);
    }
}

impl RecordStore for FlakyStore {
    fn upsert(&self, collection: Collection, key: &str, record: Value) -> Result<(), StoreError> {
        if collection == Collection::Calculations
            && key.starts_with(&self.failing_prefix)
            && self.broken.load(Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable("disk offline".into()));
        }
        self.inner.upsert(collection, key, record)
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        self.inner.get_all(collection)
    }

    fn get_by_id(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get_by_id(collection, key)
    }
}

/// Directory whose movement lookups block until [`GatedDirectory::open`]
/// is called, holding a run in flight.
pub struct GatedDirectory {
    inner: StoreDirectory,
    entered: AtomicBool,
    opened: AtomicBool,
}

impl GatedDirectory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            inner: StoreDirectory::new(store),
            entered: AtomicBool::new(false),
            opened: AtomicBool::new(false),
        }
    }

    /// True once a worker is waiting at the gate.
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.opened.store(true, Ordering::SeqCst);
    }
}

impl Directory for GatedDirectory {
    fn workers(&self) -> Result<Roster, PayrollError> {
        self.inner.workers()
    }

    fn concept_catalog(&self) -> Result<ConceptCatalog, PayrollError> {
        self.inner.concept_catalog()
    }

    fn cost_centers(&self) -> Result<Vec<CostCenter>, PayrollError> {
        self.inner.cost_centers()
    }

    fn contract_types(&self) -> Result<Vec<ContractType>, PayrollError> {
        self.inner.contract_types()
    }

    fn movements(
        &self,
        worker_id: &str,
        period: PayrollPeriod,
    ) -> Result<Vec<MovementItem>, PayrollError> {
        self.entered.store(true, Ordering::SeqCst);
        while !self.opened.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        self.inner.movements(worker_id, period)
    }
}
