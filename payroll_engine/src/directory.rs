//! Read access to master data.
//!
//! The [`Directory`] is everything the batch runner needs to know about
//! the company: the worker roster, the concept catalog, the cost
//! centers and contract types workers refer to, and each worker's
//! monthly movements.  [`StoreDirectory`] answers those questions from a
//! [`RecordStore`].

use crate::concepts::{reference_concepts, ConceptCatalog};
use crate::error::PayrollError;
use crate::models::{
    ContractType, CostCenter, MonthlyMovement, MovementItem, PayrollConcept, PayrollPeriod,
    Worker,
};
use crate::store::{fetch, fetch_all, put, Collection, RecordStore, StoreError};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub trait Directory: Send + Sync {
    /// Active roster.  A worker document that cannot be read is reported
    /// in [`Roster::rejected`] and does not fail the call.
    fn workers(&self) -> Result<Roster, PayrollError>;
    fn concept_catalog(&self) -> Result<ConceptCatalog, PayrollError>;
    fn cost_centers(&self) -> Result<Vec<CostCenter>, PayrollError>;
    fn contract_types(&self) -> Result<Vec<ContractType>, PayrollError>;
    /// Variable amounts for a worker's month; empty when none were
    /// entered.
    fn movements(
        &self,
        worker_id: &str,
        period: PayrollPeriod,
    ) -> Result<Vec<MovementItem>, PayrollError>;
}

/// Workers read from storage, plus the documents that did not decode.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub workers: Vec<Worker>,
    pub rejected: Vec<RejectedWorker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedWorker {
    /// The document's `id`, or its position when it has none.
    pub worker_id: String,
    pub reason: String,
}

impl RejectedWorker {
    pub fn to_error(&self) -> PayrollError {
        PayrollError::InvalidWorker {
            worker_id: self.worker_id.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Id sets used to check that a worker's references resolve.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    cost_centers: HashSet<String>,
    contract_types: HashSet<String>,
}

impl ReferenceIndex {
    pub fn load(directory: &dyn Directory) -> Result<Self, PayrollError> {
        Ok(Self {
            cost_centers: directory.cost_centers()?.into_iter().map(|c| c.id).collect(),
            contract_types: directory
                .contract_types()?
                .into_iter()
                .map(|c| c.id)
                .collect(),
        })
    }

    pub fn check(&self, worker: &Worker) -> Result<(), PayrollError> {
        let invalid = |reason: String| PayrollError::InvalidWorker {
            worker_id: worker.id.clone(),
            reason,
        };
        if !self.cost_centers.contains(&worker.cost_center_id) {
            return Err(invalid(format!(
                "cost center {} does not exist",
                worker.cost_center_id
            )));
        }
        if !self.contract_types.contains(&worker.contract_type_id) {
            return Err(invalid(format!(
                "contract type {} does not exist",
                worker.contract_type_id
            )));
        }
        Ok(())
    }
}

pub struct StoreDirectory {
    store: Arc<dyn RecordStore>,
}

impl StoreDirectory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

impl Directory for StoreDirectory {
    fn workers(&self) -> Result<Roster, PayrollError> {
        let mut roster = Roster::default();
        for (index, value) in self.store.get_all(Collection::Workers)?.into_iter().enumerate() {
            let worker_id = value
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("<worker record {index}>"));
            match serde_json::from_value::<Worker>(value) {
                Ok(worker) => roster.workers.push(worker),
                Err(err) => {
                    warn!(%worker_id, error = %err, "worker record cannot be read");
                    roster.rejected.push(RejectedWorker {
                        worker_id,
                        reason: format!("record cannot be read: {err}"),
                    });
                }
            }
        }
        Ok(roster)
    }

    fn concept_catalog(&self) -> Result<ConceptCatalog, PayrollError> {
        ConceptCatalog::new(fetch_all::<PayrollConcept>(self.store.as_ref())?)
    }

    fn cost_centers(&self) -> Result<Vec<CostCenter>, PayrollError> {
        Ok(fetch_all(self.store.as_ref())?)
    }

    fn contract_types(&self) -> Result<Vec<ContractType>, PayrollError> {
        Ok(fetch_all(self.store.as_ref())?)
    }

    fn movements(
        &self,
        worker_id: &str,
        period: PayrollPeriod,
    ) -> Result<Vec<MovementItem>, PayrollError> {
        let key = period.record_key(worker_id);
        let movement: Option<MonthlyMovement> = fetch(self.store.as_ref(), &key)?;
        Ok(movement.map(|m| m.items).unwrap_or_default())
    }
}

/// Seed the reference concept catalog, cost centers and contract types.
pub fn seed_reference_data(store: &dyn RecordStore) -> Result<(), StoreError> {
    for concept in reference_concepts() {
        put(store, &concept)?;
    }
    for (id, code, name) in [
        ("cc1", "100", "Administración"),
        ("cc2", "200", "Ventas"),
        ("cc3", "300", "Operaciones"),
    ] {
        put(
            store,
            &CostCenter {
                id: id.into(),
                code: code.into(),
                name: name.into(),
            },
        )?;
    }
    for (id, name) in [
        ("ct1", "Indefinido"),
        ("ct2", "Plazo Fijo"),
        ("ct3", "Por Obra o Faena"),
    ] {
        put(
            store,
            &ContractType {
                id: id.into(),
                name: name.into(),
            },
        )?;
    }
    info!("seeded reference concepts, cost centers and contract types");
    Ok(())
}
