//! Payroll concept classification.
//!
//! The calculator never inspects [`PayrollConcept`] records directly; it
//! asks a [`ConceptClassifier`] what a movement's concept code means.

use crate::error::PayrollError;
use crate::models::{ConceptKind, PayrollConcept};
use serde::Serialize;
use std::collections::HashMap;

/// What a concept contributes to each base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptClass {
    pub kind: ConceptKind,
    pub contributable: bool,
    pub taxable: bool,
    pub gratification_eligible: bool,
}

impl ConceptClass {
    fn of(concept: &PayrollConcept) -> Self {
        match concept.kind {
            ConceptKind::Earning => Self {
                kind: ConceptKind::Earning,
                contributable: concept.contributable,
                taxable: concept.taxable,
                gratification_eligible: concept.gratification_eligible,
            },
            // Flags are meaningless on deductions.
            ConceptKind::Deduction => Self {
                kind: ConceptKind::Deduction,
                contributable: false,
                taxable: false,
                gratification_eligible: false,
            },
        }
    }

    pub fn is_earning(&self) -> bool {
        self.kind == ConceptKind::Earning
    }
}

pub trait ConceptClassifier: Send + Sync {
    /// Classifies a concept code, failing with
    /// [`PayrollError::UnknownConcept`] when the code is not cataloged.
    fn classify(&self, code: &str) -> Result<ConceptClass, PayrollError>;
}

/// Concept catalog keyed by code.
#[derive(Debug, Clone, Default)]
pub struct ConceptCatalog {
    by_code: HashMap<String, ConceptClass>,
}

impl ConceptCatalog {
    /// Builds a catalog, rejecting duplicate codes.
    pub fn new(concepts: impl IntoIterator<Item = PayrollConcept>) -> Result<Self, PayrollError> {
        let mut by_code = HashMap::new();
        for concept in concepts {
            let class = ConceptClass::of(&concept);
            if by_code.insert(concept.code.clone(), class).is_some() {
                return Err(PayrollError::DuplicateConcept(concept.code));
            }
        }
        Ok(Self { by_code })
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl ConceptClassifier for ConceptCatalog {
    fn classify(&self, code: &str) -> Result<ConceptClass, PayrollError> {
        self.by_code
            .get(code)
            .copied()
            .ok_or_else(|| PayrollError::UnknownConcept(code.to_string()))
    }
}

/// The catalog shipped with a fresh installation.
pub fn reference_concepts() -> Vec<PayrollConcept> {
    use ConceptKind::{Deduction, Earning};

    let concept = |id: &str, code: &str, name: &str, kind, contributable, taxable, gratification| {
        PayrollConcept {
            id: id.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            kind,
            contributable,
            taxable,
            gratification_eligible: gratification,
        }
    };
    vec![
        concept("h1", "001", "Sueldo Base", Earning, true, true, false),
        concept("h2", "005", "Asignación de Movilización", Earning, false, false, false),
        concept("h3", "006", "Asignación de Colación", Earning, false, false, false),
        concept("h4", "010", "Bono de Producción", Earning, true, true, true),
        concept("d1", "501", "Anticipo de Sueldo", Deduction, false, false, false),
        concept("d2", "505", "Préstamo Empresa", Deduction, false, false, false),
    ]
}
