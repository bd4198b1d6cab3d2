use super::config::MoleculeReduction;
use crate::core::descriptors::Descriptor;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComparisonError {
    #[error("Descriptor '{name}' has shape {found:?}, reference has shape {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Reference descriptor '{name}' of molecule {molecule} sums to {sum}; it cannot normalize an error")]
    DegenerateReference {
        name: String,
        molecule: usize,
        sum: f64,
    },
    #[error("Expected descriptors for {expected} molecules, found {found}")]
    MoleculeCount { expected: usize, found: usize },
    #[error("Expected {expected} descriptors for molecule {molecule}, found {found}")]
    DescriptorCount {
        molecule: usize,
        expected: usize,
        found: usize,
    },
}

/// `sum((sim - ref)^2) / sum(ref)` over all elements of one descriptor.
pub fn descriptor_error(
    name: &str,
    reference: &Descriptor,
    simulated: &Descriptor,
) -> Result<f64, ComparisonError> {
    if reference.shape() != simulated.shape() {
        return Err(ComparisonError::ShapeMismatch {
            name: name.to_string(),
            expected: reference.shape(),
            found: simulated.shape(),
        });
    }
    let squared: f64 = (simulated.values() - reference.values())
        .iter()
        .map(|d| d * d)
        .sum();
    Ok(squared / reference.sum())
}

/// Scores simulated descriptors against the immutable reference set.
#[derive(Debug, Clone)]
pub struct AuxErrorEvaluator {
    names: Vec<String>,
    /// `references[molecule][descriptor]`
    references: Vec<Vec<Descriptor>>,
    reduction: MoleculeReduction,
}

impl AuxErrorEvaluator {
    pub fn new(
        names: Vec<String>,
        references: Vec<Vec<Descriptor>>,
        reduction: MoleculeReduction,
    ) -> Result<Self, ComparisonError> {
        for (molecule, row) in references.iter().enumerate() {
            if row.len() != names.len() {
                return Err(ComparisonError::DescriptorCount {
                    molecule,
                    expected: names.len(),
                    found: row.len(),
                });
            }
            for (name, reference) in names.iter().zip(row) {
                let sum = reference.sum();
                if sum == 0.0 || !sum.is_finite() {
                    return Err(ComparisonError::DegenerateReference {
                        name: name.clone(),
                        molecule,
                        sum,
                    });
                }
            }
        }
        Ok(Self {
            names,
            references,
            reduction,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_molecules(&self) -> usize {
        self.references.len()
    }

    pub fn reference(&self, molecule: usize, name: &str) -> Option<&Descriptor> {
        let j = self.names.iter().position(|n| n == name)?;
        self.references.get(molecule).map(|row| &row[j])
    }

    /// Error of one molecule: the sum of its per-descriptor errors.
    pub fn molecule_error(
        &self,
        molecule: usize,
        simulated: &[Descriptor],
    ) -> Result<f64, ComparisonError> {
        let references = &self.references[molecule];
        if simulated.len() != references.len() {
            return Err(ComparisonError::DescriptorCount {
                molecule,
                expected: references.len(),
                found: simulated.len(),
            });
        }
        self.names
            .iter()
            .zip(references.iter().zip(simulated))
            .map(|(name, (r, s))| descriptor_error(name, r, s))
            .sum()
    }

    /// Returns the combined error and the per-molecule errors it was reduced from.
    pub fn evaluate(&self, simulated: &[Vec<Descriptor>]) -> Result<(f64, Vec<f64>), ComparisonError> {
        if simulated.len() != self.references.len() {
            return Err(ComparisonError::MoleculeCount {
                expected: self.references.len(),
                found: simulated.len(),
            });
        }
        let per_molecule = simulated
            .iter()
            .enumerate()
            .map(|(m, descriptors)| self.molecule_error(m, descriptors))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((self.reduce(&per_molecule), per_molecule))
    }

    pub fn reduce(&self, per_molecule: &[f64]) -> f64 {
        let total: f64 = per_molecule.iter().sum();
        match self.reduction {
            MoleculeReduction::Sum => total,
            MoleculeReduction::Mean => total / per_molecule.len().max(1) as f64,
        }
    }
}
