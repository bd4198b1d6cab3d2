use crate::core::models::trajectory::TrajectoryError;
use nalgebra::{DMatrix, DVectorView};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("No descriptor function named '{0}' is registered")]
    Unregistered(String),
    #[error(
        "Descriptor values are {rows}x{cols} but {index} index values and {columns} column labels were given"
    )]
    Shape {
        rows: usize,
        cols: usize,
        index: usize,
        columns: usize,
    },
    #[error("Descriptor '{name}' has ragged rows")]
    Ragged { name: String },
    #[error("Invalid argument for descriptor '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("Descriptor '{name}' failed: {reason}")]
    Failed { name: String, reason: String },
    #[error("Descriptor received an invalid trajectory: {0}")]
    Trajectory(#[from] TrajectoryError),
}

/// A labelled 2-D descriptor array, e.g. an RDF with distances as rows and atom pairs as columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    index: Vec<f64>,
    columns: Vec<String>,
    values: DMatrix<f64>,
}

impl Descriptor {
    pub fn new(
        index: Vec<f64>,
        columns: Vec<String>,
        values: DMatrix<f64>,
    ) -> Result<Self, DescriptorError> {
        if values.nrows() != index.len() || values.ncols() != columns.len() {
            return Err(DescriptorError::Shape {
                rows: values.nrows(),
                cols: values.ncols(),
                index: index.len(),
                columns: columns.len(),
            });
        }
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    /// Builds a descriptor from row-major data.
    pub fn from_rows(
        index: Vec<f64>,
        columns: Vec<String>,
        rows: &[Vec<f64>],
    ) -> Result<Self, DescriptorError> {
        let ncols = columns.len();
        if rows.iter().any(|r| r.len() != ncols) {
            return Err(DescriptorError::Ragged {
                name: columns.join(","),
            });
        }
        let values = DMatrix::from_row_iterator(rows.len(), ncols, rows.iter().flatten().copied());
        Self::new(index, columns, values)
    }

    pub fn index(&self) -> &[f64] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }

    pub fn column(&self, label: &str) -> Option<DVectorView<'_, f64>> {
        let j = self.columns.iter().position(|c| c == label)?;
        Some(self.values.column(j))
    }

    /// Looks up an atom-pair column in either order (`"Cd Se"` or `"Se Cd"`).
    pub fn pair_column(&self, a: &str, b: &str) -> Option<DVectorView<'_, f64>> {
        self.column(&format!("{} {}", a, b))
            .or_else(|| self.column(&format!("{} {}", b, a)))
    }

    pub fn sum(&self) -> f64 {
        self.values.sum()
    }
}
