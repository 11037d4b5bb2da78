//! Error kinds raised while building architectures and sampling batches.
//!
//! Every variant is fatal. Library functions return `anyhow::Result` and
//! wrap these values, so callers match on a kind with
//! `err.downcast_ref::<LupinError>()`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LupinError {
    /// Ontology level/OBO files referencing undefined parents, cycles, bad columns
    #[error("malformed ontology: {0}")]
    MalformedOntology(String),

    /// Wrong column count, duplicate groups, gene index out of range
    #[error("grouping format: {0}")]
    GroupingFormat(String),

    /// Grouping file built against a different gene order than the expression matrix
    #[error("gene alignment: {0}")]
    GeneAlignment(String),

    /// A sparse unit would have no input genes
    #[error("empty group: {0}")]
    EmptyGroup(String),

    /// Some ontology unit cannot be reached from the input layer
    #[error("disconnected architecture: {0}")]
    DisconnectedArchitecture(String),

    /// Not enough classes or samples per class to form pairs/batches
    #[error("insufficient samples: {0}")]
    InsufficientSamples(String),

    /// A (cell type, cell type) key absent from the distance table
    #[error("missing distance: {0} -> {1}")]
    MissingDistance(Box<str>, Box<str>),

    #[error("distance table format: {0}")]
    DistanceTableFormat(String),

    #[error("unknown ontology term: {0}")]
    UnknownTerm(Box<str>),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Kind of the error if it carries a [`LupinError`]
pub fn error_kind(err: &anyhow::Error) -> Option<&LupinError> {
    err.downcast_ref::<LupinError>()
}
