pub mod architecture;
pub mod common_io;
pub mod distance_table;
pub mod error;
pub mod grouping;
pub mod margin;
pub mod ontology;
pub mod pairs;
pub mod triplet;

pub use error::LupinError;
