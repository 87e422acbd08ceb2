//! Requirement data model and I/O adapters.

pub mod csv;
pub mod rgw;
pub mod types;

pub use csv::{parse_csv, to_csv};
pub use rgw::load_gateway;
pub use types::{Location, Requirement, RequirementsCollection};
