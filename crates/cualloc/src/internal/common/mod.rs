pub(crate) mod data_structures;
pub(crate) mod error;
pub(crate) mod ids;
pub mod limits;

pub use data_structures::{Map, Set};
