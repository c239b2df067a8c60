//! Re-registration of RT structure sets.
//!
//! A registration record supplies a 4x4 matrix; every contour point of a
//! structure set is moved through it, the set is given fresh series and
//! instance UIDs, and labels/ROI names are rewritten from the run date found
//! in the output file name.

pub mod config;
pub mod entry;
pub mod error;
pub mod io;
pub mod logging;
pub mod processing;
pub mod utils;

#[cfg(feature = "python")]
mod python_bind;

pub use entry::{run_batch, run_transform, BatchSummary, UnitOutcome};
pub use error::{ConfigError, TransformError};
pub use io::{RecordFormat, RecordStore};
pub use processing::matrix::{resolve, ExtractionStrategy, MatrixResolution, TransformMatrix};
pub use processing::structure::{
    transform_structure_set, RunDate, StructureTransformer, TransformReport,
};
