// File: src/python_bind.rs
use std::path::Path;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::config::Settings;
use crate::entry::{run_batch, run_transform, BatchSummary, UnitOutcome};
use crate::io::batch::{read_batch_csv, BatchJob};
use crate::io::RecordFormat;
use crate::processing::structure::StructureTransformer;

#[pyclass]
#[derive(Debug, Clone)]
pub struct PyTransformResult {
    #[pyo3(get)]
    pub changed_contours: usize,
    #[pyo3(get)]
    pub points_transformed: usize,
    /// Row-major 4x4 matrix that was applied
    #[pyo3(get)]
    pub matrix: Vec<Vec<f64>>,
    #[pyo3(get)]
    pub identity_fallback: bool,
    #[pyo3(get)]
    pub run_date: Option<String>,
    #[pyo3(get)]
    pub warnings: Vec<String>,
}

#[pymethods]
impl PyTransformResult {
    fn __repr__(&self) -> String {
        format!(
            "TransformResult(contours={}, points={}, identity_fallback={}, run_date={:?}, warnings={})",
            self.changed_contours,
            self.points_transformed,
            self.identity_fallback,
            self.run_date,
            self.warnings.len()
        )
    }
}

impl From<&UnitOutcome> for PyTransformResult {
    fn from(outcome: &UnitOutcome) -> Self {
        let mut warnings: Vec<String> = outcome.resolution.warning.iter().cloned().collect();
        warnings.extend(outcome.report.warnings.iter().cloned());
        Self {
            changed_contours: outcome.report.changed_contours,
            points_transformed: outcome.report.points_transformed,
            matrix: outcome
                .resolution
                .matrix
                .row_major()
                .chunks(4)
                .map(<[f64]>::to_vec)
                .collect(),
            identity_fallback: outcome.resolution.is_fallback(),
            run_date: outcome.report.run_date.as_ref().map(|d| d.to_string()),
            warnings,
        }
    }
}

#[pyclass]
#[derive(Debug, Clone)]
pub struct PyBatchSummary {
    #[pyo3(get)]
    pub total: usize,
    #[pyo3(get)]
    pub ok: usize,
    #[pyo3(get)]
    pub errors: usize,
    /// (1-based row, message)
    #[pyo3(get)]
    pub failures: Vec<(usize, String)>,
}

#[pymethods]
impl PyBatchSummary {
    fn __repr__(&self) -> String {
        format!(
            "BatchSummary(total={}, ok={}, errors={})",
            self.total, self.ok, self.errors
        )
    }
}

impl From<BatchSummary> for PyBatchSummary {
    fn from(summary: BatchSummary) -> Self {
        Self {
            total: summary.total,
            ok: summary.ok,
            errors: summary.errors,
            failures: summary
                .failures
                .into_iter()
                .map(|f| (f.index + 1, f.message))
                .collect(),
        }
    }
}

fn transformer_and_format(
    format: &str,
    config: Option<&str>,
) -> PyResult<(StructureTransformer, RecordFormat)> {
    let settings = match config {
        Some(path) => Settings::load(path).map_err(|e| PyValueError::new_err(e.to_string()))?,
        None => Settings::default(),
    };
    let format: RecordFormat = format.parse().map_err(PyValueError::new_err)?;
    let uids = settings
        .uid_generator()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok((StructureTransformer::new(uids), format))
}

/// Transform one RTSTRUCT with the matrix from a REG file and write it to `out`.
#[pyfunction]
#[pyo3(signature = (rtstruct, reg, out, ref_rtstruct = None, format = "dicom", config = None))]
fn transform_rtstruct_py(
    rtstruct: &str,
    reg: &str,
    out: &str,
    ref_rtstruct: Option<&str>,
    format: &str,
    config: Option<&str>,
) -> PyResult<PyTransformResult> {
    let (transformer, format) = transformer_and_format(format, config)?;
    let job = BatchJob::new(rtstruct, reg, out, ref_rtstruct)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let store = format.store();
    let outcome = run_transform(store.as_ref(), &transformer, &job)
        .map_err(|e| PyRuntimeError::new_err(format!("{e:#}")))?;
    Ok((&outcome).into())
}

/// Run every row of a batch CSV (`rtstruct,reg,out[,ref_rtstruct]`).
#[pyfunction]
#[pyo3(signature = (csv_path, format = "dicom", config = None))]
fn run_batch_py(csv_path: &str, format: &str, config: Option<&str>) -> PyResult<PyBatchSummary> {
    let (transformer, format) = transformer_and_format(format, config)?;
    let units = read_batch_csv(Path::new(csv_path))
        .map_err(|e| PyValueError::new_err(format!("{e:#}")))?;
    let store = format.store();
    Ok(run_batch(store.as_ref(), &transformer, units).into())
}

/// This is the module importable from Python:
///
/// ```python
/// import rtstructreg as rr
/// rr.transform_rtstruct_py("rtstruct.dcm", "reg.dcm", "out/transformed_20240115_a.dcm")
/// ```
#[pymodule]
fn rtstructreg(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(transform_rtstruct_py, m)?)?;
    m.add_function(wrap_pyfunction!(run_batch_py, m)?)?;
    m.add_class::<PyTransformResult>()?;
    m.add_class::<PyBatchSummary>()?;
    Ok(())
}
