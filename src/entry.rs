use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, error, info, info_span};

use crate::io::batch::BatchJob;
use crate::io::RecordStore;
use crate::processing::matrix::{resolve, MatrixResolution};
use crate::processing::structure::{StructureTransformer, TransformReport};

/// Outcome of one successfully processed unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub resolution: MatrixResolution,
    pub report: TransformReport,
}

/// Loads the records of `job`, transforms the structure set and writes it.
pub fn run_transform<S: RecordStore + ?Sized>(
    store: &S,
    transformer: &StructureTransformer,
    job: &BatchJob,
) -> Result<UnitOutcome> {
    let structure_set = store
        .load_structure_set(&job.rtstruct)
        .context("loading structure set failed")?;
    let registration = store
        .load_registration(&job.reg)
        .context("loading registration failed")?;

    let resolution = resolve(&registration);
    info!(origin = ?resolution.origin, "resolved registration matrix");
    debug!(matrix = ?resolution.matrix.row_major(), "registration matrix, row-major");

    let reference = job
        .ref_rtstruct
        .as_deref()
        .map(|path| store.load_reference(path));

    let (record, report) = transformer
        .transform(structure_set, &resolution.matrix, reference, Some(job.out.as_path()))
        .with_context(|| format!("transforming {} failed", job.rtstruct.display()))?;

    store
        .save_structure_set(&job.rtstruct, &record, &job.out)
        .context("saving structure set failed")?;

    info!(
        rtstruct = %job.rtstruct.display(),
        reg = %job.reg.display(),
        ref_rtstruct = ?job.ref_rtstruct.as_ref().map(|p| p.display().to_string()),
        out = %job.out.display(),
        contours = report.changed_contours,
        "transformation complete"
    );

    Ok(UnitOutcome { resolution, report })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Zero-based position of the unit in the batch.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub failures: Vec<BatchFailure>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Batch summary:")?;
        writeln!(f, "  total : {}", self.total)?;
        writeln!(f, "  ok    : {}", self.ok)?;
        write!(f, "  errors: {}", self.errors)?;
        for failure in &self.failures {
            write!(f, "\n    #{}: {}", failure.index + 1, failure.message)?;
        }
        Ok(())
    }
}

/// Processes every unit in order. A failing unit is logged and counted and
/// never stops the remaining ones. Warnings are logged where they arise; the
/// ones kept on each outcome are for reporting only.
pub fn run_batch<S, I>(store: &S, transformer: &StructureTransformer, units: I) -> BatchSummary
where
    S: RecordStore + ?Sized,
    I: IntoIterator<Item = Result<BatchJob>>,
{
    let mut summary = BatchSummary::default();

    for (index, unit) in units.into_iter().enumerate() {
        summary.total += 1;
        let span = info_span!("unit", index = index + 1);
        let _guard = span.enter();

        let result = unit.and_then(|job| {
            info!(
                rtstruct = %job.rtstruct.display(),
                reg = %job.reg.display(),
                out = %job.out.display(),
                "processing batch entry"
            );
            run_transform(store, transformer, &job)
        });

        match result {
            Ok(_) => summary.ok += 1,
            Err(e) => {
                summary.errors += 1;
                let message = format!("{e:#}");
                error!(%message, "batch entry failed");
                summary.failures.push(BatchFailure { index, message });
            }
        }
    }

    info!(
        total = summary.total,
        ok = summary.ok,
        errors = summary.errors,
        "batch finished"
    );
    summary
}
