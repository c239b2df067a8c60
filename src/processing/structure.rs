use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::TransformError;
use crate::io::records::{ReferenceRecord, StructureSetRecord};
use crate::processing::matrix::TransformMatrix;
use crate::utils::uid::UidGenerator;

/// Appended to the short date to form the StructureSetLabel.
pub const LABEL_SUFFIX: &str = "_REGdiv";

/// ROI names carrying this suffix get the short date instead.
pub const CBCT_SUFFIX: &str = "_CBCT";

/// Maximum length of an LO value such as ROIName.
const MAX_ROI_NAME_LEN: usize = 64;

/// `YYYYMMDD` token taken from the output file name. The digits are not
/// checked against the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDate(String);

impl RunDate {
    /// Second underscore-delimited segment of the file's base name, if it is
    /// exactly eight ASCII digits.
    pub fn from_output_name(path: &Path) -> Option<Self> {
        let base = path.file_name()?.to_str()?;
        let segment = base.split('_').nth(1)?;
        if segment.len() == 8 && segment.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(segment.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `YYMMDD`
    pub fn short(&self) -> &str {
        &self.0[2..]
    }

    pub fn structure_set_label(&self) -> String {
        format!("{}{}", self.short(), LABEL_SUFFIX)
    }

    /// `Bladder_CBCT` -> `Bladder_YYMMDD`; other names are not renamed.
    pub fn rename_roi(&self, name: &str) -> Option<String> {
        let base = name.strip_suffix(CBCT_SUFFIX)?;
        Some(format!("{}_{}", base, self.short()))
    }
}

impl fmt::Display for RunDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiRename {
    pub roi_index: usize,
    pub old_name: String,
    pub new_name: String,
}

/// What a transformation changed, for reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    /// Contours with a non-empty point array.
    pub changed_contours: usize,
    pub points_transformed: usize,
    /// Points whose homogeneous weight was exactly zero.
    pub zero_weight_points: usize,
    pub run_date: Option<RunDate>,
    pub reference_applied: bool,
    pub renamed_rois: Vec<RoiRename>,
    pub warnings: Vec<String>,
}

/// Applies a registration matrix to a structure set and re-identifies it.
#[derive(Debug, Clone, Default)]
pub struct StructureTransformer {
    uids: UidGenerator,
}

impl StructureTransformer {
    pub fn new(uids: UidGenerator) -> Self {
        Self { uids }
    }

    /// Transforms every contour point of `record` with `matrix`.
    ///
    /// `reference` is the outcome of loading the optional reference structure
    /// set; a failed load or a reference without linkage only produces a
    /// warning. `output_name` is the file the caller will write, used to
    /// derive the run date that drives relabelling and ROI renaming.
    ///
    /// Malformed ContourData aborts the whole transformation.
    pub fn transform(
        &self,
        mut record: StructureSetRecord,
        matrix: &TransformMatrix,
        reference: Option<anyhow::Result<ReferenceRecord>>,
        output_name: Option<&Path>,
    ) -> Result<(StructureSetRecord, TransformReport), TransformError> {
        let mut report = TransformReport::default();

        if let Some(reference) = reference {
            apply_reference(&mut record, reference, &mut report);
        }

        report.run_date = output_name.and_then(RunDate::from_output_name);

        let series_uid = self.uids.generate_distinct(&[
            record.series_instance_uid.as_str(),
            record.sop_instance_uid.as_str(),
            record.study_instance_uid.as_str(),
        ]);
        let sop_uid = self.uids.generate_distinct(&[
            record.series_instance_uid.as_str(),
            record.sop_instance_uid.as_str(),
            record.study_instance_uid.as_str(),
            series_uid.as_str(),
        ]);
        record.series_instance_uid = series_uid;
        record.sop_instance_uid = sop_uid;

        if let Some(date) = &report.run_date {
            let label = date.structure_set_label();
            info!(%label, "setting StructureSetLabel");
            record.structure_set_label = Some(label);
        }

        transform_contours(&mut record, matrix, &mut report)?;

        if let Some(date) = report.run_date.clone() {
            rename_rois(&mut record, &date, &mut report);
        }

        Ok((record, report))
    }
}

/// [`StructureTransformer::transform`] with UUID-derived UIDs.
pub fn transform_structure_set(
    record: StructureSetRecord,
    matrix: &TransformMatrix,
    reference: Option<anyhow::Result<ReferenceRecord>>,
    output_name: Option<&Path>,
) -> Result<(StructureSetRecord, TransformReport), TransformError> {
    StructureTransformer::default().transform(record, matrix, reference, output_name)
}

fn apply_reference(
    record: &mut StructureSetRecord,
    reference: anyhow::Result<ReferenceRecord>,
    report: &mut TransformReport,
) {
    match reference {
        Ok(reference) => match reference.referenced_frames_of_reference {
            Some(linkage) => {
                record.referenced_frames_of_reference = Some(linkage);
                record.linkage_source = reference.path;
                report.reference_applied = true;
            }
            None => {
                let message = format!(
                    "reference structure set {} has no ReferencedFrameOfReferenceSequence; keeping the existing one",
                    reference.source.as_deref().unwrap_or("<unnamed>")
                );
                warn!("{message}");
                report.warnings.push(message);
            }
        },
        Err(e) => {
            let message = format!("could not read or use reference structure set: {e:#}");
            warn!("{message}");
            report.warnings.push(message);
        }
    }
}

fn transform_contours(
    record: &mut StructureSetRecord,
    matrix: &TransformMatrix,
    report: &mut TransformReport,
) -> Result<(), TransformError> {
    for (roi_index, roi) in record.roi_contours.iter_mut().enumerate() {
        let Some(contours) = roi.contours.as_mut() else {
            continue;
        };
        for (contour_index, contour) in contours.iter_mut().enumerate() {
            let data = match contour.contour_data.as_deref() {
                Some(data) if !data.is_empty() => data,
                _ => continue,
            };
            if data.len() % 3 != 0 {
                return Err(TransformError::MalformedContourData {
                    roi_index,
                    contour_index,
                    len: data.len(),
                });
            }

            let mut transformed = Vec::with_capacity(data.len());
            for (point_index, xyz) in data.chunks_exact(3).enumerate() {
                let point = [xyz[0], xyz[1], xyz[2]];
                if matrix.weight(point) == 0.0 {
                    report.zero_weight_points += 1;
                }
                let out = matrix.apply(point);
                if out.iter().any(|v| !v.is_finite()) {
                    return Err(TransformError::NonFiniteCoordinate {
                        roi_index,
                        contour_index,
                        point_index,
                    });
                }
                transformed.extend_from_slice(&out);
            }

            report.points_transformed += data.len() / 3;
            contour.contour_data = Some(transformed);
            report.changed_contours += 1;
        }
    }

    if report.zero_weight_points > 0 {
        debug!(
            points = report.zero_weight_points,
            "homogeneous weight was zero; coordinates kept without perspective divide"
        );
    }
    Ok(())
}

fn rename_rois(record: &mut StructureSetRecord, date: &RunDate, report: &mut TransformReport) {
    for (roi_index, roi) in record.structure_set_rois.iter_mut().enumerate() {
        let Some(name) = roi.roi_name.as_deref() else {
            continue;
        };
        let Some(new_name) = date.rename_roi(name) else {
            continue;
        };
        if new_name.chars().count() > MAX_ROI_NAME_LEN {
            let message = format!(
                "ROI {roi_index}: renamed value {new_name:?} exceeds {MAX_ROI_NAME_LEN} characters; keeping {name:?}"
            );
            warn!("{message}");
            report.warnings.push(message);
            continue;
        }
        info!(old = %name, new = %new_name, "renaming ROI");
        report.renamed_rois.push(RoiRename {
            roi_index,
            old_name: name.to_string(),
            new_name: new_name.clone(),
        });
        roi.roi_name = Some(new_name);
    }
}
