use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Spatial registration object (DICOM REG), reduced to the fields the matrix
/// resolver reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    #[serde(default)]
    pub sop_instance_uid: Option<String>,

    /// Where the record was loaded from, used to name it in diagnostics.
    #[serde(default, skip_serializing)]
    pub source: Option<String>,

    #[serde(default)]
    pub registrations: Option<Vec<RegistrationItem>>,
}

impl RegistrationRecord {
    /// Human readable name for log messages: source path, then SOP instance UID.
    pub fn label(&self) -> String {
        self.source
            .clone()
            .or_else(|| self.sop_instance_uid.clone())
            .unwrap_or_else(|| "<unnamed registration>".to_string())
    }
}

/// One element of the RegistrationSequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationItem {
    #[serde(default)]
    pub frame_of_reference_uid: Option<String>,

    #[serde(default)]
    pub matrix_registrations: Option<Vec<MatrixRegistration>>,

    /// Non-standard flat 4x4 matrix some vendors store directly on the item.
    #[serde(default)]
    pub transformation_matrix: Option<Vec<f64>>,

    /// Translation-only encoding.
    #[serde(default)]
    pub vector: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixRegistration {
    #[serde(default)]
    pub matrices: Option<Vec<MatrixItem>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixItem {
    /// FrameOfReferenceTransformationMatrix, 16 values in row-major order.
    #[serde(default)]
    pub transformation_matrix: Option<Vec<f64>>,

    #[serde(default)]
    pub matrix_type: Option<String>,
}

/// RT Structure Set (DICOM RTSTRUCT).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureSetRecord {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,

    #[serde(default)]
    pub structure_set_label: Option<String>,

    #[serde(default)]
    pub referenced_frames_of_reference: Option<Vec<ReferencedFrameOfReference>>,

    #[serde(default)]
    pub roi_contours: Vec<RoiContour>,

    #[serde(default)]
    pub structure_set_rois: Vec<StructureSetRoi>,

    /// File the current linkage was copied from. Stores that keep the raw
    /// source dataset copy that file's sequence verbatim; when unset the
    /// source's own sequence is left untouched.
    #[serde(skip)]
    pub linkage_source: Option<PathBuf>,
}

impl StructureSetRecord {
    pub fn contour_count(&self) -> usize {
        self.roi_contours
            .iter()
            .map(|roi| roi.contours.as_ref().map_or(0, Vec::len))
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoiContour {
    #[serde(default)]
    pub referenced_roi_number: Option<i32>,

    #[serde(default)]
    pub contours: Option<Vec<ContourItem>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContourItem {
    #[serde(default)]
    pub geometric_type: Option<String>,

    /// Flat x,y,z triplets in patient coordinates (mm).
    #[serde(default)]
    pub contour_data: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureSetRoi {
    #[serde(default)]
    pub roi_number: Option<i32>,

    #[serde(default)]
    pub roi_name: Option<String>,
}

/// One element of the ReferencedFrameOfReferenceSequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferencedFrameOfReference {
    #[serde(default)]
    pub frame_of_reference_uid: Option<String>,

    #[serde(default)]
    pub referenced_studies: Vec<RtReferencedStudy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtReferencedStudy {
    #[serde(default)]
    pub referenced_sop_class_uid: Option<String>,
    #[serde(default)]
    pub referenced_sop_instance_uid: Option<String>,
    #[serde(default)]
    pub referenced_series: Vec<RtReferencedSeries>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtReferencedSeries {
    #[serde(default)]
    pub series_instance_uid: Option<String>,
    #[serde(default)]
    pub contour_images: Vec<ContourImageRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContourImageRef {
    #[serde(default)]
    pub referenced_sop_class_uid: Option<String>,
    #[serde(default)]
    pub referenced_sop_instance_uid: Option<String>,
}

/// Structure set whose frame-of-reference linkage is copied onto the output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    #[serde(default, skip_serializing)]
    pub source: Option<String>,

    #[serde(skip)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub referenced_frames_of_reference: Option<Vec<ReferencedFrameOfReference>>,
}

impl From<StructureSetRecord> for ReferenceRecord {
    fn from(record: StructureSetRecord) -> Self {
        Self {
            source: None,
            path: None,
            referenced_frames_of_reference: record.referenced_frames_of_reference,
        }
    }
}
