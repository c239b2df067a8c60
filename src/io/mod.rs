pub mod batch;
pub mod dicom_io;
pub mod json;
pub mod records;

use std::fmt;
use std::str::FromStr;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use records::{ReferenceRecord, RegistrationRecord, StructureSetRecord};

/// Loads and persists the records the transformer works on.
pub trait RecordStore {
    fn load_structure_set(&self, path: &Path) -> Result<StructureSetRecord>;

    fn load_registration(&self, path: &Path) -> Result<RegistrationRecord>;

    fn load_reference(&self, path: &Path) -> Result<ReferenceRecord>;

    /// Writes `record` to `out`. `source` is the file `record` was loaded
    /// from, for stores that patch the original rather than serialise anew.
    fn save_structure_set(
        &self,
        source: &Path,
        record: &StructureSetRecord,
        out: &Path,
    ) -> Result<()>;
}

/// On-disk representation of the records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// DICOM Part 10 files
    #[default]
    Dicom,
    Json,
}

impl RecordFormat {
    pub fn store(self) -> Box<dyn RecordStore> {
        match self {
            RecordFormat::Dicom => Box::new(dicom_io::DicomStore),
            RecordFormat::Json => Box::new(json::JsonStore),
        }
    }
}

impl FromStr for RecordFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dicom" | "dcm" => Ok(RecordFormat::Dicom),
            "json" => Ok(RecordFormat::Json),
            other => Err(format!("unknown record format {other:?} (expected dicom or json)")),
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFormat::Dicom => f.write_str("dicom"),
            RecordFormat::Json => f.write_str("json"),
        }
    }
}

/// Creates the parent directory of an output file if it is missing.
pub(crate) fn ensure_parent_dir(out: &Path) -> std::io::Result<()> {
    match out.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
