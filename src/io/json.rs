use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::info;

use super::records::{ReferenceRecord, RegistrationRecord, StructureSetRecord};
use super::{ensure_parent_dir, RecordStore};

/// Records stored as JSON documents mirroring the record types.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStore;

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {what} {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {what} {}", path.display()))
}

impl RecordStore for JsonStore {
    fn load_structure_set(&self, path: &Path) -> Result<StructureSetRecord> {
        read_json(path, "structure set")
    }

    fn load_registration(&self, path: &Path) -> Result<RegistrationRecord> {
        let mut record: RegistrationRecord = read_json(path, "registration")?;
        record.source = Some(path.display().to_string());
        Ok(record)
    }

    fn load_reference(&self, path: &Path) -> Result<ReferenceRecord> {
        let mut record: ReferenceRecord = read_json(path, "reference structure set")?;
        record.source = Some(path.display().to_string());
        record.path = Some(path.to_path_buf());
        Ok(record)
    }

    fn save_structure_set(
        &self,
        _source: &Path,
        record: &StructureSetRecord,
        out: &Path,
    ) -> Result<()> {
        ensure_parent_dir(out)
            .with_context(|| format!("failed to create output directory for {}", out.display()))?;
        let file = File::create(out)
            .with_context(|| format!("failed to create {}", out.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)
            .with_context(|| format!("failed to serialise structure set to {}", out.display()))?;
        writer.flush()?;
        info!(path = %out.display(), "wrote structure set");
        Ok(())
    }
}
