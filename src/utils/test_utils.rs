use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::io::records::{
    ContourItem, ReferenceRecord, ReferencedFrameOfReference, RegistrationItem,
    RegistrationRecord, RoiContour, StructureSetRecord, StructureSetRoi,
};
use crate::io::RecordStore;
use crate::processing::matrix::TransformMatrix;

/// Pure translation matrix
pub fn translation(tx: f64, ty: f64, tz: f64) -> TransformMatrix {
    TransformMatrix::from_translation(&[tx, ty, tz]).unwrap()
}

fn closed_planar(points: Vec<f64>) -> ContourItem {
    ContourItem {
        geometric_type: Some("CLOSED_PLANAR".to_string()),
        contour_data: Some(points),
    }
}

/// Structure set with
/// - ROI contour 0: two contours holding 2 and 3 points,
/// - ROI contour 1: one contour with empty data and one without data,
/// - ROIs `Bladder_CBCT`, `Rectum` and one without a name.
pub fn sample_structure_set() -> StructureSetRecord {
    StructureSetRecord {
        study_instance_uid: "1.2.826.0.1.3680043.2.1125.1".to_string(),
        series_instance_uid: "1.2.826.0.1.3680043.2.1125.2".to_string(),
        sop_instance_uid: "1.2.826.0.1.3680043.2.1125.3".to_string(),
        structure_set_label: Some("CBCT".to_string()),
        referenced_frames_of_reference: Some(vec![ReferencedFrameOfReference {
            frame_of_reference_uid: Some("1.2.826.0.1.3680043.2.1125.4".to_string()),
            referenced_studies: Vec::new(),
        }]),
        roi_contours: vec![
            RoiContour {
                referenced_roi_number: Some(1),
                contours: Some(vec![
                    closed_planar(vec![10.0, -20.5, 3.0, 11.0, -19.5, 3.0]),
                    closed_planar(vec![
                        -5.25, 40.0, 6.0, //
                        -4.25, 41.0, 6.0, //
                        -3.25, 40.5, 6.0,
                    ]),
                ]),
            },
            RoiContour {
                referenced_roi_number: Some(2),
                contours: Some(vec![
                    closed_planar(Vec::new()),
                    ContourItem {
                        geometric_type: Some("POINT".to_string()),
                        contour_data: None,
                    },
                ]),
            },
        ],
        structure_set_rois: vec![
            StructureSetRoi {
                roi_number: Some(1),
                roi_name: Some("Bladder_CBCT".to_string()),
            },
            StructureSetRoi {
                roi_number: Some(2),
                roi_name: Some("Rectum".to_string()),
            },
            StructureSetRoi {
                roi_number: Some(3),
                roi_name: None,
            },
        ],
        linkage_source: None,
    }
}

/// Flat ContourData of one contour
pub fn contour_points(record: &StructureSetRecord, roi: usize, contour: usize) -> Vec<f64> {
    record.roi_contours[roi].contours.as_ref().unwrap()[contour]
        .contour_data
        .clone()
        .unwrap()
}

/// Registration carrying a translation in the `vector` field
pub fn translation_registration(tx: f64, ty: f64, tz: f64) -> RegistrationRecord {
    RegistrationRecord {
        sop_instance_uid: Some("1.2.826.0.1.3680043.2.1125.9".to_string()),
        source: None,
        registrations: Some(vec![RegistrationItem {
            vector: Some(vec![tx, ty, tz]),
            ..Default::default()
        }]),
    }
}

/// In-memory [`RecordStore`] keyed by path.
#[derive(Default)]
pub struct MemoryStore {
    pub structure_sets: HashMap<PathBuf, StructureSetRecord>,
    pub registrations: HashMap<PathBuf, RegistrationRecord>,
    pub saved: RefCell<HashMap<PathBuf, StructureSetRecord>>,
}

impl MemoryStore {
    pub fn saved(&self, path: &str) -> Option<StructureSetRecord> {
        self.saved.borrow().get(Path::new(path)).cloned()
    }
}

impl RecordStore for MemoryStore {
    fn load_structure_set(&self, path: &Path) -> Result<StructureSetRecord> {
        self.structure_sets
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no structure set at {}", path.display()))
    }

    fn load_registration(&self, path: &Path) -> Result<RegistrationRecord> {
        self.registrations
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no registration at {}", path.display()))
    }

    fn load_reference(&self, path: &Path) -> Result<ReferenceRecord> {
        let record = self.load_structure_set(path)?;
        Ok(ReferenceRecord {
            source: Some(path.display().to_string()),
            path: Some(path.to_path_buf()),
            ..record.into()
        })
    }

    fn save_structure_set(
        &self,
        _source: &Path,
        record: &StructureSetRecord,
        out: &Path,
    ) -> Result<()> {
        self.saved
            .borrow_mut()
            .insert(out.to_path_buf(), record.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `f` under a plain-text `fmt` subscriber at trace level and returns
/// its result together with everything that was logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, logs)
}
