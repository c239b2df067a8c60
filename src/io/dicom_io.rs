use std::path::Path;

use anyhow::{ensure, Context, Result};
use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::{open_file, FileMetaTableBuilder, InMemDicomObject};
use tracing::{debug, info};

use super::records::{
    ContourImageRef, ContourItem, MatrixItem, MatrixRegistration, ReferenceRecord,
    ReferencedFrameOfReference, RegistrationItem, RegistrationRecord, RoiContour,
    RtReferencedSeries, RtReferencedStudy, StructureSetRecord, StructureSetRoi,
};
use super::{ensure_parent_dir, RecordStore};

/// Names of the flat matrix and translation some exporters attach to a
/// registration item. Neither is a keyword of the standard dictionary, so a
/// by-name lookup on a conforming file always comes back empty and only the
/// nested MatrixSequence path yields a matrix from DICOM input. The JSON store
/// can populate both.
const DIRECT_MATRIX_KEYWORD: &str = "RegistrationTransformationMatrix";
const VECTOR_KEYWORD: &str = "Vector";

/// Maximum length of a DS value.
const MAX_DS_LEN: usize = 16;

/// Reads and writes DICOM Part 10 files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomStore;

impl RecordStore for DicomStore {
    fn load_structure_set(&self, path: &Path) -> Result<StructureSetRecord> {
        let obj = open_file(path)
            .with_context(|| format!("failed to open RTSTRUCT {}", path.display()))?;
        structure_set_from_object(&obj)
            .with_context(|| format!("failed to read RTSTRUCT {}", path.display()))
    }

    fn load_registration(&self, path: &Path) -> Result<RegistrationRecord> {
        let obj = open_file(path)
            .with_context(|| format!("failed to open REG {}", path.display()))?;
        let mut record = registration_from_object(&obj);
        record.source = Some(path.display().to_string());
        Ok(record)
    }

    fn load_reference(&self, path: &Path) -> Result<ReferenceRecord> {
        let obj = open_file(path)
            .with_context(|| format!("failed to open reference RTSTRUCT {}", path.display()))?;
        Ok(ReferenceRecord {
            source: Some(path.display().to_string()),
            path: Some(path.to_path_buf()),
            referenced_frames_of_reference: frames_of_reference_from_object(&obj),
        })
    }

    fn save_structure_set(
        &self,
        source: &Path,
        record: &StructureSetRecord,
        out: &Path,
    ) -> Result<()> {
        let obj = open_file(source)
            .with_context(|| format!("failed to reopen RTSTRUCT {}", source.display()))?;
        let transfer_syntax = obj.meta().transfer_syntax().to_string();
        let linkage = match &record.linkage_source {
            Some(reference) => Some(reference_linkage(reference)?),
            None => None,
        };
        let mut dataset = obj.into_inner();
        patch_structure_set(&mut dataset, record, linkage)?;

        let file = dataset
            .with_meta(FileMetaTableBuilder::new().transfer_syntax(transfer_syntax))
            .context("failed to build file meta group")?;
        ensure_parent_dir(out)
            .with_context(|| format!("failed to create output directory for {}", out.display()))?;
        file.write_to_file(out)
            .with_context(|| format!("failed to write RTSTRUCT {}", out.display()))?;
        info!(path = %out.display(), "wrote RTSTRUCT");
        Ok(())
    }
}

// --- Reading ---

/// Raw ReferencedFrameOfReferenceSequence of the reference structure set at
/// `path`, including elements the record types do not model.
fn reference_linkage(path: &Path) -> Result<InMemElement> {
    let obj = open_file(path)
        .with_context(|| format!("failed to reopen reference RTSTRUCT {}", path.display()))?;
    obj.element(tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)
        .cloned()
        .with_context(|| {
            format!(
                "reference RTSTRUCT {} has no ReferencedFrameOfReferenceSequence",
                path.display()
            )
        })
}

pub fn structure_set_from_object(obj: &InMemDicomObject) -> Result<StructureSetRecord> {
    let study_instance_uid =
        get_string(obj, tags::STUDY_INSTANCE_UID).context("missing StudyInstanceUID")?;
    let series_instance_uid =
        get_string(obj, tags::SERIES_INSTANCE_UID).context("missing SeriesInstanceUID")?;
    let sop_instance_uid =
        get_string(obj, tags::SOP_INSTANCE_UID).context("missing SOPInstanceUID")?;

    let roi_contours = get_items(obj, tags::ROI_CONTOUR_SEQUENCE)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(roi_index, item)| {
            roi_contour_from_item(item)
                .with_context(|| format!("invalid ROIContourSequence item {roi_index}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let structure_set_rois = get_items(obj, tags::STRUCTURE_SET_ROI_SEQUENCE)
        .unwrap_or_default()
        .iter()
        .map(|item| StructureSetRoi {
            roi_number: get_i32(item, tags::ROI_NUMBER),
            roi_name: get_string(item, tags::ROI_NAME),
        })
        .collect();

    Ok(StructureSetRecord {
        study_instance_uid,
        series_instance_uid,
        sop_instance_uid,
        structure_set_label: get_string(obj, tags::STRUCTURE_SET_LABEL),
        referenced_frames_of_reference: frames_of_reference_from_object(obj),
        roi_contours,
        structure_set_rois,
        linkage_source: None,
    })
}

fn roi_contour_from_item(item: &InMemDicomObject) -> Result<RoiContour> {
    let contours = match get_items(item, tags::CONTOUR_SEQUENCE) {
        Some(items) => Some(
            items
                .iter()
                .map(contour_from_item)
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    Ok(RoiContour {
        referenced_roi_number: get_i32(item, tags::REFERENCED_ROI_NUMBER),
        contours,
    })
}

fn contour_from_item(item: &InMemDicomObject) -> Result<ContourItem> {
    let contour_data = match item.element(tags::CONTOUR_DATA).ok() {
        Some(element) => Some(
            element
                .to_multi_float64()
                .context("ContourData is not numeric")?,
        ),
        None => None,
    };
    Ok(ContourItem {
        geometric_type: get_string(item, tags::CONTOUR_GEOMETRIC_TYPE),
        contour_data,
    })
}

fn frames_of_reference_from_object(
    obj: &InMemDicomObject,
) -> Option<Vec<ReferencedFrameOfReference>> {
    let items = get_items(obj, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)?;
    Some(
        items
            .iter()
            .map(|item| ReferencedFrameOfReference {
                frame_of_reference_uid: get_string(item, tags::FRAME_OF_REFERENCE_UID),
                referenced_studies: get_items(item, tags::RT_REFERENCED_STUDY_SEQUENCE)
                    .unwrap_or_default()
                    .iter()
                    .map(|study| RtReferencedStudy {
                        referenced_sop_class_uid: get_string(study, tags::REFERENCED_SOP_CLASS_UID),
                        referenced_sop_instance_uid: get_string(
                            study,
                            tags::REFERENCED_SOP_INSTANCE_UID,
                        ),
                        referenced_series: get_items(study, tags::RT_REFERENCED_SERIES_SEQUENCE)
                            .unwrap_or_default()
                            .iter()
                            .map(|series| RtReferencedSeries {
                                series_instance_uid: get_string(series, tags::SERIES_INSTANCE_UID),
                                contour_images: get_items(series, tags::CONTOUR_IMAGE_SEQUENCE)
                                    .unwrap_or_default()
                                    .iter()
                                    .map(|image| ContourImageRef {
                                        referenced_sop_class_uid: get_string(
                                            image,
                                            tags::REFERENCED_SOP_CLASS_UID,
                                        ),
                                        referenced_sop_instance_uid: get_string(
                                            image,
                                            tags::REFERENCED_SOP_INSTANCE_UID,
                                        ),
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    )
}

/// Registration fields are read leniently: anything unreadable becomes
/// `None` and is left for the matrix resolver to skip.
pub fn registration_from_object(obj: &InMemDicomObject) -> RegistrationRecord {
    let registrations = get_items(obj, tags::REGISTRATION_SEQUENCE).map(|items| {
        items
            .iter()
            .map(|item| RegistrationItem {
                frame_of_reference_uid: get_string(item, tags::FRAME_OF_REFERENCE_UID),
                matrix_registrations: get_items(item, tags::MATRIX_REGISTRATION_SEQUENCE).map(
                    |regs| {
                        regs.iter()
                            .map(|reg| MatrixRegistration {
                                matrices: get_items(reg, tags::MATRIX_SEQUENCE).map(|matrices| {
                                    matrices
                                        .iter()
                                        .map(|m| MatrixItem {
                                            transformation_matrix: get_f64_vec(
                                                m,
                                                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX,
                                            ),
                                            matrix_type: get_string(
                                                m,
                                                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX_TYPE,
                                            ),
                                        })
                                        .collect()
                                }),
                            })
                            .collect()
                    },
                ),
                transformation_matrix: get_f64_vec_by_name(item, DIRECT_MATRIX_KEYWORD),
                vector: get_f64_vec_by_name(item, VECTOR_KEYWORD),
            })
            .collect()
    });

    RegistrationRecord {
        sop_instance_uid: get_string(obj, tags::SOP_INSTANCE_UID),
        source: None,
        registrations,
    }
}

// --- Writing ---

/// Writes the transformed fields of `record` into the dataset it was read
/// from. Sequence items are matched by position.
///
/// `linkage` replaces the ReferencedFrameOfReferenceSequence as is; without
/// it the dataset's own sequence is kept.
pub fn patch_structure_set(
    dataset: &mut InMemDicomObject,
    record: &StructureSetRecord,
    linkage: Option<InMemElement>,
) -> Result<()> {
    dataset.put(uid_element(tags::SERIES_INSTANCE_UID, &record.series_instance_uid));
    dataset.put(uid_element(tags::SOP_INSTANCE_UID, &record.sop_instance_uid));

    if let Some(label) = &record.structure_set_label {
        dataset.put(DataElement::new(
            tags::STRUCTURE_SET_LABEL,
            VR::SH,
            PrimitiveValue::from(label.as_str()),
        ));
    }

    if let Some(items) = get_items(dataset, tags::ROI_CONTOUR_SEQUENCE) {
        let mut items = items.to_vec();
        ensure!(
            items.len() == record.roi_contours.len(),
            "ROIContourSequence has {} items, record has {}",
            items.len(),
            record.roi_contours.len()
        );
        for (roi_index, (item, roi)) in items.iter_mut().zip(&record.roi_contours).enumerate() {
            let Some(contours) = &roi.contours else {
                continue;
            };
            let Some(contour_items) = get_items(item, tags::CONTOUR_SEQUENCE) else {
                continue;
            };
            let mut contour_items = contour_items.to_vec();
            ensure!(
                contour_items.len() == contours.len(),
                "ContourSequence of ROI contour {roi_index} has {} items, record has {}",
                contour_items.len(),
                contours.len()
            );
            for (contour_item, contour) in contour_items.iter_mut().zip(contours) {
                if let Some(data) = contour.contour_data.as_deref().filter(|d| !d.is_empty()) {
                    contour_item.put(DataElement::new(tags::CONTOUR_DATA, VR::DS, ds_values(data)));
                }
            }
            item.put(sequence(tags::CONTOUR_SEQUENCE, contour_items));
        }
        dataset.put(sequence(tags::ROI_CONTOUR_SEQUENCE, items));
    }

    if let Some(items) = get_items(dataset, tags::STRUCTURE_SET_ROI_SEQUENCE) {
        let mut items = items.to_vec();
        for (item, roi) in items.iter_mut().zip(&record.structure_set_rois) {
            let current = get_string(item, tags::ROI_NAME);
            match &roi.roi_name {
                Some(name) if current.as_deref() != Some(name.as_str()) => {
                    item.put(DataElement::new(
                        tags::ROI_NAME,
                        VR::LO,
                        PrimitiveValue::from(name.as_str()),
                    ));
                }
                _ => {}
            }
        }
        dataset.put(sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, items));
    }

    if let Some(linkage) = linkage {
        dataset.put(linkage);
    }

    debug!(sop_instance_uid = %record.sop_instance_uid, "patched RTSTRUCT dataset");
    Ok(())
}

fn uid_element(tag: Tag, uid: &str) -> InMemElement {
    DataElement::new(tag, VR::UI, PrimitiveValue::from(uid))
}

fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
    DataElement::new(tag, VR::SQ, DataSetSequence::new(items, Length::UNDEFINED))
}

/// Decimal strings for a DS element.
pub fn ds_values(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|&v| format_ds(v)).collect())
}

/// Formats a finite value in at most 16 characters, keeping as many
/// significant digits as fit.
pub fn format_ds(value: f64) -> String {
    let plain = format!("{value}");
    if plain.len() <= MAX_DS_LEN {
        return plain;
    }
    for precision in (0..MAX_DS_LEN).rev() {
        let fixed = format!("{value:.precision$}");
        if fixed.len() <= MAX_DS_LEN {
            // fixed notation that drops every significant digit is useless
            if value != 0.0 && fixed.trim_start_matches('-').trim_matches(['0', '.']).is_empty() {
                break;
            }
            return trim_fraction(fixed);
        }
    }
    for precision in (0..MAX_DS_LEN).rev() {
        let exp = format!("{value:.precision$e}");
        if exp.len() <= MAX_DS_LEN {
            return exp;
        }
    }
    format!("{value:e}")
}

fn trim_fraction(s: String) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

// --- Helpers ---

fn get_string(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = obj.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!value.is_empty()).then(|| value.to_string())
}

fn get_i32(obj: &InMemDicomObject, tag: Tag) -> Option<i32> {
    obj.element(tag).ok()?.to_int::<i32>().ok()
}

fn get_f64_vec(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok()?.to_multi_float64().ok()
}

fn get_f64_vec_by_name(obj: &InMemDicomObject, name: &str) -> Option<Vec<f64>> {
    obj.element_by_name(name).ok()?.to_multi_float64().ok()
}

fn get_items(obj: &InMemDicomObject, tag: Tag) -> Option<&[InMemDicomObject]> {
    obj.element(tag).ok()?.items()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::matrix::{resolve, ExtractionStrategy, MatrixOrigin, TransformMatrix};
    use crate::processing::structure::transform_structure_set;

    fn seq(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
        sequence(tag, items)
    }

    fn uid(tag: Tag, value: &str) -> InMemElement {
        uid_element(tag, value)
    }

    const PRIVATE_CREATOR: Tag = Tag(0x3007, 0x0010);
    const PRIVATE_NOTE: Tag = Tag(0x3007, 0x1001);

    /// ReferencedFrameOfReferenceSequence carrying elements the record types
    /// leave out: a private block on the frame item and ReferencedFrameNumber
    /// on the image item.
    fn linkage(frame_uid: &str, image_uid: &str) -> InMemElement {
        let image = InMemDicomObject::from_element_iter([
            uid(tags::REFERENCED_SOP_CLASS_UID, "1.2.840.10008.5.1.4.1.1.2"),
            uid(tags::REFERENCED_SOP_INSTANCE_UID, image_uid),
            DataElement::new(tags::REFERENCED_FRAME_NUMBER, VR::IS, PrimitiveValue::from("1")),
        ]);
        let series = InMemDicomObject::from_element_iter([
            uid(tags::SERIES_INSTANCE_UID, "1.2.3.6"),
            seq(tags::CONTOUR_IMAGE_SEQUENCE, vec![image]),
        ]);
        let study = InMemDicomObject::from_element_iter([
            uid(tags::REFERENCED_SOP_CLASS_UID, "1.2.840.10008.3.1.2.3.1"),
            uid(tags::REFERENCED_SOP_INSTANCE_UID, "1.2.3.1"),
            seq(tags::RT_REFERENCED_SERIES_SEQUENCE, vec![series]),
        ]);
        let frame = InMemDicomObject::from_element_iter([
            uid(tags::FRAME_OF_REFERENCE_UID, frame_uid),
            DataElement::new(PRIVATE_CREATOR, VR::LO, PrimitiveValue::from("RTSTRUCTREG TEST")),
            DataElement::new(PRIVATE_NOTE, VR::LO, PrimitiveValue::from(frame_uid)),
            seq(tags::RT_REFERENCED_STUDY_SEQUENCE, vec![study]),
        ]);
        seq(tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE, vec![frame])
    }

    /// (frame private note, ReferencedFrameNumber) of the first linkage item.
    fn unmodelled_linkage_fields(dataset: &InMemDicomObject) -> (Option<String>, Option<i32>) {
        let frame = &get_items(dataset, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE).unwrap()[0];
        let study = &get_items(frame, tags::RT_REFERENCED_STUDY_SEQUENCE).unwrap()[0];
        let series = &get_items(study, tags::RT_REFERENCED_SERIES_SEQUENCE).unwrap()[0];
        let image = &get_items(series, tags::CONTOUR_IMAGE_SEQUENCE).unwrap()[0];
        (
            get_string(frame, PRIVATE_NOTE),
            get_i32(image, tags::REFERENCED_FRAME_NUMBER),
        )
    }

    fn rtstruct_dataset() -> InMemDicomObject {
        let contour = |data: &[f64]| {
            InMemDicomObject::from_element_iter([
                DataElement::new(
                    tags::CONTOUR_GEOMETRIC_TYPE,
                    VR::CS,
                    PrimitiveValue::from("CLOSED_PLANAR"),
                ),
                DataElement::new(tags::CONTOUR_DATA, VR::DS, ds_values(data)),
            ])
        };
        InMemDicomObject::from_element_iter([
            uid(tags::SOP_CLASS_UID, "1.2.840.10008.5.1.4.1.1.481.3"),
            uid(tags::SOP_INSTANCE_UID, "1.2.3.3"),
            uid(tags::STUDY_INSTANCE_UID, "1.2.3.1"),
            uid(tags::SERIES_INSTANCE_UID, "1.2.3.2"),
            DataElement::new(tags::STRUCTURE_SET_LABEL, VR::SH, PrimitiveValue::from("CBCT")),
            linkage("1.2.3.4", "1.2.3.5"),
            seq(
                tags::STRUCTURE_SET_ROI_SEQUENCE,
                vec![
                    InMemDicomObject::from_element_iter([
                        DataElement::new(tags::ROI_NUMBER, VR::IS, PrimitiveValue::from("1")),
                        DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from("Bladder_CBCT")),
                    ]),
                    InMemDicomObject::from_element_iter([DataElement::new(
                        tags::ROI_NUMBER,
                        VR::IS,
                        PrimitiveValue::from("2"),
                    )]),
                ],
            ),
            seq(
                tags::ROI_CONTOUR_SEQUENCE,
                vec![
                    InMemDicomObject::from_element_iter([
                        DataElement::new(tags::REFERENCED_ROI_NUMBER, VR::IS, PrimitiveValue::from("1")),
                        seq(
                            tags::CONTOUR_SEQUENCE,
                            vec![
                                contour(&[1.5, 2.0, -3.0, 4.0, 5.0, -3.0]),
                                contour(&[0.0, 0.0, 0.0]),
                            ],
                        ),
                    ]),
                    InMemDicomObject::from_element_iter([DataElement::new(
                        tags::REFERENCED_ROI_NUMBER,
                        VR::IS,
                        PrimitiveValue::from("2"),
                    )]),
                ],
            ),
        ])
    }

    #[test]
    fn test_format_ds_fits_sixteen_characters() {
        assert_eq!(format_ds(12.5), "12.5");
        assert_eq!(format_ds(-3.0), "-3");
        assert_eq!(format_ds(0.0), "0");
        for v in [
            1.0 / 3.0,
            -123.456789012345678,
            98765.4321098765,
            1.0e-12,
            -7.5e22,
            3.0e200,
        ] {
            let s = format_ds(v);
            assert!(s.len() <= MAX_DS_LEN, "{v} -> {s}");
            let parsed: f64 = s.parse().unwrap();
            assert!((parsed - v).abs() <= v.abs() * 1e-9, "{v} -> {s}");
        }
    }

    #[test]
    fn test_read_structure_set_from_dataset() {
        let record = structure_set_from_object(&rtstruct_dataset()).unwrap();
        assert_eq!(record.study_instance_uid, "1.2.3.1");
        assert_eq!(record.series_instance_uid, "1.2.3.2");
        assert_eq!(record.structure_set_label.as_deref(), Some("CBCT"));
        assert_eq!(record.roi_contours.len(), 2);
        assert!(record.roi_contours[1].contours.is_none());
        let contours = record.roi_contours[0].contours.as_ref().unwrap();
        assert_eq!(
            contours[0].contour_data.as_deref(),
            Some(&[1.5, 2.0, -3.0, 4.0, 5.0, -3.0][..])
        );
        assert_eq!(record.structure_set_rois[0].roi_name.as_deref(), Some("Bladder_CBCT"));
        assert_eq!(record.structure_set_rois[1].roi_name, None);
        let frames = record.referenced_frames_of_reference.unwrap();
        assert_eq!(frames[0].frame_of_reference_uid.as_deref(), Some("1.2.3.4"));
        let image = &frames[0].referenced_studies[0].referenced_series[0].contour_images[0];
        assert_eq!(image.referenced_sop_instance_uid.as_deref(), Some("1.2.3.5"));
    }

    #[test]
    fn test_missing_uids_are_rejected() {
        let mut dataset = rtstruct_dataset();
        dataset.remove_element(tags::STUDY_INSTANCE_UID);
        assert!(structure_set_from_object(&dataset).is_err());
    }

    #[test]
    fn test_patch_writes_back_transformed_fields() {
        let mut dataset = rtstruct_dataset();
        let mut record = structure_set_from_object(&dataset).unwrap();
        record.series_instance_uid = "2.25.11".to_string();
        record.sop_instance_uid = "2.25.12".to_string();
        record.structure_set_label = Some("240115_REGdiv".to_string());
        record.structure_set_rois[0].roi_name = Some("Bladder_240115".to_string());
        record.roi_contours[0].contours.as_mut().unwrap()[1].contour_data =
            Some(vec![10.0, 20.0, 30.0]);

        patch_structure_set(&mut dataset, &record, None).unwrap();
        let reread = structure_set_from_object(&dataset).unwrap();
        assert_eq!(reread, record);
    }

    #[test]
    fn test_patch_without_reference_keeps_unmodelled_linkage() {
        let mut dataset = rtstruct_dataset();
        let mut record = structure_set_from_object(&dataset).unwrap();
        record.sop_instance_uid = "2.25.12".to_string();
        // the typed view is not written back on its own
        record.referenced_frames_of_reference = Some(Vec::new());

        patch_structure_set(&mut dataset, &record, None).unwrap();
        assert_eq!(
            unmodelled_linkage_fields(&dataset),
            (Some("1.2.3.4".to_string()), Some(1))
        );
        let frames = structure_set_from_object(&dataset)
            .unwrap()
            .referenced_frames_of_reference
            .unwrap();
        assert_eq!(frames[0].frame_of_reference_uid.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_patch_with_reference_copies_raw_linkage() {
        let mut dataset = rtstruct_dataset();
        let record = structure_set_from_object(&dataset).unwrap();

        patch_structure_set(&mut dataset, &record, Some(linkage("9.9.9", "9.9.6"))).unwrap();
        assert_eq!(
            unmodelled_linkage_fields(&dataset),
            (Some("9.9.9".to_string()), Some(1))
        );
        let frames = structure_set_from_object(&dataset)
            .unwrap()
            .referenced_frames_of_reference
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_of_reference_uid.as_deref(), Some("9.9.9"));
    }

    #[test]
    fn test_save_copies_linkage_from_reference_file() {
        let dir = tempfile::tempdir().unwrap();
        let write = |dataset: InMemDicomObject, name: &str| {
            let path = dir.path().join(name);
            dataset
                .with_meta(FileMetaTableBuilder::new().transfer_syntax("1.2.840.10008.1.2.1"))
                .unwrap()
                .write_to_file(&path)
                .unwrap();
            path
        };
        let source = write(rtstruct_dataset(), "cbct.dcm");
        let mut plan = rtstruct_dataset();
        plan.put(uid(tags::SOP_INSTANCE_UID, "1.2.3.30"));
        plan.put(linkage("9.9.9", "9.9.6"));
        let plan = write(plan, "plan.dcm");

        let store = DicomStore;
        let reference = store.load_reference(&plan).unwrap();
        let (record, report) = transform_structure_set(
            store.load_structure_set(&source).unwrap(),
            &TransformMatrix::identity(),
            Some(Ok(reference)),
            None,
        )
        .unwrap();
        assert!(report.reference_applied);

        let out = dir.path().join("out/transformed_20240115_a.dcm");
        store.save_structure_set(&source, &record, &out).unwrap();
        let written = open_file(&out).unwrap();
        assert_eq!(
            unmodelled_linkage_fields(&written),
            (Some("9.9.9".to_string()), Some(1))
        );
        assert_eq!(
            written.meta().media_storage_sop_instance_uid(),
            record.sop_instance_uid
        );
    }

    #[test]
    fn test_patch_rejects_mismatched_sequences() {
        let mut dataset = rtstruct_dataset();
        let mut record = structure_set_from_object(&dataset).unwrap();
        record.roi_contours.pop();
        assert!(patch_structure_set(&mut dataset, &record, None).is_err());

        let mut record = structure_set_from_object(&dataset).unwrap();
        record.roi_contours[0].contours.as_mut().unwrap().push(ContourItem::default());
        assert!(patch_structure_set(&mut dataset, &record, None).is_err());
    }

    #[test]
    fn test_registration_nested_matrix_is_read() {
        let matrix: Vec<f64> = vec![
            1.0, 0.0, 0.0, 5.0, //
            0.0, 1.0, 0.0, -2.5, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let matrix_item = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX,
                VR::DS,
                ds_values(&matrix),
            ),
            DataElement::new(
                tags::FRAME_OF_REFERENCE_TRANSFORMATION_MATRIX_TYPE,
                VR::CS,
                PrimitiveValue::from("RIGID"),
            ),
        ]);
        let dataset = InMemDicomObject::from_element_iter([
            uid(tags::SOP_INSTANCE_UID, "1.2.3.9"),
            seq(
                tags::REGISTRATION_SEQUENCE,
                vec![InMemDicomObject::from_element_iter([
                    uid(tags::FRAME_OF_REFERENCE_UID, "1.2.3.4"),
                    seq(
                        tags::MATRIX_REGISTRATION_SEQUENCE,
                        vec![InMemDicomObject::from_element_iter([seq(
                            tags::MATRIX_SEQUENCE,
                            vec![matrix_item],
                        )])],
                    ),
                ])],
            ),
        ]);

        let record = registration_from_object(&dataset);
        assert_eq!(record.label(), "1.2.3.9");
        let res = resolve(&record);
        assert_eq!(
            res.origin,
            MatrixOrigin::Extracted {
                strategy: ExtractionStrategy::NestedMatrixSequence,
                entry_index: 0
            }
        );
        assert_eq!(res.matrix.0[(1, 3)], -2.5);
    }

    #[test]
    fn test_registration_without_sequence_resolves_to_identity() {
        let dataset = InMemDicomObject::from_element_iter([uid(tags::SOP_INSTANCE_UID, "1.2.3.9")]);
        let record = registration_from_object(&dataset);
        assert!(record.registrations.is_none());
        assert!(resolve(&record).is_fallback());
    }
}
