use std::fmt;

use nalgebra::{Matrix4, Vector3, Vector4};
use tracing::{debug, warn};

use crate::io::records::{RegistrationItem, RegistrationRecord};

/// 4x4 homogeneous transform, rotation/scale in the upper 3x3 block and
/// translation in the last column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMatrix(pub Matrix4<f64>);

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransformMatrix {
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// Reshapes exactly 16 values given in row-major order.
    pub fn from_row_major(values: &[f64]) -> Option<Self> {
        if values.len() != 16 {
            return None;
        }
        Some(Self(Matrix4::from_row_slice(values)))
    }

    /// Identity with the first three values placed in the translation column.
    pub fn from_translation(vector: &[f64]) -> Option<Self> {
        if vector.len() < 3 {
            return None;
        }
        let translation = Vector3::new(vector[0], vector[1], vector[2]);
        Some(Self(Matrix4::new_translation(&translation)))
    }

    pub fn as_matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    /// Elements in row-major order.
    pub fn row_major(&self) -> [f64; 16] {
        let mut values = [0.0; 16];
        for (i, row) in self.0.row_iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                values[i * 4 + j] = *v;
            }
        }
        values
    }

    /// At least one element is neither exactly 0.0 nor exactly 1.0.
    ///
    /// A coarse filter that tells a supplied transform apart from an all-0/1
    /// placeholder. A genuine identity matrix is *not* non-trivial.
    pub fn is_non_trivial(&self) -> bool {
        self.0.iter().any(|&v| v != 0.0 && v != 1.0)
    }

    pub fn is_identity(&self) -> bool {
        self.0 == Matrix4::identity()
    }

    pub fn try_inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    /// Maps one point through the matrix in homogeneous coordinates.
    ///
    /// When the resulting weight is exactly zero the first three components
    /// are returned without the perspective divide.
    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let p = self.0 * Vector4::new(point[0], point[1], point[2], 1.0);
        let w = p[3];
        if w != 0.0 {
            [p[0] / w, p[1] / w, p[2] / w]
        } else {
            [p[0], p[1], p[2]]
        }
    }

    /// Homogeneous weight the matrix assigns to `point`.
    pub fn weight(&self, point: [f64; 3]) -> f64 {
        let row = self.0.row(3);
        row[0] * point[0] + row[1] * point[1] + row[2] * point[2] + row[3]
    }
}

impl fmt::Display for TransformMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.0.row_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "[{:>12.6} {:>12.6} {:>12.6} {:>12.6}]",
                row[0], row[1], row[2], row[3]
            )?;
        }
        Ok(())
    }
}

/// The ways a registration item may carry its transform, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// MatrixRegistrationSequence[0] -> MatrixSequence[0] -> FrameOfReferenceTransformationMatrix
    NestedMatrixSequence,
    /// 16 values stored directly on the registration item.
    DirectTransformationArray,
    /// 3 values, translation only.
    TranslationVector,
}

impl ExtractionStrategy {
    pub fn extract(self, item: &RegistrationItem) -> Option<TransformMatrix> {
        match self {
            ExtractionStrategy::NestedMatrixSequence => {
                let matrix = item
                    .matrix_registrations
                    .as_ref()?
                    .first()?
                    .matrices
                    .as_ref()?
                    .first()?;
                TransformMatrix::from_row_major(matrix.transformation_matrix.as_deref()?)
            }
            ExtractionStrategy::DirectTransformationArray => {
                TransformMatrix::from_row_major(item.transformation_matrix.as_deref()?)
            }
            ExtractionStrategy::TranslationVector => {
                TransformMatrix::from_translation(item.vector.as_deref()?)
            }
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionStrategy::NestedMatrixSequence => "nested matrix sequence",
            ExtractionStrategy::DirectTransformationArray => "direct transformation array",
            ExtractionStrategy::TranslationVector => "translation vector",
        };
        f.write_str(name)
    }
}

/// Passes over the registration sequence. Every entry is tried against the
/// first pass before the second pass starts; within a pass the strategies
/// are tried in order on each entry.
const RESOLUTION_PASSES: &[&[ExtractionStrategy]] = &[
    &[ExtractionStrategy::NestedMatrixSequence],
    &[
        ExtractionStrategy::DirectTransformationArray,
        ExtractionStrategy::TranslationVector,
    ],
];

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixOrigin {
    Extracted {
        strategy: ExtractionStrategy,
        entry_index: usize,
    },
    IdentityFallback,
}

/// Result of resolving a registration record.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixResolution {
    pub matrix: TransformMatrix,
    pub origin: MatrixOrigin,
    /// Set only for the identity fallback.
    pub warning: Option<String>,
}

impl MatrixResolution {
    pub fn is_fallback(&self) -> bool {
        self.origin == MatrixOrigin::IdentityFallback
    }
}

/// Finds the transform stored in a registration record.
///
/// Never fails: when no entry yields a well-shaped matrix the identity is
/// returned and a single warning naming the record is logged and attached to
/// the resolution.
pub fn resolve(record: &RegistrationRecord) -> MatrixResolution {
    let entries = record.registrations.as_deref().unwrap_or_default();

    for pass in RESOLUTION_PASSES {
        for (entry_index, entry) in entries.iter().enumerate() {
            for &strategy in pass.iter() {
                if let Some(matrix) = strategy.extract(entry) {
                    debug!(
                        registration = %record.label(),
                        entry_index,
                        %strategy,
                        "extracted registration matrix"
                    );
                    if !matrix.is_non_trivial() {
                        debug!(
                            registration = %record.label(),
                            "registration matrix holds only 0/1 values"
                        );
                    }
                    return MatrixResolution {
                        matrix,
                        origin: MatrixOrigin::Extracted {
                            strategy,
                            entry_index,
                        },
                        warning: None,
                    };
                }
            }
        }
    }

    let message = format!(
        "no valid 4x4 matrix found in registration {}; using identity",
        record.label()
    );
    warn!("{message}");
    MatrixResolution {
        matrix: TransformMatrix::identity(),
        origin: MatrixOrigin::IdentityFallback,
        warning: Some(message),
    }
}
