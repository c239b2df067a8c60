use thiserror::Error;

/// Fatal errors for a single structure-set transformation.
#[derive(Debug, Error)]
pub enum TransformError {
    /// ContourData whose length is not a multiple of three.
    #[error(
        "malformed ContourData in ROI contour {roi_index}, contour {contour_index}: \
         {len} values is not a multiple of 3"
    )]
    MalformedContourData {
        roi_index: usize,
        contour_index: usize,
        len: usize,
    },

    /// Transformed coordinate that is NaN or infinite.
    #[error(
        "non-finite coordinate after transform in ROI contour {roi_index}, contour {contour_index}, point {point_index}"
    )]
    NonFiniteCoordinate {
        roi_index: usize,
        contour_index: usize,
        point_index: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid uid_root {root:?}: {reason}")]
    InvalidUidRoot { root: String, reason: &'static str },
}
