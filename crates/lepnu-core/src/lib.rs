//! # lepnu-core
//!
//! This is an internal crate used by `lepnu`. It holds the event model, the dataset readers, the
//! weighted [`Histogram`] and the single-lepton selection which fills it.
#![warn(clippy::perf, clippy::style)]

use thiserror::Error;

/// Methods for loading and storing [`EventRecord`]-based data.
pub mod data;
/// A fixed-binning weighted histogram and an ordered collection of named histograms.
pub mod histogram;
/// The single-lepton + missing-momentum event selection.
pub mod selection;
/// Utility functions, enums, and four-vectors.
pub mod utils;

pub use crate::data::{
    read_events, read_parquet, read_root, resolve_location, validate_sample_fraction,
    write_parquet, write_root, DatasetDescriptor, DatasetReadOptions, DatasetWriteOptions,
    EventRecord, EventSource, EventTable, FloatPrecision, Lepton, MAX_LEPTONS,
};
pub use crate::histogram::{Histogram, HistogramCollection, NamedHistogram};
pub use crate::selection::{
    event_weight, run_analysis, run_analysis_with_options, select_and_fill, select_event,
    AnalysisOutput, CutFlow, SelectedEvent, Selection, DEFAULT_SAMPLE_FRACTION,
};
#[cfg(feature = "rayon")]
pub use crate::selection::par_select_and_fill;
pub use crate::utils::enums::ParticleType;
pub use crate::utils::vectors::{delta_phi, transverse_mass, Vec3, Vec4};

/// Alias for a [`Result`] carrying a [`LepnuError`].
pub type LepnuResult<T> = Result<T, LepnuError>;

/// The error type used by all `lepnu` internal methods
#[derive(Error, Debug)]
pub enum LepnuError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An error raised while downloading a remote dataset.
    #[cfg(feature = "remote")]
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    /// An error raised while reading or writing a ROOT file.
    #[error("ROOT error: {context}: {message}")]
    RootError {
        /// What was being done when the backend failed
        context: String,
        /// The backend's own message
        message: String,
    },
    /// A required column (or ROOT branch) is absent from the input.
    #[error("Missing column \"{name}\"")]
    MissingColumn {
        /// Name of the column which failed lookup
        name: String,
    },
    /// A column exists but holds an unsupported type.
    #[error("Column \"{name}\" has unsupported type {datatype}")]
    InvalidColumnType {
        /// Name of the offending column
        name: String,
        /// Description of the type that was found
        datatype: String,
    },
    /// Two columns (or a column and the event count) disagree in length.
    #[error("{context}: expected {expected} entries, found {actual}")]
    LengthMismatch {
        /// Which column or row was being checked
        context: String,
        /// Expected length
        expected: usize,
        /// Observed length
        actual: usize,
    },
    /// An event claims more leptons than the fixed per-event capacity (or than its arrays hold).
    #[error("Event {event}: lepton count {count} exceeds capacity {capacity}")]
    LeptonCountOutOfRange {
        /// Row index of the offending event (0 when built by hand)
        event: usize,
        /// The lepton count that was read
        count: usize,
        /// The number of lepton slots actually available
        capacity: usize,
    },
    /// The fraction of events to process is not a finite number in `[0, 1]`.
    #[error("Sample fraction must lie in [0, 1], got {0}")]
    InvalidSampleFraction(f64),
    /// A histogram was requested with no bins or with an empty or non-finite range.
    #[error("Invalid binning: {0}")]
    InvalidBinning(String),
    /// Two histograms with different binning were combined.
    #[error("Cannot merge histograms with different binning ({left} vs {right})")]
    BinningMismatch {
        /// Binning of the receiving histogram
        left: String,
        /// Binning of the histogram being merged in
        right: String,
    },
    /// The file extension does not correspond to a supported dataset format.
    #[error("Unsupported dataset format for \"{location}\" (expected .root or .parquet)")]
    UnsupportedFormat {
        /// The location which could not be dispatched
        location: String,
    },
    /// An analysis configuration could not be parsed or failed validation.
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// The overlay renderer failed.
    #[error("Render error: {0}")]
    RenderError(String),
    /// An error type for [`rayon`] thread pools
    #[cfg(feature = "rayon")]
    #[error("Error building thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

impl LepnuError {
    pub(crate) fn root<E: std::fmt::Display>(context: impl Into<String>, err: E) -> Self {
        LepnuError::RootError {
            context: context.into(),
            message: err.to_string(),
        }
    }
}
