//! Error types shared across pipeline stages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::key::UnitKey;

/// A checkpoint column label that does not decode into a composite key.
#[derive(Debug, Error)]
#[error("cannot deserialize composite key {raw:?}: {reason}")]
pub struct KeyError {
    /// The label exactly as found in the artifact.
    pub raw: String,
    /// Decoder message.
    pub reason: String,
}

/// Failures while reading tabular inputs (appliance counts, templates,
/// household tables, statistics artifacts).
#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot read \"{}\": {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed csv in \"{}\": {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A required column is absent. This is the configuration error of the
    /// pipeline: it is raised before any simulation work starts.
    #[error("missing column(s) in \"{}\": {}", .path.display(), .columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },

    #[error("invalid number {value:?} in column \"{column}\" at row {row} of \"{}\"", .path.display())]
    InvalidNumber {
        path: PathBuf,
        column: String,
        row: usize,
        value: String,
    },

    #[error("appliance \"{name}\" listed twice in template \"{}\"", .path.display())]
    DuplicateAppliance { path: PathBuf, name: String },

    #[error("template \"{}\" lists no appliances", .path.display())]
    EmptyTemplate { path: PathBuf },

    #[error("statistics artifact \"{}\" is malformed at row {row}: {reason}", .path.display())]
    MalformedArtifact {
        path: PathBuf,
        row: usize,
        reason: String,
    },
}

impl TableError {
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Failures while writing or reading profile checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint i/o on \"{}\": {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint \"{}\" is not valid csv: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Serialization error: a column key could not be decoded.
    #[error("checkpoint \"{}\": {source}", .path.display())]
    Key {
        path: PathBuf,
        #[source]
        source: KeyError,
    },

    #[error("checkpoint \"{}\" is malformed at row {row}: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("unit ({key}) appears in more than one checkpoint (again in \"{}\")", .path.display())]
    DuplicateKey { key: UnitKey, path: PathBuf },
}

/// A simulation engine call that failed. Never retried.
#[derive(Debug, Error)]
#[error("simulation engine failed: {message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failures while reading, reprojecting or writing GeoJSON layers.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("cannot access \"{}\": {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("\"{}\" is not a GeoJSON feature collection: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("\"{}\" has type \"{found}\", expected \"FeatureCollection\"", .path.display())]
    NotFeatureCollection { path: PathBuf, found: String },

    #[error("\"{}\" has no geometry member on any feature", .path.display())]
    MissingGeometry { path: PathBuf },

    #[error("\"{}\" declares unsupported CRS \"{crs}\"", .path.display())]
    UnsupportedCrs { path: PathBuf, crs: String },

    #[error("cannot reproject \"{}\" from {crs}: {source}", .path.display())]
    Projection {
        path: PathBuf,
        crs: String,
        #[source]
        source: proj4rs::errors::Error,
    },
}
