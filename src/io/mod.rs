//! Artifact readers and writers.

pub mod checkpoint;
pub mod export;
pub mod geojson;
pub mod tables;
