//! Single-region property export from the unified layer.

use std::io::{self, Write};

use thiserror::Error;

use crate::columns;
use crate::io::export::write_region_row;
use crate::io::geojson::{Feature, FeatureCollection};

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("no region named \"{name}\" in the unified layer")]
    UnknownRegion { name: String },

    #[error("cannot write region row: {0}")]
    Write(#[from] io::Error),
}

/// Looks a region up by its `admin2` name and writes its properties as one
/// delimited-text row.
#[derive(Debug, Clone, Copy)]
pub struct RegionRowExporter<'a> {
    layer: &'a FeatureCollection,
}

impl<'a> RegionRowExporter<'a> {
    pub fn new(layer: &'a FeatureCollection) -> Self {
        Self { layer }
    }

    /// First feature whose `admin2` equals `name`.
    pub fn find(&self, name: &str) -> Option<&'a Feature> {
        self.layer
            .features
            .iter()
            .find(|f| f.property_text(columns::ADMIN2).as_deref() == Some(name))
    }

    /// # Errors
    ///
    /// Returns `RegionError::UnknownRegion` if no feature matches and
    /// `RegionError::Write` if writing fails.
    pub fn export(&self, name: &str, writer: impl Write) -> Result<(), RegionError> {
        let feature = self.find(name).ok_or_else(|| RegionError::UnknownRegion {
            name: name.to_string(),
        })?;
        write_region_row(feature, writer)?;
        Ok(())
    }
}
