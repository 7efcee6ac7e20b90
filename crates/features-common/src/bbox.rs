//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// An axis-aligned extent in the coordinates of the input SRID.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse a `bbox` query parameter: "minx,miny,maxx,maxy".
    pub fn from_param(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let mut values = [0.0_f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(part.to_string()))?;
        }

        let bbox = Self::new(values[0], values[1], values[2], values[3]);
        if bbox.min_x > bbox.max_x || bbox.min_y > bbox.max_y {
            return Err(BboxParseError::Inverted(s.to_string()));
        }
        Ok(bbox)
    }

    /// Same extent with the x and y axes exchanged.
    ///
    /// Used when the bbox was given in a north/east ordered CRS.
    pub fn swap_axes(&self) -> Self {
        Self::new(self.min_y, self.min_x, self.max_y, self.max_x)
    }

    /// Closed polygon ring as WKT, counter-clockwise starting at the lower left corner.
    pub fn to_wkt(&self) -> String {
        format!(
            "POLYGON(({minx} {miny},{maxx} {miny},{maxx} {maxy},{minx} {maxy},{minx} {miny}))",
            minx = self.min_x,
            miny = self.min_y,
            maxx = self.max_x,
            maxy = self.max_y
        )
    }

    /// Canonical representation used as a query param value.
    pub fn to_param(&self) -> String {
        format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid bbox format: {0}. Expected 'minx,miny,maxx,maxy'")]
    InvalidFormat(String),

    #[error("Invalid number in bbox: {0}")]
    InvalidNumber(String),

    #[error("Invalid bbox: {0}. Minimum coordinates must not exceed maximum coordinates")]
    Inverted(String),
}
