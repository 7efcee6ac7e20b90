//! Spatial reference identifiers and axis order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FeaturesError, FeaturesResult};

/// SRID used when a request doesn't specify a coordinate system.
pub const UNDEFINED_SRID: Srid = Srid(0);

/// CRS84 (WGS84 in lon/lat order) as registered in GeoPackages.
///
/// Used instead of EPSG:4326 which is lat/lon ordered.
pub const WGS84_SRID: Srid = Srid(100000);

/// WGS84 as known to PostGIS.
pub const WGS84_SRID_POSTGIS: Srid = Srid(4326);

pub const CRS_URI_PREFIX: &str = "http://www.opengis.net/def/crs/";
pub const WGS84_CRS_URI: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";
pub const EPSG_PREFIX: &str = "EPSG:";

/// Spatial Reference System Identifier, e.g. 28992 in
/// `http://www.opengis.net/def/crs/EPSG/0/28992`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Srid(pub i32);

impl Srid {
    /// The SRID itself, or WGS84 when undefined.
    pub fn get_or_default(self) -> Srid {
        if self.0 <= 0 {
            WGS84_SRID
        } else {
            self
        }
    }

    pub fn is_undefined(self) -> bool {
        self.0 <= 0
    }

    /// Parse an SRS string such as "EPSG:28992".
    pub fn from_epsg(srs: &str) -> FeaturesResult<Srid> {
        let code = srs.strip_prefix(EPSG_PREFIX).ok_or_else(|| {
            FeaturesError::ConfigError(format!(
                "expected SRS to start with '{}', got {}",
                EPSG_PREFIX, srs
            ))
        })?;
        code.parse::<i32>().map(Srid).map_err(|_| {
            FeaturesError::ConfigError(format!(
                "expected EPSG code to have numeric value, got {}",
                code
            ))
        })
    }

    /// Parse a CRS URI as used in the `crs` and `bbox-crs` query params.
    pub fn from_crs_uri(uri: &str) -> FeaturesResult<Srid> {
        if uri.is_empty() {
            return Ok(UNDEFINED_SRID);
        }
        if uri == WGS84_CRS_URI {
            return Ok(WGS84_SRID);
        }
        let invalid = || FeaturesError::InvalidParameter {
            param: "crs".to_string(),
            message: format!("unsupported CRS URI: {}", uri),
        };
        let code = uri
            .strip_prefix(CRS_URI_PREFIX)
            .and_then(|rest| rest.strip_prefix("EPSG/0/"))
            .ok_or_else(invalid)?;
        code.parse::<i32>().map(Srid).map_err(|_| invalid())
    }

    /// CRS URI for this SRID.
    pub fn to_crs_uri(self) -> String {
        let srid = self.get_or_default();
        if srid == WGS84_SRID {
            WGS84_CRS_URI.to_string()
        } else {
            format!("{}EPSG/0/{}", CRS_URI_PREFIX, srid.0)
        }
    }
}

impl fmt::Display for Srid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis order for coordinate interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisOrder {
    /// X (longitude/easting), Y (latitude/northing)
    #[default]
    XY,
    /// Y (latitude/northing), X (longitude/easting)
    YX,
}
