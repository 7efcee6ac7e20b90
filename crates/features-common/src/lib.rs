//! Common types shared by the OGC API Features datasources and services.

pub mod bbox;
pub mod crs;
pub mod cursor;
pub mod error;
pub mod feature;
pub mod profile;
pub mod schema;

pub use bbox::BoundingBox;
pub use crs::{AxisOrder, Srid, UNDEFINED_SRID, WGS84_SRID, WGS84_SRID_POSTGIS};
pub use cursor::{filters_checksum, Cursors, DecodedCursor, EncodedCursor, PrevNextFid};
pub use error::{FeaturesError, FeaturesResult};
pub use feature::{Feature, FeatureCollection, FeatureProperties, Link, PropertyValue};
pub use profile::{MappedRelation, Profile, ProfileName};
pub use schema::{FeatureRelation, Field, Schema, TypeFormat};

/// Name of the column holding the previous feature id of a page.
pub const PREV_FID: &str = "prevfid";
/// Name of the column holding the next feature id of a page.
pub const NEXT_FID: &str = "nextfid";

/// Bounding box helper columns, only used for spatial indexing.
pub const MINX_FIELD: &str = "minx";
pub const MINY_FIELD: &str = "miny";
pub const MAXX_FIELD: &str = "maxx";
pub const MAXY_FIELD: &str = "maxy";
