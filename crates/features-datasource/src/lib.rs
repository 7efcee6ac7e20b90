//! Query planning, pagination and row mapping for OGC API Features.
//!
//! Features are served from GeoPackages or PostGIS. Each backend implements
//! [`Datasource`]; the [`FeaturesService`] picks the datasource matching the
//! requested coordinate systems.

pub mod common;
pub mod config;
pub mod criteria;
pub mod datasource;
pub mod geopackage;
pub mod mapper;
pub mod postgres;
pub mod proj;
pub mod service;
pub mod sql;
pub mod sqllog;
pub mod stmt_cache;
pub mod value;

pub use common::FeatureTable;
pub use config::{CollectionConfig, DatasourceConfig, FeaturesConfig, GeoPackageConfig, PostgresConfig};
pub use criteria::{FeatureId, FeaturesCriteria, PropertyFilterWithAllowedValues, PropertyFiltersWithAllowedValues, TemporalCriteria};
pub use datasource::{new_datasource, Datasource, DatasourceOptions};
pub use geopackage::GeoPackage;
pub use postgres::Postgres;
pub use proj::{AxisOrderCache, AxisOrderLookup, ProjInfo};
pub use service::{FeaturesRequest, FeaturesService};
pub use sqllog::SqlLog;
pub use stmt_cache::PreparedStatementCache;
