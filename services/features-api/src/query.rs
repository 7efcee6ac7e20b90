//! Command line query params, parsed the way the OGC API Features query params are.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use features_common::crs::EPSG_PREFIX;
use features_common::{BoundingBox, EncodedCursor, FeaturesResult, Srid};
use features_datasource::FeaturesRequest;

#[derive(Args, Debug, Clone, Default)]
pub struct FeaturesArgs {
    /// Collection id
    pub collection: String,

    /// Number of features per page
    #[arg(long)]
    pub limit: Option<i64>,

    /// Cursor of the page to retrieve, as returned by a previous query
    #[arg(long, default_value = "")]
    pub cursor: String,

    /// "minx,miny,maxx,maxy" in the coordinates of --bbox-crs
    #[arg(long)]
    pub bbox: Option<String>,

    /// CRS of the bbox, an EPSG code ("EPSG:28992") or CRS URI
    #[arg(long)]
    pub bbox_crs: Option<String>,

    /// CRS of the output geometries
    #[arg(long)]
    pub crs: Option<String>,

    /// Reference date (RFC 3339) for collections with temporal properties
    #[arg(long)]
    pub datetime: Option<String>,

    /// Property filter as name=value, may be repeated
    #[arg(long = "property", value_name = "NAME=VALUE")]
    pub properties: Vec<String>,

    /// CQL filter (rejected)
    #[arg(long)]
    pub filter: Option<String>,

    #[arg(long, default_value = "rel-as-key")]
    pub profile: String,
}

impl FeaturesArgs {
    pub fn to_request(&self) -> Result<FeaturesRequest> {
        let bbox = self
            .bbox
            .as_deref()
            .map(BoundingBox::from_param)
            .transpose()
            .context("Invalid --bbox")?;
        let datetime = self
            .datetime
            .as_deref()
            .map(|d| DateTime::parse_from_rfc3339(d).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .context("Invalid --datetime, expected RFC 3339")?;

        let mut property_filters = BTreeMap::new();
        for property in &self.properties {
            let (name, value) = property
                .split_once('=')
                .ok_or_else(|| anyhow!("Invalid --property '{}', expected NAME=VALUE", property))?;
            property_filters.insert(name.trim().to_string(), value.to_string());
        }

        Ok(FeaturesRequest {
            cursor: EncodedCursor::new(self.cursor.clone()),
            limit: self.limit,
            crs: parse_crs(self.crs.as_deref())?,
            bbox_crs: parse_crs(self.bbox_crs.as_deref())?,
            bbox,
            datetime,
            property_filters,
            filter: self.filter.clone(),
            profile: self.profile.parse()?,
        })
    }
}

/// Accepts "EPSG:<code>" as well as CRS URIs. Nothing means undefined.
pub fn parse_crs(crs: Option<&str>) -> FeaturesResult<Srid> {
    match crs {
        None => Ok(Srid::default()),
        Some(crs) if crs.starts_with(EPSG_PREFIX) => Srid::from_epsg(crs),
        Some(uri) => Srid::from_crs_uri(uri),
    }
}
