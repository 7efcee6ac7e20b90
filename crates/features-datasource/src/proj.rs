//! Axis order of coordinate reference systems.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use features_common::{AxisOrder, FeaturesError, FeaturesResult, Srid, UNDEFINED_SRID, WGS84_SRID};

/// Resolves the axis order of an SRID.
#[async_trait]
pub trait AxisOrderLookup: Send + Sync {
    async fn lookup(&self, srid: Srid) -> FeaturesResult<AxisOrder>;
}

/// Reads the axis order from the PROJ database using the `projinfo` tool.
#[derive(Debug, Clone)]
pub struct ProjInfo {
    program: String,
}

impl Default for ProjInfo {
    fn default() -> Self {
        Self {
            program: "projinfo".to_string(),
        }
    }
}

#[async_trait]
impl AxisOrderLookup for ProjInfo {
    async fn lookup(&self, srid: Srid) -> FeaturesResult<AxisOrder> {
        let output = Command::new(&self.program)
            .arg(format!("EPSG:{}", srid))
            .args(["-o", "projjson", "--single-line", "-q"])
            .output()
            .await
            .map_err(|e| FeaturesError::ProjectionError(format!("failed to run {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(FeaturesError::ProjectionError(format!(
                "{} failed for EPSG:{}: {}",
                self.program,
                srid,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let projjson: JsonValue = serde_json::from_slice(&output.stdout)
            .map_err(|e| FeaturesError::ProjectionError(format!("invalid projjson for EPSG:{}: {}", srid, e)))?;
        Ok(axis_order_from_projjson(&projjson))
    }
}

/// North first means latitude (or northing) first.
pub fn axis_order_from_projjson(projjson: &JsonValue) -> AxisOrder {
    let direction = projjson
        .pointer("/coordinate_system/axis/0/direction")
        .or_else(|| projjson.pointer("/components/0/coordinate_system/axis/0/direction"))
        .and_then(JsonValue::as_str);
    match direction {
        Some(d) if d.eq_ignore_ascii_case("north") => AxisOrder::YX,
        Some(_) => AxisOrder::XY,
        None => {
            warn!("no axis direction in projjson, assuming x/y axis order");
            AxisOrder::XY
        }
    }
}

/// Caches resolved axis orders per SRID.
pub struct AxisOrderCache {
    lookup: Box<dyn AxisOrderLookup>,
    cache: RwLock<HashMap<Srid, AxisOrder>>,
}

impl AxisOrderCache {
    pub fn new(lookup: Box<dyn AxisOrderLookup>) -> Self {
        Self {
            lookup,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Axis order of the SRID. CRS84 and unknown SRIDs are always x/y.
    pub async fn axis_order(&self, srid: Srid) -> FeaturesResult<AxisOrder> {
        if srid == WGS84_SRID || srid == UNDEFINED_SRID || srid.0 < 0 {
            return Ok(AxisOrder::XY);
        }
        if let Some(order) = self.cache.read().await.get(&srid) {
            return Ok(*order);
        }
        let order = self.lookup.lookup(srid).await?;
        debug!(%srid, ?order, "resolved axis order");
        self.cache.write().await.insert(srid, order);
        Ok(order)
    }
}

impl Default for AxisOrderCache {
    fn default() -> Self {
        Self::new(Box::new(ProjInfo::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingLookup {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AxisOrderLookup for CountingLookup {
        async fn lookup(&self, srid: Srid) -> FeaturesResult<AxisOrder> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if srid == Srid(4326) { AxisOrder::YX } else { AxisOrder::XY })
        }
    }

    #[tokio::test]
    async fn test_axis_order_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = AxisOrderCache::new(Box::new(CountingLookup { calls: calls.clone() }));

        assert_eq!(cache.axis_order(Srid(4326)).await.unwrap(), AxisOrder::YX);
        assert_eq!(cache.axis_order(Srid(4326)).await.unwrap(), AxisOrder::YX);
        assert_eq!(cache.axis_order(Srid(28992)).await.unwrap(), AxisOrder::XY);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_crs84_skips_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = AxisOrderCache::new(Box::new(CountingLookup { calls: calls.clone() }));
        assert_eq!(cache.axis_order(WGS84_SRID).await.unwrap(), AxisOrder::XY);
        assert_eq!(cache.axis_order(UNDEFINED_SRID).await.unwrap(), AxisOrder::XY);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_axis_order_from_projjson() {
        let wgs84: JsonValue = serde_json::from_str(
            r#"{"type":"GeographicCRS","coordinate_system":{"subtype":"ellipsoidal","axis":[
                {"name":"Geodetic latitude","abbreviation":"Lat","direction":"north","unit":"degree"},
                {"name":"Geodetic longitude","abbreviation":"Lon","direction":"east","unit":"degree"}]}}"#,
        )
        .unwrap();
        assert_eq!(axis_order_from_projjson(&wgs84), AxisOrder::YX);

        let rd: JsonValue = serde_json::from_str(
            r#"{"type":"ProjectedCRS","coordinate_system":{"subtype":"Cartesian","axis":[
                {"name":"Easting","abbreviation":"X","direction":"east","unit":"metre"},
                {"name":"Northing","abbreviation":"Y","direction":"north","unit":"metre"}]}}"#,
        )
        .unwrap();
        assert_eq!(axis_order_from_projjson(&rd), AxisOrder::XY);

        assert_eq!(axis_order_from_projjson(&serde_json::json!({})), AxisOrder::XY);
    }
}
