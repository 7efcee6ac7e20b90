//! Entry point for the HTTP layer: routes requests to the datasource of the
//! right coordinate system and turns request params into criteria.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use features_common::{
    filters_checksum, AxisOrder, BoundingBox, Cursors, EncodedCursor, Feature, FeatureCollection, FeaturesError,
    FeaturesResult, Profile, ProfileName, Schema, Srid, UNDEFINED_SRID, WGS84_SRID,
};

use crate::config::{CollectionConfig, DatasourceConfig, FeaturesConfig, LimitConfig};
use crate::criteria::{FeatureId, FeaturesCriteria, PropertyFiltersWithAllowedValues, TemporalCriteria};
use crate::datasource::{new_datasource, Datasource, DatasourceOptions};
use crate::proj::AxisOrderCache;
use crate::sqllog::SqlLog;

/// Longest accepted property filter value, in characters.
pub const PROPERTY_FILTER_MAX_LENGTH: usize = 512;

/// Property filters are equality matches only.
const PROPERTY_FILTER_WILDCARD: char = '*';

/// A datasource serves a collection in one coordinate system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasourceKey {
    pub srid: Srid,
    pub collection_id: String,
}

impl DatasourceKey {
    pub fn new(srid: Srid, collection_id: impl Into<String>) -> Self {
        Self {
            srid: srid.get_or_default(),
            collection_id: collection_id.into(),
        }
    }
}

/// Parsed query params of a features request.
#[derive(Debug, Clone, Default)]
pub struct FeaturesRequest {
    pub cursor: EncodedCursor,
    pub limit: Option<i64>,
    /// `crs` param, SRID of the output.
    pub crs: Srid,
    /// `bbox-crs` param, SRID of the bbox.
    pub bbox_crs: Srid,
    pub bbox: Option<BoundingBox>,
    pub datetime: Option<DateTime<Utc>>,
    pub property_filters: BTreeMap<String, String>,
    pub filter: Option<String>,
    pub profile: ProfileName,
}

impl FeaturesRequest {
    /// Params with a filtering effect, as used for the cursor checksum.
    fn checksum_params(&self, limit: i64) -> Vec<(String, String)> {
        let mut params = vec![("limit".to_string(), limit.to_string())];
        if let Some(bbox) = &self.bbox {
            params.push(("bbox".to_string(), bbox.to_param()));
            if !self.bbox_crs.is_undefined() {
                params.push(("bbox-crs".to_string(), self.bbox_crs.to_crs_uri()));
            }
        }
        if !self.crs.is_undefined() {
            params.push(("crs".to_string(), self.crs.to_crs_uri()));
        }
        if let Some(datetime) = &self.datetime {
            params.push(("datetime".to_string(), datetime.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(filter) = &self.filter {
            params.push(("filter".to_string(), filter.clone()));
        }
        for (name, value) in &self.property_filters {
            params.push((name.clone(), value.clone()));
        }
        params
    }
}

/// Whether one datasource can answer the request by itself.
///
/// Without a bbox, or with the bbox in the output coordinate system, the
/// features can be selected and returned in one query.
pub fn query_single_datasource(input: Srid, output: Srid, bbox: Option<&BoundingBox>) -> bool {
    bbox.is_none()
        || input == output
        || (input == UNDEFINED_SRID && output == WGS84_SRID)
        || (input == WGS84_SRID && output == UNDEFINED_SRID)
}

pub struct FeaturesService {
    base_url: String,
    limit: LimitConfig,
    collections: HashMap<String, CollectionConfig>,
    datasources: HashMap<DatasourceKey, Arc<dyn Datasource>>,
    /// Every distinct datasource once, for shutdown.
    created: Vec<Arc<dyn Datasource>>,
    axis_orders: AxisOrderCache,
}

impl FeaturesService {
    /// Create all configured datasources. Datasources with identical config
    /// are shared between collections and coordinate systems.
    pub async fn new(config: &FeaturesConfig, axis_orders: AxisOrderCache) -> FeaturesResult<Self> {
        config.validate()?;
        let options = DatasourceOptions {
            max_decimals: config.max_decimals,
            force_utc: config.force_utc,
            sql_log: SqlLog::from_env()?,
        };

        let mut configured: Vec<(Srid, &DatasourceConfig)> = vec![(WGS84_SRID, &config.datasources.default_wgs84)];
        for additional in &config.datasources.additional {
            configured.push((additional.srid()?.get_or_default(), &additional.datasource));
        }

        let mut created: Vec<(&DatasourceConfig, Arc<dyn Datasource>)> = Vec::new();
        let mut datasources = HashMap::new();
        for (srid, ds_config) in configured {
            let datasource = match created.iter().find(|(c, _)| *c == ds_config) {
                Some((_, existing)) => existing.clone(),
                None => {
                    let datasource = new_datasource(ds_config, &config.collections, &options).await?;
                    created.push((ds_config, datasource.clone()));
                    datasource
                }
            };
            for collection in &config.collections {
                datasources
                    .entry(DatasourceKey::new(srid, collection.id.as_str()))
                    .or_insert_with(|| datasource.clone());
            }
        }
        Ok(Self::from_datasources(config, datasources, axis_orders))
    }

    /// Service over already created datasources.
    pub fn from_datasources(
        config: &FeaturesConfig,
        datasources: HashMap<DatasourceKey, Arc<dyn Datasource>>,
        axis_orders: AxisOrderCache,
    ) -> Self {
        let mut created: Vec<Arc<dyn Datasource>> = Vec::new();
        for datasource in datasources.values() {
            if !created.iter().any(|c| Arc::ptr_eq(c, datasource)) {
                created.push(datasource.clone());
            }
        }
        info!(
            datasources = created.len(),
            collections = config.collections.len(),
            "created datasources"
        );

        Self {
            base_url: config.base_url.clone(),
            limit: config.limit.clone(),
            collections: config.collections.iter().map(|c| (c.id.clone(), c.clone())).collect(),
            datasources,
            created,
            axis_orders,
        }
    }

    /// A page of features of the collection.
    pub async fn get_features(
        &self,
        collection_id: &str,
        request: &FeaturesRequest,
    ) -> FeaturesResult<(FeatureCollection, Cursors)> {
        let collection = self.collection(collection_id)?;
        let mut criteria = self.criteria(collection, request)?;
        if let Some(bbox) = criteria.bbox {
            if self.axis_orders.axis_order(criteria.input_srid).await? == AxisOrder::YX {
                criteria.bbox = Some(bbox.swap_axes());
            }
        }
        let axis_order = self.axis_orders.axis_order(criteria.output_srid).await?;

        let output = self.datasource(criteria.output_srid, collection_id)?;
        let single_pass = query_single_datasource(request.bbox_crs, request.crs, request.bbox.as_ref())
            || output.supports_on_the_fly_transformation();

        if single_pass {
            let profile = self.profile(request.profile, output.as_ref(), collection_id)?;
            return output.get_features(collection_id, &criteria, axis_order, &profile).await;
        }

        // select ids in the coordinate system of the bbox, then fetch the
        // features in the output coordinate system
        debug!(collection = collection_id, input = %criteria.input_srid, output = %criteria.output_srid, "two-pass query");
        let input = self.datasource(criteria.input_srid, collection_id)?;
        let (ids, cursors) = input.get_feature_ids(collection_id, &criteria).await?;
        if ids.is_empty() {
            return Ok((FeatureCollection::default(), cursors));
        }
        let profile = self.profile(request.profile, output.as_ref(), collection_id)?;
        let fc = output
            .get_features_by_id(collection_id, &ids, criteria.output_srid, axis_order, &profile)
            .await?;
        Ok((fc, cursors))
    }

    /// A single feature, `None` when it doesn't exist.
    pub async fn get_feature(
        &self,
        collection_id: &str,
        feature_id: &str,
        crs: Srid,
        profile: ProfileName,
    ) -> FeaturesResult<Option<Feature>> {
        self.collection(collection_id)?;
        let feature_id: FeatureId = feature_id.parse()?;
        let output_srid = crs.get_or_default();
        let axis_order = self.axis_orders.axis_order(output_srid).await?;

        let datasource = self.datasource(output_srid, collection_id)?;
        let profile = self.profile(profile, datasource.as_ref(), collection_id)?;
        datasource
            .get_feature(collection_id, feature_id, output_srid, axis_order, &profile)
            .await
    }

    pub fn get_schema(&self, collection_id: &str) -> FeaturesResult<Arc<Schema>> {
        self.datasource(WGS84_SRID, collection_id)?.get_schema(collection_id)
    }

    pub fn get_property_filters(&self, collection_id: &str) -> FeaturesResult<PropertyFiltersWithAllowedValues> {
        self.datasource(WGS84_SRID, collection_id)?
            .get_property_filters_with_allowed_values(collection_id)
    }

    /// Coordinate systems with a datasource for the collection.
    pub fn supported_srids(&self, collection_id: &str) -> Vec<Srid> {
        let mut srids: Vec<Srid> = self
            .datasources
            .keys()
            .filter(|k| k.collection_id == collection_id)
            .map(|k| k.srid)
            .collect();
        srids.sort();
        srids
    }

    pub async fn close(&self) {
        futures::future::join_all(self.created.iter().map(|datasource| datasource.close())).await;
        info!(datasources = self.created.len(), "closed datasources");
    }

    fn collection(&self, collection_id: &str) -> FeaturesResult<&CollectionConfig> {
        self.collections.get(collection_id).ok_or_else(|| {
            let mut available: Vec<String> = self.collections.keys().cloned().collect();
            available.sort();
            FeaturesError::CollectionNotFound {
                collection: collection_id.to_string(),
                available,
            }
        })
    }

    /// Datasource for the SRID, or the default one when it can transform on the fly.
    fn datasource(&self, srid: Srid, collection_id: &str) -> FeaturesResult<&Arc<dyn Datasource>> {
        if let Some(datasource) = self.datasources.get(&DatasourceKey::new(srid, collection_id)) {
            return Ok(datasource);
        }
        match self.datasources.get(&DatasourceKey::new(WGS84_SRID, collection_id)) {
            Some(default) if default.supports_on_the_fly_transformation() => Ok(default),
            _ => Err(FeaturesError::InvalidParameter {
                param: "crs".to_string(),
                message: format!("SRID {} is not supported for collection {}", srid, collection_id),
            }),
        }
    }

    fn profile(&self, name: ProfileName, datasource: &dyn Datasource, collection_id: &str) -> FeaturesResult<Profile> {
        Ok(Profile::new(name, self.base_url.clone(), datasource.get_schema(collection_id)?))
    }

    fn criteria(&self, collection: &CollectionConfig, request: &FeaturesRequest) -> FeaturesResult<FeaturesCriteria> {
        let limit = request.limit.unwrap_or(self.limit.default).min(self.limit.max);
        self.validate_property_filters(collection, &request.property_filters)?;

        let temporal_criteria = match (&collection.temporal_properties, request.datetime) {
            (Some(temporal), datetime) => Some(TemporalCriteria {
                reference_date: datetime.unwrap_or_else(Utc::now),
                start_date_property: temporal.start_date.clone(),
                end_date_property: temporal.end_date.clone(),
            }),
            (None, Some(_)) => {
                return Err(FeaturesError::InvalidParameter {
                    param: "datetime".to_string(),
                    message: format!("collection {} has no temporal properties", collection.id),
                })
            }
            (None, None) => None,
        };

        let checksum_params = request.checksum_params(limit);
        let checksum = filters_checksum(checksum_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let criteria = FeaturesCriteria {
            cursor: request.cursor.decode(&checksum),
            limit,
            input_srid: request.bbox_crs.get_or_default(),
            output_srid: request.crs.get_or_default(),
            bbox: request.bbox,
            temporal_criteria,
            property_filters: request.property_filters.clone(),
            filter: request.filter.clone(),
        };
        criteria.validate()?;
        Ok(criteria)
    }

    fn validate_property_filters(
        &self,
        collection: &CollectionConfig,
        property_filters: &BTreeMap<String, String>,
    ) -> FeaturesResult<()> {
        let allowed = self.get_property_filters(&collection.id)?;
        for (name, value) in property_filters {
            let Some(filter) = allowed.get(name) else {
                return Err(FeaturesError::InvalidParameter {
                    param: name.clone(),
                    message: format!("property filter '{}' is not configured for collection {}", name, collection.id),
                });
            };
            if value.chars().count() > PROPERTY_FILTER_MAX_LENGTH {
                return Err(FeaturesError::InvalidParameter {
                    param: name.clone(),
                    message: format!(
                        "property filter {} is too large, value is limited to {} characters",
                        name, PROPERTY_FILTER_MAX_LENGTH
                    ),
                });
            }
            if value.contains(PROPERTY_FILTER_WILDCARD) {
                return Err(FeaturesError::InvalidParameter {
                    param: name.clone(),
                    message: format!(
                        "property filter {} contains a wildcard ({}), wildcard filtering is not allowed",
                        name, PROPERTY_FILTER_WILDCARD
                    ),
                });
            }
            if let Some(values) = &filter.allowed_values {
                if !values.contains(value) {
                    return Err(FeaturesError::InvalidParameter {
                        param: name.clone(),
                        message: format!("allowed values are: {}", values.join(", ")),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use features_common::PrevNextFid;

    use crate::common::FeatureTable;
    use crate::config::PropertyFilter;
    use crate::criteria::PropertyFilterWithAllowedValues;
    use crate::proj::AxisOrderLookup;

    const RD: Srid = Srid(28992);

    struct FixedAxisOrder;

    #[async_trait]
    impl AxisOrderLookup for FixedAxisOrder {
        async fn lookup(&self, _srid: Srid) -> FeaturesResult<AxisOrder> {
            Ok(AxisOrder::XY)
        }
    }

    #[derive(Default)]
    struct MockDatasource {
        on_the_fly: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockDatasource {
        fn new(on_the_fly: bool) -> Arc<Self> {
            Arc::new(Self {
                on_the_fly,
                ..Default::default()
            })
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn feature(id: impl ToString) -> Feature {
        Feature {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[async_trait]
    impl Datasource for MockDatasource {
        async fn get_feature_ids(&self, _collection: &str, criteria: &FeaturesCriteria) -> FeaturesResult<(Vec<i64>, Cursors)> {
            self.record("get_feature_ids");
            let cursors = Cursors::new(PrevNextFid { prev: 0, next: 3 }, &criteria.cursor.filters_checksum);
            Ok((vec![1, 2], cursors))
        }

        async fn get_features_by_id(
            &self,
            _collection: &str,
            feature_ids: &[i64],
            _output_srid: Srid,
            _axis_order: AxisOrder,
            _profile: &Profile,
        ) -> FeaturesResult<FeatureCollection> {
            self.record("get_features_by_id");
            Ok(FeatureCollection::new(feature_ids.iter().map(feature).collect()))
        }

        async fn get_features(
            &self,
            _collection: &str,
            _criteria: &FeaturesCriteria,
            _axis_order: AxisOrder,
            _profile: &Profile,
        ) -> FeaturesResult<(FeatureCollection, Cursors)> {
            self.record("get_features");
            Ok((FeatureCollection::new(vec![feature(7)]), Cursors::default()))
        }

        async fn get_feature(
            &self,
            _collection: &str,
            feature_id: FeatureId,
            _output_srid: Srid,
            _axis_order: AxisOrder,
            _profile: &Profile,
        ) -> FeaturesResult<Option<Feature>> {
            self.record("get_feature");
            Ok(Some(feature(feature_id)))
        }

        fn get_feature_table_metadata(&self, _collection: &str) -> FeaturesResult<Arc<FeatureTable>> {
            Ok(Arc::new(FeatureTable::default()))
        }

        fn get_property_filters_with_allowed_values(&self, _collection: &str) -> FeaturesResult<PropertyFiltersWithAllowedValues> {
            let filter = PropertyFilter {
                name: "city".to_string(),
                description: None,
                index_required: true,
                allowed_values: None,
                derive_allowed_values_from_datasource: false,
            };
            Ok(BTreeMap::from([(
                "city".to_string(),
                PropertyFilterWithAllowedValues {
                    filter,
                    allowed_values: Some(vec!["Delft".to_string()]),
                },
            )]))
        }

        fn supports_on_the_fly_transformation(&self) -> bool {
            self.on_the_fly
        }

        async fn close(&self) {
            self.record("close");
        }
    }

    fn config() -> FeaturesConfig {
        FeaturesConfig::from_yaml(
            "collections:\n  - id: addresses\ndatasources:\n  defaultWGS84:\n    geopackage:\n      file: addresses.gpkg\n",
        )
        .unwrap()
    }

    fn service(datasources: Vec<(Srid, Arc<MockDatasource>)>) -> FeaturesService {
        let datasources = datasources
            .into_iter()
            .map(|(srid, ds)| (DatasourceKey::new(srid, "addresses"), ds as Arc<dyn Datasource>))
            .collect();
        FeaturesService::from_datasources(&config(), datasources, AxisOrderCache::new(Box::new(FixedAxisOrder)))
    }

    fn bbox_request(bbox_crs: Srid, crs: Srid) -> FeaturesRequest {
        FeaturesRequest {
            bbox: Some(BoundingBox::new(80000.0, 450000.0, 90000.0, 460000.0)),
            bbox_crs,
            crs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_two_pass_across_coordinate_systems() {
        let wgs84 = MockDatasource::new(false);
        let rd = MockDatasource::new(false);
        let service = service(vec![(WGS84_SRID, wgs84.clone()), (RD, rd.clone())]);

        let (fc, cursors) = service.get_features("addresses", &bbox_request(RD, WGS84_SRID)).await.unwrap();

        assert_eq!(rd.calls(), vec!["get_feature_ids"]);
        assert_eq!(wgs84.calls(), vec!["get_features_by_id"]);
        let ids: Vec<&str> = fc.features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(cursors.has_next);
        assert!(!cursors.has_prev);
    }

    #[tokio::test]
    async fn test_single_pass_in_same_coordinate_system() {
        let wgs84 = MockDatasource::new(false);
        let rd = MockDatasource::new(false);
        let service = service(vec![(WGS84_SRID, wgs84.clone()), (RD, rd.clone())]);

        let (fc, _) = service.get_features("addresses", &bbox_request(RD, RD)).await.unwrap();

        assert_eq!(rd.calls(), vec!["get_features"]);
        assert!(wgs84.calls().is_empty());
        assert_eq!(fc.number_returned, 1);
    }

    #[tokio::test]
    async fn test_single_pass_when_transforming_on_the_fly() {
        let default = MockDatasource::new(true);
        let service = service(vec![(WGS84_SRID, default.clone())]);

        service.get_features("addresses", &bbox_request(RD, WGS84_SRID)).await.unwrap();
        service.get_features("addresses", &bbox_request(WGS84_SRID, RD)).await.unwrap();

        assert_eq!(default.calls(), vec!["get_features", "get_features"]);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_crs() {
        let service = service(vec![(WGS84_SRID, MockDatasource::new(false))]);
        let request = FeaturesRequest {
            crs: RD,
            ..Default::default()
        };
        let result = service.get_features("addresses", &request).await;
        assert!(matches!(result, Err(FeaturesError::InvalidParameter { param, .. }) if param == "crs"));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let service = service(vec![(WGS84_SRID, MockDatasource::new(false))]);
        let result = service.get_features("buildings", &FeaturesRequest::default()).await;
        match result {
            Err(FeaturesError::CollectionNotFound { collection, available }) => {
                assert_eq!(collection, "buildings");
                assert_eq!(available, vec!["addresses".to_string()]);
            }
            other => panic!("expected CollectionNotFound, got {:?}", other.map(|(fc, _)| fc.number_returned)),
        }
    }

    #[tokio::test]
    async fn test_validates_property_filters() {
        let service = service(vec![(WGS84_SRID, MockDatasource::new(false))]);

        let allowed = FeaturesRequest {
            property_filters: BTreeMap::from([("city".to_string(), "Delft".to_string())]),
            ..Default::default()
        };
        assert!(service.get_features("addresses", &allowed).await.is_ok());

        let not_allowed = FeaturesRequest {
            property_filters: BTreeMap::from([("city".to_string(), "Utrecht".to_string())]),
            ..Default::default()
        };
        let result = service.get_features("addresses", &not_allowed).await;
        assert!(matches!(result, Err(FeaturesError::InvalidParameter { param, .. }) if param == "city"));

        let unknown = FeaturesRequest {
            property_filters: BTreeMap::from([("street".to_string(), "Markt".to_string())]),
            ..Default::default()
        };
        assert!(service.get_features("addresses", &unknown).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_wildcard_and_oversized_property_filters() {
        let service = service(vec![(WGS84_SRID, MockDatasource::new(false))]);

        let wildcard = FeaturesRequest {
            property_filters: BTreeMap::from([("city".to_string(), "Del*".to_string())]),
            ..Default::default()
        };
        match service.get_features("addresses", &wildcard).await {
            Err(FeaturesError::InvalidParameter { param, message }) => {
                assert_eq!(param, "city");
                assert!(message.contains("wildcard"), "{}", message);
            }
            other => panic!("expected invalid parameter, got {:?}", other.map(|_| ())),
        }

        let oversized = FeaturesRequest {
            property_filters: BTreeMap::from([("city".to_string(), "D".repeat(PROPERTY_FILTER_MAX_LENGTH + 1))]),
            ..Default::default()
        };
        match service.get_features("addresses", &oversized).await {
            Err(FeaturesError::InvalidParameter { message, .. }) => {
                assert!(message.contains("limited to 512 characters"), "{}", message);
            }
            other => panic!("expected invalid parameter, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_rejects_datetime_without_temporal_properties() {
        let service = service(vec![(WGS84_SRID, MockDatasource::new(false))]);
        let request = FeaturesRequest {
            datetime: Some(Utc::now()),
            ..Default::default()
        };
        let result = service.get_features("addresses", &request).await;
        assert!(matches!(result, Err(FeaturesError::InvalidParameter { param, .. }) if param == "datetime"));
    }

    #[tokio::test]
    async fn test_get_feature_parses_id() {
        let default = MockDatasource::new(false);
        let service = service(vec![(WGS84_SRID, default.clone())]);

        let feature = service
            .get_feature("addresses", "42", Srid::default(), ProfileName::default())
            .await
            .unwrap();
        assert_eq!(feature.map(|f| f.id), Some("42".to_string()));
        assert!(service
            .get_feature("addresses", "not-an-id", Srid::default(), ProfileName::default())
            .await
            .is_err());
        assert_eq!(default.calls(), vec!["get_feature"]);
    }

    #[tokio::test]
    async fn test_close_shared_datasource_once() {
        let shared = MockDatasource::new(false);
        let service = service(vec![(WGS84_SRID, shared.clone()), (RD, shared.clone())]);

        assert_eq!(service.supported_srids("addresses"), vec![RD, WGS84_SRID]);
        service.close().await;
        assert_eq!(shared.calls(), vec!["close"]);
    }

    #[test]
    fn test_query_single_datasource() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let rd = Srid(28992);

        assert!(query_single_datasource(rd, WGS84_SRID, None));
        assert!(query_single_datasource(rd, rd, Some(&bbox)));
        assert!(query_single_datasource(UNDEFINED_SRID, WGS84_SRID, Some(&bbox)));
        assert!(query_single_datasource(WGS84_SRID, UNDEFINED_SRID, Some(&bbox)));
        assert!(!query_single_datasource(rd, WGS84_SRID, Some(&bbox)));
        assert!(!query_single_datasource(UNDEFINED_SRID, rd, Some(&bbox)));
    }

    #[test]
    fn test_datasource_key_defaults_srid() {
        assert_eq!(DatasourceKey::new(UNDEFINED_SRID, "a"), DatasourceKey::new(WGS84_SRID, "a"));
    }

    #[test]
    fn test_checksum_params_exclude_cursor() {
        let request = FeaturesRequest {
            cursor: EncodedCursor::new("abc.def"),
            bbox: Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
            property_filters: BTreeMap::from([("city".to_string(), "Delft".to_string())]),
            ..Default::default()
        };
        let params = request.checksum_params(10);
        assert!(params.contains(&("limit".to_string(), "10".to_string())));
        assert!(params.contains(&("bbox".to_string(), "1,2,3,4".to_string())));
        assert!(params.contains(&("city".to_string(), "Delft".to_string())));
        assert!(!params.iter().any(|(k, _)| k == "cursor" || k == "bbox-crs" || k == "crs"));
    }
}
