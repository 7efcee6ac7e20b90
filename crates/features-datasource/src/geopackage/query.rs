//! SQL of the GeoPackage feature queries.
//!
//! Only identifiers from the catalog and trusted config are formatted into the
//! SQL text. Everything from a request is passed as a named parameter.

use features_common::{AxisOrder, FeaturesResult, MAXX_FIELD, MAXY_FIELD, MINX_FIELD, MINY_FIELD, NEXT_FID, PREV_FID};

use crate::common::FeatureTable;
use crate::criteria::FeaturesCriteria;
use crate::sql::{property_filters_to_sql, temporal_criteria_to_sql, NamedParams, SqlParam};

/// Paginated query without spatial filter.
pub fn make_default_query(
    table: &FeatureTable,
    fid_column: &str,
    select_clause: &str,
    criteria: &FeaturesCriteria,
) -> (String, NamedParams) {
    let (pf_clause, pf_params) = property_filters_to_sql(&criteria.property_filters, &|_| String::new());
    let (temporal_clause, temporal_params) = temporal_criteria_to_sql(criteria.temporal_criteria.as_ref(), "");

    let query = format!(
        r#"
with
    next as (select * from "{table}" where "{fid}" >= :fid {temporal} {pf} order by "{fid}" asc limit :limit + 1),
    prev as (select * from "{table}" where "{fid}" < :fid {temporal} {pf} order by "{fid}" desc limit :limit),
    nextprev as (select * from next union all select * from prev),
    nextprevfeat as (select *, lag("{fid}", :limit) over (order by "{fid}") as {prev_fid}, lead("{fid}", :limit) over (order by "{fid}") as {next_fid} from nextprev)
select {select} from nextprevfeat where "{fid}" >= :fid {temporal} {pf} limit :limit
"#,
        table = table.table_name,
        fid = fid_column,
        temporal = temporal_clause,
        pf = pf_clause,
        select = select_clause,
        prev_fid = PREV_FID,
        next_fid = NEXT_FID,
    );

    let mut params = NamedParams::new();
    params.insert("fid".to_string(), SqlParam::Int(criteria.cursor.fid));
    params.insert("limit".to_string(), SqlParam::Int(criteria.limit));
    params.extend(pf_params);
    params.extend(temporal_params);
    (query, params)
}

/// Paginated query within a bbox.
///
/// A pre-query counts rtree candidates up to `max_bbox_size_to_use_with_rtree`.
/// Below that the bbox is 'small' and the rtree plan is used, otherwise the
/// 'big' plan using the btree spatial index. Each plan gets a zero limit when
/// not selected, so exactly one contributes rows.
pub fn make_bbox_query(
    table: &FeatureTable,
    fid_column: &str,
    select_clause: &str,
    criteria: &FeaturesCriteria,
    max_bbox_size_to_use_with_rtree: i64,
) -> FeaturesResult<(String, NamedParams)> {
    let (pf_clause, pf_params) = property_filters_to_sql(&criteria.property_filters, &|_| String::new());
    let btree_index_hint = if pf_clause.is_empty() {
        format!("indexed by \"{}_spatial_idx\"", table.table_name)
    } else {
        // let SQLite choose between the btree and the property filter index
        String::new()
    };
    let (temporal_clause, temporal_params) = temporal_criteria_to_sql(criteria.temporal_criteria.as_ref(), "");

    let query = format!(
        r#"
with
     given_bbox as (select geomfromtext(:bboxWkt, :bboxSrid)),
     bbox_size as (select iif(count(id) < {max_rtree}, 'small', 'big') as bbox_size
                     from (select id from "rtree_{table}_{geom}"
                           where minx <= :maxx and maxx >= :minx and miny <= :maxy and maxy >= :miny
                           limit {max_rtree})),
     next_bbox_rtree as (select f.*
                         from "{table}" f inner join "rtree_{table}_{geom}" rf on f."{fid}" = rf.id
                         where rf.minx <= :maxx and rf.maxx >= :minx and rf.miny <= :maxy and rf.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" >= :fid {temporal} {pf}
                         order by f."{fid}" asc
                         limit (select iif(bbox_size == 'small', :limit + 1, 0) from bbox_size)),
     next_bbox_btree as (select f.*
                         from "{table}" f {hint}
                         where f.minx <= :maxx and f.maxx >= :minx and f.miny <= :maxy and f.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" >= :fid {temporal} {pf}
                         order by f."{fid}" asc
                         limit (select iif(bbox_size == 'big', :limit + 1, 0) from bbox_size)),
     next as (select * from next_bbox_rtree union all select * from next_bbox_btree),
     prev_bbox_rtree as (select f.*
                         from "{table}" f inner join "rtree_{table}_{geom}" rf on f."{fid}" = rf.id
                         where rf.minx <= :maxx and rf.maxx >= :minx and rf.miny <= :maxy and rf.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" < :fid {temporal} {pf}
                         order by f."{fid}" desc
                         limit (select iif(bbox_size == 'small', :limit, 0) from bbox_size)),
     prev_bbox_btree as (select f.*
                         from "{table}" f {hint}
                         where f.minx <= :maxx and f.maxx >= :minx and f.miny <= :maxy and f.maxy >= :miny
                           and st_intersects((select * from given_bbox), castautomagic(f."{geom}")) = 1
                           and f."{fid}" < :fid {temporal} {pf}
                         order by f."{fid}" desc
                         limit (select iif(bbox_size == 'big', :limit, 0) from bbox_size)),
     prev as (select * from prev_bbox_rtree union all select * from prev_bbox_btree),
     nextprev as (select * from next union all select * from prev),
     nextprevfeat as (select *, lag("{fid}", :limit) over (order by "{fid}") as {prev_fid}, lead("{fid}", :limit) over (order by "{fid}") as {next_fid} from nextprev)
select {select} from nextprevfeat where "{fid}" >= :fid {temporal} {pf} limit :limit
"#,
        table = table.table_name,
        fid = fid_column,
        max_rtree = max_bbox_size_to_use_with_rtree,
        geom = table.geometry_column_name,
        select = select_clause,
        temporal = temporal_clause,
        pf = pf_clause,
        hint = btree_index_hint,
        prev_fid = PREV_FID,
        next_fid = NEXT_FID,
    );

    let mut params = NamedParams::new();
    if let Some(bbox) = criteria.bbox.as_ref() {
        params.insert("bboxWkt".to_string(), SqlParam::Text(bbox.to_wkt()));
        params.insert(MINX_FIELD.to_string(), SqlParam::Float(bbox.min_x));
        params.insert(MINY_FIELD.to_string(), SqlParam::Float(bbox.min_y));
        params.insert(MAXX_FIELD.to_string(), SqlParam::Float(bbox.max_x));
        params.insert(MAXY_FIELD.to_string(), SqlParam::Float(bbox.max_y));
    }
    params.insert("fid".to_string(), SqlParam::Int(criteria.cursor.fid));
    params.insert("limit".to_string(), SqlParam::Int(criteria.limit));
    params.insert("bboxSrid".to_string(), SqlParam::Int(criteria.input_srid.0 as i64));
    params.extend(pf_params);
    params.extend(temporal_params);
    Ok((query, params))
}

/// Select the geometry, swapping coordinates for y/x axis order.
/// GeoPackage geometries are WKB and WKB is always x/y.
pub fn select_gpkg_geometry(axis_order: AxisOrder, table: &FeatureTable) -> String {
    match axis_order {
        AxisOrder::YX => format!(
            ", asgpb(swapcoords(castautomagic(\"{0}\"))) as \"{0}\"",
            table.geometry_column_name
        ),
        AxisOrder::XY => format!(", \"{}\"", table.geometry_column_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use features_common::{BoundingBox, DecodedCursor, Srid};

    fn table() -> FeatureTable {
        FeatureTable {
            table_name: "addresses".to_string(),
            geometry_column_name: "geom".to_string(),
            geometry_type: "POINT".to_string(),
            ..Default::default()
        }
    }

    fn criteria() -> FeaturesCriteria {
        FeaturesCriteria {
            cursor: DecodedCursor { filters_checksum: vec![], fid: 7 },
            limit: 10,
            input_srid: Srid(28992),
            output_srid: Srid(28992),
            bbox: Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_query_shape() {
        let (sql, params) = make_default_query(&table(), "fid", "\"fid\"", &criteria());
        assert!(sql.contains("next as (select * from \"addresses\" where \"fid\" >= :fid"));
        assert!(sql.contains("limit :limit + 1"));
        assert!(sql.contains("lag(\"fid\", :limit) over (order by \"fid\") as prevfid"));
        assert_eq!(params.get("fid"), Some(&SqlParam::Int(7)));
        assert_eq!(params.get("limit"), Some(&SqlParam::Int(10)));
    }

    #[test]
    fn test_bbox_query_uses_threshold_and_hint() {
        let (sql, params) = make_bbox_query(&table(), "fid", "\"fid\"", &criteria(), 8000).unwrap();
        assert!(sql.contains("iif(count(id) < 8000, 'small', 'big')"));
        assert!(sql.contains("indexed by \"addresses_spatial_idx\""));
        assert!(sql.contains("from \"rtree_addresses_geom\""));
        assert_eq!(params.get("minx"), Some(&SqlParam::Float(1.0)));
        assert_eq!(params.get("maxy"), Some(&SqlParam::Float(4.0)));
        assert_eq!(params.get("bboxSrid"), Some(&SqlParam::Int(28992)));
        assert!(matches!(params.get("bboxWkt"), Some(SqlParam::Text(wkt)) if wkt.starts_with("POLYGON((")));
    }

    #[test]
    fn test_bbox_query_drops_hint_with_property_filter() {
        let mut criteria = criteria();
        criteria.property_filters = BTreeMap::from([("city".to_string(), "Delft".to_string())]);
        let (sql, params) = make_bbox_query(&table(), "fid", "\"fid\"", &criteria, 8000).unwrap();
        assert!(!sql.contains("indexed by"));
        assert!(sql.contains("\"city\" = :pf1"));
        assert!(!sql.contains("Delft"));
        assert_eq!(params.get("pf1"), Some(&SqlParam::Text("Delft".to_string())));
    }

    #[test]
    fn test_select_geometry() {
        assert_eq!(select_gpkg_geometry(AxisOrder::XY, &table()), ", \"geom\"");
        assert_eq!(
            select_gpkg_geometry(AxisOrder::YX, &table()),
            ", asgpb(swapcoords(castautomagic(\"geom\"))) as \"geom\""
        );
    }
}
