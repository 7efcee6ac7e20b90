//! SQL of the PostgreSQL feature queries.
//!
//! Same pagination shape as the GeoPackage queries. PostGIS picks the GIST
//! index itself, so there is a single bbox plan and no index hints.

use features_common::{AxisOrder, Schema, Srid, NEXT_FID, PREV_FID, WGS84_SRID, WGS84_SRID_POSTGIS};

use crate::common::FeatureTable;
use crate::criteria::FeaturesCriteria;
use crate::sql::{property_filters_to_sql, temporal_criteria_to_sql, NamedParams, SqlParam};

const TEMPORAL_CAST: &str = "::timestamptz";

/// CRS84 isn't known to PostGIS, it uses 4326 with x/y coordinates instead.
pub fn postgis_srid(srid: Srid) -> Srid {
    if srid == WGS84_SRID || srid.is_undefined() {
        WGS84_SRID_POSTGIS
    } else {
        srid
    }
}

/// `"schema"."table"`
pub fn qualified_table_name(schema: &str, table: &FeatureTable) -> String {
    format!("\"{}\".\"{}\"", schema, table.table_name)
}

fn property_filter_cast(schema: &Schema) -> impl Fn(&str) -> String + '_ {
    move |column| {
        let data_type = schema.field(column).map(|f| f.r#type.as_str()).unwrap_or("text");
        format!("::text::{}", data_type)
    }
}

/// Paginated query without spatial filter.
pub fn make_default_query(
    schema: &str,
    table: &FeatureTable,
    fid_column: &str,
    select_clause: &str,
    criteria: &FeaturesCriteria,
) -> (String, NamedParams) {
    let (pf_clause, pf_params) = property_filters_to_sql(&criteria.property_filters, &property_filter_cast(&table.schema));
    let (temporal_clause, temporal_params) = temporal_criteria_to_sql(criteria.temporal_criteria.as_ref(), TEMPORAL_CAST);

    let query = format!(
        r#"
with
    next as (select * from {table} where "{fid}" >= :fid::bigint {temporal} {pf} order by "{fid}" asc limit :limit::bigint + 1),
    prev as (select * from {table} where "{fid}" < :fid::bigint {temporal} {pf} order by "{fid}" desc limit :limit::bigint),
    nextprev as (select * from next union all select * from prev),
    nextprevfeat as (select *, lag("{fid}", :limit::bigint::int) over (order by "{fid}") as {prev_fid}, lead("{fid}", :limit::bigint::int) over (order by "{fid}") as {next_fid} from nextprev)
select {select} from nextprevfeat where "{fid}" >= :fid::bigint {temporal} {pf} limit :limit::bigint
"#,
        table = qualified_table_name(schema, table),
        fid = fid_column,
        temporal = temporal_clause,
        pf = pf_clause,
        select = select_clause,
        prev_fid = PREV_FID,
        next_fid = NEXT_FID,
    );

    let mut params = base_params(criteria);
    params.extend(pf_params);
    params.extend(temporal_params);
    (query, params)
}

/// Paginated query within a bbox, the bbox is transformed to the SRID of the table.
pub fn make_bbox_query(
    schema: &str,
    table: &FeatureTable,
    fid_column: &str,
    select_clause: &str,
    criteria: &FeaturesCriteria,
) -> (String, NamedParams) {
    let (pf_clause, pf_params) = property_filters_to_sql(&criteria.property_filters, &property_filter_cast(&table.schema));
    let (temporal_clause, temporal_params) = temporal_criteria_to_sql(criteria.temporal_criteria.as_ref(), TEMPORAL_CAST);

    let bbox_geom = match table.srs_id {
        Some(srid) if srid > 0 => format!(
            "st_transform(st_geomfromtext(:bboxWkt::text, :bboxSrid::bigint::int), {})",
            srid
        ),
        _ => "st_setsrid(st_geomfromtext(:bboxWkt::text), 0)".to_string(),
    };
    let bbox_clause = format!("and st_intersects(\"{}\", {})", table.geometry_column_name, bbox_geom);

    let query = format!(
        r#"
with
    next as (select * from {table} where "{fid}" >= :fid::bigint {bbox} {temporal} {pf} order by "{fid}" asc limit :limit::bigint + 1),
    prev as (select * from {table} where "{fid}" < :fid::bigint {bbox} {temporal} {pf} order by "{fid}" desc limit :limit::bigint),
    nextprev as (select * from next union all select * from prev),
    nextprevfeat as (select *, lag("{fid}", :limit::bigint::int) over (order by "{fid}") as {prev_fid}, lead("{fid}", :limit::bigint::int) over (order by "{fid}") as {next_fid} from nextprev)
select {select} from nextprevfeat where "{fid}" >= :fid::bigint {temporal} {pf} limit :limit::bigint
"#,
        table = qualified_table_name(schema, table),
        fid = fid_column,
        bbox = bbox_clause,
        temporal = temporal_clause,
        pf = pf_clause,
        select = select_clause,
        prev_fid = PREV_FID,
        next_fid = NEXT_FID,
    );

    let mut params = base_params(criteria);
    if let Some(bbox) = criteria.bbox.as_ref() {
        params.insert("bboxWkt".to_string(), SqlParam::Text(bbox.to_wkt()));
        params.insert(
            "bboxSrid".to_string(),
            SqlParam::Int(i64::from(postgis_srid(criteria.input_srid).0)),
        );
    }
    params.extend(pf_params);
    params.extend(temporal_params);
    (query, params)
}

fn base_params(criteria: &FeaturesCriteria) -> NamedParams {
    let mut params = NamedParams::new();
    params.insert("fid".to_string(), SqlParam::Int(criteria.cursor.fid));
    params.insert("limit".to_string(), SqlParam::Int(criteria.limit));
    params.insert(
        "outputSrid".to_string(),
        SqlParam::Int(i64::from(postgis_srid(criteria.output_srid).0)),
    );
    params
}

/// Select the geometry as WKB in the output SRID (`:outputSrid`).
pub fn select_postgres_geometry(axis_order: AxisOrder, table: &FeatureTable) -> String {
    let geom = &table.geometry_column_name;
    match axis_order {
        AxisOrder::YX => format!(
            ", st_asbinary(st_flipcoordinates(st_transform(\"{0}\", :outputSrid::bigint::int))) as \"{0}\"",
            geom
        ),
        AxisOrder::XY => format!(", st_asbinary(st_transform(\"{0}\", :outputSrid::bigint::int)) as \"{0}\"", geom),
    }
}
