// Pipelines built from other stage combinations:
//   custom polygon layers, grids, admin regions, in-memory and stacked loaders, schemas from YAML, previews

use std::path::PathBuf;

use polars::prelude::*;
use serde_json::json;
use urban_mapper::{
    Config, PipelineError, PreviewFormat, StageFamily, Step, UrbanMapper, UrbanPipeline,
    loader::{DataFrameLoader, MultiLoader},
    urban_layer::Mapping,
    visualiser::Style,
};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn trips() -> DataFrame {
    df!(
        "pickup_lon" => [-73.989, -73.987, -73.983, -73.981, -73.9865],
        "pickup_lat" => [40.691, 40.698, 40.692, 40.699, 40.695],
        "fare" => [12.0, 8.0, 30.0, 10.0, 20.0],
    ).unwrap()
}

#[test]
fn median_fare_per_zone_renders_interactive_map() {
    let mapper = UrbanMapper::new();
    let zones = mapper.urban_layer()
        .with_type("custom_urban_layer")
        .from_file(fixture("zones.geojson"))
        .with_mapping(Mapping::new("pickup_lon", "pickup_lat", "zone"))
        .build()
        .unwrap();
    let loader = mapper.loader()
        .from_dataframe(trips())
        .with_columns("pickup_lon", "pickup_lat")
        .build()
        .unwrap();
    let median = mapper.enricher()
        .with_data("zone", Some("fare"))
        .aggregate_by("median", None)
        .build()
        .unwrap();
    let trips_per_zone = mapper.enricher()
        .with_data("zone", None)
        .count_by(Some("trip_count"))
        .build()
        .unwrap();
    let visualiser = mapper.visualiser()
        .with_type("Interactive")
        .with_style([("height", json!(400))])
        .build()
        .unwrap();

    let mut pipeline = UrbanPipeline::new(vec![
        Step::new("zones", zones),
        Step::new("trips", loader),
        Step::new("median_fare", median),
        Step::new("trip_count", trips_per_zone),
        Step::new("map", visualiser),
    ]).unwrap();

    let (_, layer) = pipeline.compose_transform().unwrap();
    let medians = layer.get_layer().unwrap().attributes().column("median_fare").unwrap().clone();
    // west: 12, 8, 20; east: 30, 10
    let medians: Vec<f64> = medians.f64().unwrap().into_no_null_iter().collect();
    assert_eq!(medians, vec![12.0, 20.0]);

    let counts = layer.get_layer().unwrap().attributes().column("trip_count").unwrap().clone();
    assert_eq!(counts.u32().unwrap().into_no_null_iter().collect::<Vec<_>>(), vec![3, 2]);

    let html = pipeline.visualise(&["median_fare", "trip_count"], &Style::new()).unwrap();
    assert_eq!(html.extension(), "html");
    assert!(html.as_str().contains("leaflet"));
    assert!(html.as_str().contains("median_fare"));

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("fares.html");
    html.save(&out).unwrap();
    assert!(std::fs::read_to_string(&out).unwrap().contains("<html"));
}

#[test]
fn grid_counts_stacked_sources() {
    let taxis = df!("lon" => [0.1, 0.6, 0.7], "lat" => [0.1, 0.2, 0.9]).unwrap();
    let bikes = df!("x" => [0.2, 1.5], "y" => [0.8, 0.5]).unwrap();
    let loader = MultiLoader::new()
        .with_source("taxi", Box::new(DataFrameLoader::new(taxis, "lon", "lat"))).unwrap()
        .with_source("bike", Box::new(DataFrameLoader::new(bikes, "x", "y"))).unwrap();

    let grid = UrbanMapper::new().urban_layer()
        .with_type("region_grid")
        .with_cell_size(0.5)
        .from_bbox((0.0, 0.0, 1.0, 1.0))
        .with_mapping(Mapping::new("lon", "lat", "cell"))
        .build()
        .unwrap();
    let count = UrbanMapper::new().enricher()
        .with_data("cell", None)
        .count_by(None)
        .build()
        .unwrap();

    let mut pipeline = UrbanPipeline::new(vec![
        Step::new("grid", grid),
        Step::new("sources", loader),
        Step::new("count", count),
    ]).unwrap();
    let (data, layer) = pipeline.compose_transform().unwrap();

    assert_eq!(data.height(), 5);
    let cells: Vec<Option<u32>> = data.frame().column("cell").unwrap().u32().unwrap().into_iter().collect();
    // the bike at x=1.5 lies outside the grid
    assert_eq!(cells, vec![Some(0), Some(1), Some(3), Some(2), None]);

    let counts = layer.get_layer().unwrap().attributes().column("counted_value").unwrap().clone();
    let counts: Vec<u32> = counts.u32().unwrap().into_no_null_iter().collect();
    assert_eq!(counts, vec![1, 1, 1, 1]);
}

/// Two adjacent boroughs as `boundary=administrative` relations at admin_level 6.
fn boroughs() -> serde_json::Value {
    let mut elements = Vec::new();
    for (id, x0, x1) in [(1i64, -73.990, -73.985), (2, -73.985, -73.980)] {
        let corners = [(x0, 40.68), (x1, 40.68), (x1, 40.70), (x0, 40.70)];
        for (n, (lon, lat)) in corners.into_iter().enumerate() {
            elements.push(json!({ "type": "node", "id": id * 10 + n as i64, "lon": lon, "lat": lat }));
        }
        let ring: Vec<i64> = (0..4).chain([0]).map(|n| id * 10 + n).collect();
        elements.push(json!({ "type": "way", "id": id * 100, "nodes": ring }));
        elements.push(json!({
            "type": "relation",
            "id": id,
            "members": [{ "type": "way", "ref": id * 100, "role": "outer" }],
            "tags": { "type": "boundary", "boundary": "administrative", "admin_level": "6" },
        }));
    }
    json!({ "elements": elements })
}

#[test]
fn trips_are_counted_per_region() {
    let mapper = UrbanMapper::new();
    let regions = mapper.urban_layer()
        .with_type("region_neighborhoods")
        .from_overpass(boroughs())
        .with_mapping(Mapping::new("pickup_lon", "pickup_lat", "region"))
        .build()
        .unwrap();
    let loader = mapper.loader()
        .from_dataframe(trips())
        .with_columns("pickup_lon", "pickup_lat")
        .build()
        .unwrap();
    let count = mapper.enricher()
        .with_data("region", None)
        .count_by(Some("trips"))
        .build()
        .unwrap();

    let mut pipeline = UrbanPipeline::new(vec![
        Step::new("trips", loader),
        Step::new("count", count),
        Step::new("regions", regions),
    ]).unwrap();
    let (_, layer) = pipeline.compose_transform().unwrap();

    let counts = layer.get_layer().unwrap().attributes().column("trips").unwrap().clone();
    assert_eq!(pipeline["regions"].type_name(), "region_neighborhoods");
    // three pickups west of -73.985, two east of it
    assert_eq!(counts.u32().unwrap().into_no_null_iter().collect::<Vec<_>>(), vec![3, 2]);
}

#[test]
fn schema_from_yaml_limits_families() {
    let yaml = r"
pipeline:
  schema:
    - family: urban_layer
      min: 1
      max: 1
    - family: loader
      min: 1
      max: 1
    - family: enricher
      min: 1
";
    let mapper = UrbanMapper::with_config(Config::from_yaml_str(yaml).unwrap());
    let schema = mapper.schema().unwrap();
    assert!(schema.bounds(StageFamily::Visualiser).is_none());

    let layer = || mapper.urban_layer()
        .with_type("region_grid")
        .from_bbox((0.0, 0.0, 1.0, 1.0))
        .with_default_mapping("lon", "lat")
        .build()
        .unwrap();
    let loader = || Step::new("loader", DataFrameLoader::new(df!("lon" => [0.5], "lat" => [0.5]).unwrap(), "lon", "lat"));

    let err = UrbanPipeline::with_schema(
        vec![
            Step::new("layer", layer()),
            loader(),
            Step::new("map", mapper.visualiser().with_type("Static").build().unwrap()),
        ],
        schema.clone(),
    ).unwrap_err();
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Validation(problems)) => {
            assert!(problems.iter().any(|p| p.contains("`map` is a visualiser stage")));
            assert!(problems.iter().any(|p| p.contains("enricher step(s), found 0")));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let count = mapper.enricher().with_data("nearest_element", None).count_by(None).build().unwrap();
    let pipeline = UrbanPipeline::with_schema(
        vec![Step::new("layer", layer()), loader(), Step::new("count", count)],
        schema,
    ).unwrap();
    assert_eq!(pipeline.schema().entries().len(), 3);
}

#[test]
fn previews_describe_every_step() {
    let mapper = UrbanMapper::new();
    let layer = mapper.urban_layer()
        .with_type("streets_intersections")
        .from_file(fixture("streets.json"))
        .with_default_mapping("longitude", "latitude")
        .build()
        .unwrap();
    let loader = mapper.loader()
        .from_file(fixture("collisions.csv"))
        .with_columns("longitude", "latitude")
        .build()
        .unwrap();
    let count = mapper.enricher()
        .with_data("nearest_element", None)
        .count_by(Some("collisions"))
        .build()
        .unwrap();
    let pipeline = UrbanPipeline::new(vec![
        Step::new("junctions", layer),
        Step::new("loader", loader),
        Step::new("count", count),
    ]).unwrap();

    let ascii = pipeline.preview(PreviewFormat::Ascii).unwrap().to_string();
    assert!(ascii.starts_with("Urban Pipeline Preview:\nStep 1: junctions\n"));
    assert!(ascii.contains("Step 2: loader\n    Loader: CSVLoader"));
    assert!(ascii.contains("Step 3: count\n    Enricher Workflow:"));

    let json = pipeline.preview(PreviewFormat::Json).unwrap().into_json();
    let steps = json["pipeline"]["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[2]["preview"]["workflow"]["action"]["type"], "count");

    let names: Vec<&str> = pipeline.named_steps().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, pipeline.get_step_names());
    assert_eq!(pipeline.get_step("junctions").unwrap().type_name(), "streets_intersections");
}

#[test]
fn factory_preview_reports_missing_pieces() {
    let factory = UrbanMapper::new().enricher().with_data("nearest_element", Some("injured"));
    let preview = factory.preview(PreviewFormat::Ascii).to_string();
    assert!(preview.contains("Incomplete"));

    let factory = factory.aggregate_by("mean", None);
    let json = factory.preview(PreviewFormat::Json).into_json();
    assert_eq!(json["workflow"]["enricher"]["type"], "SingleAggregatorEnricher");
    assert_eq!(json["workflow"]["action"]["enricher_config"]["output_column"], "mean_injured");

    let err = UrbanMapper::new().enricher()
        .with_data("nearest_element", Some("injured"))
        .aggregate_by("average", None)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("Available: mean, sum, median, min, max"));
}
