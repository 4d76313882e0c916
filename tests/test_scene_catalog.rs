use std::path::Path;

use ndarray::Array2;
use verdant::config::{IndexStackConfig, RoiConfig, Vertex};
use verdant::core::image::Band;
use verdant::core::IndexStack;
use verdant::io::raster::{write_band_file, SampleFormat};
use verdant::io::SceneCatalog;
use verdant::types::{DateRange, Roi, VerdantError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write a 4x4 scene with gzip-compressed u16 bands. Spectral bands carry
/// no data (0) in the north-west pixel; the QA band has no no-data value.
fn write_scene(dir: &Path, id: &str, time_start: &str, cloudy: f64, values: &[(&str, f64)]) {
    let mut band_entries = String::new();
    for &(name, value) in values {
        let mut samples = Array2::from_elem((4, 4), value);
        let nodata = if name == "QA60" {
            String::new()
        } else {
            samples[[0, 0]] = 0.0;
            "<nodata>0</nodata>".to_string()
        };
        let file = format!("{}_{}.bin.gz", id, name);
        write_band_file(dir.join(&file), &Band::from_values(name, samples), SampleFormat::U16, None, true)
            .expect("Failed to write band file");
        band_entries.push_str(&format!(
            "<band><name>{}</name><file>{}</file><format>u16</format>{}</band>",
            name, file, nodata
        ));
    }

    let manifest = format!(
        r#"<scene>
    <id>{id}</id>
    <timeStart>{time_start}</timeStart>
    <cloudyPixelPercentage>{cloudy}</cloudyPixelPercentage>
    <grid>
        <transform>
            <topLeftX>87.6</topLeftX><pixelWidth>0.1</pixelWidth>
            <topLeftY>23.0</topLeftY><pixelHeight>-0.1</pixelHeight>
        </transform>
        <rows>4</rows><cols>4</cols>
    </grid>
    {band_entries}
</scene>"#
    );
    std::fs::write(dir.join(format!("{}.xml", id)), manifest).expect("Failed to write manifest");
}

fn scene_bands(b3: f64, b4: f64, b8: f64, b11: f64) -> Vec<(&'static str, f64)> {
    vec![("B3", b3), ("B4", b4), ("B8", b8), ("B11", b11), ("QA60", 0.0)]
}

fn catalog_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_scene(dir.path(), "S2_20200301", "2020-03-01T04:50:00Z", 12.0, &scene_bands(500.0, 4000.0, 6000.0, 2000.0));
    write_scene(dir.path(), "S2_20220410", "2022-04-10T04:50:00Z", 5.0, &scene_bands(600.0, 3000.0, 7000.0, 2400.0));
    write_scene(dir.path(), "S2_20230512", "2023-05-12T04:50:00Z", 55.0, &scene_bands(900.0, 1000.0, 1000.0, 1000.0));
    dir
}

fn roi() -> RoiConfig {
    RoiConfig {
        vertices: vec![
            Vertex { lon: 87.6, lat: 22.6 },
            Vertex { lon: 88.0, lat: 22.6 },
            Vertex { lon: 88.0, lat: 23.0 },
            Vertex { lon: 87.6, lat: 23.0 },
        ],
    }
}

#[test]
fn test_catalog_loads_scenes() {
    init_logging();
    let dir = catalog_dir();
    let catalog = SceneCatalog::open(dir.path()).expect("Failed to open catalog");
    assert_eq!(catalog.len(), 3);

    let collection = catalog.load().expect("Failed to load scenes");
    assert_eq!(collection.len(), 3);
    assert_eq!(collection.band_names(), &["B3", "B4", "B8", "B11", "QA60"]);

    let first = &collection.images()[0];
    assert_eq!(first.properties().id.as_deref(), Some("S2_20200301"));
    assert_eq!(first.properties().cloudy_pixel_percentage, Some(12.0));
    let b4 = first.band("B4").unwrap();
    assert_eq!(b4.get(0, 0), None); // no-data sample
    assert_eq!(b4.get(2, 3), Some(4000.0));
}

#[test]
fn test_query_reads_only_matching_scenes() {
    init_logging();
    let dir = catalog_dir();
    let catalog = SceneCatalog::open(dir.path()).unwrap();

    let range = DateRange::from_dates("2021-01-01", "2025-12-31").unwrap();
    let roi = Roi::rectangle(87.6, 22.6, 88.0, 23.0).unwrap();
    assert_eq!(catalog.query(&range, &roi).unwrap().len(), 2);

    let elsewhere = Roi::rectangle(10.0, 10.0, 11.0, 11.0).unwrap();
    let empty = catalog.query(&range, &elsewhere).unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.band_names().len(), 5);
}

#[test]
fn test_index_stack_from_catalog() {
    init_logging();
    let dir = catalog_dir();
    let collection = SceneCatalog::open(dir.path()).unwrap().load().unwrap();

    let config = IndexStackConfig { roi: roi(), ..IndexStackConfig::default() };
    let stacked = IndexStack::new(config).expect("Failed to create index stack").run(&collection).expect("Index stack failed");

    assert_eq!(
        stacked.band_names(),
        vec!["B3", "B4", "B8", "B11", "QA60", "NDVI", "MNDWI", "NDBI", "NDSLI"]
    );
    // Only the 2022 scene passes the date window and the 30% cloudiness filter
    let ndvi = stacked.band("NDVI").unwrap().get(1, 1).unwrap();
    assert!((ndvi - 0.4).abs() < 1e-9);
    assert_eq!(stacked.band("NDVI").unwrap().get(0, 0), None);
}

#[test]
fn test_mismatched_scene_grid_rejected() {
    init_logging();
    let dir = catalog_dir();
    let manifest = std::fs::read_to_string(dir.path().join("S2_20220410.xml")).unwrap();
    std::fs::write(
        dir.path().join("S2_20220410.xml"),
        manifest.replace("<rows>4</rows>", "<rows>5</rows>"),
    )
    .unwrap();

    assert!(matches!(SceneCatalog::open(dir.path()), Err(VerdantError::GridMismatch(_))));
}
