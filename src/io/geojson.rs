//! GeoJSON feature collections: reading, CRS handling, validity checks and
//! writing.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use proj4rs::Proj;
use proj4rs::adaptors::transform_xy;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::GeoError;

/// Earth radius used by the spherical Mercator projection (m).
const MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Geographic target of every reprojection.
const WGS84_PROJ: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Coordinate position: `[x, y]` or `[x, y, z]`.
pub type Position = Vec<f64>;

/// GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// Applies `f` to every position.
    pub fn map_positions(&mut self, f: &impl Fn(&mut Position)) {
        match self {
            Self::Point { coordinates } => f(coordinates),
            Self::MultiPoint { coordinates } | Self::LineString { coordinates } => {
                coordinates.iter_mut().for_each(f)
            }
            Self::MultiLineString { coordinates } | Self::Polygon { coordinates } => {
                coordinates.iter_mut().flatten().for_each(f)
            }
            Self::MultiPolygon { coordinates } => coordinates.iter_mut().flatten().flatten().for_each(f),
            Self::GeometryCollection { geometries } => {
                for g in geometries {
                    g.map_positions(f);
                }
            }
        }
    }

    /// Like [`Geometry::map_positions`], stopping at the first error.
    pub fn try_map_positions<E>(&mut self, f: &mut impl FnMut(&mut Position) -> Result<(), E>) -> Result<(), E> {
        match self {
            Self::Point { coordinates } => f(coordinates),
            Self::MultiPoint { coordinates } | Self::LineString { coordinates } => {
                coordinates.iter_mut().try_for_each(&mut *f)
            }
            Self::MultiLineString { coordinates } | Self::Polygon { coordinates } => {
                coordinates.iter_mut().flatten().try_for_each(&mut *f)
            }
            Self::MultiPolygon { coordinates } => coordinates.iter_mut().flatten().flatten().try_for_each(&mut *f),
            Self::GeometryCollection { geometries } => {
                geometries.iter_mut().try_for_each(|g| g.try_map_positions(&mut *f))
            }
        }
    }

    /// Structural validity: finite 2D/3D positions, lines of two or more
    /// positions, closed polygon rings of four or more positions, and
    /// non-empty multi-part geometries.
    ///
    /// Self-intersection is not checked.
    pub fn is_valid(&self) -> bool {
        fn position_ok(p: &Position) -> bool {
            (2..=3).contains(&p.len()) && p.iter().all(|c| c.is_finite())
        }
        fn line_ok(line: &[Position]) -> bool {
            line.len() >= 2 && line.iter().all(position_ok)
        }
        fn ring_ok(ring: &[Position]) -> bool {
            ring.len() >= 4 && ring.iter().all(position_ok) && ring.first() == ring.last()
        }
        fn polygon_ok(rings: &[Vec<Position>]) -> bool {
            !rings.is_empty() && rings.iter().all(|r| ring_ok(r))
        }

        match self {
            Self::Point { coordinates } => position_ok(coordinates),
            Self::MultiPoint { coordinates } => !coordinates.is_empty() && coordinates.iter().all(position_ok),
            Self::LineString { coordinates } => line_ok(coordinates),
            Self::MultiLineString { coordinates } => {
                !coordinates.is_empty() && coordinates.iter().all(|l| line_ok(l))
            }
            Self::Polygon { coordinates } => polygon_ok(coordinates),
            Self::MultiPolygon { coordinates } => {
                !coordinates.is_empty() && coordinates.iter().all(|p| polygon_ok(p))
            }
            Self::GeometryCollection { geometries } => {
                !geometries.is_empty() && geometries.iter().all(Geometry::is_valid)
            }
        }
    }
}

/// GeoJSON feature. A `None` geometry serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    kind: FeatureTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub properties: Map<String, Value>,
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FeatureTag {
    Feature,
}

impl Feature {
    pub fn new(properties: Map<String, Value>, geometry: Option<Geometry>) -> Self {
        Self {
            kind: FeatureTag::Feature,
            id: None,
            properties,
            geometry,
        }
    }

    /// Property value, treating JSON `null` as absent.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).filter(|v| !v.is_null())
    }

    /// Property rendered as text: strings verbatim, numbers and booleans in
    /// their JSON form. Null and absent properties give `None`.
    pub fn property_text(&self, name: &str) -> Option<String> {
        self.property(name).map(value_text)
    }
}

/// Renders a JSON scalar as plain text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coordinate reference systems the pipeline can read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crs {
    /// WGS84 longitude/latitude (EPSG:4326, OGC CRS84).
    Wgs84,
    /// Spherical Web Mercator (EPSG:3857 and aliases).
    WebMercator,
    /// Any other EPSG code.
    Epsg(u32),
    Other(String),
}

impl Crs {
    /// Name written into output collections.
    pub const CRS84_URN: &'static str = "urn:ogc:def:crs:OGC:1.3:CRS84";

    /// Classifies a CRS name such as `EPSG:3857`,
    /// `urn:ogc:def:crs:EPSG::4326` or `urn:ogc:def:crs:OGC:1.3:CRS84`.
    pub fn from_name(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Self::Wgs84;
        }
        let code = upper.rsplit(':').next().unwrap_or("");
        match code {
            "4326" => Self::Wgs84,
            "3857" | "900913" | "3785" | "102100" | "102113" => Self::WebMercator,
            _ => match code.parse() {
                Ok(epsg) if upper.contains("EPSG") => Self::Epsg(epsg),
                _ => Self::Other(name.trim().to_string()),
            },
        }
    }

    /// Reads the legacy `crs` member. Only an absent member means WGS84;
    /// one that names nothing recognisable is kept verbatim as `Other`.
    fn from_member(member: Option<&Value>) -> Self {
        let Some(crs) = member else {
            return Self::Wgs84;
        };
        if let Some(name) = crs.pointer("/properties/name").and_then(Value::as_str) {
            return Self::from_name(name);
        }
        let is_epsg = crs
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.eq_ignore_ascii_case("EPSG"));
        match crs.pointer("/properties/code") {
            Some(code @ (Value::Number(_) | Value::String(_))) if is_epsg => {
                Self::from_name(&format!("EPSG:{}", value_text(code)))
            }
            _ => Self::Other(crs.to_string()),
        }
    }
}

/// PROJ definition of a projected EPSG code: UTM zones on WGS84, ETRS89
/// and NAD83.
fn proj_definition(code: u32) -> Option<String> {
    let utm = |zone: u32, south: bool, datum: &str| {
        let hemisphere = if south { " +south" } else { "" };
        format!("+proj=utm +zone={zone}{hemisphere} {datum} +units=m +no_defs")
    };
    match code {
        32601..=32660 => Some(utm(code - 32600, false, "+datum=WGS84")),
        32701..=32760 => Some(utm(code - 32700, true, "+datum=WGS84")),
        25828..=25838 => Some(utm(code - 25800, false, "+ellps=GRS80 +towgs84=0,0,0,0,0,0,0")),
        26901..=26923 => Some(utm(code - 26900, false, "+datum=NAD83")),
        _ => None,
    }
}

/// A feature collection together with its declared CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    pub crs: Crs,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// A WGS84 collection.
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            crs: Crs::Wgs84,
            features,
        }
    }

    /// Returns `true` if at least one feature carries property `name`.
    pub fn has_property(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.properties.contains_key(name))
    }

    /// Returns `true` if at least one feature has a non-null `name`.
    pub fn has_values(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.property(name).is_some())
    }

    /// Reprojects every geometry to WGS84.
    ///
    /// Web Mercator is inverted directly; projected EPSG codes go through
    /// `proj4rs`.
    ///
    /// # Errors
    ///
    /// Returns `GeoError::UnsupportedCrs` for a CRS with no known definition
    /// and `GeoError::Projection` if a position cannot be transformed; `path`
    /// is only used for the diagnostic.
    pub fn to_wgs84(mut self, path: &Path) -> Result<Self, GeoError> {
        match &self.crs {
            Crs::Wgs84 => {}
            Crs::WebMercator => {
                for geometry in self.features.iter_mut().filter_map(|f| f.geometry.as_mut()) {
                    geometry.map_positions(&mercator_to_lon_lat);
                }
                self.crs = Crs::Wgs84;
            }
            Crs::Epsg(code) => {
                let name = format!("EPSG:{code}");
                let Some(definition) = proj_definition(*code) else {
                    return Err(GeoError::UnsupportedCrs {
                        path: path.to_path_buf(),
                        crs: name,
                    });
                };
                let projection_err = |source| GeoError::Projection {
                    path: path.to_path_buf(),
                    crs: name.clone(),
                    source,
                };
                let src = Proj::from_proj_string(&definition).map_err(projection_err)?;
                let dst = Proj::from_proj_string(WGS84_PROJ).map_err(projection_err)?;
                for geometry in self.features.iter_mut().filter_map(|f| f.geometry.as_mut()) {
                    geometry
                        .try_map_positions(&mut |p| projected_to_lon_lat(&src, &dst, p))
                        .map_err(projection_err)?;
                }
                self.crs = Crs::Wgs84;
            }
            Crs::Other(name) => {
                return Err(GeoError::UnsupportedCrs {
                    path: path.to_path_buf(),
                    crs: name.clone(),
                });
            }
        }
        Ok(self)
    }
}

/// Projected metres to degrees through `proj4rs`, in place. The geographic
/// side of a `proj4rs` transform is in radians.
fn projected_to_lon_lat(src: &Proj, dst: &Proj, p: &mut Position) -> Result<(), proj4rs::errors::Error> {
    if p.len() < 2 {
        return Ok(());
    }
    let (lon, lat) = transform_xy(src, dst, p[0], p[1])?;
    p[0] = lon.to_degrees();
    p[1] = lat.to_degrees();
    Ok(())
}

/// Inverse spherical Mercator: metres to degrees, in place.
pub fn mercator_to_lon_lat(p: &mut Position) {
    if p.len() < 2 {
        return;
    }
    let lon = (p[0] / MERCATOR_RADIUS_M).to_degrees();
    let lat = (2.0 * (p[1] / MERCATOR_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    p[0] = lon;
    p[1] = lat;
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    crs: Option<Value>,
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "present")]
    geometry: Option<Option<Geometry>>,
}

/// Distinguishes `"geometry": null` (`Some(None)`) from an absent member.
fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Option<Geometry>>, D::Error> {
    Option::<Geometry>::deserialize(d).map(Some)
}

/// Reads a GeoJSON feature collection.
///
/// # Errors
///
/// Returns `GeoError::Io`/`Json` if the file cannot be read or parsed,
/// `NotFeatureCollection` for other GeoJSON types and `MissingGeometry` when
/// no feature has a geometry member at all.
pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection, GeoError> {
    let file = File::open(path).map_err(|source| GeoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawCollection = serde_json::from_reader(BufReader::new(file)).map_err(|source| GeoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    from_raw(raw, path)
}

/// Parses a GeoJSON feature collection from a string.
///
/// # Errors
///
/// See [`read_feature_collection`].
pub fn parse_feature_collection(text: &str, path: &Path) -> Result<FeatureCollection, GeoError> {
    let raw: RawCollection = serde_json::from_str(text).map_err(|source| GeoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    from_raw(raw, path)
}

fn from_raw(raw: RawCollection, path: &Path) -> Result<FeatureCollection, GeoError> {
    if raw.kind != "FeatureCollection" {
        return Err(GeoError::NotFeatureCollection {
            path: path.to_path_buf(),
            found: raw.kind,
        });
    }
    if !raw.features.is_empty() && raw.features.iter().all(|f| f.geometry.is_none()) {
        return Err(GeoError::MissingGeometry {
            path: path.to_path_buf(),
        });
    }

    let features = raw
        .features
        .into_iter()
        .map(|f| Feature {
            kind: FeatureTag::Feature,
            id: f.id,
            properties: f.properties.unwrap_or_default(),
            geometry: f.geometry.flatten(),
        })
        .collect();
    Ok(FeatureCollection {
        crs: Crs::from_member(raw.crs.as_ref()),
        features,
    })
}

#[derive(Serialize)]
struct OutCollection<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    crs: Value,
    features: &'a [Feature],
}

/// Writes a WGS84 feature collection to any writer.
///
/// # Errors
///
/// Returns a `serde_json::Error` if serialization or writing fails.
pub fn write_feature_collection_to(writer: impl Write, collection: &FeatureCollection) -> Result<(), serde_json::Error> {
    let out = OutCollection {
        kind: "FeatureCollection",
        crs: serde_json::json!({ "type": "name", "properties": { "name": Crs::CRS84_URN } }),
        features: &collection.features,
    };
    serde_json::to_writer(writer, &out)
}

/// Writes a WGS84 feature collection to `path`, creating parent directories.
///
/// # Errors
///
/// Returns `GeoError::Io` if the file cannot be created and `GeoError::Json`
/// if serialization fails.
pub fn write_feature_collection(path: &Path, collection: &FeatureCollection) -> Result<(), GeoError> {
    let io_err = |source| GeoError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    write_feature_collection_to(&mut writer, collection).map_err(|source| GeoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geometry {
        Geometry::Polygon {
            coordinates: vec![vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
                vec![0.0, 0.0],
            ]],
        }
    }

    #[test]
    fn parses_features_and_null_geometry() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","id":3,"properties":{"name":"Ikeja","fid":1},
             "geometry":{"type":"Point","coordinates":[3.3,6.6]}},
            {"type":"Feature","properties":null,"geometry":null}
        ]}"#;
        let fc = parse_feature_collection(text, Path::new("a.geojson")).expect("parse");
        assert_eq!(fc.crs, Crs::Wgs84);
        assert_eq!(fc.features.len(), 2);
        assert_eq!(fc.features[0].property_text("name").as_deref(), Some("Ikeja"));
        assert_eq!(fc.features[0].property_text("fid").as_deref(), Some("1"));
        assert!(fc.features[1].geometry.is_none());
        assert!(fc.features[1].properties.is_empty());
    }

    #[test]
    fn collection_without_geometry_members_is_rejected() {
        let text = r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"a":1}}]}"#;
        let err = parse_feature_collection(text, Path::new("a.geojson"));
        assert!(matches!(err, Err(GeoError::MissingGeometry { .. })));
    }

    #[test]
    fn other_geojson_types_are_rejected() {
        let text = r#"{"type":"Feature","properties":{},"geometry":null}"#;
        let err = parse_feature_collection(text, Path::new("a.geojson"));
        assert!(matches!(err, Err(GeoError::NotFeatureCollection { .. })));
    }

    #[test]
    fn crs_names_are_classified() {
        assert_eq!(Crs::from_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Crs::Wgs84);
        assert_eq!(Crs::from_name("EPSG:4326"), Crs::Wgs84);
        assert_eq!(Crs::from_name("urn:ogc:def:crs:EPSG::3857"), Crs::WebMercator);
        assert_eq!(Crs::from_name("urn:ogc:def:crs:EPSG::32631"), Crs::Epsg(32631));
        assert_eq!(Crs::from_name("local grid"), Crs::Other("local grid".to_string()));
    }

    #[test]
    fn crs_member_forms() {
        assert_eq!(Crs::from_member(None), Crs::Wgs84);
        let legacy = serde_json::json!({"type": "EPSG", "properties": {"code": 3857}});
        assert_eq!(Crs::from_member(Some(&legacy)), Crs::WebMercator);
        let linked = serde_json::json!({"type": "link", "properties": {"href": "http://example.com/crs"}});
        assert!(matches!(Crs::from_member(Some(&linked)), Crs::Other(_)));
    }

    #[test]
    fn legacy_epsg_member_is_not_read_as_wgs84() {
        let text = r#"{"type":"FeatureCollection",
            "crs":{"type":"EPSG","properties":{"code":3857}},
            "features":[{"type":"Feature","properties":{},
              "geometry":{"type":"Point","coordinates":[111319.49079327357,0.0]}}]}"#;
        let fc = parse_feature_collection(text, Path::new("e.geojson")).expect("parse");
        assert_eq!(fc.crs, Crs::WebMercator);
    }

    #[test]
    fn mercator_origin_maps_to_null_island() {
        let mut p = vec![0.0, 0.0];
        mercator_to_lon_lat(&mut p);
        assert!(p[0].abs() < 1e-12 && p[1].abs() < 1e-12);

        let mut q = vec![20_037_508.342_789_244, 0.0];
        mercator_to_lon_lat(&mut q);
        assert!((q[0] - 180.0).abs() < 1e-9);
    }

    #[test]
    fn mercator_collection_is_reprojected() {
        let text = r#"{"type":"FeatureCollection",
            "crs":{"type":"name","properties":{"name":"EPSG:3857"}},
            "features":[{"type":"Feature","properties":{},
              "geometry":{"type":"Point","coordinates":[111319.49079327357,0.0]}}]}"#;
        let fc = parse_feature_collection(text, Path::new("m.geojson"))
            .and_then(|fc| fc.to_wgs84(Path::new("m.geojson")))
            .expect("reprojection");
        assert_eq!(fc.crs, Crs::Wgs84);
        match &fc.features[0].geometry {
            Some(Geometry::Point { coordinates }) => assert!((coordinates[0] - 1.0).abs() < 1e-9),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn utm_collections_are_reprojected() {
        let point = |x: f64, y: f64| Feature::new(Map::new(), Some(Geometry::Point { coordinates: vec![x, y] }));
        let north = FeatureCollection {
            crs: Crs::Epsg(32631),
            features: vec![point(500_000.0, 0.0)],
        };
        let south = FeatureCollection {
            crs: Crs::Epsg(32733),
            features: vec![point(500_000.0, 10_000_000.0)],
        };
        for (fc, lon) in [(north, 3.0), (south, 15.0)] {
            let fc = fc.to_wgs84(Path::new("utm.geojson")).expect("reprojection");
            assert_eq!(fc.crs, Crs::Wgs84);
            match &fc.features[0].geometry {
                Some(Geometry::Point { coordinates }) => {
                    assert!((coordinates[0] - lon).abs() < 1e-6, "lon {}", coordinates[0]);
                    assert!(coordinates[1].abs() < 1e-6, "lat {}", coordinates[1]);
                }
                other => panic!("unexpected geometry {other:?}"),
            }
        }
    }

    #[test]
    fn unsupported_crs_is_an_error() {
        for crs in [Crs::Epsg(99_999), Crs::Other("local grid".to_string())] {
            let fc = FeatureCollection {
                crs,
                features: Vec::new(),
            };
            assert!(matches!(
                fc.to_wgs84(Path::new("u.geojson")),
                Err(GeoError::UnsupportedCrs { .. })
            ));
        }
    }

    #[test]
    fn validity_rules() {
        assert!(square().is_valid());
        let open_ring = Geometry::Polygon {
            coordinates: vec![vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0]]],
        };
        assert!(!open_ring.is_valid());
        let nan_point = Geometry::Point {
            coordinates: vec![f64::NAN, 0.0],
        };
        assert!(!nan_point.is_valid());
        assert!(!Geometry::MultiPolygon { coordinates: vec![] }.is_valid());
        let short_line = Geometry::LineString {
            coordinates: vec![vec![0.0, 0.0]],
        };
        assert!(!short_line.is_valid());
    }

    #[test]
    fn written_collection_has_crs84_and_null_geometry() {
        let mut props = Map::new();
        props.insert("adm2".to_string(), Value::from("Ikeja"));
        let fc = FeatureCollection::new(vec![Feature::new(props, None), Feature::new(Map::new(), Some(square()))]);
        let mut buf = Vec::new();
        write_feature_collection_to(&mut buf, &fc).expect("write");
        let back = parse_feature_collection(&String::from_utf8(buf).unwrap_or_default(), Path::new("o.geojson"))
            .expect("re-read");
        assert_eq!(back.crs, Crs::Wgs84);
        assert_eq!(back.features, fc.features);
    }
}
