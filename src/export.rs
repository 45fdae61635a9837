//! Artifacts rendered from a snapshot of the position log: CSV, a readable text register,
//! GeoJSON and an SVG track. Rendering is deterministic so the bundle hash only changes when
//! the log does.

use std::path::Path;

use anyhow::anyhow;
use askama::Template;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue};
use serde::Serialize;

use crate::{
    dto::Fix,
    util::{fs::write_atomic, plot::plot_track_svg},
};

pub const CSV_FILE: &str = "positions_log.csv";
pub const TXT_FILE: &str = "positions_log.txt";
pub const GEOJSON_FILE: &str = "positions_log.geojson";
pub const TRACK_FILE: &str = "track.svg";

#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub file_name: &'static str,
    pub mime_type: &'static str,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportBundle {
    pub artifacts: Vec<Artifact>,
}

impl ExportBundle {
    /// Renders every artifact from `fixes`, which must be in store order (most recent first).
    pub fn render(fixes: &[Fix]) -> anyhow::Result<ExportBundle> {
        let mut artifacts = vec![
            Artifact {
                file_name: CSV_FILE,
                mime_type: "text/csv",
                content: render_csv(fixes)?,
            },
            Artifact {
                file_name: TXT_FILE,
                mime_type: "text/plain",
                content: render_txt(fixes)?.into_bytes(),
            },
            Artifact {
                file_name: GEOJSON_FILE,
                mime_type: "application/geo+json",
                content: render_geojson(fixes).into_bytes(),
            },
        ];

        if !fixes.is_empty() {
            let track: Vec<(f64, f64)> = fixes
                .iter()
                .rev()
                .map(|fix| (fix.latitude, fix.longitude))
                .collect();
            artifacts.push(Artifact {
                file_name: TRACK_FILE,
                mime_type: "image/svg+xml",
                content: plot_track_svg(&track)?.into_bytes(),
            });
        }

        Ok(ExportBundle { artifacts })
    }

    /// Fingerprint over the ordered (file name, content) pairs.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for artifact in &self.artifacts {
            hasher.update(artifact.file_name.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(artifact.content.len() as u64).to_le_bytes());
            hasher.update(&artifact.content);
        }
        hasher.finalize().to_hex().to_string()
    }

    pub async fn write_to(&self, dir: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        for artifact in &self.artifacts {
            write_atomic(&dir.join(artifact.file_name), &artifact.content).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, file_name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.file_name == file_name)
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: &'a str,
    lat: f64,
    lon: f64,
    speed: Option<f64>,
    mileage: Option<f64>,
    description: &'a str,
    battery: Option<f64>,
    fix: &'a str,
    hdop: Option<f64>,
    street: &'a str,
    locality: &'a str,
    region: &'a str,
}

fn render_csv(fixes: &[Fix]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(vec![]);

    if fixes.is_empty() {
        writer.write_record([
            "timestamp",
            "lat",
            "lon",
            "speed",
            "mileage",
            "description",
            "battery",
            "fix",
            "hdop",
            "street",
            "locality",
            "region",
        ])?;
    }

    for fix in fixes {
        writer.serialize(CsvRow {
            timestamp: &fix.timestamp,
            lat: fix.latitude,
            lon: fix.longitude,
            speed: fix.speed,
            mileage: fix.mileage,
            description: &fix.description,
            battery: fix.battery,
            fix: &fix.fix,
            hdop: fix.hdop,
            street: &fix.address.street,
            locality: &fix.address.locality,
            region: &fix.address.region,
        })?;
    }

    writer
        .into_inner()
        .map_err(|err| anyhow!("Could not flush CSV export: {}", err))
}

struct TxtEntry<'a> {
    timestamp: &'a str,
    latitude: f64,
    longitude: f64,
    speed: String,
    mileage: String,
    street: &'a str,
    locality: &'a str,
    region: &'a str,
    battery: String,
    description: &'a str,
}

#[derive(Template)]
#[template(path = "positions_log.txt")]
struct PositionsLogTemplate<'a> {
    entries: Vec<TxtEntry<'a>>,
}

fn or_blank(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn render_txt(fixes: &[Fix]) -> anyhow::Result<String> {
    let entries = fixes
        .iter()
        .map(|fix| TxtEntry {
            timestamp: &fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed: or_blank(fix.speed),
            mileage: or_blank(fix.mileage),
            street: &fix.address.street,
            locality: &fix.address.locality,
            region: &fix.address.region,
            battery: or_blank(fix.battery),
            description: &fix.description,
        })
        .collect();

    Ok(PositionsLogTemplate { entries }.render()?)
}

fn render_geojson(fixes: &[Fix]) -> String {
    let mut features: Vec<Feature> = fixes
        .iter()
        .map(|fix| {
            let mut properties = JsonObject::new();
            properties.insert("timestamp".into(), JsonValue::from(fix.timestamp.as_str()));
            properties.insert("speed".into(), fix.speed.into());
            properties.insert("battery".into(), fix.battery.into());
            properties.insert("street".into(), JsonValue::from(fix.address.street.as_str()));
            properties.insert(
                "locality".into(),
                JsonValue::from(fix.address.locality.as_str()),
            );
            properties.insert("region".into(), JsonValue::from(fix.address.region.as_str()));

            let geometry: Geometry =
                geojson::Value::Point(vec![fix.longitude, fix.latitude]).into();

            Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    if fixes.len() > 1 {
        let line_string = fixes
            .iter()
            .rev()
            .map(|fix| vec![fix.longitude, fix.latitude])
            .collect();
        let mut properties = JsonObject::new();
        properties.insert("kind".into(), JsonValue::from("track"));

        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Value::LineString(line_string).into()),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    GeoJson::from(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fix_at, milano};
    use tempfile::TempDir;

    fn sample() -> Vec<Fix> {
        let mut recent = fix_at(45.4642, 9.19, "2024-10-18T10:00:00");
        recent.speed = Some(42.0);
        recent.battery = Some(12.6);
        recent.description = "In movimento".into();
        recent.address = milano();
        vec![recent, fix_at(45.4, 9.1, "2024-10-18T09:00:00")]
    }

    #[test]
    fn text_register_lists_every_fix() {
        let txt = render_txt(&sample()).unwrap();

        assert!(txt.starts_with("REGISTRO POSIZIONI VEICOLO\n"));
        assert!(txt.contains("Data/Ora: 2024-10-18T10:00:00\n"));
        assert!(txt.contains("Coordinate: 45.4642, 9.19\n"));
        assert!(txt.contains("Velocità: 42 km/h\n"));
        assert!(txt.contains("Comune: Milano\n"));
        assert!(txt.contains("Batteria: 12.6 V\n"));
        assert_eq!(txt.matches("Data/Ora:").count(), 2);
        assert!(txt.find("10:00:00").unwrap() < txt.find("09:00:00").unwrap());
    }

    #[test]
    fn csv_has_header_and_rows() {
        let csv = String::from_utf8(render_csv(&sample()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "timestamp,lat,lon,speed,mileage,description,battery,fix,hdop,street,locality,region"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2024-10-18T10:00:00,45.4642,9.19,42.0,"));
        assert!(lines[1].ends_with("Via Roma,Milano,Lombardia"));

        let empty = String::from_utf8(render_csv(&[]).unwrap()).unwrap();
        assert_eq!(empty.lines().count(), 1);
    }

    #[test]
    fn geojson_has_points_and_track() {
        let geojson: GeoJson = render_geojson(&sample()).parse().unwrap();
        let GeoJson::FeatureCollection(collection) = geojson else {
            panic!("expected a feature collection");
        };

        assert_eq!(collection.features.len(), 3);
        let track = collection.features.last().unwrap();
        assert!(matches!(
            track.geometry.as_ref().map(|g| &g.value),
            Some(geojson::Value::LineString(points)) if points[0] == vec![9.1, 45.4]
        ));
    }

    #[test]
    fn hash_follows_content() {
        let bundle = ExportBundle::render(&sample()).unwrap();
        let same = ExportBundle::render(&sample()).unwrap();
        let mut changed_fixes = sample();
        changed_fixes[1].address = milano();
        let changed = ExportBundle::render(&changed_fixes).unwrap();

        assert_eq!(bundle.content_hash(), same.content_hash());
        assert_ne!(bundle.content_hash(), changed.content_hash());
    }

    #[test]
    fn empty_log_has_no_track_image() {
        let bundle = ExportBundle::render(&[]).unwrap();
        assert!(bundle.get(TRACK_FILE).is_none());
        assert!(bundle.get(CSV_FILE).is_some());
    }

    #[tokio::test]
    async fn writes_every_artifact() {
        let dir = TempDir::new().unwrap();
        let bundle = ExportBundle::render(&sample()).unwrap();

        bundle.write_to(dir.path()).await.unwrap();

        for artifact in &bundle.artifacts {
            let written = std::fs::read(dir.path().join(artifact.file_name)).unwrap();
            assert_eq!(written, artifact.content);
        }
    }
}
