use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// Street / locality / region triple resolved for a coordinate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Address {
    pub street: String,
    pub locality: String,
    pub region: String,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.street.is_empty() && self.locality.is_empty() && self.region.is_empty()
    }
}

/// One recorded vehicle observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Fix {
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub mileage: Option<f64>,
    pub battery: Option<f64>,
    pub fix: String,
    pub hdop: Option<f64>,
    pub description: String,
    pub address: Address,
}

/// Uniqueness key of a stored fix: exact coordinates plus timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FixKey {
    coord: CoordKey,
    timestamp: String,
}

/// Coordinates compared bit-for-bit, with -0.0 folded into 0.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoordKey {
    latitude: u64,
    longitude: u64,
}

impl CoordKey {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        CoordKey {
            latitude: (latitude + 0.0).to_bits(),
            longitude: (longitude + 0.0).to_bits(),
        }
    }
}

impl FixKey {
    pub fn new(latitude: f64, longitude: f64, timestamp: &str) -> Self {
        FixKey {
            coord: CoordKey::new(latitude, longitude),
            timestamp: timestamp.to_string(),
        }
    }
}

impl Fix {
    pub fn key(&self) -> FixKey {
        FixKey::new(self.latitude, self.longitude, &self.timestamp)
    }

    pub fn coord_key(&self) -> CoordKey {
        CoordKey::new(self.latitude, self.longitude)
    }

    /// Parses the vendor timestamp. Offsets are honoured, naive values are read as UTC.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

impl FromRow<'_, SqliteRow> for Fix {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Fix {
            timestamp: row.try_get("timestamp")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            speed: row.try_get("speed")?,
            mileage: row.try_get("mileage")?,
            battery: row.try_get("battery")?,
            fix: row.try_get::<String, _>("fix").unwrap_or_default(),
            hdop: row.try_get("hdop")?,
            description: row.try_get::<String, _>("description").unwrap_or_default(),
            address: Address {
                street: row.try_get::<String, _>("street").unwrap_or_default(),
                locality: row.try_get::<String, _>("locality").unwrap_or_default(),
                region: row.try_get::<String, _>("region").unwrap_or_default(),
            },
        })
    }
}
