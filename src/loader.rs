//! Dataset loading (external collaborator contract `load_points`): fetches
//! the raw property rows the service clusters and caches, either by
//! streaming a CSV download or, when configured, by reading a local
//! SQLite database directly.
//!
//! The CSV path is grounded on `import_data.py` (download from `CSV_URL`,
//! drop rows with missing/invalid lat-lon) and reuses this repo's own
//! `upload.rs` CSV-streaming idiom (`tokio_util::io::StreamReader` feeding
//! `csv_async::AsyncReaderBuilder`, headers resolved through a `ColumnMap`
//! rather than fixed column positions). The SQLite path is grounded on
//! `db.rs`'s connection-options pattern, narrowed to a single read-only
//! pool since the loaded dataset is never written back to.

use std::str::FromStr;
use std::time::Duration;

use futures::TryStreamExt;
use smartstring::{LazyCompact, SmartString};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio_util::io::StreamReader;

use crate::config::Config;
use crate::points::Point;

const COL_ID: &str = "id";
const COL_DAYS_ON_MARKET: &str = "days_on_market";
const COL_MARGIN: &str = "margin";
const COL_TYPE_LOCAL: &str = "type_local";
const COL_ADDRESS: &str = "address";
const COL_LATITUDE: &str = "latitude";
const COL_LONGITUDE: &str = "longitude";

/// Loads the dataset per `config`: a local SQLite database when
/// `DATABASE_URL` is set, otherwise a CSV download from `CSV_URL`. Rows
/// that fail to parse are dropped and logged rather than aborting the
/// whole load — a single malformed row should not keep the service from
/// starting.
pub async fn load_points(config: &Config) -> anyhow::Result<Vec<Point>> {
    match &config.database_url {
        Some(database_url) => load_from_sqlite(database_url).await,
        None => load_from_csv(&config.csv_url).await,
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PropertyRow {
    id: String,
    days_on_market: Option<i32>,
    margin: Option<f64>,
    type_local: Option<String>,
    address: Option<String>,
    latitude: f64,
    longitude: f64,
}

impl From<PropertyRow> for Point {
    fn from(row: PropertyRow) -> Self {
        Point {
            id: row.id.into(),
            latitude: row.latitude,
            longitude: row.longitude,
            days_on_market: row.days_on_market,
            margin: row.margin,
            type_local: row.type_local.map(Into::into),
            address: row.address.map(Into::into),
        }
    }
}

async fn load_from_sqlite(database_url: &str) -> anyhow::Result<Vec<Point>> {
    tracing::info!(database_url, "loading dataset from sqlite");

    let options = SqliteConnectOptions::from_str(database_url)?.read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    let rows: Vec<PropertyRow> = sqlx::query_as(
        "SELECT id, days_on_market, margin, type_local, address, latitude, longitude FROM properties",
    )
    .fetch_all(&pool)
    .await?;

    tracing::info!(rows = rows.len(), "loaded rows from sqlite");
    Ok(rows.into_iter().map(Point::from).collect())
}

async fn load_from_csv(csv_url: &str) -> anyhow::Result<Vec<Point>> {
    tracing::info!(csv_url, "downloading dataset");

    let response = reqwest::get(csv_url).await?.error_for_status()?;
    let stream = response
        .bytes_stream()
        .map_err(std::io::Error::other);
    let reader = StreamReader::new(stream);

    let mut csv_reader = csv_async::AsyncReaderBuilder::new()
        .has_headers(true)
        .create_reader(reader);

    let headers = csv_reader.headers().await?.clone();
    let columns = ColumnMap::from_headers(&headers);
    if !columns.is_valid() {
        anyhow::bail!("CSV missing required columns (id, latitude, longitude)");
    }

    let mut points = Vec::new();
    let mut record = csv_async::ByteRecord::new();
    let mut row_number = 1usize;
    let mut dropped = 0usize;

    while csv_reader.read_byte_record(&mut record).await? {
        row_number += 1;
        match parse_row(&record, &columns) {
            Some(point) => points.push(point),
            None => {
                dropped += 1;
                tracing::debug!(row_number, "dropped unparseable CSV row");
            }
        }
    }

    tracing::info!(loaded = points.len(), dropped, "dataset download complete");
    Ok(points)
}

#[derive(Default)]
struct ColumnMap {
    id: Option<usize>,
    days_on_market: Option<usize>,
    margin: Option<usize>,
    type_local: Option<usize>,
    address: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv_async::StringRecord) -> Self {
        let mut map = Self::default();
        for (idx, header) in headers.iter().enumerate() {
            match header {
                COL_ID => map.id = Some(idx),
                COL_DAYS_ON_MARKET => map.days_on_market = Some(idx),
                COL_MARGIN => map.margin = Some(idx),
                COL_TYPE_LOCAL => map.type_local = Some(idx),
                COL_ADDRESS => map.address = Some(idx),
                COL_LATITUDE => map.latitude = Some(idx),
                COL_LONGITUDE => map.longitude = Some(idx),
                _ => {}
            }
        }
        map
    }

    const fn is_valid(&self) -> bool {
        self.id.is_some() && self.latitude.is_some() && self.longitude.is_some()
    }
}

fn get_field(record: &csv_async::ByteRecord, idx: Option<usize>) -> Option<&str> {
    let bytes = idx.and_then(|i| record.get(i))?;
    let value = std::str::from_utf8(bytes).ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

type SString = SmartString<LazyCompact>;

fn parse_row(record: &csv_async::ByteRecord, columns: &ColumnMap) -> Option<Point> {
    let id: SString = get_field(record, columns.id)?.into();
    let latitude: f64 = get_field(record, columns.latitude)?.parse().ok()?;
    let longitude: f64 = get_field(record, columns.longitude)?.parse().ok()?;

    let days_on_market = get_field(record, columns.days_on_market).and_then(|s| s.parse().ok());
    let margin = get_field(record, columns.margin).and_then(|s| s.parse().ok());
    let type_local = get_field(record, columns.type_local).map(SString::from);
    let address = get_field(record, columns.address).map(SString::from);

    Some(Point {
        id,
        latitude,
        longitude,
        days_on_market,
        margin,
        type_local,
        address,
    })
}
