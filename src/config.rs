use std::env;

use crate::cluster::ClusterMode;

/// A lat/lon rectangle used to scope the precomputer and pre-warm to a
/// deployment's service area, rather than the whole world.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Default service area: mainland France, matching the original
/// implementation's hardcoded pre-warm/precompute bounds.
const DEFAULT_REGION: Region = Region {
    min_lat: 41.0,
    max_lat: 51.0,
    min_lon: -5.0,
    max_lon: 10.0,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub database_url: Option<String>,
    pub csv_url: String,
    pub skip_precompute: bool,
    pub cluster_mode: ClusterMode,
    pub precompute_region: Region,
    pub compute_workers: usize,
    pub cache_pool_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            port: parse_port()?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://redis:6379/0".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            csv_url: env::var("CSV_URL").unwrap_or_else(|_| {
                "https://pub-ecf2cacf42304db4aff89b230d889189.r2.dev/source_data.csv".to_string()
            }),
            skip_precompute: parse_bool(env::var("SKIP_PRECOMPUTE").ok().as_deref()),
            cluster_mode: parse_cluster_mode(env::var("CLUSTER_MODE").ok().as_deref())?,
            precompute_region: parse_region(env::var("PRECOMPUTE_REGION").ok().as_deref())?,
            compute_workers: parse_usize("COMPUTE_WORKERS", 8)?,
            cache_pool_size: parse_usize("CACHE_POOL_SIZE", 500)?,
        })
    }
}

/// Parses the port number from environment variables.
/// Checks PORT first, defaulting to 8000 (the original service's port).
/// Returns an error if the port value is invalid.
pub fn parse_port() -> anyhow::Result<u16> {
    let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    port_str.parse::<u16>().map_err(|e| {
        anyhow::anyhow!(
            "Invalid port value '{}': {}. Port must be a number between 1 and 65535",
            port_str,
            e
        )
    })
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

fn parse_cluster_mode(value: Option<&str>) -> anyhow::Result<ClusterMode> {
    match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("grid") => Ok(ClusterMode::Grid),
        Some("h3") => Ok(ClusterMode::H3),
        Some(other) => Err(anyhow::anyhow!(
            "Invalid CLUSTER_MODE '{}': expected 'grid' or 'h3'",
            other
        )),
    }
}

fn parse_usize(name: &str, default: usize) -> anyhow::Result<usize> {
    match env::var(name) {
        Ok(value) => value
            .parse::<usize>()
            .map_err(|e| anyhow::anyhow!("Invalid {} value '{}': {}", name, value, e)),
        Err(_) => Ok(default),
    }
}

/// Parses `PRECOMPUTE_REGION` as `min_lat,max_lat,min_lon,max_lon`.
fn parse_region(value: Option<&str>) -> anyhow::Result<Region> {
    let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_REGION);
    };

    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(anyhow::anyhow!(
            "Invalid PRECOMPUTE_REGION '{}': expected 'min_lat,max_lat,min_lon,max_lon'",
            raw
        ));
    }

    let parse = |s: &str| -> anyhow::Result<f64> {
        s.parse::<f64>()
            .map_err(|e| anyhow::anyhow!("Invalid PRECOMPUTE_REGION component '{}': {}", s, e))
    };

    Ok(Region {
        min_lat: parse(parts[0])?,
        max_lat: parse(parts[1])?,
        min_lon: parse(parts[2])?,
        max_lon: parse(parts[3])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_truthy_values() {
        assert!(parse_bool(Some("true")));
        assert!(parse_bool(Some("TRUE")));
        assert!(parse_bool(Some("1")));
        assert!(!parse_bool(Some("false")));
        assert!(!parse_bool(None));
    }

    #[test]
    fn parses_region_rectangle() {
        let region = parse_region(Some("41,51,-5,10")).unwrap();
        assert_eq!(region.min_lat, 41.0);
        assert_eq!(region.max_lon, 10.0);
    }

    #[test]
    fn default_region_used_when_unset() {
        let region = parse_region(None).unwrap();
        assert_eq!(region.min_lat, DEFAULT_REGION.min_lat);
    }

    #[test]
    fn rejects_malformed_region() {
        assert!(parse_region(Some("1,2,3")).is_err());
    }
}
