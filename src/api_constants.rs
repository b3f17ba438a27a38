pub const HEALTH_ROUTE: &str = "/health";
pub const MARKERS_ROUTE: &str = "/api/markers";
pub const TILE_ROUTE: &str = "/api/tiles/{z}/{x}/{y}";
pub const STATUS_ROUTE: &str = "/api/status";
pub const INDEX_ROUTE: &str = "/";

pub const VIEWPORT_CACHE_CONTROL: &str = "public, max-age=60";
pub const TILE_CACHE_CONTROL: &str = "public, max-age=86400";
