use std::f64::consts::PI;
use std::fmt::{Display, Formatter, Result};

/// circumference of the earth in meters
pub const EARTH_CIRCUMFERENCE: f64 = 40_075_016.685_578_5;

/// radius of the earth in meters
pub const EARTH_RADIUS: f64 = EARTH_CIRCUMFERENCE / 2.0 / PI;

pub const MAX_ZOOM: u8 = 30;

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if f.alternate() {
            write!(f, "{}/{}/{}", self.z, self.x, self.y)
        } else {
            write!(f, "{},{},{}", self.z, self.x, self.y)
        }
    }
}

impl TileCoord {
    /// Checks provided coordinates for validity
    /// before constructing [`TileCoord`] instance.
    ///
    /// Check [`Self::new_unchecked`] if you are sure that your inputs are possible.
    #[must_use]
    pub fn new_checked(z: u8, x: u32, y: u32) -> Option<TileCoord> {
        Self::is_possible_on_zoom_level(z, x, y).then_some(Self { z, x, y })
    }

    /// Constructs [`TileCoord`] instance from arguments without checking that the tile can exist.
    #[must_use]
    pub fn new_unchecked(z: u8, x: u32, y: u32) -> TileCoord {
        Self { z, x, y }
    }

    /// Checks that zoom `z` is plausibly small and `x`/`y` is possible on said zoom level
    #[must_use]
    pub fn is_possible_on_zoom_level(z: u8, x: u32, y: u32) -> bool {
        if z > MAX_ZOOM {
            return false;
        }

        let side_len = 1_u32 << z;
        x < side_len && y < side_len
    }
}

/// Wire formats a tile can be rendered to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    TopoJson,
    Mvt,
}

impl Format {
    /// Resolve a request file extension into a format, e.g. `mvt` into [`Format::Mvt`].
    #[must_use]
    pub fn parse(ext: &str) -> Option<Self> {
        Some(match ext.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "topojson" => Self::TopoJson,
            "mvt" => Self::Mvt,
            _ => None?,
        })
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match *self {
            Self::Json | Self::TopoJson => "application/json",
            Self::Mvt => "application/x-protobuf",
        }
    }

    /// Extension used for cache files of this format.
    #[must_use]
    pub fn file_ext(&self) -> &'static str {
        match *self {
            Self::Json => "json",
            Self::TopoJson => "topojson",
            Self::Mvt => "mvt",
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.file_ext())
    }
}

/// Projected bounding box of a tile, in the units of the layer projection.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bounds {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Bounds {
    #[must_use]
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }
}

/// The two tile schemes a layer can address its data in.
///
/// Web mercator is addressed as SRID 3857 or its legacy alias 900913;
/// the unprojected lon/lat scheme as SRID 4326.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Projection {
    WebMercator,
    Wgs84,
}

impl Projection {
    #[must_use]
    pub fn from_srid(srid: i32) -> Option<Self> {
        match srid {
            3857 | 900_913 => Some(Self::WebMercator),
            4326 => Some(Self::Wgs84),
            _ => None,
        }
    }

    /// SRID spelled into generated SQL.
    #[must_use]
    pub fn srid(&self) -> i32 {
        match *self {
            Self::WebMercator => 3857,
            Self::Wgs84 => 4326,
        }
    }

    /// Projected bounding box of a tile, computed from its lower-left and
    /// upper-right corners.
    #[must_use]
    pub fn tile_bounds(&self, coord: TileCoord) -> Bounds {
        match *self {
            Self::WebMercator => {
                let tile_length = EARTH_CIRCUMFERENCE / f64::powi(2.0, i32::from(coord.z));
                let half = EARTH_CIRCUMFERENCE / 2.0;
                let xmin = f64::from(coord.x) * tile_length - half;
                let ymax = half - f64::from(coord.y) * tile_length;
                Bounds::new(xmin, ymax - tile_length, xmin + tile_length, ymax)
            }
            Self::Wgs84 => {
                // two columns at zoom 0, tiles are square in degrees
                let tile_length = 180.0 / f64::powi(2.0, i32::from(coord.z));
                let xmin = f64::from(coord.x) * tile_length - 180.0;
                let ymax = 90.0 - f64::from(coord.y) * tile_length;
                Bounds::new(xmin, ymax - tile_length, xmin + tile_length, ymax)
            }
        }
    }
}

/// Ground resolution of one pixel of a 256px tile at the given zoom, in
/// projected meters. This is the unit a per-pixel simplification amount is
/// multiplied by.
#[must_use]
pub fn pixel_tolerance(zoom: u8) -> f64 {
    EARTH_CIRCUMFERENCE / f64::powi(2.0, i32::from(zoom) + 8)
}

/// transform [`WebMercator`](https://epsg.io/3857) to [WGS84](https://epsg.io/4326)
#[must_use]
pub fn webmercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / EARTH_RADIUS).to_degrees();
    let lat = f64::atan(f64::sinh(y / EARTH_RADIUS)).to_degrees();
    (lng, lat)
}

/// transform [WGS84](https://epsg.io/4326) to [`WebMercator`](https://epsg.io/3857)
#[must_use]
pub fn wgs84_to_webmercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * PI / 180.0 * EARTH_RADIUS;

    let y_sin = lat.to_radians().sin();
    let y = EARTH_RADIUS / 2.0 * ((1.0 + y_sin) / (1.0 - y_sin)).ln();

    (x, y)
}
