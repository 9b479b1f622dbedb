//! SQL composition for tile queries.
//!
//! A user-supplied sub-query is wrapped with bounding-box filtering,
//! simplification, clipping, reprojection and scaling, producing the final
//! statement the feature reader executes.

use tilegen_tile_utils::Bounds;

/// Mandatory geometry column of every sub-query.
pub const GEOMETRY_COLUMN: &str = "__geometry__";

/// Optional id column; synthesized from the geometry digest when absent.
pub const ID_COLUMN: &str = "__id__";

/// Token a sub-query may use to refer to the tile bounding box.
pub const BBOX_TOKEN: &str = "!bbox!";

/// Column names a sub-query projects, discovered once per query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSet {
    columns: Vec<String>,
}

impl ColumnSet {
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn has_geometry(&self) -> bool {
        self.columns.iter().any(|c| c == GEOMETRY_COLUMN)
    }

    #[must_use]
    pub fn has_id(&self) -> bool {
        self.columns.iter().any(|c| c == ID_COLUMN)
    }

    /// Every projected column except the geometry, in projection order.
    pub fn property_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| *c != GEOMETRY_COLUMN)
    }
}

fn st_bbox(bounds: &Bounds, padding: f64, srid: i32) -> String {
    format!(
        "ST_MakeEnvelope({:.12}, {:.12}, {:.12}, {:.12}, {srid})",
        bounds.xmin - padding,
        bounds.ymin - padding,
        bounds.xmax + padding,
        bounds.ymax + padding,
    )
}

/// SQL that discovers a sub-query's projected columns without reading rows.
#[must_use]
pub fn probe_query(subquery: &str, srid: i32) -> String {
    let bbox = st_bbox(&Bounds::new(0.0, 0.0, 0.0, 0.0), 0.0, srid);
    let subquery = subquery.replace(BBOX_TOKEN, &bbox);
    // the newline guards against a sub-query ending in a line comment
    format!("SELECT * FROM ({subquery}\n) AS q LIMIT 0")
}

/// Build the statement for one tile request.
///
/// `is_geo` reprojects the output to lon/lat for the JSON formats; `scale`
/// maps the un-padded tile box onto `[0, scale]²` for MVT. When the
/// sub-query used the bbox token the outer intersection filter is omitted,
/// since the sub-query already restricted itself to the tile box.
#[expect(clippy::too_many_arguments)]
#[must_use]
pub fn build_query(
    srid: i32,
    subquery: &str,
    columns: &ColumnSet,
    bounds: &Bounds,
    tolerance: f64,
    is_geo: bool,
    is_clipped: bool,
    padding: f64,
    scale: Option<f64>,
) -> String {
    let bbox = st_bbox(bounds, padding, srid);
    let mut geom = format!("q.{GEOMETRY_COLUMN}");

    if tolerance > 0.0 {
        // Simplify inside a box slightly larger than the tile, so that the
        // simplified edges still line up across neighbouring tiles, then cut
        // the exact tile out of the result. The pre-cut keeps the input to
        // the simplification bounded even for continent-sized geometries.
        let simplification_padding = padding + bounds.height() * 0.1;
        let simplification_bbox = st_bbox(bounds, simplification_padding, srid);
        geom = format!("ST_Intersection({geom}, {simplification_bbox})");
        geom = format!("ST_MakeValid(ST_SimplifyPreserveTopology({geom}, {tolerance:.12}))");
    }

    if is_clipped {
        geom = format!("ST_Intersection({geom}, {bbox})");
    }

    if is_geo {
        geom = format!("ST_Transform({geom}, 4326)");
    }

    if let Some(scale) = scale {
        // scale applies to the un-padded bounds; geometry kept by the
        // padding spills past the scale range
        geom = format!(
            "ST_TransScale({geom}, {:.12}, {:.12}, {:.12}, {:.12})",
            -bounds.xmin,
            -bounds.ymin,
            scale / bounds.width(),
            scale / bounds.height(),
        );
    }

    let has_bbox_token = subquery.contains(BBOX_TOKEN);
    let subquery = subquery.replace(BBOX_TOKEN, &bbox);

    let mut select_list: Vec<String> = columns
        .property_columns()
        .map(|c| format!("q.\"{c}\""))
        .collect();
    if !columns.has_id() {
        select_list.push(format!(
            "Substr(MD5(ST_AsBinary(q.{GEOMETRY_COLUMN})), 1, 10) AS {ID_COLUMN}"
        ));
    }
    select_list.push(format!("ST_AsBinary({geom}) AS {GEOMETRY_COLUMN}"));
    let select_list = select_list.join(", ");

    if has_bbox_token {
        format!("SELECT {select_list} FROM ({subquery}) AS q")
    } else {
        format!(
            "SELECT {select_list} FROM ({subquery}) AS q WHERE ST_Intersects(q.{GEOMETRY_COLUMN}, {bbox})"
        )
    }
}
