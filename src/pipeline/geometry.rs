//! Watermark placement geometry: where the text goes on a page.
//!
//! Everything here is pure arithmetic over PDF user-space points (origin at
//! the bottom-left corner, y growing upwards). No document access, no I/O.
//!
//! A [`GlyphPlacement`] is the text origin (the left end of its baseline
//! box) plus a counter-clockwise rotation about that origin, exactly what a
//! `Tm` text matrix expresses.
//!
//! ## Layouts
//!
//! | Layout | Placements | Rotation |
//! |--------|------------|----------|
//! | [`Layout::Center`]   | 1 | 0° |
//! | [`Layout::Diagonal`] | 1 | `atan(h / w)` |
//! | [`Layout::Tile`]     | `rows × columns` | 0° |
//!
//! Oversized text is never clamped; placements may fall partly or wholly
//! outside the page. Undersized text is: a tile grid of more than
//! [`MAX_TILE_PLACEMENTS`] copies is refused.

use serde::{Deserialize, Serialize};

/// Width and height of the watermark text at the run's font size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextMetrics {
    pub width: f64,
    pub height: f64,
}

/// A page's visible size in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
}

impl PageGeometry {
    pub fn center(&self) -> (f64, f64) {
        (self.width / 2.0, self.height / 2.0)
    }
}

/// Where one copy of the text is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlyphPlacement {
    pub x: f64,
    pub y: f64,
    /// Counter-clockwise, about `(x, y)`.
    pub rotation_degrees: f64,
}

/// A layout algorithm, selected once per run and applied to every page.
pub type LayoutFn = fn(&TextMetrics, &PageGeometry) -> Result<Vec<GlyphPlacement>, String>;

/// Upper bound on the copies a tiled page may carry.
pub const MAX_TILE_PLACEMENTS: usize = 100_000;

/// The supported watermark arrangements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One copy, horizontally and vertically centered.
    #[default]
    Center,
    /// One copy along the bottom-left → top-right diagonal.
    Diagonal,
    /// A brick-pattern grid covering the whole page.
    Tile,
}

impl Layout {
    /// Map a client `position` string to a layout.
    ///
    /// Only the exact strings `center` and `tile` select those layouts; every
    /// other value (including `diagonal`, `Center` or `" tile"`) selects
    /// [`Layout::Diagonal`].
    pub fn from_position(position: &str) -> Self {
        match position {
            "center" => Layout::Center,
            "tile" => Layout::Tile,
            _ => Layout::Diagonal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Center => "center",
            Layout::Diagonal => "diagonal",
            Layout::Tile => "tile",
        }
    }

    /// The placement function for this layout.
    pub fn placement_fn(self) -> LayoutFn {
        match self {
            Layout::Center => |t, p| Ok(center(t, p)),
            Layout::Diagonal => |t, p| Ok(diagonal(t, p)),
            Layout::Tile => tile,
        }
    }

    pub fn place(
        self,
        text: &TextMetrics,
        page: &PageGeometry,
    ) -> Result<Vec<GlyphPlacement>, String> {
        (self.placement_fn())(text, page)
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Centered text: its bounding box is symmetric about the page midpoint.
pub fn center(text: &TextMetrics, page: &PageGeometry) -> Vec<GlyphPlacement> {
    vec![GlyphPlacement {
        x: (page.width - text.width) / 2.0,
        y: (page.height - text.height) / 2.0,
        rotation_degrees: 0.0,
    }]
}

/// The page's corner-to-corner angle in degrees.
pub fn diagonal_angle(page: &PageGeometry) -> f64 {
    (page.height / page.width).atan().to_degrees()
}

/// Diagonal text whose *rotated* visual center sits on the page center.
///
/// The text box's own center `(w/2, h/2)` is rotated by the diagonal angle
/// and subtracted from the page center, so the origin moves back along the
/// rotated box rather than along the unrotated one.
pub fn diagonal(text: &TextMetrics, page: &PageGeometry) -> Vec<GlyphPlacement> {
    let angle = diagonal_angle(page);
    let (sin, cos) = angle.to_radians().sin_cos();

    let (half_w, half_h) = (text.width / 2.0, text.height / 2.0);
    let rotated_x = half_w * cos - half_h * sin;
    let rotated_y = half_w * sin + half_h * cos;

    let (cx, cy) = page.center();
    vec![GlyphPlacement {
        x: cx - rotated_x,
        y: cy - rotated_y,
        rotation_degrees: angle,
    }]
}

/// Spacing and cell counts of a tiled layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub columns: usize,
    pub rows: usize,
    pub h_spacing: f64,
    pub v_spacing: f64,
}

impl TileGrid {
    pub fn for_page(text: &TextMetrics, page: &PageGeometry) -> Self {
        let h_spacing = text.width * 1.5;
        let v_spacing = text.height * 3.0;
        Self {
            columns: cells(page.width, h_spacing),
            rows: cells(page.height, v_spacing),
            h_spacing,
            v_spacing,
        }
    }

    /// Number of placements the grid produces, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.columns.saturating_mul(self.rows)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `ceil(extent / spacing) + 1`; one extra cell pads partial cells at the
/// page edge. A zero spacing (empty text) collapses to a single cell.
fn cells(extent: f64, spacing: f64) -> usize {
    if spacing > 0.0 && spacing.is_finite() {
        ((extent / spacing).ceil().max(0.0) as usize).saturating_add(1)
    } else {
        1
    }
}

/// Brick-pattern tiling, laid out top-down; odd rows shift right by half a
/// cell so repeated copies don't line up into vertical bands.
///
/// Fails when the grid would exceed [`MAX_TILE_PLACEMENTS`].
pub fn tile(text: &TextMetrics, page: &PageGeometry) -> Result<Vec<GlyphPlacement>, String> {
    let grid = TileGrid::for_page(text, page);
    if grid.len() > MAX_TILE_PLACEMENTS {
        return Err(format!(
            "tiling needs {} x {} copies, more than the limit of {}; increase the font size",
            grid.columns, grid.rows, MAX_TILE_PLACEMENTS
        ));
    }
    let mut placements = Vec::with_capacity(grid.len());

    for row in 0..grid.rows {
        let offset = if row % 2 == 1 { grid.h_spacing / 2.0 } else { 0.0 };
        let y = page.height - (row + 1) as f64 * grid.v_spacing;
        for col in 0..grid.columns {
            placements.push(GlyphPlacement {
                x: col as f64 * grid.h_spacing + offset,
                y,
                rotation_degrees: 0.0,
            });
        }
    }

    Ok(placements)
}
