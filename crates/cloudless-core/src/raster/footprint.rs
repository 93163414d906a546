use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{CompositeError, Result};
use crate::io::{RasterProfile, Window};

/// Area-of-interest polygon in the raster's CRS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct Footprint {
    vertices: Vec<[f64; 2]>,
}

impl Footprint {
    pub fn new(vertices: Vec<[f64; 2]>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(CompositeError::Config(format!(
                "footprint needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CompositeError::Config("footprint has non-finite coordinates".into()));
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.vertices.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &[x, y]| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }

    /// Even-odd point-in-polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Pixel window covering the polygon's bounding box, clipped to the raster.
    /// `None` when the polygon does not overlap the raster.
    pub fn window(&self, profile: &RasterProfile) -> Option<Window> {
        let (min_x, min_y, max_x, max_y) = self.bounds();
        let (r_a, c_a) = profile.transform.invert(min_x, max_y);
        let (r_b, c_b) = profile.transform.invert(max_x, min_y);
        let row0 = r_a.min(r_b).floor().max(0.0) as usize;
        let col0 = c_a.min(c_b).floor().max(0.0) as usize;
        let row1 = (r_a.max(r_b).ceil().max(0.0) as usize).min(profile.height);
        let col1 = (c_a.max(c_b).ceil().max(0.0) as usize).min(profile.width);
        if row1 <= row0 || col1 <= col0 {
            return None;
        }
        Some(Window::new(row0, col0, row1 - row0, col1 - col0))
    }

    /// Per-pixel inside flags for `window`, tested at pixel centres.
    pub fn mask(&self, profile: &RasterProfile, window: Window) -> Array2<bool> {
        Array2::from_shape_fn((window.height, window.width), |(r, c)| {
            let (x, y) = profile.transform.apply(
                (window.row_off + r) as f64 + 0.5,
                (window.col_off + c) as f64 + 0.5,
            );
            self.contains(x, y)
        })
    }
}

impl TryFrom<Vec<[f64; 2]>> for Footprint {
    type Error = CompositeError;

    fn try_from(vertices: Vec<[f64; 2]>) -> Result<Self> {
        Self::new(vertices)
    }
}

impl From<Footprint> for Vec<[f64; 2]> {
    fn from(f: Footprint) -> Self {
        f.vertices
    }
}
