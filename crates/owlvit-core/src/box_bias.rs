//! Geometric prior for box regression.
//!
//! Every patch of the feature grid is biased towards predicting a box anchored
//! at its own grid position and one grid cell in size. The bias lives in logit
//! space so that, with zero regression output, the final sigmoid recovers the
//! prior exactly.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView4};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::math::inverse_sigmoid;

/// Which box coordinates receive a bias.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum BoxBiasKind {
    /// Center coordinates (x, y) only
    Location,
    /// Width and height only
    Size,
    /// All four coordinates
    #[default]
    Both,
}

impl BoxBiasKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Size => "size",
            Self::Both => "both",
        }
    }

    fn has_location(&self) -> bool {
        matches!(self, Self::Location | Self::Both)
    }

    fn has_size(&self) -> bool {
        matches!(self, Self::Size | Self::Both)
    }
}

impl fmt::Display for BoxBiasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoxBiasKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "location" => Ok(Self::Location),
            "size" => Ok(Self::Size),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::UnknownBoxBias(other.to_string())),
        }
    }
}

impl TryFrom<String> for BoxBiasKind {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Box bias for a `[batch, h, w, d]` feature map.
///
/// Returns `[h * w, 4]` (cx, cy, w, h), which broadcasts onto raw box
/// predictions of shape `[batch, h * w, 4]`.
pub fn compute_box_bias(feature_map: ArrayView4<'_, f32>, kind: BoxBiasKind) -> Array2<f32> {
    let (_, h, w, _) = feature_map.dim();
    grid_box_bias(h, w, kind)
}

/// Box bias for an `h × w` grid, patches in row-major order (index `y * w + x`).
///
/// Location: `(x + 1) / w` and `(y + 1) / h`. Size: `1 / w` and `1 / h`.
/// Coordinates go through [`inverse_sigmoid`], whose epsilon keeps the bias
/// finite for coordinates of exactly 1 (last column/row, or a grid of size 1).
pub fn grid_box_bias(h: usize, w: usize, kind: BoxBiasKind) -> Array2<f32> {
    let mut bias = Array2::<f32>::zeros((h * w, 4));
    if h == 0 || w == 0 {
        return bias;
    }

    let size_w = inverse_sigmoid(1.0 / w as f32);
    let size_h = inverse_sigmoid(1.0 / h as f32);

    for y in 0..h {
        let loc_y = inverse_sigmoid((y + 1) as f32 / h as f32);
        for x in 0..w {
            let mut row = bias.row_mut(y * w + x);
            if kind.has_location() {
                row[0] = inverse_sigmoid((x + 1) as f32 / w as f32);
                row[1] = loc_y;
            }
            if kind.has_size() {
                row[2] = size_w;
                row[3] = size_h;
            }
        }
    }

    bias
}
