use chrono::{DateTime, TimeZone};
use std::fmt;
use std::str::FromStr;

pub const SCALE_FACTOR_MIN: f64 = 1.05;
pub const SCALE_FACTOR_MAX: f64 = 1.5;
pub const SCALE_FACTOR_STEP: f64 = 0.05;
pub const MIN_NEIGHBORS_MIN: u32 = 3;
pub const MIN_NEIGHBORS_MAX: u32 = 10;

/// RGB colour of the rectangles drawn around detected faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BoxColor {
    pub const GREEN: BoxColor = BoxColor { r: 0, g: 255, b: 0 };

    pub fn rgb(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for BoxColor {
    fn default() -> Self {
        Self::GREEN
    }
}

/// Accepts `#RRGGBB` or `RRGGBB`, any case.
impl FromStr for BoxColor {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches('#');
        if digits.len() != 6 {
            return Err(ParamError::Color(s.to_string()));
        }
        let mut rgb = [0u8; 3];
        hex::decode_to_slice(digits, &mut rgb).map_err(|_| ParamError::Color(s.to_string()))?;
        Ok(Self {
            r: rgb[0],
            g: rgb[1],
            b: rgb[2],
        })
    }
}

impl fmt::Display for BoxColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", hex::encode(self.rgb()))
    }
}

/// The two cascade knobs plus the box colour, as chosen on the controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    pub color: BoxColor,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            color: BoxColor::GREEN,
        }
    }
}

impl DetectionParams {
    /// Builds params with slider semantics: values snap into range, and the
    /// scale factor snaps onto its 0.05 grid.
    pub fn new(scale_factor: f64, min_neighbors: u32, color: BoxColor) -> Self {
        let scale_factor = if scale_factor.is_finite() {
            snap_scale(scale_factor)
        } else {
            Self::default().scale_factor
        };
        Self {
            scale_factor,
            min_neighbors: min_neighbors.clamp(MIN_NEIGHBORS_MIN, MIN_NEIGHBORS_MAX),
            color,
        }
    }

    /// Parses raw control values as submitted by a form.
    pub fn from_inputs(scale_factor: &str, min_neighbors: &str, color: &str) -> Result<Self, ParamError> {
        let scale: f64 = scale_factor
            .trim()
            .parse()
            .map_err(|_| ParamError::ScaleFactor(scale_factor.to_string()))?;
        if !scale.is_finite() {
            return Err(ParamError::ScaleFactor(scale_factor.to_string()));
        }
        let neighbors: u32 = min_neighbors
            .trim()
            .parse()
            .map_err(|_| ParamError::MinNeighbors(min_neighbors.to_string()))?;
        let color: BoxColor = color.parse()?;
        Ok(Self::new(scale, neighbors, color))
    }
}

fn snap_scale(value: f64) -> f64 {
    let clamped = value.clamp(SCALE_FACTOR_MIN, SCALE_FACTOR_MAX);
    let steps = ((clamped - SCALE_FACTOR_MIN) / SCALE_FACTOR_STEP).round();
    let snapped = SCALE_FACTOR_MIN + steps * SCALE_FACTOR_STEP;
    (snapped * 100.0).round() / 100.0
}

/// Default save name for a capture taken at `now`, e.g. `capture_20240101_120000`.
pub fn default_capture_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    now.format("capture_%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("invalid scale factor: {0:?}")]
    ScaleFactor(String),
    #[error("invalid neighbor count: {0:?}")]
    MinNeighbors(String),
    #[error("invalid colour {0:?}, expected #RRGGBB")]
    Color(String),
}
