//! Measured box metrics consumed by every layout component.

use serde::{Deserialize, Serialize};

/// Measured box of one content unit, grid, column or container.
///
/// Produced by an external measurement step; the engine treats every value as
/// an opaque number. All lengths are in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metrics {
    /// Minimum height (CSS `min-height`).
    pub min_height: f32,
    /// Height including border and padding.
    pub outer_height: f32,
    /// Width including border and padding.
    pub outer_width: f32,
    /// Whether the box may be stretched to a new grid height.
    pub flexible: bool,
    /// Content-box height.
    pub height: f32,
    /// Content-box width.
    pub width: f32,
    pub margin_top: f32,
    pub margin_bottom: f32,
    pub border_top: f32,
    pub padding_top: f32,
    pub border_bottom: f32,
    pub padding_bottom: f32,
    /// Computed line height, `0.0` when unknown.
    pub line_height: f32,
    /// Minimum width (CSS `min-width`).
    pub min_width: f32,
    /// Maximum height, `None` when unbounded.
    pub max_height: Option<f32>,
    /// Maximum width, `None` when unbounded.
    pub max_width: Option<f32>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            min_height: 0.0,
            outer_height: 0.0,
            outer_width: 0.0,
            flexible: true,
            height: 0.0,
            width: 0.0,
            margin_top: 0.0,
            margin_bottom: 0.0,
            border_top: 0.0,
            padding_top: 0.0,
            border_bottom: 0.0,
            padding_bottom: 0.0,
            line_height: 0.0,
            min_width: 0.0,
            max_height: None,
            max_width: None,
        }
    }
}

impl Metrics {
    /// Metrics for a plain box of the given outer size with no margins,
    /// borders or padding.
    pub fn sized(outer_width: f32, outer_height: f32) -> Self {
        Self {
            outer_height,
            outer_width,
            height: outer_height,
            width: outer_width,
            ..Self::default()
        }
    }

    /// Border plus padding above the content box.
    pub fn bp_top(&self) -> f32 {
        self.border_top + self.padding_top
    }

    /// Border plus padding below the content box.
    pub fn bp_bottom(&self) -> f32 {
        self.border_bottom + self.padding_bottom
    }

    pub fn bp_height(&self) -> f32 {
        self.bp_top() + self.bp_bottom()
    }

    /// Horizontal border plus padding, derived from outer and content widths.
    pub fn bp_width(&self) -> f32 {
        (self.outer_width - self.width).max(0.0)
    }

    pub fn margin_height(&self) -> f32 {
        self.margin_top + self.margin_bottom
    }

    /// True when any value is negative or non-finite.
    pub fn is_defective(&self) -> bool {
        let lengths = [
            self.min_height,
            self.outer_height,
            self.outer_width,
            self.height,
            self.width,
            self.margin_top,
            self.margin_bottom,
            self.border_top,
            self.padding_top,
            self.border_bottom,
            self.padding_bottom,
            self.line_height,
            self.min_width,
        ];
        lengths.iter().any(|v| !v.is_finite() || *v < 0.0)
            || self.max_height.is_some_and(|v| v.is_nan() || v < 0.0)
            || self.max_width.is_some_and(|v| v.is_nan() || v < 0.0)
    }

    /// Copy with every negative or non-finite length clamped to zero.
    ///
    /// Non-finite maxima are read as "unbounded". The content height is
    /// re-derived when it disagrees with the outer height.
    pub fn sanitized(self) -> Self {
        let mut out = Self {
            min_height: clamp_length(self.min_height),
            outer_height: clamp_length(self.outer_height),
            outer_width: clamp_length(self.outer_width),
            flexible: self.flexible,
            height: clamp_length(self.height),
            width: clamp_length(self.width),
            margin_top: clamp_length(self.margin_top),
            margin_bottom: clamp_length(self.margin_bottom),
            border_top: clamp_length(self.border_top),
            padding_top: clamp_length(self.padding_top),
            border_bottom: clamp_length(self.border_bottom),
            padding_bottom: clamp_length(self.padding_bottom),
            line_height: clamp_length(self.line_height),
            min_width: clamp_length(self.min_width),
            max_height: self.max_height.filter(|v| v.is_finite()).map(clamp_length),
            max_width: self.max_width.filter(|v| v.is_finite()).map(clamp_length),
        };
        if out.height == 0.0 || out.height + out.bp_height() > out.outer_height {
            out.height = (out.outer_height - out.bp_height()).max(0.0);
        }
        out
    }
}

/// Outer size of the page area available to pagination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    pub width: f32,
    pub height: f32,
}

impl PageEnvelope {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: clamp_length(width),
            height: clamp_length(height),
        }
    }
}

/// Round `value` up to the next multiple of `base`.
///
/// Values already on the grid are returned unchanged. A non-positive `base`
/// leaves `value` as is.
pub fn round_up(value: f32, base: f32) -> f32 {
    if !(base > 0.0) || !value.is_finite() {
        return value;
    }
    let rem = value % base;
    if rem == 0.0 {
        value
    } else {
        value - rem + base
    }
}

/// Round `value` down to the previous multiple of `base`.
pub fn round_down(value: f32, base: f32) -> f32 {
    if !(base > 0.0) || !value.is_finite() {
        return value;
    }
    value - value % base
}

pub(crate) fn clamp_length(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_snaps_to_next_multiple() {
        assert_eq!(round_up(0.0, 20.0), 0.0);
        assert_eq!(round_up(20.0, 20.0), 20.0);
        assert_eq!(round_up(21.0, 20.0), 40.0);
        assert_eq!(round_up(7.0, 0.0), 7.0);
        assert_eq!(round_down(39.0, 20.0), 20.0);
    }

    #[test]
    fn sanitized_clamps_defects_to_zero() {
        let m = Metrics {
            outer_height: -4.0,
            margin_top: f32::NAN,
            margin_bottom: f32::INFINITY,
            max_height: Some(f32::INFINITY),
            ..Metrics::default()
        };
        assert!(m.is_defective());
        let clean = m.sanitized();
        assert!(!clean.is_defective());
        assert_eq!(clean.outer_height, 0.0);
        assert_eq!(clean.margin_top, 0.0);
        assert_eq!(clean.margin_bottom, 0.0);
        assert_eq!(clean.max_height, None);
    }

    #[test]
    fn sanitized_rederives_content_height() {
        let m = Metrics {
            outer_height: 60.0,
            padding_top: 10.0,
            border_bottom: 10.0,
            ..Metrics::default()
        };
        assert_eq!(m.sanitized().height, 40.0);
    }

    #[test]
    fn metrics_deserialize_with_defaults() {
        let m: Metrics = serde_json::from_str(r#"{"outerHeight": 40, "marginTop": 20}"#)
            .expect("metrics json should parse");
        assert_eq!(m.outer_height, 40.0);
        assert_eq!(m.margin_top, 20.0);
        assert!(m.flexible);
        assert_eq!(m.max_height, None);
    }
}
