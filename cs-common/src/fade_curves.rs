//! Fade curves for segment crossfades
//!
//! Consecutive segments overlap by a configured duration. During assembly the
//! tail of the earlier segment fades out while the head of the next one fades
//! in; the curve decides how the two gains evolve across the overlap.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};
use std::str::FromStr;

/// Crossfade curve shapes
///
/// - Linear: gains sum to 1.0 at every point
/// - Exponential: slow start, fast finish for the incoming segment
/// - Logarithmic: fast start, slow finish for the incoming segment
/// - SCurve: smooth acceleration and deceleration
/// - EqualPower: constant perceived loudness across the overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,
    /// v(t) = t²
    Exponential,
    /// v(t) = √t
    Logarithmic,
    /// v(t) = 0.5 × (1 - cos(π × t))
    SCurve,
    /// v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Gain applied to the incoming segment at `position` (0.0 to 1.0)
    pub fn fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Gain applied to the outgoing segment at `position` (0.0 to 1.0)
    ///
    /// Mirror image of [`FadeCurve::fade_in`], so both sides of the overlap
    /// move symmetrically.
    pub fn fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::Logarithmic => (1.0 - t).sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// `(outgoing_gain, incoming_gain)` for one position in the overlap
    pub fn gains(&self, position: f32) -> (f32, f32) {
        (self.fade_out(position), self.fade_in(position))
    }

    /// Canonical configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        }
    }

    /// All curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::Logarithmic,
            FadeCurve::SCurve,
            FadeCurve::EqualPower,
        ]
    }
}

impl FromStr for FadeCurve {
    type Err = crate::Error;

    /// Accepts the canonical names plus `cosine`/`scurve`/`s-curve` for the
    /// S-curve and `equalpower` for equal power (case insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            "s_curve" | "scurve" | "s-curve" | "cosine" => Ok(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Ok(FadeCurve::EqualPower),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown fade curve '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_endpoints() {
        for curve in FadeCurve::all_variants() {
            let (out_start, in_start) = curve.gains(0.0);
            let (out_end, in_end) = curve.gains(1.0);
            assert!((out_start - 1.0).abs() < 1e-4, "{:?} out@0 = {}", curve, out_start);
            assert!(in_start.abs() < 1e-4, "{:?} in@0 = {}", curve, in_start);
            assert!(out_end.abs() < 1e-4, "{:?} out@1 = {}", curve, out_end);
            assert!((in_end - 1.0).abs() < 1e-4, "{:?} in@1 = {}", curve, in_end);
        }
    }

    #[test]
    fn test_linear_gains_sum_to_unity() {
        for step in 0..=10 {
            let t = step as f32 / 10.0;
            let (out, inc) = FadeCurve::Linear.gains(t);
            assert!((out + inc - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_equal_power_is_constant_power() {
        for step in 0..=10 {
            let t = step as f32 / 10.0;
            let (out, inc) = FadeCurve::EqualPower.gains(t);
            assert!((out * out + inc * inc - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_position_is_clamped() {
        assert_eq!(FadeCurve::Linear.fade_in(-3.0), 0.0);
        assert_eq!(FadeCurve::Linear.fade_in(7.0), 1.0);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("cosine".parse::<FadeCurve>().unwrap(), FadeCurve::SCurve);
        assert_eq!("S-Curve".parse::<FadeCurve>().unwrap(), FadeCurve::SCurve);
        assert_eq!("EQUALPOWER".parse::<FadeCurve>().unwrap(), FadeCurve::EqualPower);
        assert!("wobble".parse::<FadeCurve>().is_err());
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for curve in FadeCurve::all_variants() {
            let json = serde_json::to_string(curve).unwrap();
            assert_eq!(json, format!("\"{}\"", curve.as_str()));
        }
    }

    #[test]
    fn test_default_is_linear() {
        assert_eq!(FadeCurve::default(), FadeCurve::Linear);
    }
}
