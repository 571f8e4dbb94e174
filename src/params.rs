//! # Pipeline parameters
//!
//! Per-frame tunables of the semi-global matching pipeline. Parameters may change between
//! frames but are fixed for the duration of a single pipeline invocation.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::disparity::DISPARITY_SCALE;
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Largest disparity range whose scaled values still fit below the invalid sentinel.
pub const MAX_DISPARITY_LIMIT: usize = (u16::MAX as usize) / DISPARITY_SCALE as usize;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Radius of the SAD window, the window is `2k + 1` pixels square.
    pub half_window_size: usize,

    /// Exclusive upper bound on the candidate disparities.
    pub max_disparity: usize,

    /// Penalty for a disparity change of one between neighbouring columns.
    pub p1: f32,

    /// Penalty for any larger disparity change.
    pub p2: f32,

    /// Fraction by which the best cost must undercut the runner-up, in `(0, 1]`.
    pub uniqueness_ratio: f32,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            half_window_size: 2,
            max_disparity: 64,
            p1: 100.0,
            p2: 1000.0,
            uniqueness_ratio: 0.1,
        }
    }
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, half_window_size: usize) -> Self {
        self.half_window_size = half_window_size;
        self
    }

    pub fn with_max_disparity(mut self, max_disparity: usize) -> Self {
        self.max_disparity = max_disparity;
        self
    }

    pub fn with_penalties(mut self, p1: f32, p2: f32) -> Self {
        self.p1 = p1;
        self.p2 = p2;
        self
    }

    pub fn with_uniqueness(mut self, uniqueness_ratio: f32) -> Self {
        self.uniqueness_ratio = uniqueness_ratio;
        self
    }

    /// Parse parameters from a JSON document. Missing fields take their default value.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Params = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Load parameters from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    /// Check every parameter used by the three pipeline stages.
    pub fn validate(&self) -> Result<()> {
        validate_max_disparity(self.max_disparity)?;
        validate_penalties(self.p1, self.p2)?;
        validate_uniqueness(self.uniqueness_ratio)
    }
}

/// The disparity range must be non-empty and small enough for the fixed point map.
pub(crate) fn validate_max_disparity(max_disparity: usize) -> Result<()> {
    if max_disparity == 0 {
        return Err(Error::Configuration(
            "max_disparity must be greater than zero".to_string(),
        ));
    }
    if max_disparity > MAX_DISPARITY_LIMIT {
        return Err(Error::Configuration(format!(
            "max_disparity must be at most {}, got {}",
            MAX_DISPARITY_LIMIT, max_disparity
        )));
    }
    Ok(())
}

/// Penalties must satisfy `p2 >= p1 >= 0`. Violations are rejected, never clamped.
pub(crate) fn validate_penalties(p1: f32, p2: f32) -> Result<()> {
    if p1.is_nan() || p2.is_nan() {
        return Err(Error::Configuration("penalties must not be NaN".to_string()));
    }
    if p1 < 0.0 || p2 < 0.0 {
        return Err(Error::Configuration(format!(
            "penalties must be non-negative, got p1 = {}, p2 = {}",
            p1, p2
        )));
    }
    if p2 < p1 {
        return Err(Error::Configuration(format!(
            "p2 ({}) must not be smaller than p1 ({})",
            p2, p1
        )));
    }
    Ok(())
}

pub(crate) fn validate_uniqueness(uniqueness_ratio: f32) -> Result<()> {
    if !(uniqueness_ratio > 0.0 && uniqueness_ratio <= 1.0) {
        return Err(Error::Configuration(format!(
            "uniqueness_ratio must lie in (0, 1], got {}",
            uniqueness_ratio
        )));
    }
    Ok(())
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(Params::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_penalties() {
        let p = Params::new().with_penalties(-1.0, 10.0);
        assert!(matches!(p.validate(), Err(Error::Configuration(_))));

        let p = Params::new().with_penalties(10.0, 5.0);
        assert!(matches!(p.validate(), Err(Error::Configuration(_))));

        let p = Params::new().with_penalties(f32::NAN, 5.0);
        assert!(p.validate().is_err());

        // Equal penalties are allowed
        assert!(Params::new().with_penalties(7.0, 7.0).validate().is_ok());
    }

    #[test]
    fn rejects_bad_uniqueness() {
        for u in [0.0, -0.5, 1.01, f32::NAN] {
            let p = Params::new().with_uniqueness(u);
            assert!(p.validate().unwrap_err().is_invalid_input(), "u = {}", u);
        }
        assert!(Params::new().with_uniqueness(1.0).validate().is_ok());
    }

    #[test]
    fn rejects_bad_disparity_range() {
        assert!(Params::new().with_max_disparity(0).validate().is_err());
        assert!(Params::new()
            .with_max_disparity(MAX_DISPARITY_LIMIT)
            .validate()
            .is_ok());
        assert!(Params::new()
            .with_max_disparity(MAX_DISPARITY_LIMIT + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let p = Params::from_json_str(r#"{ "p1": 8.0, "p2": 32.0 }"#).unwrap();
        assert_eq!(p.p1, 8.0);
        assert_eq!(p.p2, 32.0);
        assert_eq!(p.max_disparity, 64);
        assert_eq!(p.half_window_size, 2);
    }

    #[test]
    fn invalid_json_values_rejected() {
        let err = Params::from_json_str(r#"{ "p1": 50.0, "p2": 10.0 }"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = Params::from_json_str("not json").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_disparity": 16, "uniqueness_ratio": 0.25 }}"#).unwrap();

        let p = Params::from_json_file(file.path()).unwrap();
        assert_eq!(p.max_disparity, 16);
        assert_eq!(p.uniqueness_ratio, 0.25);

        let missing = Params::from_json_file("/nonexistent/params.json").unwrap_err();
        assert!(matches!(missing, Error::Resource(_)));
    }
}
