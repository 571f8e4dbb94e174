//! # Block matching
//!
//! Plain SAD block matching: the raw cost volume goes straight to winner-take-all selection
//! without any aggregation. Cheaper than the SGM pipeline but noisier in weakly textured
//! regions. Uses the same border policy, uniqueness test and output format.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::cost::compute_costs;
use crate::disparity::{DisparityAlgorithm, DisparityMap, StereoFrame};
use crate::error::*;
use crate::params::{validate_max_disparity, validate_uniqueness};
use crate::select::select_disparities;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct BlockMatcher {
    params: BlockParams,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct BlockParams {
    pub half_window_size: usize,
    pub max_disparity: usize,
    pub uniqueness_ratio: f32,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            half_window_size: 2,
            max_disparity: 64,
            uniqueness_ratio: 0.1,
        }
    }
}

impl BlockParams {
    /// Parse parameters from JSON, missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: BlockParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        validate_max_disparity(self.max_disparity)?;
        validate_uniqueness(self.uniqueness_ratio)
    }
}

impl BlockMatcher {
    /// Create a new instance of the algorithm with the given parameters.
    pub fn new(params: BlockParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &BlockParams {
        &self.params
    }
}

impl DisparityAlgorithm for BlockMatcher {
    fn compute(&mut self, frame: &StereoFrame) -> Result<DisparityMap> {
        let costs = compute_costs(
            &frame.left,
            &frame.right,
            self.params.half_window_size,
            self.params.max_disparity,
        )?;

        select_disparities(&costs, self.params.uniqueness_ratio)
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disparity::DISPARITY_SCALE;
    use image::{GrayImage, Luma};

    #[test]
    fn recovers_shift() {
        let shift = 3u32;
        let texture = |x: u32, y: u32| ((x * 71 + y * 29 + (x * y * 7) % 31) % 256) as u8;
        let left = GrayImage::from_fn(32, 12, |x, y| Luma([texture(x, y)]));
        let right = GrayImage::from_fn(32, 12, |x, y| Luma([texture(x + shift, y)]));

        let mut bm = BlockMatcher::new(BlockParams {
            half_window_size: 1,
            max_disparity: 8,
            uniqueness_ratio: 0.05,
        })
        .unwrap();

        let map = bm.compute(&StereoFrame::new(left, right)).unwrap();
        for y in 1..11 {
            for x in 12..31 {
                assert_eq!(map.raw(x, y), shift as u16 * DISPARITY_SCALE, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn params_from_json() {
        let params = BlockParams::from_json_str(r#"{ "max_disparity": 16 }"#).unwrap();
        assert_eq!(
            params,
            BlockParams {
                max_disparity: 16,
                ..Default::default()
            }
        );

        assert!(matches!(
            BlockParams::from_json_str(r#"{ "uniqueness_ratio": 0.0 }"#),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            BlockParams::from_json_str("{ not json"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn rejects_bad_params() {
        assert!(BlockMatcher::new(BlockParams {
            max_disparity: 0,
            ..Default::default()
        })
        .is_err());
        assert!(BlockMatcher::new(BlockParams {
            uniqueness_ratio: 2.0,
            ..Default::default()
        })
        .is_err());
    }
}
