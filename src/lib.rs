//! # Semi-global matching disparity
//!
//! This crate computes dense disparity maps from rectified stereo pairs with a SAD cost volume,
//! a single left-to-right semi-global matching pass and winner-take-all selection gated by a
//! uniqueness test.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod aggregate;
pub mod block_matching;
pub mod cost;
pub mod cpu;
pub mod device;
mod disparity;
mod error;
mod params;
pub mod pipeline;
pub mod select;
pub mod timing;
mod volume;

#[cfg(feature = "statistics")]
pub mod statistics;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use crate::disparity::{
    DisparityAlgorithm, DisparityMap, StereoFrame, DISPARITY_SCALE, INVALID_DISPARITY,
};
pub use crate::error::{Error, Result};
pub use crate::params::{Params, MAX_DISPARITY_LIMIT};
pub use crate::volume::CostVolume;

pub mod prelude {
    pub use crate::block_matching::{BlockMatcher, BlockParams};
    pub use crate::cpu::CpuEnvironment;
    pub use crate::device::ExecutionEnvironment;
    pub use crate::disparity::{DisparityAlgorithm, DisparityMap, StereoFrame};
    pub use crate::params::Params;
    pub use crate::pipeline::SgmPipeline;
}
