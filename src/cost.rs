//! # Matching cost computation
//!
//! Builds the raw cost volume of a rectified stereo pair from the sum of absolute differences
//! (SAD) between a square window around each left pixel and the window displaced by `d` pixels
//! to the left in the right image.
//!
//! ## Border policy
//!
//! Every window sample for which either the left sample `(x + i, y + j)` or the right sample
//! `(x + i - d, y + j)` lies outside the image contributes [`OUT_OF_BOUNDS_PENALTY`] to the sum.
//! The policy is identical at all four image borders, and a cost can never exceed
//! `(2k + 1)^2 * 255`.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;
use rayon::prelude::*;

use crate::error::*;
use crate::params::validate_max_disparity;
use crate::volume::CostVolume;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Cost contributed by a window sample that falls outside either image.
pub const OUT_OF_BOUNDS_PENALTY: u32 = u8::MAX as u32;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Compute the raw cost volume of the given pair.
pub fn compute_costs(
    left: &GrayImage,
    right: &GrayImage,
    half_window_size: usize,
    max_disparity: usize,
) -> Result<CostVolume> {
    let mut volume = CostVolume::new(
        left.width() as usize,
        left.height() as usize,
        max_disparity,
    );
    compute_costs_into(left, right, half_window_size, &mut volume)?;
    Ok(volume)
}

/// Compute the raw cost volume into an existing volume, whose disparity range is used.
///
/// The volume is left untouched if the inputs are rejected.
pub fn compute_costs_into(
    left: &GrayImage,
    right: &GrayImage,
    half_window_size: usize,
    volume: &mut CostVolume,
) -> Result<()> {
    let (width, height) = check_pair(left, right)?;

    if volume.width() != width || volume.height() != height {
        return Err(Error::Input(format!(
            "cost volume is {}x{} but images are {}x{}",
            volume.width(),
            volume.height(),
            width,
            height
        )));
    }

    let max_disparity = volume.max_disparity();
    validate_max_disparity(max_disparity)?;

    sad_costs(
        left.as_raw(),
        right.as_raw(),
        width,
        height,
        half_window_size,
        max_disparity,
        volume.as_mut_slice(),
    );

    Ok(())
}

/// Check that both images are non-empty and share dimensions, returning `(width, height)`.
pub(crate) fn check_pair(left: &GrayImage, right: &GrayImage) -> Result<(usize, usize)> {
    if left.dimensions() != right.dimensions() {
        return Err(Error::Input(format!(
            "left image is {:?} but right image is {:?}",
            left.dimensions(),
            right.dimensions()
        )));
    }

    if left.width() == 0 || left.height() == 0 {
        return Err(Error::Input("images must not be empty".to_string()));
    }

    Ok((left.width() as usize, left.height() as usize))
}

/// SAD cost kernel over raw row-major intensity buffers.
///
/// Inputs must already be validated: both images hold `width * height` samples, `width`,
/// `height` and `max_disparity` are non-zero, and `out` holds
/// `width * height * max_disparity` costs. Each image row is one parallel work unit.
pub(crate) fn sad_costs(
    left: &[u8],
    right: &[u8],
    width: usize,
    height: usize,
    half_window_size: usize,
    max_disparity: usize,
    out: &mut [f32],
) {
    out.par_chunks_mut(width * max_disparity)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, pixel) in row.chunks_mut(max_disparity).enumerate() {
                for (d, cost) in pixel.iter_mut().enumerate() {
                    *cost = window_sad(left, right, width, height, half_window_size, x, y, d);
                }
            }
        });
}

/// SAD between the window at `(x, y)` in the left image and `(x - d, y)` in the right image.
#[allow(clippy::too_many_arguments)]
fn window_sad(
    left: &[u8],
    right: &[u8],
    width: usize,
    height: usize,
    half_window_size: usize,
    x: usize,
    y: usize,
    d: usize,
) -> f32 {
    let k = half_window_size as isize;
    let (w, h) = (width as isize, height as isize);
    let (x, y, d) = (x as isize, y as isize, d as isize);

    let mut acc = 0u64;

    for j in -k..=k {
        let yj = y + j;
        if yj < 0 || yj >= h {
            acc += OUT_OF_BOUNDS_PENALTY as u64 * (2 * k as u64 + 1);
            continue;
        }
        let row = yj as usize * width;

        for i in -k..=k {
            let lx = x + i;
            let rx = lx - d;
            if lx < 0 || lx >= w || rx < 0 || rx >= w {
                acc += OUT_OF_BOUNDS_PENALTY as u64;
                continue;
            }

            let l = left[row + lx as usize];
            let r = right[row + rx as usize];
            acc += l.abs_diff(r) as u64;
        }
    }

    acc as f32
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
