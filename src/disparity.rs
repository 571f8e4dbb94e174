//! # General disparity objects
//!
//! This module provides generic disparity traits and structures for use by different algorithms.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::map::map_colors;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Fixed point scale of stored disparities, a stored value `v` is a disparity of `v / 16`.
pub const DISPARITY_SCALE: u16 = 16;

/// Value stored for pixels whose match was rejected.
pub const INVALID_DISPARITY: u16 = u16::MAX;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A 16 bit fixed point disparity map.
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap {
    data: ImageBuffer<Luma<u16>, Vec<u16>>,
}

/// A rectified pair of grayscale images.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub left: GrayImage,
    pub right: GrayImage,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DisparityAlgorithm {
    /// Compute the disparity map of the given stereo frame.
    fn compute(&mut self, frame: &StereoFrame) -> Result<DisparityMap>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl StereoFrame {
    pub fn new(left: GrayImage, right: GrayImage) -> Self {
        Self { left, right }
    }

    pub fn width(&self) -> u32 {
        self.left.width()
    }

    pub fn height(&self) -> u32 {
        self.left.height()
    }
}

impl DisparityMap {
    /// Create a map with every pixel marked invalid.
    pub fn new(width: usize, height: usize) -> Self {
        DisparityMap {
            data: ImageBuffer::from_pixel(
                width as u32,
                height as u32,
                Luma([INVALID_DISPARITY]),
            ),
        }
    }

    /// Wrap raw fixed point values stored row-major.
    pub fn from_raw(width: usize, height: usize, data: Vec<u16>) -> Result<Self> {
        let len = data.len();
        let invalid_len = || {
            Error::Input(format!(
                "disparity map of {}x{} needs {} values, got {}",
                width,
                height,
                width * height,
                len
            ))
        };

        if len != width * height {
            return Err(invalid_len());
        }

        ImageBuffer::from_raw(width as u32, height as u32, data)
            .map(|data| DisparityMap { data })
            .ok_or_else(invalid_len)
    }

    pub fn width(&self) -> usize {
        self.data.width() as usize
    }

    pub fn height(&self) -> usize {
        self.data.height() as usize
    }

    /// Raw fixed point value at the given pixel.
    pub fn raw(&self, x: usize, y: usize) -> u16 {
        self.data.get_pixel(x as u32, y as u32)[0]
    }

    pub fn put(&mut self, x: usize, y: usize, val: u16) {
        self.data.put_pixel(x as u32, y as u32, Luma([val]))
    }

    /// Disparity in pixels, or `None` if the pixel was rejected.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        match self.raw(x, y) {
            INVALID_DISPARITY => None,
            v => Some(v as f32 / DISPARITY_SCALE as f32),
        }
    }

    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.raw(x, y) != INVALID_DISPARITY
    }

    /// Number of rejected pixels.
    pub fn invalid_count(&self) -> usize {
        self.as_slice()
            .iter()
            .filter(|&&v| v == INVALID_DISPARITY)
            .count()
    }

    /// Smallest and largest valid disparity, in pixels.
    pub fn disparity_range(&self) -> Option<(f32, f32)> {
        let (min, max) = self.valid_raw_range()?;
        let scale = DISPARITY_SCALE as f32;
        Some((min as f32 / scale, max as f32 / scale))
    }

    pub fn as_slice(&self) -> &[u16] {
        self.data.as_raw()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u16] {
        &mut self.data
    }

    pub fn as_image(&self) -> &ImageBuffer<Luma<u16>, Vec<u16>> {
        &self.data
    }

    /// Converts the map into a GrayImage of whole pixel disparities, saturating at 255.
    ///
    /// Rejected pixels are black.
    pub fn to_luma(&self) -> GrayImage {
        map_colors(&self.data, |Luma([v]): Luma<u16>| match v {
            INVALID_DISPARITY => Luma([0u8]),
            v => Luma([(v / DISPARITY_SCALE).min(u8::MAX as u16) as u8]),
        })
    }

    /// Converts the map to a GrayImage stretched so that the valid disparities span the full
    /// intensity range. Rejected pixels are black.
    pub fn to_luma_normalised(&self) -> GrayImage {
        let (min, max) = match self.valid_raw_range() {
            Some(range) => range,
            None => return GrayImage::new(self.data.width(), self.data.height()),
        };

        let span = (max - min) as f32;

        map_colors(&self.data, |Luma([v]): Luma<u16>| {
            if v == INVALID_DISPARITY || span == 0.0 {
                Luma([0u8])
            } else {
                Luma([((v - min) as f32 * 255.0 / span).round() as u8])
            }
        })
    }

    fn valid_raw_range(&self) -> Option<(u16, u16)> {
        self.as_slice()
            .iter()
            .copied()
            .filter(|&v| v != INVALID_DISPARITY)
            .fold(None, |range, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_map_is_invalid() {
        let map = DisparityMap::new(3, 2);
        assert_eq!(map.invalid_count(), 6);
        assert_eq!(map.get(2, 1), None);
        assert_eq!(map.disparity_range(), None);
    }

    #[test]
    fn fixed_point_values() {
        let mut map = DisparityMap::new(2, 1);
        map.put(0, 0, 5 * DISPARITY_SCALE);
        map.put(1, 0, 8);

        assert_eq!(map.get(0, 0), Some(5.0));
        assert_eq!(map.get(1, 0), Some(0.5));
        assert_eq!(map.disparity_range(), Some((0.5, 5.0)));
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(DisparityMap::from_raw(2, 2, vec![0; 4]).is_ok());
        assert!(matches!(
            DisparityMap::from_raw(2, 2, vec![0; 3]),
            Err(Error::Input(_))
        ));
        assert!(DisparityMap::from_raw(2, 2, vec![0; 5]).is_err());
    }

    #[test]
    fn luma_conversion() {
        let map = DisparityMap::from_raw(
            4,
            1,
            vec![0, 3 * DISPARITY_SCALE, INVALID_DISPARITY, 300 * DISPARITY_SCALE],
        )
        .unwrap();

        let luma = map.to_luma();
        assert_eq!(luma.as_raw(), &vec![0, 3, 0, 255]);
    }

    #[test]
    fn normalised_luma_stretches_valid_range() {
        let map = DisparityMap::from_raw(
            4,
            1,
            vec![
                2 * DISPARITY_SCALE,
                4 * DISPARITY_SCALE,
                INVALID_DISPARITY,
                6 * DISPARITY_SCALE,
            ],
        )
        .unwrap();

        let luma = map.to_luma_normalised();
        assert_eq!(luma.as_raw(), &vec![0, 128, 0, 255]);

        let empty = DisparityMap::new(2, 2).to_luma_normalised();
        assert!(empty.as_raw().iter().all(|&v| v == 0));
    }
}
