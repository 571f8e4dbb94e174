//! # Cost volumes
//!
//! Dense `width x height x max_disparity` arrays of matching costs. Costs for one pixel are
//! stored contiguously, pixels are stored row-major, so one image row is a single contiguous
//! slice of `width * max_disparity` costs.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A raw or aggregated cost volume.
#[derive(Debug, Clone, PartialEq)]
pub struct CostVolume {
    width: usize,
    height: usize,
    max_disparity: usize,
    data: Vec<f32>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl CostVolume {
    /// Create a zeroed volume.
    pub fn new(width: usize, height: usize, max_disparity: usize) -> Self {
        Self {
            width,
            height,
            max_disparity,
            data: vec![0.0; width * height * max_disparity],
        }
    }

    /// Wrap existing costs laid out as described in the module docs.
    pub fn from_vec(
        width: usize,
        height: usize,
        max_disparity: usize,
        data: Vec<f32>,
    ) -> Result<Self> {
        if data.len() != width * height * max_disparity {
            return Err(Error::Input(format!(
                "cost volume of {}x{}x{} needs {} values, got {}",
                width,
                height,
                max_disparity,
                width * height * max_disparity,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            max_disparity,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn max_disparity(&self) -> usize {
        self.max_disparity
    }

    /// Number of costs in one image row.
    pub fn row_stride(&self) -> usize {
        self.width * self.max_disparity
    }

    pub fn get(&self, x: usize, y: usize, d: usize) -> f32 {
        self.data[self.index(x, y, d)]
    }

    pub fn put(&mut self, x: usize, y: usize, d: usize, val: f32) {
        let idx = self.index(x, y, d);
        self.data[idx] = val;
    }

    /// All costs of pixel `(x, y)`, indexed by disparity.
    pub fn costs(&self, x: usize, y: usize) -> &[f32] {
        let start = self.index(x, y, 0);
        &self.data[start..start + self.max_disparity]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// True if both volumes cover the same pixels and disparities.
    pub fn same_shape(&self, other: &CostVolume) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.max_disparity == other.max_disparity
    }

    fn index(&self, x: usize, y: usize, d: usize) -> usize {
        (y * self.width + x) * self.max_disparity + d
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_pixel_major() {
        let mut vol = CostVolume::new(3, 2, 4);
        vol.put(1, 1, 2, 7.0);

        assert_eq!(vol.as_slice()[(1 * 3 + 1) * 4 + 2], 7.0);
        assert_eq!(vol.costs(1, 1), &[0.0, 0.0, 7.0, 0.0]);
        assert_eq!(vol.row_stride(), 12);
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(CostVolume::from_vec(2, 2, 2, vec![0.0; 8]).is_ok());
        assert!(matches!(
            CostVolume::from_vec(2, 2, 2, vec![0.0; 7]),
            Err(Error::Input(_))
        ));
    }
}
