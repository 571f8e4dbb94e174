//! Synthetic stereo pairs shared by the integration tests.

#![allow(dead_code)]

use image::{GrayImage, Luma};

/// Deterministic texture with no repeating pattern over small windows.
pub fn texture(x: u32, y: u32) -> u8 {
    ((x * 71 + y * 29 + (x * y * 7) % 31 + (y * y * 3) % 17) % 256) as u8
}

/// A textured left image and the right image seen `shift` pixels further along, so every left
/// pixel `x` matches right pixel `x - shift`.
pub fn shifted_pair(width: u32, height: u32, shift: u32) -> (GrayImage, GrayImage) {
    let left = GrayImage::from_fn(width, height, |x, y| Luma([texture(x, y)]));
    let right = GrayImage::from_fn(width, height, |x, y| Luma([texture(x + shift, y)]));
    (left, right)
}

pub fn flat(width: u32, height: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([value]))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
