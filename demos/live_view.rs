//! # Live disparity view
//!
//! Computes the disparity of a stereo pair every frame and shows the left image next to the
//! colour mapped disparity. Usage: `live_view [LEFT RIGHT [PARAMS.json]]`. Without images a
//! synthetic pair is used.
//!
//! Keys: Left/Right change P1, Down/Up change P2, Escape quits.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::time::Instant;

use cv_sgm::prelude::*;
use cv_sgm::timing::FpsCounter;
use image::{GrayImage, Luma};
use minifb::{Key, KeyRepeat, Window, WindowOptions};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const P1_STEP: f32 = 10.0;
const P2_STEP: f32 = 50.0;

// -----------------------------------------------------------------------------------------------
// MAIN
// -----------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let (left, right) = match (args.get(0), args.get(1)) {
        (Some(l), Some(r)) => (image::open(l)?.to_luma8(), image::open(r)?.to_luma8()),
        _ => synthetic_pair(480, 360, 16),
    };

    let mut params = match args.get(2) {
        Some(path) => Params::from_json_file(path)?,
        None => Params::default(),
    };

    let width = left.width() as usize;
    let height = left.height() as usize;

    let mut pipeline = SgmPipeline::new(CpuEnvironment::from_env()?);
    let mut buffer: Vec<u32> = vec![0; 2 * width * height];

    let mut window = Window::new(
        "Disparity",
        2 * width,
        height,
        WindowOptions::default(),
    )?;
    window.set_target_fps(60);

    let mut fps = FpsCounter::new(Instant::now());

    while window.is_open() && !window.is_key_down(Key::Escape) {
        adjust_penalties(&window, &mut params);

        // A rejected frame is logged by the pipeline and skipped
        if let Ok(map) = pipeline.process(&left, &right, &params) {
            let disp = map.to_luma_normalised();

            for y in 0..height {
                for x in 0..width {
                    let l = left.get_pixel(x as u32, y as u32)[0];
                    buffer[y * 2 * width + x] = gray_to_u32(l);

                    let d = disp.get_pixel(x as u32, y as u32)[0];
                    buffer[y * 2 * width + width + x] = if map.is_valid(x, y) {
                        jet(d)
                    } else {
                        0
                    };
                }
            }
        }

        window.update_with_buffer(&buffer, 2 * width, height)?;

        if let Some(rate) = fps.tick(Instant::now()) {
            log::info!("{:.1} FPS (P1 = {}, P2 = {})", rate, params.p1, params.p2);
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn adjust_penalties(window: &Window, params: &mut Params) {
    let mut p1 = params.p1;
    let mut p2 = params.p2;

    if window.is_key_pressed(Key::Right, KeyRepeat::Yes) {
        p1 += P1_STEP;
    }
    if window.is_key_pressed(Key::Left, KeyRepeat::Yes) {
        p1 = (p1 - P1_STEP).max(0.0);
    }
    if window.is_key_pressed(Key::Up, KeyRepeat::Yes) {
        p2 += P2_STEP;
    }
    if window.is_key_pressed(Key::Down, KeyRepeat::Yes) {
        p2 = (p2 - P2_STEP).max(0.0);
    }

    // Keep the penalties ordered rather than letting the frame be rejected
    params.p1 = p1.min(p2);
    params.p2 = p2;
}

fn synthetic_pair(width: u32, height: u32, shift: u32) -> (GrayImage, GrayImage) {
    let texture = |x: u32, y: u32| ((x * 71 + y * 29 + (x * y * 7) % 31) % 256) as u8;
    let left = GrayImage::from_fn(width, height, |x, y| Luma([texture(x, y)]));
    let right = GrayImage::from_fn(width, height, |x, y| Luma([texture(x + shift, y)]));
    (left, right)
}

fn gray_to_u32(v: u8) -> u32 {
    (v as u32) << 16 | (v as u32) << 8 | v as u32
}

/// Jet colour map, blue for small disparities through to red for large ones.
fn jet(v: u8) -> u32 {
    let t = v as f32 / 255.0;
    let channel = |offset: f32| (1.5 - (4.0 * t - offset).abs()).max(0.0).min(1.0);
    let r = (channel(3.0) * 255.0) as u32;
    let g = (channel(2.0) * 255.0) as u32;
    let b = (channel(1.0) * 255.0) as u32;
    r << 16 | g << 8 | b
}
