//! # Semi-global matching pipeline
//!
//! Drives one frame through the execution environment: the images are uploaded, the cost,
//! aggregation and selection kernels are dispatched in order, and the disparity map is read
//! back. Each dispatch completes before the next starts.
//!
//! Device buffers are owned by the pipeline and reused from frame to frame. They are only
//! reallocated when the image size or disparity range changes.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::mem::size_of;
use std::time::Instant;

use image::GrayImage;
use log::{debug, info, warn};

use crate::cost::check_pair;
use crate::device::*;
use crate::disparity::{DisparityAlgorithm, DisparityMap, StereoFrame};
use crate::error::*;
use crate::params::Params;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct SgmPipeline<E: ExecutionEnvironment> {
    env: E,
    params: Params,
    buffers: Option<FrameBuffers>,
}

/// The buffers used by one frame, valid for a fixed image size and disparity range.
#[derive(Debug, Clone, Copy)]
struct FrameBuffers {
    width: usize,
    height: usize,
    max_disparity: usize,
    left: BufferHandle,
    right: BufferHandle,
    costs: BufferHandle,
    aggregated: BufferHandle,
    disparity: BufferHandle,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl<E: ExecutionEnvironment> SgmPipeline<E> {
    /// Create a pipeline with default parameters.
    pub fn new(env: E) -> Self {
        info!("SGM pipeline using {}", env.describe());

        Self {
            env,
            params: Params::default(),
            buffers: None,
        }
    }

    /// Create a pipeline with the given parameters.
    pub fn with_params(env: E, params: Params) -> Result<Self> {
        params.validate()?;
        let mut pipeline = Self::new(env);
        pipeline.params = params;
        Ok(pipeline)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Replace the parameters used by [`DisparityAlgorithm::compute`].
    pub fn set_params(&mut self, params: Params) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    pub fn into_environment(self) -> E {
        self.env
    }

    /// Compute the disparity map of a rectified pair with explicit parameters.
    ///
    /// Inputs are validated before any buffer is touched, so a rejected frame leaves the
    /// buffers of the previous frame intact.
    pub fn process(
        &mut self,
        left: &GrayImage,
        right: &GrayImage,
        params: &Params,
    ) -> Result<DisparityMap> {
        let result = self.run_frame(left, right, params);

        if let Err(e) = &result {
            warn!("frame rejected: {}", e);
        }

        result
    }

    /// Release all device buffers. They are allocated again by the next frame.
    ///
    /// Every buffer is released even if one of them fails, the first failure is returned.
    pub fn release_buffers(&mut self) -> Result<()> {
        let buffers = match self.buffers.take() {
            Some(buffers) => buffers,
            None => return Ok(()),
        };

        let mut result = Ok(());
        for handle in buffers.handles() {
            if let Err(e) = self.env.release(handle) {
                warn!("failed to release {}: {}", handle, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        debug!(
            "released buffers for {}x{}x{}",
            buffers.width, buffers.height, buffers.max_disparity
        );
        result
    }

    fn run_frame(
        &mut self,
        left: &GrayImage,
        right: &GrayImage,
        params: &Params,
    ) -> Result<DisparityMap> {
        params.validate()?;
        let (width, height) = check_pair(left, right)?;

        let frame_start = Instant::now();
        let buffers = self.ensure_buffers(width, height, params.max_disparity)?;

        // Image containers may hold more than width * height samples
        let pixels = width * height;
        self.env.upload(&left.as_raw()[..pixels], buffers.left)?;
        self.env.upload(&right.as_raw()[..pixels], buffers.right)?;

        let stages = [
            Kernel::SadCost {
                left: buffers.left,
                right: buffers.right,
                costs: buffers.costs,
                width,
                height,
                half_window_size: params.half_window_size,
                max_disparity: params.max_disparity,
            },
            Kernel::HorizontalAggregation {
                costs: buffers.costs,
                aggregated: buffers.aggregated,
                width,
                height,
                max_disparity: params.max_disparity,
                p1: params.p1,
                p2: params.p2,
            },
            Kernel::BestDisparity {
                aggregated: buffers.aggregated,
                disparity: buffers.disparity,
                width,
                height,
                max_disparity: params.max_disparity,
                uniqueness_ratio: params.uniqueness_ratio,
            },
        ];

        for kernel in stages.iter() {
            let start = Instant::now();
            self.env.dispatch(kernel, kernel.work_shape())?;
            debug!(
                "stage {} took {:.3} ms",
                kernel.name(),
                start.elapsed().as_secs_f64() * 1000.0
            );
        }

        let mut disparities = vec![0u16; width * height];
        self.env.download(
            buffers.disparity,
            bytemuck::cast_slice_mut::<u16, u8>(&mut disparities),
        )?;

        debug!(
            "frame {}x{} with {} disparities took {:.3} ms",
            width,
            height,
            params.max_disparity,
            frame_start.elapsed().as_secs_f64() * 1000.0
        );

        DisparityMap::from_raw(width, height, disparities)
    }

    /// Return buffers for the given frame shape, reusing the current ones when they match.
    fn ensure_buffers(
        &mut self,
        width: usize,
        height: usize,
        max_disparity: usize,
    ) -> Result<FrameBuffers> {
        if let Some(buffers) = self.buffers {
            if buffers.fits(width, height, max_disparity) {
                return Ok(buffers);
            }
            self.release_buffers()?;
        }

        let pixels = width * height;
        let volume_bytes = pixels * max_disparity * size_of::<f32>();

        let sizes = [
            (pixels, AccessMode::HostReadOnly),
            (pixels, AccessMode::HostReadOnly),
            (volume_bytes, AccessMode::ReadWrite),
            (volume_bytes, AccessMode::ReadWrite),
            (pixels * size_of::<u16>(), AccessMode::DeviceWriteOnly),
        ];

        let mut handles = Vec::with_capacity(sizes.len());
        for &(size, mode) in sizes.iter() {
            match self.env.allocate(size, mode) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in handles {
                        // The allocation error is the one worth reporting
                        let _ = self.env.release(handle);
                    }
                    return Err(e);
                }
            }
        }

        let buffers = FrameBuffers {
            width,
            height,
            max_disparity,
            left: handles[0],
            right: handles[1],
            costs: handles[2],
            aggregated: handles[3],
            disparity: handles[4],
        };

        info!(
            "allocated frame buffers for {}x{} with {} disparities ({:.1} MB of cost volumes)",
            width,
            height,
            max_disparity,
            (2 * volume_bytes) as f64 / (1024.0 * 1024.0)
        );

        self.buffers = Some(buffers);
        Ok(buffers)
    }
}

impl<E: ExecutionEnvironment> DisparityAlgorithm for SgmPipeline<E> {
    /// Compute the disparity map for the given frame with the stored parameters.
    fn compute(&mut self, frame: &StereoFrame) -> Result<DisparityMap> {
        let params = self.params;
        self.process(&frame.left, &frame.right, &params)
    }
}

impl FrameBuffers {
    fn fits(&self, width: usize, height: usize, max_disparity: usize) -> bool {
        self.width == width && self.height == height && self.max_disparity == max_disparity
    }

    fn handles(&self) -> [BufferHandle; 5] {
        [
            self.left,
            self.right,
            self.costs,
            self.aggregated,
            self.disparity,
        ]
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
