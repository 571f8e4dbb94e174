//! # Execution environment
//!
//! The contract through which the pipeline allocates buffers, moves data to and from them and
//! dispatches the three matching kernels. Dispatch is synchronous: when it returns the kernel
//! has finished for the whole frame, so every dispatch is also a stage barrier.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fmt;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// How a buffer may be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Written by the host, only read by kernels.
    HostReadOnly,

    /// Written by kernels, only read back by the host.
    DeviceWriteOnly,

    /// Read and written by both.
    ReadWrite,
}

/// Grid of work items a kernel is launched over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkShape {
    /// One work item per pixel.
    Pixels { width: usize, height: usize },

    /// One work item per image row.
    Rows { height: usize },
}

/// A kernel together with its argument list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// Raw SAD cost volume of two 8 bit images.
    SadCost {
        left: BufferHandle,
        right: BufferHandle,
        costs: BufferHandle,
        width: usize,
        height: usize,
        half_window_size: usize,
        max_disparity: usize,
    },

    /// Left-to-right aggregation of a cost volume.
    HorizontalAggregation {
        costs: BufferHandle,
        aggregated: BufferHandle,
        width: usize,
        height: usize,
        max_disparity: usize,
        p1: f32,
        p2: f32,
    },

    /// Winner-take-all selection into a 16 bit fixed point disparity map.
    BestDisparity {
        aggregated: BufferHandle,
        disparity: BufferHandle,
        width: usize,
        height: usize,
        max_disparity: usize,
        uniqueness_ratio: f32,
    },
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Opaque handle to a buffer owned by an execution environment.
///
/// Handles are only meaningful to the environment that issued them. Once released, a handle
/// is stale and every use of it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

/// Description of the device behind an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub compute_units: usize,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait ExecutionEnvironment {
    /// Describe the device kernels run on.
    fn describe(&self) -> DeviceInfo;

    /// Allocate a zeroed buffer of the given size.
    fn allocate(&mut self, size_in_bytes: usize, mode: AccessMode) -> Result<BufferHandle>;

    /// Release a buffer, invalidating its handle.
    fn release(&mut self, handle: BufferHandle) -> Result<()>;

    /// Copy host data into a buffer, blocking until complete. Sizes must match exactly.
    fn upload(&mut self, host: &[u8], handle: BufferHandle) -> Result<()>;

    /// Copy a buffer back to the host, blocking until complete. Sizes must match exactly.
    fn download(&mut self, handle: BufferHandle, host: &mut [u8]) -> Result<()>;

    /// Run a kernel over the given work shape, blocking until it has completed.
    fn dispatch(&mut self, kernel: &Kernel, shape: WorkShape) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::SadCost { .. } => "sad_cost",
            Kernel::HorizontalAggregation { .. } => "horizontal_aggregation",
            Kernel::BestDisparity { .. } => "best_disparity",
        }
    }

    /// The work shape the kernel expects to be launched over.
    pub fn work_shape(&self) -> WorkShape {
        match *self {
            Kernel::SadCost { width, height, .. } | Kernel::BestDisparity { width, height, .. } => {
                WorkShape::Pixels { width, height }
            }
            Kernel::HorizontalAggregation { height, .. } => WorkShape::Rows { height },
        }
    }

    /// Reject launches over a grid the kernel was not written for.
    pub fn check_shape(&self, shape: WorkShape) -> Result<()> {
        if shape != self.work_shape() {
            return Err(Error::Execution(format!(
                "kernel {} expects work shape {:?}, got {:?}",
                self.name(),
                self.work_shape(),
                shape
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}.{}", self.slot, self.generation)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} compute units)", self.name, self.compute_units)
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(slot: u32) -> BufferHandle {
        BufferHandle { slot, generation: 0 }
    }

    #[test]
    fn kernels_expect_their_grid() {
        let sad = Kernel::SadCost {
            left: handle(0),
            right: handle(1),
            costs: handle(2),
            width: 8,
            height: 4,
            half_window_size: 1,
            max_disparity: 4,
        };
        assert!(sad.check_shape(WorkShape::Pixels { width: 8, height: 4 }).is_ok());
        assert!(matches!(
            sad.check_shape(WorkShape::Rows { height: 4 }),
            Err(Error::Execution(_))
        ));

        let agg = Kernel::HorizontalAggregation {
            costs: handle(2),
            aggregated: handle(3),
            width: 8,
            height: 4,
            max_disparity: 4,
            p1: 1.0,
            p2: 2.0,
        };
        assert_eq!(agg.work_shape(), WorkShape::Rows { height: 4 });
        assert!(agg.check_shape(WorkShape::Rows { height: 3 }).is_err());
    }
}
