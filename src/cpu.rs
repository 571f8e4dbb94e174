//! # CPU execution environment
//!
//! Runs the matching kernels on a private rayon thread pool. Buffers live in host memory as
//! word aligned storage so they can be viewed as bytes, `f32` costs or `u16` disparities.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::env;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use log::{debug, info};

use crate::aggregate::horizontal_pass;
use crate::cost::sad_costs;
use crate::device::*;
use crate::error::*;
use crate::params::{validate_max_disparity, validate_penalties, validate_uniqueness};
use crate::select::winner_take_all;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Environment variable holding the number of worker threads.
pub const THREADS_ENV_VAR: &str = "CV_SGM_THREADS";

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct CpuEnvironment {
    pool: rayon::ThreadPool,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

struct Slot {
    generation: u32,
    buffer: Option<Buffer>,
}

struct Buffer {
    mode: AccessMode,
    size: usize,
    words: Vec<u32>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl CpuEnvironment {
    /// Create an environment using rayon's default number of threads.
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// Create an environment with a fixed number of worker threads.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(Error::Configuration(
                "number of threads must be at least 1".to_string(),
            ));
        }
        Self::build(Some(num_threads))
    }

    /// Create an environment sized by the `CV_SGM_THREADS` environment variable, falling back
    /// to rayon's default when it is not set.
    pub fn from_env() -> Result<Self> {
        Self::build(threads_from_env()?)
    }

    /// Number of buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.slots.iter().filter(|s| s.buffer.is_some()).count()
    }

    fn build(num_threads: Option<usize>) -> Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("sgm-worker-{}", i));
        if let Some(n) = num_threads {
            builder = builder.num_threads(n);
        }

        let pool = builder
            .build()
            .map_err(|e| Error::Resource(format!("failed to build thread pool: {}", e)))?;

        info!(
            "CPU execution environment ready with {} threads",
            pool.current_num_threads()
        );

        Ok(Self {
            pool,
            slots: Vec::new(),
            free: Vec::new(),
        })
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&Buffer> {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.buffer.as_ref())
            .ok_or_else(|| Error::Resource(format!("unknown or released {}", handle)))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut Buffer> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.buffer.as_mut())
            .ok_or_else(|| Error::Resource(format!("unknown or released {}", handle)))
    }

    /// Borrow a kernel input of at least `bytes` bytes.
    fn input(&self, handle: BufferHandle, bytes: usize) -> Result<&Buffer> {
        let buffer = self.buffer(handle)?;
        if buffer.mode == AccessMode::DeviceWriteOnly {
            return Err(Error::Execution(format!(
                "{} is write-only and cannot be read by a kernel",
                handle
            )));
        }
        buffer.check_len(handle, bytes)?;
        Ok(buffer)
    }

    /// Move a kernel output of at least `bytes` bytes out of its slot for the dispatch.
    fn checkout(&mut self, handle: BufferHandle, bytes: usize) -> Result<Buffer> {
        let buffer = self.buffer_mut(handle)?;
        if buffer.mode == AccessMode::HostReadOnly {
            return Err(Error::Execution(format!(
                "{} is read-only and cannot be written by a kernel",
                handle
            )));
        }
        buffer.check_len(handle, bytes)?;

        Ok(Buffer {
            mode: buffer.mode,
            size: buffer.size,
            words: std::mem::take(&mut buffer.words),
        })
    }

    fn checkin(&mut self, handle: BufferHandle, buffer: Buffer) {
        if let Some(slot) = self.slots.get_mut(handle.slot as usize) {
            slot.buffer = Some(buffer);
        }
    }

    /// Run `f` on the pool with the output checked out, restoring it whatever the outcome.
    fn run_with_output<F>(
        &mut self,
        kernel: &Kernel,
        output: BufferHandle,
        bytes: usize,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&Self, &mut Buffer) -> Result<()>,
    {
        let mut out = self.checkout(output, bytes)?;

        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| f(self, &mut out))).unwrap_or_else(|_| {
            Err(Error::Execution(format!(
                "kernel {} panicked",
                kernel.name()
            )))
        });

        self.checkin(output, out);

        debug!(
            "kernel {} finished in {:.3} ms",
            kernel.name(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        result
    }
}

impl ExecutionEnvironment for CpuEnvironment {
    fn describe(&self) -> DeviceInfo {
        DeviceInfo {
            name: "cpu (rayon)".to_string(),
            compute_units: self.pool.current_num_threads(),
        }
    }

    fn allocate(&mut self, size_in_bytes: usize, mode: AccessMode) -> Result<BufferHandle> {
        if size_in_bytes == 0 {
            return Err(Error::Resource("cannot allocate an empty buffer".to_string()));
        }

        let num_words = (size_in_bytes + 3) / 4;
        let mut words = Vec::new();
        words.try_reserve_exact(num_words).map_err(|e| {
            Error::Resource(format!("failed to allocate {} bytes: {}", size_in_bytes, e))
        })?;
        words.resize(num_words, 0u32);

        let buffer = Buffer {
            mode,
            size: size_in_bytes,
            words,
        };

        let handle = match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.buffer = Some(buffer);
                BufferHandle {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    buffer: Some(buffer),
                });
                BufferHandle {
                    slot: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        debug!("allocated {} of {} bytes ({:?})", handle, size_in_bytes, mode);

        Ok(handle)
    }

    fn release(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffer(handle)?;

        let slot = &mut self.slots[handle.slot as usize];
        slot.buffer = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.slot);

        debug!("released {}", handle);
        Ok(())
    }

    fn upload(&mut self, host: &[u8], handle: BufferHandle) -> Result<()> {
        let buffer = self.buffer_mut(handle)?;
        if buffer.mode == AccessMode::DeviceWriteOnly {
            return Err(Error::Resource(format!(
                "cannot upload into write-only {}",
                handle
            )));
        }
        if host.len() != buffer.size {
            return Err(Error::Input(format!(
                "upload of {} bytes into {} of {} bytes",
                host.len(),
                handle,
                buffer.size
            )));
        }

        buffer.bytes_mut().copy_from_slice(host);
        Ok(())
    }

    fn download(&mut self, handle: BufferHandle, host: &mut [u8]) -> Result<()> {
        let buffer = self.buffer(handle)?;
        if buffer.mode == AccessMode::HostReadOnly {
            return Err(Error::Resource(format!(
                "cannot download from read-only {}",
                handle
            )));
        }
        if host.len() != buffer.size {
            return Err(Error::Input(format!(
                "download of {} into {} bytes of host memory",
                handle,
                host.len()
            )));
        }

        host.copy_from_slice(buffer.bytes());
        Ok(())
    }

    fn dispatch(&mut self, kernel: &Kernel, shape: WorkShape) -> Result<()> {
        kernel.check_shape(shape)?;

        match *kernel {
            Kernel::SadCost {
                left,
                right,
                costs,
                width,
                height,
                half_window_size,
                max_disparity,
            } => {
                let pixels = width * height;
                let len = pixels * max_disparity;
                validate_max_disparity(max_disparity)?;
                check_grid(kernel, len)?;
                check_distinct(kernel, &[left, right], costs)?;

                self.run_with_output(kernel, costs, len * 4, |env, out| {
                    let l = env.input(left, pixels)?;
                    let r = env.input(right, pixels)?;
                    env.pool.install(|| {
                        sad_costs(
                            &l.bytes()[..pixels],
                            &r.bytes()[..pixels],
                            width,
                            height,
                            half_window_size,
                            max_disparity,
                            &mut out.floats_mut()[..len],
                        )
                    });
                    Ok(())
                })
            }

            Kernel::HorizontalAggregation {
                costs,
                aggregated,
                width,
                height,
                max_disparity,
                p1,
                p2,
            } => {
                validate_penalties(p1, p2)?;
                let len = width * height * max_disparity;
                check_grid(kernel, len)?;
                check_distinct(kernel, &[costs], aggregated)?;

                self.run_with_output(kernel, aggregated, len * 4, |env, out| {
                    let c = env.input(costs, len * 4)?;
                    env.pool.install(|| {
                        horizontal_pass(
                            &c.floats()[..len],
                            width,
                            max_disparity,
                            p1,
                            p2,
                            &mut out.floats_mut()[..len],
                        )
                    });
                    Ok(())
                })
            }

            Kernel::BestDisparity {
                aggregated,
                disparity,
                width,
                height,
                max_disparity,
                uniqueness_ratio,
            } => {
                let pixels = width * height;
                let len = pixels * max_disparity;
                validate_max_disparity(max_disparity)?;
                validate_uniqueness(uniqueness_ratio)?;
                check_grid(kernel, len)?;
                check_distinct(kernel, &[aggregated], disparity)?;

                self.run_with_output(kernel, disparity, pixels * 2, |env, out| {
                    let a = env.input(aggregated, len * 4)?;
                    env.pool.install(|| {
                        winner_take_all(
                            &a.floats()[..len],
                            width,
                            max_disparity,
                            uniqueness_ratio,
                            &mut out.halves_mut()[..pixels],
                        )
                    });
                    Ok(())
                })
            }
        }
    }
}

impl Buffer {
    fn check_len(&self, handle: BufferHandle, bytes: usize) -> Result<()> {
        if self.size < bytes {
            return Err(Error::Execution(format!(
                "{} holds {} bytes but the kernel needs {}",
                handle, self.size, bytes
            )));
        }
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.size]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..self.size]
    }

    fn floats(&self) -> &[f32] {
        bytemuck::cast_slice::<u32, f32>(&self.words)
    }

    fn floats_mut(&mut self) -> &mut [f32] {
        bytemuck::cast_slice_mut::<u32, f32>(&mut self.words)
    }

    fn halves_mut(&mut self) -> &mut [u16] {
        bytemuck::cast_slice_mut::<u32, u16>(&mut self.words)
    }
}

/// An empty grid has nothing to run and the kernels assume non-empty rows.
fn check_grid(kernel: &Kernel, len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::Execution(format!(
            "kernel {} dispatched over an empty grid",
            kernel.name()
        )));
    }
    Ok(())
}

fn check_distinct(kernel: &Kernel, inputs: &[BufferHandle], output: BufferHandle) -> Result<()> {
    if inputs.contains(&output) {
        return Err(Error::Execution(format!(
            "kernel {} reads and writes {}",
            kernel.name(),
            output
        )));
    }
    Ok(())
}

fn threads_from_env() -> Result<Option<usize>> {
    let raw = match env::var(THREADS_ENV_VAR) {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(Error::Configuration(format!(
                "failed to read {}: {}",
                THREADS_ENV_VAR, e
            )))
        }
    };

    parse_threads(&raw).map(Some)
}

fn parse_threads(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Configuration(format!(
            "{} must be a positive integer, got '{}'",
            THREADS_ENV_VAR, raw
        ))),
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> CpuEnvironment {
        CpuEnvironment::with_threads(2).unwrap()
    }

    #[test]
    fn describes_thread_count() {
        let info = env().describe();
        assert_eq!(info.compute_units, 2);
        assert!(info.to_string().contains("2 compute units"));
    }

    #[test]
    fn upload_download_roundtrip() {
        let mut env = env();
        let h = env.allocate(5, AccessMode::ReadWrite).unwrap();
        env.upload(&[1, 2, 3, 4, 5], h).unwrap();

        let mut out = [0u8; 5];
        env.download(h, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn transfer_size_must_match() {
        let mut env = env();
        let h = env.allocate(4, AccessMode::ReadWrite).unwrap();
        assert!(matches!(env.upload(&[0; 3], h), Err(Error::Input(_))));

        let mut out = [0u8; 8];
        assert!(matches!(env.download(h, &mut out), Err(Error::Input(_))));
    }

    #[test]
    fn access_modes_are_enforced() {
        let mut env = env();
        let input = env.allocate(4, AccessMode::HostReadOnly).unwrap();
        let output = env.allocate(4, AccessMode::DeviceWriteOnly).unwrap();

        let mut out = [0u8; 4];
        assert!(matches!(env.download(input, &mut out), Err(Error::Resource(_))));
        assert!(matches!(env.upload(&[0; 4], output), Err(Error::Resource(_))));
        assert!(env.upload(&[0; 4], input).is_ok());
        assert!(env.download(output, &mut out).is_ok());
    }

    #[test]
    fn released_handles_are_stale() {
        let mut env = env();
        let a = env.allocate(8, AccessMode::ReadWrite).unwrap();
        env.release(a).unwrap();
        assert_eq!(env.live_buffers(), 0);

        // The slot is reused under a new generation
        let b = env.allocate(8, AccessMode::ReadWrite).unwrap();
        assert_eq!(a.slot, b.slot);
        assert_ne!(a, b);

        assert!(matches!(env.upload(&[0; 8], a), Err(Error::Resource(_))));
        assert!(matches!(env.release(a), Err(Error::Resource(_))));
        assert!(env.upload(&[0; 8], b).is_ok());
    }

    #[test]
    fn empty_allocation_fails() {
        assert!(matches!(
            env().allocate(0, AccessMode::ReadWrite),
            Err(Error::Resource(_))
        ));
    }

    #[test]
    fn dispatch_runs_sad_kernel() {
        let mut env = env();
        let (w, h, d) = (4usize, 1usize, 2usize);
        let left = env.allocate(w * h, AccessMode::HostReadOnly).unwrap();
        let right = env.allocate(w * h, AccessMode::HostReadOnly).unwrap();
        let costs = env.allocate(w * h * d * 4, AccessMode::ReadWrite).unwrap();

        env.upload(&[10, 20, 30, 40], left).unwrap();
        env.upload(&[20, 30, 40, 50], right).unwrap();

        let kernel = Kernel::SadCost {
            left,
            right,
            costs,
            width: w,
            height: h,
            half_window_size: 0,
            max_disparity: d,
        };
        env.dispatch(&kernel, kernel.work_shape()).unwrap();

        let mut raw = vec![0u8; w * h * d * 4];
        env.download(costs, &mut raw).unwrap();
        let values: Vec<f32> = raw
            .chunks(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(values, vec![10.0, 255.0, 10.0, 0.0, 10.0, 0.0, 10.0, 0.0]);
    }

    #[test]
    fn dispatch_rejects_misuse() {
        let mut env = env();
        let small = env.allocate(4, AccessMode::ReadWrite).unwrap();
        let costs = env.allocate(64, AccessMode::ReadWrite).unwrap();
        let readonly = env.allocate(64, AccessMode::HostReadOnly).unwrap();

        // Output too small
        let kernel = Kernel::HorizontalAggregation {
            costs,
            aggregated: small,
            width: 4,
            height: 1,
            max_disparity: 4,
            p1: 1.0,
            p2: 2.0,
        };
        assert!(matches!(
            env.dispatch(&kernel, kernel.work_shape()),
            Err(Error::Execution(_))
        ));
        // The failed dispatch left the buffer in place
        assert!(env.upload(&[0; 4], small).is_ok());

        // Output is read-only
        let kernel = Kernel::HorizontalAggregation {
            costs,
            aggregated: readonly,
            width: 4,
            height: 1,
            max_disparity: 4,
            p1: 1.0,
            p2: 2.0,
        };
        assert!(env.dispatch(&kernel, kernel.work_shape()).is_err());

        // Aliased input and output
        let kernel = Kernel::HorizontalAggregation {
            costs,
            aggregated: costs,
            width: 4,
            height: 1,
            max_disparity: 4,
            p1: 1.0,
            p2: 2.0,
        };
        assert!(env.dispatch(&kernel, kernel.work_shape()).is_err());

        // Wrong grid
        let kernel = Kernel::HorizontalAggregation {
            costs,
            aggregated: readonly,
            width: 4,
            height: 1,
            max_disparity: 4,
            p1: 1.0,
            p2: 2.0,
        };
        assert!(env
            .dispatch(&kernel, WorkShape::Pixels { width: 4, height: 1 })
            .is_err());
    }

    #[test]
    fn thread_count_parsing() {
        assert_eq!(parse_threads("4").unwrap(), 4);
        assert_eq!(parse_threads(" 2 ").unwrap(), 2);
        assert!(parse_threads("0").is_err());
        assert!(parse_threads("many").is_err());
        assert!(CpuEnvironment::with_threads(0).is_err());
    }
}
