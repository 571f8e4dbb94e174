//! # Cost aggregation
//!
//! A single left-to-right semi-global matching pass. For every row the aggregated cost is
//!
//! ```text
//! L(x, d) = C(x, d) + min(L(x-1, d),
//!                         L(x-1, d-1) + P1,
//!                         L(x-1, d+1) + P1,
//!                         min_k L(x-1, k) + P2) - min_k L(x-1, k)
//! ```
//!
//! with `L(0, d) = C(0, d)`. Subtracting the previous column's minimum keeps `L` bounded along
//! long rows. Rows are independent and run in parallel, columns within a row are strictly
//! sequential.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use rayon::prelude::*;

use crate::error::*;
use crate::params::validate_penalties;
use crate::volume::CostVolume;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Aggregate a raw cost volume along image rows.
pub fn aggregate_costs(costs: &CostVolume, p1: f32, p2: f32) -> Result<CostVolume> {
    let mut aggregated = CostVolume::new(costs.width(), costs.height(), costs.max_disparity());
    aggregate_costs_into(costs, p1, p2, &mut aggregated)?;
    Ok(aggregated)
}

/// Aggregate into an existing volume of the same shape. On error the output is untouched.
pub fn aggregate_costs_into(
    costs: &CostVolume,
    p1: f32,
    p2: f32,
    aggregated: &mut CostVolume,
) -> Result<()> {
    validate_penalties(p1, p2)?;

    if !costs.same_shape(aggregated) {
        return Err(Error::Input(format!(
            "aggregated volume is {}x{}x{} but cost volume is {}x{}x{}",
            aggregated.width(),
            aggregated.height(),
            aggregated.max_disparity(),
            costs.width(),
            costs.height(),
            costs.max_disparity()
        )));
    }

    if costs.as_slice().is_empty() {
        return Ok(());
    }

    horizontal_pass(
        costs.as_slice(),
        costs.width(),
        costs.max_disparity(),
        p1,
        p2,
        aggregated.as_mut_slice(),
    );

    Ok(())
}

/// Aggregation kernel over raw volumes.
///
/// `costs` and `out` must be the same non-zero length, a multiple of `width * max_disparity`.
pub(crate) fn horizontal_pass(
    costs: &[f32],
    width: usize,
    max_disparity: usize,
    p1: f32,
    p2: f32,
    out: &mut [f32],
) {
    let stride = width * max_disparity;

    out.par_chunks_mut(stride)
        .zip(costs.par_chunks(stride))
        .for_each(|(out_row, cost_row)| {
            aggregate_row(cost_row, max_disparity, p1, p2, out_row);
        });
}

/// Run the recurrence along one row. The previous column's costs are read back from the
/// already written part of `out`, its minimum is carried in a local.
fn aggregate_row(costs: &[f32], max_disparity: usize, p1: f32, p2: f32, out: &mut [f32]) {
    let d_max = max_disparity;

    out[..d_max].copy_from_slice(&costs[..d_max]);
    let mut prev_min = min_of(&out[..d_max]);

    for x in 1..costs.len() / d_max {
        let (done, rest) = out.split_at_mut(x * d_max);
        let prev = &done[(x - 1) * d_max..];
        let current = &mut rest[..d_max];
        let raw = &costs[x * d_max..(x + 1) * d_max];

        let jump = prev_min + p2;
        let mut current_min = f32::INFINITY;

        for d in 0..d_max {
            let mut best = prev[d].min(jump);
            if d > 0 {
                best = best.min(prev[d - 1] + p1);
            }
            if d + 1 < d_max {
                best = best.min(prev[d + 1] + p1);
            }

            let l = raw[d] + best - prev_min;
            current[d] = l;
            current_min = current_min.min(l);
        }

        prev_min = current_min;
    }
}

fn min_of(values: &[f32]) -> f32 {
    values.iter().copied().fold(f32::INFINITY, f32::min)
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
