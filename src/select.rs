//! # Disparity selection
//!
//! Winner-take-all selection over an aggregated cost volume, gated by a uniqueness test.
//!
//! For each pixel the lowest disparity `d_min` attaining the minimum cost `L_min` is found,
//! along with the best cost `L_second` among the local minima of the cost curve at least two
//! steps from `d_min`. A local minimum is no more expensive than either neighbour, with
//! neighbours outside the disparity range counting as infinitely expensive. The pixel is
//! accepted if `L_min <= L_second * (1 - u)`. A pixel with no such competitor is accepted.
//! Raising `u` can only reject more pixels.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use rayon::prelude::*;

use crate::disparity::{DisparityMap, DISPARITY_SCALE, INVALID_DISPARITY};
use crate::error::*;
use crate::params::{validate_max_disparity, validate_uniqueness};
use crate::volume::CostVolume;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Minimum distance between the winner and the disparity it is compared against.
const MIN_COMPETITOR_DISTANCE: usize = 2;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Select the best disparity of every pixel.
pub fn select_disparities(aggregated: &CostVolume, uniqueness_ratio: f32) -> Result<DisparityMap> {
    let mut map = DisparityMap::new(aggregated.width(), aggregated.height());
    select_disparities_into(aggregated, uniqueness_ratio, &mut map)?;
    Ok(map)
}

/// Select into an existing map with the volume's dimensions. On error the map is untouched.
pub fn select_disparities_into(
    aggregated: &CostVolume,
    uniqueness_ratio: f32,
    map: &mut DisparityMap,
) -> Result<()> {
    validate_uniqueness(uniqueness_ratio)?;
    validate_max_disparity(aggregated.max_disparity())?;

    if map.width() != aggregated.width() || map.height() != aggregated.height() {
        return Err(Error::Input(format!(
            "disparity map is {}x{} but cost volume is {}x{}",
            map.width(),
            map.height(),
            aggregated.width(),
            aggregated.height()
        )));
    }

    if map.as_slice().is_empty() {
        return Ok(());
    }

    winner_take_all(
        aggregated.as_slice(),
        aggregated.width(),
        aggregated.max_disparity(),
        uniqueness_ratio,
        map.as_mut_slice(),
    );

    Ok(())
}

/// Selection kernel over a raw volume, writing one fixed point disparity per pixel.
///
/// `out` must hold one value per pixel of `costs`, and both must be non-empty.
pub(crate) fn winner_take_all(
    costs: &[f32],
    width: usize,
    max_disparity: usize,
    uniqueness_ratio: f32,
    out: &mut [u16],
) {
    out.par_chunks_mut(width)
        .zip(costs.par_chunks(width * max_disparity))
        .for_each(|(out_row, cost_row)| {
            for (px, pixel_costs) in out_row.iter_mut().zip(cost_row.chunks(max_disparity)) {
                *px = select_pixel(pixel_costs, uniqueness_ratio);
            }
        });
}

/// Fixed point disparity of one pixel, or the invalid sentinel if the match is ambiguous.
fn select_pixel(costs: &[f32], uniqueness_ratio: f32) -> u16 {
    let (d_min, l_min) = costs
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::INFINITY), |(best_d, best), (d, c)| {
            if c < best {
                (d, c)
            } else {
                (best_d, best)
            }
        });

    let l_second = costs
        .iter()
        .enumerate()
        .filter(|&(d, _)| {
            d.abs_diff(d_min) >= MIN_COMPETITOR_DISTANCE && is_local_minimum(costs, d)
        })
        .map(|(_, &c)| c)
        .fold(f32::INFINITY, f32::min);

    if l_second.is_finite() && l_min > l_second * (1.0 - uniqueness_ratio) {
        return INVALID_DISPARITY;
    }

    (d_min as u16) * DISPARITY_SCALE
}

fn is_local_minimum(costs: &[f32], d: usize) -> bool {
    let c = costs[d];
    let below = d.checked_sub(1).map_or(true, |prev| c <= costs[prev]);
    let above = costs.get(d + 1).map_or(true, |&next| c <= next);
    below && above
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn single_pixel(costs: Vec<f32>) -> CostVolume {
        let d = costs.len();
        CostVolume::from_vec(1, 1, d, costs).unwrap()
    }

    #[test]
    fn picks_minimum_scaled() {
        let vol = single_pixel(vec![50.0, 40.0, 10.0, 40.0, 50.0]);
        let map = select_disparities(&vol, 0.1).unwrap();
        assert_eq!(map.raw(0, 0), 2 * DISPARITY_SCALE);
        assert_eq!(map.get(0, 0), Some(2.0));
    }

    #[test]
    fn ties_resolve_to_lowest_disparity() {
        let vol = single_pixel(vec![5.0, 3.0, 9.0, 3.0]);
        let map = select_disparities(&vol, 0.1).unwrap();
        // Competitor at d = 3 has the same cost, so the pick is ambiguous
        assert_eq!(map.raw(0, 0), INVALID_DISPARITY);

        let vol = single_pixel(vec![0.0, 0.0, 0.0, 0.0]);
        let map = select_disparities(&vol, 0.1).unwrap();
        assert_eq!(map.raw(0, 0), 0);
    }

    #[test]
    fn adjacent_disparities_do_not_compete() {
        // The neighbour of the winner is almost as cheap but is ignored
        let vol = single_pixel(vec![100.0, 10.0, 10.5, 100.0]);
        let map = select_disparities(&vol, 0.5).unwrap();
        assert_eq!(map.raw(0, 0), DISPARITY_SCALE);
    }

    #[test]
    fn uniqueness_threshold() {
        // L_min = 80, L_second = 100: accepted while 80 <= 100 * (1 - u), i.e. u <= 0.2
        let vol = single_pixel(vec![80.0, 120.0, 100.0, 120.0]);
        assert_eq!(select_disparities(&vol, 0.15).unwrap().raw(0, 0), 0);
        assert_eq!(
            select_disparities(&vol, 0.25).unwrap().raw(0, 0),
            INVALID_DISPARITY
        );
    }

    #[test]
    fn ratio_of_one_needs_exact_minimum() {
        let vol = single_pixel(vec![0.0, 7.0, 7.0]);
        assert_eq!(select_disparities(&vol, 1.0).unwrap().raw(0, 0), 0);

        let vol = single_pixel(vec![1.0, 7.0, 7.0]);
        assert_eq!(
            select_disparities(&vol, 1.0).unwrap().raw(0, 0),
            INVALID_DISPARITY
        );
    }

    #[test]
    fn rising_flank_is_not_a_competitor() {
        let vol = single_pixel(vec![10.0, 10.5, 11.0, 11.5]);
        assert_eq!(select_disparities(&vol, 0.1).unwrap().raw(0, 0), 0);

        let vol = single_pixel(vec![50.0, 40.0, 12.0, 11.0, 10.0]);
        assert_eq!(
            select_disparities(&vol, 0.5).unwrap().raw(0, 0),
            4 * DISPARITY_SCALE
        );
    }

    #[test]
    fn only_local_minima_compete() {
        // The flank at d = 2 is cheaper than the local minimum at d = 4 but does not compete:
        // accepted while 10 <= 11.8 * (1 - u)
        let vol = single_pixel(vec![10.0, 10.5, 11.0, 12.0, 11.8, 13.0]);
        assert_eq!(select_disparities(&vol, 0.1).unwrap().raw(0, 0), 0);
        assert_eq!(
            select_disparities(&vol, 0.2).unwrap().raw(0, 0),
            INVALID_DISPARITY
        );
    }

    #[test]
    fn no_competitor_is_accepted() {
        let vol = single_pixel(vec![30.0, 20.0]);
        assert_eq!(
            select_disparities(&vol, 1.0).unwrap().raw(0, 0),
            DISPARITY_SCALE
        );
    }

    #[test]
    fn rejects_bad_ratio() {
        let vol = CostVolume::new(2, 2, 3);
        for u in [0.0, 1.5, -0.2] {
            assert!(matches!(
                select_disparities(&vol, u),
                Err(Error::Configuration(_))
            ));
        }
    }

    #[test]
    fn rejects_mismatched_map_without_writing() {
        let vol = CostVolume::new(3, 2, 3);
        let mut map = DisparityMap::new(2, 2);
        map.as_mut_slice().fill(7);
        assert!(matches!(
            select_disparities_into(&vol, 0.1, &mut map),
            Err(Error::Input(_))
        ));
        assert!(map.as_slice().iter().all(|&v| v == 7));
    }
}
