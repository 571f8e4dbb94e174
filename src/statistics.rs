//! # Cost curve plotting
//!
//! Debug plots of the raw and aggregated cost of a single pixel over the disparity range.
//! Only available with the `statistics` feature.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::Path;

use plotters::prelude::*;

use crate::error::*;
use crate::volume::CostVolume;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Plot the raw and aggregated cost curves of pixel `(x, y)` into a PNG at `path`.
pub fn plot_cost_curves(
    raw: &CostVolume,
    aggregated: &CostVolume,
    x: usize,
    y: usize,
    path: &Path,
) -> Result<()> {
    if !raw.same_shape(aggregated) {
        return Err(Error::Input(
            "raw and aggregated volumes differ in shape".to_string(),
        ));
    }
    if x >= raw.width() || y >= raw.height() {
        return Err(Error::Input(format!(
            "pixel ({}, {}) outside {}x{} volume",
            x,
            y,
            raw.width(),
            raw.height()
        )));
    }

    let raw_costs = raw.costs(x, y);
    let agg_costs = aggregated.costs(x, y);

    let mut y_max = raw_costs
        .iter()
        .chain(agg_costs.iter())
        .copied()
        .fold(0.0f32, f32::max)
        * 1.1;
    if y_max <= 0.0 {
        y_max = 1.0;
    }

    let area = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    area.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&area)
        .caption(
            format!("Cost curves at ({}, {})", x, y),
            ("sans-serif", 20).into_font(),
        )
        .margin(5)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0..raw.max_disparity(), 0f32..y_max)
        .map_err(plot_error)?;

    chart.configure_mesh().draw().map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            raw_costs.iter().copied().enumerate(),
            &RED,
        ))
        .map_err(plot_error)?
        .label("Raw cost")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    chart
        .draw_series(LineSeries::new(
            agg_costs.iter().copied().enumerate(),
            &BLUE,
        ))
        .map_err(plot_error)?
        .label("Aggregated cost")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;

    area.present().map_err(plot_error)?;

    log::debug!("cost curves for ({}, {}) written to {:?}", x, y, path);
    Ok(())
}

fn plot_error<E: std::fmt::Display>(e: E) -> Error {
    Error::Resource(format!("plotting failed: {}", e))
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_plot() {
        let data: Vec<f32> = (0..4 * 2 * 8).map(|i| (i % 11) as f32).collect();
        let raw = CostVolume::from_vec(4, 2, 8, data).unwrap();
        let agg = crate::aggregate::aggregate_costs(&raw, 1.0, 4.0).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curves.png");
        plot_cost_curves(&raw, &agg, 2, 1, &path).unwrap();
        assert!(path.exists());

        assert!(plot_cost_curves(&raw, &agg, 4, 0, &path).is_err());
    }
}
