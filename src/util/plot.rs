use anyhow::anyhow;
use itertools::{Itertools, MinMaxResult};
use plotters::prelude::*;

fn padded_range(values: impl Iterator<Item = f64>) -> anyhow::Result<std::ops::Range<f64>> {
    match values.minmax() {
        MinMaxResult::MinMax(min, max) => {
            let diff = max - min;
            Ok(min - 0.05 * diff - 0.001..max + 0.05 * diff + 0.001)
        }
        MinMaxResult::OneElement(value) => Ok(value - 0.001..value + 0.001),
        MinMaxResult::NoElements => Err(anyhow!("Cannot plot an empty track")),
    }
}

/// Renders `(latitude, longitude)` points, oldest first, as an SVG track.
pub fn plot_track_svg(points: &[(f64, f64)]) -> anyhow::Result<String> {
    let x_range = padded_range(points.iter().map(|p| p.1))?;
    let y_range = padded_range(points.iter().map(|p| p.0))?;
    let last = points.last().ok_or(anyhow!("Invalid input for plot"))?;

    let mut buf = String::new();

    {
        let root = SVGBackend::with_string(&mut buf, (640, 480)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(x_range, y_range)?;

        chart
            .configure_mesh()
            .x_labels(5)
            .y_labels(5)
            .x_desc("lon")
            .y_desc("lat")
            .draw()?;

        chart.draw_series(LineSeries::new(
            points.iter().map(|&(lat, lon)| (lon, lat)),
            &BLUE,
        ))?;

        chart.draw_series(
            points
                .iter()
                .map(|&(lat, lon)| Circle::new((lon, lat), 3, BLUE.filled())),
        )?;

        chart.draw_series(std::iter::once(Circle::new((last.1, last.0), 6, RED.filled())))?;

        root.present()?;
    }

    Ok(buf)
}
