//! Three-panel waterfall figure: heat map with the integration window, SNR, and mean frequency

use std::path::Path;

use plotters::{prelude::*, series::DashedLineSeries};

use crate::{
    nan_max, nan_min,
    waterfall::{Summary, Waterfall, WaterfallOptions},
    Error, Result,
};

const SIZE: (u32, u32) = (1400, 1800);
const COLORBAR_WIDTH: i32 = 150;
const SNR_COLOR: RGBColor = RGBColor(31, 119, 180);
const FREQ_COLOR: RGBColor = RGBColor(255, 127, 14);

/// Anchor points of the inferno colormap, evenly spaced from 0 to 1
const INFERNO: [(u8, u8, u8); 9] = [
    (0, 0, 4),
    (31, 12, 72),
    (85, 15, 109),
    (136, 34, 106),
    (186, 54, 85),
    (227, 89, 51),
    (249, 140, 10),
    (249, 201, 50),
    (252, 255, 164),
];

/// Inferno color for a value scaled to `0..=1`
pub fn inferno(x: f64) -> RGBColor {
    let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
    let pos = x * (INFERNO.len() - 1) as f64;
    let i = (pos.floor() as usize).min(INFERNO.len() - 2);
    let frac = pos - i as f64;
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (a, b) = (INFERNO[i], INFERNO[i + 1]);
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

/// Runs of consecutive finite points, so gaps from missing sweeps stay gaps
pub fn finite_segments(xs: &[f64], ys: &[f64]) -> Vec<Vec<(f64, f64)>> {
    let mut segments = vec![];
    let mut current = vec![];
    for (&x, &y) in xs.iter().zip(ys) {
        if x.is_finite() && y.is_finite() {
            current.push((x, y));
        } else if !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn legend(name: &str, unit: &str, summary: &Summary) -> String {
    format!(
        "{name}: mean={:.2} {unit}, stddev={:.2} {unit}",
        summary.mean, summary.std
    )
}

/// Draw the figure to a PNG at `path`
pub fn render_waterfall(
    waterfall: &Waterfall,
    options: &WaterfallOptions,
    title: &str,
    path: &Path,
) -> Result<()> {
    draw(waterfall, options, title, path).map_err(|e| Error::Render(e.to_string()))
}

fn draw(
    waterfall: &Waterfall,
    options: &WaterfallOptions,
    title: &str,
    path: &Path,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let spectrogram = &waterfall.spectrogram;
    let times = waterfall.times.as_slice().ok_or("time axis is not contiguous")?;
    let sweep_times = &times[..spectrogram.n_sweeps()];
    let freqs = spectrogram.freqs.as_slice().ok_or("frequency axis is not contiguous")?;

    let time_range = options
        .time_limits
        .resolve(nan_min(times), nan_max(times));
    let freq_range = options
        .spectrum_limits
        .resolve(nan_min(freqs), nan_max(freqs));
    let (db_min, db_max) = match (
        nan_min(spectrogram.spectra.iter()),
        nan_max(spectrogram.spectra.iter()),
    ) {
        (lo, hi) if lo.is_finite() && hi.is_finite() => (lo, hi),
        _ => (0.0, 1.0),
    };
    let db_span = if db_max > db_min { db_max - db_min } else { 1.0 };
    let bin_half = if freqs.len() > 1 {
        0.5 * (freqs[freqs.len() - 1] - freqs[0]) / (freqs.len() - 1) as f64
    } else {
        0.5
    };

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(title, ("sans-serif", 32))?;
    let panels = root.split_evenly((3, 1));
    let (heat_area, bar_area) = panels[0].split_horizontally(SIZE.0 as i32 - COLORBAR_WIDTH);

    // Heat map, one cell per sweep and bin spanning that sweep's time slot
    let mut heat = ChartBuilder::on(&heat_area)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(80)
        .build_cartesian_2d(time_range.clone(), freq_range)?;
    heat.configure_mesh()
        .disable_mesh()
        .y_desc("Frequency (MHz)")
        .draw()?;
    heat.draw_series(
        spectrogram
            .spectra
            .indexed_iter()
            .filter(|(_, db)| !db.is_nan())
            .map(|((i, j), &db)| {
                let color = inferno((db - db_min) / db_span);
                Rectangle::new(
                    [
                        (times[i], freqs[j] - bin_half),
                        (times[i + 1], freqs[j] + bin_half),
                    ],
                    color.filled(),
                )
            }),
    )?;
    let half = 0.5 * waterfall.window_mhz;
    let centers = waterfall.centers.to_vec();
    for offset in [half, -half] {
        let edge: Vec<f64> = centers.iter().map(|c| c + offset).collect();
        for segment in finite_segments(sweep_times, &edge) {
            heat.draw_series(DashedLineSeries::new(
                segment,
                6,
                4,
                WHITE.stroke_width(1),
            ))?;
        }
    }

    let mut bar = ChartBuilder::on(&bar_area)
        .margin(10)
        .margin_left(30)
        .x_label_area_size(30)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..1.0, db_min..db_min + db_span)?;
    bar.configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_desc("Power (dBm)")
        .draw()?;
    let steps = 256;
    bar.draw_series((0..steps).map(|k| {
        let lo = db_min + db_span * k as f64 / steps as f64;
        let hi = db_min + db_span * (k + 1) as f64 / steps as f64;
        Rectangle::new(
            [(0.0, lo), (1.0, hi)],
            inferno(k as f64 / (steps - 1) as f64).filled(),
        )
    }))?;

    // SNR
    let snr = waterfall.snr.to_vec();
    let (snr_area, _) = panels[1].split_horizontally(SIZE.0 as i32 - COLORBAR_WIDTH);
    let mut snr_chart = ChartBuilder::on(&snr_area)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(80)
        .build_cartesian_2d(
            time_range.clone(),
            options.snr_limits.resolve(nan_min(&snr), nan_max(&snr)),
        )?;
    snr_chart
        .configure_mesh()
        .light_line_style(&BLACK.mix(0.05))
        .bold_line_style(&BLACK.mix(0.2))
        .y_desc("SNR (dB)")
        .draw()?;
    for (k, segment) in finite_segments(sweep_times, &snr).into_iter().enumerate() {
        let series = snr_chart.draw_series(LineSeries::new(segment, &SNR_COLOR))?;
        if k == 0 {
            series
                .label(legend("Signal-to-noise ratio", "dB", &waterfall.snr_summary))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &SNR_COLOR));
        }
    }
    snr_chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    // Mean frequency
    let mean_freq = waterfall.mean_freq.to_vec();
    let (freq_area, _) = panels[2].split_horizontally(SIZE.0 as i32 - COLORBAR_WIDTH);
    let mut freq_chart = ChartBuilder::on(&freq_area)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(
            time_range,
            options
                .center_freq_limits
                .resolve(nan_min(&mean_freq), nan_max(&mean_freq)),
        )?;
    freq_chart
        .configure_mesh()
        .light_line_style(&BLACK.mix(0.05))
        .bold_line_style(&BLACK.mix(0.2))
        .x_desc(format!("Time ({})", waterfall.time_unit))
        .y_desc("Center frequency (MHz)")
        .draw()?;
    for (k, segment) in finite_segments(sweep_times, &mean_freq)
        .into_iter()
        .enumerate()
    {
        let series = freq_chart.draw_series(LineSeries::new(segment, &FREQ_COLOR))?;
        if k == 0 {
            series
                .label(legend("Frequency", "MHz", &waterfall.freq_summary))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &FREQ_COLOR));
        }
    }
    freq_chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
