//! Waterfall reconstruction.
//!
//! A run's sweep files are stacked into a `[sweep, bin]` spectrogram, and for every sweep we
//! find where the signal sits (fixed, span center, or a tracked power centroid), cut a window
//! around it, and derive the peak-to-floor SNR and the power-weighted mean frequency.

use std::{fmt, str::FromStr};

use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use tracing::{debug, info, warn};

use crate::{
    archive::{parse_sweep, read_log, ParsedSweep, Run},
    cache, nan_max, nan_min, Error, Result,
};

/// Power over time and frequency for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    /// dBm, indexed `[sweep, bin]`
    pub spectra: Array2<f64>,
    /// Seconds since the first sweep. Holds one more entry than there are sweeps, so entry
    /// `i + 1` closes the time slot of sweep `i`.
    pub times: Array1<f64>,
    /// MHz
    pub freqs: Array1<f64>,
}

impl Spectrogram {
    pub fn n_sweeps(&self) -> usize {
        self.spectra.nrows()
    }

    pub fn n_bins(&self) -> usize {
        self.spectra.ncols()
    }

    /// Start time of every sweep
    pub fn sweep_times(&self) -> ArrayView1<'_, f64> {
        self.times.slice(ndarray::s![..self.n_sweeps()])
    }
}

/// Load a run's spectrogram, from the cache unless `reload` is set or the cache is unusable.
/// A fresh parse is written back to the cache.
pub fn load_spectrogram(run: &Run, reload: bool) -> Result<Spectrogram> {
    let cache_path = run.cache_path();
    if !reload && cache_path.exists() {
        match cache::load(&cache_path) {
            Ok(spectrogram) => {
                debug!(?cache_path, "Loaded cached spectrogram");
                return Ok(spectrogram);
            }
            Err(e) => warn!("Ignoring unreadable cache {} - {}", cache_path.display(), e),
        }
    }
    let spectrogram = assemble(run)?;
    if let Err(e) = cache::save(&cache_path, &spectrogram) {
        warn!("Could not write cache {} - {}", cache_path.display(), e);
    }
    Ok(spectrogram)
}

/// Parse every sweep file of a run into a spectrogram
pub fn assemble(run: &Run) -> Result<Spectrogram> {
    let count = run.sweep_count()?;
    if count == 0 {
        return Err(Error::EmptyRun(run.dir()));
    }
    let log = read_log(&run.log_path())?;

    // The most recent sweep that parsed. Every row is checked against it, and its
    // frequency axis becomes the spectrogram's.
    let mut last_good: Option<ParsedSweep> = None;
    // `None` for sweeps that are missing or unreadable
    let mut rows: Vec<Option<Vec<f64>>> = Vec::with_capacity(count);
    for index in 0..count {
        let path = run.sweep_path(index);
        // A missing file surfaces here as a not-found I/O error
        let parsed = parse_sweep(&path).and_then(|sweep| match &last_good {
            Some(good) if good.powers_dbm.len() != sweep.powers_dbm.len() => {
                Err(Error::MalformedSweep {
                    path: path.clone(),
                    line: 0,
                    reason: format!(
                        "{} points where earlier sweeps have {}",
                        sweep.powers_dbm.len(),
                        good.powers_dbm.len()
                    ),
                })
            }
            _ => Ok(sweep),
        });
        match parsed {
            Ok(sweep) => {
                rows.push(Some(sweep.powers_dbm.clone()));
                last_good = Some(sweep);
            }
            Err(e) => {
                warn!("Could not load sweep {} - {}", index, e);
                rows.push(None);
            }
        }
    }
    let good = last_good.ok_or_else(|| Error::NoReadableSweep(run.dir()))?;
    let n_bins = good.powers_dbm.len();
    let flat: Vec<f64> = rows
        .into_iter()
        .flat_map(|row| row.unwrap_or_else(|| vec![f64::NAN; n_bins]))
        .collect();
    let spectra = Array2::from_shape_vec((count, n_bins), flat)
        .map_err(|e| Error::Shape(e.to_string()))?;
    let times = time_edges(&log.elapsed(), count);
    info!(sweeps = count, bins = n_bins, "Assembled spectrogram");
    Ok(Spectrogram {
        spectra,
        times,
        freqs: Array1::from(good.freqs_mhz),
    })
}

/// The log's elapsed column cut to `n_sweeps + 1` entries. A log that is too short is
/// continued at its last interval.
pub fn time_edges(elapsed: &[f64], n_sweeps: usize) -> Array1<f64> {
    let wanted = n_sweeps + 1;
    let mut times: Vec<f64> = elapsed.iter().copied().take(wanted).collect();
    let step = match times.as_slice() {
        [.., a, b] => b - a,
        _ => 1.0,
    };
    while times.len() < wanted {
        let next = times.last().map_or(0.0, |t| t + step);
        times.push(next);
    }
    Array1::from(times)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn seconds_per_unit(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
        }
    }

    pub fn convert_seconds(self, seconds: f64) -> f64 {
        seconds / self.seconds_per_unit()
    }

    pub fn to_seconds(self, value: f64) -> f64 {
        value * self.seconds_per_unit()
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
        })
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(TimeUnit::Seconds),
            "min" | "mins" | "minute" | "minutes" => Ok(TimeUnit::Minutes),
            "h" | "hr" | "hour" | "hours" => Ok(TimeUnit::Hours),
            _ => Err(Error::UnknownTimeUnit(s.to_owned())),
        }
    }
}

/// Where the integration window is centered for each sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeakCenter {
    /// Fixed frequency in MHz
    Fixed(f64),
    /// Middle of the frequency axis
    SpanCenter,
    /// Power-weighted centroid of each sweep
    Track,
}

impl FromStr for PeakCenter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "track" => Ok(PeakCenter::Track),
            "span-center" | "center-span" | "span" => Ok(PeakCenter::SpanCenter),
            _ => s
                .trim()
                .parse()
                .ok()
                .filter(|f: &f64| f.is_finite())
                .map(PeakCenter::Fixed)
                .ok_or_else(|| Error::UnknownPeakCenter(s.to_owned())),
        }
    }
}

/// Optional bounds for one plot axis; a missing side follows the data
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisLimits {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl AxisLimits {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    /// Range to draw given the extent of the data
    pub fn resolve(&self, data_min: f64, data_max: f64) -> std::ops::Range<f64> {
        let (mut lo, mut hi) = if data_min.is_finite() && data_max.is_finite() {
            (data_min, data_max)
        } else {
            (0.0, 1.0)
        };
        lo = self.lower.unwrap_or(lo);
        hi = self.upper.unwrap_or(hi);
        if hi <= lo {
            // Degenerate data, or limits on one side only that cross the data
            let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.05 };
            match (self.lower, self.upper) {
                (Some(_), None) => hi = lo + pad,
                (None, Some(_)) => lo = hi - pad,
                _ => {
                    lo -= pad;
                    hi += pad;
                }
            }
        }
        lo..hi
    }
}

impl FromStr for AxisLimits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::BadLimits(s.to_owned());
        let (lower, upper) = s.split_once(',').ok_or_else(bad)?;
        let side = |v: &str| -> Result<Option<f64>> {
            match v.trim() {
                "" => Ok(None),
                v => v.parse().map(Some).map_err(|_| bad()),
            }
        };
        Ok(Self {
            lower: side(lower)?,
            upper: side(upper)?,
        })
    }
}

/// Everything that shapes a reconstruction
#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallOptions {
    pub peak_center: PeakCenter,
    /// Width of the integration window in MHz
    pub window_mhz: f64,
    pub time_unit: TimeUnit,
    /// Bins below this frequency (MHz) are ignored when tracking the peak
    pub low_freq_ignore_mhz: f64,
    /// Re-parse the sweep files even if a cache exists
    pub reload: bool,
    /// Shared time axis of all panels
    pub time_limits: AxisLimits,
    /// Frequency axis of the heat map
    pub spectrum_limits: AxisLimits,
    pub snr_limits: AxisLimits,
    pub center_freq_limits: AxisLimits,
}

impl Default for WaterfallOptions {
    fn default() -> Self {
        Self {
            peak_center: PeakCenter::SpanCenter,
            window_mhz: 5.0,
            time_unit: TimeUnit::Seconds,
            low_freq_ignore_mhz: 5.0,
            reload: false,
            time_limits: AxisLimits::default(),
            spectrum_limits: AxisLimits::default(),
            snr_limits: AxisLimits::default(),
            center_freq_limits: AxisLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
}

impl Summary {
    /// Mean and population standard deviation, skipping NaN
    pub fn of<'a>(values: impl IntoIterator<Item = &'a f64>) -> Self {
        let finite: Vec<f64> = values.into_iter().copied().filter(|v| !v.is_nan()).collect();
        if finite.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}

/// Convert dB to linear power
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Window center for every sweep
pub fn peak_centers(
    spectrogram: &Spectrogram,
    mode: PeakCenter,
    low_freq_ignore_mhz: f64,
) -> Array1<f64> {
    let n = spectrogram.n_sweeps();
    match mode {
        PeakCenter::Fixed(f) => Array1::from_elem(n, f),
        PeakCenter::SpanCenter => {
            Array1::from_elem(n, spectrogram.freqs.mean().unwrap_or(f64::NAN))
        }
        PeakCenter::Track => {
            let freqs = &spectrogram.freqs;
            spectrogram
                .spectra
                .axis_iter(Axis(0))
                .map(|row| {
                    let (weighted, total) = row.iter().zip(freqs).fold(
                        (0.0, 0.0),
                        |(weighted, total), (&db, &f)| {
                            let p = if f < low_freq_ignore_mhz {
                                0.0
                            } else {
                                db_to_linear(db)
                            };
                            (weighted + f * p, total + p)
                        },
                    );
                    weighted / total
                })
                .collect()
        }
    }
}

/// dB and linear images with every bin outside `center ± window/2` set to NaN
pub fn windowed(
    spectrogram: &Spectrogram,
    centers: &Array1<f64>,
    window_mhz: f64,
) -> (Array2<f64>, Array2<f64>) {
    let half = 0.5 * window_mhz;
    let mut db = spectrogram.spectra.clone();
    for (mut row, &center) in db.axis_iter_mut(Axis(0)).zip(centers) {
        Zip::from(&mut row)
            .and(&spectrogram.freqs)
            .for_each(|v, &f| {
                // NaN centers fail both comparisons, so the whole row goes
                if !(f >= center - half && f <= center + half) {
                    *v = f64::NAN;
                }
            });
    }
    let linear = db.mapv(db_to_linear);
    (db, linear)
}

/// Peak-to-floor spread of every windowed row
pub fn snr(windowed_db: &Array2<f64>) -> Array1<f64> {
    windowed_db
        .axis_iter(Axis(0))
        .map(|row| nan_max(row.iter()) - nan_min(row.iter()))
        .collect()
}

/// Power-weighted mean frequency of every windowed row; NaN for an empty window
pub fn mean_frequency(windowed_linear: &Array2<f64>, freqs: &Array1<f64>) -> Array1<f64> {
    windowed_linear
        .axis_iter(Axis(0))
        .map(|row| {
            let (weighted, total) = row
                .iter()
                .zip(freqs)
                .filter(|(p, _)| !p.is_nan())
                .fold((0.0, 0.0), |(w, t), (&p, &f)| (w + f * p, t + p));
            weighted / total
        })
        .collect()
}

/// A spectrogram with everything derived from it, ready to draw
#[derive(Debug, Clone)]
pub struct Waterfall {
    pub spectrogram: Spectrogram,
    /// `spectrogram.times` in `time_unit`
    pub times: Array1<f64>,
    pub time_unit: TimeUnit,
    pub centers: Array1<f64>,
    pub window_mhz: f64,
    pub snr: Array1<f64>,
    pub mean_freq: Array1<f64>,
    pub snr_summary: Summary,
    pub freq_summary: Summary,
}

impl Waterfall {
    pub fn new(spectrogram: Spectrogram, options: &WaterfallOptions) -> Self {
        let times = spectrogram
            .times
            .mapv(|t| options.time_unit.convert_seconds(t));
        let centers = peak_centers(
            &spectrogram,
            options.peak_center,
            options.low_freq_ignore_mhz,
        );
        let (db, linear) = windowed(&spectrogram, &centers, options.window_mhz);
        let snr = snr(&db);
        let mean_freq = mean_frequency(&linear, &spectrogram.freqs);
        let snr_summary = Summary::of(&snr);
        let freq_summary = Summary::of(&mean_freq);
        Self {
            spectrogram,
            times,
            time_unit: options.time_unit,
            centers,
            window_mhz: options.window_mhz,
            snr,
            mean_freq,
            snr_summary,
            freq_summary,
        }
    }

    /// Start time of every sweep in `time_unit`
    pub fn sweep_times(&self) -> ArrayView1<'_, f64> {
        self.times.slice(ndarray::s![..self.spectrogram.n_sweeps()])
    }
}
