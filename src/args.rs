//! Argument parsing for running from the command line

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};

use crate::{
    acquire::AcquisitionConfig,
    waterfall::{AxisLimits, PeakCenter, TimeUnit, WaterfallOptions},
    SCPI_PORT,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log sweeps from the analyzer into a new run folder
    Acquire(AcquireArgs),
    /// Rebuild the waterfall figure of a recorded run
    Plot(PlotArgs),
}

#[derive(clap::Args, Debug)]
pub struct AcquireArgs {
    /// Analyzer address, `host` or `host:port`
    #[clap(short, long)]
    pub address: String,
    /// Seconds between the starts of consecutive sweeps
    #[clap(short, long, default_value_t = 2.0, value_parser = non_negative_seconds)]
    pub delay: f64,
    /// Number of sweeps to take (default: until Ctrl-C)
    #[clap(short = 'n', long)]
    pub iterations: Option<u64>,
    /// Directory holding the per-day folders
    #[clap(short, long, default_value = ".")]
    pub root: PathBuf,
    /// Name of the per-day folder (default: today's date)
    #[clap(short, long)]
    pub label: Option<String>,
    /// Seconds to wait for any single instrument response
    #[clap(short, long, default_value_t = 10.0, value_parser = non_negative_seconds)]
    pub timeout: f64,
}

impl AcquireArgs {
    /// `address` with the SCPI port filled in when none was given
    pub fn socket_address(&self) -> String {
        if self.address.contains(':') {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, SCPI_PORT)
        }
    }

    pub fn config(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            delay: Duration::from_secs_f64(self.delay),
            iterations: self.iterations,
            ..AcquisitionConfig::default()
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct PlotArgs {
    /// Directory holding the per-day folders
    #[clap(long, default_value = ".")]
    pub root: PathBuf,
    /// Per-day folder the run lives in
    #[clap(short, long)]
    pub label: String,
    /// Run number
    #[clap(short, long, default_value_t = 1)]
    pub run: u32,
    /// Window center: a frequency in MHz, `span-center`, or `track`
    #[clap(short, long, default_value = "span-center", value_parser = peak_center)]
    pub peak_center: PeakCenter,
    /// Width of the integration window in MHz
    #[clap(short, long, default_value_t = 5.0)]
    pub window: f64,
    /// Unit of the time axis: seconds, minutes or hours
    #[clap(long, default_value = "seconds", value_parser = time_unit)]
    pub time_unit: TimeUnit,
    /// Ignore everything below this frequency (MHz) when tracking the peak
    #[clap(long, default_value_t = 5.0)]
    pub low_freq_ignore: f64,
    /// Re-read the sweep files even if a cached spectrogram exists
    #[clap(long)]
    pub reload: bool,
    /// Time axis limits, `lower,upper`
    #[clap(long, value_parser = axis_limits, allow_hyphen_values = true)]
    pub xlim: Option<AxisLimits>,
    /// Heat map frequency limits in MHz
    #[clap(long, value_parser = axis_limits, allow_hyphen_values = true)]
    pub spectrum_lim: Option<AxisLimits>,
    /// SNR panel limits in dB
    #[clap(long, value_parser = axis_limits, allow_hyphen_values = true)]
    pub snr_lim: Option<AxisLimits>,
    /// Center frequency panel limits in MHz
    #[clap(long, value_parser = axis_limits, allow_hyphen_values = true)]
    pub freq_lim: Option<AxisLimits>,
}

impl PlotArgs {
    pub fn options(&self) -> WaterfallOptions {
        WaterfallOptions {
            peak_center: self.peak_center,
            window_mhz: self.window,
            time_unit: self.time_unit,
            low_freq_ignore_mhz: self.low_freq_ignore,
            reload: self.reload,
            time_limits: self.xlim.unwrap_or_default(),
            spectrum_limits: self.spectrum_lim.unwrap_or_default(),
            snr_limits: self.snr_lim.unwrap_or_default(),
            center_freq_limits: self.freq_lim.unwrap_or_default(),
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn non_negative_seconds(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err("Expected a non-negative number of seconds".to_string()),
    }
}

fn peak_center(s: &str) -> Result<PeakCenter, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

fn time_unit(s: &str) -> Result<TimeUnit, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

fn axis_limits(s: &str) -> Result<AxisLimits, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}
