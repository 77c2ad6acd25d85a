use std::time::Duration;

pub mod acquire;
pub mod archive;
pub mod args;
pub mod cache;
pub mod errors;
pub mod instrument;
pub mod monitoring;
pub mod render;
pub mod settings;
pub mod waterfall;

pub use errors::{Error, Result};

/// Raw SCPI socket port on the SSA3000X family
pub const SCPI_PORT: u16 = 5025;
/// Pause between triggering a sweep and asking whether it finished
pub const SETTLE_TIME: Duration = Duration::from_millis(10);
/// Word that marks the column header line of a sweep file
pub const COLUMN_SENTINEL: &str = "Frequency";
/// How far into a sweep file we look for the column header
pub const HEADER_SCAN_LINES: usize = 100;

/// Linearly spaced values from `start` to `stop` inclusive
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Maximum ignoring NaN, NaN if there is nothing else
pub fn nan_max<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || *v > acc { *v } else { acc })
}

/// Minimum ignoring NaN, NaN if there is nothing else
pub fn nan_min<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || *v < acc { *v } else { acc })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(1.0, 3.0, 3), vec![1.0, 2.0, 3.0]);
        assert_eq!(linspace(5.0, 9.0, 1), vec![5.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_nan_extrema() {
        let v = [f64::NAN, -3.0, 7.5, f64::NAN, 2.0];
        assert_eq!(nan_max(&v), 7.5);
        assert_eq!(nan_min(&v), -3.0);
        assert!(nan_max(&[f64::NAN, f64::NAN]).is_nan());
    }
}
