//! The acquisition loop.
//!
//! One iteration triggers a sweep, reads it back, writes the sweep file and appends a log line.
//! Iterations start `delay` apart, measured from the start of the previous one, so a slow
//! sweep eats into the wait rather than pushing every later sweep back.

use std::{
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{info, warn};

use crate::{
    archive::{timestamp_now, write_sweep, LogEntry, Run, RunLog, SweepRecord},
    instrument::{SpectrumAnalyzer, Transport},
    monitoring::AcquisitionStats,
    Error, Result, SETTLE_TIME,
};

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Target time between the starts of consecutive sweeps
    pub delay: Duration,
    /// Stop after this many sweeps, or run until interrupted
    pub iterations: Option<u64>,
    /// Pause between the trigger and the completion query
    pub settle: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            iterations: None,
            settle: SETTLE_TIME,
        }
    }
}

/// Run the loop until the iteration budget is spent or something arrives on `shutdown`.
///
/// A sweep the instrument fails to deliver is written as NaN over the last good frequency axis
/// (or skipped if there is none yet) and the loop carries on. Only disk errors stop the run.
pub fn run_acquisition<T: Transport>(
    analyzer: &mut SpectrumAnalyzer<T>,
    run: &Run,
    config: &AcquisitionConfig,
    shutdown: &Receiver<()>,
) -> Result<AcquisitionStats> {
    let mut log = RunLog::create(run)?;
    let mut stats = AcquisitionStats::default();
    // Zero point of the log's elapsed column, set by the first successful sweep
    let mut zero: Option<Instant> = None;
    // Frequency axis of the last successful sweep
    let mut last_axis: Option<Vec<f64>> = None;
    info!("Saving to {}", run.dir().display());

    let mut index = 0usize;
    loop {
        if config.iterations.map_or(false, |n| index as u64 >= n) {
            break;
        }
        if shutdown_requested(shutdown) {
            break;
        }
        let t0 = Instant::now();

        let outcome = analyzer.acquire(config.settle).and_then(|sweep| match &last_axis {
            // Every sweep of a run shares one length
            Some(axis) if axis.len() != sweep.freqs_mhz.len() => Err(Error::TraceLength {
                expected: axis.len(),
                got: sweep.freqs_mhz.len(),
            }),
            _ => Ok(sweep),
        });
        let now = Instant::now();
        let succeeded = outcome.is_ok();
        if succeeded {
            zero.get_or_insert(now);
        }
        let elapsed = zero.map_or(0.0, |z| (now - z).as_secs_f64());

        let record = match outcome {
            Ok(sweep) => {
                last_axis = Some(sweep.freqs_mhz.clone());
                Some(SweepRecord {
                    index,
                    elapsed,
                    freqs_mhz: sweep.freqs_mhz,
                    powers_dbm: sweep.powers_dbm,
                    settings: Some(sweep.settings),
                })
            }
            Err(e) => {
                warn!("Sweep {} unavailable - {}", index, e);
                let record = last_axis
                    .clone()
                    .map(|axis| SweepRecord::unavailable(index, elapsed, axis));
                if record.is_none() {
                    warn!("No earlier sweep to take a frequency axis from, not writing sweep {index}");
                }
                record
            }
        };
        if let Some(record) = &record {
            write_sweep(&run.sweep_path(index), record)?;
        }
        log.append(&LogEntry {
            index,
            elapsed,
            timestamp: timestamp_now(),
        })?;

        let busy = t0.elapsed();
        stats.record(succeeded, busy, config.delay);
        info!("{:>3} - {:.2} sec", index, busy.as_secs_f64());
        index += 1;

        if config.iterations.map_or(false, |n| index as u64 >= n) {
            break;
        }
        let remaining = (t0 + config.delay).saturating_duration_since(Instant::now());
        match shutdown.recv_timeout(remaining) {
            Ok(()) => {
                info!("Interrupted, stopping after sweep {}", index - 1);
                break;
            }
            Err(RecvTimeoutError::Timeout) => (),
            // Nobody can signal us anymore, just keep time
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep((t0 + config.delay).saturating_duration_since(Instant::now()))
            }
        }
    }
    Ok(stats)
}

fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) => {
            info!("Interrupted, stopping acquisition");
            true
        }
        Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crossbeam_channel::{bounded, never};

    use super::*;
    use crate::{
        archive::{parse_sweep, read_log},
        instrument::mock::MockAnalyzer,
    };

    fn quick(iterations: u64) -> AcquisitionConfig {
        AcquisitionConfig {
            delay: Duration::from_millis(20),
            iterations: Some(iterations),
            settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_three_paced_sweeps() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), "2022-11-07").unwrap();
        let mut analyzer = SpectrumAnalyzer::open(MockAnalyzer::new()).unwrap();
        let config = AcquisitionConfig {
            delay: Duration::from_secs(2),
            iterations: Some(3),
            settle: SETTLE_TIME,
        };
        let start = Instant::now();
        let stats = run_acquisition(&mut analyzer, &run, &config, &never()).unwrap();
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(stats.successes, 3);

        for index in 0..3 {
            let sweep = parse_sweep(&run.sweep_path(index)).unwrap();
            assert_eq!(sweep.freqs_mhz, vec![1.0, 2.0, 3.0]);
            assert_eq!(sweep.powers_dbm, vec![-10.0, -20.0, -30.0]);
        }
        assert!(!run.sweep_path(3).exists());

        let log = read_log(&run.log_path()).unwrap();
        let elapsed = log.elapsed();
        assert_eq!(elapsed.len(), 3);
        assert_eq!(elapsed[0], 0.0);
        assert!(elapsed.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_zero_point_is_first_success() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), "day").unwrap();
        let mock = MockAnalyzer::with_traces([None, Some("-1,-2,-3,")]);
        let mut analyzer = SpectrumAnalyzer::open(mock).unwrap();
        let config = AcquisitionConfig {
            delay: Duration::from_millis(300),
            ..quick(3)
        };
        let stats = run_acquisition(&mut analyzer, &run, &config, &never()).unwrap();
        assert_eq!((stats.successes, stats.failures), (2, 1));

        // Nothing to borrow an axis from on the first attempt
        assert!(!run.sweep_path(0).exists());
        assert!(run.sweep_path(1).exists());

        let entries = read_log(&run.log_path()).unwrap().entries;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].elapsed, 0.0);
        assert_eq!(entries[1].elapsed, 0.0);
        assert!(entries[2].elapsed >= 0.25);
    }

    #[test]
    fn test_failed_sweep_written_as_nan() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), "day").unwrap();
        let mock = MockAnalyzer::with_traces([Some("-5,-6,-7,"), None, Some("-5,-6,-7,")]);
        let mut analyzer = SpectrumAnalyzer::open(mock).unwrap();
        let stats = run_acquisition(&mut analyzer, &run, &quick(3), &never()).unwrap();
        assert_eq!(stats.failures, 1);

        let failed = parse_sweep(&run.sweep_path(1)).unwrap();
        assert_eq!(failed.freqs_mhz, vec![1.0, 2.0, 3.0]);
        assert!(failed.powers_dbm.iter().all(|p| p.is_nan()));
        let after = parse_sweep(&run.sweep_path(2)).unwrap();
        assert_eq!(after.powers_dbm, vec![-5.0, -6.0, -7.0]);
    }

    #[test]
    fn test_resized_trace_written_as_nan() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), "day").unwrap();
        let mock =
            MockAnalyzer::with_traces([Some("-5,-6,-7,"), Some("-5,-6,"), Some("-5,-6,-7,")]);
        let mut analyzer = SpectrumAnalyzer::open(mock).unwrap();
        let stats = run_acquisition(&mut analyzer, &run, &quick(3), &never()).unwrap();
        assert_eq!((stats.successes, stats.failures), (2, 1));

        let resized = parse_sweep(&run.sweep_path(1)).unwrap();
        assert_eq!(resized.freqs_mhz, vec![1.0, 2.0, 3.0]);
        assert!(resized.powers_dbm.iter().all(|p| p.is_nan()));
        let after = parse_sweep(&run.sweep_path(2)).unwrap();
        assert_eq!(after.powers_dbm, vec![-5.0, -6.0, -7.0]);
    }

    #[test]
    fn test_late_reply_does_not_poison_run() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), "day").unwrap();
        let mut mock = MockAnalyzer::new();
        mock.late_trace = true;
        let mut analyzer = SpectrumAnalyzer::open(mock).unwrap();
        let stats = run_acquisition(&mut analyzer, &run, &quick(5), &never()).unwrap();
        assert_eq!((stats.successes, stats.failures), (4, 1));
        for index in 1..5 {
            let sweep = parse_sweep(&run.sweep_path(index)).unwrap();
            assert_eq!(sweep.powers_dbm, vec![-10.0, -20.0, -30.0]);
        }
    }

    #[test]
    fn test_shutdown_stops_loop_and_restores_instrument() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), "day").unwrap();
        let mock = MockAnalyzer::new();
        let sent = mock.sent.clone();
        let (tx, rx) = bounded(1);
        {
            let mut analyzer = SpectrumAnalyzer::open(mock).unwrap();
            let config = AcquisitionConfig {
                delay: Duration::from_secs(60),
                iterations: None,
                settle: Duration::ZERO,
            };
            tx.send(()).unwrap();
            let start = Instant::now();
            let stats = run_acquisition(&mut analyzer, &run, &config, &rx).unwrap();
            assert_eq!(stats.attempts, 0);
            assert!(start.elapsed() < Duration::from_secs(5));
        }
        assert_eq!(
            sent.borrow().last().map(String::as_str),
            Some(":INITiate:CONTinuous ON")
        );
        // The log exists even when no sweep was taken
        let log = fs::read_to_string(run.log_path()).unwrap();
        assert!(log.starts_with("Start time\t"));
    }

    #[test]
    fn test_shutdown_interrupts_wait() {
        let root = tempfile::tempdir().unwrap();
        let run = Run::create(root.path(), "day").unwrap();
        let mut analyzer = SpectrumAnalyzer::open(MockAnalyzer::new()).unwrap();
        let (tx, rx) = bounded(1);
        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            tx.send(()).unwrap();
        });
        let config = AcquisitionConfig {
            delay: Duration::from_secs(60),
            iterations: None,
            settle: Duration::ZERO,
        };
        let start = Instant::now();
        let stats = run_acquisition(&mut analyzer, &run, &config, &rx).unwrap();
        signaller.join().unwrap();
        assert_eq!(stats.attempts, 1);
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
