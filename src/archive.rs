//! On-disk layout of an acquisition run.
//!
//! Each run lives in `<root>/<label>/run NNNN/` and holds a running `LOGFILE.txt` plus one
//! `Siglent-data_<label>_NNNN.txt` per sweep. Sweep files come in two dialects: the legacy
//! comma-delimited two-column table, and the current one with a free-text settings block
//! above a whitespace-delimited table.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime, Timelike};
use tracing::{debug, warn};

use crate::{settings::InstrumentSettings, Error, Result, COLUMN_SENTINEL, HEADER_SCAN_LINES};

pub const LOG_FILE_NAME: &str = "LOGFILE.txt";
pub const CACHE_FILE_NAME: &str = "spectrogram.bin.gz";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SWEEP_PREFIX: &str = "Siglent-data";
const LOG_HEADER: &str = "Start time";

pub fn run_folder_name(index: u32) -> String {
    format!("run {index:04}")
}

pub fn sweep_file_name(label: &str, index: usize) -> String {
    format!("{SWEEP_PREFIX}_{label}_{index:04}.txt")
}

/// Current local time without sub-second noise, as written to the archive
pub fn timestamp_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// One acquisition session on disk
#[derive(Debug, Clone)]
pub struct Run {
    /// `<root>/<label>`
    pub base: PathBuf,
    pub label: String,
    /// 1-based run number
    pub index: u32,
    pub created: NaiveDateTime,
}

impl Run {
    /// Create `<root>/<label>` if needed and claim the first unused run folder in it
    pub fn create(root: &Path, label: &str) -> Result<Self> {
        let base = root.join(label);
        fs::create_dir_all(&base)?;
        let mut index = 1;
        while base.join(run_folder_name(index)).is_dir() {
            index += 1;
        }
        fs::create_dir(base.join(run_folder_name(index)))?;
        debug!(?base, index, "Created run folder");
        Ok(Self {
            base,
            label: label.to_owned(),
            index,
            created: timestamp_now(),
        })
    }

    /// Locate an existing run; its creation time comes from the log header
    pub fn open(root: &Path, label: &str, index: u32) -> Result<Self> {
        let base = root.join(label);
        let dir = base.join(run_folder_name(index));
        if !dir.is_dir() {
            return Err(Error::RunNotFound(dir));
        }
        let started = read_log(&dir.join(LOG_FILE_NAME))?.started;
        Ok(Self {
            base,
            label: label.to_owned(),
            index,
            created: started,
        })
    }

    pub fn dir(&self) -> PathBuf {
        self.base.join(run_folder_name(self.index))
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir().join(LOG_FILE_NAME)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir().join(CACHE_FILE_NAME)
    }

    pub fn sweep_path(&self, index: usize) -> PathBuf {
        self.dir().join(sweep_file_name(&self.label, index))
    }

    pub fn title(&self) -> String {
        format!("{} - Run {:04}", self.label, self.index)
    }

    pub fn figure_path(&self) -> PathBuf {
        self.base.join(format!("{}.png", self.title()))
    }

    /// Number of sweep slots in the run: one past the highest index on disk.
    /// Gaps in the numbering are missing sweeps, not a shorter run.
    pub fn sweep_count(&self) -> Result<usize> {
        let dir = self.dir();
        let pattern = dir.join(format!("{SWEEP_PREFIX}_*.txt"));
        let mut count = 0;
        for path in glob::glob(&pattern.to_string_lossy())?.flatten() {
            if let Some(index) = sweep_index(&path) {
                count = count.max(index + 1);
            }
        }
        Ok(count)
    }
}

/// Sweep number encoded in a sweep file name
fn sweep_index(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .rsplit('_')
        .next()?
        .parse()
        .ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub index: usize,
    /// Seconds since the first successful sweep
    pub elapsed: f64,
    pub timestamp: NaiveDateTime,
}

impl LogEntry {
    fn to_line(&self) -> String {
        format!(
            "{}, {:.2}, {}\n",
            self.index,
            self.elapsed,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(3, ',').map(str::trim);
        let index = fields.next()?.parse().ok()?;
        let elapsed = fields.next()?.parse().ok()?;
        let timestamp = NaiveDateTime::parse_from_str(fields.next()?, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            index,
            elapsed,
            timestamp,
        })
    }
}

/// Append-only run log. Every entry is synced before `append` returns.
pub struct RunLog {
    file: File,
}

impl RunLog {
    pub fn create(run: &Run) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(run.log_path())?;
        writeln!(
            file,
            "{LOG_HEADER}\t{}",
            run.created.format(TIMESTAMP_FORMAT)
        )?;
        file.sync_all()?;
        Ok(Self { file })
    }

    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        self.file.write_all(entry.to_line().as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LogContents {
    pub started: NaiveDateTime,
    pub entries: Vec<LogEntry>,
}

impl LogContents {
    pub fn elapsed(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.elapsed).collect()
    }
}

pub fn read_log(path: &Path) -> Result<LogContents> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();
    let header = lines.next().transpose()?.unwrap_or_default();
    let started = header
        .strip_prefix(LOG_HEADER)
        .and_then(|rest| NaiveDateTime::parse_from_str(rest.trim(), TIMESTAMP_FORMAT).ok())
        .ok_or_else(|| Error::MalformedLog {
            path: path.to_owned(),
            reason: format!("expected a `{LOG_HEADER}` header, found {header:?}"),
        })?;
    let mut entries = vec![];
    for (n, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match LogEntry::parse(&line) {
            Some(entry) => entries.push(entry),
            None => warn!(?path, line = n + 2, "Skipping unreadable log line"),
        }
    }
    Ok(LogContents { started, entries })
}

/// One sweep as written to disk
#[derive(Debug, Clone)]
pub struct SweepRecord {
    pub index: usize,
    pub elapsed: f64,
    pub freqs_mhz: Vec<f64>,
    pub powers_dbm: Vec<f64>,
    /// `None` when the sweep could not be read back from the instrument
    pub settings: Option<InstrumentSettings>,
}

impl SweepRecord {
    /// Stand-in for a sweep the instrument failed to deliver
    pub fn unavailable(index: usize, elapsed: f64, freqs_mhz: Vec<f64>) -> Self {
        let powers_dbm = vec![f64::NAN; freqs_mhz.len()];
        Self {
            index,
            elapsed,
            freqs_mhz,
            powers_dbm,
            settings: None,
        }
    }
}

/// Write a sweep in the current dialect
pub fn write_sweep(path: &Path, record: &SweepRecord) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    match &record.settings {
        Some(settings) => write!(out, "{settings}")?,
        None => writeln!(
            out,
            "Sweep {} unavailable at {}",
            record.index,
            timestamp_now().format(TIMESTAMP_FORMAT)
        )?,
    }
    writeln!(out, "\n{COLUMN_SENTINEL}(MHz) Power(dBm)")?;
    for (f, p) in record.freqs_mhz.iter().zip(&record.powers_dbm) {
        writeln!(out, "{f:.6} {p:.4}")?;
    }
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Comma-delimited, data from the first line (after an optional column title)
    Legacy,
    /// Settings block, column title, whitespace-delimited data
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Scanning,
    HeaderFound { data_start: usize },
    Legacy { data_start: usize },
}

/// Work out the dialect and the first data line from the top of a file
fn detect_dialect<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<(Dialect, usize)> {
    let mut state = Scan::Scanning;
    for (n, line) in lines.into_iter().take(HEADER_SCAN_LINES).enumerate() {
        state = match (n, line.contains(COLUMN_SENTINEL)) {
            (0, true) => Scan::Legacy { data_start: 1 },
            (0, false) if parse_row(line, Dialect::Legacy).is_some() => {
                Scan::Legacy { data_start: 0 }
            }
            (_, true) => Scan::HeaderFound { data_start: n + 1 },
            _ => Scan::Scanning,
        };
        if state != Scan::Scanning {
            break;
        }
    }
    match state {
        Scan::Scanning => None,
        Scan::HeaderFound { data_start } => Some((Dialect::Current, data_start)),
        Scan::Legacy { data_start } => Some((Dialect::Legacy, data_start)),
    }
}

fn parse_row(line: &str, dialect: Dialect) -> Option<(f64, f64)> {
    let mut fields: Box<dyn Iterator<Item = &str>> = match dialect {
        Dialect::Legacy => Box::new(line.split(',').map(str::trim)),
        Dialect::Current => Box::new(line.split_whitespace()),
    };
    let freq = fields.next()?.parse().ok()?;
    let power = fields.next()?.parse().ok()?;
    Some((freq, power))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSweep {
    pub dialect: Dialect,
    pub freqs_mhz: Vec<f64>,
    pub powers_dbm: Vec<f64>,
}

pub fn parse_sweep(path: &Path) -> Result<ParsedSweep> {
    let text = fs::read_to_string(path)?;
    let lines: Vec<&str> = text.lines().collect();
    let (dialect, data_start) =
        detect_dialect(lines.iter().copied()).ok_or_else(|| Error::HeaderNotFound {
            path: path.to_owned(),
            lines: HEADER_SCAN_LINES,
        })?;
    let mut freqs_mhz = vec![];
    let mut powers_dbm = vec![];
    for (n, line) in lines.iter().enumerate().skip(data_start) {
        if line.trim().is_empty() {
            continue;
        }
        let (f, p) = parse_row(line, dialect).ok_or_else(|| Error::MalformedSweep {
            path: path.to_owned(),
            line: n + 1,
            reason: format!("expected two numeric columns, found {line:?}"),
        })?;
        freqs_mhz.push(f);
        powers_dbm.push(p);
    }
    Ok(ParsedSweep {
        dialect,
        freqs_mhz,
        powers_dbm,
    })
}
