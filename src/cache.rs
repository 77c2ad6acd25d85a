//! Compressed per-run copy of the assembled spectrogram, so a replot doesn't re-parse
//! every sweep file. The container is gzip over bincode.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use bincode::config::standard;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{waterfall::Spectrogram, Error, Result};

#[derive(Serialize, Deserialize)]
struct CachedSpectrogram {
    n_sweeps: usize,
    n_bins: usize,
    /// Row-major `[sweep, bin]`
    spectra: Vec<f64>,
    times: Vec<f64>,
    freqs: Vec<f64>,
}

pub fn save(path: &Path, spectrogram: &Spectrogram) -> Result<()> {
    let cached = CachedSpectrogram {
        n_sweeps: spectrogram.n_sweeps(),
        n_bins: spectrogram.n_bins(),
        spectra: spectrogram.spectra.iter().copied().collect(),
        times: spectrogram.times.to_vec(),
        freqs: spectrogram.freqs.to_vec(),
    };
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
    bincode::serde::encode_into_std_write(&cached, &mut encoder, standard())?;
    encoder.finish()?.flush()?;
    Ok(())
}

pub fn load(path: &Path) -> Result<Spectrogram> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let cached: CachedSpectrogram = bincode::serde::decode_from_std_read(&mut decoder, standard())?;
    if cached.freqs.len() != cached.n_bins {
        return Err(Error::Shape(format!(
            "{} frequencies for {} bins",
            cached.freqs.len(),
            cached.n_bins
        )));
    }
    if cached.times.len() != cached.n_sweeps + 1 {
        return Err(Error::Shape(format!(
            "{} time edges for {} sweeps",
            cached.times.len(),
            cached.n_sweeps
        )));
    }
    let spectra = Array2::from_shape_vec((cached.n_sweeps, cached.n_bins), cached.spectra)
        .map_err(|e| Error::Shape(e.to_string()))?;
    Ok(Spectrogram {
        spectra,
        times: Array1::from(cached.times),
        freqs: Array1::from(cached.freqs),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use ndarray::array;

    use super::*;

    #[test]
    fn test_keeps_nan_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin.gz");
        let spectrogram = Spectrogram {
            spectra: array![[-40.0, -41.0, -42.0], [f64::NAN, f64::NAN, f64::NAN]],
            times: array![0.0, 2.0, 4.0],
            freqs: array![1.0, 2.0, 3.0],
        };
        save(&path, &spectrogram).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.spectra.dim(), (2, 3));
        assert_eq!(loaded.spectra.row(0), spectrogram.spectra.row(0));
        assert!(loaded.spectra.row(1).iter().all(|p| p.is_nan()));
        assert_eq!(loaded.times, spectrogram.times);
        assert_eq!(loaded.freqs, spectrogram.freqs);
    }

    #[test]
    fn test_rejects_short_time_axis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin.gz");
        let spectrogram = Spectrogram {
            spectra: array![[-40.0, -41.0], [-42.0, -43.0]],
            times: array![0.0, 2.0],
            freqs: array![1.0, 2.0],
        };
        save(&path, &spectrogram).unwrap();
        assert!(matches!(load(&path), Err(Error::Shape(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin.gz");
        fs::write(&path, b"definitely not gzip").unwrap();
        assert!(load(&path).is_err());
    }
}
