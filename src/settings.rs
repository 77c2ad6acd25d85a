//! Snapshot of the analyzer configuration written at the top of every sweep file

use std::fmt;

use chrono::NaiveDateTime;

use crate::archive::TIMESTAMP_FORMAT;

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSettings {
    /// When the settings were read back
    pub captured: NaiveDateTime,
    pub rbw_hz: f64,
    pub vbw_hz: f64,
    pub reference_level: f64,
    pub attenuation_db: f64,
    pub preamp: bool,
    pub amplitude_unit: String,
    pub y_scale: String,
    pub x_scale: String,
    pub impedance: String,
    pub averages: f64,
}

impl fmt::Display for InstrumentSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Current data and time: {}",
            self.captured.format(TIMESTAMP_FORMAT)
        )?;
        writeln!(f, "RBW (Hz): {:.1e} Hz", self.rbw_hz)?;
        writeln!(f, "VBW (Hz): {:.1e} Hz", self.vbw_hz)?;
        writeln!(f, "Reference level: {:.1}", self.reference_level)?;
        writeln!(f, "Attenuation: {:.1}", self.attenuation_db)?;
        writeln!(f, "Pre-amp: {}", if self.preamp { "ON" } else { "OFF" })?;
        writeln!(f, "Amplitude unit: {}", self.amplitude_unit)?;
        writeln!(f, "Y Scale: {}", self.y_scale)?;
        writeln!(f, "X Scale: {}", self.x_scale)?;
        writeln!(f, "Impedance: {}", self.impedance)?;
        writeln!(f, "Averages: {:.0}", self.averages)
    }
}
