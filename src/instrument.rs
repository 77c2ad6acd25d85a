//! SCPI session with a Siglent SSA-series spectrum analyzer.
//!
//! The analyzer speaks a line-oriented request/response protocol. Everything above the
//! [`Transport`] trait is protocol logic; the trait itself is just "send a line, read a line".

use std::{
    io::{BufRead, BufReader, ErrorKind, Write},
    net::{TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{archive::timestamp_now, linspace, settings::InstrumentSettings, Error, Result};

const IDENTIFY: &str = "*IDN?";
const CONTINUOUS_ON: &str = ":INITiate:CONTinuous ON";
const CONTINUOUS_OFF: &str = ":INITiate:CONTinuous OFF";
const TRIGGER: &str = ":INITiate:IMMediate";
const OPERATION_COMPLETE: &str = "*OPC?";
const TRACE_DATA: &str = ":TRACe:DATA? 1";
const START_FREQ: &str = ":FREQuency:STARt?";
const STOP_FREQ: &str = ":FREQuency:STOP?";
const RBW: &str = ":SENSe:BWIDth:RESolution?";
const VBW: &str = ":SENSe:BWIDth:VIDeo?";
const REF_LEVEL: &str = ":DISPlay:WINDow:TRACe:Y:SCALe:RLEVel?";
const ATTENUATION: &str = ":SENSe:POWer:RF:ATTenuation?";
const PREAMP: &str = ":SENSe:POWer:RF:GAIN:STATe?";
const AMPLITUDE_UNIT: &str = ":UNIT:POWer?";
const Y_SCALE: &str = ":DISPlay:WINDow:TRACe:Y:SCALe:SPACing?";
const X_SCALE: &str = ":DISPlay:WINDow:TRACe:X:SCALe:SPACing?";
const IMPEDANCE: &str = ":SENSe:CORRection:IMPedance:INPut:MAGNitude?";
const AVERAGES: &str = ":SENSe:AVERage:TRACe1:COUNt?";

/// Model prefix an `*IDN?` reply must contain
const MODEL_FAMILY: &str = "SSA";
/// How many times we read for `*OPC?` before giving up on a sweep
const OPC_ATTEMPTS: u32 = 4;
const OPC_BACKOFF: Duration = Duration::from_millis(50);

/// Line-oriented text link to an instrument
pub trait Transport {
    /// Send one command; the terminator is added here
    fn write(&mut self, command: &str) -> Result<()>;
    /// Read one newline-terminated response
    fn read(&mut self) -> Result<String>;
    /// Throw away input until the link has been quiet for a while, returning how many
    /// complete responses were dropped. Late replies to abandoned queries end up here.
    fn drain(&mut self) -> Result<usize>;
}

/// Raw SCPI over a TCP socket
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    timeout: Duration,
}

impl TcpTransport {
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let addr = address.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, "address did not resolve")
        })?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            timeout,
        })
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn read(&mut self) -> Result<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Err(Error::Disconnected),
            Ok(_) => Ok(line),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(Error::Timeout(self.timeout))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn drain(&mut self) -> Result<usize> {
        // A reply is only considered abandoned once a whole timeout passes without input
        let mut dropped = 0;
        let mut buf = vec![];
        loop {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => break Err(Error::Disconnected),
                Ok(_) if buf.ends_with(b"\n") => dropped += 1,
                Ok(_) => (),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    break Ok(dropped)
                }
                Err(e) => break Err(e.into()),
            }
        }
    }
}

/// Trace and frequency axis of one sweep plus the settings in force when it was taken
#[derive(Debug, Clone)]
pub struct Sweep {
    pub freqs_mhz: Vec<f64>,
    pub powers_dbm: Vec<f64>,
    pub settings: InstrumentSettings,
}

/// Parse the comma-separated trace reply, dropping the empty token after the trailing comma
pub fn parse_trace(raw: &str) -> Result<Vec<f64>> {
    raw.trim()
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse().map_err(|_| Error::BadResponse {
                command: TRACE_DATA.to_owned(),
                response: token.to_owned(),
            })
        })
        .collect()
}

/// Exclusive session with the analyzer. The instrument is held in single-sweep mode while
/// the session lives and put back into continuous sweep when it is dropped.
pub struct SpectrumAnalyzer<T: Transport> {
    transport: T,
    identity: String,
}

impl SpectrumAnalyzer<TcpTransport> {
    /// Connect over the network. Any failure to reach or identify the analyzer is reported
    /// as [`Error::InstrumentNotFound`].
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let not_found = |e: Error| Error::InstrumentNotFound {
            address: address.to_owned(),
            reason: e.to_string(),
        };
        let transport = TcpTransport::connect(address, timeout).map_err(not_found)?;
        Self::open(transport).map_err(|e| match e {
            Error::InstrumentNotFound { .. } => e,
            e => not_found(e),
        })
    }
}

impl<T: Transport> SpectrumAnalyzer<T> {
    /// Identify the instrument and switch it to single-sweep mode
    pub fn open(mut transport: T) -> Result<Self> {
        transport.write(IDENTIFY)?;
        let identity = transport.read()?.trim().to_owned();
        if !identity.contains(MODEL_FAMILY) {
            return Err(Error::InstrumentNotFound {
                address: "transport".to_owned(),
                reason: format!("`{identity}` is not an {MODEL_FAMILY} analyzer"),
            });
        }
        info!(%identity, "Found spectrum analyzer");
        let mut analyzer = Self {
            transport,
            identity,
        };
        analyzer.set_continuous(false)?;
        Ok(analyzer)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn query(&mut self, command: &str) -> Result<String> {
        self.transport.write(command)?;
        Ok(self.transport.read()?.trim_end().to_owned())
    }

    fn query_f64(&mut self, command: &str) -> Result<f64> {
        let response = self.query(command)?;
        response.trim().parse().map_err(|_| Error::BadResponse {
            command: command.to_owned(),
            response,
        })
    }

    pub fn set_continuous(&mut self, on: bool) -> Result<()> {
        self.transport
            .write(if on { CONTINUOUS_ON } else { CONTINUOUS_OFF })
    }

    /// Trigger one sweep and block until the analyzer reports it complete
    pub fn single_sweep(&mut self, settle: Duration) -> Result<()> {
        self.transport.write(TRIGGER)?;
        thread::sleep(settle);
        self.transport.write(OPERATION_COMPLETE)?;
        let mut backoff = OPC_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.transport.read() {
                Ok(_) => return Ok(()),
                Err(Error::Timeout(waited)) if attempt < OPC_ATTEMPTS => {
                    debug!(attempt, ?waited, "Sweep still running");
                    thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn trace(&mut self) -> Result<Vec<f64>> {
        let raw = self.query(TRACE_DATA)?;
        parse_trace(&raw)
    }

    /// Start and stop of the current span in MHz
    pub fn span_mhz(&mut self) -> Result<(f64, f64)> {
        let start = self.query_f64(START_FREQ)? * 1e-6;
        let stop = self.query_f64(STOP_FREQ)? * 1e-6;
        Ok((start, stop))
    }

    pub fn settings(&mut self) -> Result<InstrumentSettings> {
        let captured = timestamp_now();
        let rbw_hz = self.query_f64(RBW)?;
        let vbw_hz = self.query_f64(VBW)?;
        let reference_level = self.query_f64(REF_LEVEL)?;
        let attenuation_db = self.query_f64(ATTENUATION)?;
        let preamp = self.query(PREAMP)?.contains('1');
        let amplitude_unit = self.query(AMPLITUDE_UNIT)?;
        let y_scale = self.query(Y_SCALE)?;
        let x_scale = self.query(X_SCALE)?;
        let impedance = self.query(IMPEDANCE)?;
        let averages = self.query_f64(AVERAGES)?;
        Ok(InstrumentSettings {
            captured,
            rbw_hz,
            vbw_hz,
            reference_level,
            attenuation_db,
            preamp,
            amplitude_unit,
            y_scale,
            x_scale,
            impedance,
            averages,
        })
    }

    /// Take one sweep and read back everything that goes into a sweep file.
    ///
    /// On failure the link is drained before returning, so a reply that shows up late is
    /// not taken as the answer to the next sweep's first query.
    pub fn acquire(&mut self, settle: Duration) -> Result<Sweep> {
        let sweep = self.read_sweep(settle);
        if sweep.is_err() {
            self.resync();
        }
        sweep
    }

    fn resync(&mut self) {
        match self.transport.drain() {
            Ok(0) => debug!("Link quiet after failed sweep"),
            Ok(n) => warn!("Discarded {} stale responses", n),
            Err(e) => warn!("Could not drain the link - {}", e),
        }
    }

    fn read_sweep(&mut self, settle: Duration) -> Result<Sweep> {
        self.single_sweep(settle)?;
        let powers_dbm = self.trace()?;
        let (start, stop) = self.span_mhz()?;
        let freqs_mhz = linspace(start, stop, powers_dbm.len());
        let settings = self.settings()?;
        Ok(Sweep {
            freqs_mhz,
            powers_dbm,
            settings,
        })
    }
}

impl<T: Transport> Drop for SpectrumAnalyzer<T> {
    fn drop(&mut self) {
        match self.set_continuous(true) {
            Ok(()) => info!("Analyzer returned to continuous sweep"),
            Err(e) => warn!("Could not return analyzer to continuous sweep - {}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted stand-in for the analyzer

    use std::{cell::RefCell, collections::VecDeque, rc::Rc, time::Duration};

    use super::*;

    pub(crate) const TIMEOUT: Duration = Duration::from_millis(1);

    pub(crate) struct MockAnalyzer {
        /// Every command written, shared so tests can inspect it after the session is gone
        pub sent: Rc<RefCell<Vec<String>>>,
        pub identity: String,
        /// Replies to the trace query in order; `None` simulates a timeout.
        /// Once exhausted the last reply repeats.
        pub traces: VecDeque<Option<String>>,
        pub span_hz: (f64, f64),
        /// How many `*OPC?` reads time out before the answer arrives
        pub opc_timeouts: usize,
        /// Deliver the next trace reply one read late, after a timeout
        pub late_trace: bool,
        last_trace: Option<String>,
        pending: VecDeque<Result<String>>,
    }

    impl MockAnalyzer {
        pub fn new() -> Self {
            Self {
                sent: Rc::default(),
                identity: "Siglent Technologies,SSA3032X,SSA3XAAQ000000,3.2.2.5.1R1".to_owned(),
                traces: VecDeque::new(),
                span_hz: (1e6, 3e6),
                opc_timeouts: 0,
                late_trace: false,
                last_trace: Some("-10,-20,-30,".to_owned()),
                pending: VecDeque::new(),
            }
        }

        pub fn with_traces<I: IntoIterator<Item = Option<&'static str>>>(traces: I) -> Self {
            let mut mock = Self::new();
            mock.traces = traces.into_iter().map(|t| t.map(str::to_owned)).collect();
            mock
        }

        fn answer(&mut self, command: &str) -> Result<String> {
            let reply = match command {
                IDENTIFY => self.identity.clone(),
                TRACE_DATA => {
                    if let Some(next) = self.traces.pop_front() {
                        self.last_trace = next;
                    }
                    return self
                        .last_trace
                        .clone()
                        .map(|t| t + "\n")
                        .ok_or(Error::Timeout(TIMEOUT));
                }
                START_FREQ => format!("{:e}", self.span_hz.0),
                STOP_FREQ => format!("{:e}", self.span_hz.1),
                RBW | VBW => "1000".to_owned(),
                REF_LEVEL => "0".to_owned(),
                ATTENUATION => "20".to_owned(),
                PREAMP => "0".to_owned(),
                AMPLITUDE_UNIT => "DBM".to_owned(),
                Y_SCALE => "LOGarithmic".to_owned(),
                X_SCALE => "LINear".to_owned(),
                IMPEDANCE => "50".to_owned(),
                AVERAGES => "1".to_owned(),
                _ => "0".to_owned(),
            };
            Ok(reply + "\n")
        }
    }

    impl Transport for MockAnalyzer {
        fn write(&mut self, command: &str) -> Result<()> {
            self.sent.borrow_mut().push(command.to_owned());
            if command == OPERATION_COMPLETE {
                for _ in 0..self.opc_timeouts {
                    self.pending.push_back(Err(Error::Timeout(TIMEOUT)));
                }
                self.pending.push_back(Ok("1\n".to_owned()));
            } else if command == TRACE_DATA && self.late_trace {
                self.late_trace = false;
                let reply = self.answer(command);
                self.pending.push_back(Err(Error::Timeout(TIMEOUT)));
                self.pending.push_back(reply);
            } else if command.contains('?') {
                let reply = self.answer(command);
                self.pending.push_back(reply);
            }
            Ok(())
        }

        fn read(&mut self) -> Result<String> {
            self.pending
                .pop_front()
                .unwrap_or(Err(Error::Timeout(TIMEOUT)))
        }

        fn drain(&mut self) -> Result<usize> {
            let dropped = self.pending.iter().filter(|reply| reply.is_ok()).count();
            self.pending.clear();
            Ok(dropped)
        }
    }
}
