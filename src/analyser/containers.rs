use crate::error::{Result, SnifferError};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// One demultiplexed TCP segment, as handed over by the capture source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSegment {
    pub source: IpAddr,
    pub destination: IpAddr,
    pub flags: u8,
}

impl TcpSegment {
    pub fn new(source: IpAddr, destination: IpAddr, flags: u8) -> Self {
        Self {
            source,
            destination,
            flags,
        }
    }
}

/// Counters kept for an address suspected of scanning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SuspectEntry {
    pub syn_count: u64,
    pub synack_count: u64,
}

impl SuspectEntry {
    /// Whether the entry still satisfies `syn_count >= synack_count * ratio`.
    pub fn is_suspicious(&self, ratio: Ratio) -> bool {
        (self.syn_count as f64) >= (self.synack_count as f64) * ratio.value()
    }
}

/// SYN to SYN-ACK ratio an address must keep to stay a suspect.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Ratio(f64);

impl Ratio {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(SnifferError::InvalidRatio(value));
        }
        Ok(Ratio(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Ratio(3.0)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Ratio {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: f64 = s.trim().parse().map_err(|e| format!("{e}"))?;
        Ratio::new(value).map_err(|e| e.to_string())
    }
}

/// A flagged address with its final counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Suspect {
    pub address: IpAddr,
    pub syn_count: u64,
    pub synack_count: u64,
}

/// Frame level counters kept by the capture source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub frames_read: u64,
    pub frames_skipped: u64,
    /// Microseconds since the epoch.
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

impl CaptureStats {
    pub fn observe_timestamp(&mut self, micros: i64) {
        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(micros);
        }
        self.last_timestamp = Some(micros);
    }
}

/// Result of a finished analysis run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanReport {
    pub ratio: Ratio,
    pub packets_analyzed: u64,
    /// Sorted by address.
    pub suspects: Vec<Suspect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureStats>,
}

impl ScanReport {
    pub fn with_capture_stats(mut self, stats: CaptureStats) -> Self {
        self.capture = Some(stats);
        self
    }
}
