//! Streaming SYN scan analysis over an ordered sequence of TCP segments.
use super::containers::{Ratio, ScanReport, Suspect, TcpSegment};
use super::flags::{SegmentKind, TcpFlags};
use super::tracker::SuspectTracker;
use super::utils::{CaptureSource, FrameReader};
use crate::error::Result;

/// Runs the analysis over a capture, stopping after `count` TCP segments when
/// given. A capture error aborts the run; the partial result is discarded.
pub fn analyse<R: FrameReader>(
    source: &mut CaptureSource<R>,
    ratio: Ratio,
    count: Option<u64>,
) -> Result<ScanReport> {
    log::info!("Starting analysis.");
    let limit = count.map_or(usize::MAX, |count| count as usize);

    let mut failure = None;
    let segments = source
        .by_ref()
        .take(limit)
        .map_while(|segment| segment.map_err(|err| failure = Some(err)).ok());
    let report = ScanAnalyzer::new(ratio).run(segments);

    if let Some(err) = failure {
        return Err(err);
    }
    if count.is_some_and(|count| report.packets_analyzed >= count) {
        log::info!("Packet limit reached, stopped early.");
    }

    Ok(report.with_capture_stats(source.stats().clone()))
}

/// Folds TCP segments into a [SuspectTracker], one segment at a time.
///
/// The analyzer is `Running` while it is owned by the caller; [ScanAnalyzer::finish]
/// consumes it and freezes the result, so nothing can be processed afterwards.
#[derive(Debug)]
pub struct ScanAnalyzer {
    ratio: Ratio,
    tracker: SuspectTracker,
    packets_analyzed: u64,
}

impl ScanAnalyzer {
    pub fn new(ratio: Ratio) -> Self {
        log::info!("Selected ratio: {ratio}");
        Self {
            ratio,
            tracker: SuspectTracker::new(),
            packets_analyzed: 0,
        }
    }

    /// Decodes, classifies and records one segment, then prunes the whole
    /// tracker. Pruning runs for every segment, including `Other` ones.
    pub fn process(&mut self, segment: &TcpSegment) -> SegmentKind {
        let flags = TcpFlags::from_bits(segment.flags);
        let kind = SegmentKind::classify(flags);
        log::trace!("{} -> {} [{}] {}", segment.source, segment.destination, flags, kind);

        match kind {
            SegmentKind::SynProbe => {
                if self.tracker.get(&segment.source).is_none() {
                    log::debug!("New suspect {} (SYN sent)", segment.source);
                }
                self.tracker.record_syn(&segment.source);
            }
            SegmentKind::SynAckReply => {
                if self.tracker.get(&segment.destination).is_none() {
                    log::debug!("New suspect {} (SYN-ACK received)", segment.destination);
                }
                self.tracker.record_synack(&segment.destination);
            }
            SegmentKind::Other => {}
        }

        let pruned = self.tracker.prune(self.ratio);
        if pruned > 0 {
            log::debug!(
                "Pruned {pruned} unlikely suspect(s) at packet {}",
                self.packets_analyzed + 1
            );
        }

        self.packets_analyzed += 1;
        kind
    }

    /// Consumes a finite stream of segments and returns the final report.
    pub fn run<I>(mut self, segments: I) -> ScanReport
    where
        I: IntoIterator<Item = TcpSegment>,
    {
        for segment in segments {
            self.process(&segment);
        }
        log::debug!(
            "Stream exhausted after {} packets, {} live suspect(s)",
            self.packets_analyzed(),
            self.tracker().len()
        );
        self.finish()
    }

    /// Partial result; consistent after every processed segment.
    pub fn tracker(&self) -> &SuspectTracker {
        &self.tracker
    }

    pub fn packets_analyzed(&self) -> u64 {
        self.packets_analyzed
    }

    pub fn finish(self) -> ScanReport {
        if self.tracker.is_empty() {
            log::debug!("No suspects left in tracker");
        }
        let mut suspects: Vec<Suspect> = self
            .tracker
            .iter()
            .map(|(address, entry)| Suspect {
                address: *address,
                syn_count: entry.syn_count,
                synack_count: entry.synack_count,
            })
            .collect();
        suspects.sort_by(|a, b| a.address.cmp(&b.address));

        log::info!(
            "Analysis finished: {} packets, {} suspect(s)",
            self.packets_analyzed,
            suspects.len()
        );

        ScanReport {
            ratio: self.ratio,
            packets_analyzed: self.packets_analyzed,
            suspects,
            capture: None,
        }
    }
}
