use crate::analyser::containers::{CaptureStats, ScanReport, Suspect};
use crate::error::Result;
use ansi_term::Colour;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn print_results(report: &ScanReport) {
    println!("\n\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} Results");
    print_summary(report);
    print_suspects(&report.suspects);
}

pub fn print_summary(report: &ScanReport) {
    println!("\u{2503}");
    let packets = report.packets_analyzed.to_string();
    let ratio = report.ratio.to_string();
    println!("\u{2503} Analyzed {} packets...", Colour::Fixed(226).paint(packets));
    println!("\u{2503} Selected ratio   : {}", Colour::Fixed(226).paint(ratio));
    if let Some(capture) = &report.capture {
        print_capture(capture);
    }
    println!("\u{2503} ");
}

fn print_capture(capture: &CaptureStats) {
    println!("\u{2503} Frames read      : {}", capture.frames_read);
    println!("\u{2503} Frames skipped   : {}", capture.frames_skipped);
    if let (Some(first), Some(last)) = (capture.first_timestamp, capture.last_timestamp) {
        println!(
            "\u{2503} Capture span     : {} -> {}",
            format_timestamp(first),
            format_timestamp(last)
        );
    }
}

pub fn print_suspects(suspects: &[Suspect]) {
    if suspects.is_empty() {
        println!("\u{2503} No suspicious packets found");
        return;
    }
    for line in suspects.iter().map(suspect_line) {
        println!("\u{2503} {}", Colour::Red.paint(line));
    }
}

pub fn suspect_line(suspect: &Suspect) -> String {
    format!(
        "{:15} had {} SYNs and {} SYN-ACKs",
        suspect.address.to_string(),
        suspect.syn_count,
        suspect.synack_count
    )
}

pub fn format_timestamp(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string(),
        None => micros.to_string(),
    }
}

pub fn data_as_json(report: &ScanReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn data_to_file(json: String, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    log::info!("Report written to {}", path.display());
    Ok(())
}
