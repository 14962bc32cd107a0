mod analyser;
mod error;
mod ui;

use analyser::containers::{Ratio, ScanReport};
use analyser::utils::CaptureSource;
use clap::{ArgAction, Parser};
use error::Result;
use std::path::Path;
use std::process::ExitCode;
use ui::output;

/// synsniff flags addresses that look like they are running TCP SYN port scans
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// pcap/pcapng file to analyze
    #[arg(short = 'f', long, value_parser)]
    file: String,

    /// Ratio of SYN packets sent vs SYN-ACK received, default is 3
    #[arg(
        short = 'r',
        long,
        default_value_t = Ratio::default(),
        value_parser = clap::value_parser!(Ratio)
    )]
    ratio: Ratio,

    /// Stop after n TCP packets
    #[arg(short = 'c', long, value_parser)]
    count: Option<u64>,

    /// Extra tshark display filter, ANDed with "tcp"
    #[arg(short = 'F', long, value_parser)]
    filter: Option<String>,

    /// Display output as formatted JSON
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,

    /// File to write the JSON report to
    #[arg(short = 'o', long, value_parser)]
    output: Option<String>,
}

fn main() -> ExitCode {
    simple_logger::init_with_env().unwrap();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    log::info!("Running analysis on capture file: {}", args.file);

    let mut source = CaptureSource::open(&args.file, args.filter.as_deref())?;
    let report = analyser::core::analyse(&mut source, args.ratio, args.count)?;

    report_results(args, &report)
}

fn report_results(args: &Args, report: &ScanReport) -> Result<()> {
    if let Some(path) = args.output.as_deref() {
        output::data_to_file(output::data_as_json(report)?, Path::new(path))?;
        if !args.json {
            output::print_results(report);
        }
    } else if args.json {
        println!("{}", output::data_as_json(report)?);
    } else {
        output::print_results(report);
    }
    Ok(())
}
