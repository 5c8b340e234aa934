//! sequencer: compile shot files into sequencer instructions.
//!
//! - `compile`: compile a shot and print a summary of every device
//! - `flatten`: print the tick by tick values of one sequencer as CSV

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::Level;

use sequencer::compiler::{CameraParameters, ShotParameters};
use sequencer::device::Trigger;
use sequencer::shot::ShotFile;

#[derive(Parser)]
#[command(name = "sequencer")]
#[command(about = "Compile shot files into sequencer instructions")]
#[command(version)]
struct Cli {
    /// More logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a shot and summarize the parameters of every device
    Compile {
        shot: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the values of one sequencer at every tick, as CSV
    Flatten { shot: PathBuf, device: String },
}

#[derive(Serialize)]
struct SequencerSummary {
    time_step_ns: u64,
    trigger: Trigger,
    ticks: usize,
    depth: usize,
    channels: Vec<String>,
    instruction: String,
}

#[derive(Serialize)]
struct ShotSummary<'a> {
    duration: f64,
    sequencers: Vec<(&'a str, SequencerSummary)>,
    cameras: Vec<(&'a str, &'a CameraParameters)>,
}

fn summarize(parameters: &ShotParameters) -> ShotSummary<'_> {
    let sequencers = parameters
        .sequencers
        .iter()
        .map(|(name, sequencer)| {
            let sequence = &sequencer.sequence;
            let channels = sequence
                .dtype()
                .names()
                .unwrap_or_default()
                .into_iter()
                .map(String::from)
                .collect();
            let summary = SequencerSummary {
                time_step_ns: sequencer.time_step.ns(),
                trigger: sequencer.trigger,
                ticks: sequence.len(),
                depth: sequence.depth(),
                channels,
                instruction: sequence.to_string(),
            };
            (name.as_str(), summary)
        })
        .collect();
    let cameras = parameters
        .cameras
        .iter()
        .map(|(name, camera)| (name.as_str(), camera))
        .collect();
    ShotSummary {
        duration: parameters.duration,
        sequencers,
        cameras,
    }
}

fn print_summary(summary: &ShotSummary<'_>) {
    println!("shot duration: {} s", summary.duration);
    for (name, sequencer) in &summary.sequencers {
        println!(
            "sequencer '{name}': {} ticks of {} ns, depth {}, {} trigger",
            sequencer.ticks, sequencer.time_step_ns, sequencer.depth, sequencer.trigger
        );
        println!("  channels: {}", sequencer.channels.join(", "));
    }
    for (name, camera) in &summary.cameras {
        println!("camera '{name}': {} picture(s)", camera.picture_names.len());
        for (picture, exposure) in camera.picture_names.iter().zip(&camera.exposures) {
            println!("  {picture}: {exposure} s");
        }
    }
}

fn flatten(parameters: &ShotParameters, device: &str, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    let sequencer = parameters
        .sequencers
        .get(device)
        .ok_or_else(|| format!("no sequencer named '{device}' in the shot"))?;
    let pattern = sequencer.sequence.to_pattern();
    let names = pattern.dtype().names().unwrap_or_default();
    writeln!(out, "tick,{}", names.join(","))?;
    for (tick, sample) in pattern.samples().enumerate() {
        let values: Vec<String> = sample.values().iter().map(ToString::to_string).collect();
        writeln!(out, "{tick},{}", values.join(","))?;
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Compile { shot, json } => {
            let parameters = ShotFile::load(&shot)?.compile()?;
            let summary = summarize(&parameters);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Flatten { shot, device } => {
            let parameters = ShotFile::load(&shot)?.compile()?;
            let stdout = io::stdout();
            flatten(&parameters, &device, &mut stdout.lock())?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        let mut source = error.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
