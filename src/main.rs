//! CLI Entry Point for sigdata
//!
//! Provides command-line access to:
//! - Inspecting a BLUE file's header, geometry and keywords
//! - Replaying a BLUE file's data through a streaming pipe
//!
//! # Usage
//!
//! ```bash
//! sigdata inspect capture.tmp
//! sigdata replay capture.tmp --capacity 80 --frame 2 --odd-remainder
//! sigdata --config sigdata.toml --log-level debug replay capture.tmp
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sigdata::config::SigdataConfig;
use sigdata::logging::{self, TracingConfig};
use sigdata::{BlueFile, CapacityPolicy, Layout, Pipe};
use sigdata_core::Atom;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sigdata")]
#[command(about = "Inspect and replay BLUE signal data files", long_about = None)]
struct Cli {
    /// Configuration file (defaults to sigdata.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a file's header, geometry and keywords
    Inspect {
        /// Path to a BLUE file
        file: PathBuf,

        /// Number of leading atoms to print
        #[arg(long, default_value = "8")]
        head: usize,
    },

    /// Stream a file's data through a pipe and report statistics
    Replay {
        /// Path to a BLUE file
        file: PathBuf,

        /// Pipe capacity in bytes (defaults to the file's pipesize, then the configured capacity)
        #[arg(long)]
        capacity: Option<u64>,

        /// Elements written per fill
        #[arg(long, default_value = "64")]
        frame: usize,

        /// Accept a capacity that is not a whole number of elements
        #[arg(long)]
        odd_remainder: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SigdataConfig::load_from(path),
        None => SigdataConfig::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    let tracing_config =
        TracingConfig::from_logging_config(&config.logging).map_err(anyhow::Error::msg)?;
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Inspect { file, head } => inspect(file, head),
        Commands::Replay {
            file,
            capacity,
            frame,
            odd_remainder,
        } => replay(&config, file, capacity, frame, odd_remainder),
    }
}

fn inspect(path: PathBuf, head: usize) -> Result<()> {
    let file = BlueFile::open(&path)?;
    let header = file.header();
    let geometry = header.geometry();

    println!("File:        {}", path.display());
    println!("Format:      {}", header.format());
    println!("Layout:      {:?} (type {})", geometry.layout(), geometry.layout().type_code());
    println!("Elements:    {}", geometry.element_count());
    if geometry.layout() == Layout::Matrix {
        println!(
            "Rows:        {} x {} atoms",
            geometry.rows(),
            geometry.sub_element_count()
        );
    }
    println!("Atom bytes:  {}", geometry.bytes_per_atom());
    println!("Row bytes:   {}", geometry.bytes_per_row());
    println!("Data bytes:  {}", file.data().len());
    println!("Byte order:  {:?}", header.byte_order());
    println!("Timecode:    {}", header.timecode());

    let pipe_header = file.pipe_header();
    if pipe_header.pipe {
        println!(
            "Pipe:        {} bytes, in={} out={}",
            pipe_header.pipe_size, pipe_header.in_byte, pipe_header.out_byte
        );
    }
    if pipe_header.protected != 0 || pipe_header.flagmask != 0 {
        println!(
            "Flags:       protected={} flagmask={:#06x}",
            pipe_header.protected, pipe_header.flagmask
        );
    }

    let x = header.x_axis();
    println!("X axis:      start={} delta={} units={}", x.start, x.delta, x.units);
    if geometry.layout() == Layout::Matrix {
        let y = header.y_axis();
        println!("Y axis:      start={} delta={} units={}", y.start, y.delta, y.units);
    }

    if !header.keywords().is_empty() {
        println!("Keywords:");
        for keyword in header.keywords().iter() {
            println!("  {} = {:?}", keyword.key, keyword.value);
        }
    }
    if !header.extended_metadata().is_empty() {
        println!("Extended keywords:");
        for keyword in header.extended_metadata().iter() {
            println!(
                "  {} [{}] = {:?}",
                keyword.key,
                keyword.value.type_code(),
                keyword.value
            );
        }
    }

    let view = file.view();
    let shown = head.min(view.len_atoms());
    if shown > 0 {
        println!("First {} atoms:", shown);
        for i in 0..shown {
            match view.read_atom(i)? {
                Atom::Real(v) => println!("  [{}] {}", i, v),
                Atom::Complex { re, im } => println!("  [{}] {} + {}j", i, re, im),
            }
        }
    }

    Ok(())
}

fn replay(
    config: &SigdataConfig,
    path: PathBuf,
    capacity: Option<u64>,
    frame: usize,
    odd_remainder: bool,
) -> Result<()> {
    let file = BlueFile::open(&path)?;

    let mut pipe_config = file.pipe_header().apply_to(config.pipe.to_pipe_config());
    if let Some(capacity) = capacity {
        pipe_config.capacity_bytes = capacity;
    }
    if odd_remainder {
        pipe_config.policy = CapacityPolicy::OddRemainder;
    }
    let mut pipe = Pipe::from_header(file.header(), pipe_config)
        .with_context(|| format!("Cannot stream {:?} through the configured pipe", path))?;

    let scalars = file.scalars();
    let per_element = pipe.geometry().scalars_per_element();
    let total = scalars.len() / per_element;
    let frame = frame.max(1);

    let mut sent = 0;
    let mut received = Vec::with_capacity(total * per_element);
    let mut buffer = vec![0.0; frame * per_element];

    while sent < total {
        let count = frame.min(total - sent);
        match pipe.fill(&scalars[sent * per_element..], count) {
            Ok(()) => sent += count,
            Err(e) if e.is_recoverable() => {
                let got = pipe.drain(&mut buffer, frame);
                if got == 0 {
                    bail!(
                        "A frame of {} elements never fits in a {}-byte pipe",
                        count,
                        pipe.capacity()
                    );
                }
                received.extend_from_slice(&buffer[..got * per_element]);
            }
            Err(e) => return Err(e.into()),
        }
    }
    loop {
        let got = pipe.drain(&mut buffer, frame);
        if got == 0 {
            break;
        }
        received.extend_from_slice(&buffer[..got * per_element]);
    }

    let expected = &scalars[..total * per_element];
    let intact = received.len() == expected.len()
        && received
            .iter()
            .zip(expected)
            .all(|(a, b)| a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));

    let stats = pipe.stats();
    println!("Replayed:    {} elements of {}", total, pipe.geometry().format());
    println!("Pipe:        {} bytes ({:?})", pipe.capacity(), pipe.policy());
    println!("Fills:       {} ({} rejected)", stats.fills, stats.rejected_fills);
    println!("Drains:      {} ({} short)", stats.drains, stats.short_drains);
    println!("Integrity:   {}", if intact { "ok" } else { "MISMATCH" });

    if !intact {
        bail!("Drained data does not match the file contents");
    }
    Ok(())
}
