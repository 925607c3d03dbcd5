//! CLI entrypoint for the offalloc replay harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use offalloc_core::{Allocator, AllocatorConfig, DEFAULT_MAX_ALLOCATIONS, HandleValidation};
use offalloc_harness::structured_log::LogEmitter;
use offalloc_harness::{
    ReplayOptions, SynthOptions, Trace, replay, runner::replay_with_log, synthesize_trace,
};
use serde_json::json;

/// Workload tooling for the offalloc allocator.
#[derive(Debug, Parser)]
#[command(name = "offalloc-harness")]
#[command(about = "Trace synthesis, replay and storage reports for offalloc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a deterministic alloc/free trace.
    Synth {
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Number of operations to generate.
        #[arg(long, default_value_t = 1024)]
        steps: usize,
        #[arg(long, default_value_t = 1 << 20)]
        capacity: u32,
        #[arg(long, default_value_t = 4096)]
        max_allocations: u32,
        /// Largest requested size.
        #[arg(long, default_value_t = 4096)]
        max_size: u32,
        /// Percentage of steps that free a live allocation.
        #[arg(long, default_value_t = 40)]
        free_percent: u8,
        /// Output trace path (stdout when omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replay a trace and print a JSON summary.
    Replay {
        /// Trace JSON path.
        #[arg(long)]
        trace: PathBuf,
        /// Audit allocator structure after every step.
        #[arg(long)]
        verify: bool,
        /// Handle validation mode (`strict`, `hardened`, or `off`).
        #[arg(long, default_value = "strict")]
        mode: String,
        /// JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Include the free region histogram.
        #[arg(long)]
        histogram: bool,
        /// Output report path (stdout when omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Allocate a list of sizes and print the resulting storage layout.
    Report {
        #[arg(long)]
        capacity: u32,
        #[arg(long, default_value_t = DEFAULT_MAX_ALLOCATIONS)]
        max_allocations: u32,
        /// Comma-separated sizes to allocate in order.
        #[arg(long, value_delimiter = ',')]
        sizes: Vec<u32>,
        /// Include every region and the full free region histogram.
        #[arg(long)]
        full: bool,
    },
}

fn parse_seed(raw: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let cleaned = raw.replace('_', "");
    let seed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => cleaned.parse()?,
    };
    Ok(seed)
}

fn write_json(
    value: &impl serde::Serialize,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Synth {
            seed,
            steps,
            capacity,
            max_allocations,
            max_size,
            free_percent,
            output,
        } => {
            let trace = synthesize_trace(SynthOptions {
                seed: parse_seed(&seed)?,
                steps,
                capacity,
                max_allocations,
                max_size,
                free_percent: free_percent.min(100),
            });
            match output {
                Some(path) => {
                    trace.save(&path)?;
                    eprintln!("Wrote {} ops to {}", trace.ops.len(), path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&trace)?),
            }
        }
        Command::Replay {
            trace,
            verify,
            mode,
            log,
            histogram,
            output,
        } => {
            let loaded = Trace::load(&trace)?;
            let options = ReplayOptions {
                verify_each_step: verify,
                validation: HandleValidation::from_str_loose(&mode),
                include_histogram: histogram,
            };
            let report = match log {
                Some(path) => {
                    let run_id = trace
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("replay")
                        .to_string();
                    let mut emitter = LogEmitter::to_file(&path, &run_id)?;
                    let report = replay_with_log(&loaded, &options, &mut emitter)?;
                    eprintln!("Wrote {} log entries to {}", emitter.emitted(), path.display());
                    report
                }
                None => replay(&loaded, &options)?,
            };
            write_json(&report, output.as_deref())?;
        }
        Command::Report {
            capacity,
            max_allocations,
            sizes,
            full,
        } => {
            let config = AllocatorConfig::new(capacity, max_allocations);
            let mut allocator = Allocator::with_config(config)?;
            let placements: Vec<_> = sizes
                .iter()
                .map(|&size| match allocator.allocate(size) {
                    Ok(a) => json!({ "size": size, "offset": a.offset }),
                    Err(err) => json!({ "size": size, "error": err.to_string() }),
                })
                .collect();
            let mut out = json!({
                "capacity": allocator.capacity(),
                "placements": placements,
                "storage_report": allocator.storage_report(),
            });
            if full {
                let regions: Vec<_> = allocator.regions().collect();
                let histogram: Vec<_> = allocator
                    .storage_report_full()
                    .non_empty()
                    .copied()
                    .collect();
                out["regions"] = serde_json::to_value(regions)?;
                out["free_regions"] = serde_json::to_value(histogram)?;
            }
            write_json(&out, None)?;
        }
    }

    Ok(())
}
