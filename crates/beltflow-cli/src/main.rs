//! beltflow CLI - flow-calibration cylinders for belt printers
//!
//! Usage:
//!   beltflow generate <base.gcode> [-o output.gcode] [-c cylinder.toml] [flags]
//!   beltflow inspect <base.gcode> [--json]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use beltflow_gcode::{analyze, generate_cylinder, Analysis};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

mod config;

use config::{default_output_path, load_settings, write_atomically, SettingsOverrides};

/// Append a flow-calibration cylinder to a sliced belt-printer file
#[derive(Parser, Debug)]
#[command(name = "beltflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a flow cylinder on top of a base file
    Generate {
        /// Sliced base G-code
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output file (default: output.gcode next to the input)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// TOML settings file
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: SettingsOverrides,
    },
    /// Show what the generator would read from a base file
    Inspect {
        /// Sliced base G-code
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Generate {
            input,
            output,
            config,
            overrides,
        } => generate(&input, output, config.as_deref(), &overrides),
        Commands::Inspect { input, json } => inspect(&input, json),
    }
}

fn read_base(input: &Path) -> Result<String> {
    fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

fn generate(
    input: &Path,
    output: Option<PathBuf>,
    config: Option<&Path>,
    overrides: &SettingsOverrides,
) -> Result<()> {
    let settings = load_settings(config, overrides)?;
    let base = read_base(input)?;
    info!("loaded {} ({} bytes)", input.display(), base.len());

    let result = generate_cylinder(&base, &settings)
        .with_context(|| format!("failed to generate cylinder for {}", input.display()))?;

    let output = output.unwrap_or_else(|| default_output_path(input));
    write_atomically(&output, &result.gcode)?;

    println!("Wrote {}", output.display());
    println!(
        "  Cylinder: Z {:.3} -> {:.3} mm, diameter {} mm, center ({:.2}, {:.2})",
        result.toolpath.start_z,
        result.toolpath.end_z,
        result.plan.cylinder_diameter,
        result.toolpath.center.x,
        result.toolpath.center.y
    );
    for section in &result.sections {
        println!(
            "  Section {}: Z {:.3} -> {:.3} mm at {}% flow",
            section.index + 1,
            section.start_z,
            section.end_z,
            section.flow_percent
        );
    }
    println!(
        "  Filament: {:.1} mm, estimated time: {:.0}s",
        result.stats.filament_mm, result.stats.print_time_seconds
    );
    Ok(())
}

fn inspect(input: &Path, json: bool) -> Result<()> {
    let base = read_base(input)?;
    let analysis = analyze(&base).with_context(|| format!("failed to analyze {}", input.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }
    print_analysis(input, &analysis);
    Ok(())
}

fn print_analysis(input: &Path, analysis: &Analysis) {
    let state = &analysis.state;
    println!("Base file: {}", input.display());
    println!("  Layers: {}", state.layer_count);
    println!("  Last layer Z (cylinder start): {:.4} mm", state.last_layer_z);
    println!("  Layer height: {:.4} mm", state.layer_height);
    println!("  Flow rate: {}%", state.last_flow_percent);
    println!("  Center: ({:.3}, {:.3})", state.center.x, state.center.y);
    println!(
        "  Bounds: X [{:.3}, {:.3}] Y [{:.3}, {:.3}]",
        state.bounds.min.x, state.bounds.max.x, state.bounds.min.y, state.bounds.max.y
    );
    println!(
        "  Footprint: {:.3} x {:.3} mm",
        state.bounds.width(),
        state.bounds.depth()
    );
    println!("  Insertion point: byte {}", state.last_line_index);

    let hints = &analysis.hints;
    if let Some(v) = hints.layer_height {
        println!("  Slicer layer height: {} mm", v);
    }
    if let Some(v) = hints.nozzle_diameter {
        println!("  Slicer nozzle diameter: {} mm", v);
    }
    if let Some(v) = hints.nozzle_temp {
        println!("  Nozzle temperature: {}", v);
    }
    if let Some(v) = hints.bed_temp {
        println!("  Bed temperature: {}", v);
    }

    if let Some(line) = &analysis.print_end {
        println!("  Print end macro: {}", line);
    }

    if !analysis.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &analysis.warnings {
            println!("  {}", warning);
        }
    }
}
