use clap::{Parser, Subcommand};
use fieldgrid::{FieldCodec, FieldData, FieldQuantity, FileType, Units};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "fieldgrid", about = "Inspect and convert INIT / APF field maps")]
struct Cli {
    /// JSON object of extra unit names and their value in internal units
    #[arg(long, global = true)]
    units_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a JSON summary of a field file
    Info {
        input: PathBuf,
        /// File format: init, apf (default: from the extension)
        #[arg(short, long)]
        format: Option<String>,
        /// Field quantity: scalar or vector
        #[arg(short, long, default_value = "scalar")]
        quantity: FieldQuantity,
        /// Unit of INIT field values, e.g. V/cm
        #[arg(short, long, default_value = "")]
        unit: String,
    },
    /// Convert a field file between formats
    Convert {
        input:  PathBuf,
        output: PathBuf,
        /// Input format (default: from the extension)
        #[arg(long)]
        from: Option<String>,
        /// Output format (default: from the extension)
        #[arg(long)]
        to: Option<String>,
        #[arg(short, long, default_value = "scalar")]
        quantity: FieldQuantity,
        /// Unit of INIT field values on either side
        #[arg(short, long, default_value = "")]
        unit: String,
    },
}

#[derive(Serialize)]
struct FieldSummary<'a> {
    path:       String,
    format:     &'static str,
    quantity:   FieldQuantity,
    header:     &'a str,
    dimensions: [usize; 3],
    size:       [f64; 3],
    points:     usize,
    min:        Option<f64>,
    max:        Option<f64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let units = load_units(cli.units_file.as_deref())?;

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, format, quantity, unit } => {
            let file_type = resolve_format(&input, format.as_deref())?;
            let unit = if file_type == FileType::Init { unit } else { String::new() };
            let codec = FieldCodec::new(quantity, unit).with_converter(units);
            let field = codec.read(&input, file_type)?;

            let summary = summarize(&input, file_type, quantity, &field);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, from, to, quantity, unit } => {
            let in_type  = resolve_format(&input, from.as_deref())?;
            let out_type = resolve_format(&output, to.as_deref())?;

            let unit_for = |t: FileType| if t == FileType::Init { unit.clone() } else { String::new() };
            let reader = FieldCodec::new(quantity, unit_for(in_type)).with_converter(units.clone());
            let writer = FieldCodec::new(quantity, unit_for(out_type)).with_converter(units);

            let field = reader.read(&input, in_type)?;
            writer.write(&field, &output, out_type)?;
            info!("Converted {} ({}) → {} ({})", input.display(), in_type, output.display(), out_type);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn load_units(path: Option<&Path>) -> Result<Arc<Units>, Box<dyn std::error::Error>> {
    let mut units = Units::new();
    if let Some(path) = path {
        units.extend_from_json(&std::fs::read_to_string(path)?)?;
    }
    Ok(Arc::new(units))
}

fn resolve_format(path: &Path, explicit: Option<&str>) -> fieldgrid::Result<FileType> {
    match explicit {
        Some(name) => FileType::from_name(name),
        None       => FileType::from_path(path),
    }
}

fn summarize<'a>(path: &Path, file_type: FileType, quantity: FieldQuantity, field: &'a FieldData) -> FieldSummary<'a> {
    let data = field.data();
    let min = data.iter().copied().reduce(f64::min);
    let max = data.iter().copied().reduce(f64::max);
    FieldSummary {
        path: path.display().to_string(),
        format: file_type.name(),
        quantity,
        header: field.header(),
        dimensions: field.dimensions(),
        size: field.size(),
        points: field.points(),
        min,
        max,
    }
}
