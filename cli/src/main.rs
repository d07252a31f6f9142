mod targets;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::debug;
use yieldify::{Error, Function, InstrumentOptions, Value, drive, instrument_with};

/// Yieldify - report a unit's progress, one marker per statement
#[derive(Parser, Debug)]
#[command(name = "yieldify")]
#[command(about = "Instrument a demo unit and print the markers it reports", long_about = None)]
struct Args {
    /// Argument passed to the target
    #[arg(long, default_value_t = 3)]
    input: i64,

    /// Use a target whose last statement always fails
    #[arg(long)]
    fail: bool,

    /// Print the original and instrumented listings
    #[arg(long)]
    disassemble: bool,

    /// Marker reported after the first statement
    #[arg(long, default_value_t = 1)]
    first_marker: i64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging subscriber
    use tracing_subscriber::{EnvFilter, fmt};

    // Use RUST_LOG environment variable to control log level
    // Default to WARN if not set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .into_diagnostic()?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let unit = if args.fail {
        targets::failing()
    } else {
        targets::summing()
    }
    .map_err(|e| Error::instrument("target", e))?;

    let original = Function::new(unit);
    let options = InstrumentOptions {
        first_marker: args.first_marker,
        ..InstrumentOptions::default()
    };
    let function = instrument_with(&original, &options)?;
    debug!(
        original = original.code.code.len(),
        instrumented = function.code.code.len(),
        "instrumented target"
    );

    if args.disassemble {
        println!("=== Original ===");
        println!("{:?}", original.code);
        println!("=== Instrumented ===");
        println!("{:?}", function.code);
    }

    let result = drive(&function, &[Value::Int(args.input)], |marker| {
        println!("yield {}", marker);
    })?;
    println!("return {}", result);
    Ok(())
}
