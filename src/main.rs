use clap::{Parser, Subcommand};
use imgcall::{
    Blob, Error, Image, Kind, OptionSet, OptionValue, OutputSlot, Runtime, RuntimeConfig, Slot,
    Value, call, config, output,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "imgcall")]
#[command(about = "Invoke image operations by name")]
#[command(long_about = "\
Invoke image operations by name

Every operation declares named, typed arguments. Inputs are given as
NAME=VALUE; the value is parsed according to the argument's kind:

  image          a file to load (options in brackets: photo.jpg[shrink=2])
  array-image    space-separated files
  blob           a file whose bytes are passed as-is
  array-double   space-separated numbers: matrix=\"1 0 0 1\"
  bool           true/false, yes/no, on/off, 1/0
  interpolate    nearest, bilinear, bicubic, gaussian, lanczos3

Image and blob outputs are written with --out NAME=FILE; every other output
is printed.

Examples:

  imgcall describe embed
  imgcall call rot in=photo.jpg angle=1 --out out=rotated.png
  imgcall call avg in=photo.jpg --json
  imgcall convert photo.jpg 'photo.webp'

Run 'imgcall gen-config' to generate a documented config file.")]
#[command(version)]
struct Cli {
    /// Runtime config file (see gen-config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Print call and handle statistics before exiting
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every registered operation
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show the arguments an operation takes
    Describe {
        operation: String,
        #[arg(long)]
        json: bool,
    },
    /// Load an image and save it in the format of the output suffix
    Convert {
        input: String,
        output: String,
        /// Print the call history of the converted image
        #[arg(long)]
        history: bool,
    },
    /// Run one operation with NAME=VALUE arguments
    Call {
        operation: String,
        #[arg(value_name = "NAME=VALUE")]
        arguments: Vec<String>,
        /// Where to write an image or blob output
        #[arg(long = "out", value_name = "NAME=FILE")]
        outputs: Vec<String>,
        #[arg(long)]
        json: bool,
        /// Print the call history of every image output
        #[arg(long)]
        history: bool,
    },
    /// Print a stock config file with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let runtime_config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    let rt = Runtime::startup(runtime_config)?;
    let result = run(&rt, cli.command);

    if cli.stats {
        output::print_stats(&rt.call_stats(), &rt.handle_stats());
    }
    let report = rt.shutdown();
    if !report.is_clean() {
        for line in output::format_shutdown_report(&report) {
            eprintln!("{}", line);
        }
    }
    result
}

fn run(rt: &Runtime, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::List { json } => {
            let schemas = rt
                .operations()
                .into_iter()
                .map(|name| rt.describe(name))
                .collect::<Result<Vec<_>, _>>()?;
            if json {
                let plain: Vec<_> = schemas.iter().map(|s| s.as_ref()).collect();
                println!("{}", serde_json::to_string_pretty(&plain)?);
            } else {
                output::print_operation_list(&schemas);
            }
        }
        Command::Describe { operation, json } => {
            let schema = rt.describe(&operation)?;
            if json {
                println!("{}", serde_json::to_string_pretty(schema.as_ref())?);
            } else {
                output::print_schema(&schema);
                if schema.inputs().any(|arg| arg.kind == Kind::Interpolator) {
                    output::print_interpolators(&rt.registry().interpolator_names());
                }
            }
        }
        Command::Convert {
            input,
            output: destination,
            history,
        } => {
            let image = Image::from_file(rt, &input, OptionSet::default())?;
            image.write_to_file(rt, &destination, OptionSet::default())?;
            println!("{} → {} ({}x{})", input, destination, image.width(), image.height());
            if history {
                output::print_call_history(&image.call_event_log());
            }
        }
        Command::Call {
            operation,
            arguments,
            outputs,
            json,
            history,
        } => run_call(rt, &operation, &arguments, &outputs, json, history)?,
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }
    Ok(())
}

/// Split `name=value` at the first `=`.
fn split_assignment(text: &str) -> Result<(&str, &str), Error> {
    text.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| Error::InvalidOptionUse(format!("expected NAME=VALUE, got {text:?}")))
}

/// Turn command-line text into a value of `kind`. Images and blobs are read from files.
fn input_value(rt: &Runtime, kind: Kind, text: &str) -> Result<Value<'static>, Box<dyn std::error::Error>> {
    Ok(match kind {
        Kind::Image => Value::Image(Image::from_file(rt, text, OptionSet::default())?),
        Kind::ImageArray => Value::ImageArray(
            text.split_whitespace()
                .map(|path| Image::from_file(rt, path, OptionSet::default()))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Kind::Blob => Value::Blob(Blob::from_vec(std::fs::read(text)?)),
        kind => Value::parse(rt.registry(), kind, Some(text))?,
    })
}

fn output_slot(kind: Kind) -> Option<OutputSlot> {
    Some(match kind {
        Kind::Bool => OutputSlot::Bool(Slot::new()),
        Kind::Int => OutputSlot::Int(Slot::new()),
        Kind::Double => OutputSlot::Double(Slot::new()),
        Kind::String => OutputSlot::String(Slot::new()),
        Kind::Blob => OutputSlot::Blob(Slot::new()),
        Kind::Image => OutputSlot::Image(Slot::new()),
        Kind::DoubleArray => OutputSlot::DoubleArray(Slot::new()),
        Kind::ImageArray => OutputSlot::ImageArray(Slot::new()),
        Kind::Interpolator => return None,
    })
}

fn run_call(
    rt: &Runtime,
    operation: &str,
    arguments: &[String],
    outputs: &[String],
    json: bool,
    history: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let schema = rt.describe(operation)?;

    let mut options = OptionSet::default();
    for argument in arguments {
        let (name, text) = split_assignment(argument)?;
        let spec = schema.get(name).ok_or_else(|| Error::UnknownArgument {
            operation: operation.to_string(),
            argument: name.to_string(),
        })?;
        options.set(OptionValue::input(name, input_value(rt, spec.kind, text)?));
    }

    let destinations = outputs
        .iter()
        .map(|o| split_assignment(o))
        .collect::<Result<HashMap<_, _>, _>>()?;
    let mut slots = Vec::new();
    for spec in schema.outputs() {
        if let Some(slot) = output_slot(spec.kind) {
            options.set(OptionValue::output(spec.name, slot.clone()));
            slots.push((spec.name, slot));
        }
    }

    call(rt, operation, &options)?;

    let mut results = serde_json::Map::new();
    for (name, slot) in slots {
        let destination = destinations.get(name).copied();
        let result = match slot {
            OutputSlot::Bool(s) => s.take().map(|v| json!(v)),
            OutputSlot::Int(s) => s.take().map(|v| json!(v)),
            OutputSlot::Double(s) => s.take().map(|v| json!(v)),
            OutputSlot::String(s) => s.take().map(|v| json!(v)),
            OutputSlot::DoubleArray(s) => s.take().map(|v| json!(v)),
            OutputSlot::Blob(s) => match (s.take(), destination) {
                (Some(blob), Some(path)) => {
                    std::fs::write(path, blob.as_bytes())?;
                    Some(json!(path))
                }
                (Some(blob), None) => Some(json!(blob.to_string())),
                (None, _) => None,
            },
            OutputSlot::Image(s) => match s.take() {
                Some(image) => Some(emit_image(rt, &image, destination, history)?),
                None => None,
            },
            OutputSlot::ImageArray(s) => match s.take() {
                Some(images) => {
                    let rendered = images
                        .iter()
                        .map(|image| emit_image(rt, image, None, history))
                        .collect::<Result<Vec<_>, _>>()?;
                    Some(json!(rendered))
                }
                None => None,
            },
        };
        if let Some(result) = result {
            results.insert(name.to_string(), result);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for (name, result) in &results {
            match result {
                serde_json::Value::String(text) => println!("{}: {}", name, text),
                other => println!("{}: {}", name, other),
            }
        }
    }
    Ok(())
}

fn emit_image(
    rt: &Runtime,
    image: &Image,
    destination: Option<&str>,
    history: bool,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    if history {
        output::print_call_history(&image.call_event_log());
    }
    match destination {
        Some(path) => {
            image.write_to_file(rt, path, OptionSet::default())?;
            Ok(json!(path))
        }
        None => Ok(json!(image.to_string())),
    }
}
