// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ipr_cli::{parse_config_json, parse_records_json, train_model, validate_samples};
use ipr_core::{IprError, SampleTypeFilter, TrainingDiagnostics};
use ipr_engine::{DEFAULT_TOLERANCE_FACTOR, IprConfig, IprModel, ReportMode, Validator};
use ipr_lifecycle::{PayloadCodec, load_model_from_file, save_model_to_file};
use serde::Serialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXIT_ISSUES_FOUND: i32 = 2;
const EXIT_ERROR: i32 = 1;

struct Cli {
    command: Command,
}

enum Command {
    Train(TrainArgs),
    Validate(ValidateArgs),
}

#[derive(Debug, Default)]
struct TrainArgs {
    records: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    chunk_size: Option<usize>,
    low: Option<f64>,
    high: Option<f64>,
    filter: Option<String>,
    codec: PayloadCodec,
}

#[derive(Debug)]
struct ValidateArgs {
    model: PathBuf,
    input: PathBuf,
    factor: f64,
    all: bool,
    output: Option<PathBuf>,
}

impl Default for ValidateArgs {
    fn default() -> Self {
        Self {
            model: PathBuf::new(),
            input: PathBuf::new(),
            factor: DEFAULT_TOLERANCE_FACTOR,
            all: false,
            output: None,
        }
    }
}

#[derive(Debug)]
enum CliError {
    Ipr(IprError),
    Io {
        context: String,
        source: std::io::Error,
    },
    Json {
        context: String,
        source: serde_json::Error,
    },
    InvalidInput(String),
}

impl CliError {
    fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Ipr(IprError::InvalidInput(_)) | Self::InvalidInput(_) => "invalid_input",
            Self::Ipr(IprError::Configuration(_)) => "configuration",
            Self::Ipr(IprError::ResourceLimit(_)) => "resource_limit",
            Self::Ipr(IprError::Cancelled) => "cancelled",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipr(err) => write!(f, "{err}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Json { context, source } => write!(f, "{context}: {source}"),
            Self::InvalidInput(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ipr(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::InvalidInput(_) => None,
        }
    }
}

impl From<IprError> for CliError {
    fn from(value: IprError) -> Self {
        Self::Ipr(value)
    }
}

#[derive(Serialize)]
struct TrainOutput<'a> {
    model_path: String,
    codec: PayloadCodec,
    amplitude_keys: usize,
    field_keys: usize,
    diagnostics: &'a TrainingDiagnostics,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

enum Outcome {
    Clean,
    IssuesFound,
}

fn main() {
    init_tracing();
    match run() {
        Ok(Outcome::Clean) => {}
        Ok(Outcome::IssuesFound) => process::exit(EXIT_ISSUES_FOUND),
        Err(err) => {
            emit_structured_error(&err);
            process::exit(EXIT_ERROR);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn run() -> Result<Outcome, CliError> {
    let Some(cli) = parse_cli(env::args().skip(1).collect())? else {
        return Ok(Outcome::Clean);
    };

    match cli.command {
        Command::Train(args) => handle_train(args),
        Command::Validate(args) => handle_validate(args),
    }
}

fn parse_cli(args: Vec<String>) -> Result<Option<Cli>, CliError> {
    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help") {
        print_root_help();
        return Ok(None);
    }
    if matches!(args[0].as_str(), "-V" | "--version") {
        print_version();
        return Ok(None);
    }

    let command_name = args[0].as_str();
    let rest = &args[1..];
    if rest
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_command_help(command_name)?;
        return Ok(None);
    }

    let command = match command_name {
        "train" => Command::Train(parse_train_args(rest)?),
        "validate" => Command::Validate(parse_validate_args(rest)?),
        other => {
            return Err(CliError::invalid_input(format!(
                "unknown command '{other}'; expected one of: train, validate"
            )));
        }
    };
    Ok(Some(Cli { command }))
}

fn parse_train_args(tokens: &[String]) -> Result<TrainArgs, CliError> {
    let mut args = TrainArgs::default();

    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--records" => {
                args.records =
                    PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?);
            }
            "--output" => {
                args.output =
                    PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?);
            }
            "--config" => {
                args.config = Some(PathBuf::from(take_flag_value(
                    flag,
                    inline_value,
                    tokens,
                    &mut idx,
                )?));
            }
            "--chunk-size" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.chunk_size = Some(parse_usize_arg(&raw, flag)?);
            }
            "--low" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.low = Some(parse_f64_arg(&raw, flag)?);
            }
            "--high" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.high = Some(parse_f64_arg(&raw, flag)?);
            }
            "--filter" => {
                args.filter = Some(take_flag_value(flag, inline_value, tokens, &mut idx)?);
            }
            "--codec" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.codec = raw.parse::<PayloadCodec>()?;
            }
            other => {
                return Err(CliError::invalid_input(format!(
                    "unknown train option '{other}'"
                )));
            }
        }
        idx += 1;
    }

    if args.records.as_os_str().is_empty() {
        return Err(CliError::invalid_input("train requires --records <path>"));
    }
    if args.output.as_os_str().is_empty() {
        return Err(CliError::invalid_input("train requires --output <path>"));
    }
    Ok(args)
}

fn parse_validate_args(tokens: &[String]) -> Result<ValidateArgs, CliError> {
    let mut args = ValidateArgs::default();

    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--model" => {
                args.model = PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?);
            }
            "--input" => {
                args.input = PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?);
            }
            "--factor" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.factor = parse_f64_arg(&raw, flag)?;
            }
            "--all" => {
                ensure_no_inline_value(flag, inline_value)?;
                args.all = true;
            }
            "--output" => {
                args.output = Some(PathBuf::from(take_flag_value(
                    flag,
                    inline_value,
                    tokens,
                    &mut idx,
                )?));
            }
            other => {
                return Err(CliError::invalid_input(format!(
                    "unknown validate option '{other}'"
                )));
            }
        }
        idx += 1;
    }

    if args.model.as_os_str().is_empty() {
        return Err(CliError::invalid_input("validate requires --model <path>"));
    }
    if args.input.as_os_str().is_empty() {
        return Err(CliError::invalid_input("validate requires --input <path>"));
    }
    Ok(args)
}

fn split_flag(token: &str) -> Result<(&str, Option<String>), CliError> {
    if !token.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "unexpected positional argument '{token}'; expected --flag value"
        )));
    }
    if let Some((flag, value)) = token.split_once('=') {
        return Ok((flag, Some(value.to_string())));
    }
    Ok((token, None))
}

fn take_flag_value(
    flag: &str,
    inline_value: Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<String, CliError> {
    if let Some(value) = inline_value {
        return Ok(value);
    }

    *idx += 1;
    let value = tokens
        .get(*idx)
        .ok_or_else(|| CliError::invalid_input(format!("{flag} requires a value")))?;
    if value.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "{flag} requires a value, but got option '{value}'"
        )));
    }
    Ok(value.clone())
}

fn ensure_no_inline_value(flag: &str, inline_value: Option<String>) -> Result<(), CliError> {
    if inline_value.is_some() {
        return Err(CliError::invalid_input(format!(
            "{flag} does not accept a value"
        )));
    }
    Ok(())
}

fn parse_usize_arg(raw: &str, flag: &str) -> Result<usize, CliError> {
    raw.parse::<usize>().map_err(|_| {
        CliError::invalid_input(format!(
            "{flag} expects a non-negative integer, got '{raw}'"
        ))
    })
}

fn parse_f64_arg(raw: &str, flag: &str) -> Result<f64, CliError> {
    raw.parse::<f64>()
        .map_err(|_| CliError::invalid_input(format!("{flag} expects a number, got '{raw}'")))
}

fn print_version() {
    println!("ipr {}", env!("CARGO_PKG_VERSION"));
}

fn print_root_help() {
    println!(
        "ipr {}\n\nUSAGE:\n  ipr <COMMAND> [OPTIONS]\n\nCOMMANDS:\n  train      Train an inter-percentile-range model from a JSON record file\n  validate   Validate JSON samples against a trained model\n\nGLOBAL OPTIONS:\n  -h, --help      Show help\n  -V, --version   Show version\n\nRun 'ipr <COMMAND> --help' for subcommand options.\nLog verbosity follows RUST_LOG (default: warn).",
        env!("CARGO_PKG_VERSION")
    );
}

fn print_command_help(command: &str) -> Result<(), CliError> {
    match command {
        "train" => {
            println!(
                "USAGE:\n  ipr train --records <path> --output <path> [OPTIONS]\n\nOPTIONS:\n  --records <path>          Required JSON array of records\n  --output <path>           Required model file to write\n  --config <path>           Optional checker config JSON (flags override it)\n  --chunk-size <usize>      Default: 1000\n  --low <float>             Default: 0.25\n  --high <float>            Default: 0.75\n  --filter <pattern>        Sample-type pattern; default matches all\n  --codec <json|bincode>    Default: json"
            );
            Ok(())
        }
        "validate" => {
            println!(
                "USAGE:\n  ipr validate --model <path> --input <path> [OPTIONS]\n\nOPTIONS:\n  --model <path>            Required model file\n  --input <path>            Required JSON array of samples\n  --factor <float>          Default: 3.0\n  --all                     Report every issue instead of the first\n  --output <path>           Write JSON report to file\n\nEXIT STATUS:\n  0 all samples clean, 2 at least one sample has issues, 1 error"
            );
            Ok(())
        }
        _ => Err(CliError::invalid_input(format!(
            "unknown command '{command}'; expected one of: train, validate"
        ))),
    }
}

fn read_text(path: &Path, what: &str) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| {
        CliError::io(format!("failed to read {what} '{}'", path.display()), source)
    })
}

fn build_train_config(args: &TrainArgs) -> Result<IprConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => parse_config_json(&read_text(path, "config")?)?,
        None => IprConfig::default(),
    };
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(low) = args.low {
        config.low_percentile = low;
    }
    if let Some(high) = args.high {
        config.high_percentile = high;
    }
    if let Some(pattern) = &args.filter {
        config.population_filter = SampleTypeFilter::new(pattern.as_str());
    }
    config.validate()?;
    Ok(config)
}

fn handle_train(args: TrainArgs) -> Result<Outcome, CliError> {
    let config = build_train_config(&args)?;
    let records = parse_records_json(&read_text(&args.records, "records")?)?;
    info!(records = records.len(), path = %args.records.display(), "loaded training records");

    let model = train_model(records, config)?;
    save_model_to_file(&args.output, &model, args.codec)?;

    write_json_output(
        &TrainOutput {
            model_path: args.output.display().to_string(),
            codec: args.codec,
            amplitude_keys: model.amplitude_key_count(),
            field_keys: model.field_ranges().len(),
            diagnostics: model.diagnostics(),
        },
        None,
    )?;
    Ok(Outcome::Clean)
}

fn handle_validate(args: ValidateArgs) -> Result<Outcome, CliError> {
    let model: IprModel = load_model_from_file(&args.model)?;
    let samples = parse_records_json(&read_text(&args.input, "samples")?)?;
    let mode = if args.all {
        ReportMode::AllViolations
    } else {
        ReportMode::FirstViolation
    };
    let validator = Validator::new(args.factor, mode)?;

    let summary = validate_samples(&model, &samples, &validator);
    write_json_output(&summary, args.output.as_deref())?;
    Ok(if summary.all_clean() {
        Outcome::Clean
    } else {
        Outcome::IssuesFound
    })
}

fn write_json_output<T: Serialize>(
    payload: &T,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    let encoded = serde_json::to_string_pretty(payload)
        .map_err(|source| CliError::json("failed to serialize JSON output", source))?;

    if let Some(path) = output_path {
        fs::write(path, format!("{encoded}\n"))
            .map_err(|source| CliError::io(format!("failed to write '{}'", path.display()), source))
    } else {
        println!("{encoded}");
        Ok(())
    }
}

fn emit_structured_error(err: &CliError) {
    let envelope = ErrorEnvelope {
        error: ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    };

    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!(
            "{{\"error\":{{\"code\":\"{}\",\"message\":\"{}\"}}}}",
            err.code(),
            err
        ),
    }
}
