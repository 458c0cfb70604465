use clap::{Parser, ValueEnum};
use mozibgone::config::{ConfigDecoder, ConfigError, ConfigView};
use mozibgone::magic::{parse_magic, UPX_MAGIC};
use mozibgone::unpack::{UnpackError, UnpackOptions, UnpackOutcome, Unpacker, UpxTool};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_UNPACK: u8 = 1;
const EXIT_DECODE: u8 = 2;

#[derive(Parser)]
#[command(name = "mozibgone", version, about = "Mozi botnet unpacker and config extractor")]
struct Cli {
    /// Unpack the file only
    #[arg(short, long)]
    unpack: bool,
    /// Extract the configuration only
    #[arg(short, long)]
    extract: bool,
    /// Unpack and extract (the default when no mode is given)
    #[arg(short, long)]
    all: bool,
    /// Custom UPX magic number, e.g. "YTS0x99" (0xHH tokens are raw bytes)
    #[arg(short, long)]
    magic: Option<String>,
    /// Separate file for UPX to output to
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Enable debug output (overrides RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
    /// Only report warnings and errors (overrides RUST_LOG)
    #[arg(short, long)]
    quiet: bool,
    /// Dump the decoded configuration to a JSON file
    #[arg(short, long)]
    json: Option<PathBuf>,
    /// Print one view of the decoded configuration to stdout
    #[arg(short, long, value_enum)]
    print: Option<PrintView>,
    /// Print the value of one config tag (e.g. "count") to stdout
    #[arg(short, long)]
    field: Option<String>,
    /// Log extraction failures instead of failing the run
    #[arg(long)]
    keep_going: bool,
    /// The upx executable to run
    #[arg(long, env = "MOZIBGONE_UPX", default_value = "upx")]
    upx: PathBuf,
    /// Sample(s) to operate on
    #[arg(required = true, num_args = 1..)]
    files: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PrintView {
    Raw,
    Parsed,
    SigA,
    SigB,
}

impl From<PrintView> for ConfigView {
    fn from(v: PrintView) -> Self {
        match v {
            PrintView::Raw    => ConfigView::Raw,
            PrintView::Parsed => ConfigView::Parsed,
            PrintView::SigA   => ConfigView::SignatureA,
            PrintView::SigB   => ConfigView::SignatureB,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    info!("mozibgone - Mozi botnet unpacker and config extractor");

    if cli.files.len() > 1 && (cli.output.is_some() || cli.json.is_some()) {
        error!("--output and --json take a single input file");
        return ExitCode::from(EXIT_UNPACK);
    }

    let magic = match cli.magic.as_deref().map(parse_magic).transpose() {
        Ok(m) => m.unwrap_or_else(|| UPX_MAGIC.to_vec()),
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_UNPACK);
        }
    };

    #[cfg(feature = "parallel")]
    let statuses: Vec<u8> = {
        use rayon::prelude::*;
        cli.files.par_iter().map(|f| process_sample(&cli, f, &magic)).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let statuses: Vec<u8> = cli.files.iter().map(|f| process_sample(&cli, f, &magic)).collect();

    ExitCode::from(statuses.into_iter().max().unwrap_or(0))
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// `-q` and `-v` win over `RUST_LOG`; without either, `RUST_LOG` or `info`.
fn log_directives(verbose: bool, quiet: bool, env: Option<String>) -> String {
    match (quiet, verbose) {
        (true, _) => "warn".into(),
        (_, true) => "debug".into(),
        _         => env.filter(|d| !d.trim().is_empty()).unwrap_or_else(|| "info".into()),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directives = log_directives(verbose, quiet, env);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("ignoring invalid log filter {directives:?}: {e}");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Run the selected stages on one sample; returns its exit status.
fn process_sample(cli: &Cli, file: &Path, magic: &[u8]) -> u8 {
    let everything = cli.all || !(cli.unpack || cli.extract);

    if cli.unpack || everything {
        info!("Unpacking file '{}'", file.display());
        let opts = UnpackOptions { magic: magic.to_vec(), output: cli.output.clone() };
        match Unpacker::new(file, opts, UpxTool::new(&cli.upx)).unpack() {
            Ok(UnpackOutcome::Clean) => info!("Successfully unpacked '{}'", file.display()),
            Ok(UnpackOutcome::Normalized) => {
                info!("Successfully unpacked '{}' after fixing magic numbers", file.display())
            }
            Ok(UnpackOutcome::Repaired(report)) => info!(
                "Successfully unpacked '{}' after restoring p_info sizes ({})",
                file.display(),
                hex::encode(report.value)
            ),
            Err(UnpackError::NotUpxPacked) => {
                error!("The file '{}' does not seem to be packed with UPX", file.display());
                return EXIT_UNPACK;
            }
            Err(e) => {
                error!("{e}");
                return EXIT_UNPACK;
            }
        }
    }

    if cli.extract || everything {
        let target = cli.output.as_deref().unwrap_or(file);
        if let Err(e) = extract(cli, target) {
            if cli.keep_going {
                warn!("Could not extract config from '{}': {e}", target.display());
            } else {
                error!("{e}");
                return EXIT_DECODE;
            }
        }
    }

    0
}

fn extract(cli: &Cli, target: &Path) -> Result<(), ConfigError> {
    let config = ConfigDecoder::new(target).decode()?;
    info!("Extracted config:\n\n{}\n", serde_json::to_string(&config)?);
    info!("Successfully extracted config from '{}'", target.display());

    if let Some(view) = cli.print {
        println!("{}", config.lookup(view.into()).into_result()?);
    }
    if let Some(tag) = &cli.field {
        println!("{}", config.field(tag).into_result()?);
    }
    if let Some(path) = &cli.json {
        config.dump_json(path)?;
    }
    Ok(())
}
