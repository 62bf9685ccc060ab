use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tmkp_kgx_export::app::{EdgeExportOptions, Exporter, compose_edges, export_metadata};
use tmkp_kgx_export::config::{ConfigLoader, ResolvedConfig};
use tmkp_kgx_export::domain::{AssertionRange, ExportTarget, IdentifierMode};
use tmkp_kgx_export::error::ExportError;
use tmkp_kgx_export::normalizer::NodeNormHttpClient;
use tmkp_kgx_export::output::{JsonOutput, LogSink};
use tmkp_kgx_export::source::SqliteAssertionSource;
use tmkp_kgx_export::store::LocalObjectStore;

#[derive(Parser)]
#[command(name = "kgx-export")]
#[command(about = "Export text-mined assertions as KGX node and edge files")]
#[command(version)]
struct Cli {
    /// Export stage to run.
    #[arg(long, short = 't', value_enum)]
    target: ExportTarget,

    /// Object storage root directory.
    #[arg(long, short = 'o')]
    output: Utf8PathBuf,

    /// Blob name prefix inside the object store.
    #[arg(long, default_value = "kgx/")]
    prefix: String,

    /// SQLite assertion datastore (nodes and edges targets).
    #[arg(long)]
    database: Option<Utf8PathBuf>,

    #[arg(long)]
    config: Option<String>,

    /// Assertions loaded per datastore query.
    #[arg(long, default_value_t = 100)]
    chunk_size: u64,

    /// Supporting study results per edge; 0 keeps all.
    #[arg(long, default_value_t = 5)]
    limit: usize,

    #[arg(long, default_value_t = 0)]
    assertion_offset: u64,

    #[arg(long, default_value_t = 10_000)]
    assertion_limit: u64,

    /// Translate protein-family ids to UniProt and drop untranslatable ones.
    #[arg(long)]
    uniprot: bool,

    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ExportError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ExportError) -> u8 {
    match error {
        ExportError::BlobNotFound(_) | ExportError::ConfigRead(_) | ExportError::ConfigParse(_) => 2,
        ExportError::Datastore(_)
        | ExportError::NormalizerHttp(_)
        | ExportError::NormalizerStatus { .. }
        | ExportError::Storage(_) => 3,
        ExportError::EmptyAggregation { .. } | ExportError::NonFiniteScore { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = LocalObjectStore::new(cli.output.clone())?;
    let mode = if cli.uniprot {
        IdentifierMode::Uniprot
    } else {
        IdentifierMode::Internal
    };
    info!(stage = %cli.target, mode = %mode, prefix = %cli.prefix, "kgx-export starting");

    match cli.target {
        ExportTarget::Nodes => {
            let mut exporter = exporter(&cli, config, store)?;
            let result = exporter.export_nodes(mode, &LogSink)?;
            JsonOutput::print_nodes(&result).into_diagnostic()?;
        }
        ExportTarget::Edges => {
            let options = EdgeExportOptions {
                mode,
                range: AssertionRange::new(cli.assertion_offset, cli.assertion_limit)?,
                chunk_size: cli.chunk_size,
                limit: cli.limit,
            };
            if options.chunk_size == 0 {
                return Err(ExportError::InvalidOption(
                    "--chunk-size must be greater than zero".to_string(),
                )
                .into());
            }
            let mut exporter = exporter(&cli, config, store)?;
            let result = exporter.export_edges(&options, &LogSink)?;
            JsonOutput::print_edges(&result).into_diagnostic()?;
        }
        ExportTarget::Compose => {
            let result = compose_edges(&store, &cli.prefix, &LogSink)?;
            JsonOutput::print_compose(&result).into_diagnostic()?;
        }
        ExportTarget::Metadata => {
            let result = export_metadata(&store, &cli.prefix, &config, &LogSink)?;
            JsonOutput::print_metadata(&result).into_diagnostic()?;
        }
    }
    Ok(())
}

fn exporter(
    cli: &Cli,
    config: ResolvedConfig,
    store: LocalObjectStore,
) -> Result<Exporter<SqliteAssertionSource, NodeNormHttpClient, LocalObjectStore>, ExportError> {
    let database = cli.database.as_ref().ok_or_else(|| {
        ExportError::InvalidOption(format!("--database is required for the {} target", cli.target))
    })?;
    let source = SqliteAssertionSource::open(database)?;
    let normalizer = NodeNormHttpClient::new(&config.normalizer)?;
    Ok(Exporter::new(source, normalizer, store, config, &cli.prefix))
}
