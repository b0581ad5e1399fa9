use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use invasion_corpus::config::{ConfigLoader, ConfigOverrides, ResolvedConfig, resolve_api_key};
use invasion_corpus::crossref::{CrossrefHttpClient, Harvester};
use invasion_corpus::domain::InputKind;
use invasion_corpus::error::CorpusError;
use invasion_corpus::insights::{self, InsightKind};
use invasion_corpus::llm::OpenAiHttpClient;
use invasion_corpus::maintenance;
use invasion_corpus::output::{ConsoleOutput, JsonOutput, OutputMode};
use invasion_corpus::pipeline::{Pipeline, PipelineOptions, ProgressSink, extract_one};
use invasion_corpus::schema::PaperInput;
use invasion_corpus::sink::OutputDir;
use invasion_corpus::source::RowSource;

#[derive(Parser)]
#[command(name = "invasion-corpus")]
#[command(about = "Build an invasion-biology literature corpus with LLM entity extraction")]
#[command(version, author)]
struct Cli {
    /// Print summaries as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Path to a JSON config file (default: ./invasion-corpus.json).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Extract entities for every row of a DOI/Title/Abstract table")]
    Extract(ExtractArgs),
    #[command(about = "Extract entities for a single paper and print the result")]
    ExtractOne(ExtractOneArgs),
    #[command(about = "Count entity tuples across extracted JSON files")]
    Insights(InsightsArgs),
    #[command(about = "Fetch Crossref metadata for a table of DOIs")]
    Crossref(CrossrefArgs),
    #[command(about = "Count extracted and N/A outputs in a directory")]
    Count(CountArgs),
    #[command(about = "Remove outputs whose names differ only by punctuation")]
    DedupOutputs(DedupOutputsArgs),
    #[command(about = "Drop repeated DOIs from a table, keeping the first row")]
    DedupTable(DedupTableArgs),
    #[command(about = "List output files that match no DOI in a table")]
    Audit(AuditArgs),
}

#[derive(Args, Clone, Default)]
struct LlmArgs {
    /// API key (default: $OPENAI_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: String,

    #[command(flatten)]
    llm: LlmArgs,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    max_failures: Option<u32>,

    #[arg(long, value_enum)]
    input_kind: Option<InputKind>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ExtractOneArgs {
    #[arg(long, requires = "abstract_text", conflicts_with = "full_text")]
    title: Option<String>,

    #[arg(long = "abstract", id = "abstract_text")]
    abstract_text: Option<String>,

    /// File holding the full paper text.
    #[arg(long)]
    full_text: Option<PathBuf>,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args)]
struct InsightsArgs {
    #[arg(value_enum)]
    kind: InsightKind,

    #[arg(long)]
    input: String,

    #[arg(long)]
    output: String,
}

#[derive(Args)]
struct CrossrefArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: String,
}

#[derive(Args)]
struct CountArgs {
    #[arg(long)]
    dir: String,
}

#[derive(Args)]
struct DedupOutputsArgs {
    #[arg(long)]
    dir: String,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct DedupTableArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,

    #[arg(long, default_value = "DOI")]
    column: String,
}

#[derive(Args)]
struct AuditArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    dir: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CorpusError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CorpusError) -> u8 {
    match error {
        CorpusError::MissingColumns(_)
        | CorpusError::Table(_)
        | CorpusError::ConfigRead(_)
        | CorpusError::ConfigParse(_)
        | CorpusError::InvalidConfig(_)
        | CorpusError::MissingApiKey
        | CorpusError::DirectoryNotFound(_) => 2,
        CorpusError::LlmHttp(_)
        | CorpusError::LlmStatus { .. }
        | CorpusError::LlmPayload(_)
        | CorpusError::CrossrefHttp(_)
        | CorpusError::CrossrefStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Extract(args) => run_extract(args, config, output_mode),
        Commands::ExtractOne(args) => run_extract_one(args, config, output_mode),
        Commands::Insights(args) => run_insights(args, output_mode),
        Commands::Crossref(args) => run_crossref(args, config, output_mode),
        Commands::Count(args) => {
            let counts = maintenance::count_outputs(&Utf8PathBuf::from(args.dir.clone()))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&counts).into_diagnostic(),
                OutputMode::Human => {
                    ConsoleOutput::print_counts(&args.dir, &counts);
                    Ok(())
                }
            }
        }
        Commands::DedupOutputs(args) => {
            let report =
                maintenance::dedup_outputs(&Utf8PathBuf::from(args.dir), args.dry_run)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&report).into_diagnostic(),
                OutputMode::Human => {
                    ConsoleOutput::print_dedup(&report);
                    Ok(())
                }
            }
        }
        Commands::DedupTable(args) => {
            let report = maintenance::dedup_table(&args.input, &args.output, &args.column)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&report).into_diagnostic(),
                OutputMode::Human => {
                    ConsoleOutput::print_table_dedup(&report, &args.output.display().to_string());
                    Ok(())
                }
            }
        }
        Commands::Audit(args) => {
            let report = maintenance::audit(&args.input, &Utf8PathBuf::from(args.dir))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&report).into_diagnostic(),
                OutputMode::Human => {
                    ConsoleOutput::print_audit(&report);
                    Ok(())
                }
            }
        }
    }
}

fn resolve_config(
    path: Option<&str>,
    llm: &LlmArgs,
    overrides: ConfigOverrides,
) -> miette::Result<ResolvedConfig> {
    let overrides = ConfigOverrides {
        model: llm.model.clone(),
        base_url: llm.base_url.clone(),
        ..overrides
    };
    Ok(ConfigLoader::resolve(path, &overrides)?)
}

fn llm_client(config: &ResolvedConfig, llm: &LlmArgs) -> miette::Result<OpenAiHttpClient> {
    let api_key = resolve_api_key(llm.api_key.as_deref())?;
    Ok(OpenAiHttpClient::new(config.llm.clone(), &api_key)?)
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &ConsoleOutput,
    }
}

fn run_extract(
    args: ExtractArgs,
    config: Option<&str>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let resolved = resolve_config(
        config,
        &args.llm,
        ConfigOverrides {
            workers: args.workers,
            max_failures: args.max_failures,
            input_kind: args.input_kind,
            ..ConfigOverrides::default()
        },
    )?;
    let source = RowSource::open(&args.input)?;
    let client = llm_client(&resolved, &args.llm)?;
    let options = PipelineOptions::from_settings(&resolved.pipeline, args.dry_run);
    let output = OutputDir::new(Utf8PathBuf::from(args.output));
    let pipeline = Pipeline::new(client, output, options);

    let summary = pipeline.run(source, sink_for(output_mode))?;
    match output_mode {
        OutputMode::Json => JsonOutput::print(&summary).into_diagnostic(),
        OutputMode::Human => {
            ConsoleOutput::print_run(&summary);
            Ok(())
        }
    }
}

fn run_extract_one(
    args: ExtractOneArgs,
    config: Option<&str>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let input = match (&args.full_text, &args.title, &args.abstract_text) {
        (Some(path), _, _) => PaperInput::FullText {
            text: std::fs::read_to_string(path)
                .map_err(|err| CorpusError::Filesystem(format!("{}: {err}", path.display())))?,
        },
        (None, Some(title), Some(abstract_text)) => PaperInput::TitleAbstract {
            title: title.trim().to_string(),
            abstract_text: abstract_text.trim().to_string(),
        },
        _ => {
            return Err(miette::Report::msg(
                "provide --title and --abstract, or --full-text <file>",
            ));
        }
    };

    let resolved = resolve_config(config, &args.llm, ConfigOverrides::default())?;
    let client = llm_client(&resolved, &args.llm)?;
    let result = extract_one(&client, &input)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Human => ConsoleOutput::print_single(&result).into_diagnostic(),
    }
}

fn run_insights(args: InsightsArgs, output_mode: OutputMode) -> miette::Result<()> {
    let output = Utf8PathBuf::from(args.output);
    let report = insights::compile(args.kind, &Utf8PathBuf::from(args.input))?;
    insights::write_csv(&report, &output)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print(&report).into_diagnostic(),
        OutputMode::Human => {
            ConsoleOutput::print_insights(&report, output.as_str());
            Ok(())
        }
    }
}

fn run_crossref(
    args: CrossrefArgs,
    config: Option<&str>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(config, &ConfigOverrides::default())?;
    let client = CrossrefHttpClient::new(&resolved.crossref)?;
    let harvester = Harvester::new(client, &resolved.crossref);
    let summary = harvester.harvest(
        &args.input,
        &Utf8PathBuf::from(args.output),
        sink_for(output_mode),
    )?;
    match output_mode {
        OutputMode::Json => JsonOutput::print(&summary).into_diagnostic(),
        OutputMode::Human => {
            ConsoleOutput::print_harvest(&summary);
            Ok(())
        }
    }
}
