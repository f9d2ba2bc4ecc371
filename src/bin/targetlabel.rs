//! targetlabel CLI: label target records with an LLM.
//!
//! Usage:
//!   targetlabel run [--config path] [--subject S]... [--id I]... [--topic T]...
//!   targetlabel vocabulary [--vocabulary path] [--subject S]...
//!   targetlabel search (--null-explanation | --explanation-contains TEXT) [--input path]

use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use targetlabel::{
    find_ids_by_explanation, CancellationToken, ExplanationCondition, Labeler, LabelerConfig,
    RecordFilter, RecordStream, RunRequest,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "targetlabel",
    version,
    about = "Label target records against a controlled vocabulary with an LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one labeling pass and write the results
    Run(RunArgs),
    /// Show the vocabulary subset the model would see
    Vocabulary {
        /// Vocabulary file (JSON, YAML or CSV)
        #[arg(long)]
        vocabulary: Option<PathBuf>,
        /// Only show topics of these subjects
        #[arg(long = "subject")]
        subjects: Vec<String>,
    },
    /// Print the ids of records whose explanation meets a condition
    Search(SearchArgs),
}

#[derive(Args)]
struct SearchArgs {
    /// Record source document
    #[arg(long)]
    input: Option<PathBuf>,
    #[command(flatten)]
    condition: ConditionArgs,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ConditionArgs {
    /// Records whose explanation is present and null
    #[arg(long)]
    null_explanation: bool,
    /// Records whose explanation contains this text
    #[arg(long)]
    explanation_contains: Option<String>,
}

impl ConditionArgs {
    fn condition(&self) -> ExplanationCondition {
        match &self.explanation_contains {
            Some(text) => ExplanationCondition::Contains(text.clone()),
            None => ExplanationCondition::IsNull,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Record source document
    #[arg(long)]
    input: Option<PathBuf>,
    /// Vocabulary file (JSON, YAML or CSV)
    #[arg(long)]
    vocabulary: Option<PathBuf>,
    /// Directory holding prompt templates
    #[arg(long)]
    prompt_dir: Option<PathBuf>,
    /// Prompt template name
    #[arg(long)]
    prompt_name: Option<String>,
    /// Where the labeled records are written
    #[arg(long)]
    output: Option<PathBuf>,
    /// Maximum provider calls in flight
    #[arg(long)]
    concurrency: Option<usize>,
    /// Only label records with this subject (repeatable)
    #[arg(long = "subject")]
    subjects: Vec<String>,
    /// Only label the record with this id (repeatable)
    #[arg(long = "id")]
    ids: Vec<String>,
    /// Only label records with this topic (repeatable)
    #[arg(long = "topic")]
    topics: Vec<String>,
    /// Restrict the vocabulary shown to the model to these subjects (repeatable)
    #[arg(long = "vocab-subject")]
    vocabulary_subjects: Vec<String>,
    /// Include the full result list in the printed summary
    #[arg(long)]
    full: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut LabelerConfig) {
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(vocabulary) = &self.vocabulary {
            config.vocabulary = vocabulary.clone();
        }
        if let Some(dir) = &self.prompt_dir {
            config.prompt_dir = dir.clone();
        }
        if let Some(name) = &self.prompt_name {
            config.prompt_name = name.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
    }

    fn request(&self) -> RunRequest {
        RunRequest {
            subjects: self.subjects.clone(),
            ids: self.ids.clone(),
            topics: self.topics.clone(),
            vocabulary_subjects: self.vocabulary_subjects.clone(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<LabelerConfig, String> {
    match path {
        Some(path) => LabelerConfig::load(path),
        None => LabelerConfig::load_default(),
    }
    .map_err(|e| e.to_string())
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: cannot serialize output: {}", e),
    }
}

async fn cmd_run(mut config: LabelerConfig, args: RunArgs) -> i32 {
    args.apply(&mut config);
    let labeler = match Labeler::from_config(config) {
        Ok(labeler) => labeler,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    match labeler.run(&args.request(), cancel).await {
        Ok(mut summary) => {
            info!(output = %labeler.config().output.display(), "results written");
            if !args.full {
                summary.results.clear();
            }
            print_json(&summary);
            0
        }
        Err(failure) => {
            print_json(&failure.envelope());
            1
        }
    }
}

fn cmd_vocabulary(config: &LabelerConfig, vocabulary: Option<PathBuf>, subjects: Vec<String>) -> i32 {
    let path = vocabulary.unwrap_or_else(|| config.vocabulary.clone());
    let filter: HashSet<String> = subjects.into_iter().collect();
    match targetlabel::vocabulary::load(&path, &filter) {
        Ok(loaded) => {
            println!("{}", loaded.prompt.render());
            eprintln!(
                "{} of {} topics shown; subjects: {}",
                loaded.prompt.len(),
                loaded.index.len(),
                loaded.index.subjects().into_iter().collect::<Vec<_>>().join(", ")
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_search(config: &LabelerConfig, args: SearchArgs) -> i32 {
    let input = args.input.unwrap_or_else(|| config.input.clone());
    let records = match RecordStream::open(&input, &config.record_path, RecordFilter::new()) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match find_ids_by_explanation(records, &args.condition.condition()).await {
        Ok(ids) => {
            eprintln!("{} matching records", ids.len());
            print_json(&ids);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Run(args) => cmd_run(config, args).await,
        Commands::Vocabulary {
            vocabulary,
            subjects,
        } => cmd_vocabulary(&config, vocabulary, subjects),
        Commands::Search(args) => cmd_search(&config, args).await,
    };
    std::process::exit(code);
}
