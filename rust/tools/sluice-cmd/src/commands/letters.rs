//! Letters command implementation

use std::{
    collections::BTreeMap,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use serde::Serialize;
use sluice_pipeline::{
    Pipeline, PipelineConfig,
    letters::{LetterFrequency, letter_frequency_fetcher},
};

pub struct LettersArgs {
    pub files: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub workers: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub json: bool,
    pub strict: bool,
}

#[derive(Serialize)]
struct LettersSummary {
    files: usize,
    completed: usize,
    termination: String,
    elapsed_ms: u128,
    letters: BTreeMap<char, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<FailureInfo>,
}

#[derive(Serialize)]
struct FailureInfo {
    path: String,
    error: String,
}

pub fn run(args: LettersArgs) -> Result<()> {
    let stdout = io::stdout();
    let stderr = io::stderr();
    run_with_output(args, &mut stdout.lock(), &mut stderr.lock())
}

pub fn run_with_output(
    args: LettersArgs,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<()> {
    let config = load_config(&args)?;
    let file_count = args.files.len();
    let output = Pipeline::builder(letter_frequency_fetcher())
        .with_config(config)
        .build(args.files)
        .context("Invalid pipeline settings")?
        .run(LetterFrequency::new(), LetterFrequency::merge);

    for failure in &output.failures {
        writeln!(err, "{}: {}", failure.task.display(), failure.error)?;
    }

    if args.json {
        let summary = LettersSummary {
            files: file_count,
            completed: output.completed,
            termination: output.termination.to_string(),
            elapsed_ms: output.elapsed.as_millis(),
            letters: output.value.iter().collect(),
            failures: output
                .failures
                .iter()
                .map(|f| FailureInfo {
                    path: f.task.display().to_string(),
                    error: f.error.to_string(),
                })
                .collect(),
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
    } else {
        for (letter, count) in output.value.iter() {
            writeln!(out, "{letter}-{count}")?;
        }
    }

    if args.strict {
        output
            .into_result()
            .context("Some files could not be processed")?;
    }
    Ok(())
}

fn load_config(args: &LettersArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.timeout_ms.is_some() {
        config.timeout_ms = args.timeout_ms;
    }
    Ok(config)
}
