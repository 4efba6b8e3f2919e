//! Predict command - run one task pipeline over one or more inputs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info};

use nlprt_core::{
    Answer, Architecture, ArtifactPaths, Entity, NerModel, PosModel, PosTag, QaModel,
    RuntimeConfig, Sentiment, SentimentModel, SummarizationModel, TextGenerationModel,
    TranslationModel, ZeroShotLabel, ZeroShotModel,
};

use super::{load_config, Loader};

/// Arguments for the predict command.
#[derive(Args)]
pub struct PredictArgs {
    #[command(subcommand)]
    task: PredictTask,

    /// Directory holding model.onnx, config.json and the vocabulary files
    /// (default: the task's cached default model)
    #[arg(short, long, global = true)]
    model_dir: Option<PathBuf>,

    /// Architecture of the model in --model-dir, by name or tag
    /// (default: read from config.json)
    #[arg(short, long, global = true)]
    architecture: Option<Architecture>,

    /// Read inputs from a file, one per line
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum PredictTask {
    /// Classify the sentiment of a text
    Sentiment { text: Option<String> },

    /// Tag every word with its part of speech
    Pos { text: Option<String> },

    /// Extract named entities
    Ner { text: Option<String> },

    /// Answer a question from a context passage
    Qa {
        /// Context passage; with --input, each line is a context
        context: Option<String>,

        #[arg(short, long)]
        question: String,

        /// Number of answers to return
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Summarize a text
    Summarize { text: Option<String> },

    /// Score a text against candidate labels
    ZeroShot {
        text: Option<String>,

        /// Comma-separated candidate labels
        #[arg(short, long, value_delimiter = ',', required = true)]
        labels: Vec<String>,

        /// Score each label independently
        #[arg(long)]
        multi_label: bool,
    },

    /// Translate a text
    Translate {
        text: Option<String>,

        /// Source language name or ISO code
        #[arg(long)]
        source: Option<String>,

        /// Target language name or ISO code
        #[arg(long)]
        target: String,
    },

    /// Continue a prompt
    Generate {
        prompt: Option<String>,

        /// Conditioning text that is not echoed in the output
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    /// One JSON document per input
    Json,
    /// Plain text
    Text,
}

/// Result of one input, in the shape of its task.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Prediction {
    Sentiment(Sentiment),
    Tags(Vec<PosTag>),
    Entities(Vec<Entity>),
    Answers(Vec<Answer>),
    Summaries(Vec<String>),
    Labels(Vec<ZeroShotLabel>),
    Text(String),
}

/// Where the model comes from.
enum ModelSource {
    Default,
    Files(ArtifactPaths, Architecture),
}

macro_rules! load_model {
    ($model:ident, $source:expr, $config:expr) => {
        match $source {
            ModelSource::Default => $model::new(&Loader::default(), $config)?,
            ModelSource::Files(paths, architecture) => {
                $model::from_files(&Loader::default(), paths, *architecture, $config)?
            }
        }
    };
}

pub async fn run(args: PredictArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;
    let source = model_source(&args, &config)?;

    let inputs = read_inputs(&args)?;
    debug!("{} input(s)", inputs.len());

    let pb = progress_bar(inputs.len());
    let mut predictions = Vec::with_capacity(inputs.len());

    match &args.task {
        PredictTask::Sentiment { .. } => {
            let model = load_model!(SentimentModel, &source, &config);
            for text in &inputs {
                predictions.push(Prediction::Sentiment(model.predict(text)?));
                pb.inc(1);
            }
        }
        PredictTask::Pos { .. } => {
            let model = load_model!(PosModel, &source, &config);
            for text in &inputs {
                predictions.push(Prediction::Tags(model.predict(text)?));
                pb.inc(1);
            }
        }
        PredictTask::Ner { .. } => {
            let model = load_model!(NerModel, &source, &config);
            for text in &inputs {
                predictions.push(Prediction::Entities(model.predict(text)?));
                pb.inc(1);
            }
        }
        PredictTask::Qa {
            question, top_k, ..
        } => {
            let mut model = load_model!(QaModel, &source, &config);
            if let Some(top_k) = top_k {
                model = model.with_top_k(*top_k);
            }
            for context in &inputs {
                predictions.push(Prediction::Answers(model.predict(question, context)?));
                pb.inc(1);
            }
        }
        PredictTask::Summarize { .. } => {
            let model = load_model!(SummarizationModel, &source, &config);
            for text in &inputs {
                predictions.push(Prediction::Summaries(model.summarize(text)?));
                pb.inc(1);
            }
        }
        PredictTask::ZeroShot {
            labels,
            multi_label,
            ..
        } => {
            let mut model = load_model!(ZeroShotModel, &source, &config);
            if *multi_label {
                model = model.with_multi_label(true);
            }
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            for text in &inputs {
                predictions.push(Prediction::Labels(model.predict(text, &labels)?));
                pb.inc(1);
            }
        }
        PredictTask::Translate { source: from, target, .. } => {
            let model = load_model!(TranslationModel, &source, &config);
            for text in &inputs {
                let translated = model.translate(text, from.as_deref(), target)?;
                predictions.push(Prediction::Text(translated));
                pb.inc(1);
            }
        }
        PredictTask::Generate { prefix, .. } => {
            let model = load_model!(TextGenerationModel, &source, &config);
            for prompt in &inputs {
                predictions.push(Prediction::Text(model.generate(prompt, prefix.as_deref())?));
                pb.inc(1);
            }
        }
    }

    pb.finish_and_clear();
    info!(
        "Ran {} input(s) in {:.2}s",
        predictions.len(),
        start.elapsed().as_secs_f64()
    );

    for prediction in &predictions {
        match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(prediction)?),
            OutputFormat::Text => println!("{}", render_text(prediction)),
        }
    }

    Ok(())
}

fn model_source(args: &PredictArgs, config: &RuntimeConfig) -> anyhow::Result<ModelSource> {
    let Some(dir) = &args.model_dir else {
        if args.architecture.is_some() {
            anyhow::bail!("--architecture requires --model-dir");
        }
        return Ok(ModelSource::Default);
    };

    let architecture = match args.architecture {
        Some(architecture) => architecture,
        None => detect_architecture(dir)?,
    };
    let paths = ArtifactPaths::in_dir(dir, &config.models.weights_file, architecture);
    debug!("Using {} model in {}", architecture, dir.display());
    Ok(ModelSource::Files(paths, architecture))
}

/// Read `model_type` from the directory's `config.json`.
fn detect_architecture(dir: &Path) -> anyhow::Result<Architecture> {
    let path = dir.join("config.json");
    if !path.is_file() {
        anyhow::bail!(
            "No config.json in {}; pass --architecture explicitly",
            dir.display()
        );
    }
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let model_type = json
        .get("model_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("{} has no model_type", path.display()))?;
    Ok(Architecture::from_model_type(model_type)?)
}

fn read_inputs(args: &PredictArgs) -> anyhow::Result<Vec<String>> {
    let positional = match &args.task {
        PredictTask::Sentiment { text }
        | PredictTask::Pos { text }
        | PredictTask::Ner { text }
        | PredictTask::Summarize { text }
        | PredictTask::ZeroShot { text, .. }
        | PredictTask::Translate { text, .. } => text,
        PredictTask::Qa { context, .. } => context,
        PredictTask::Generate { prompt, .. } => prompt,
    };

    match (&args.input, positional) {
        (Some(_), Some(_)) => anyhow::bail!("Pass the input text or --input, not both"),
        (Some(path), None) => {
            let content = fs::read_to_string(path)?;
            let lines: Vec<String> = content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect();
            if lines.is_empty() {
                anyhow::bail!("No inputs in {}", path.display());
            }
            Ok(lines)
        }
        (None, Some(text)) => Ok(vec![text.clone()]),
        (None, None) => anyhow::bail!("No input text; pass it as an argument or use --input"),
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    if len < 2 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} inputs")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

fn render_text(prediction: &Prediction) -> String {
    match prediction {
        Prediction::Sentiment(s) => format!("{} ({:.4})", style(&s.label).bold(), s.score),
        Prediction::Tags(tags) => tags
            .iter()
            .map(|t| format!("{}/{}", t.word, t.label))
            .collect::<Vec<_>>()
            .join(" "),
        Prediction::Entities(entities) if entities.is_empty() => style("(no entities)").dim().to_string(),
        Prediction::Entities(entities) => entities
            .iter()
            .map(|e| {
                format!(
                    "{:<6} {} [{}..{}] ({:.4})",
                    e.label, e.word, e.offset.begin, e.offset.end, e.score
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Prediction::Answers(answers) if answers.is_empty() => style("(no answer)").dim().to_string(),
        Prediction::Answers(answers) => answers
            .iter()
            .map(|a| format!("{} [{}..{}] ({:.4})", a.answer, a.start, a.end, a.score))
            .collect::<Vec<_>>()
            .join("\n"),
        Prediction::Summaries(summaries) => summaries.join("\n"),
        Prediction::Labels(labels) => labels
            .iter()
            .map(|l| format!("{:<20} {:.4}", l.text, l.score))
            .collect::<Vec<_>>()
            .join("\n"),
        Prediction::Text(text) => text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use nlprt_core::Span;
    use pretty_assertions::assert_eq;

    #[derive(Parser)]
    struct Harness {
        #[command(subcommand)]
        command: HarnessCommand,
    }

    #[derive(Subcommand)]
    enum HarnessCommand {
        Predict(PredictArgs),
    }

    fn parse(argv: &[&str]) -> PredictArgs {
        let mut full = vec!["nlprt", "predict"];
        full.extend_from_slice(argv);
        let HarnessCommand::Predict(args) = Harness::try_parse_from(full).unwrap().command;
        args
    }

    #[test]
    fn test_architecture_detected_from_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), r#"{"model_type": "distilbert"}"#).unwrap();
        assert_eq!(detect_architecture(dir.path()).unwrap(), Architecture::DistilBert);

        fs::write(dir.path().join("config.json"), r#"{"model_type": "llama"}"#).unwrap();
        assert!(detect_architecture(dir.path()).is_err());
    }

    #[test]
    fn test_inputs_from_file_skip_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.txt");
        fs::write(&path, "first\n\n  \nsecond\n").unwrap();

        let args = parse(&["sentiment", "--input", path.to_str().unwrap()]);
        assert_eq!(read_inputs(&args).unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_input_sources_are_exclusive() {
        let args = parse(&["ner", "Amy", "--input", "x.txt"]);
        assert!(read_inputs(&args).is_err());
        let args = parse(&["ner"]);
        assert!(read_inputs(&args).is_err());
    }

    #[test]
    fn test_qa_context_is_the_input() {
        let args = parse(&["qa", "-q", "Where?", "Paris is in France"]);
        assert_eq!(read_inputs(&args).unwrap(), vec!["Paris is in France"]);
    }

    #[test]
    fn test_zero_shot_labels_split_on_commas() {
        let args = parse(&["zero-shot", "text", "-l", "politics,sports"]);
        match args.task {
            PredictTask::ZeroShot { labels, .. } => assert_eq!(labels, vec!["politics", "sports"]),
            _ => panic!("wrong task"),
        }
    }

    #[test]
    fn test_json_shapes() {
        let entity = Prediction::Entities(vec![Entity {
            word: "Paris".to_string(),
            label: "LOC".to_string(),
            score: 0.5,
            offset: Span { begin: 0, end: 5 },
        }]);
        assert_eq!(
            serde_json::to_string(&entity).unwrap(),
            r#"[{"word":"Paris","label":"LOC","score":0.5,"offset":{"begin":0,"end":5}}]"#
        );
        assert_eq!(
            serde_json::to_string(&Prediction::Text("bonjour".to_string())).unwrap(),
            r#""bonjour""#
        );
    }

    #[test]
    fn test_text_rendering() {
        let tags = Prediction::Tags(vec![
            PosTag {
                word: "Amy".to_string(),
                label: "PROPN".to_string(),
                score: 0.9,
            },
            PosTag {
                word: "walks".to_string(),
                label: "VERB".to_string(),
                score: 0.8,
            },
        ]);
        assert_eq!(render_text(&tags), "Amy/PROPN walks/VERB");
        assert_eq!(
            render_text(&Prediction::Summaries(vec!["a".into(), "b".into()])),
            "a\nb"
        );
    }
}
