//! Models command - download and inspect the default models of each task.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use clap::{Args, Subcommand};
use console::style;
use futures_util::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, info};

use nlprt_core::models::artifacts::remote_files;
use nlprt_core::{ArtifactPaths, RuntimeConfig, Task};

use super::load_config;

const HUB_URL: &str = "https://huggingface.co";

/// Arguments for the models command.
#[derive(Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    command: ModelsCommand,
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List the default model of every task
    List,

    /// Check which default models are present in the cache
    Status(StatusArgs),

    /// Print the cache directory of a task's default model
    Path {
        /// Task name (e.g., "sentiment", "qa", "translation")
        task: Task,
    },

    /// Download a task's default model into the cache
    Download(DownloadArgs),
}

#[derive(Args)]
struct StatusArgs {
    /// Check a single task only
    task: Option<Task>,
}

#[derive(Args)]
struct DownloadArgs {
    /// Task whose default model to fetch
    task: Task,

    /// Force re-download even if files exist
    #[arg(long)]
    force: bool,
}

pub async fn run(args: ModelsArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    match args.command {
        ModelsCommand::List => list_models(),
        ModelsCommand::Status(status_args) => check_status(status_args, &config),
        ModelsCommand::Path { task } => {
            println!("{}", config.model_dir(task.default_model().repo_id).display());
            Ok(())
        }
        ModelsCommand::Download(download_args) => download_model(download_args, &config).await,
    }
}

fn list_models() -> anyhow::Result<()> {
    println!("{}", style("Default Models").bold());
    println!();

    for task in Task::ALL {
        let default = task.default_model();
        println!(
            "  {:<14} {:<52} {}",
            style(task.name()).cyan().bold(),
            default.repo_id,
            style(default.architecture).dim()
        );
    }

    println!();
    println!("Commands:");
    println!("  nlprt models download <task>    Fetch a default model");
    println!("  nlprt models status             Show what is cached");

    Ok(())
}

/// Artifact files of `task`'s default model and whether each is present.
fn artifact_status(task: Task, config: &RuntimeConfig) -> anyhow::Result<Vec<(String, Option<u64>)>> {
    let default = task.default_model();
    let dir = config.model_dir(default.repo_id);
    let paths = ArtifactPaths::in_dir(&dir, &config.models.weights_file, default.architecture);

    Ok(paths
        .required(default.architecture)?
        .into_iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let size = fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len());
            (name, size)
        })
        .collect())
}

fn check_status(args: StatusArgs, config: &RuntimeConfig) -> anyhow::Result<()> {
    println!("{}", style("Model Status").bold());
    println!("Cache: {}", config.models.cache_dir.display());
    println!();

    let tasks: Vec<Task> = match args.task {
        Some(task) => vec![task],
        None => Task::ALL.to_vec(),
    };

    for task in tasks {
        let default = task.default_model();
        println!(
            "{} {}",
            style(format!("▸ {}", task)).bold(),
            config.model_dir(default.repo_id).display()
        );

        let files = artifact_status(task, config)?;
        let mut total_size = 0;
        for (name, size) in &files {
            match size {
                Some(size) => {
                    total_size += size;
                    println!("    {} {:<25} {:>10}", style("✓").green(), name, format_size(*size));
                }
                None => println!("    {} {:<25} {:>10}", style("✗").red(), name, "missing"),
            }
        }

        if files.iter().all(|(_, size)| size.is_some()) {
            println!(
                "    {} Ready ({} total)",
                style("✓").green(),
                format_size(total_size)
            );
        } else {
            println!(
                "    {} Run 'nlprt models download {}' to download",
                style("⚠").yellow(),
                task
            );
        }
        println!();
    }

    Ok(())
}

fn file_url(repo_id: &str, remote: &str) -> String {
    format!("{}/{}/resolve/main/{}", HUB_URL, repo_id, remote)
}

async fn download_model(args: DownloadArgs, config: &RuntimeConfig) -> anyhow::Result<()> {
    let default = args.task.default_model();
    let output_dir = config.model_dir(default.repo_id);
    fs::create_dir_all(&output_dir)?;

    println!(
        "{} Downloading {} to {}",
        style("ℹ").blue(),
        style(default.repo_id).cyan().bold(),
        output_dir.display()
    );
    println!();

    let client = reqwest::Client::builder()
        .user_agent(concat!("nlprt-cli/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(600))
        .build()?;

    let multi_progress = MultiProgress::new();
    let style_template = ProgressStyle::default_bar()
        .template("  {spinner:.green} {msg:<20} [{bar:25.cyan/blue}] {bytes}/{total_bytes}")?
        .progress_chars("=>-");

    let mut success_count = 0;
    let mut skip_count = 0;
    let mut failures = Vec::new();

    for (remote, local) in remote_files(default.architecture) {
        let local = if local == "model.onnx" {
            config.models.weights_file.as_str()
        } else {
            local
        };
        let path = output_dir.join(local);

        if path.is_file() && !args.force {
            let size = fs::metadata(&path)?.len();
            println!(
                "  {} {} (already exists, {})",
                style("✓").green(),
                local,
                format_size(size)
            );
            skip_count += 1;
            continue;
        }

        let pb = multi_progress.add(ProgressBar::new(0));
        pb.set_style(style_template.clone());
        pb.set_message(local.to_string());

        let url = file_url(default.repo_id, remote);
        debug!("Fetching {}", url);
        match download_file(&client, &url, &path, &pb).await {
            Ok(()) => {
                pb.finish_with_message(format!("{} {}", style("✓").green(), local));
                success_count += 1;
            }
            Err(e) => {
                pb.finish_with_message(format!("{} {} - {}", style("✗").red(), local, e));
                failures.push(local.to_string());
            }
        }
    }

    println!();
    if failures.is_empty() {
        info!("Model {} is ready in {}", default.repo_id, output_dir.display());
        println!(
            "{} {} model downloaded successfully!",
            style("✓").green().bold(),
            args.task
        );
        if skip_count > 0 {
            println!("   {} downloaded, {} already present", success_count, skip_count);
        }
        Ok(())
    } else {
        println!(
            "{} Download completed with errors",
            style("⚠").yellow().bold()
        );
        println!(
            "   {} downloaded, {} skipped, {} failed",
            success_count,
            skip_count,
            failures.len()
        );
        println!();
        println!("Retry with: nlprt models download {} --force", args.task);
        anyhow::bail!("failed to download {}", failures.join(", "))
    }
}

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    pb: &ProgressBar,
) -> anyhow::Result<()> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }

    if let Some(content_length) = response.content_length() {
        pb.set_length(content_length);
    }

    // Renamed into place only once the stream is complete.
    let temp_path = path.with_extension("part");
    let mut file = File::create(&temp_path)?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1}GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1}MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1}KB", bytes as f64 / 1_000.0)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hub_urls() {
        assert_eq!(
            file_url("facebook/bart-large-cnn", "onnx/model.onnx"),
            "https://huggingface.co/facebook/bart-large-cnn/resolve/main/onnx/model.onnx"
        );
    }

    #[test]
    fn test_status_reports_missing_and_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.models.cache_dir = dir.path().to_path_buf();

        let model_dir = config.model_dir(Task::Sentiment.default_model().repo_id);
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(model_dir.join("config.json"), "{}").unwrap();

        let status = artifact_status(Task::Sentiment, &config).unwrap();
        assert_eq!(
            status,
            vec![
                ("model.onnx".to_string(), None),
                ("config.json".to_string(), Some(2)),
                ("vocab.txt".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2_500), "2.5KB");
        assert_eq!(format_size(255_000_000), "255.0MB");
    }
}
