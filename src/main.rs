use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diff_review::config::Config;
use diff_review::core::{
    self as review_core, DiffReviewBuilder, GitIntegration, PostedComment, PullRequestFile,
    ReviewEvent, ReviewSubmission,
};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Colon-separated literal paths to leave out of the review.
const EXCLUDE_PATHS_VAR: &str = "exclude_paths";

#[derive(Parser)]
#[command(name = "diff-review")]
#[command(about = "Turns formatter diffs into pull request review suggestions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Config file (defaults to .diff-review.yml)")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build a review with one suggestion per hunk of the diff")]
    Build {
        #[arg(long, help = "Path to diff file (reads from stdin if not provided)")]
        diff: Option<PathBuf>,

        #[arg(long, help = "Repository root (defaults to the enclosing git work tree)")]
        repo_root: Option<PathBuf>,

        #[arg(long = "file", value_name = "PATTERN", help = "Files to review, as globs")]
        files: Vec<String>,

        #[arg(long, value_name = "PATTERN")]
        exclude: Vec<String>,

        #[arg(long)]
        body: Option<String>,

        #[arg(long)]
        inline_message: Option<String>,

        #[arg(long, help = "Attach a review event to the output")]
        event: Option<ReviewEvent>,

        #[arg(
            short,
            long,
            help = "Output file path (prints to stdout if not provided)"
        )]
        output: Option<PathBuf>,
    },
    #[command(about = "Split a review into the requests still worth posting")]
    Plan {
        #[arg(long, help = "Review JSON produced by `build --event`")]
        review: PathBuf,

        #[arg(long, help = "Pull request files JSON, as listed by the API")]
        pr_files: PathBuf,

        #[arg(long, help = "Review comments already on the pull request")]
        posted: Option<PathBuf>,

        #[arg(long)]
        per_review: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Ignoring config file: {:#}", e);
            Config::default()
        }),
    };

    match cli.command {
        Commands::Build {
            diff,
            repo_root,
            files,
            exclude,
            body,
            inline_message,
            event,
            output,
        } => {
            let mut config = config;
            let overrides = BuildOverrides {
                files,
                exclude,
                body,
                inline_message,
                event,
            };
            let with_event = overrides.event.is_some();
            overrides.apply(&mut config);
            build_command(config, diff, repo_root, with_event, output)?;
        }
        Commands::Plan {
            review,
            pr_files,
            posted,
            per_review,
            output,
        } => {
            let per_review = per_review.unwrap_or(config.suggestions_per_review);
            plan_command(&review, &pr_files, posted.as_deref(), per_review, output)?;
        }
    }

    Ok(())
}

/// CLI flags of `build` that take precedence over the config file.
struct BuildOverrides {
    files: Vec<String>,
    exclude: Vec<String>,
    body: Option<String>,
    inline_message: Option<String>,
    event: Option<ReviewEvent>,
}

impl BuildOverrides {
    fn apply(self, config: &mut Config) {
        config.merge_with_cli(self.body, self.inline_message, self.event);
        if !self.files.is_empty() {
            config.files = self.files;
        }
        config.exclude.extend(self.exclude);
    }
}

fn build_command(
    config: Config,
    diff_path: Option<PathBuf>,
    repo_root: Option<PathBuf>,
    with_event: bool,
    output_path: Option<PathBuf>,
) -> Result<()> {
    let diff_content = match diff_path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read diff {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let repo_root = repo_root.unwrap_or_else(|| {
        GitIntegration::new(".")
            .ok()
            .and_then(|git| git.workdir())
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let exclude_paths = std::env::var(EXCLUDE_PATHS_VAR).ok();
    match render_review(&config, &diff_content, &repo_root, with_event, exclude_paths.as_deref())? {
        Some(output) => write_output(output, output_path),
        None => Ok(()),
    }
}

/// Builds the review JSON for `diff_content`, or `None` when there is
/// nothing to review.
fn render_review(
    config: &Config,
    diff_content: &str,
    repo_root: &Path,
    with_event: bool,
    exclude_paths: Option<&str>,
) -> Result<Option<String>> {
    if diff_content.trim().is_empty() {
        info!("Formatting is fine. No issues found.");
        return Ok(None);
    }
    info!("Using repository root {}", repo_root.display());

    let mut exclude = config.exclude.clone();
    exclude.extend(review_core::files::read_ignore_file(repo_root)?);
    if let Some(paths) = exclude_paths {
        exclude.extend(review_core::files::literal_excludes(paths));
    }

    let allowed_files = review_core::collect_source_files(repo_root, &config.files, &exclude)?;
    if allowed_files.is_empty() {
        warn!("No files to review; pass --file or set `files` in the config");
    }

    let payload = DiffReviewBuilder::new(repo_root, &allowed_files)
        .build(diff_content, &config.review_body, &config.inline_message)
        .context("Failed to parse diff")?;
    info!("Generated {} suggestion(s)", payload.comments.len());

    let output = if with_event {
        serde_json::to_string_pretty(&payload.with_event(config.event))?
    } else {
        serde_json::to_string_pretty(&payload)?
    };
    Ok(Some(output))
}

fn plan_command(
    review_path: &Path,
    pr_files_path: &Path,
    posted_path: Option<&Path>,
    per_review: usize,
    output_path: Option<PathBuf>,
) -> Result<()> {
    let submission: ReviewSubmission = read_json(review_path)?;
    let files: Vec<PullRequestFile> = read_json(pr_files_path)?;
    let posted: Vec<PostedComment> = match posted_path {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    let reviews = review_core::plan_reviews(submission, &files, &posted, per_review);
    if reviews.is_empty() {
        info!("No new warnings found for this pull request.");
    } else {
        info!("Planned {} review(s)", reviews.len());
    }

    write_json(&reviews, output_path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(value: &T, output_path: Option<PathBuf>) -> Result<()> {
    write_output(serde_json::to_string_pretty(value)?, output_path)
}

fn write_output(output: String, output_path: Option<PathBuf>) -> Result<()> {
    if let Some(path) = output_path {
        std::fs::write(&path, output)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        println!("{}", output);
    }

    Ok(())
}
