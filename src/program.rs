use std::path::PathBuf;

use anyhow::{Context, Error};
use clap::Parser;
use console::{style, Term};
use tracing::{info, trace};

use crate::archive::{
    init_config, init_logger, AppConfig, ConfigOverrides, Logger, Orchestrator, RunSummary,
};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line interface.
#[derive(Parser, Debug)]
#[command(name = "yiff-dl")]
#[command(version, about = "Archive a creator's posts, attachments and shared files", long_about = None)]
#[command(after_help = "Examples:\n  $ yiff-dl 3519586\n  $ yiff-dl https://yiff.party/patreon/3519586\n  $ yiff-dl \"Creator Name\" -o ./archive --nest-by-creator")]
pub(crate) struct Cli {
    /// Creator ID, creator URL, or creator display name
    pub creator: String,

    /// Output folder (default: ./yiff-dl-output)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Put everything under a subfolder named after the creator
    #[arg(long)]
    pub nest_by_creator: bool,

    /// Custom User-Agent header
    #[arg(long, value_name = "UA")]
    pub user_agent: Option<String>,

    /// Folder holding config.toml
    #[arg(long, default_value = "./config", value_name = "DIR")]
    pub config_dir: PathBuf,

    /// Maximum number of downloads in flight
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Disable per-file progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl Cli {
    pub(crate) fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            output_directory: self.output.clone(),
            user_agent: self.user_agent.clone(),
            nest_by_creator: self.nest_by_creator,
            max_download_concurrency: self.concurrency,
            no_progress: self.no_progress,
        }
    }
}

/// A program class that handles the flow of one archive run.
pub(crate) struct Program {
    cli: Cli,
}

impl Program {
    pub(crate) fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Loads the config with command line overrides applied on top.
    fn load_config(&self) -> Result<AppConfig, Error> {
        let manager = init_config(&self.cli.config_dir)
            .with_context(|| format!("Failed to load configuration from {}", self.cli.config_dir.display()))?;
        let mut config = manager.get_app_config().context("Failed to read configuration")?;
        config.apply_overrides(&self.cli.overrides());
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Runs the archiver.
    pub(crate) async fn run(&self) -> Result<RunSummary, Error> {
        let config = self.load_config()?;

        let logger: Option<Logger> = match init_logger(&config) {
            Ok(logger) => Some(logger),
            Err(e) => {
                eprintln!("{} logging unavailable: {}", style("warning:").yellow().bold(), e);
                None
            }
        };

        Term::stdout().set_title("yiff-dl");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Config Directory: {}", self.cli.config_dir.display());
        if let Some(dir) = logger.as_ref().and_then(Logger::log_file_dir) {
            trace!("Log Directory: {}", dir.display());
        }

        let mut orchestrator = Orchestrator::new(config).context("Failed to build HTTP client")?;
        info!(run_id = orchestrator.run_id(), creator = %self.cli.creator, "Starting archive run");

        let summary = orchestrator
            .run(&self.cli.creator)
            .await
            .with_context(|| format!("Could not archive creator {:?}", self.cli.creator))?;
        info!(run_id = orchestrator.run_id(), state = %orchestrator.state(), "Archive run ended");

        print_summary(&summary);
        Ok(summary)
    }
}

fn print_summary(summary: &RunSummary) {
    let term = Term::stdout();
    let creator = summary
        .creator
        .as_ref()
        .map(|c| format!("{} ({})", c.name, c.id))
        .unwrap_or_default();

    let _ = term.write_line("");
    let _ = term.write_line(&format!("{} {}", style("Finished archiving").green().bold(), style(creator).cyan()));
    let _ = term.write_line(&format!("  Output:       {}", summary.output_directory.display()));

    if summary.metadata_failed {
        let _ = term.write_line(&format!(
            "  {}",
            style("Creator metadata could not be fetched, nothing was archived").yellow()
        ));
        return;
    }

    let _ = term.write_line(&format!(
        "  Posts:        {} archived, {} skipped, {} without HTML",
        summary.posts_archived, summary.posts_skipped, summary.fragments_missing
    ));
    let _ = term.write_line(&format!("  Shared files: {}", summary.shared_files_seen));
    let _ = term.write_line(&format!(
        "  Files:        {} saved, {} already present",
        style(summary.artifacts_saved).green(),
        summary.artifacts_skipped
    ));

    if !summary.crawl_complete() {
        let _ = term.write_line(&format!(
            "  {} listing pages {:?} of {} could not be crawled",
            style("Incomplete:").yellow().bold(),
            summary.pages_failed,
            summary.pages_total
        ));
    }

    if summary.artifacts_failed() > 0 {
        let _ = term.write_line(&format!("  {} {}", style("Failed:").red().bold(), summary.artifacts_failed()));
        for failure in &summary.failures {
            let _ = term.write_line(&format!(
                "    {} -> {}: {}",
                failure.url,
                failure.path.display(),
                failure.reason
            ));
        }
        let _ = term.write_line("  Run the same command again to retry failed downloads.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_missing_creator_is_a_usage_error() {
        let err = Cli::try_parse_from(["yiff-dl"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "yiff-dl",
            "3519586",
            "-o",
            "/tmp/out",
            "--nest-by-creator",
            "--user-agent",
            "ua",
            "--concurrency",
            "8",
            "--no-progress",
        ])
        .unwrap();
        assert_eq!(cli.config_dir, PathBuf::from("./config"));

        let mut config = AppConfig::default();
        config.apply_overrides(&cli.overrides());
        assert_eq!(config.paths.output_directory, "/tmp/out");
        assert_eq!(config.http.user_agent, "ua");
        assert!(config.output.nest_by_creator);
        assert_eq!(config.pools.max_download_concurrency, 8);
        assert!(!config.output.show_progress);
    }

    #[test]
    fn test_defaults_leave_config_untouched() {
        let cli = Cli::try_parse_from(["yiff-dl", "Some Name"]).unwrap();
        let mut config = AppConfig::default();
        config.apply_overrides(&cli.overrides());
        assert_eq!(config.paths.output_directory, AppConfig::default().paths.output_directory);
        assert!(config.output.show_progress);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "yiff-dl",
            "42",
            "--concurrency",
            "0",
            "--config-dir",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();

        let err = Program::new(cli).run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid configuration"));
    }
}
