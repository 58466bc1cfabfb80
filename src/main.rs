use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use wardrobe_uploader::config::{self, Config};
use wardrobe_uploader::models::{ManualAssignment, UploadItem};
use wardrobe_uploader::session::{FileSession, SessionProvider};
use wardrobe_uploader::uploader::{HttpWardrobeClient, RunOutcome, UploadPipeline};

#[derive(Parser, Debug)]
#[command(name = "wardrobe-uploader", version, about = "Upload clothing photos to your wardrobe")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload up to ten images and add them to the wardrobe
    Upload {
        #[arg(required = true)]
        files: Vec<String>,
        /// Category applied to every image the classifier could not place
        #[arg(long, env = "WARDROBE_DEFAULT_CATEGORY")]
        category: Option<String>,
    },
    /// Remember the user uploads are made for
    Login { user_id: String },
    /// Forget the stored user
    Logout,
    /// Inspect or reset the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = config::load_config();

    env_logger::Builder::from_default_env()
        .filter_level(
            loaded
                .as_ref()
                .map(Config::log_filter)
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let config = loaded.context("Failed to load configuration")?;
    let session = FileSession::default_location()?;

    match cli.command {
        Command::Upload { files, category } => upload(config, session, files, category).await,
        Command::Login { user_id } => {
            session.login(&user_id)?;
            println!("Signed in as {}", user_id.trim());
            Ok(())
        }
        Command::Logout => {
            session.logout()?;
            println!("Signed out");
            Ok(())
        }
        Command::Config { action } => {
            let config = match action {
                ConfigAction::Show => config,
                ConfigAction::Reset => config::reset_config()?,
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn upload(
    config: Config,
    session: FileSession,
    files: Vec<String>,
    category: Option<String>,
) -> Result<()> {
    if session.current_user().is_none() {
        log::warn!("No user signed in; run `wardrobe-uploader login <USER_ID>` first");
    }

    let api = Arc::new(HttpWardrobeClient::new(&config)?);
    let pipeline = UploadPipeline::new(api, Arc::new(session), config.event_buffer);

    let mut progress_rx = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let snapshot = progress_rx.borrow_and_update().clone();
            if let Some(phase) = snapshot.progress.phase {
                println!(
                    "[{}] {}/{} {}",
                    phase,
                    snapshot.progress.current,
                    snapshot.progress.total,
                    snapshot.progress.message
                );
            }
        }
    });

    let images: Vec<UploadItem> = files.iter().map(|f| UploadItem::from_path(f)).collect();
    let mut outcome = pipeline.run(images).await;

    if let Ok(RunOutcome::ManualRequired { rejected }) = &outcome {
        let assignments = collect_assignments(rejected, category.as_deref()).await?;
        outcome = pipeline.submit_manual_assignments(assignments).await;
    }

    let failed_uploads = pipeline.failed_uploads();
    printer.abort();

    for failed in &failed_uploads {
        println!("Skipped {}: {}", failed.name, failed.error);
    }

    match outcome {
        Ok(RunOutcome::Complete { added }) => {
            println!("{} item(s) added to your wardrobe", added);
            Ok(())
        }
        Ok(RunOutcome::ManualRequired { rejected }) => {
            bail!("{} item(s) still need a category", rejected.len())
        }
        Err(e) => Err(e).context("Upload failed"),
    }
}

async fn collect_assignments(
    rejected: &[String],
    default_category: Option<&str>,
) -> Result<Vec<ManualAssignment>> {
    if let Some(category) = default_category {
        return Ok(rejected
            .iter()
            .map(|url| ManualAssignment::new(url.clone(), category))
            .collect());
    }

    println!("The classifier could not place {} item(s).", rejected.len());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut assignments = Vec::with_capacity(rejected.len());

    for url in rejected {
        loop {
            println!("Category for {}:", url);
            let line = lines
                .next_line()
                .await?
                .context("Input closed before every item had a category")?;
            match wardrobe_uploader::security::InputValidator::validate_category(&line) {
                Ok(()) => {
                    assignments.push(ManualAssignment::new(url.clone(), line.trim()));
                    break;
                }
                Err(e) => println!("{}", e),
            }
        }
    }

    Ok(assignments)
}
