//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docchat_core::chat::{CONSULTATION_ERROR, TurnOutcome};
use docchat_core::{DocChat, ProgressReporter};
use docchat_shared::{AppConfig, DocumentRef, Sender, init_config, load_config};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docchat — convert a document and chat about its content.
#[derive(Parser)]
#[command(
    name = "docchat",
    version,
    about = "Convert a document to markdown and ask questions grounded in it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the conversion service URL.
    #[arg(long, env = "DOCCHAT_CONVERT_URL", global = true)]
    pub convert_url: Option<String>,

    /// Override the storage service URL.
    #[arg(long, env = "DOCCHAT_STORE_URL", global = true)]
    pub store_url: Option<String>,

    /// Override the QA webhook URL.
    #[arg(long, env = "DOCCHAT_QA_URL", global = true)]
    pub qa_url: Option<String>,

    /// Re-attempt the storage step this many times after it fails.
    #[arg(long, default_value_t = 0, global = true)]
    pub store_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Convert a document, then answer questions about it.
    Chat {
        /// Document to upload.
        file: PathBuf,

        /// Question to ask (repeatable). Without any, an interactive prompt opens.
        #[arg(short, long = "question")]
        questions: Vec<String>,
    },

    /// Convert and store a document without opening a chat.
    Convert {
        /// Document to upload.
        file: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docchat=info",
        1 => "docchat=debug",
        _ => "docchat=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Chat { file, questions } => cmd_chat(&cli, file, questions).await,
        Command::Convert { file } => cmd_convert(&cli, file).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&cli).await,
        },
    }
}

/// Config file values with CLI/env overrides applied.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = load_config()?;
    if let Some(url) = &cli.convert_url {
        config.services.convert_url = url.clone();
    }
    if let Some(url) = &cli.store_url {
        config.services.store_url = url.clone();
    }
    if let Some(url) = &cli.qa_url {
        config.services.qa_url = url.clone();
    }
    Ok(config)
}

async fn read_document(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .wrap_err_with(|| format!("cannot read '{}'", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| eyre!("'{}' has no file name", path.display()))?;
    Ok((file_name, bytes))
}

/// Upload a document. A failed storage step is retried up to `retries` times;
/// when it still fails and `show_unstored` is set, the converted markdown is
/// printed before the error is returned.
async fn upload(
    session: &mut DocChat,
    file: &Path,
    retries: u32,
    show_unstored: bool,
) -> Result<DocumentRef> {
    let (file_name, bytes) = read_document(file).await?;
    info!(file = %file.display(), size = bytes.len(), "uploading document");

    let reporter = CliProgress::new();
    let mut result = session
        .upload(&file_name, bytes, &reporter, &CancellationToken::new())
        .await;

    let mut attempt = 0;
    while result.is_err() && attempt < retries && session.orchestrator().converted().is_some() {
        attempt += 1;
        warn!(attempt, retries, "storage failed, retrying");
        result = session.retry_persist(&reporter).await;
    }
    reporter.spinner.finish_and_clear();

    match result {
        Ok(document) => Ok(document),
        Err(e) => {
            if let Some(converted) = session.orchestrator().converted() {
                warn!(
                    markdown_len = converted.markdown.len(),
                    "document converted but not stored"
                );
                if show_unstored {
                    println!();
                    println!("  Document converted but NOT stored:");
                    println!();
                    println!("{}", converted.markdown);
                }
            }
            Err(e.into())
        }
    }
}

async fn cmd_convert(cli: &Cli, file: &Path) -> Result<()> {
    let config = resolve_config(cli)?;
    let mut session = DocChat::new(&config)?;
    let document = upload(&mut session, file, cli.store_retries, true).await?;
    let markdown = session.cache().get(&document.id)?;

    println!();
    println!("  Document stored!");
    println!("  ID:     {}", document.id);
    println!("  Length: {} bytes", document.content_len);
    println!();
    println!("{markdown}");

    Ok(())
}

async fn cmd_chat(cli: &Cli, file: &Path, questions: &[String]) -> Result<()> {
    let config = resolve_config(cli)?;
    let mut session = DocChat::new(&config)?;
    let document = upload(&mut session, file, cli.store_retries, false).await?;

    if !document.activates_chat() {
        return Err(eyre!(
            "no text could be extracted from '{}', nothing to chat about",
            file.display()
        ));
    }

    println!("  Document ready (id {}). Ask away.", document.id);

    if !questions.is_empty() {
        for question in questions {
            println!("> {question}");
            ask(&session, question).await;
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }
        ask(&session, &line).await;
    }

    Ok(())
}

/// Send one question, cancelling it on Ctrl-C, and print the reply.
async fn ask(session: &DocChat, question: &str) {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let spinner = thinking_spinner();
    let outcome = session.chat().send_with_cancel(question, &cancel).await;
    spinner.finish_and_clear();
    ctrl_c.abort();

    match outcome {
        TurnOutcome::Answered(_) | TurnOutcome::Failed(_) => {
            if let Some(reply) = session
                .chat()
                .messages()
                .last()
                .filter(|m| m.sender == Sender::Assistant)
            {
                println!("{}", reply.text);
            } else {
                println!("{CONSULTATION_ERROR}");
            }
        }
        TurnOutcome::Cancelled => println!("(cancelled)"),
        TurnOutcome::Ignored(reason) => info!(?reason, "question ignored"),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

fn thinking_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style());
    spinner.set_message("Thinking…");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _document: &DocumentRef) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
