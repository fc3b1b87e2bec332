use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use support_scribe::config::AppConfig;
use support_scribe::core::feedback::LinkPolarity;
use support_scribe::core::generation::{
    find_format, GenerationError, GenerationEvent, TokenCount, RESPONSE_FORMATS,
};
use support_scribe::core::llm::GoogleProvider;
use support_scribe::core::logging::{self, LogOptions};
use support_scribe::core::storage::FileStore;
use support_scribe::core::support::{SessionOptions, SupportSession};

#[derive(Debug, Parser)]
#[command(name = "support-scribe", version, about = "Streaming support-reply generator")]
struct Cli {
    /// Config file (default: ~/.config/support-scribe/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Format to select at startup; repeat for several, in order
    #[arg(short = 'f', long = "format", value_name = "ID")]
    formats: Vec<String>,
    /// Preload the context from a file
    #[arg(long, value_name = "FILE")]
    context: Option<PathBuf>,
    /// Generate once from the preloaded context and exit
    #[arg(long, requires = "context")]
    once: bool,
    /// Mirror logs to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };

    let mut log_options = LogOptions::new(config.log_dir());
    log_options.stderr = cli.verbose;
    if cli.verbose {
        log_options.default_filter = "debug".to_string();
    }
    let _log_guard = logging::init(&log_options);
    log::info!("Support Scribe v{} starting", support_scribe::VERSION);

    let default_formats = if cli.formats.is_empty() {
        config.generation.default_formats.clone()
    } else {
        cli.formats
            .iter()
            .map(|id| match find_format(id) {
                Some(format) => Ok(format.id.to_string()),
                None => bail!("Unknown format {id:?}; known: {}", catalog_ids()),
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let provider = GoogleProvider::with_options(
        config.provider.api_key()?,
        config.provider.model.clone(),
        config.provider.base_url.clone(),
        config.provider.request_timeout(),
    )
    .context("Failed to build provider")?;
    let store = FileStore::open(config.store_dir()).context("Failed to open data store")?;

    let options = SessionOptions {
        token_debounce: config.generation.token_debounce(),
        coalesce_window: config.generation.coalesce_window(),
        stream_idle_timeout: config.generation.stream_idle_timeout(),
        default_formats,
        retention_hours: config.data.retention_hours,
    };
    let (session, events) = SupportSession::start(Arc::new(provider), Arc::new(store), options).await;
    let session = Arc::new(session);
    let printer = tokio::spawn(print_events(events));

    if let Some(path) = &cli.context {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read context from {}", path.display()))?;
        session.on_context_edit(&text);
    }

    if cli.once {
        let result = session.on_generate().await;
        session.shutdown();
        drop(session);
        let _ = printer.await;
        result?;
        return Ok(());
    }

    let outcome = repl(Arc::clone(&session)).await;

    session.shutdown();
    log::info!("Support Scribe exiting");
    outcome
}

async fn repl(session: Arc<SupportSession>) -> anyhow::Result<()> {
    print_help();

    let mut context = session.context_text();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let Some(command) = line.trim().strip_prefix('/') else {
            if !context.is_empty() {
                context.push('\n');
            }
            context.push_str(&line);
            session.on_context_edit(&context);
            continue;
        };

        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map(|(name, arg)| (name, arg.trim()))
            .unwrap_or((command, ""));

        match name {
            "generate" | "g" => spawn_run(&session, false),
            "regen" | "r" => spawn_run(&session, true),
            "good" | "bad" => {
                let polarity = if name == "good" {
                    LinkPolarity::Good
                } else {
                    LinkPolarity::Bad
                };
                if arg.is_empty() {
                    eprintln!("Usage: /{name} <url>");
                } else if session.on_link_feedback(arg, polarity).await {
                    eprintln!("Marked {arg} as {polarity}");
                } else {
                    eprintln!("No change for {arg:?}");
                }
            }
            "links" => {
                for link in session.output_links() {
                    let mark = session
                        .link_feedback(&link)
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    eprintln!("  [{mark:>4}] {link}");
                }
            }
            "format" => {
                if session.toggle_format(arg) {
                    eprintln!("Selected {}", arg.to_ascii_uppercase());
                }
                eprintln!("Formats: {}", session.formats().join(", "));
            }
            "formats" => {
                let selected = session.formats();
                for format in RESPONSE_FORMATS {
                    let mark = if selected.iter().any(|s| s == format.id) { '*' } else { ' ' };
                    eprintln!(" {mark} {:<4} {}: {}", format.id, format.name, format.description);
                }
            }
            "template" => match arg {
                "" => eprintln!("{}", session.instruction_template()),
                "reset" => {
                    session.reset_template().await;
                    eprintln!("Template reset to default");
                }
                path => match read_template(path).await {
                    Err(e) => eprintln!("{e:#}"),
                    Ok(text) if session.save_template(&text).await => eprintln!("Template saved"),
                    Ok(_) => eprintln!("Template could not be saved"),
                },
            },
            "tokens" => match session.token_count() {
                TokenCount::Known(n) => eprintln!("~{n} tokens"),
                TokenCount::Counting => eprintln!("Counting..."),
                TokenCount::Unavailable => eprintln!("Token count unavailable"),
            },
            "status" => {
                eprintln!("State: {:?}", session.run_state());
                if let Some(err) = session.last_error() {
                    eprintln!("Last error: {err}");
                }
                eprintln!("Regenerations: {}", session.regenerations_scheduled());
            }
            "clear" => {
                session.on_clear_all().await;
                context.clear();
                eprintln!("Cleared");
            }
            "help" => print_help(),
            "quit" | "exit" => break,
            other => eprintln!("Unknown command /{other}; /help lists commands"),
        }
    }

    Ok(())
}

async fn read_template(path: &str) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read template from {path}"))
}

fn spawn_run(session: &Arc<SupportSession>, restart: bool) {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        let result = if restart {
            session.on_regenerate().await
        } else {
            session.on_generate().await
        };
        match result {
            Ok(_) | Err(GenerationError::Cancelled) => {}
            Err(e @ (GenerationError::Validation(_) | GenerationError::AlreadyRunning)) => {
                eprintln!("{e}")
            }
            // Provider failures arrive as events
            Err(_) => {}
        }
    });
}

async fn print_events(mut events: mpsc::UnboundedReceiver<GenerationEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            GenerationEvent::Started { run_id, formats } => {
                eprintln!("--- run {run_id}: {} ---", formats.join(", "))
            }
            GenerationEvent::Delta { text, .. } => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            GenerationEvent::Completed { .. } => {
                let _ = writeln!(stdout);
            }
            GenerationEvent::Failed { error, .. } => {
                let _ = writeln!(stdout);
                eprintln!("Error: {error}");
            }
            GenerationEvent::Cancelled { run_id } => eprintln!("\n(run {run_id} cancelled)"),
        }
    }
}

fn catalog_ids() -> String {
    RESPONSE_FORMATS
        .iter()
        .map(|f| f.id)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_help() {
    eprintln!(
        "Type or paste context; each line is appended.\n\
         Commands:\n  \
           /generate, /g       generate from the current context\n  \
           /regen, /r          cancel any run and generate again\n  \
           /good <url>         mark a link good\n  \
           /bad <url>          mark a link bad (reruns the last generation)\n  \
           /links              links in the output with their marks\n  \
           /format <ID>        toggle a format\n  \
           /formats            list formats\n  \
           /template [reset|<file>]  show, reset or load the instruction template\n  \
           /tokens             context token estimate\n  \
           /status             run state and last error\n  \
           /clear              clear context, output and selection\n  \
           /quit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_template_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.md");

        let err = read_template(&missing.to_string_lossy()).await.unwrap_err();
        assert!(format!("{err:#}").starts_with("Failed to read template from"));
    }

    #[tokio::test]
    async fn test_template_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.md");
        std::fs::write(&path, "Be brief. {blocked_links_list}").unwrap();

        let text = read_template(&path.to_string_lossy()).await.unwrap();
        assert_eq!(text, "Be brief. {blocked_links_list}");
    }
}
