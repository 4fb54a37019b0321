//! Chat actions CLI
//!
//! An interactive REPL standing in for the chat transport. Each line is one
//! inbound event:
//!
//! - `{"tool": "mark_done", "arguments": {...}, "text": "..."}`: a planner intent
//! - `list <domain>` / `find <domain> <query>`: show records (feeds index references)
//! - `pick:2`, `confirm:<id>`, `cancel:<id>` or any other text: a reply

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use chat_actions_core::http_store;
use chat_actions_core::llm::LlmReplyClassifier;
use chat_actions_core::memory::{self, InMemoryShownLists, InMemoryStore, StaticOptionCatalog};
use chat_actions_core::{
    Config, ConversationId, Domain, Engine, Intent, Keyboard, ListFilter, MessageRef, Outcome, Presenter,
    Record, Stores,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "chat-actions")]
#[command(about = "Resolve and confirm record mutations from planner intents")]
struct Args {
    /// Seed records for the in-memory stores (JSON: {"task": [...], ...})
    #[arg(long = "records")]
    records_path: Option<PathBuf>,

    /// HTTP store definitions (JSON); replaces the in-memory stores
    #[arg(long = "stores")]
    stores_path: Option<PathBuf>,

    /// Config file (defaults to ./chat_actions.toml, then the user config dir)
    #[arg(long = "config")]
    config_path: Option<PathBuf>,

    /// Ask the LLM when a free-text reply is inconclusive
    #[arg(long = "use-llm")]
    use_llm: bool,

    /// Conversation id used for every event
    #[arg(long, default_value = "cli")]
    conversation: String,

    /// Enable verbose debug output
    #[arg(long, short = 'v')]
    verbose: bool,
}

// ============================================================================
// Console Presenter
// ============================================================================

/// Prints messages and their buttons to stdout
struct ConsolePresenter;

#[async_trait]
impl Presenter for ConsolePresenter {
    async fn send_message(
        &self,
        _conversation: &ConversationId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef> {
        println!("{}", text);
        if let Some(keyboard) = keyboard {
            for row in &keyboard.rows {
                let buttons: Vec<String> = row
                    .iter()
                    .map(|b| format!("[{}] {}", b.label, b.callback))
                    .collect();
                println!("  {}", buttons.join("   "));
            }
        }
        Ok(MessageRef(String::new()))
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_stores(args: &Args) -> Result<Stores> {
    if let Some(ref path) = args.stores_path {
        debug!("loading stores config from {}", path.display());
        return http_store::load_stores(path);
    }

    let mut seeds = match args.records_path {
        Some(ref path) => memory::load_records(path)?,
        None => Default::default(),
    };
    let mut stores = Stores::new();
    for domain in Domain::ALL {
        let records = seeds.remove(&domain).unwrap_or_default();
        debug!(domain = %domain, records = records.len(), "in-memory store");
        stores = stores.with(Arc::new(InMemoryStore::with_records(domain, records)));
    }
    Ok(stores)
}

// ============================================================================
// REPL
// ============================================================================

struct Session {
    engine: Engine,
    shown: Arc<InMemoryShownLists>,
    conversation: ConversationId,
}

impl Session {
    async fn handle_line(&self, line: &str) -> Result<()> {
        if line.starts_with('{') {
            let intent = Intent::from_json(line).context("Invalid intent")?;
            let outcome = self.engine.execute_tool_plan(&self.conversation, intent).await?;
            debug!(?outcome, "tool plan handled");
            return Ok(());
        }

        let mut words = line.splitn(3, ' ');
        match (words.next(), words.next(), words.next()) {
            (Some("list"), Some(domain), None) => self.show(domain, None).await,
            (Some("find"), Some(domain), Some(query)) => self.show(domain, Some(query)).await,
            _ => {
                let outcome = self.engine.handle_reply(&self.conversation, line).await?;
                if let Outcome::Reinterpret(_) = outcome {
                    println!("(no pending action takes that reply; send a JSON intent)");
                }
                Ok(())
            }
        }
    }

    /// Print records and remember them as the shown list of the domain
    async fn show(&self, domain: &str, query: Option<&str>) -> Result<()> {
        let domain = Domain::parse(domain).with_context(|| format!("Unknown domain: {}", domain))?;
        let store = self.engine.stores().get(domain)?;
        let records: Vec<Record> = match query {
            Some(q) => store.find(q, 10).await?,
            None => store.list(&ListFilter::default()).await?,
        };
        let items = self.shown.record(&self.conversation, domain, &records);
        if items.is_empty() {
            println!("(no {}s)", domain.label());
        }
        for item in items {
            println!("{}. {}", item.index, item.title);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match args.config_path {
        Some(ref path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let shown = Arc::new(InMemoryShownLists::new());
    let mut engine = Engine::new(
        &config,
        build_stores(&args)?,
        shown.clone(),
        Arc::new(ConsolePresenter),
        Arc::new(StaticOptionCatalog::from_config(&config)),
    );
    if args.use_llm {
        engine = engine.with_classifier(Arc::new(LlmReplyClassifier::new(config.llm.clone())?));
    }

    let session = Session {
        engine,
        shown,
        conversation: ConversationId::new(args.conversation.clone()),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }
        if let Err(e) = session.handle_line(line).await {
            warn!("{:#}", e);
            println!("error: {:#}", e);
        }
    }
    Ok(())
}
