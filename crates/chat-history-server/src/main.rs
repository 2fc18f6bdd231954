//! Chat history server.
//!
//! Hosts the chat history handler over a libSQL archive. `init-db` prepares a
//! database, `query` answers one history IQ read from a file or stdin and
//! prints the response stanza.

use anyhow::{Context, Result};
use chat_history::{is_history_query, ChatHistoryHandler, LibSqlHistoryStore};
use clap::{Parser, Subcommand};
use jid::BareJid;
use minidom::Element;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use xmpp_parsers::iq::Iq;

mod config;
mod telemetry;

use config::HistoryServerConfig;

const IN_MEMORY: &str = ":memory:";

/// Chat history server
#[derive(Parser)]
#[command(name = "chat-history-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the archive schema
    InitDb {
        /// XMPP domain of the server, used to resolve room addresses
        #[arg(short, long)]
        domain: Option<String>,
    },
    /// Answer one chat history IQ
    Query {
        /// Bare JID of the authenticated requester
        #[arg(short, long)]
        from: String,

        /// File holding the IQ stanza (stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HistoryServerConfig::load(cli.config.as_deref())?;
    telemetry::init(config.log.format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        variant = %config.history.variant,
        "Chat history server starting"
    );

    let store = open_store(config.database.path.as_deref()).await?;

    match cli.command {
        Commands::InitDb { domain } => init_db(&store, domain.as_deref()).await,
        Commands::Query { from, file } => {
            let requester = BareJid::new(&from)
                .with_context(|| format!("Invalid requester JID: {}", from))?;
            let raw = read_stanza(file.as_deref())?;
            let handler = ChatHistoryHandler::new(Arc::new(store), config.history);
            let response = answer(&handler, &requester, &raw).await?;
            println!("{}", response);
            Ok(())
        }
    }
}

/// Open the archive database and make sure its schema exists.
async fn open_store(path: Option<&str>) -> Result<LibSqlHistoryStore> {
    let path = path.unwrap_or(IN_MEMORY);
    if path == IN_MEMORY {
        warn!("No database path configured, using an empty in-memory archive");
    }

    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .with_context(|| format!("Failed to open database: {}", path))?;
    let conn = db.connect().context("Failed to connect to database")?;

    let store = LibSqlHistoryStore::new(conn);
    store
        .initialize()
        .await
        .context("Failed to initialize archive schema")?;

    Ok(store)
}

async fn init_db(store: &LibSqlHistoryStore, domain: Option<&str>) -> Result<()> {
    if let Some(domain) = domain {
        store
            .set_domain(domain)
            .await
            .context("Failed to store XMPP domain")?;
        info!(domain = %domain, "XMPP domain configured");
    }
    info!("Archive schema ready");
    Ok(())
}

fn read_stanza(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stanza file: {:?}", path)),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read stanza from stdin")?;
            Ok(raw)
        }
    }
}

/// Parse a raw IQ and run it through the handler.
async fn answer(
    handler: &ChatHistoryHandler<LibSqlHistoryStore>,
    requester: &BareJid,
    raw: &str,
) -> Result<String> {
    let elem: Element = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid XML: {}", e))?;
    let iq = Iq::try_from(elem).map_err(|e| anyhow::anyhow!("Not an IQ stanza: {}", e))?;

    if !is_history_query(&iq) {
        warn!(id = %iq.id, "IQ does not carry a chat history query");
    }

    let response = handler.handle(requester, &iq).await;
    Ok(String::from(&response))
}
