//! CLI entry point for the deltagraph sync daemon.

use anyhow::Context;
use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use deltagraph_graph::GraphClient;

use deltagraph_sync::config::AppConfig;
use deltagraph_sync::doccache::{DocumentCache, MemoryDocumentCache};
use deltagraph_sync::graph_cache::GraphDocumentCache;
use deltagraph_sync::router::DeltaRouter;
use deltagraph_sync::source::JsonLinesSource;
use deltagraph_sync::supervisor::{self, StreamEnd};

#[derive(Parser)]
#[command(name = "deltagraph-sync")]
#[command(about = "Mirror chain document and edge tables into Dgraph")]
struct Cli {
    /// Config file prefix (default: deltagraph).
    #[arg(short, long, default_value = "deltagraph")]
    config: String,

    /// Recorded stream to replay, one JSON event per line ("-" for stdin).
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Dry run against the in-memory cache instead of Dgraph.
    #[arg(long)]
    memory: bool,

    /// Apply the bundled schema before checking it.
    #[arg(long)]
    init_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let span = tracing::info_span!("sync", run_id = %Uuid::new_v4());
    run(cli).instrument(span).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(&cli.config)?;
    tracing::info!(
        contract = %config.sync.contract,
        doc_table = %config.sync.doc_table,
        edge_table = %config.sync.edge_table,
        start_block = config.sync.start_block,
        transport_endpoint = ?config.sync.transport_endpoint,
        endpoint = %config.dgraph.endpoint,
        memory = cli.memory,
        "Configuration loaded"
    );

    if cli.memory {
        return sync(MemoryDocumentCache::new(), None, &config, &cli).await;
    }

    let client = GraphClient::connect(&config.graph_config())
        .await
        .with_context(|| format!("connecting to Dgraph at {}", config.dgraph.endpoint))?;
    tracing::info!(endpoint = %client.endpoint(), "Connected to Dgraph");

    let cache = GraphDocumentCache::new(client.clone(), &config.sync.cursor_id);
    if cli.init_schema || config.sync.init_schema {
        cache.init_schema().await?;
    }

    let result = sync(cache, Some(&client), &config, &cli).await;
    client.close();
    result
}

async fn sync<C: DocumentCache>(
    cache: C,
    inspector: Option<&GraphClient>,
    config: &AppConfig,
    cli: &Cli,
) -> anyhow::Result<()> {
    let resume = supervisor::prepare(inspector, &config.sync.required_types, &cache)
        .await?
        .or_else(|| config.start_cursor());
    tracing::info!(cursor = ?resume, "Resume position");

    let source = if cli.input == "-" {
        JsonLinesSource::stdin()
    } else {
        JsonLinesSource::open(&cli.input).await?
    };
    let mut source = source.resume_after(resume.clone());
    let mut router = DeltaRouter::new(cache, config.tracked_tables()).with_cursor(resume);

    let end = supervisor::run(&mut source, &mut router).await;

    let stats = router.stats();
    tracing::info!(
        cursor = ?router.cursor(),
        applied = stats.applied,
        skipped = stats.skipped,
        ignored = stats.ignored,
        "Sync finished"
    );

    match end? {
        StreamEnd::Completed { last_block } => {
            tracing::info!(last_block = %last_block, "Stream completed");
        }
        StreamEnd::Exhausted => tracing::info!("Input exhausted"),
    }
    Ok(())
}
