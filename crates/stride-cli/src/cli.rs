use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stride_core::RecordKind;

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Submit health record batches and redeliver the ones that failed")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the retry queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub queue_path: Option<PathBuf>,

    /// Ingestion API base URL (overrides STRIDE_API_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a batch for the next retry pass without sending it now
    Enqueue {
        /// Record kind: workout, metric, step or sleep
        kind: RecordKind,
        /// Owner the batch belongs to
        #[arg(long)]
        owner: String,
        /// JSON array of records (stdin when omitted)
        file: Option<PathBuf>,
    },
    /// Send a batch now, queueing it when the backend is unreachable
    Submit {
        /// Record kind: workout, metric, step or sleep
        kind: RecordKind,
        /// Owner the batch belongs to
        #[arg(long)]
        owner: String,
        /// JSON array of records (stdin when omitted)
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one redelivery pass over due entries
    Run {
        /// Stop starting deliveries once this many seconds have elapsed
        #[arg(long, value_name = "SECS")]
        budget_secs: Option<u64>,
        /// Worst-case duration of one delivery
        #[arg(long, value_name = "SECS", default_value = "10")]
        reserve_secs: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Trigger redelivery passes on an interval until interrupted
    Watch {
        /// Seconds between passes
        #[arg(long, value_name = "SECS", default_value = "900")]
        interval_secs: u64,
        /// Budget for each pass
        #[arg(long, value_name = "SECS", default_value = "25")]
        budget_secs: u64,
        /// Worst-case duration of one delivery
        #[arg(long, value_name = "SECS", default_value = "10")]
        reserve_secs: u64,
    },
    /// Show queue counts
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List entries that exhausted their retries or were refused
    Failed {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export failed entries, payloads included, for manual recovery
    ExportFailed {
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Delete completed entries
    ClearCompleted,
    /// Show records the backend already stores for these origin ids
    Lookup {
        kind: RecordKind,
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        origin_ids: Vec<String>,
    },
    /// Delete stored records by origin id
    Delete {
        kind: RecordKind,
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        origin_ids: Vec<String>,
    },
}
