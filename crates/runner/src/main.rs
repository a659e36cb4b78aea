//! `memberflow`: submit and watch bulk membership jobs.
//!
//! `bulk-add` and `undo` run an in-process worker pool and follow the job to a
//! terminal state; `status` and `cancel` only talk to the shared store, so
//! they work against jobs running in any other process.

use anyhow::Result;
use clap::{Parser, Subcommand};

use memberflow_core::{CollectionId, JobId, MemberId};
use memberflow_infra::OrchestratorConfig;

mod app;
mod render;

#[derive(Parser)]
#[command(bin_name = "memberflow")]
#[command(version)]
#[command(about = "Bulk collection membership jobs")]
#[command(propagate_version = true)]
struct Cli {
    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy members of SOURCE that TARGET lacks into TARGET
    BulkAdd {
        source: CollectionId,
        target: CollectionId,

        /// Only copy these member ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<MemberId>>,
    },

    /// Remove the members a bulk add inserted into TARGET
    Undo { job: JobId, target: CollectionId },

    /// Show a job's progress record
    Status {
        job: JobId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask a job to stop at its next checkpoint
    Cancel { job: JobId },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.pretty {
        memberflow_observability::init_pretty();
    } else {
        memberflow_observability::init();
    }

    let config = OrchestratorConfig::from_env()?;

    match cli.command {
        Commands::BulkAdd {
            source,
            target,
            ids,
        } => app::bulk_add(&config, source, target, ids),
        Commands::Undo { job, target } => app::undo(&config, job, target),
        Commands::Status { job, json } => app::status(&config, job, json),
        Commands::Cancel { job } => app::cancel(&config, job),
    }
}
