//! Clones command - Inspect finished clones in the durable store.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};

use replica_server::EngineConfig;
use replica_store::{DurableRecord, DurableStore, FsStore, Page};

#[derive(Args)]
pub struct ClonesArgs {
    #[command(subcommand)]
    command: ClonesCommand,
}

#[derive(Subcommand)]
enum ClonesCommand {
    /// List finished clones, newest first
    List {
        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Records per page
        #[arg(long, default_value_t = 20)]
        page_size: usize,

        /// Print the page as JSON
        #[arg(long = "output-json")]
        output_json: bool,
    },

    /// Show one clone and its files
    Show {
        /// Clone id
        id: String,

        /// Print the content of this file instead of the summary
        #[arg(long)]
        file: Option<String>,
    },
}

pub async fn execute(args: ClonesArgs, config_path: Option<&Path>) -> Result<()> {
    let config = EngineConfig::load(config_path)?;
    let store = FsStore::new(&config.data_dir);

    match args.command {
        ClonesCommand::List {
            page,
            page_size,
            output_json,
        } => {
            let page = store.list_records(page, page_size.clamp(1, 100)).await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                print!("{}", render_page(&page));
            }
        }
        ClonesCommand::Show { id, file } => {
            let record = store
                .get_record(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Clone not found: {}", id))?;

            match file {
                Some(path) => {
                    let content = store
                        .get_artifact(&id, &path)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("File not found in clone {}: {}", id, path))?;
                    print!("{}", content);
                }
                None => {
                    let artifacts = store.list_artifacts(&id).await?;
                    println!("{}", render_record(&record));
                    for artifact in artifacts {
                        println!("  {} ({} lines)", artifact.path, artifact.content.lines().count());
                    }
                }
            }
        }
    }

    Ok(())
}

fn render_record(record: &DurableRecord) -> String {
    let mut out = format!(
        "{}  {}\n  created: {}\n  preview: {}\n  files:   {}",
        record.id,
        record.url,
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        record.preview_url,
        record.file_count
    );
    if !record.dependencies.is_empty() {
        out.push_str(&format!("\n  deps:    {}", record.dependencies.join(", ")));
    }
    out
}

fn render_page(page: &Page<DurableRecord>) -> String {
    if page.items.is_empty() {
        return "No clones found.\n".to_string();
    }
    let mut out = String::new();
    for record in &page.items {
        out.push_str(&format!(
            "{:<36}  {:>3} files  {}  {}\n",
            record.id,
            record.file_count,
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.url
        ));
    }
    out.push_str(&format!("Page {} of {} ({} total)\n", page.page, page.pages.max(1), page.total));
    out
}
