use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use skyvault::config;
use skyvault::db;
use skyvault::export::{ExportSettings, Exporter};
use skyvault::model::{DateRange, ExportFormat, ExportOptions, ExportStatus};
use skyvault::store::SqliteArchive;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "Export archived posts and media into portable bundles")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Export an owner's posts to JSON or CSV and wait for it to finish
    Export {
        /// Owner id (DID) whose posts are exported
        #[arg(long)]
        owner: String,
        /// Output format: json or csv
        #[arg(long, default_value = "json")]
        format: String,
        /// Only posts created at or after this date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        since: Option<String>,
        /// Only posts created at or before this date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        until: Option<String>,
        /// Copy referenced media files into the bundle
        #[arg(long)]
        include_media: bool,
    },
    /// List completed exports for an owner
    List {
        #[arg(long)]
        owner: String,
    },
    /// Delete a completed export and its files
    Delete {
        #[arg(long)]
        owner: String,
        /// Export record id as shown by `list`
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(SqliteArchive::new(pool));
    let exporter = Exporter::new(store, ExportSettings::from(&cfg.export));

    match args.command {
        Command::Export {
            owner,
            format,
            since,
            until,
            include_media,
        } => {
            let options = ExportOptions {
                format: format.parse::<ExportFormat>()?,
                owner,
                include_media,
                date_range: Some(DateRange::parse(since.as_deref(), until.as_deref())?),
                output_root: cfg.export.resolved_root_dir(),
            };
            let mut handle = exporter.start_export(options)?;
            info!(job_id = %handle.job_id, "export started");

            while let Some(p) = handle.updates.recv().await {
                println!(
                    "[{}] posts {}/{} media {}/{} ({:.1}%)",
                    p.status.as_str(),
                    p.posts_processed,
                    p.posts_total,
                    p.media_copied,
                    p.media_total,
                    p.percent_complete()
                );
                if let Some(msg) = &p.message {
                    if p.status.is_terminal() {
                        println!("{}", msg);
                    }
                }
            }

            let job = exporter
                .job(&handle.job_id)
                .ok_or_else(|| anyhow!("job {} disappeared", handle.job_id))?;
            match job.progress.status {
                ExportStatus::Completed => {
                    if let Some(dir) = job.export_dir {
                        println!("Export written to {}", dir.display());
                    }
                }
                _ => {
                    return Err(anyhow!(
                        "export failed: {}",
                        job.progress.error.unwrap_or_else(|| "unknown error".into())
                    ));
                }
            }
        }
        Command::List { owner } => {
            let records = exporter.list_exports(&owner).await?;
            if records.is_empty() {
                println!("No exports for {}", owner);
            }
            for r in records {
                println!(
                    "{}\t{}\tposts={}\tmedia={}\tbytes={}\t{}",
                    r.id, r.format, r.post_count, r.media_count, r.size_bytes, r.dir_path
                );
            }
        }
        Command::Delete { owner, id } => {
            let record = exporter.delete_export(&owner, &id).await?;
            println!("Deleted {} ({})", record.id, record.dir_path);
        }
    }

    Ok(())
}
