use crate::wiring::{collaborators, load_config};
use crate::{Cli, Command};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use permission_core::documents::load_documents;
use permission_core::{Address, PermissionRecord, ResolvedConfig, Snapshot};
use permission_sync::{BoxStore, Pipeline, PipelineSettings, RetryPolicy, RunReport, SyncMetrics};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Configuration plus the collaborators built from it.
struct Session {
    config: ResolvedConfig,
    store: Arc<dyn BoxStore>,
    pipeline: Pipeline,
}

impl Session {
    fn open(path: &Path) -> Result<Self> {
        let config = load_config(path)?;
        info!(network = ?config.network, registry = config.registry_app_id, "configuration loaded");
        let collaborators = collaborators(&config)?;
        let store = collaborators.store.clone();
        let metrics = SyncMetrics::new().context("registering metrics")?;
        let pipeline = Pipeline::new(collaborators, PipelineSettings::from_config(&config), metrics);
        Ok(Self {
            config,
            store,
            pipeline,
        })
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let session = match &cli.command {
        Command::ToBytes { address } => {
            println!("{}", box_key(address)?);
            return Ok(());
        }
        Command::Reconcile { dry_run } => {
            let session = Session::open(&cli.config)?;
            let report = session.pipeline.reconcile(*dry_run).await?;
            print_report(&report, cli.json)?;
            fail_on_write_errors(&report)?;
            session
        }
        Command::Seed { dry_run } => {
            let session = Session::open(&cli.config)?;
            let documents = load_documents(&session.config.documents, &session.config.aliases)?;
            let report = session.pipeline.seed(&documents, *dry_run).await?;
            print_report(&report, cli.json)?;
            fail_on_write_errors(&report)?;
            session
        }
        Command::Show => {
            let session = Session::open(&cli.config)?;
            let retry = RetryPolicy::from_runtime(&session.config.runtime);
            let snapshot = session.store.snapshot(&retry).await?;
            if !snapshot.malformed().is_empty() {
                warn!(count = snapshot.malformed().len(), "registry holds undecodable boxes");
            }
            for (address, record) in by_permission(&snapshot) {
                println!("{}", record_line(address, record));
            }
            session
        }
        Command::Purge { yes } => {
            if !yes {
                bail!("purge deletes every registry box; pass --yes to confirm");
            }
            let session = Session::open(&cli.config)?;
            let report = session.pipeline.purge().await?;
            println!("deleted {} boxes, {} failed", report.deleted, report.failed);
            session
        }
    };

    if cli.metrics {
        print!("{}", session.pipeline.metrics().render()?);
    }
    Ok(())
}

pub fn box_key(address: &str) -> Result<String> {
    let address: Address = address
        .trim()
        .parse()
        .with_context(|| format!("invalid address {address:?}"))?;
    Ok(general_purpose::STANDARD.encode(address.as_bytes()))
}

/// Records sorted by permission, highest first; ties in address order.
pub fn by_permission(snapshot: &Snapshot) -> Vec<(&Address, &PermissionRecord)> {
    let mut records: Vec<_> = snapshot.records().iter().collect();
    records.sort_by(|a, b| b.1.permission().cmp(&a.1.permission()).then(a.0.cmp(b.0)));
    records
}

pub fn record_line(address: &Address, record: &PermissionRecord) -> String {
    let (subscription_amount, subscription_permission) = record.subscription();
    let (staking_amount, staking_permission) = record.staking();
    let docs: Vec<String> = record
        .doc_contributions()
        .iter()
        .map(|d| format!("{}:{}", d.doc_index, d.amount))
        .collect();
    format!(
        "{address} {} {} {subscription_amount} {subscription_permission} {staking_amount} {staking_permission} [{}]",
        record.votes(),
        record.permission(),
        docs.join(",")
    )
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for (address, write) in &report.plan.writes {
        println!("{} {} {}", write.pass.label(), address, write.record.permission());
    }
    println!(
        "planned {} writes ({} unchanged, {} below the smallest boundary, {} malformed skipped)",
        report.plan.writes.len(),
        report.plan.unchanged,
        report.plan.dust_filtered,
        report.plan.skipped_malformed
    );
    if let Some(applied) = &report.applied {
        println!("written {}, failed {}", applied.written.len(), applied.failed.len());
    }
    if !report.feeds_complete {
        println!("warning: feeds were incomplete; rerun to pick up the missing data");
    }
    Ok(())
}

fn fail_on_write_errors(report: &RunReport) -> Result<()> {
    match &report.applied {
        Some(applied) if !applied.is_clean() => {
            let retryable = applied.failed.iter().filter(|f| f.retryable).count();
            bail!(
                "{} writes failed ({} retryable); rerunning is safe",
                applied.failed.len(),
                retryable
            )
        }
        _ => Ok(()),
    }
}
