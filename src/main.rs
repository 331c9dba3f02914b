use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use bytebarge::cli::{self, CliOptions, SourceFlavor, TargetFlavor};
use bytebarge::config::{TransferConfig, MIB};
use bytebarge::logging;
use bytebarge::pipeline::{self, NullObserver, TransferStats};
use bytebarge::sources::blob::{BlobSource, BlobSourceParams};
use bytebarge::sources::file::{MultiFileParams, MultiFileSource};
use bytebarge::sources::http::HttpSource;
use bytebarge::sources::TransferSource;
use bytebarge::store::rest::RestBlobStore;
use bytebarge::store::BlobStore;
use bytebarge::targets::block::BlockBlobTarget;
use bytebarge::targets::file::FileTarget;
use bytebarge::targets::page::PageBlobTarget;
use bytebarge::targets::TargetPipeline;

fn main() -> Result<()> {
    let opts = cli::parse();
    logging::init_logging(&opts.verbosity);

    let cfg = config_from(&opts);
    cfg.validate()?;

    let cancel = Arc::new(AtomicBool::new(false));
    let store = open_store(&opts)?;
    let target = build_target(&opts, &cfg, store.clone(), cancel.clone())?;
    let sources = build_sources(&opts, &cfg, store)?;

    info!(
        "starting {} pipeline(s): block_size={}MiB readers={} workers={} md5={}",
        sources.len(),
        cfg.block_size / MIB,
        cfg.num_readers,
        cfg.num_workers,
        cfg.md5
    );

    let params = cfg.transfer_params();
    let observer = Arc::new(NullObserver);
    let mut runs = Vec::with_capacity(sources.len());
    for source in sources {
        runs.push(pipeline::run_transfer(
            source,
            target.clone(),
            &params,
            observer.clone(),
            cancel.clone(),
        )?);
    }

    let summary = merge_stats(runs);
    if opts.summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if !summary.all_committed() {
        bail!("transfer finished with failures");
    }
    Ok(())
}

fn config_from(opts: &CliOptions) -> TransferConfig {
    TransferConfig {
        block_size: opts.block_size_mib.saturating_mul(MIB),
        num_readers: opts.readers,
        num_workers: opts.workers,
        files_per_pipeline: opts.files_per_pipeline,
        md5: opts.md5,
        keep_dir_structure: opts.keep_dir_structure,
        target_aliases: opts.target_aliases.clone(),
        use_exact_name_match: opts.exact_name_match,
        ..Default::default()
    }
}

fn needs_store(opts: &CliOptions) -> bool {
    opts.source_kind == SourceFlavor::Blob
        || matches!(opts.target_kind, TargetFlavor::Block | TargetFlavor::Page)
}

fn open_store(opts: &CliOptions) -> Result<Option<Arc<dyn BlobStore>>> {
    if !needs_store(opts) {
        return Ok(None);
    }
    let endpoint = opts
        .endpoint
        .as_deref()
        .context("--endpoint is required for blob sources and targets")?;
    let store = RestBlobStore::new(endpoint, opts.sas.as_deref())?;
    Ok(Some(Arc::new(store)))
}

fn build_target(
    opts: &CliOptions,
    cfg: &TransferConfig,
    store: Option<Arc<dyn BlobStore>>,
    cancel: Arc<AtomicBool>,
) -> Result<Arc<dyn TargetPipeline>> {
    match opts.target_kind {
        TargetFlavor::File => Ok(Arc::new(FileTarget::new(&opts.output, opts.overwrite))),
        TargetFlavor::Block | TargetFlavor::Page => {
            let store = store.context("blob targets need a store")?;
            let container = opts
                .container
                .as_deref()
                .context("--container is required for blob targets")?;
            Ok(match opts.target_kind {
                TargetFlavor::Block => {
                    Arc::new(BlockBlobTarget::new(store, container, cfg.retry, cancel))
                }
                _ => Arc::new(PageBlobTarget::new(store, container, cfg.retry, cancel)),
            })
        }
    }
}

fn build_sources(
    opts: &CliOptions,
    cfg: &TransferConfig,
    store: Option<Arc<dyn BlobStore>>,
) -> Result<Vec<Arc<dyn TransferSource>>> {
    let sources: Vec<Arc<dyn TransferSource>> = match opts.source_kind {
        SourceFlavor::File => {
            let params = MultiFileParams {
                patterns: opts.sources.clone(),
                target_aliases: cfg.target_aliases.clone(),
                keep_dir_structure: cfg.keep_dir_structure,
                block_size: cfg.block_size,
            };
            MultiFileSource::open_pipelines(&params, cfg.files_per_pipeline)?
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn TransferSource>)
                .collect()
        }
        SourceFlavor::Http => HttpSource::open_pipelines(
            opts.sources.clone(),
            cfg.target_aliases.clone(),
            cfg.block_size,
            cfg.files_per_pipeline,
        )?
        .into_iter()
        .map(|s| Arc::new(s) as Arc<dyn TransferSource>)
        .collect(),
        SourceFlavor::Blob => {
            let store = store.context("blob sources need a store")?;
            let container = opts
                .source_container
                .clone()
                .or_else(|| opts.container.clone())
                .context("--source-container or --container is required for blob sources")?;
            let params = BlobSourceParams {
                container,
                blob_names: opts.sources.clone(),
                use_exact_name_match: cfg.use_exact_name_match,
                target_aliases: cfg.target_aliases.clone(),
                keep_dir_structure: cfg.keep_dir_structure,
                block_size: cfg.block_size,
            };
            BlobSource::open_pipelines(store, &params, cfg.files_per_pipeline)?
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn TransferSource>)
                .collect()
        }
    };
    Ok(sources)
}

fn merge_stats(runs: Vec<TransferStats>) -> TransferStats {
    let mut merged = TransferStats {
        bytes_transferred: 0,
        parts_succeeded: 0,
        parts_failed: 0,
        sources: Vec::new(),
    };
    for stats in runs {
        merged.bytes_transferred += stats.bytes_transferred;
        merged.parts_succeeded += stats.parts_succeeded;
        merged.parts_failed += stats.parts_failed;
        merged.sources.extend(stats.sources);
    }
    merged
}

fn print_summary(stats: &TransferStats) {
    info!(
        "done: {} bytes, {} parts ok, {} parts failed",
        stats.bytes_transferred, stats.parts_succeeded, stats.parts_failed
    );
    for source in &stats.sources {
        info!(
            "  {} -> {}: {:?}",
            source.source_name, source.target_alias, source.commit
        );
    }
}
