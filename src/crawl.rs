use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use atlas_archive::{ArchiveWriter, ArchiveWriterOptions};
use atlas_checkpoint::{current_rss_mb, find_staging_dir, CheckpointStore, LoadedCheckpoint};
use atlas_core::config::CrawlConfig;
use atlas_core::url::{NormalizedUrl, QueryParamPolicy, UrlFilter};
use atlas_core::{
    AccessibilitySummary, Checkpoint, CompletionReason, ConsoleRecord, CrawlError,
    DomSnapshotRecord, ErrorRecord, EventRecord, FrontierEntry, MediaScreenshots, NavEndReason,
    PageMedia, PageRecord, RenderMode, RenderResult, ResponseRecord, StyleRecord,
};
use atlas_extract::run_extractors;
use atlas_frontier::{EnqueueOutcome, Frontier, HostRateLimiter};
use atlas_render::{
    render_with_retry, ChromeRenderer, RawFetcher, RawRenderer, RenderJob, Renderer,
};
use atlas_robots::RobotsCache;

/// Bounded interval for re-polling a denied token bucket.
const BUCKET_POLL: Duration = Duration::from_millis(50);
const MAX_SITEMAPS_PER_ORIGIN: usize = 5;

pub struct CrawlOptions {
    pub out: PathBuf,
    pub seeds: Vec<String>,
    pub resume: Option<PathBuf>,
}

enum WorkerEvent {
    Ready {
        worker: usize,
    },
    Done {
        worker: usize,
        entry: FrontierEntry,
        result: Result<RenderResult, CrawlError>,
    },
    Dead {
        worker: usize,
        message: String,
    },
}

struct Dispatch {
    entry: FrontierEntry,
    job: RenderJob,
}

pub async fn run_crawl(
    config: CrawlConfig,
    options: CrawlOptions,
) -> Result<CompletionReason, CrawlError> {
    let policy = QueryParamPolicy::from_config(
        &config.filters.query_params,
        &config.filters.query_whitelist,
    );
    let strip_slash = config.filters.strip_trailing_slash;
    let filter = UrlFilter::new(&config.filters.allow, &config.filters.deny);

    let mut seeds: Vec<NormalizedUrl> = Vec::new();
    for raw in &options.seeds {
        match NormalizedUrl::parse(raw, &policy, strip_slash) {
            Ok(url) => seeds.push(url),
            Err(e) => warn!(seed = %raw, "dropping invalid seed: {e}"),
        }
    }
    let Some(first_seed) = seeds.first() else {
        return Err(CrawlError::Config("no valid seed URLs".into()));
    };
    let primary_origin = first_seed.origin();

    // --- Resume or fresh staging ---
    let resume_state: Option<LoadedCheckpoint> = match &options.resume {
        Some(path) => {
            let staging = find_staging_dir(path).ok_or_else(|| {
                CrawlError::CorruptCheckpoint(format!(
                    "no checkpoint under {}",
                    path.display()
                ))
            })?;
            let store = CheckpointStore::new(&staging)?;
            let loaded = store.load()?.ok_or_else(|| {
                CrawlError::CorruptCheckpoint(format!("no checkpoint under {}", staging.display()))
            })?;
            info!(
                crawl_id = %loaded.checkpoint.crawl_id,
                visited = loaded.checkpoint.visited_count,
                queue = loaded.checkpoint.queue_depth,
                "resuming crawl"
            );
            Some(loaded)
        }
        None => None,
    };

    let archive_options = ArchiveWriterOptions {
        out_path: options.out.clone(),
        config: config.clone(),
        seeds: seeds.iter().map(|s| s.as_str().to_string()).collect(),
        primary_origin: primary_origin.clone(),
        command_line: Some(redacted_command_line()),
    };
    let mut archive = match &resume_state {
        Some(loaded) => ArchiveWriter::resume(archive_options, &loaded.checkpoint)?,
        None => ArchiveWriter::create(archive_options)?,
    };
    let checkpoints = CheckpointStore::new(archive.staging_dir())?;

    let frontier = Frontier::new(config.crawl.max_depth);
    match resume_state {
        Some(loaded) => {
            frontier.restore(loaded.frontier, loaded.visited).await;
            archive.write_event(
                &EventRecord::new("crawl_resumed")
                    .field("visited", frontier.visited_count().await)
                    .field("queueDepth", frontier.len().await as u64),
            )?;
        }
        None => {
            for seed in &seeds {
                let entry = FrontierEntry {
                    url: seed.as_str().to_string(),
                    url_key: seed.key().to_string(),
                    depth: 0,
                    discovered_from: None,
                    enqueued_at: Utc::now(),
                };
                frontier.enqueue(entry).await;
            }
            archive.write_event(
                &EventRecord::new("crawl_started").field("seeds", seeds.len() as u64),
            )?;
        }
    }

    let robots = RobotsCache::new(
        &config.crawl.user_agent,
        config.robots.respect,
        config.robots.override_used,
        Duration::from_secs(config.robots.negative_ttl_seconds),
    )
    .map_err(|e| CrawlError::Config(format!("robots client: {e}")))?;
    if config.robots.override_used {
        archive.write_event(&EventRecord::new("robots_override").field(
            "reason",
            config.robots.override_reason.clone().unwrap_or_default(),
        ))?;
    }

    let limiter = HostRateLimiter::new(config.crawl.per_host_rps, config.crawl.effective_burst());
    let fetcher = RawFetcher::new(&config.crawl, &config.render)?;

    if config.sitemaps.enabled && options.resume.is_none() {
        ingest_sitemaps(
            &config, &seeds, &robots, &fetcher, &filter, &frontier, &mut archive, &policy,
            strip_slash,
        )
        .await?;
    }

    // --- Worker pool ---
    let concurrency = config.crawl.concurrency.max(1);
    let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(concurrency * 4);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut job_txs: Vec<mpsc::Sender<RenderJob>> = Vec::with_capacity(concurrency);
    let mut worker_handles = Vec::with_capacity(concurrency);

    for worker in 0..concurrency {
        let (job_tx, mut job_rx) = mpsc::channel::<RenderJob>(1);
        job_txs.push(job_tx);
        let event_tx = event_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let crawl_cfg = config.crawl.clone();
        let render_cfg = config.render.clone();
        let mode = config.render.mode;

        worker_handles.push(tokio::spawn(async move {
            let mut renderer: Box<dyn Renderer> = match mode {
                RenderMode::Raw => match RawRenderer::new(&crawl_cfg, &render_cfg) {
                    Ok(r) => Box::new(r),
                    Err(e) => {
                        let _ = event_tx
                            .send(WorkerEvent::Dead {
                                worker,
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                },
                _ => match ChromeRenderer::new(&crawl_cfg, &render_cfg, mode) {
                    Ok(r) => Box::new(r),
                    Err(e) => {
                        let _ = event_tx
                            .send(WorkerEvent::Dead {
                                worker,
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                },
            };

            info!(worker, mode = %mode, "worker started");
            if event_tx.send(WorkerEvent::Ready { worker }).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(worker, "worker shutting down");
                        break;
                    }
                    job = job_rx.recv() => {
                        let Some(job) = job else { break };
                        let entry = FrontierEntry {
                            url: job.url.as_str().to_string(),
                            url_key: job.url.key().to_string(),
                            depth: job.depth,
                            discovered_from: job.discovered_from.clone(),
                            enqueued_at: Utc::now(),
                        };
                        let result = render_with_retry(renderer.as_mut(), &job).await;
                        if event_tx.send(WorkerEvent::Done { worker, entry, result }).await.is_err() {
                            break;
                        }
                        if event_tx.send(WorkerEvent::Ready { worker }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }
    drop(event_tx);

    // Ctrl-C flips the stop flag via the broadcast channel.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        });
    }
    let mut shutdown_rx = shutdown_tx.subscribe();

    // --- Coordinator loop ---
    let mut idle: Vec<usize> = Vec::new();
    let mut dead_workers = 0usize;
    let mut in_flight = 0usize;
    let mut pending: Option<FrontierEntry> = None;
    let mut counted_errors: u64 = archive.error_count();
    let mut rate_limited_hosts: HashSet<String> = HashSet::new();
    let mut pages_since_checkpoint: u64 = 0;
    let mut last_checkpoint = Instant::now();
    let mut stopping = false;

    let completion: CompletionReason;
    loop {
        let visited = frontier.visited_count().await;

        if stopping {
            completion = CompletionReason::Manual;
            break;
        }
        if config.crawl.error_budget > 0 && counted_errors >= config.crawl.error_budget {
            warn!(counted_errors, budget = config.crawl.error_budget, "error budget exceeded");
            completion = CompletionReason::ErrorBudget;
            break;
        }
        if config.crawl.max_pages > 0 && visited >= config.crawl.max_pages {
            info!(visited, "page cap reached");
            completion = CompletionReason::Capped;
            break;
        }
        if dead_workers >= concurrency {
            return Err(CrawlError::RenderFatal {
                url: primary_origin.clone(),
                status: None,
                message: "all renderer workers failed to start".into(),
            });
        }

        // Fill idle workers from the frontier, gating each entry.
        while !idle.is_empty() && pending.is_none() {
            let Some(entry) = frontier.pop().await else {
                break;
            };
            match gate(&entry, &frontier, &filter, &robots, &limiter, &policy, strip_slash).await {
                Gate::Dispatch(dispatch) => {
                    let Dispatch { entry, job } = dispatch;
                    let Some(worker) = idle.pop() else {
                        frontier.push_front(entry).await;
                        break;
                    };
                    if job_txs[worker].send(job).await.is_err() {
                        // Worker is gone; put the entry back and drop the slot.
                        frontier.push_front(entry).await;
                        dead_workers += 1;
                        continue;
                    }
                    in_flight += 1;
                }
                Gate::Skip => {}
                Gate::DeniedFilter(reason) => {
                    archive.write_event(
                        &EventRecord::new("filter_denied")
                            .field("url", entry.url.clone())
                            .field("reason", reason),
                    )?;
                }
                Gate::DeniedRobots => {
                    archive.write_event(
                        &EventRecord::new("robots_denied").field("url", entry.url.clone()),
                    )?;
                }
                Gate::RateLimited(host) => {
                    if rate_limited_hosts.insert(host.clone()) {
                        archive.write_event(
                            &EventRecord::new("rate_limited").field("host", host),
                        )?;
                    }
                    pending = Some(entry);
                }
            }
        }

        // Retry a rate-limited entry once a worker is free and its bucket
        // may have refilled. The token is only consumed when both hold.
        if let Some(entry) = pending.take() {
            if idle.is_empty() {
                pending = Some(entry);
            } else if limiter.try_consume(&host_of(&entry.url)) {
                match render_job(&entry, &policy, strip_slash) {
                    Some(job) => {
                        let Some(worker) = idle.pop() else {
                            unreachable!("idle checked above")
                        };
                        if job_txs[worker].send(job).await.is_ok() {
                            in_flight += 1;
                        } else {
                            dead_workers += 1;
                            frontier.push_front(entry).await;
                        }
                    }
                    None => debug!(url = %entry.url, "entry no longer parseable, dropping"),
                }
            } else {
                pending = Some(entry);
            }
        }

        if frontier.is_empty().await && in_flight == 0 && pending.is_none() {
            completion = CompletionReason::Finished;
            break;
        }

        tokio::select! {
            _ = shutdown_rx.recv() => {
                archive.write_event(&EventRecord::new("shutdown_requested"))?;
                stopping = true;
            }
            event = event_rx.recv() => {
                match event {
                    Some(WorkerEvent::Ready { worker }) => idle.push(worker),
                    Some(WorkerEvent::Dead { worker, message }) => {
                        error!(worker, "worker failed to start: {message}");
                        dead_workers += 1;
                    }
                    Some(WorkerEvent::Done { worker, entry, result }) => {
                        in_flight -= 1;
                        debug!(worker, url = %entry.url, "render complete");
                        match handle_done(&config, &mut archive, &frontier, &filter, &fetcher,
                                          &policy, strip_slash, entry, result, &mut counted_errors).await {
                            Ok(new_page) => {
                                if new_page {
                                    pages_since_checkpoint += 1;
                                }
                            }
                            Err(e @ CrawlError::WriteDisk(_)) => {
                                error!("disk write failure, stopping crawl: {e}");
                                let _ = write_checkpoint(&frontier, &mut archive, &checkpoints).await;
                                return Err(e);
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    None => {
                        completion = CompletionReason::Manual;
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(BUCKET_POLL), if pending.is_some() => {}
        }

        let time_due = config.checkpoint.every_seconds > 0
            && last_checkpoint.elapsed().as_secs() >= config.checkpoint.every_seconds;
        if pages_since_checkpoint >= config.checkpoint.every_pages || time_due {
            write_checkpoint(&frontier, &mut archive, &checkpoints).await?;
            pages_since_checkpoint = 0;
            last_checkpoint = Instant::now();
        }
    }

    // --- Drain and finalize ---
    if in_flight > 0 {
        info!(in_flight, drain_s = config.crawl.drain_seconds, "draining in-flight renders");
        let deadline = Instant::now() + Duration::from_secs(config.crawl.drain_seconds);
        while in_flight > 0 && Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, event_rx.recv()).await {
                Ok(Some(WorkerEvent::Done { entry, result, .. })) => {
                    in_flight -= 1;
                    if let Err(e) = handle_done(
                        &config, &mut archive, &frontier, &filter, &fetcher, &policy,
                        strip_slash, entry, result, &mut counted_errors,
                    )
                    .await
                    {
                        warn!("write during drain failed: {e}");
                        break;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
    }

    let _ = shutdown_tx.send(());
    drop(job_txs);
    for handle in worker_handles {
        let _ = handle.await;
    }

    if completion == CompletionReason::Manual {
        archive.write_event(&EventRecord::new("graceful_shutdown"))?;
    }
    archive.write_event(
        &EventRecord::new("crawl_completed")
            .field("reason", completion.as_str())
            .field("visited", frontier.visited_count().await)
            .field("errors", counted_errors),
    )?;
    write_checkpoint(&frontier, &mut archive, &checkpoints).await?;

    let pages = archive.page_count();
    let out = archive.finalize(completion)?;
    info!(
        path = %out.display(),
        pages,
        errors = counted_errors,
        reason = completion.as_str(),
        "crawl complete"
    );
    Ok(completion)
}

enum Gate {
    Dispatch(Dispatch),
    /// Already visited or no longer parseable.
    Skip,
    DeniedFilter(&'static str),
    DeniedRobots,
    RateLimited(String),
}

async fn gate(
    entry: &FrontierEntry,
    frontier: &Frontier,
    filter: &UrlFilter,
    robots: &RobotsCache,
    limiter: &HostRateLimiter,
    policy: &QueryParamPolicy,
    strip_slash: bool,
) -> Gate {
    if frontier.is_visited(&entry.url_key).await {
        return Gate::Skip;
    }
    let decision = filter.should_allow(&entry.url);
    if !decision.allowed {
        return Gate::DeniedFilter(decision.reason.unwrap_or("denied"));
    }
    let Ok(url) = NormalizedUrl::parse(&entry.url, policy, strip_slash) else {
        return Gate::Skip;
    };
    if !robots.should_fetch(&url).await.allowed {
        return Gate::DeniedRobots;
    }
    let host = url.host().to_string();
    if !limiter.try_consume(&host) {
        return Gate::RateLimited(host);
    }
    Gate::Dispatch(Dispatch {
        job: RenderJob {
            url,
            depth: entry.depth,
            discovered_from: entry.discovered_from.clone(),
        },
        entry: entry.clone(),
    })
}

fn render_job(
    entry: &FrontierEntry,
    policy: &QueryParamPolicy,
    strip_slash: bool,
) -> Option<RenderJob> {
    NormalizedUrl::parse(&entry.url, policy, strip_slash)
        .ok()
        .map(|url| RenderJob {
            url,
            depth: entry.depth,
            discovered_from: entry.discovered_from.clone(),
        })
}

/// Route one finished render: write the page bundle contiguously, then feed
/// extracted links back to the frontier. Returns whether a page was written.
#[allow(clippy::too_many_arguments)]
async fn handle_done(
    config: &CrawlConfig,
    archive: &mut ArchiveWriter,
    frontier: &Frontier,
    filter: &UrlFilter,
    fetcher: &RawFetcher,
    policy: &QueryParamPolicy,
    strip_slash: bool,
    entry: FrontierEntry,
    result: Result<RenderResult, CrawlError>,
    counted_errors: &mut u64,
) -> Result<bool, CrawlError> {
    let render = match result {
        Ok(render) => render,
        Err(e) => {
            record_error(archive, counted_errors, &entry.url, &e)?;
            return Ok(false);
        }
    };

    let mode = config.render.mode;
    let base = url::Url::parse(&render.final_url)
        .or_else(|_| url::Url::parse(&entry.url))
        .map_err(|e| CrawlError::InvalidUrl(format!("{}: {e}", render.final_url)))?;

    let looks_html = render
        .content_type
        .as_deref()
        .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
        .unwrap_or(true);

    let html: String = match (&render.live_dom, looks_html) {
        (Some(dom), _) => dom.clone(),
        (None, true) => String::from_utf8_lossy(&render.raw_body).into_owned(),
        (None, false) => String::new(),
    };

    let outcome = run_extractors(&html, &base, mode, config.accessibility.enabled);
    for (extractor, message) in &outcome.failures {
        let err = CrawlError::Extract {
            extractor: extractor.clone(),
            message: message.clone(),
        };
        record_error(archive, counted_errors, &entry.url, &err)?;
    }

    let internal_links = outcome.edges.iter().filter(|e| !e.is_external).count() as u64;
    let external_links = outcome.edges.len() as u64 - internal_links;

    // Media and blobs come first so the page record can reference them.
    let page_id = Uuid::new_v4().to_string();
    let screenshots = match &render.screenshots {
        Some(shots) => Some(archive.store_screenshots(&entry.url_key, shots)?),
        None => None,
    };

    let origin = base.origin().ascii_serialization();
    if mode == RenderMode::Full && archive.favicon_for_origin(&origin).is_none() {
        if let Some((bytes, mime)) = fetcher.fetch_favicon(&origin).await {
            archive.store_favicon(&origin, &bytes, &mime)?;
        }
    }
    let favicon = archive.favicon_for_origin(&origin);

    let media = match (&screenshots, &favicon) {
        (None, None) => None,
        _ => Some(PageMedia {
            screenshots: MediaScreenshots {
                desktop: screenshots.as_ref().map(|(d, _)| d.clone()),
                mobile: screenshots.as_ref().map(|(_, m)| m.clone()),
            },
            favicon: favicon.clone(),
        }),
    };

    let a11y_summary = outcome.accessibility.as_ref().map(|rec| {
        let landmarks = [
            rec.landmarks.header,
            rec.landmarks.nav,
            rec.landmarks.main,
            rec.landmarks.aside,
            rec.landmarks.footer,
        ];
        AccessibilitySummary {
            missing_alt_count: rec.missing_alt_count,
            landmark_count: landmarks.iter().filter(|l| **l).count() as u32,
            role_count: rec.roles.values().sum(),
        }
    });

    let page = PageRecord {
        page_id: page_id.clone(),
        url: entry.url.clone(),
        final_url: render.final_url.clone(),
        normalized_url: entry.url.clone(),
        url_key: entry.url_key.clone(),
        status_code: render.status_code,
        content_type: render.content_type.clone(),
        render_mode: mode,
        depth: entry.depth,
        discovered_from: entry.discovered_from.clone(),
        raw_html_hash: render.raw_html_hash.clone(),
        dom_hash: render.dom_hash.clone(),
        nav_end_reason: render.nav_end_reason,
        redirect_chain: render.redirect_chain.clone(),
        fetch_ms: render.fetch_ms,
        render_ms: render.render_ms,
        internal_links_count: internal_links,
        external_links_count: external_links,
        media_assets_count: outcome.assets.len() as u64,
        title: outcome.seo.title.clone(),
        meta_description: outcome.seo.meta_description.clone(),
        meta_keywords: outcome.seo.meta_keywords.clone(),
        headings: outcome.seo.headings.clone(),
        canonical: outcome.seo.canonical.clone(),
        meta_robots: outcome.seo.meta_robots.clone(),
        hreflang: outcome.seo.hreflang.clone(),
        open_graph: outcome.seo.open_graph.clone(),
        twitter_card: outcome.seo.twitter_card.clone(),
        technologies: outcome.technologies.clone(),
        seo: Some(outcome.seo.enhanced.clone()),
        accessibility: a11y_summary,
        media,
        fetched_at: Utc::now(),
    };

    // The whole page bundle is written contiguously; checkpoints only run
    // between bundles.
    match archive.write_page(&page) {
        Ok(()) => {}
        Err(e @ CrawlError::Schema { .. }) => {
            record_error(archive, counted_errors, &entry.url, &e)?;
            return Ok(false);
        }
        Err(e) => return Err(e),
    }
    archive.write_edges(&outcome.edges)?;
    archive.write_assets(&outcome.assets)?;

    if !render.raw_body.is_empty() {
        let blob = archive.store_blob(&render.raw_body)?;
        archive.write_response(&ResponseRecord {
            page_id: page_id.clone(),
            encoding: charset_of(render.content_type.as_deref()),
            body_blob_ref: blob.blob_ref,
        })?;
    }

    if let Some(rec) = &outcome.accessibility {
        archive.write_accessibility(rec)?;
    }

    if mode == RenderMode::Full {
        if !render.console_logs.is_empty() {
            let records: Vec<ConsoleRecord> = render
                .console_logs
                .iter()
                .map(|c| ConsoleRecord {
                    page_url: entry.url.clone(),
                    level: c.level.clone(),
                    text: c.text.clone(),
                })
                .collect();
            archive.write_console(&records)?;
        }
        if !render.computed_text_styles.is_empty() {
            let records: Vec<StyleRecord> = render
                .computed_text_styles
                .iter()
                .map(|s| StyleRecord {
                    page_url: entry.url.clone(),
                    selector: s.selector.clone(),
                    font_size: s.font_size.clone(),
                    font_weight: s.font_weight.clone(),
                    color: s.color.clone(),
                    background_color: s.background_color.clone(),
                })
                .collect();
            archive.write_styles(&records)?;
        }
        if let (Some(dom), Some(dom_hash)) = (&render.live_dom, &render.dom_hash) {
            let blob = archive.store_blob(dom.as_bytes())?;
            archive.write_dom_snapshot(&DomSnapshotRecord {
                page_id: page_id.clone(),
                page_url: entry.url.clone(),
                dom_hash: dom_hash.clone(),
                dom_blob_ref: blob.blob_ref,
            })?;
        }
    }

    // Bad statuses are pages too, but they also count as render errors.
    if render.status_code >= 400 && render.nav_end_reason != NavEndReason::Challenge {
        let err = CrawlError::RenderFatal {
            url: entry.url.clone(),
            status: Some(render.status_code),
            message: format!("HTTP {}", render.status_code),
        };
        record_error(archive, counted_errors, &entry.url, &err)?;
    }
    if render.nav_end_reason == NavEndReason::Challenge {
        archive.write_event(
            &EventRecord::new("challenge_detected").field("url", entry.url.clone()),
        )?;
    }

    frontier.mark_visited(&entry.url_key).await;

    // Feed internal links back through the same gates the seed went through.
    if let Ok(source) = NormalizedUrl::parse(&entry.url, policy, strip_slash) {
        for edge in outcome.edges.iter().filter(|e| !e.is_external) {
            let Ok(target) = source.join(&edge.target_url, policy, strip_slash) else {
                continue;
            };
            if !filter.should_allow(target.as_str()).allowed {
                continue;
            }
            let child = FrontierEntry {
                url: target.as_str().to_string(),
                url_key: target.key().to_string(),
                depth: entry.depth + 1,
                discovered_from: Some(entry.url.clone()),
                enqueued_at: Utc::now(),
            };
            if frontier.enqueue(child).await == EnqueueOutcome::DepthExceeded {
                debug!(url = %target, "depth exceeded, not enqueued");
            }
        }
    }

    Ok(true)
}

fn record_error(
    archive: &mut ArchiveWriter,
    counted_errors: &mut u64,
    url: &str,
    err: &CrawlError,
) -> Result<(), CrawlError> {
    let (origin, host) = match url::Url::parse(url) {
        Ok(u) => (
            u.origin().ascii_serialization(),
            u.host_str().unwrap_or_default().to_string(),
        ),
        Err(_) => (String::new(), String::new()),
    };
    archive.write_error(&ErrorRecord {
        url: url.to_string(),
        origin,
        host,
        phase: err.phase(),
        code: err.code().to_string(),
        message: err.to_string(),
        occurred_at: Utc::now(),
    })?;
    if err.is_counted() {
        *counted_errors += 1;
    }
    Ok(())
}

async fn write_checkpoint(
    frontier: &Frontier,
    archive: &mut ArchiveWriter,
    checkpoints: &CheckpointStore,
) -> Result<(), CrawlError> {
    archive.flush_all()?;
    let pointers = archive.part_pointers()?;
    let (snapshot, visited) = frontier.snapshot().await;
    let checkpoint = Checkpoint {
        crawl_id: archive.crawl_id().to_string(),
        visited_count: visited.len() as u64,
        enqueued_count: frontier.enqueued_count().await,
        queue_depth: snapshot.entries.len() as u64,
        visited_index_file: "visited.idx".into(),
        frontier_snapshot: "frontier.json".into(),
        last_part_pointers: pointers,
        rss_mb: current_rss_mb(),
        timestamp: Utc::now(),
    };
    checkpoints.write(&checkpoint, &visited, &snapshot)?;
    archive.update_provisional_manifest()?;
    archive.write_event(
        &EventRecord::new("checkpoint")
            .field("visited", checkpoint.visited_count)
            .field("queueDepth", checkpoint.queue_depth),
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn ingest_sitemaps(
    config: &CrawlConfig,
    seeds: &[NormalizedUrl],
    robots: &RobotsCache,
    fetcher: &RawFetcher,
    filter: &UrlFilter,
    frontier: &Frontier,
    archive: &mut ArchiveWriter,
    policy: &QueryParamPolicy,
    strip_slash: bool,
) -> Result<(), CrawlError> {
    let mut seen_origins: HashSet<String> = HashSet::new();
    for seed in seeds {
        if !seen_origins.insert(seed.origin()) {
            continue;
        }
        let sitemap_urls = robots.sitemaps(seed).await;
        let mut ingested = 0usize;
        for sitemap_url in sitemap_urls.iter().take(MAX_SITEMAPS_PER_ORIGIN) {
            let locs = fetch_sitemap_locs(fetcher, sitemap_url, config.sitemaps.max_urls).await;
            for loc in locs {
                if ingested >= config.sitemaps.max_urls {
                    break;
                }
                let Ok(url) = NormalizedUrl::parse(&loc, policy, strip_slash) else {
                    continue;
                };
                if url.origin() != seed.origin() || !filter.should_allow(url.as_str()).allowed {
                    continue;
                }
                let entry = FrontierEntry {
                    url: url.as_str().to_string(),
                    url_key: url.key().to_string(),
                    depth: 1,
                    discovered_from: Some(sitemap_url.clone()),
                    enqueued_at: Utc::now(),
                };
                if frontier.enqueue(entry).await == EnqueueOutcome::Added {
                    ingested += 1;
                }
            }
        }
        if ingested > 0 {
            info!(origin = %seed.origin(), ingested, "sitemap URLs enqueued");
            archive.write_event(
                &EventRecord::new("sitemap_ingested")
                    .field("origin", seed.origin())
                    .field("count", ingested as u64),
            )?;
        }
    }
    Ok(())
}

/// Pull `<loc>` values out of a sitemap, following one level of
/// sitemap-index indirection.
async fn fetch_sitemap_locs(fetcher: &RawFetcher, sitemap_url: &str, cap: usize) -> Vec<String> {
    let Ok(fetch) = fetcher.fetch(sitemap_url).await else {
        warn!(sitemap = %sitemap_url, "sitemap fetch failed");
        return Vec::new();
    };
    if fetch.status >= 400 {
        return Vec::new();
    }
    let body = String::from_utf8_lossy(&fetch.body);
    let locs = parse_locs(&body, cap);
    if !body.contains("<sitemapindex") {
        return locs;
    }
    let mut out = Vec::new();
    for child in locs.iter().take(MAX_SITEMAPS_PER_ORIGIN) {
        if out.len() >= cap {
            break;
        }
        if let Ok(child_fetch) = fetcher.fetch(child).await {
            if child_fetch.status < 400 {
                let child_body = String::from_utf8_lossy(&child_fetch.body);
                out.extend(parse_locs(&child_body, cap - out.len()));
            }
        }
    }
    out
}

fn parse_locs(xml: &str, cap: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = xml;
    while out.len() < cap {
        let Some(start) = rest.find("<loc>") else { break };
        let after = &rest[start + 5..];
        let Some(end) = after.find("</loc>") else { break };
        let loc = after[..end].trim();
        if !loc.is_empty() {
            out.push(loc.to_string());
        }
        rest = &after[end + 6..];
    }
    out
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

fn charset_of(content_type: Option<&str>) -> Option<String> {
    content_type?
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|c| c.trim_matches('"').to_string())
}

fn redacted_command_line() -> String {
    let mut redact_next = false;
    std::env::args()
        .map(|arg| {
            if redact_next {
                redact_next = false;
                return "<redacted>".to_string();
            }
            let lower = arg.to_lowercase();
            if lower.contains("token") || lower.contains("secret") || lower.contains("password") {
                if !lower.contains('=') {
                    redact_next = true;
                    return arg;
                }
                let flag = arg.split('=').next().unwrap_or("").to_string();
                return format!("{flag}=<redacted>");
            }
            arg
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sitemap_loc_parsing() {
        let xml = r#"<?xml version="1.0"?>
            <urlset><url><loc>https://h/a</loc></url>
            <url><loc> https://h/b </loc></url></urlset>"#;
        assert_eq!(parse_locs(xml, 10), vec!["https://h/a", "https://h/b"]);
        assert_eq!(parse_locs(xml, 1).len(), 1);
        assert!(parse_locs("<urlset></urlset>", 10).is_empty());
    }

    #[test]
    fn charset_extraction() {
        assert_eq!(
            charset_of(Some("text/html; charset=utf-8")).as_deref(),
            Some("utf-8")
        );
        assert_eq!(
            charset_of(Some("text/html; charset=\"ISO-8859-1\"")).as_deref(),
            Some("ISO-8859-1")
        );
        assert!(charset_of(Some("text/html")).is_none());
        assert!(charset_of(None).is_none());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://sub.example.com/x"), "sub.example.com");
        assert_eq!(host_of("not a url"), "");
    }
}
