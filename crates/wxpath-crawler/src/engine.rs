use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::runtime::{self, Handle};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use wxpath_expr::{Program, Segment};
use wxpath_html::{to_package, HtmlDom};

use crate::cache::{MemoryCache, ResponseCache};
use crate::config::{CacheBackend, CrawlerConfig};
use crate::dispatch::{self, CompiledProgram};
use crate::error::Error;
use crate::fetcher::{FetchedPage, Fetcher};
use crate::frontier::{CrawlTask, Frontier};
use crate::hooks::{Hooks, TaskInfo};
use crate::stats::{CrawlStats, ProgressFn, StatsSnapshot};
use crate::value::{ErrorValue, Value};
use crate::xpath::DocProvenance;

/// Cooperative cancellation flag, observed at every suspension point. On
/// cancel, pending tasks drain without fetching; results already buffered on
/// the output channel are preserved.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-run options.
#[derive(Default)]
pub struct RunOptions {
    /// Log periodic stats snapshots (or feed them to `observer`).
    pub progress: bool,
    /// Stream error data instead of silently dropping failed fetches.
    pub yield_errors: bool,
    pub cancel: Option<CancelToken>,
    pub hooks: Hooks,
    /// Response cache backend; required when `cache.enabled` names a backend
    /// the core doesn't ship.
    pub cache: Option<Arc<dyn ResponseCache>>,
    pub observer: Option<ProgressFn>,
}

/// The stream of extracted values. Completes when the crawl has terminated;
/// emission order between documents is unspecified.
pub struct ResultStream {
    rx: UnboundedReceiverStream<Value>,
    stats: Arc<CrawlStats>,
}

impl ResultStream {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Stream for ResultStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

/// Crawl engine: owns the resolved configuration, builds the component
/// graph per run.
pub struct Engine {
    config: Arc<CrawlerConfig>,
}

impl Engine {
    pub fn new(config: CrawlerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Evaluates `expression`, crawling up to `max_depth` hops from the
    /// seed, and streams extracted values as they are produced.
    ///
    /// Fails fast on parse and configuration errors; per-URL failures are
    /// absorbed (see [`RunOptions::yield_errors`]).
    pub async fn run(
        &self,
        expression: &str,
        max_depth: usize,
        options: RunOptions,
    ) -> Result<ResultStream, Error> {
        let program = Arc::new(wxpath_expr::parse(expression)?);
        CompiledProgram::check(&program)?;
        options.hooks.validate()?;

        let cache = self.resolve_cache(options.cache)?;
        let config = self.config.clone();
        let stats = Arc::new(CrawlStats::default());
        let tasks_in = Arc::new(AtomicUsize::new(0));
        let tasks_done = Arc::new(AtomicUsize::new(0));
        let cancel = options.cancel.unwrap_or_default();
        let yield_errors = options.yield_errors;
        let observer: Option<ProgressFn> = match (options.observer, options.progress) {
            (Some(obs), _) => Some(obs),
            (None, true) => Some(Arc::new(|s: StatsSnapshot| {
                log::info!(
                    "crawl progress: enqueued={} fetched={} yielded={} failed={}",
                    s.enqueued,
                    s.fetched,
                    s.yielded,
                    s.failed
                );
            })),
            (None, false) => None,
        };
        let fetcher = Arc::new(Fetcher::new(config.clone(), cache)?);

        let (tx_task, rx_task) = mpsc::unbounded_channel::<CrawlTask>();
        let (tx_page, rx_page) =
            crossbeam_channel::bounded::<(CrawlTask, FetchedPage)>(config.page_buffer);
        let (tx_out, rx_out) = mpsc::unbounded_channel::<Value>();
        let (tx_stop, rx_stop) = crossbeam_channel::unbounded::<()>();

        let frontier = Frontier::new(tx_task, tasks_in.clone(), stats.clone(), max_depth);

        // Seed the frontier from the UrlLit head

        let Segment::UrlLit { url, follow, depth } = program.seed() else {
            return Err(Error::Program("program has no seed".into()));
        };
        let seeded = frontier.enqueue(CrawlTask {
            url: url.clone(),
            depth: 0,
            backlink: None,
            cursor: 1,
            deep: follow.is_some(),
            depth_cap: *depth,
        });
        if !seeded {
            return Err(Error::Config(format!("invalid seed URL `{url}`")));
        }

        // Workers parse pages and evaluate segments on OS threads; the
        // backing XPath documents are not Send.

        let handle = Handle::current();
        for id in 0..config.num_workers {
            let rx_page = rx_page.clone();
            let rx_stop = rx_stop.clone();
            let frontier = frontier.clone();
            let tx_out = tx_out.clone();
            let program = program.clone();
            let hooks = options.hooks.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            let stats = stats.clone();
            let tasks_done = tasks_done.clone();
            thread::Builder::new()
                .name(format!("wxpath-worker-{id}"))
                .spawn(move || {
                    worker_loop(WorkerCtx {
                        rx_page,
                        rx_stop,
                        frontier,
                        tx_out,
                        program,
                        hooks,
                        handle,
                        cancel,
                        stats,
                        tasks_done,
                        yield_errors,
                    })
                })
                .map_err(|e| Error::Config(format!("couldn't spawn worker: {e}")))?;
        }
        drop(frontier);
        drop(rx_stop);

        // Downloader task

        let downloader = {
            let stats = stats.clone();
            let tasks_done = tasks_done.clone();
            let cancel = cancel.clone();
            let concurrency = config.concurrency;
            async move {
                let fetcher = &fetcher;
                let tx_page = &tx_page;
                let tx_out = &tx_out;
                let stats = &stats;
                let tasks_done = &tasks_done;
                let cancel = &cancel;
                UnboundedReceiverStream::new(rx_task)
                    .for_each_concurrent(concurrency, |task| async move {
                        if cancel.is_cancelled() {
                            tasks_done.fetch_add(1, Ordering::SeqCst);
                            return;
                        }
                        match fetcher.fetch(&task.url).await {
                            Ok(page) => {
                                CrawlStats::bump(&stats.fetched);
                                if tx_page.send((task, page)).is_err() {
                                    tasks_done.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            Err(e) => {
                                CrawlStats::bump(&stats.failed);
                                log::warn!("Skipping URL: {e}");
                                if yield_errors {
                                    tx_out
                                        .send(Value::Error(ErrorValue {
                                            url: task.url.clone(),
                                            reason: e.kind.to_string(),
                                            status: e.status,
                                            depth: task.depth,
                                        }))
                                        .ok();
                                }
                                tasks_done.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                    .await;
            }
        };
        tokio::spawn(downloader);

        // Completion watcher

        tokio::spawn({
            let stats = stats.clone();
            let num_workers = config.num_workers;
            async move {
                let mut ticks = 0u64;
                loop {
                    sleep(Duration::from_millis(50)).await;
                    ticks += 1;
                    if ticks % 20 == 0 {
                        if let Some(obs) = &observer {
                            obs(stats.snapshot());
                        }
                    }
                    let done = tasks_done.load(Ordering::SeqCst);
                    if done > 0 && done == tasks_in.load(Ordering::SeqCst) {
                        break;
                    }
                }
                for _ in 0..num_workers {
                    tx_stop.send(()).ok();
                }
                if let Some(obs) = &observer {
                    obs(stats.snapshot());
                }
            }
        });

        Ok(ResultStream {
            rx: UnboundedReceiverStream::new(rx_out),
            stats,
        })
    }

    fn resolve_cache(
        &self,
        provided: Option<Arc<dyn ResponseCache>>,
    ) -> Result<Option<Arc<dyn ResponseCache>>, Error> {
        if !self.config.cache.enabled {
            return Ok(None);
        }
        match provided {
            Some(cache) => Ok(Some(cache)),
            None => match self.config.cache.backend {
                CacheBackend::Memory => Ok(Some(Arc::new(MemoryCache::new(
                    Duration::from_secs_f64(self.config.cache.expire_after),
                )))),
                backend => Err(Error::Config(format!(
                    "cache backend {backend:?} is not linked into the core; \
                     provide one through RunOptions::cache"
                ))),
            },
        }
    }
}

/// Runs an expression with default configuration.
pub async fn run(
    expression: &str,
    max_depth: usize,
    options: RunOptions,
) -> Result<ResultStream, Error> {
    Engine::new(CrawlerConfig::default())
        .run(expression, max_depth, options)
        .await
}

/// Blocking wrapper: materialises the whole result stream. Refuses to run
/// inside an active async runtime.
pub fn run_blocking(
    expression: &str,
    max_depth: usize,
    config: CrawlerConfig,
    options: RunOptions,
) -> Result<Vec<Value>, Error> {
    if Handle::try_current().is_ok() {
        return Err(Error::Config(
            "run_blocking called inside an async runtime; use Engine::run".into(),
        ));
    }
    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("couldn't build runtime: {e}")))?;
    rt.block_on(async move {
        let stream = Engine::new(config).run(expression, max_depth, options).await?;
        Ok(stream.collect::<Vec<_>>().await)
    })
}

struct WorkerCtx {
    rx_page: crossbeam_channel::Receiver<(CrawlTask, FetchedPage)>,
    rx_stop: crossbeam_channel::Receiver<()>,
    frontier: Frontier,
    tx_out: mpsc::UnboundedSender<Value>,
    program: Arc<Program>,
    hooks: Hooks,
    handle: Handle,
    cancel: CancelToken,
    stats: Arc<CrawlStats>,
    tasks_done: Arc<AtomicUsize>,
    yield_errors: bool,
}

fn worker_loop(ctx: WorkerCtx) {
    // Compiled XPaths are not Send; each worker compiles its own copy. The
    // program was already check-compiled at run entry.
    let compiled = match CompiledProgram::new(&ctx.program) {
        Ok(compiled) => compiled,
        Err(e) => {
            log::error!("Worker couldn't compile the program: {e}");
            return;
        }
    };
    loop {
        crossbeam_channel::select! {
            recv(ctx.rx_page) -> msg => {
                let Ok((task, page)) = msg else { break };
                process_page(&ctx, &compiled, &task, page);
                ctx.tasks_done.fetch_add(1, Ordering::SeqCst);
            }
            recv(ctx.rx_stop) -> _ => break,
        }
    }
}

fn process_page(ctx: &WorkerCtx, compiled: &CompiledProgram, task: &CrawlTask, page: FetchedPage) {
    if ctx.cancel.is_cancelled() {
        return;
    }
    let info = TaskInfo {
        url: task.url.clone(),
        backlink: task.backlink.clone(),
        depth: task.depth,
    };

    let Some(body) = ctx.hooks.run_post_fetch(&ctx.handle, page.body, &info) else {
        CrawlStats::bump(&ctx.stats.hook_dropped);
        return;
    };
    let text = String::from_utf8_lossy(&body).into_owned();

    if ctx.cancel.is_cancelled() {
        return;
    }
    let mut dom = HtmlDom::parse_document(&text);
    if ctx.hooks.run_post_parse(&ctx.handle, &mut dom, &info).is_none() {
        CrawlStats::bump(&ctx.stats.hook_dropped);
        return;
    }
    let package = to_package(&dom);
    let doc = package.as_document();
    let prov = DocProvenance {
        base_url: page.final_url.clone(),
        backlink: task.backlink.clone(),
        depth: task.depth,
    };

    if ctx.cancel.is_cancelled() {
        return;
    }
    match dispatch::execute(&doc, &ctx.program, compiled, task, &prov, &ctx.cancel) {
        Ok(outcome) => {
            for child in outcome.children {
                ctx.frontier.enqueue(child);
            }
            for value in outcome.data {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                let Some(value) = ctx.hooks.run_post_extract(&ctx.handle, value, &info) else {
                    CrawlStats::bump(&ctx.stats.hook_dropped);
                    continue;
                };
                CrawlStats::bump(&ctx.stats.yielded);
                if ctx.tx_out.send(value).is_err() {
                    break;
                }
            }
        }
        Err(e) => {
            log::warn!("Skipping segment dispatch for {}: {e}", task.url);
            CrawlStats::bump(&ctx.stats.failed);
            if ctx.yield_errors {
                ctx.tx_out
                    .send(Value::Error(ErrorValue {
                        url: task.url.clone(),
                        reason: e.to_string(),
                        status: None,
                        depth: task.depth,
                    }))
                    .ok();
            }
        }
    }
}
