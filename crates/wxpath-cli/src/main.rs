use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use futures::StreamExt;
use tokio::runtime;
use wxpath_crawler::{CacheBackend, CrawlerConfig, Engine, RunOptions};

/// Evaluate a wxpath expression and stream results as JSON lines
///
/// Example: wxpath "url('https://example.org')//a/@href"
#[derive(Debug, Parser)]
#[command(name = "wxpath", version)]
pub struct Args {
    /// The expression, e.g. url('https://example.org')///url(//a/@href)//h1
    pub expression: String,

    /// Maximum crawl depth (inclusive; the seed is depth 0)
    #[arg(long, default_value_t = 3)]
    pub depth: usize,

    /// Optional crawler yaml configuration file
    #[arg(env = "WXPATH_CONFIG", long)]
    pub config: Option<PathBuf>,

    /// Override the global max in-flight requests
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the max in-flight requests per host
    #[arg(long)]
    pub concurrency_per_host: Option<usize>,

    /// Override the per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Additional request header (repeatable)
    #[arg(long = "header", value_name = "KEY:VALUE")]
    pub headers: Vec<String>,

    /// Override the user agent
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Enforce robots.txt (on by default)
    #[arg(long, value_name = "BOOL")]
    pub respect_robots: Option<bool>,

    /// Cache responses in memory for the duration of the process
    #[arg(long)]
    pub cache: bool,

    /// Emit error data for failed fetches instead of dropping them
    #[arg(long)]
    pub yield_errors: bool,

    /// Log periodic progress snapshots
    #[arg(long)]
    pub progress: bool,

    /// Info-level logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Debug-level logging
    #[arg(long)]
    pub debug: bool,
}

impl TryFrom<&Args> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let mut conf = if let Some(file) = args.config.as_ref().map(File::open) {
            serde_yaml::from_reader(file?)?
        } else {
            CrawlerConfig::default()
        };
        if let Some(concurrency) = args.concurrency {
            conf.concurrency = concurrency;
        }
        if let Some(per_host) = args.concurrency_per_host {
            conf.concurrency_per_host = per_host;
        }
        if let Some(timeout) = args.timeout {
            conf.timeout = timeout;
        }
        if let Some(user_agent) = &args.user_agent {
            conf.user_agent = user_agent.to_string();
        }
        if let Some(respect_robots) = args.respect_robots {
            conf.respect_robots = respect_robots;
        }
        for header in &args.headers {
            let (key, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("header `{header}` is not KEY:VALUE"))?;
            conf.headers
                .insert(key.trim().to_string(), value.trim().to_string());
        }
        if args.cache {
            conf.cache.enabled = true;
            conf.cache.backend = CacheBackend::Memory;
        }
        Ok(conf)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let conf: CrawlerConfig = (&args).try_into()?;
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let engine = Engine::new(conf);
        let options = RunOptions {
            progress: args.progress,
            yield_errors: args.yield_errors,
            ..Default::default()
        };
        let mut stream = engine.run(&args.expression, args.depth, options).await?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        while let Some(value) = stream.next().await {
            serde_json::to_writer(&mut out, &value.to_json())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    })
}
