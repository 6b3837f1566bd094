mod commands;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use delaycam_buffer::DelaySettings;
use delaycam_capture::source_from_config;
use delaycam_mirror::{DelayMirror, MirrorCommand};
use delaycam_network::CacheProxy;
use delaycam_offline::{
    ControlMessage, DiskCacheStorage, FetchOutcome, FetchRequest, HttpFetcher, NetworkFetcher,
    OfflineWorker, WorkerConfig, WorkerState,
};
use delaycam_ops::{ensure_state_dir, init_tracing};
use delaycam_render::PngSink;
use delaycam_types::{
    config::{DelaycamConfig, SourceConfig},
    viewport::Viewport,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};
use url::Url;

use crate::commands::parse_command;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about = "Delayed video mirror with an offline asset cache")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "DELAYCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `ops.log_level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture frames and show them again after the configured delay.
    Mirror(MirrorArgs),
    /// Manage the offline asset cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Serve the configured origin through the offline cache.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Args, Debug)]
struct MirrorArgs {
    /// `synthetic` or a directory of PNG frames.
    #[arg(long)]
    source: Option<String>,
    /// Frames sampled per second.
    #[arg(long)]
    rate: Option<u32>,
    /// Delay in seconds (10-120).
    #[arg(long)]
    delay: Option<u32>,
    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,
    #[arg(long)]
    zoom: Option<f32>,
    /// Where the delayed frame is written.
    #[arg(long)]
    output: Option<String>,
    /// Do not read live commands from stdin.
    #[arg(long)]
    no_stdin: bool,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Pre-cache every asset of the manifest.
    Install {
        /// Activate immediately once installed.
        #[arg(long)]
        skip_waiting: bool,
    },
    /// Take over and delete stale cache versions.
    Activate,
    Status,
    /// Post a control message (`SKIP_WAITING` or `CLEAR_CACHE`).
    Message { token: String },
    /// Fetch a URL through the cache-first handler.
    Fetch {
        url: String,
        /// Treat the request as a page navigation.
        #[arg(long)]
        navigate: bool,
    },
}

type DiskWorker = OfflineWorker<DiskCacheStorage, HttpFetcher>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref());
    if let Some(level) = cli.log_level {
        config.ops.log_level = level;
    }
    init_tracing(&config.ops)?;

    match cli.command {
        Command::Mirror(args) => run_mirror(config, args).await,
        Command::Cache { action } => run_cache(&config, action).await,
        Command::Serve { bind } => run_serve(&config, bind).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> DelaycamConfig {
    let Some(path) = path else {
        return DelaycamConfig::default();
    };
    match DelaycamConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                DelaycamConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            DelaycamConfig::default()
        }
    }
}

async fn run_mirror(mut config: DelaycamConfig, args: MirrorArgs) -> Result<()> {
    if let Some(source) = args.source {
        config.capture.source = match source.as_str() {
            "synthetic" => SourceConfig::default(),
            dir => SourceConfig::ImageSequence { dir: dir.into() },
        };
    }
    if let Some(rate) = args.rate {
        config.capture.frame_rate = rate;
    }
    if let Some(delay) = args.delay {
        config.capture.delay_secs = delay;
    }
    if let Some(zoom) = args.zoom {
        config.capture.zoom = zoom;
    }
    if let Some(output) = args.output {
        config.capture.output_path = output;
    }
    config.validate()?;

    let settings = DelaySettings::from_config(&config.capture)?;
    let source = source_from_config(&config.capture.source);
    let sink = PngSink::new(&config.capture.output_path);
    let mut mirror = DelayMirror::new(settings, source, sink)?
        .with_viewport(Viewport::with_zoom(config.capture.zoom));

    let (tx, rx) = mpsc::channel(16);
    if !args.no_stdin {
        tokio::spawn(read_stdin_commands(tx.clone()));
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(MirrorCommand::Stop).await;
        }
    });

    info!("Writing delayed frames to {}", config.capture.output_path);
    let report = mirror.run(args.ticks, Some(rx)).await?;
    println!(
        "ticks={} presented={} filling={} dropped={}",
        report.ticks, report.presented, report.filling, report.dropped
    );
    Ok(())
}

async fn read_stdin_commands(tx: mpsc::Sender<MirrorCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match parse_command(&line) {
                Ok(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(err) => eprintln!("{err}"),
            },
            Ok(None) => break,
            Err(err) => {
                warn!("stdin closed: {err}");
                break;
            }
        }
    }
}

async fn disk_worker(config: &DelaycamConfig) -> Result<DiskWorker> {
    ensure_state_dir(&config.offline.cache_dir)?;
    let worker_config = WorkerConfig::from_offline(&config.offline)?;
    let storage = DiskCacheStorage::new(&config.offline.cache_dir).await?;
    let fetcher = HttpFetcher::new(Some(FETCH_TIMEOUT))?;
    Ok(OfflineWorker::new(worker_config, storage, fetcher))
}

async fn run_cache(config: &DelaycamConfig, action: CacheAction) -> Result<()> {
    config.validate()?;
    let worker = disk_worker(config).await?;

    match action {
        CacheAction::Install { skip_waiting } => {
            if skip_waiting {
                worker.handle_message(ControlMessage::SkipWaiting).await?;
            }
            let count = worker.install().await?;
            println!(
                "installed {} ({count} assets, {})",
                worker.config().cache_name,
                worker.state().await
            );
        }
        CacheAction::Activate => {
            if worker.restore().await? != WorkerState::Installed {
                bail!("nothing installed for {}", worker.config().cache_name);
            }
            let deleted = worker.activate().await?;
            println!("activated; deleted stale caches: {deleted:?}");
        }
        CacheAction::Status => {
            worker.restore().await?;
            let status = worker.status().await?;
            println!("state: {}", status.state);
            println!("current cache: {}", status.cache_name);
            println!("caches: {}", status.caches.join(", "));
            for entry in status.entries {
                println!("  {entry}");
            }
        }
        CacheAction::Message { token } => {
            let message: ControlMessage = token.parse()?;
            worker.restore().await?;
            let reply = worker.handle_message(message).await?;
            println!("{reply:?}");
        }
        CacheAction::Fetch { url, navigate } => {
            let url = Url::parse(&url).with_context(|| format!("invalid url {url}"))?;
            if worker.restore().await? == WorkerState::Installed {
                worker.activate().await?;
            }
            let request = if navigate {
                FetchRequest::navigate(url)
            } else {
                FetchRequest::get(url)
            };
            match worker.handle_fetch(&request).await {
                FetchOutcome::Respond { source, response } => println!(
                    "{} {:?} {} bytes",
                    response.status,
                    source,
                    response.body.len()
                ),
                FetchOutcome::PassThrough => {
                    let response = worker.fetcher().fetch(&request).await?;
                    println!("{} passthrough {} bytes", response.status, response.body.len());
                }
            }
        }
    }
    Ok(())
}

async fn run_serve(config: &DelaycamConfig, bind: Option<String>) -> Result<()> {
    config.validate()?;
    let addr: SocketAddr = bind
        .as_deref()
        .unwrap_or(&config.network.bind_addr)
        .parse()
        .context("invalid bind address")?;

    let worker = disk_worker(config).await?;
    if worker.restore().await? == WorkerState::Parsed {
        if let Err(err) = worker.install().await {
            warn!("Serving without an offline cache: {err}");
        }
    }
    if worker.state().await == WorkerState::Installed {
        worker.activate().await?;
    }

    CacheProxy::bind(addr, Arc::new(worker)).await?.run().await?;
    Ok(())
}
