//! Runs an in-process cluster where every node repeatedly takes the
//! critical section, and checks that no two nodes ever hold it at once.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::Rng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lamport_mutex::transport::local::LocalNetwork;
use lamport_mutex::{DistributedMutex, NodeConfig, NodeId};

#[derive(Parser, Debug)]
#[command(name = "lamport-mutex")]
#[command(about = "Ricart-Agrawala mutual exclusion over an in-process network")]
struct Args {
    /// Number of nodes in the cluster
    #[arg(short, long, default_value = "3")]
    nodes: usize,

    /// Critical section entries per node
    #[arg(short, long, default_value = "1")]
    rounds: usize,

    /// Base node settings (JSON); the id is replaced per node
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Time spent in the critical section
    #[arg(long)]
    hold_ms: Option<u64>,

    /// Give up waiting for deferred replies after this long
    #[arg(long)]
    quorum_timeout_ms: Option<u64>,

    /// Upper bound of the random delay before a node first enters WANTED
    #[arg(long, default_value = "0")]
    max_start_delay_ms: u64,

    /// Upper bound of the random per-message latency
    #[arg(long, default_value = "0")]
    max_latency_ms: u64,

    /// Cut the link between two nodes, e.g. `node0:node2`
    #[arg(long, value_parser = parse_link)]
    drop_link: Vec<(String, String)>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write the log to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Remove the log file when the run ends
    #[arg(long, requires = "log_file")]
    delete_log: bool,
}

fn parse_link(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .filter(|(a, b)| !a.is_empty() && !b.is_empty())
        .map(|(a, b)| (a.to_owned(), b.to_owned()))
        .ok_or_else(|| format!("expected A:B, got {s:?}"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let outcome = run(&args);

    if args.delete_log {
        if let Some(path) = &args.log_file {
            delete_log(path);
        }
    }
    outcome
}

fn delete_log(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), "could not delete log file: {e}");
            false
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();
    match &args.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let mut base = match &args.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(ms) = args.hold_ms {
        base.hold_ms = ms;
    }
    if args.quorum_timeout_ms.is_some() {
        base.quorum_timeout_ms = args.quorum_timeout_ms;
    }

    let configs = (0..args.nodes).map(|i| NodeConfig {
        id: NodeId::from(format!("node{i}")),
        ..base.clone()
    });
    let net = LocalNetwork::with_latency(Duration::from_millis(args.max_latency_ms));
    let nodes = net.cluster(configs).context("starting cluster")?;
    for (a, b) in &args.drop_link {
        warn!(from = %a, to = %b, "dropping link");
        net.disconnect(&NodeId::from(a.as_str()), &NodeId::from(b.as_str()));
    }
    info!(nodes = nodes.len(), rounds = args.rounds, "cluster started");

    let in_cs = Arc::new(AtomicBool::new(false));
    let violations = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let ths = nodes
        .iter()
        .cloned()
        .map(|node| {
            let in_cs = in_cs.clone();
            let violations = violations.clone();
            let entered = entered.clone();
            let failed = failed.clone();
            let rounds = args.rounds;
            let jitter = rand::thread_rng().gen_range(0..=args.max_start_delay_ms);
            thread::spawn(move || {
                thread::sleep(node.config().start_delay() + Duration::from_millis(jitter));
                for _ in 0..rounds {
                    let guard = match node.acquire() {
                        Ok(guard) => guard,
                        Err(e) => {
                            warn!(node = %node.id(), "could not enter critical section: {e}");
                            failed.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                    };
                    if in_cs.swap(true, Ordering::SeqCst) {
                        error!(node = %node.id(), "entered while another node holds");
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    info!(node = %node.id(), "in critical section");
                    thread::sleep(node.config().hold());
                    in_cs.store(false, Ordering::SeqCst);
                    entered.fetch_add(1, Ordering::SeqCst);
                    drop(guard);
                }
            })
        })
        .collect::<Vec<_>>();
    for th in ths {
        if th.join().is_err() {
            bail!("node thread panicked");
        }
    }

    let (entered, failed) = (entered.load(Ordering::SeqCst), failed.load(Ordering::SeqCst));
    info!(entered, failed, "run finished");
    let violations = violations.load(Ordering::SeqCst);
    if violations > 0 {
        bail!("mutual exclusion violated {violations} times");
    }
    Ok(())
}
