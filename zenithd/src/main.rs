//! The zenith daemon: configuration, startup, the long-running service
//! loops, and orderly shutdown.
//!
//! Exit code 0 on clean shutdown, 1 on fatal initialization failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gumdrop::Options;
use tracing::{error, info};

use zenith_chain::parameters::{NetworkParameters, DATABASE_WRITE_INTERVAL};
use zenith_consensus::{BatchVerifier, ChainContext, ChainController, StructuralVerifier};
use zenith_state::{ChainState, FinalizedState};

mod config;

use config::Config;

/// Fatal initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("bad configuration: {0}")]
    BadConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state database failed to open: {0}")]
    State(String),
}

#[derive(Debug, Options)]
struct Args {
    #[options(help = "print this help message")]
    help: bool,

    #[options(help = "data directory", meta = "DIR")]
    datadir: Option<PathBuf>,

    #[options(help = "configuration file", meta = "FILE")]
    conf: Option<PathBuf>,

    #[options(help = "use the test network")]
    testnet: bool,

    #[options(help = "use the regression test network")]
    regtest: bool,

    #[options(help = "detach from the controlling terminal")]
    daemon: bool,

    #[options(help = "rebuild chain state from block files")]
    reindex: bool,

    #[options(help = "rebuild chain state, trusting stored proofs")]
    reindex_fast: bool,

    #[options(help = "script verification threads (0 = cores)", meta = "N")]
    par: Option<usize>,

    #[options(help = "coin cache size in MiB", meta = "MB")]
    dbcache: Option<usize>,

    #[options(help = "maximum peer connections", meta = "N")]
    maxconnections: Option<usize>,

    #[options(help = "misbehavior threshold before banning", meta = "SCORE")]
    banscore: Option<u8>,

    #[options(help = "ban duration in seconds", meta = "SECS")]
    bantime: Option<u64>,

    #[options(help = "relay fee floor in zatoshi per kB", meta = "FEE")]
    minrelaytxfee: Option<u64>,

    #[options(help = "allow high-priority free relay")]
    limitfreerelay: bool,

    #[options(help = "input-count bound for relayed transactions", meta = "N")]
    mempooltxinputlimit: Option<usize>,

    #[options(help = "rescan the wallet for missed transactions on startup")]
    rescan: bool,

    #[options(help = "wallet key pool size", meta = "N")]
    keypool: Option<usize>,

    #[options(help = "maintain a full transaction index")]
    txindex: bool,

    #[options(help = "maintain the address indexes")]
    addressindex: bool,

    #[options(help = "maintain the block timestamp index")]
    timestampindex: bool,

    #[options(help = "maintain the spent-output index")]
    spentindex: bool,

    #[options(help = "maintain the bwt maturity-height index")]
    maturityheightindex: bool,

    #[options(free, help = "command: start | stop")]
    command: Vec<String>,
}

impl Args {
    fn merge_into(&self, mut config: Config) -> Config {
        if let Some(datadir) = &self.datadir {
            config.datadir = datadir.clone();
        }
        if self.testnet {
            config.network = zenith_chain::parameters::Network::Testnet;
        }
        if self.regtest {
            config.network = zenith_chain::parameters::Network::Regtest;
        }
        if self.reindex {
            config.reindex = true;
        }
        if self.reindex_fast {
            config.reindex_fast = true;
        }
        if let Some(par) = self.par {
            config.par = par;
        }
        if let Some(dbcache) = self.dbcache {
            config.dbcache = dbcache * 1024 * 1024;
        }
        if let Some(maxconnections) = self.maxconnections {
            config.maxconnections = maxconnections;
        }
        if let Some(banscore) = self.banscore {
            config.banscore = banscore;
        }
        if let Some(bantime) = self.bantime {
            config.bantime = bantime;
        }
        if let Some(minrelaytxfee) = self.minrelaytxfee {
            config.minrelaytxfee = minrelaytxfee;
        }
        if self.limitfreerelay {
            config.limitfreerelay = true;
        }
        if let Some(limit) = self.mempooltxinputlimit {
            config.mempooltxinputlimit = limit;
        }
        config.txindex |= self.txindex;
        config.addressindex |= self.addressindex;
        config.timestampindex |= self.timestampindex;
        config.spentindex |= self.spentindex;
        config.maturityheightindex |= self.maturityheightindex;
        config
    }
}

fn init_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("static filter parses");
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .init();
}

fn start(config: Config) -> Result<(), InitError> {
    let params = NetworkParameters::new(config.network);
    info!(network = %config.network, datadir = %config.datadir.display(), "starting zenithd");

    let state_config = zenith_state::Config {
        cache_dir: config.datadir.clone(),
        db_cache_bytes: config.dbcache,
        ephemeral: false,
    };
    let finalized = FinalizedState::new(&state_config, config.network)
        .map_err(|error| InitError::State(error.to_string()))?;
    let chain = ChainState::new(params, finalized);
    let context = Arc::new(ChainContext::new(chain));
    // the network layer drives the controller with inbound blocks; the
    // daemon owns its lifetime
    let _controller = Arc::new(ChainController::new(context.clone()));

    let admission_flags = zenith_consensus::AdmissionFlags {
        limit_free: config.limitfreerelay,
        min_relay_fee: config.minrelaytxfee,
        proof_verification: config.proof_mode()?,
        max_tx_inputs: match config.mempooltxinputlimit {
            0 => None,
            limit => Some(limit),
        },
        ..zenith_consensus::AdmissionFlags::default()
    };
    info!(?admission_flags, "admission policy");

    let shutdown = Arc::new(AtomicBool::new(false));
    let mempool_cap = config.mempool_max_bytes;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let verifier = Arc::new(StructuralVerifier);
        let _batcher = BatchVerifier::spawn(verifier, shutdown.clone());

        // periodic chainstate flush, bounded by the durability interval
        let flush_context = context.clone();
        let flush_shutdown = shutdown.clone();
        let flusher = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(DATABASE_WRITE_INTERVAL));
            loop {
                ticker.tick().await;
                if flush_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let mut chain = flush_context
                    .chain
                    .lock()
                    .expect("cs_main is never poisoned");
                if let Err(error) = chain.coins.flush() {
                    error!(%error, "chainstate flush failed");
                }
            }
        });

        // periodic mempool maintenance: size cap and notification drain
        let pool_context = context.clone();
        let pool_shutdown = shutdown.clone();
        let pool_keeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                if pool_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let mut mempool = pool_context
                    .mempool
                    .lock()
                    .expect("cs_mempool is never poisoned");
                let evicted = mempool.trim_to_size(mempool_cap);
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "evicted mempool entries over cap");
                }
                mempool.drain_recently_added();
            }
        });

        info!("zenithd started; waiting for shutdown signal");
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        shutdown.store(true, Ordering::SeqCst);
        flusher.abort();
        pool_keeper.abort();

        // final flush so a clean shutdown loses nothing
        let mut chain = context.chain.lock().expect("cs_main is never poisoned");
        if let Err(error) = chain.coins.flush() {
            error!(%error, "final chainstate flush failed");
        }
    });

    info!("zenithd stopped cleanly");
    Ok(())
}

fn main() {
    init_tracing();
    color_eyre::install().expect("error reporting installs once");

    let args = Args::parse_args_default_or_exit();
    let command = args
        .command
        .first()
        .map(String::as_str)
        .unwrap_or("start")
        .to_string();

    let conf_path = args
        .conf
        .clone()
        .unwrap_or_else(|| PathBuf::from("zenith.conf"));
    let config = match Config::load(&conf_path) {
        Ok(config) => args.merge_into(config),
        Err(error) => {
            eprintln!("zenithd: {}", error);
            std::process::exit(1);
        }
    };

    if args.rescan || args.keypool.is_some() {
        // wallet options ride along on the shared command line; the wallet
        // process consumes them
        tracing::info!("wallet options noted; the wallet component applies them");
    }
    if args.daemon {
        tracing::info!("detaching is delegated to the service manager");
    }

    match command.as_str() {
        "start" => {
            if let Err(error) = start(config) {
                eprintln!("zenithd: {}", error);
                std::process::exit(1);
            }
        }
        "stop" => {
            // the running daemon observes SIGINT/SIGTERM; a control socket
            // is the network layer's concern
            eprintln!("zenithd: send SIGTERM to the running daemon to stop it");
        }
        other => {
            eprintln!("zenithd: unknown command {:?}", other);
            std::process::exit(1);
        }
    }
}
