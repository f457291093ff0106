//! `alertlink` - run an alert node or a broker over a TCP line link
//!
//! Protocol lines travel over the socket; diagnostics go to stderr through
//! `tracing`. The broker additionally prints each newly delivered message to
//! stdout, one per line.
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use alertlink_core::{
    Broker, DeliveredContent, FileStore, Ledger, LedgerLayout, LineSource, NodeConfig, Result,
    Scheduler, SimulatedSensor,
};

#[derive(Parser)]
#[command(name = "alertlink", version, about = "Threshold alert node and broker")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample a (simulated) distance sensor and publish threshold alerts
    Node {
        /// Broker address
        #[arg(long, default_value = "127.0.0.1:7878")]
        connect: String,

        /// Ledger image file
        #[arg(long, default_value = "alertlink-ledger.bin")]
        ledger: PathBuf,

        #[arg(long, default_value_t = alertlink_core::THRESHOLD_CM)]
        threshold_cm: f32,

        #[arg(long, default_value_t = alertlink_core::HYSTERESIS_CM)]
        hysteresis_cm: f32,

        #[arg(long, default_value_t = alertlink_core::SAMPLE_INTERVAL_MS)]
        sample_interval_ms: u32,

        #[arg(long, default_value_t = alertlink_core::RETRANSMIT_INTERVAL_MS)]
        retransmit_interval_ms: u32,

        /// Persisted payload slot width in bytes
        #[arg(long, default_value_t = alertlink_core::PAYLOAD_SLOT_LEN)]
        payload_slot: usize,

        /// Seed for the simulated sensor
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Starting distance for the simulated sensor
        #[arg(long, default_value_t = 10.0)]
        start_cm: f32,

        /// Scheduler loop period
        #[arg(long, default_value_t = 10)]
        tick_ms: u64,
    },
    /// Accept PUBLISH messages and complete the handshake
    Broker {
        #[arg(long, default_value = "127.0.0.1:7878")]
        listen: String,

        /// Processed-id journal (JSON)
        #[arg(long)]
        journal: Option<PathBuf>,
    },
}

/// Non-blocking view over the channel fed by the socket reader task
struct ChannelSource {
    rx: UnboundedReceiver<String>,
    closed: bool,
}

impl LineSource for ChannelSource {
    fn try_read_line(&mut self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }
}

/// Resolves on the first Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("interrupted");
}

/// Wrapping millisecond clock since `start`
fn millis_since(start: Instant) -> u32 {
    start.elapsed().as_millis() as u32
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Node {
            connect,
            ledger,
            threshold_cm,
            hysteresis_cm,
            sample_interval_ms,
            retransmit_interval_ms,
            payload_slot,
            seed,
            start_cm,
            tick_ms,
        } => {
            let config = NodeConfig::builder()
                .with_threshold_cm(threshold_cm)
                .with_hysteresis_cm(hysteresis_cm)
                .with_sample_interval_ms(sample_interval_ms)
                .with_retransmit_interval_ms(retransmit_interval_ms)
                .with_payload_slot_len(payload_slot)
                .build()?;
            let sensor = SimulatedSensor::new(seed, start_cm);
            let tick = Duration::from_millis(tick_ms);
            run_node(config, ledger, sensor, &connect, tick, ctrl_c()).await
        }
        Commands::Broker { listen, journal } => run_broker(&listen, journal, ctrl_c()).await,
    }
}

async fn run_node(
    config: NodeConfig,
    ledger_path: PathBuf,
    sensor: SimulatedSensor,
    addr: &str,
    tick: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let layout = LedgerLayout::new(config.payload_slot_len);
    let store = FileStore::open(&ledger_path, layout.total_len())?;
    let (ledger, report) = Ledger::open(store, layout)?;
    info!(
        path = %ledger_path.display(),
        next_id = %ledger.state().next_id,
        pending = ledger.has_pending(),
        recovered = !report.is_clean(),
        "ledger opened"
    );

    let stream = TcpStream::connect(addr).await?;
    info!(%addr, "connected to broker");
    let (reader, mut writer) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "link read failed");
                    break;
                }
            }
        }
    });

    let mut source = ChannelSource { rx, closed: false };
    let start = Instant::now();
    let mut scheduler = Scheduler::new(config, ledger, sensor, millis_since(start));
    let mut interval = tokio::time::interval(tick);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => break,
        }

        let mut outbox: Vec<String> = Vec::new();
        match scheduler.tick(millis_since(start), &mut source, &mut outbox) {
            Ok(outcome) => trace!(?outcome, "tick"),
            Err(err) => error!(%err, "tick failed"),
        }

        for line in outbox {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        if source.closed {
            info!("link closed by broker");
            break;
        }
    }

    Ok(())
}

async fn run_broker(
    addr: &str,
    journal: Option<PathBuf>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "broker listening");

    let mut broker = match journal {
        Some(path) => Broker::with_journal(path),
        None => Broker::new(),
    };

    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => return Ok(()),
        };
        info!(%peer, "node connected");

        if let Err(err) = serve_node(&mut broker, stream).await {
            warn!(%peer, %err, "connection ended with error");
        }
        info!(%peer, "node disconnected");
    }
}

async fn serve_node(broker: &mut Broker, stream: TcpStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let mut replies: Vec<String> = Vec::new();
        let delivered = match broker.handle_line(&line, &mut replies) {
            Ok(delivered) => delivered,
            Err(err) => {
                error!(%err, "failed to handle line");
                None
            }
        };

        for reply in replies {
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        if let Some(delivered) = delivered {
            match delivered.content {
                DeliveredContent::Alert(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(err) => warn!(%err, "could not encode alert"),
                },
                DeliveredContent::Raw(text) => println!("{}", text),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn signalled() -> impl Future<Output = ()> {
        let (tx, rx) = oneshot::channel::<()>();
        let _ = tx.send(());
        async move {
            let _ = rx.await;
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_node_stops_on_earlier_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let dir = tempfile::tempdir().unwrap();

        let node = run_node(
            NodeConfig::default(),
            dir.path().join("ledger.bin"),
            SimulatedSensor::new(7, 10.0),
            &addr,
            Duration::from_millis(5),
            signalled(),
        );
        let (result, accepted) = tokio::join!(node, listener.accept());

        assert!(result.is_ok());
        assert!(accepted.is_ok());
        assert!(dir.path().join("ledger.bin").exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_broker_stops_on_earlier_shutdown() {
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_broker("127.0.0.1:0", None, signalled()),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
