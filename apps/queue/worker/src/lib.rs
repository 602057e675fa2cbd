//! Queue Worker
//!
//! Command line producer and consumer for a stream queue.
//!
//! ## Architecture
//!
//! ```text
//! queue-worker send '{"job":1}' --delay-secs 5
//!   ↓ (XADD, now or after the delay)
//! Redis Stream (stream-queue:<QUEUE_NAME>)
//!   ↓ (Consumer Group: QUEUE_CONSUMER_GROUP)
//! queue-worker consume --consumer worker-1
//! ```
//!
//! On Ctrl+C or SIGTERM pending delayed sends are cancelled and the consume
//! loop stops after its current read.

pub mod telemetry;

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr, bail};
use serde_json::Value;
use std::process;
use std::time::Duration;
use stream_queue::{
    FromEnv, LogStore, Queue, QueueConfig, QueueError, SendReceipt, ShutdownHandle, metrics,
};
use telemetry::{Environment, init_tracing, install_color_eyre};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "queue-worker")]
#[command(about = "Send to and consume from a Redis stream queue")]
pub struct Cli {
    /// Redis connection URL
    #[arg(
        long,
        global = true,
        env = "REDIS_URL",
        default_value = "redis://127.0.0.1:6379"
    )]
    pub redis_url: String,

    /// Logical queue name (overrides the configured one)
    #[arg(long, global = true, env = "QUEUE_NAME")]
    pub queue: Option<String>,

    /// Print Prometheus metrics for this run on exit
    #[arg(long, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Send one JSON message
    Send {
        /// Message body as JSON
        payload: String,

        /// Append after this many seconds
        #[arg(long, default_value_t = 0)]
        delay_secs: u64,

        /// Return as soon as a delayed send is scheduled
        #[arg(long)]
        no_wait: bool,
    },

    /// Receive and print messages until interrupted
    Consume {
        /// Consumer name within the group (default: <prefix>-<pid>)
        #[arg(short, long)]
        consumer: Option<String>,

        /// How long each read waits for a new entry
        #[arg(long, default_value_t = 1000)]
        block_ms: u64,

        /// Stop after this many messages
        #[arg(long)]
        max: Option<u64>,
    },
}

/// Run the queue worker
///
/// 1. Installs error reporting and structured logging
/// 2. Loads the queue configuration from the environment
/// 3. Connects to Redis and runs the selected command
/// 4. With `--print-metrics`, prints the run's metrics on exit
pub async fn run() -> Result<()> {
    install_color_eyre();
    let environment = Environment::from_env();
    init_tracing(&environment);

    let cli = Cli::parse();
    let print_metrics = cli.print_metrics;
    if print_metrics {
        metrics::init_metrics();
    }

    let result = execute(cli).await;

    if print_metrics {
        print!("{}", metrics::render_metrics());
    }
    result
}

/// Execute a parsed command line
pub async fn execute(cli: Cli) -> Result<()> {
    let config = queue_config(cli.queue.as_deref())?;
    info!(
        stream = %config.queue_name,
        group = %config.consumer_group,
        auto_verify = config.auto_verify,
        "Queue configuration loaded"
    );

    let queue = Queue::connect(&cli.redis_url, config)
        .await
        .wrap_err_with(|| format!("Failed to connect to Redis at {}", cli.redis_url))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = queue.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        request_shutdown(&shutdown_tx, &handle);
    });

    match cli.command {
        Commands::Send {
            payload,
            delay_secs,
            no_wait,
        } => send(&queue, &payload, delay_secs, no_wait, shutdown_rx).await,
        Commands::Consume {
            consumer,
            block_ms,
            max,
        } => {
            let consumer =
                consumer.unwrap_or_else(|| queue.config().consumer_name(process::id()));
            consume(&queue, &consumer, block_ms, max, shutdown_rx).await
        }
    }
}

/// Load `QueueConfig` from the environment, applying the CLI queue name
pub fn queue_config(queue: Option<&str>) -> Result<QueueConfig> {
    let config = QueueConfig::from_env().wrap_err("Failed to load queue configuration")?;
    Ok(match queue {
        Some(name) => config.with_queue_name(name),
        None => config,
    })
}

/// Raise the shutdown flag, then cancel pending delayed sends.
///
/// The flag goes first so a send whose task was aborted always sees it.
pub fn request_shutdown(shutdown_tx: &watch::Sender<bool>, handle: &ShutdownHandle) -> usize {
    let _ = shutdown_tx.send(true);
    handle.cancel_pending()
}

/// Parse a message body given on the command line
pub fn parse_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).wrap_err("Payload is not valid JSON")
}

async fn send<S: LogStore + 'static>(
    queue: &Queue<S>,
    payload: &str,
    delay_secs: u64,
    no_wait: bool,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let payload = parse_payload(payload)?;

    let Some(receipt) = queue
        .send_message(&payload, Duration::from_secs(delay_secs))
        .await?
    else {
        bail!("Message was not sent after all retries");
    };

    match receipt {
        SendReceipt::Appended(id) => println!("{}", id),
        SendReceipt::Scheduled(scheduled) => {
            println!("scheduled {} due {}", scheduled.id(), scheduled.due_at());
            if no_wait {
                warn!("Exiting before the due time drops the scheduled send");
                return Ok(());
            }

            match scheduled.appended().await {
                Some(id) => println!("{}", id),
                None if *shutdown.borrow() => info!("Scheduled send cancelled by shutdown"),
                None => bail!("Delayed message was not sent after all retries"),
            }
        }
    }

    Ok(())
}

async fn consume<S: LogStore + 'static>(
    queue: &Queue<S>,
    consumer: &str,
    block_ms: u64,
    max: Option<u64>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(consumer = %consumer, block_ms = block_ms, "Consuming messages");
    let mut handled: u64 = 0;

    // Reads are never cancelled mid-flight; the flag is checked between reads
    while !*shutdown.borrow() {
        if max.is_some_and(|max| handled >= max) {
            break;
        }

        match queue.receive_message::<Value>(consumer, block_ms).await {
            Ok(Some(message)) => {
                println!("{} {}", message.stream_id, message.body);
                handled += 1;
            }
            Ok(None) => {}
            Err(QueueError::Decode { stream_id, message }) => {
                warn!(stream_id = %stream_id, error = %message, "Skipping undecodable entry");
            }
            Err(e) => return Err(e).wrap_err("Failed to receive message"),
        }
    }

    info!(consumer = %consumer, handled = handled, "Consumer stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stream_queue::MemoryStore;

    const QUEUE_VARS: [&str; 2] = ["REDIS_URL", "QUEUE_NAME"];

    fn parse(args: &[&str]) -> Cli {
        temp_env::with_vars_unset(QUEUE_VARS, || {
            Cli::try_parse_from(args).expect("valid command line")
        })
    }

    #[test]
    fn test_send_defaults() {
        let cli = parse(&["queue-worker", "send", r#"{"dev":"x"}"#]);

        assert_eq!(cli.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(cli.queue, None);
        assert_eq!(
            cli.command,
            Commands::Send {
                payload: r#"{"dev":"x"}"#.to_string(),
                delay_secs: 0,
                no_wait: false,
            }
        );
    }

    #[test]
    fn test_consume_with_global_options_after_subcommand() {
        let cli = parse(&[
            "queue-worker",
            "consume",
            "--consumer",
            "c1",
            "--block-ms",
            "5000",
            "--max",
            "3",
            "--queue",
            "orders",
        ]);

        assert_eq!(cli.queue.as_deref(), Some("orders"));
        assert_eq!(
            cli.command,
            Commands::Consume {
                consumer: Some("c1".to_string()),
                block_ms: 5000,
                max: Some(3),
            }
        );
    }

    #[test]
    fn test_redis_url_from_env() {
        let cli = temp_env::with_var("REDIS_URL", Some("redis://cache:6380"), || {
            Cli::try_parse_from(["queue-worker", "send", "1"]).expect("valid command line")
        });
        assert_eq!(cli.redis_url, "redis://cache:6380");
    }

    #[test]
    fn test_send_requires_payload() {
        let result = temp_env::with_vars_unset(QUEUE_VARS, || {
            Cli::try_parse_from(["queue-worker", "send"])
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(r#"{"age":27}"#).unwrap()["age"], 27);
        assert!(parse_payload("{not json").is_err());
    }

    #[test]
    fn test_queue_config_override() {
        temp_env::with_vars_unset(["QUEUE_NAME", "QUEUE_CONSUMER_GROUP"], || {
            let config = queue_config(Some("orders")).unwrap();
            assert_eq!(config.queue_name, "stream-queue:orders");
            assert_eq!(config.consumer_group, "Messages");

            let config = queue_config(None).unwrap();
            assert_eq!(config.queue_name, "stream-queue:Queue");
        });
    }

    #[test]
    fn test_queue_config_invalid_env() {
        temp_env::with_var("QUEUE_AUTO_VERIFY", Some("maybe"), || {
            assert!(queue_config(None).is_err());
        });
    }

    fn memory_queue(name: &str) -> (Arc<MemoryStore>, Arc<Queue<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::new(store.clone(), QueueConfig::new(name)).unwrap();
        (store, Arc::new(queue))
    }

    #[test]
    fn test_print_metrics_flag_is_global() {
        let cli = parse(&["queue-worker", "send", "1", "--print-metrics"]);
        assert!(cli.print_metrics);

        let cli = parse(&["queue-worker", "send", "1"]);
        assert!(!cli.print_metrics);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_delayed_send_exits_cleanly() {
        let (store, queue) = memory_queue("cli-shutdown");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sender = queue.clone();
        let task = tokio::spawn(async move {
            send(&*sender, r#"{"dev":"x"}"#, 60, false, shutdown_rx).await
        });
        while queue.pending_sends() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(request_shutdown(&shutdown_tx, &queue.shutdown_handle()), 1);
        assert!(*shutdown_tx.borrow());
        task.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.len(&queue.config().queue_name).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consume_stops_at_max_and_records_metrics() {
        metrics::init_metrics();
        let (_, queue) = memory_queue("cli-metrics");
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        queue.ensure_group().await.unwrap();
        send(&*queue, r#"{"n":1}"#, 0, false, shutdown_rx.clone()).await.unwrap();
        consume(&*queue, "c1", 0, Some(1), shutdown_rx).await.unwrap();

        let rendered = metrics::render_metrics();
        assert!(rendered.contains("stream_queue_messages_sent_total"));
        assert!(rendered.contains("stream_queue_messages_received_total"));
    }
}
