use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use ordermail_core::{Order, WorkItem};
use ordermail_events::{
    DEAD_LETTER_CONSUMER, DEAD_LETTER_QUEUE, DEAD_LETTER_TOPIC, InMemoryBroker, MAIN_CONSUMER,
    MAIN_QUEUE, MAIN_TOPIC, Publisher, decode,
};
use ordermail_infra::{
    ConsumerOptions, ConsumerStats, DeadLetterHandler, EmailProcessor, InMemoryOrderStore,
    MailSender, QueueConfig, QueueConsumer,
};
use ordermail_observability::{DEFAULT_LOG_FILE, LogFormat, LogOptions};

/// Broker connection the consumers are declared on.
const CONNECTION: &str = "amqp";

#[derive(Parser)]
#[command(name = "ordermail")]
#[command(about = "Order confirmation email queue tools")]
#[command(version)]
struct Cli {
    /// Append logs to this file
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogStyle::Json)]
    log_format: LogStyle,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogStyle {
    Json,
    Pretty,
}

impl From<LogStyle> for LogFormat {
    fn from(style: LogStyle) -> Self {
        match style {
            LogStyle::Json => LogFormat::Json,
            LogStyle::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show consumer, queue and retry configuration
    Status,
    /// Process messages from the main order email queue
    Process(ProcessArgs),
    /// Review messages from the dead letter queue
    ProcessDlq(ProcessDlqArgs),
}

#[derive(Args, Debug, Clone)]
struct ProcessArgs {
    /// Maximum number of deliveries to handle, redeliveries included
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    max_messages: u64,

    /// Queue export with one JSON envelope per line (stdin when omitted)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Fail this percentage of send attempts, overriding ORDERMAIL_SIMULATE_FAILURES
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    simulate_failures: Option<u8>,
}

#[derive(Args, Debug, Clone)]
struct ProcessDlqArgs {
    /// Maximum number of messages to process
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    max_messages: u64,

    /// DLQ export with one JSON envelope per line (stdin when omitted)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Send reviewed messages back to the main topic with a fresh retry budget
    #[arg(long)]
    requeue: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    ordermail_observability::init_with(
        LogOptions::default()
            .with_format(cli.log_format.into())
            .with_file(&cli.log_file),
    )?;

    let config = QueueConfig::from_env().context("invalid order email queue configuration")?;

    match cli.command {
        Commands::Status => render_status(&config, &mut io::stdout().lock()),
        Commands::Process(args) => {
            let config = match args.simulate_failures {
                Some(percent) => config.with_simulated_failures(percent),
                None => config,
            };
            let input = open_input(args.input.as_deref())?;
            let stats = process_queue(&args, &config, input, &mut io::stdout().lock())?;

            eprintln!(
                "Queue processing completed: {} received, {} acknowledged, {} requeued",
                stats.received, stats.acknowledged, stats.requeued
            );
            Ok(())
        }
        Commands::ProcessDlq(args) => {
            let input = open_input(args.input.as_deref())?;
            let stats = process_dlq(&args, input, &mut io::stdout().lock())?;

            eprintln!(
                "DLQ processing completed: {} received, {} acknowledged",
                stats.received, stats.acknowledged
            );
            Ok(())
        }
    }
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(io::stdin().lock())),
    }
}

/// Publish every non-blank line of an export to `topic`.
fn load_export(broker: &InMemoryBroker, topic: &str, input: impl BufRead) -> Result<()> {
    for line in input.lines() {
        let line = line.context("failed to read queue export")?;
        if line.trim().is_empty() {
            continue;
        }
        broker.publish(topic, line.into_bytes())?;
    }
    Ok(())
}

fn render_status(config: &QueueConfig, out: &mut impl Write) -> Result<()> {
    let max_messages = ConsumerOptions::default().max_messages.to_string();
    let max_retries = config.max_retry_attempts.to_string();

    let rows = [
        ("Consumer Name", MAIN_CONSUMER),
        ("Queue Name", MAIN_QUEUE),
        ("Topic", MAIN_TOPIC),
        ("Connection", CONNECTION),
        ("Max Messages", max_messages.as_str()),
        ("Dead Letter Consumer", DEAD_LETTER_CONSUMER),
        ("Dead Letter Queue", DEAD_LETTER_QUEUE),
        ("Dead Letter Topic", DEAD_LETTER_TOPIC),
        ("Queue Enabled", yes_no(config.enabled)),
        ("Max Retry Attempts", max_retries.as_str()),
        ("Simulate Failures", yes_no(config.simulate_failures)),
    ];

    let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0).max("Property".len());
    let value_width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0).max("Value".len());
    let rule = format!("+-{}-+-{}-+", "-".repeat(key_width), "-".repeat(value_width));

    writeln!(out, "Order Email Queue Status")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "| {:<key_width$} | {:<value_width$} |", "Property", "Value")?;
    writeln!(out, "{rule}")?;
    for (key, value) in rows {
        writeln!(out, "| {:<key_width$} | {:<value_width$} |", key, value)?;
    }
    writeln!(out, "{rule}")?;

    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Hands confirmation emails to the process log instead of a mail server.
struct LogMailSender;

impl MailSender for LogMailSender {
    fn send(&self, order: &Order) -> anyhow::Result<bool> {
        info!(
            increment_id = order.increment_id.as_deref().unwrap_or("unknown"),
            customer_email = order.customer_email.as_deref().unwrap_or("unknown"),
            "order confirmation email handed to log transport"
        );
        Ok(true)
    }
}

/// Rebuild the order an envelope was published for.
fn order_from_envelope(item: &WorkItem) -> Option<Order> {
    let order_id = item.order_id?;
    let mut order = Order::new(order_id, item.increment_id.clone().unwrap_or_default());
    order.customer_email = item.customer_email.clone();

    if let Some(name) = item.customer_name.as_deref().map(str::trim) {
        let (first, last) = name.split_once(' ').unwrap_or((name, ""));
        order.customer_firstname = Some(first.to_string());
        order.customer_lastname = Some(last.trim().to_string());
    }

    Some(order)
}

/// Replay a main queue export through the email processor.
///
/// Orders are rebuilt from the envelopes themselves. Envelopes that end up on
/// the dead letter topic are written to `out`, one per line, ready for
/// `process-dlq`.
fn process_queue(
    args: &ProcessArgs,
    config: &QueueConfig,
    input: impl BufRead,
    out: &mut impl Write,
) -> Result<ConsumerStats> {
    let broker = Arc::new(InMemoryBroker::with_default_topology());
    load_export(&broker, MAIN_TOPIC, input)?;

    let orders = InMemoryOrderStore::arc();
    for payload in broker.published(MAIN_TOPIC) {
        if let Some(order) = decode(&payload).ok().as_ref().and_then(order_from_envelope) {
            orders.insert(order);
        }
    }

    info!(
        consumer = MAIN_CONSUMER,
        queue = MAIN_QUEUE,
        pending = broker.depth(MAIN_QUEUE),
        max_messages = args.max_messages,
        "processing order email queue"
    );

    let processor = EmailProcessor::from_config(orders, LogMailSender, broker.clone(), config);
    let consumer = QueueConsumer::new(MAIN_CONSUMER, broker.clone(), MAIN_QUEUE);
    let max_messages = usize::try_from(args.max_messages).unwrap_or(usize::MAX);
    let stats = consumer.drain(&processor, max_messages)?;

    for payload in broker.published(DEAD_LETTER_TOPIC) {
        out.write_all(&payload)?;
        out.write_all(b"\n")?;
    }

    info!(
        received = stats.received,
        requeued = stats.requeued,
        remaining = broker.depth(MAIN_QUEUE),
        dead_lettered = broker.depth(DEAD_LETTER_QUEUE),
        "order email queue processing completed"
    );

    Ok(stats)
}

/// Replay a DLQ export through the dead letter handler.
///
/// With `--requeue`, the envelopes sent back to the main topic are written to
/// `out`, one per line.
fn process_dlq(
    args: &ProcessDlqArgs,
    input: impl BufRead,
    out: &mut impl Write,
) -> Result<ConsumerStats> {
    let broker = Arc::new(InMemoryBroker::with_default_topology());
    load_export(&broker, DEAD_LETTER_TOPIC, input)?;

    info!(
        queue = DEAD_LETTER_QUEUE,
        pending = broker.depth(DEAD_LETTER_QUEUE),
        max_messages = args.max_messages,
        "processing dead letter messages"
    );

    let handler = DeadLetterHandler::new(broker.clone()).with_requeue(args.requeue);
    let consumer = QueueConsumer::new(DEAD_LETTER_CONSUMER, broker.clone(), DEAD_LETTER_QUEUE);
    let max_messages = usize::try_from(args.max_messages).unwrap_or(usize::MAX);
    let stats = consumer.drain(&handler, max_messages)?;

    for payload in broker.published(MAIN_TOPIC) {
        out.write_all(&payload)?;
        out.write_all(b"\n")?;
    }

    info!(
        received = stats.received,
        remaining = broker.depth(DEAD_LETTER_QUEUE),
        "dead letter processing completed"
    );

    Ok(stats)
}
