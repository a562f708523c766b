//! genai-race - 同一提示词并发发往三种传输并比较延迟的命令行工具
//!
//! Usage:
//!   genai-race "<prompt>" [--max-tokens <n>] [--temperature <t>]
//!                         [--config <file.yaml>] [--timeout-ms <ms>]

use anyhow::{anyhow, bail, Context};
use genai_transports::{
    Coordinator, EndpointConfig, Error, GenerationCallbacks, GenerationRequest, StreamMetrics,
    TransportKind,
};
use std::io::Write;
use std::time::Duration;

struct Options {
    prompt: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    config: Option<String>,
    timeout_ms: Option<u64>,
}

/// Prints every event as it arrives, one line per event.
struct ConsoleCallbacks;

impl GenerationCallbacks for ConsoleCallbacks {
    fn on_chunk(&self, source: TransportKind, text: &str, metrics: &StreamMetrics) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(
            out,
            "[{:<9}] #{:<3} {:>8.1} ms  {}",
            source,
            metrics.chunk_count,
            metrics.total_duration_ms,
            text.replace('\n', " ")
        );
    }

    fn on_complete(&self, source: TransportKind) {
        println!("[{:<9}] complete", source);
    }

    fn on_error(&self, source: TransportKind, error: &Error) {
        eprintln!("[{:<9}] error: {}", source, error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }
    match args[1].as_str() {
        "version" | "--version" | "-V" => {
            println!("genai-race {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        "help" | "--help" | "-h" => {
            print_usage();
            return Ok(());
        }
        _ => {}
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = parse_args(&args[1..])?;
    let endpoints = match &options.config {
        Some(path) => EndpointConfig::from_yaml_file(path)
            .with_context(|| format!("loading endpoints from {}", path))?,
        None => EndpointConfig::from_env().context("resolving endpoints from environment")?,
    };

    let mut builder = Coordinator::builder().endpoints(endpoints);
    if let Some(ms) = options.timeout_ms {
        builder = builder.attempt_timeout(Duration::from_millis(ms));
    }
    let coordinator = builder.build()?;

    let mut request = GenerationRequest::new(options.prompt);
    if let Some(n) = options.max_tokens {
        request = request.with_max_tokens(n);
    }
    if let Some(t) = options.temperature {
        request = request.with_temperature(t);
    }

    let settled = coordinator
        .generate_all_settled(&request, &ConsoleCallbacks)
        .await?;
    coordinator.disconnect();

    println!();
    println!(
        "{:<10} {:>8} {:>12} {:>12} {:>12} {:>8}",
        "TRANSPORT", "CHUNKS", "FIRST (ms)", "AVG (ms)", "TOTAL (ms)", "TOKENS"
    );
    for settlement in &settled {
        match &settlement.result {
            Ok(outcome) => {
                let m = &outcome.metrics;
                println!(
                    "{:<10} {:>8} {:>12.1} {:>12.1} {:>12.1} {:>8}",
                    settlement.source,
                    m.chunk_count,
                    m.first_chunk_latency_ms,
                    m.avg_chunk_latency_ms,
                    m.total_duration_ms,
                    m.estimated_token_count
                );
            }
            Err(e) => println!("{:<10} failed ({}): {}", settlement.source, e.kind().as_str(), e),
        }
    }

    if settled.iter().all(|s| !s.is_success()) {
        bail!("all transports failed");
    }
    Ok(())
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut prompt = None;
    let mut options = Options {
        prompt: String::new(),
        max_tokens: None,
        temperature: None,
        config: None,
        timeout_ms: None,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("{} requires a value", flag))
        };
        match arg.as_str() {
            "--max-tokens" => {
                options.max_tokens = Some(value(arg)?.parse().context("--max-tokens")?)
            }
            "--temperature" => {
                options.temperature = Some(value(arg)?.parse().context("--temperature")?)
            }
            "--config" => options.config = Some(value(arg)?),
            "--timeout-ms" => {
                options.timeout_ms = Some(value(arg)?.parse().context("--timeout-ms")?)
            }
            other if other.starts_with("--") => bail!("unknown option: {}", other),
            other => {
                if prompt.replace(other.to_string()).is_some() {
                    bail!("only one prompt may be given");
                }
            }
        }
    }

    options.prompt = prompt.ok_or_else(|| anyhow!("missing prompt"))?;
    Ok(options)
}

fn print_usage() {
    println!(
        r#"genai-race - 比较 WebSocket / SSE / REST 生成延迟

USAGE:
    genai-race "<prompt>" [OPTIONS]

OPTIONS:
    --max-tokens <n>        Maximum tokens to generate
    --temperature <t>       Sampling temperature
    --config <file.yaml>    Read endpoints from a YAML file instead of env
    --timeout-ms <ms>       Fail a transport that has not settled in time
    version                 Show version information
    help                    Show this help message

ENVIRONMENT:
    GENAI_CDN_DOMAIN        Domain fronting all three transports
    GENAI_SOCKET_URL        Override the WebSocket endpoint
    GENAI_EVENT_STREAM_URL  Override the SSE endpoint
    GENAI_UNARY_URL         Override the REST endpoint
    RUST_LOG                Log filter (default: info)"#
    );
}
