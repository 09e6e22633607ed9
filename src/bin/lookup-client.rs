//! Interactive client for the currency lookup service.
//!
//! Each input line is sent as a search; matching currencies are printed one
//! per line. Server-reported errors are printed and the prompt returns.

use clap::Parser;
use framed_lookup::config::FramingMode;
use framed_lookup::currency::{Currency, CurrencyRequest};
use framed_lookup::error::ClientError;
use framed_lookup::{tls, Client, Dialer, DialerConfig, Endpoint, Framing};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "currency> ";

#[derive(Parser, Debug)]
#[command(name = "lookup-client")]
#[command(version)]
#[command(about = "Interactive currency lookup client", long_about = None)]
struct Args {
    /// Service endpoint: host:port or a socket path
    #[arg(short = 'e', long, default_value = "localhost:4040")]
    endpoint: String,

    /// Network protocol (tcp, tcp4, tcp6, unix)
    #[arg(short = 'n', long, default_value = "tcp")]
    network: String,

    /// CA certificate (PEM); enables TLS
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Name the server certificate must match (defaults to the endpoint host)
    #[arg(long)]
    server_name: Option<String>,

    /// Limit on each connection attempt, in seconds
    #[arg(long, default_value_t = 300)]
    connect_timeout: u64,

    /// Total connection attempts
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Wait between connection attempts, in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    /// How replies are framed
    #[arg(long, value_enum, default_value_t = FramingMode::Delimited)]
    framing: FramingMode,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut endpoint = Endpoint::parse(&args.network, &args.endpoint)?;
    let mut dialer = Dialer::new(DialerConfig {
        connect_timeout: Duration::from_secs(args.connect_timeout),
        max_attempts: args.attempts.max(1),
        retry_delay: Duration::from_millis(args.retry_delay_ms),
        ..DialerConfig::default()
    });

    if let Some(ca) = &args.ca {
        endpoint = endpoint.with_tls();
        dialer = dialer.with_tls(tls::client_connector(ca)?);
        if let Some(name) = &args.server_name {
            dialer = dialer.with_server_name(tls::server_name(name)?);
        }
    }

    let framing = match args.framing {
        FramingMode::Stream => Framing::streaming(),
        FramingMode::Delimited => Framing::lines(),
    };

    println!("connecting to currency service {endpoint}");
    let mut client = Client::connect(&dialer, &endpoint, &framing).await?;
    println!("connected");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{PROMPT}");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let filter = line.trim();
        if filter.is_empty() {
            println!("Usage: <search string or *>");
            continue;
        }

        match client.call::<_, Vec<Currency>>(&CurrencyRequest::new(filter)).await {
            Ok(currencies) => print_currencies(&currencies),
            Err(ClientError::Remote(message)) => println!("server error: {message}"),
            Err(e) if e.is_recoverable() => println!("bad reply: {e}"),
            Err(e) => return Err(e.into()),
        }
    }

    client.close().await?;
    Ok(())
}

fn print_currencies(currencies: &[Currency]) {
    if currencies.is_empty() {
        println!("no match");
        return;
    }
    for (i, c) in currencies.iter().enumerate() {
        println!("{:2}. {}[{}]\t{}, {}", i + 1, c.code, c.number, c.name, c.country);
    }
}
