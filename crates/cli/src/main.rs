use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use cryptocoach_api::ServerConfig;
use cryptocoach_client::{ChatSession, HttpChatBackend, MarketDataClient};
use cryptocoach_core::format::{format_change, format_price, format_volume, market_status, parse_symbol};
use cryptocoach_core::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "cryptocoach")]
#[command(about = "CryptoCoach — streaming LLM trading tutor and crypto market-data proxy")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Base URL of the CryptoCoach API server (for chat and market commands)
    #[arg(long, env = "CRYPTOCOACH_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Server {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind address (overrides the config file)
        #[arg(short, long)]
        bind: Option<String>,

        /// API key for the completions upstream
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,

        /// Base URL of the completions upstream (e.g. https://api.openai.com/v1)
        #[arg(long, env = "OPENAI_BASE_URL")]
        openai_base_url: Option<String>,

        /// Model name sent upstream
        #[arg(long, env = "CHAT_MODEL")]
        model: Option<String>,

        /// Binance API key (optional for public market data)
        #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
        binance_api_key: Option<String>,

        /// Minimum spacing between exchange requests, in milliseconds
        #[arg(long)]
        min_spacing_ms: Option<u64>,
    },

    /// Chat with the assistant in the terminal
    Chat,

    /// Query market data through the API server
    Market {
        #[command(subcommand)]
        command: MarketCommands,
    },
}

#[derive(Subcommand)]
enum MarketCommands {
    /// 24h ticker
    Ticker {
        /// Unified symbol (e.g. "BTC/USDT")
        #[arg(short, long)]
        symbol: String,

        /// Exchange identifier
        #[arg(short, long)]
        exchange: Option<String>,
    },
    /// Order book snapshot
    Orderbook {
        #[arg(short, long)]
        symbol: String,

        #[arg(long, default_value_t = DEFAULT_ORDER_BOOK_LIMIT)]
        limit: u32,

        #[arg(short, long)]
        exchange: Option<String>,
    },
    /// OHLCV candles
    Ohlcv {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = DEFAULT_TIMEFRAME)]
        timeframe: String,

        #[arg(long, default_value_t = DEFAULT_OHLCV_LIMIT)]
        limit: u32,

        /// Start time in epoch milliseconds
        #[arg(long)]
        since: Option<i64>,

        #[arg(short, long)]
        exchange: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Server {
            config,
            bind,
            openai_api_key,
            openai_base_url,
            model,
            binance_api_key,
            min_spacing_ms,
        } => {
            let mut server_config = match config {
                Some(path) => {
                    tracing::info!(path = %path.display(), "Loading server config");
                    ServerConfig::load(&path)
                        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?
                }
                None => ServerConfig::default(),
            };
            if let Some(bind) = bind {
                server_config.bind = bind;
            }
            if openai_api_key.is_some() {
                server_config.chat.api_key = openai_api_key;
            }
            if let Some(url) = openai_base_url {
                server_config.chat.base_url = url;
            }
            if let Some(model) = model {
                server_config.chat.model = model;
            }
            if binance_api_key.is_some() {
                server_config.exchange.api_key = binance_api_key;
            }
            if let Some(ms) = min_spacing_ms {
                server_config.exchange.min_spacing_ms = ms;
            }
            cryptocoach_api::start_server(server_config).await?;
        }
        Commands::Chat => run_chat(&cli.api_url).await?,
        Commands::Market { command } => run_market(&cli.api_url, command).await?,
    }

    Ok(())
}

async fn run_chat(api_url: &str) -> Result<()> {
    let backend = HttpChatBackend::new(api_url);
    tracing::info!(url = %backend.url(), "Starting chat session");
    let mut session = ChatSession::new(Arc::new(backend));

    println!("CryptoCoach: ask anything about crypto trading. Ctrl-C stops a reply, Ctrl-D exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        session.set_input(line);
        let rx = session.subscribe();
        let Some(handle) = session.send() else {
            continue;
        };
        let outcome = render_reply(&mut session, rx, handle).await?;
        tracing::debug!(?outcome, "Reply finished");
    }
    Ok(())
}

/// Print assistant text as it streams in until the request finishes.
async fn render_reply(
    session: &mut ChatSession,
    mut rx: watch::Receiver<Conversation>,
    mut handle: JoinHandle<StreamOutcome>,
) -> Result<StreamOutcome> {
    let baseline = rx.borrow_and_update().len();
    let mut printed: HashMap<MessageId, usize> = HashMap::new();

    let outcome = loop {
        tokio::select! {
            outcome = &mut handle => break outcome?,
            changed = rx.changed() => {
                if changed.is_err() {
                    break (&mut handle).await?;
                }
                print_new_text(&rx.borrow_and_update(), baseline, &mut printed)?;
            }
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    };

    print_new_text(&rx.borrow(), baseline, &mut printed)?;
    if outcome == StreamOutcome::Cancelled {
        print!(" [stopped]");
    }
    println!();
    Ok(outcome)
}

fn print_new_text(
    conv: &Conversation,
    baseline: usize,
    printed: &mut HashMap<MessageId, usize>,
) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for message in conv.messages().iter().skip(baseline) {
        if message.role != Role::Assistant {
            continue;
        }
        // Put the error notice on its own line after any partial reply.
        if message.is_error()
            && !printed.contains_key(&message.id)
            && printed.values().any(|n| *n > 0)
        {
            writeln!(stdout)?;
        }
        let done = printed.entry(message.id.clone()).or_insert(0);
        if message.content.len() > *done {
            write!(stdout, "{}", &message.content[*done..])?;
            *done = message.content.len();
        }
    }
    stdout.flush()?;
    Ok(())
}

async fn run_market(api_url: &str, command: MarketCommands) -> Result<()> {
    let client = |exchange: Option<String>| {
        let client = MarketDataClient::new(api_url);
        match exchange {
            Some(exchange) => client.with_exchange(exchange),
            None => client,
        }
    };

    match command {
        MarketCommands::Ticker { symbol, exchange } => {
            let ticker = client(exchange).ticker(&symbol).await?;
            print_ticker(&ticker);
        }
        MarketCommands::Orderbook {
            symbol,
            limit,
            exchange,
        } => {
            let book = client(exchange).order_book(&symbol, limit).await?;
            print_order_book(&book);
        }
        MarketCommands::Ohlcv {
            symbol,
            timeframe,
            limit,
            since,
            exchange,
        } => {
            let candles = client(exchange).ohlcv(&symbol, &timeframe, limit, since).await?;
            print_candles(&symbol, &timeframe, &candles);
        }
    }
    Ok(())
}

fn print_ticker(ticker: &TickerData) {
    let price = |v: Option<rust_decimal::Decimal>| v.map(|p| format_price(p, 2)).unwrap_or_else(|| "N/A".to_string());
    let quote = parse_symbol(&ticker.symbol).map(|(_, q)| q).unwrap_or("");

    let sep = "=".repeat(40);
    println!("{sep}");
    println!("  {}", ticker.symbol);
    println!("{sep}");
    println!("  Last:        {}", price(ticker.last));
    println!(
        "  Change:      {}",
        ticker.change.map(format_change).unwrap_or_else(|| "N/A".to_string())
    );
    println!("  24h High:    {}", price(ticker.high));
    println!("  24h Low:     {}", price(ticker.low));
    println!(
        "  24h Volume:  {}",
        ticker
            .volume
            .map(|v| format!("{} {}", format_volume(v), quote).trim_end().to_string())
            .unwrap_or_else(|| "N/A".to_string())
    );
    if let Some(ts) = ticker.timestamp {
        println!("  Status:      {}", market_status(ts, Utc::now()).message());
    }
    println!("{sep}");
}

fn print_order_book(book: &OrderBookData) {
    println!("{} order book @ {}", book.symbol, book.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{:>18} {:>14}   {:>18} {:>14}", "bid", "amount", "ask", "amount");
    let depth = book.bids.len().max(book.asks.len());
    for i in 0..depth {
        let side = |levels: &[PriceLevel]| {
            levels
                .get(i)
                .map(|[p, a]| (format_price(*p, 2), a.normalize().to_string()))
                .unwrap_or_default()
        };
        let (bid, bid_amt) = side(&book.bids);
        let (ask, ask_amt) = side(&book.asks);
        println!("{bid:>18} {bid_amt:>14}   {ask:>18} {ask_amt:>14}");
    }
}

fn print_candles(symbol: &str, timeframe: &str, candles: &[Ohlcv]) {
    println!("{symbol} {timeframe} candles: {}", candles.len());
    println!(
        "{:<20} {:>14} {:>14} {:>14} {:>14} {:>12}",
        "time", "open", "high", "low", "close", "volume"
    );
    for Ohlcv(ts, open, high, low, close, volume) in candles {
        println!(
            "{:<20} {:>14} {:>14} {:>14} {:>14} {:>12}",
            ts.format("%Y-%m-%d %H:%M"),
            format_price(*open, 2),
            format_price(*high, 2),
            format_price(*low, 2),
            format_price(*close, 2),
            format_volume(*volume),
        );
    }
}
