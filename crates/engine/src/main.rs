//! SwingShort — live intraday short-selling engine for NIFTY weekly index
//! options. Entry point: parses the operator surface (§6), loads
//! configuration and credentials, subscribes to the strike window around
//! the at-the-money anchor, and drives the `Coordinator` event loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Arg, ArgAction, Command};
use rustc_hash::FxHashMap;
use swingshort_broker::{Broker, PaperBroker};
use swingshort_broker::kite::{KiteBroker, KiteConfig};
use swingshort_common::{OptionType, Symbol, Underlying};
use swingshort_engine::auto_detect::{AutoDetector, ManualAnchor, StubAutoDetector};
use swingshort_engine::{config_loader, Coordinator, LoopEvent, TimerKind};
use swingshort_journal::{ChannelNotifier, FileJournal, SharedJournal};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CHANNEL_SOFT_LIMIT: usize = 4096;

fn cli() -> Command {
    Command::new("swingshort")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live intraday short-selling engine for NIFTY weekly index options")
        .arg(Arg::new("config").short('c').long("config").value_name("FILE").default_value("config.toml").help("Configuration file path"))
        .arg(Arg::new("auto").long("auto").action(ArgAction::SetTrue).help("Auto-detect the at-the-money strike anchor"))
        .arg(Arg::new("strike").long("strike").value_name("STRIKE").help("At-the-money strike to anchor the subscription window on"))
        .arg(Arg::new("expiry").long("expiry").value_name("DDMMMYY").help("Weekly expiry token, e.g. 06FEB26"))
        .arg(Arg::new("live").long("live").action(ArgAction::SetTrue).help("Trade against the live broker instead of the paper broker"))
        .arg(Arg::new("journal").long("journal").value_name("FILE").default_value("journal.ndjson").help("Append-only journal file path"))
        .arg(Arg::new("r-value").long("r-value").value_name("RUPEES").help("Override the rupee value of one R"))
        .arg(Arg::new("max-positions").long("max-positions").value_name("N").help("Override the total concurrent-position cap"))
        .arg(Arg::new("daily-target-r").long("daily-target-r").value_name("R").help("Override the daily profit target, in R"))
        .arg(Arg::new("daily-stop-r").long("daily-stop-r").value_name("R").help("Override the daily loss cap, in R"))
        .arg(Arg::new("force-exit-time").long("force-exit-time").value_name("HH:MM:SS").help("Override the session force-exit cutoff"))
}

fn strike_window_symbols(anchor: u32, window: u32, expiry: NaiveDate) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    let step: i64 = 50;
    for offset in -(window as i64)..=(window as i64) {
        let strike = anchor as i64 + offset * step;
        if strike <= 0 {
            continue;
        }
        let strike = strike as u32;
        symbols.push(Symbol::new(Underlying::Nifty, expiry, strike, OptionType::Ce));
        symbols.push(Symbol::new(Underlying::Nifty, expiry, strike, OptionType::Pe));
    }
    symbols
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "swingshort=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").expect("has default");
    let mut cfg = config_loader::load(config_path).unwrap_or_else(|e| {
        warn!(error = %e, "[SWING] failed to load configuration, using defaults");
        swingshort_common::EngineConfig::default()
    });

    if let Some(v) = matches.get_one::<String>("r-value").and_then(|s| s.parse::<f64>().ok()) {
        cfg.filter.r_value = v;
    }
    if let Some(v) = matches.get_one::<String>("max-positions").and_then(|s| s.parse::<usize>().ok()) {
        cfg.risk.max_positions = v;
    }
    if let Some(v) = matches.get_one::<String>("daily-target-r").and_then(|s| s.parse::<f64>().ok()) {
        cfg.risk.daily_target_r = v;
    }
    if let Some(v) = matches.get_one::<String>("daily-stop-r").and_then(|s| s.parse::<f64>().ok()) {
        cfg.risk.daily_stop_r = v;
    }
    if let Some(v) = matches.get_one::<String>("force-exit-time") {
        cfg.risk.force_exit_time = v.clone();
    }
    if let Some(v) = matches.get_one::<String>("expiry") {
        cfg.anchor.expiry_token = v.clone();
    }

    let detector: Box<dyn AutoDetector> = if matches.get_flag("auto") {
        Box::new(StubAutoDetector::new(cfg.anchor.clone()))
    } else if let Some(strike) = matches.get_one::<String>("strike").and_then(|s| s.parse::<u32>().ok()) {
        Box::new(ManualAnchor::new(strike))
    } else {
        Box::new(StubAutoDetector::new(cfg.anchor.clone()))
    };
    let anchor = detector.detect().await.context("anchor resolution failed")?;
    cfg.anchor.at_the_money_strike = anchor.at_the_money_strike;

    let expiry = NaiveDate::parse_from_str(&cfg.anchor.expiry_token.to_uppercase(), "%d%b%y").context("malformed expiry token")?;
    let symbols = strike_window_symbols(anchor.at_the_money_strike, cfg.strike_window, expiry);
    info!(strike = anchor.at_the_money_strike, expiry = %cfg.anchor.expiry_token, count = symbols.len(), "[SWING] subscribing to strike window");

    let journal: SharedJournal = Arc::new(FileJournal::new(matches.get_one::<String>("journal").expect("has default")));

    let (notifier, mut alerts_rx) = ChannelNotifier::new(64);
    let notifier: Arc<dyn swingshort_journal::Notifier> = Arc::new(notifier);
    tokio::spawn(async move {
        while let Some(alert) = alerts_rx.recv().await {
            error!(kind = ?alert.kind, message = %alert.message, "[RISK] alert");
        }
    });

    // Market data and order execution are wired separately: paper mode still
    // watches the real feed (quotes are never simulated), it just routes
    // orders to `PaperBroker` instead of the exchange.
    let kite_credentials = || -> Result<KiteConfig> {
        let api_key = std::env::var("KITE_API_KEY").context("KITE_API_KEY not set")?;
        let access_token = std::env::var("KITE_ACCESS_TOKEN").context("KITE_ACCESS_TOKEN not set")?;
        let base_url = std::env::var("KITE_BASE_URL").unwrap_or_else(|_| "https://api.kite.trade".to_string());
        let ws_url = std::env::var("KITE_WS_URL").unwrap_or_else(|_| "wss://ws.kite.trade".to_string());
        // Instrument-token resolution requires the broker's daily
        // instruments dump, outside this build's scope; a live deployment
        // populates this map before startup.
        Ok(KiteConfig { api_key, access_token, base_url, ws_url, instrument_tokens: Arc::new(FxHashMap::default()) })
    };

    let (broker, paper_sink, tick_rx): (Arc<dyn Broker>, Option<Arc<PaperBroker>>, Option<mpsc::Receiver<swingshort_common::Tick>>) = if matches.get_flag("live") {
        let kite: Arc<dyn Broker> = Arc::new(KiteBroker::new(kite_credentials()?));
        let rx = kite.subscribe_ticks(symbols.clone()).await.context("kite tick subscription failed")?;
        (kite, None, Some(rx))
    } else {
        let paper = Arc::new(PaperBroker::new());
        let tick_rx = match kite_credentials() {
            Ok(cfg) => {
                let feed: Arc<dyn Broker> = Arc::new(KiteBroker::new(cfg));
                Some(feed.subscribe_ticks(symbols.clone()).await.context("kite tick subscription failed")?)
            }
            Err(e) => {
                warn!(error = %e, "[SWING] no market-data credentials, paper session will not receive ticks");
                None
            }
        };
        (paper.clone() as Arc<dyn Broker>, Some(paper), tick_rx)
    };

    let (tx, rx) = mpsc::channel(CHANNEL_SOFT_LIMIT);

    if let Some(mut tick_rx) = tick_rx {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(tick) = tick_rx.recv().await {
                let now_ms = tick.ts_ms;
                if let Some(paper) = &paper_sink {
                    paper.ingest_tick(&tick);
                }
                if tx.send(LoopEvent::Tick(tick, now_ms)).await.is_err() {
                    break;
                }
            }
        });
    }

    spawn_timer(tx.clone(), TimerKind::OrderbookPoll, Duration::from_secs(cfg.orders.orderbook_poll_interval_secs));
    spawn_timer(tx.clone(), TimerKind::PositionReconcile, Duration::from_secs(cfg.orders.position_reconcile_interval_secs));
    spawn_timer(tx.clone(), TimerKind::RiskCheck, Duration::from_secs(cfg.risk.risk_check_interval_secs));
    spawn_timer(tx.clone(), TimerKind::Heartbeat, Duration::from_secs(60));
    spawn_timer(tx.clone(), TimerKind::DataWatchdog, Duration::from_secs(cfg.feed.stale_data_timeout_secs.max(5)));

    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[SWING] shutdown signal received");
            let _ = shutdown_tx.send(LoopEvent::Shutdown).await;
        }
    });

    let mut coordinator = Coordinator::new(cfg, broker, journal, notifier);
    coordinator.run(rx).await;

    use swingshort_risk::HaltReason;
    match coordinator.halt_reason() {
        Some(HaltReason::FeedLoss) | Some(HaltReason::StopArmingFailures) => std::process::exit(1),
        _ => Ok(()),
    }
}

fn spawn_timer(tx: mpsc::Sender<LoopEvent>, kind: TimerKind, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            if tx.send(LoopEvent::Timer(kind, now_ms)).await.is_err() {
                break;
            }
        }
    });
}
