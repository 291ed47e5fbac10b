// ctguard: covert timing channel guard CLI
//
// Runs the mitigation relay between two UDP networks, the reference
// timing-channel sender and receiver used to exercise it, and an offline
// simulation of the two together.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use ctguard_core::protocol::{
    bitstream_from_message, TimingDecoder, TimingEncoder, TrialMetrics, TrialSummary,
};
use ctguard_core::relay::RelayStats;
use ctguard_core::simulation::{apply_jitter, simulate_relay};
use ctguard_core::{
    DetectionStatsSnapshot, FlowPipeline, GuardConfig, RelayClock, RelayService, UdpRelayPorts,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;
use tokio::time::Instant;

#[derive(Parser)]
#[command(name = "ctguard")]
#[command(about = "Covert timing channel detection and mitigation relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Use this config file instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mitigation relay between the insecure and secure networks
    Relay {
        #[arg(long)]
        insecure_listen: Option<SocketAddr>,
        #[arg(long)]
        secure_listen: Option<SocketAddr>,
        #[arg(long)]
        insecure_peer: Option<SocketAddr>,
        #[arg(long)]
        secure_peer: Option<SocketAddr>,
        /// Detection threshold in (0, 1)
        #[arg(long)]
        threshold: Option<f64>,
        /// Packets mitigated after each detection
        #[arg(long)]
        session_length: Option<u32>,
        /// Seconds between statistics reports (0 disables)
        #[arg(long, default_value = "30")]
        stats_interval: u64,
    },
    /// Send a message over the timing channel
    Send {
        #[arg(long, env = "INSECURENET_HOST_IP", default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value = "8002")]
        port: u16,
        /// Bits as 0/1, or text to send as 8-bit character codes
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value = "0.3")]
        zero_bit_delay: f64,
        #[arg(long, default_value = "0.9")]
        one_bit_delay: f64,
        #[arg(long, default_value = "5")]
        bit_repeat_len: usize,
        /// Repeat the transmission, waiting for the receiver's echo each time
        #[arg(long)]
        trials: Option<usize>,
        /// Seconds to wait for each echo
        #[arg(long, default_value = "60")]
        echo_timeout: u64,
    },
    /// Receive timing-channel messages and echo each decoded bitstream back
    Listen {
        #[arg(short, long, default_value = "8002")]
        port: u16,
        #[arg(long, default_value = "0.3")]
        sender_bit_delay: f64,
        #[arg(long, default_value = "0.3")]
        given_delay_threshold: f64,
        #[arg(long, default_value = "5")]
        bit_repeat_len: usize,
        #[arg(long, default_value = "10")]
        bitstream_len: usize,
    },
    /// Replay an encoded message through the relay pipeline offline
    Simulate {
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value = "0.3")]
        zero_bit_delay: f64,
        #[arg(long, default_value = "0.9")]
        one_bit_delay: f64,
        #[arg(long, default_value = "5")]
        bit_repeat_len: usize,
        /// Maximum uniform network jitter, in milliseconds
        #[arg(long, default_value = "0")]
        jitter_ms: u64,
        #[arg(long, default_value = "1")]
        seed: u64,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Restore all defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    match cli.command {
        Commands::Relay {
            insecure_listen,
            secure_listen,
            insecure_peer,
            secure_peer,
            threshold,
            session_length,
            stats_interval,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            let udp = &mut config.udp;
            udp.insecure_listen = insecure_listen.unwrap_or(udp.insecure_listen);
            udp.secure_listen = secure_listen.unwrap_or(udp.secure_listen);
            udp.insecure_peer = insecure_peer.unwrap_or(udp.insecure_peer);
            udp.secure_peer = secure_peer.unwrap_or(udp.secure_peer);
            if let Some(threshold) = threshold {
                config.guard.detector.detection_threshold = threshold;
            }
            if let Some(session_length) = session_length {
                config.guard.mitigation.session_length = session_length;
            }
            cmd_relay(config, stats_interval).await
        }
        Commands::Send {
            host,
            port,
            message,
            zero_bit_delay,
            one_bit_delay,
            bit_repeat_len,
            trials,
            echo_timeout,
        } => {
            let encoder = TimingEncoder::new(zero_bit_delay, one_bit_delay, bit_repeat_len)?;
            cmd_send(host, port, message, encoder, trials, Duration::from_secs(echo_timeout)).await
        }
        Commands::Listen {
            port,
            sender_bit_delay,
            given_delay_threshold,
            bit_repeat_len,
            bitstream_len,
        } => {
            let decoder = TimingDecoder::new(
                sender_bit_delay,
                given_delay_threshold,
                bit_repeat_len,
                bitstream_len,
            )?;
            cmd_listen(port, decoder).await
        }
        Commands::Simulate {
            message,
            zero_bit_delay,
            one_bit_delay,
            bit_repeat_len,
            jitter_ms,
            seed,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let encoder = TimingEncoder::new(zero_bit_delay, one_bit_delay, bit_repeat_len)?;
            cmd_simulate(
                config.guard,
                message,
                encoder,
                (zero_bit_delay, one_bit_delay),
                Duration::from_millis(jitter_ms),
                seed,
            )
        }
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<config::Config> {
    match path {
        Some(path) => config::Config::load_from(path),
        None => config::Config::load(),
    }
}

fn save_config(config: &config::Config, path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(path) => config.save_to(path),
        None => config.save(),
    }
}

async fn cmd_relay(config: config::Config, stats_interval: u64) -> Result<()> {
    println!("{}", "ctguard relay: starting...".bold());
    println!();

    let guard = config.guard;
    let max_failures = guard.relay.max_consecutive_send_failures;
    let ports = Arc::new(
        UdpRelayPorts::bind(config.udp.clone(), &guard.relay.bind_retry)
            .await
            .context("Failed to bind relay sockets")?,
    );
    let (insecure_local, secure_local) = ports.local_addrs()?;
    println!("{} Insecure side: {} → {}", "✓".green(), insecure_local, config.udp.secure_peer);
    println!("{} Secure side:   {} → {}", "✓".green(), secure_local, config.udp.insecure_peer);
    println!(
        "{} Threshold {} · window {} · session {} packets · delay {}–{}s",
        "✓".green(),
        guard.detector.detection_threshold,
        guard.detector.window_size,
        guard.mitigation.session_length,
        guard.mitigation.min_delay,
        guard.mitigation.max_delay
    );
    println!();

    let (handle, mut relay_task) =
        RelayService::start(guard, Arc::new(ports.sink())).context("Failed to start relay")?;

    let mut ingress = {
        let ports = Arc::clone(&ports);
        let handle = handle.clone();
        tokio::spawn(async move { ports.run_ingress(handle, max_failures).await })
    };

    let reporter = (stats_interval > 0).then(|| {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match handle.stats().await {
                    Ok(stats) => print_stats(&stats),
                    Err(_) => break,
                }
            }
        })
    });

    let outcome = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            println!();
            println!("Shutting down...");
            None
        }
        result = &mut relay_task => Some(result.context("Relay task panicked")?),
        result = &mut ingress => {
            result.context("Ingress task panicked")??;
            None
        }
    };

    if let Ok(stats) = handle.stats().await {
        print_stats(&stats);
    }
    let _ = handle.shutdown().await;
    if let Some(reporter) = reporter {
        reporter.abort();
    }

    match outcome {
        Some(result) => result?,
        None => relay_task.await.context("Relay task panicked")??,
    }
    println!("{} Relay stopped", "✓".green());
    Ok(())
}

fn print_stats(stats: &RelayStats) {
    println!("{}", "Relay statistics".bold());
    print_snapshot("total", &stats.total);
    for flow in &stats.flows {
        print_snapshot(&flow.flow.to_string(), &flow.detection);
    }
    if stats.overflow_packets > 0 {
        println!("  {} {} packets shared the overflow flow", "!".yellow(), stats.overflow_packets);
    }
    if stats.dropped_packets > 0 {
        println!("  {} {} packets dropped on full flow queues", "!".yellow(), stats.dropped_packets);
    }
}

fn print_snapshot(label: &str, snapshot: &DetectionStatsSnapshot) {
    let last = snapshot
        .last_detection
        .map(format_time)
        .unwrap_or_else(|| "never".to_string());
    println!(
        "  {:<28} packets {:>8}  detections {:>6}  rate {:>6.2}%  last {}",
        label.bright_cyan(),
        snapshot.total_packets,
        snapshot.detections,
        snapshot.detection_rate * 100.0,
        last.dimmed()
    );
}

fn format_time(time: SystemTime) -> String {
    use chrono::{DateTime, Local};

    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn cmd_send(
    host: String,
    port: u16,
    message: String,
    encoder: TimingEncoder,
    trials: Option<usize>,
    echo_timeout: Duration,
) -> Result<()> {
    let bits = bitstream_from_message(&message);
    let delays = encoder.schedule(&bits)?;
    let target = format!("{}:{}", host, port);
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("Failed to bind sender socket")?;
    socket
        .connect(&target)
        .await
        .with_context(|| format!("Failed to resolve {}", target))?;

    println!("{} Target:    {}", "✓".green(), target.bright_cyan());
    println!("{} Bitstream: {} ({} bits, {} packets)", "✓".green(), bits, bits.len(), delays.len());
    println!();

    let Some(trials) = trials else {
        transmit(&socket, &bits, &delays, encoder.bit_repeat_len()).await?;
        println!("{} Sent", "✓".green());
        return Ok(());
    };

    let mut summary = TrialSummary::new();
    let mut buf = vec![0u8; 4096];
    for trial in 1..=trials {
        let start = Instant::now();
        transmit(&socket, &bits, &delays, encoder.bit_repeat_len()).await?;
        let len = tokio::time::timeout(echo_timeout, socket.recv(&mut buf))
            .await
            .with_context(|| format!("No echo within {:?}", echo_timeout))?
            .context("Failed to receive echo")?;
        let received = String::from_utf8_lossy(&buf[..len]).to_string();
        let metrics = TrialMetrics::measure(&bits, &received, start.elapsed());

        println!(
            "  {} trial {:>3}: received {}  BER {:.3}  capacity {:.3} bit/s  time {:.2}s",
            "→".bright_green(),
            trial,
            received,
            metrics.bit_error_rate,
            metrics.capacity_bps,
            metrics.elapsed.as_secs_f64()
        );
        summary.record(metrics);
    }

    println!();
    println!("{}", "Summary".bold());
    println!("  Trials:        {}", summary.len());
    println!("  Mean BER:      {:.4}", summary.mean_bit_error_rate());
    println!("  Mean capacity: {:.4} bit/s", summary.mean_capacity_bps());
    println!("  Mean time:     {:.2}s", summary.mean_elapsed_secs());
    Ok(())
}

async fn transmit(socket: &UdpSocket, bits: &str, delays: &[Duration], repeat: usize) -> Result<()> {
    for (i, delay) in delays.iter().enumerate() {
        let bit = bits.as_bytes()[i / repeat] as char;
        socket
            .send(format!("bit:{}", bit).as_bytes())
            .await
            .context("Failed to send packet")?;
        tracing::debug!(packet = i, %bit, "Sent");
        tokio::time::sleep(*delay).await;
    }
    Ok(())
}

async fn cmd_listen(port: u16, mut decoder: TimingDecoder) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let clock = RelayClock::new();
    let mut buf = vec![0u8; 4096];

    println!("{} Listening on port {}", "✓".green(), port.to_string().bright_cyan());
    println!("  IPD threshold: {:.3}s", decoder.ipd_threshold());
    println!();

    loop {
        let (len, from) = tokio::select! {
            result = socket.recv_from(&mut buf) => result.context("Failed to receive")?,
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                return Ok(());
            }
        };
        tracing::debug!(%from, len, "Packet received");

        if let Some(stream) = decoder.on_arrival(clock.now()) {
            println!("{} {} from {}", "←".bright_blue(), stream.bright_cyan(), from);
            socket
                .send_to(stream.as_bytes(), from)
                .await
                .context("Failed to echo bitstream")?;
        }
    }
}

fn cmd_simulate(
    guard: GuardConfig,
    message: String,
    encoder: TimingEncoder,
    (zero_bit_delay, one_bit_delay): (f64, f64),
    jitter: Duration,
    seed: u64,
) -> Result<()> {
    let bits = bitstream_from_message(&message);
    let mut rng = StdRng::seed_from_u64(seed);
    let sent = encoder.arrival_trace(&bits)?;
    let arrivals = apply_jitter(&sent, jitter, &mut rng);
    let elapsed = encoder.transmission_time(&bits)?;
    let repeat = encoder.bit_repeat_len();

    // Receiver tolerance: halfway between the two bit delays
    let tolerance = ((one_bit_delay - zero_bit_delay) / 2.0).max(0.0);
    let decode = |trace: &[ctguard_core::Timestamp]| -> Result<String> {
        let mut decoder = TimingDecoder::new(zero_bit_delay, tolerance, repeat, bits.len())?;
        Ok(trace
            .iter()
            .find_map(|t| decoder.on_arrival(*t))
            .unwrap_or_default())
    };

    let direct = TrialMetrics::measure(&bits, &decode(&arrivals)?, elapsed);

    let mut pipeline = FlowPipeline::with_seed(&guard, seed)?;
    let report = simulate_relay(&mut pipeline, &arrivals);
    let relayed = TrialMetrics::measure(
        &bits,
        &decode(&report.departures)?,
        elapsed + report.added_latency(&arrivals),
    );

    println!("{}", "Simulation".bold());
    println!("  Bitstream:   {} ({} bits, {} packets)", bits, bits.len(), arrivals.len());
    println!("  Jitter:      up to {:?}", jitter);
    println!();
    println!("{}", "Without relay".bold());
    println!("  BER:         {:.4}", direct.bit_error_rate);
    println!("  Capacity:    {:.4} bit/s", direct.capacity_bps);
    println!();
    println!("{}", "Through relay".bold());
    println!("  Detections:  {}", report.detections());
    println!("  Sessions:    {}", report.sessions());
    println!("  Mitigated:   {} packets", report.mitigated_packets());
    println!("  BER:         {:.4}", relayed.bit_error_rate);
    println!("  Capacity:    {:.4} bit/s", relayed.capacity_bps);
    println!("  Added delay: {:.2}s", report.added_latency(&arrivals).as_secs_f64());
    Ok(())
}

fn cmd_config(path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    // Reset never loads the current file, so it can repair one that no
    // longer parses or validates.
    if let ConfigAction::Reset = action {
        match path.as_ref() {
            Some(path) => config::Config::reset_to(path)?,
            None => config::Config::reset()?,
        };
        println!("{} Configuration reset to defaults", "✓".green());
        return Ok(());
    }

    let mut config = load_config(path.as_ref())?;
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            save_config(&config, path.as_ref())?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<32} {}", key.bright_cyan(), value);
            }
        }
        ConfigAction::Reset => {}
    }
    Ok(())
}
