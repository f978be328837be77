use clap::ArgAction;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use pktforge::CancelToken;
use pktforge::Classifier;
use pktforge::FloodConfig;
use pktforge::FloodKind;
use pktforge::FrameSource;
use pktforge::LiveSource;
use pktforge::PcapFileSource;
use pktforge::PktforgeError;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGTERM;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Raw IPv4/ICMP/TCP packet construction, injection and classification.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Icmp,
    Syn,
}

impl From<KindArg> for FloodKind {
    fn from(kind: KindArg) -> FloodKind {
        match kind {
            KindArg::Icmp => FloodKind::Icmp,
            KindArg::Syn => FloodKind::Syn,
        }
    }
}

#[derive(Parser, Debug)]
struct FloodArgs {
    target: Ipv4Addr,
    /// Comma separated source addresses to spoof
    #[arg(long, value_delimiter = ',')]
    spoof_pool: Option<Vec<Ipv4Addr>>,
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
    /// JSON flood configuration, flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    /// Source address when not spoofing
    #[arg(long)]
    source: Option<Ipv4Addr>,
    #[arg(long)]
    ttl: Option<u8>,
    /// TCP destination port (syn flood)
    #[arg(long)]
    dst_port: Option<u16>,
    #[arg(long)]
    payload_len: Option<usize>,
    /// Stop after this many packets (0 runs until interrupted)
    #[arg(long)]
    max_packets: Option<u64>,
    #[arg(long)]
    report_every: Option<u64>,
}

impl FloodArgs {
    fn into_config(self) -> Result<FloodConfig, PktforgeError> {
        let mut config = match self.config {
            Some(path) => FloodConfig::from_json_file(path)?,
            None => FloodConfig::default(),
        };
        config.target = self.target;
        if let Some(pool) = self.spoof_pool {
            config.spoof_pool = Some(pool);
        }
        if let Some(kind) = self.kind {
            config.kind = kind.into();
        }
        if self.source.is_some() {
            config.source = self.source;
        }
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        if let Some(dst_port) = self.dst_port {
            config.dst_port = dst_port;
        }
        if let Some(payload_len) = self.payload_len {
            config.payload_len = payload_len;
        }
        if let Some(max_packets) = self.max_packets {
            config.max_packets = max_packets;
        }
        if let Some(report_every) = self.report_every {
            config.report_every = report_every;
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one ICMP Timestamp Request (or Echo Request with --echo)
    Probe {
        target: Ipv4Addr,
        /// Send an Echo Request instead
        #[arg(long)]
        echo: bool,
    },
    /// Flood the target with spoofed packets until interrupted
    Flood(FloodArgs),
    /// Print the relative time and protocol of every frame in a capture
    Classify {
        /// Capture file, or interface name with --live
        source: String,
        #[arg(long)]
        live: bool,
        /// Stop a live capture after this many frames
        #[arg(long)]
        count: Option<u64>,
        /// One JSON object per frame
        #[arg(long)]
        json: bool,
    },
}

fn probe(target: Ipv4Addr, echo: bool) -> Result<(), PktforgeError> {
    let report = if echo {
        pktforge::icmp_echo_probe(target)?
    } else {
        pktforge::icmp_timestamp_probe(target)?
    };
    println!("{}", report);
    Ok(())
}

fn flood(config: FloodConfig) -> Result<(), PktforgeError> {
    config.validate()?;
    let cancel = CancelToken::new();
    signal_hook::flag::register(SIGINT, cancel.flag())?;
    signal_hook::flag::register(SIGTERM, cancel.flag())?;
    let stats = pktforge::flood(&config, &cancel)?;
    println!("{}", stats);
    Ok(())
}

fn print_records<S: FrameSource>(source: S, json: bool) -> Result<(), PktforgeError> {
    if !json {
        println!("Time (s) \t Protocol Info");
        println!("------------------------------------------");
    }
    for record in Classifier::new(source) {
        let record = record?;
        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            println!("{}", record);
        }
    }
    Ok(())
}

fn classify(source: &str, live: bool, count: Option<u64>, json: bool) -> Result<(), PktforgeError> {
    if live {
        print_records(LiveSource::open(source, count)?, json)
    } else {
        if count.is_some() {
            warn!("--count only applies to live captures");
        }
        print_records(PcapFileSource::open(source)?, json)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let ret = match args.command {
        Command::Probe { target, echo } => probe(target, echo),
        Command::Flood(flood_args) => flood_args.into_config().and_then(flood),
        Command::Classify {
            source,
            live,
            count,
            json,
        } => classify(&source, live, count, json),
    };

    match ret {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
