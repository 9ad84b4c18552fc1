//
// Generates a stream of identical UDP/IPv4 frames on one port until interrupted.
//
// Runtime arguments go before a `--` separator, application options after it:
//
//   txgen -l 2 -- --link-name eth0 --interval-ms 10 --count 1000
//
use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use cli_table::{format::Justify, Table, WithTitle};
use structopt::StructOpt;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use txgen::buf_mmap::BufMmap;
use txgen::buf_pool::BufPool;
use txgen::buf_pool_vec::BufPoolVec;
use txgen::config::{GenConfig, TemplateConfig};
use txgen::generator::{Generator, Stats};
use txgen::mmap_area::MmapArea;
use txgen::port::{self, Runtime};
use txgen::shutdown::Shutdown;
use txgen::Error;

#[derive(StructOpt, Debug)]
#[structopt(name = "txgen")]
struct Opt {
    /// Link to transmit on (first non-loopback link if not set)
    #[structopt(long)]
    link_name: Option<String>,

    /// Number of buffers
    #[structopt(long, default_value = "1023")]
    bufnum: usize,

    /// Buffer size
    #[structopt(long, default_value = "2048")]
    bufsize: u32,

    /// Tx and completion ring size
    #[structopt(long, default_value = "256")]
    ring_size: u32,

    /// Delay between packets in milliseconds
    #[structopt(long, default_value = "200")]
    interval_ms: u64,

    /// Delay before retrying when no buffer is available, in milliseconds
    #[structopt(long, default_value = "100")]
    empty_backoff_ms: u64,

    /// Stop after this many packets
    #[structopt(long)]
    count: Option<u64>,

    /// Use HUGE TLB
    #[structopt(long)]
    huge_tlb: bool,

    /// Zero copy mode
    #[structopt(long)]
    zero_copy: bool,

    /// Copy mode
    #[structopt(long, conflicts_with = "zero-copy")]
    copy: bool,

    /// YAML file overriding the packet template
    #[structopt(long, parse(from_os_str))]
    config_file: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[structopt(long, default_value = "info")]
    log_level: String,
}

impl Opt {
    fn gen_config(&self) -> GenConfig {
        GenConfig {
            link_name: self.link_name.clone(),
            buf_num: self.bufnum,
            buf_size: self.bufsize,
            ring_size: self.ring_size,
            interval: Duration::from_millis(self.interval_ms),
            empty_backoff: Duration::from_millis(self.empty_backoff_ms),
            count: self.count,
            huge_tlb: self.huge_tlb,
            zero_copy: self.zero_copy,
            copy: self.copy,
        }
    }
}

#[derive(Debug, Table)]
struct StatsRow {
    #[table(title = "Port", justify = "Justify::Right")]
    port: u32,
    #[table(title = "Link")]
    link: String,
    #[table(title = "Tx Packets")]
    tx_packets: u64,
    #[table(title = "Tx Rejected")]
    tx_rejected: u64,
    #[table(title = "Pool Empty")]
    pool_empty: u64,
    #[table(title = "Completed")]
    completed: u64,
}

fn run(opt: &Opt, runtime: &Runtime) -> Result<(port::Port, Stats), Error> {
    let shutdown = Shutdown::new();
    shutdown.install_signal_handler()?;

    let template = match &opt.config_file {
        Some(path) => TemplateConfig::load(path)?.build()?,
        None => TemplateConfig::default().build()?,
    };

    let config = opt.gen_config();
    config.validate(&template)?;

    let ports = port::discover_ports()?;
    let port = port::select_port(&ports, config.link_name.as_deref())?.clone();

    // Pin before allocating so the frames land on the port's node
    match runtime.pin_for(&port) {
        Some(core) => debug!("generator running on core {}", core),
        None => info!("Running unpinned, frames may not be local to {}", port.name),
    }

    let (area, mut bufs) = MmapArea::new(
        config.buf_num,
        config.buf_size as usize,
        config.mmap_options(),
    )?;

    let mut pool: BufPoolVec<BufMmap> = BufPoolVec::new(bufs.len());
    let len = bufs.len();
    let r = pool.put(&mut bufs, len);
    info!("Buffer pool created with {} buffers", r);

    let configured = port::configure_port(&port, 0, 1, config.port_conf())?;
    let queue = port::start_port(configured, area)?;

    let mut generator = Generator::new(pool, queue, template, config.generator());
    let stats = generator.run(&shutdown);

    Ok((port, stats))
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let opt = Opt::from_iter(
        args.iter()
            .take(1)
            .chain(args.iter().skip(1 + port::runtime_arg_count(&args[1..]))),
    );

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opt.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let (runtime, _) = match Runtime::init(&args[1..]) {
        Ok(r) => r,
        Err(err) => {
            error!("Runtime initialization failed: {}", err);
            process::exit(1);
        }
    };

    let (port, stats) = match run(&opt, &runtime) {
        Ok(r) => r,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    };

    info!("Shutting down");

    let rows = vec![StatsRow {
        port: port.id,
        link: port.name,
        tx_packets: stats.tx_packets,
        tx_rejected: stats.tx_rejected,
        pool_empty: stats.pool_empty,
        completed: stats.completed,
    }];
    if let Err(err) = cli_table::print_stdout(rows.with_title()) {
        error!("unable to print stats: {}", err);
    }
}
