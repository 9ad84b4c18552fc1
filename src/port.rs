//! Runtime and port bring-up.
//!
//! A "port" is a kernel network interface; the generator transmits on queue 0 of one port
//! through a Tx only AF_XDP socket. Setup order mirrors what the run loop needs:
//!
//! 1. [`Runtime::init`]: consume runtime arguments, raise RLIMIT_MEMLOCK
//! 2. [`discover_ports`]: enumerate candidate interfaces
//! 3. [`Runtime::pin_for`]: move onto a core near the port before the umem is allocated
//! 4. [`configure_port`] then [`start_port`]: create the umem and socket

use std::ffi::CStr;
use std::fs;
use std::io;
use std::sync::Arc;

use errno::errno;
use rlimit::{setrlimit, Resource};
use structopt::StructOpt;
use thiserror::Error;
use tracing::{debug, info};

use crate::mmap_area::MmapArea;
use crate::socket::{SocketError, SocketOptions, SocketTx};
use crate::tx::XskTxQueue;
use crate::umem::{Umem, UmemError};
use crate::util::is_pow_of_two;

/// Most ports the runtime will manage
pub const MAX_PORTS: usize = 32;

/// The only Tx queue used
pub const TX_QUEUE: usize = 0;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("invalid runtime arguments: {0}")]
    RuntimeArg(String),
    #[error("unable to raise RLIMIT_MEMLOCK: {0}")]
    Memlock(#[source] io::Error),
    #[error("unable to enumerate interfaces: errno {0}")]
    Enumerate(i32),
    #[error("No ports detected in the system")]
    NoPorts,
    #[error("Total number of detected ports ({found}) exceeds the maximum of {max}")]
    TooManyPorts { found: usize, max: usize },
    #[error("port {0:?} not found")]
    NotFound(String),
    #[error("{rx} rx / {tx} tx queues requested, only 0 rx / 1 tx is supported")]
    Queues { rx: u16, tx: u16 },
    #[error("{ring} ring size {size} is not a power of two")]
    RingSize { ring: &'static str, size: u32 },
    #[error("zero copy and copy mode are mutually exclusive")]
    BindMode,
    #[error(transparent)]
    Umem(#[from] UmemError),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Process wide packet I/O runtime state
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Runtime {
    /// Core requested with `-l`/`--lcore`
    pub lcore: Option<usize>,
}

impl Runtime {
    /// Initialize the runtime. Runtime arguments are those before a `--` separator; the return
    /// value includes how many arguments (separator included) were consumed. Without a
    /// separator nothing is consumed.
    pub fn init(args: &[String]) -> Result<(Runtime, usize), PortError> {
        let (runtime, consumed) = Runtime::parse_args(args)?;

        // The umem is pinned memory
        setrlimit(Resource::MEMLOCK, rlimit::INFINITY, rlimit::INFINITY)
            .map_err(PortError::Memlock)?;

        debug!(?runtime, consumed, "runtime initialized");

        Ok((runtime, consumed))
    }

    fn parse_args(args: &[String]) -> Result<(Runtime, usize), PortError> {
        let consumed = runtime_arg_count(args);
        if consumed == 0 {
            return Ok((Runtime::default(), 0));
        }
        let sep = consumed - 1;

        let argv = std::iter::once("txgen").chain(args[..sep].iter().map(String::as_str));
        let opt = RuntimeOpt::from_iter_safe(argv)
            .map_err(|err| PortError::RuntimeArg(err.message))?;

        Ok((Runtime { lcore: opt.lcore }, sep + 1))
    }

    /// Pin the calling thread to the requested core, or to the first core of the port's NUMA
    /// node. Memory faulted in afterwards is local to that node. Returns the chosen core.
    pub fn pin_for(&self, port: &Port) -> Option<usize> {
        let cores = match self.lcore {
            Some(_) => Vec::new(),
            None => port.socket_id().map(node_cores).unwrap_or_default(),
        };

        let core = match choose_core(self.lcore, &cores) {
            Some(core) => core,
            None => {
                debug!("no core known for port {}, leaving the thread unpinned", port.name);
                return None;
            }
        };

        core_affinity::set_for_current(core_affinity::CoreId { id: core });
        info!("Pinned to core {} for port {}", core, port.name);

        Some(core)
    }
}

/// Number of leading arguments (separator included) that belong to the runtime, 0 without a
/// `--` separator
pub fn runtime_arg_count(args: &[String]) -> usize {
    args.iter().position(|a| a == "--").map_or(0, |sep| sep + 1)
}

/// Runtime arguments, given before the `--` separator
#[derive(StructOpt, Debug)]
#[structopt(name = "txgen")]
struct RuntimeOpt {
    /// Core to run the generator on
    #[structopt(short = "l", long)]
    lcore: Option<usize>,
}

/// The requested core, else the first core of the port's node
fn choose_core(lcore: Option<usize>, node_cores: &[usize]) -> Option<usize> {
    lcore.or_else(|| node_cores.first().copied())
}

/// A kernel network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Interface index
    pub id: u32,
    pub name: String,
}

impl Port {
    /// NUMA node the port's device is attached to, falling back to the node of the current CPU
    pub fn socket_id(&self) -> Option<usize> {
        let path = format!("/sys/class/net/{}/device/numa_node", self.name);

        read_trimmed(&path)
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|node| *node >= 0)
            .map(|node| node as usize)
            .or_else(current_numa_node)
    }
}

/// Enumerate the non-loopback interfaces ordered by interface index
pub fn discover_ports() -> Result<Vec<Port>, PortError> {
    let head = unsafe { libc::if_nameindex() };
    if head.is_null() {
        return Err(PortError::Enumerate(errno().0));
    }

    let mut ports = Vec::new();
    unsafe {
        // The array is terminated by an entry with index 0 and a null name
        let mut cur = head;
        while (*cur).if_index != 0 && !(*cur).if_name.is_null() {
            ports.push(Port {
                id: (*cur).if_index,
                name: CStr::from_ptr((*cur).if_name).to_string_lossy().into_owned(),
            });
            cur = cur.add(1);
        }
        libc::if_freenameindex(head);
    }

    ports.retain(|p| !is_loopback(&p.name));
    ports.sort_by_key(|p| p.id);

    check_port_count(&ports)?;

    Ok(ports)
}

pub fn check_port_count(ports: &[Port]) -> Result<(), PortError> {
    if ports.is_empty() {
        return Err(PortError::NoPorts);
    }
    if ports.len() > MAX_PORTS {
        return Err(PortError::TooManyPorts {
            found: ports.len(),
            max: MAX_PORTS,
        });
    }

    Ok(())
}

/// The named port, or the first one
pub fn select_port<'p>(ports: &'p [Port], name: Option<&str>) -> Result<&'p Port, PortError> {
    match name {
        Some(name) => ports
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PortError::NotFound(name.to_string())),
        None => ports.first().ok_or(PortError::NoPorts),
    }
}

/// Ring sizes and bind mode for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConf {
    pub tx_ring_size: u32,
    pub comp_ring_size: u32,
    pub options: SocketOptions,
}

/// A port whose configuration has been checked but which has no socket yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredPort {
    pub port: Port,
    pub conf: PortConf,
}

pub fn configure_port(
    port: &Port,
    rx_queues: u16,
    tx_queues: u16,
    conf: PortConf,
) -> Result<ConfiguredPort, PortError> {
    if rx_queues != 0 || tx_queues != 1 {
        return Err(PortError::Queues {
            rx: rx_queues,
            tx: tx_queues,
        });
    }
    if !is_pow_of_two(conf.tx_ring_size) {
        return Err(PortError::RingSize {
            ring: "tx",
            size: conf.tx_ring_size,
        });
    }
    if !is_pow_of_two(conf.comp_ring_size) {
        return Err(PortError::RingSize {
            ring: "completion",
            size: conf.comp_ring_size,
        });
    }
    if conf.options.zero_copy_mode && conf.options.copy_mode {
        return Err(PortError::BindMode);
    }

    Ok(ConfiguredPort {
        port: port.clone(),
        conf,
    })
}

/// Register `area` as the port's umem and open the Tx socket on queue 0
pub fn start_port(port: ConfiguredPort, area: Arc<MmapArea>) -> Result<XskTxQueue, PortError> {
    let conf = port.conf;

    let (umem, cq) = Umem::new(area, conf.comp_ring_size, conf.comp_ring_size)?;
    let tx = SocketTx::new(
        umem,
        &port.port.name,
        TX_QUEUE,
        conf.tx_ring_size,
        conf.options,
    )?;

    info!(
        "Port configuration successful. Port Id: {} ({})",
        port.port.id, port.port.name
    );

    Ok(XskTxQueue::new(tx, cq))
}

fn read_trimmed(path: &str) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn is_loopback(name: &str) -> bool {
    read_trimmed(&format!("/sys/class/net/{}/flags", name))
        .and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .map(|flags| flags & libc::IFF_LOOPBACK as u32 != 0)
        .unwrap_or(name == "lo")
}

fn current_numa_node() -> Option<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        return None;
    }

    let dir = fs::read_dir(format!("/sys/devices/system/cpu/cpu{}", cpu)).ok()?;
    dir.filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .find_map(|name| {
            name.strip_prefix("node")
                .and_then(|n| n.parse::<usize>().ok())
        })
}

fn node_cores(node: usize) -> Vec<usize> {
    read_trimmed(&format!("/sys/devices/system/node/node{}/cpulist", node))
        .map(|s| parse_cpulist(&s))
        .unwrap_or_default()
}

/// Parse a kernel cpulist such as `0-3,8,10-11`. Malformed entries are skipped.
pub fn parse_cpulist(s: &str) -> Vec<usize> {
    let mut cores = Vec::new();

    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut bounds = part.splitn(2, '-');
        let lo = bounds.next().and_then(|v| v.parse::<usize>().ok());
        let hi = match bounds.next() {
            Some(v) => v.parse::<usize>().ok(),
            None => lo,
        };

        if let (Some(lo), Some(hi)) = (lo, hi) {
            cores.extend(lo..=hi);
        }
    }

    cores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn ports(n: usize) -> Vec<Port> {
        (0..n)
            .map(|i| Port {
                id: i as u32 + 2,
                name: format!("eth{}", i),
            })
            .collect()
    }

    fn conf() -> PortConf {
        PortConf {
            tx_ring_size: 256,
            comp_ring_size: 256,
            options: SocketOptions::default(),
        }
    }

    #[test]
    fn no_separator_consumes_nothing() {
        let (rt, n) = Runtime::parse_args(&args(&["--link-name", "eth0"])).unwrap();
        assert_eq!(n, 0);
        assert_eq!(rt, Runtime::default());
    }

    #[test]
    fn runtime_args_before_separator() {
        let (rt, n) = Runtime::parse_args(&args(&["-l", "3", "--", "--count", "5"])).unwrap();
        assert_eq!(n, 3);
        assert_eq!(rt.lcore, Some(3));

        let (rt, n) = Runtime::parse_args(&args(&["--"])).unwrap();
        assert_eq!(n, 1);
        assert_eq!(rt.lcore, None);
    }

    #[test]
    fn bad_runtime_args() {
        match Runtime::parse_args(&args(&["--bogus", "--"])) {
            Err(PortError::RuntimeArg(msg)) => assert!(msg.contains("--bogus"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            Runtime::parse_args(&args(&["-l", "--"])),
            Err(PortError::RuntimeArg(_))
        ));
        assert!(matches!(
            Runtime::parse_args(&args(&["-l", "x", "--"])),
            Err(PortError::RuntimeArg(_))
        ));
    }

    #[test]
    fn arg_count_matches_parse() {
        assert_eq!(runtime_arg_count(&args(&["--count", "5"])), 0);
        assert_eq!(runtime_arg_count(&args(&["--", "--count", "5"])), 1);
        assert_eq!(runtime_arg_count(&args(&["-l", "2", "--", "--", "x"])), 3);

        let a = args(&["-l", "2", "--", "--count", "5"]);
        let (_, n) = Runtime::parse_args(&a).unwrap();
        assert_eq!(n, runtime_arg_count(&a));
    }

    #[test]
    fn long_lcore_form() {
        let (rt, n) = Runtime::parse_args(&args(&["--lcore", "7", "--", "--count", "1"])).unwrap();
        assert_eq!(n, 3);
        assert_eq!(rt.lcore, Some(7));
    }

    #[test]
    fn core_choice() {
        assert_eq!(choose_core(Some(3), &[0, 1]), Some(3));
        assert_eq!(choose_core(Some(3), &[]), Some(3));
        assert_eq!(choose_core(None, &[4, 5]), Some(4));
        assert_eq!(choose_core(None, &[]), None);
    }

    #[test]
    fn port_count_bounds() {
        assert!(matches!(check_port_count(&[]), Err(PortError::NoPorts)));
        assert!(check_port_count(&ports(1)).is_ok());
        assert!(check_port_count(&ports(MAX_PORTS)).is_ok());
        match check_port_count(&ports(MAX_PORTS + 1)) {
            Err(PortError::TooManyPorts { found, max }) => {
                assert_eq!(found, MAX_PORTS + 1);
                assert_eq!(max, MAX_PORTS);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn select_by_name_or_first() {
        let p = ports(3);
        assert_eq!(select_port(&p, None).unwrap().name, "eth0");
        assert_eq!(select_port(&p, Some("eth2")).unwrap().id, 4);
        assert!(matches!(
            select_port(&p, Some("eth9")),
            Err(PortError::NotFound(_))
        ));
    }

    #[test]
    fn configure_checks_queues_and_rings() {
        let p = &ports(1)[0];

        let c = configure_port(p, 0, 1, conf()).unwrap();
        assert_eq!(c.port, *p);

        assert!(matches!(
            configure_port(p, 1, 1, conf()),
            Err(PortError::Queues { rx: 1, tx: 1 })
        ));
        assert!(matches!(
            configure_port(p, 0, 2, conf()),
            Err(PortError::Queues { .. })
        ));

        let mut bad = conf();
        bad.tx_ring_size = 300;
        assert!(matches!(
            configure_port(p, 0, 1, bad),
            Err(PortError::RingSize { ring: "tx", .. })
        ));

        let mut both = conf();
        both.options.zero_copy_mode = true;
        both.options.copy_mode = true;
        assert!(matches!(
            configure_port(p, 0, 1, both),
            Err(PortError::BindMode)
        ));
    }

    #[test]
    fn cpulist() {
        assert_eq!(parse_cpulist("0-3,8,10-11\n"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_cpulist("5"), vec![5]);
        assert_eq!(parse_cpulist(""), Vec::<usize>::new());
        assert_eq!(parse_cpulist("a,2"), vec![2]);
    }
}
