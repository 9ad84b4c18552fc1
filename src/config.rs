//! Generator configuration.
//!
//! Numeric knobs come from the command line; the packet template can additionally be overridden
//! from a YAML file:
//!
//! ```yaml
//! src_mac: "12:45:ab:cd:78:21"
//! dst_ip: 10.0.0.2
//! dst_port: 9000
//! payload_len: 256
//! ```

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::generator::GeneratorConfig;
use crate::mmap_area::MmapAreaOptions;
use crate::packet::{
    PacketError, PacketTemplate, DEFAULT_DST_IP, DEFAULT_DST_MAC, DEFAULT_DST_PORT,
    DEFAULT_PAYLOAD_LEN, DEFAULT_SRC_IP, DEFAULT_SRC_MAC, DEFAULT_SRC_PORT, DEFAULT_TTL,
    SAMPLE_PAYLOAD,
};
use crate::port::PortConf;
use crate::socket::SocketOptions;
use crate::util::is_pow_of_two;

/// Smallest frame size accepted by the umem
pub const MIN_BUF_SIZE: u32 = 2048;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid template file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid MAC address {0:?}")]
    Mac(String),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("buffer count must be non-zero")]
    BufNum,
    #[error("buffer size {size} must be a power of two of at least {min} bytes")]
    BufSize { size: u32, min: u32 },
    #[error("frame of {frame} bytes does not fit a {size} byte buffer")]
    FrameTooLarge { frame: usize, size: u32 },
    #[error("ring size {0} is not a power of two")]
    RingSize(u32),
    #[error("zero copy and copy mode are mutually exclusive")]
    BindMode,
}

/// Packet template overrides. Absent fields keep their defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateConfig {
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    pub src_ip: Option<Ipv4Addr>,
    pub dst_ip: Option<Ipv4Addr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub ttl: Option<u8>,
    pub payload_len: Option<usize>,
    /// Bytes copied to the start of the payload
    pub sample: Option<String>,
}

impl TemplateConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TemplateConfig, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        TemplateConfig::from_yaml(&s)
    }

    pub fn from_yaml(s: &str) -> Result<TemplateConfig, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn build(&self) -> Result<PacketTemplate, ConfigError> {
        let mac = |v: &Option<String>, default| match v {
            Some(s) => parse_mac(s),
            None => Ok(default),
        };

        let sample = match &self.sample {
            Some(s) => s.as_bytes(),
            None => SAMPLE_PAYLOAD,
        };

        Ok(PacketTemplate::new(
            mac(&self.src_mac, DEFAULT_SRC_MAC)?,
            mac(&self.dst_mac, DEFAULT_DST_MAC)?,
            self.src_ip.unwrap_or(DEFAULT_SRC_IP),
            self.dst_ip.unwrap_or(DEFAULT_DST_IP),
            self.src_port.unwrap_or(DEFAULT_SRC_PORT),
            self.dst_port.unwrap_or(DEFAULT_DST_PORT),
            self.ttl.unwrap_or(DEFAULT_TTL),
            self.payload_len.unwrap_or(DEFAULT_PAYLOAD_LEN),
            sample,
        )?)
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` (`-` separators are accepted too)
pub fn parse_mac(s: &str) -> Result<[u8; 6], ConfigError> {
    let err = || ConfigError::Mac(s.to_string());

    let mut mac = [0u8; 6];
    let mut parts = s.split(|c| c == ':' || c == '-');

    for b in mac.iter_mut() {
        let part = parts.next().ok_or_else(err)?;
        if part.len() != 2 {
            return Err(err());
        }
        *b = u8::from_str_radix(part, 16).map_err(|_| err())?;
    }

    if parts.next().is_some() {
        return Err(err());
    }

    Ok(mac)
}

/// Everything needed to bring up a port and run the generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenConfig {
    /// Port to transmit on, the first discovered port if unset
    pub link_name: Option<String>,
    pub buf_num: usize,
    pub buf_size: u32,
    /// Size of both the Tx and completion rings
    pub ring_size: u32,
    pub interval: Duration,
    pub empty_backoff: Duration,
    pub count: Option<u64>,
    pub huge_tlb: bool,
    pub zero_copy: bool,
    pub copy: bool,
}

impl Default for GenConfig {
    fn default() -> Self {
        GenConfig {
            link_name: None,
            buf_num: 1023,
            buf_size: MIN_BUF_SIZE,
            ring_size: 256,
            interval: Duration::from_millis(200),
            empty_backoff: Duration::from_millis(100),
            count: None,
            huge_tlb: false,
            zero_copy: false,
            copy: false,
        }
    }
}

impl GenConfig {
    /// Check the sizes against each other and against the frames `template` produces
    pub fn validate(&self, template: &PacketTemplate) -> Result<(), ConfigError> {
        if self.buf_num == 0 {
            return Err(ConfigError::BufNum);
        }
        if !is_pow_of_two(self.buf_size) || self.buf_size < MIN_BUF_SIZE {
            return Err(ConfigError::BufSize {
                size: self.buf_size,
                min: MIN_BUF_SIZE,
            });
        }
        if template.frame_len() > self.buf_size as usize {
            return Err(ConfigError::FrameTooLarge {
                frame: template.frame_len(),
                size: self.buf_size,
            });
        }
        if !is_pow_of_two(self.ring_size) {
            return Err(ConfigError::RingSize(self.ring_size));
        }
        if self.zero_copy && self.copy {
            return Err(ConfigError::BindMode);
        }

        Ok(())
    }

    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            interval: self.interval,
            empty_backoff: self.empty_backoff,
            count: self.count,
        }
    }

    pub fn mmap_options(&self) -> MmapAreaOptions {
        MmapAreaOptions {
            huge_tlb: self.huge_tlb,
            populate: true,
        }
    }

    pub fn port_conf(&self) -> PortConf {
        PortConf {
            tx_ring_size: self.ring_size,
            comp_ring_size: self.ring_size,
            options: SocketOptions {
                zero_copy_mode: self.zero_copy,
                copy_mode: self.copy,
            },
        }
    }
}
