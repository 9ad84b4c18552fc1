//! Ethernet/IPv4/UDP frame construction.
//!
//! The generator sends one fixed frame over and over. Every protocol value lives in a
//! [`PacketTemplate`]; [`PacketTemplate::write`] lays the frame out at the start of a buffer:
//!
//! ```text
//! +----------------+-------------+------------+---------------------------+
//! | Ethernet (14)  | IPv4 (20)   | UDP (8)    | payload (zero padded)     |
//! +----------------+-------------+------------+---------------------------+
//! ```
//!
//! All multi-byte fields are written in network byte order through a bounds checked cursor.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::buf::Buf;

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;
pub const HDR_STACK_LEN: usize = ETH_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPPROTO_UDP: u8 = 17;
/// Don't fragment, fragment offset 0
pub const IPV4_FLAGS_DF: u16 = 0x4000;

pub const DEFAULT_SRC_MAC: [u8; 6] = [0x12, 0x45, 0xab, 0xcd, 0x78, 0x21];
pub const DEFAULT_DST_MAC: [u8; 6] = [0xde, 0xad, 0xbe, 0xef, 0xab, 0x12];
pub const DEFAULT_SRC_IP: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);
pub const DEFAULT_DST_IP: Ipv4Addr = Ipv4Addr::new(4, 3, 2, 1);
pub const DEFAULT_SRC_PORT: u16 = 10000;
pub const DEFAULT_DST_PORT: u16 = 5000;
pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_PAYLOAD_LEN: usize = 172;
pub const SAMPLE_PAYLOAD: &[u8] = b"This is a sample data generated by an AF_XDP application ...\0";

/// Largest payload whose frame length still fits the u16 buffer length
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - HDR_STACK_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("sample of {sample} bytes does not fit a {payload} byte payload")]
    SampleTooLarge { sample: usize, payload: usize },
    #[error("payload of {0} bytes exceeds the maximum of {}", MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),
}

/// Sequential writer over a byte slice. Every write is checked against the end of the slice.
struct Cursor<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Cursor<'b> {
    fn new(buf: &'b mut [u8]) -> Cursor<'b> {
        Cursor { buf, pos: 0 }
    }

    /// Reserve the next `len` bytes and return them for writing
    fn take(&mut self, len: usize) -> &mut [u8] {
        let start = self.pos;
        let end = start + len;
        assert!(
            end <= self.buf.len(),
            "write of {} bytes at offset {} overruns {} byte region",
            len,
            start,
            self.buf.len()
        );
        self.pos = end;

        &mut self.buf[start..end]
    }

    fn put(&mut self, bytes: &[u8]) {
        self.take(bytes.len()).copy_from_slice(bytes);
    }

    fn position(&self) -> usize {
        self.pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn to_bytes(&self) -> [u8; ETH_HDR_LEN] {
        let mut b = [0u8; ETH_HDR_LEN];
        b[0..6].copy_from_slice(&self.dst);
        b[6..12].copy_from_slice(&self.src);
        b[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
        b
    }
}

/// IPv4 header without options (IHL 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub dscp_ecn: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags_frag: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Serialize with the header checksum computed over the finished header
    pub fn to_bytes(&self) -> [u8; IPV4_HDR_LEN] {
        let mut b = [0u8; IPV4_HDR_LEN];
        b[0] = (4 << 4) | 5;
        b[1] = self.dscp_ecn;
        b[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        b[4..6].copy_from_slice(&self.id.to_be_bytes());
        b[6..8].copy_from_slice(&self.flags_frag.to_be_bytes());
        b[8] = self.ttl;
        b[9] = self.protocol;
        // b[10..12] checksum, zero while summing
        b[12..16].copy_from_slice(&self.src.octets());
        b[16..20].copy_from_slice(&self.dst.octets());

        let csum = ipv4_checksum(&b);
        b[10..12].copy_from_slice(&csum.to_be_bytes());
        b
    }

    pub fn checksum(&self) -> u16 {
        let b = self.to_bytes();
        u16::from_be_bytes([b[10], b[11]])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub len: u16,
    /// 0 means no checksum, which IPv4 allows
    pub checksum: u16,
}

impl UdpHeader {
    pub fn to_bytes(&self) -> [u8; UDP_HDR_LEN] {
        let mut b = [0u8; UDP_HDR_LEN];
        b[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        b[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        b[4..6].copy_from_slice(&self.len.to_be_bytes());
        b[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        b
    }
}

/// Internet checksum (RFC 1071) over `header`. The checksum field must be zero when computing;
/// over a header carrying a valid checksum the result is 0.
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for chunk in header.chunks(2) {
        let word = match *chunk {
            [hi, lo] => u16::from_be_bytes([hi, lo]),
            [hi] => u16::from_be_bytes([hi, 0]),
            _ => 0,
        };
        sum += u32::from(word);
    }

    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// The fixed values stamped into every generated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTemplate {
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    payload_len: usize,
    sample: Vec<u8>,
}

impl Default for PacketTemplate {
    fn default() -> Self {
        PacketTemplate {
            src_mac: DEFAULT_SRC_MAC,
            dst_mac: DEFAULT_DST_MAC,
            src_ip: DEFAULT_SRC_IP,
            dst_ip: DEFAULT_DST_IP,
            src_port: DEFAULT_SRC_PORT,
            dst_port: DEFAULT_DST_PORT,
            ttl: DEFAULT_TTL,
            payload_len: DEFAULT_PAYLOAD_LEN,
            sample: SAMPLE_PAYLOAD.to_vec(),
        }
    }
}

impl PacketTemplate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        ttl: u8,
        payload_len: usize,
        sample: &[u8],
    ) -> Result<PacketTemplate, PacketError> {
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }
        if sample.len() > payload_len {
            return Err(PacketError::SampleTooLarge {
                sample: sample.len(),
                payload: payload_len,
            });
        }

        Ok(PacketTemplate {
            src_mac,
            dst_mac,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            ttl,
            payload_len,
            sample: sample.to_vec(),
        })
    }

    /// Bytes on the wire (excluding FCS)
    pub fn frame_len(&self) -> usize {
        HDR_STACK_LEN + self.payload_len
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn ethernet(&self) -> EthernetHeader {
        EthernetHeader {
            dst: self.dst_mac,
            src: self.src_mac,
            ethertype: ETHERTYPE_IPV4,
        }
    }

    pub fn ipv4(&self) -> Ipv4Header {
        Ipv4Header {
            dscp_ecn: 0,
            total_len: (IPV4_HDR_LEN + UDP_HDR_LEN + self.payload_len) as u16,
            id: 0,
            flags_frag: IPV4_FLAGS_DF,
            ttl: self.ttl,
            protocol: IPPROTO_UDP,
            src: self.src_ip,
            dst: self.dst_ip,
        }
    }

    pub fn udp(&self) -> UdpHeader {
        UdpHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            len: (UDP_HDR_LEN + self.payload_len) as u16,
            checksum: 0,
        }
    }

    /// Write the frame at the start of `buf` and set its data and total length. Returns the
    /// frame length.
    ///
    /// Panics if the buffer cannot hold `frame_len()` bytes; buffer sizes are validated against
    /// the template at startup.
    pub fn write<B: Buf>(&self, buf: &mut B) -> usize {
        let frame_len = self.frame_len();
        assert!(
            frame_len <= buf.get_capacity(),
            "frame of {} bytes does not fit a {} byte buffer",
            frame_len,
            buf.get_capacity()
        );

        {
            let mut cur = Cursor::new(&mut buf.get_data_mut()[..frame_len]);

            cur.put(&self.ethernet().to_bytes());
            cur.put(&self.ipv4().to_bytes());
            cur.put(&self.udp().to_bytes());

            let payload = cur.take(self.payload_len);
            for b in payload.iter_mut() {
                *b = 0;
            }
            payload[..self.sample.len()].copy_from_slice(&self.sample);

            debug_assert_eq!(cur.position(), frame_len);
        }

        buf.set_len(frame_len as u16);

        frame_len
    }
}
