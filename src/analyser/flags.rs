//! TCP control flag decoding and segment classification.
use std::fmt;

/// TCP flag masks, low byte of the header flag field.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;
}

const NAMED_FLAGS: [(u8, &str); 8] = [
    (tcp_flags::FIN, "FIN"),
    (tcp_flags::SYN, "SYN"),
    (tcp_flags::RST, "RST"),
    (tcp_flags::PSH, "PSH"),
    (tcp_flags::ACK, "ACK"),
    (tcp_flags::URG, "URG"),
    (tcp_flags::ECE, "ECE"),
    (tcp_flags::CWR, "CWR"),
];

/// Set of named control flags carried by one segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const EMPTY: TcpFlags = TcpFlags(0);
    pub const SYN_ONLY: TcpFlags = TcpFlags(tcp_flags::SYN);
    pub const SYN_ACK: TcpFlags = TcpFlags(tcp_flags::SYN | tcp_flags::ACK);

    /// Decodes a raw flag byte. Every bit pattern is valid.
    pub fn from_bits(raw: u8) -> Self {
        let mut bits = 0u8;
        for (mask, _) in NAMED_FLAGS {
            if raw & mask != 0 {
                bits |= mask;
            }
        }
        TcpFlags(bits)
    }

    /// Decodes the wider flag field dissectors report (reserved and AE bits
    /// included). Only the low eight bits carry named flags.
    pub fn from_header_field(field: u16) -> Self {
        Self::from_bits((field & 0x00ff) as u8)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// Names of the flags present, in header bit order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        NAMED_FLAGS
            .into_iter()
            .filter(move |(mask, _)| self.contains(*mask))
            .map(|(_, name)| name)
    }
}

impl From<u8> for TcpFlags {
    fn from(raw: u8) -> Self {
        TcpFlags::from_bits(raw)
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if *self == TcpFlags::EMPTY {
            return write!(f, "-");
        }
        let names: Vec<&str> = self.names().collect();
        write!(f, "{}", names.join("|"))
    }
}

/// What a segment means to the SYN scan heuristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    SynProbe,
    SynAckReply,
    Other,
}

impl SegmentKind {
    /// Exact set match: SYN+ACK with any extra flag is `Other`.
    pub fn classify(flags: TcpFlags) -> Self {
        match flags {
            TcpFlags::SYN_ONLY => SegmentKind::SynProbe,
            TcpFlags::SYN_ACK => SegmentKind::SynAckReply,
            _ => SegmentKind::Other,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
