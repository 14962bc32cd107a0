//! Capture loading and frame demultiplexing helpers.
use super::containers::{CaptureStats, TcpSegment};
use super::flags::TcpFlags;
use crate::error::{Result, SnifferError};
use rtshark::{Layer, Packet, RTShark};
use std::net::IpAddr;

/// Display filter handed to tshark. Only TCP frames reach the demultiplexer.
pub const BASE_FILTER: &str = "tcp";

/// Layers whose presence means the TCP header is quoted inside an error
/// message rather than carried by the frame.
const ICMP_LAYERS: [&str; 2] = ["icmp", "icmpv6"];

/// Builds the tshark display filter, ANDing an optional user filter.
pub fn build_filter(extra: Option<&str>) -> String {
    match extra.map(str::trim).filter(|f| !f.is_empty()) {
        Some(extra) => format!("{BASE_FILTER} && ({extra})"),
        None => String::from(BASE_FILTER),
    }
}

/// One protocol layer of a dissected frame.
pub trait DissectedLayer {
    fn layer_name(&self) -> &str;
    fn field(&self, name: &str) -> Option<&str>;
}

/// A dissected frame, layers in wire order (outermost first).
pub trait DissectedFrame {
    type Layer: DissectedLayer;

    fn layers(&self) -> Vec<&Self::Layer>;
    fn timestamp(&self) -> Option<i64>;
}

/// Source of dissected frames. `Ok(None)` marks the end of the capture.
pub trait FrameReader {
    type Frame: DissectedFrame;

    fn read_frame(&mut self) -> std::io::Result<Option<Self::Frame>>;
    fn close(&mut self);
}

impl DissectedLayer for Layer {
    fn layer_name(&self) -> &str {
        self.name()
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.metadata(name).map(|m| m.value())
    }
}

impl DissectedFrame for Packet {
    type Layer = Layer;

    fn layers(&self) -> Vec<&Layer> {
        self.iter().collect()
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp_micros()
    }
}

impl FrameReader for RTShark {
    type Frame = Packet;

    fn read_frame(&mut self) -> std::io::Result<Option<Packet>> {
        self.read()
    }

    fn close(&mut self) {
        self.kill();
    }
}

/// Lazy stream of TCP segments read from a capture.
///
/// Frames that are not IPv4/IPv6 TCP, or whose fields can't be decoded, are
/// skipped and counted in [CaptureStats]. The reader is closed on drop.
pub struct CaptureSource<R: FrameReader = RTShark> {
    reader: R,
    stats: CaptureStats,
    finished: bool,
}

impl CaptureSource<RTShark> {
    /// Spawns tshark over `filepath`.
    pub fn open(filepath: &str, extra_filter: Option<&str>) -> Result<Self> {
        log::info!("Loading capture file.");

        let filter = build_filter(extra_filter);
        log::debug!("Display filter: {filter}");

        let builder = rtshark::RTSharkBuilder::builder()
            .input_path(filepath)
            .display_filter(&filter);

        let rtshark = match builder.spawn() {
            Err(err) => {
                log::error!("Error spawning tshark: {err}");
                return Err(SnifferError::Capture(format!("cannot read {filepath}: {err}")));
            }
            Ok(rtshark) => {
                log::info!("Reading from {}", filepath);
                rtshark
            }
        };

        Ok(Self::from_reader(rtshark))
    }
}

impl<R: FrameReader> CaptureSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            stats: CaptureStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Reads frames until one yields a segment. `Ok(None)` at end of capture.
    fn next_segment(&mut self) -> Result<Option<TcpSegment>> {
        loop {
            let frame = match self.reader.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(err) => {
                    return Err(SnifferError::Capture(format!(
                        "error parsing tshark output: {err}"
                    )))
                }
            };

            self.stats.frames_read += 1;
            if let Some(micros) = frame.timestamp() {
                self.stats.observe_timestamp(micros);
            }

            match segment_from_frame(&frame) {
                Some(segment) => return Ok(Some(segment)),
                None => self.stats.frames_skipped += 1,
            }
        }
    }
}

impl<R: FrameReader> Iterator for CaptureSource<R> {
    type Item = Result<TcpSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_segment() {
            Ok(Some(segment)) => Some(Ok(segment)),
            Ok(None) => {
                self.finished = true;
                log::info!(
                    "Capture exhausted: {} frames read, {} skipped",
                    self.stats.frames_read,
                    self.stats.frames_skipped
                );
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

impl<R: FrameReader> Drop for CaptureSource<R> {
    fn drop(&mut self) {
        self.reader.close();
    }
}

/// Extracts addresses and flags from a dissected frame.
///
/// Addresses come from the IP layer immediately enclosing the first TCP
/// layer, so tunnelled traffic reports its inner endpoints. Frames carrying
/// an ICMP layer before the TCP header are skipped: the header is quoted from
/// an earlier packet.
pub fn segment_from_frame<F: DissectedFrame>(frame: &F) -> Option<TcpSegment> {
    let layers = frame.layers();
    let tcp_index = layers.iter().position(|layer| layer.layer_name() == "tcp")?;

    if layers[..tcp_index]
        .iter()
        .any(|layer| ICMP_LAYERS.iter().any(|icmp| *icmp == layer.layer_name()))
    {
        log::debug!("Skipping ICMP frame quoting a TCP header");
        return None;
    }

    let network = layers[..tcp_index].last()?;
    let (source, destination) = match network.layer_name() {
        "ip" => (network.field("ip.src"), network.field("ip.dst")),
        "ipv6" => (network.field("ipv6.src"), network.field("ipv6.dst")),
        _ => return None,
    };
    let flags = layers[tcp_index].field("tcp.flags");

    segment_from_fields(source?, destination?, flags?)
}

/// Builds a [TcpSegment] from textual dissector fields.
pub fn segment_from_fields(source: &str, destination: &str, flags: &str) -> Option<TcpSegment> {
    let source = parse_address(source)?;
    let destination = parse_address(destination)?;
    let flags = match parse_flag_field(flags) {
        Some(field) => TcpFlags::from_header_field(field).bits(),
        None => {
            log::warn!("Failed to parse tcp.flags value {flags:?}");
            return None;
        }
    };

    Some(TcpSegment::new(source, destination, flags))
}

/// Parses the tcp.flags field, e.g. `0x0002`, `0x012` or `18`.
pub fn parse_flag_field(value: &str) -> Option<u16> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

pub fn parse_address(value: &str) -> Option<IpAddr> {
    match value.trim().parse() {
        Ok(address) => Some(address),
        Err(_) => {
            log::warn!("Failed to parse address {value:?}");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory frames standing in for tshark output.
    use super::{DissectedFrame, DissectedLayer, FrameReader};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    pub struct FakeLayer {
        name: &'static str,
        fields: Vec<(&'static str, &'static str)>,
    }

    impl DissectedLayer for FakeLayer {
        fn layer_name(&self) -> &str {
            self.name
        }

        fn field(&self, name: &str) -> Option<&str> {
            self.fields.iter().find(|(key, _)| *key == name).map(|(_, value)| *value)
        }
    }

    pub struct FakeFrame {
        layers: Vec<FakeLayer>,
        timestamp: Option<i64>,
    }

    impl FakeFrame {
        pub fn new() -> Self {
            Self {
                layers: vec![FakeLayer { name: "eth", fields: Vec::new() }],
                timestamp: None,
            }
        }

        pub fn at(mut self, micros: i64) -> Self {
            self.timestamp = Some(micros);
            self
        }

        pub fn ip(mut self, src: &'static str, dst: &'static str) -> Self {
            self.layers.push(FakeLayer {
                name: "ip",
                fields: vec![("ip.src", src), ("ip.dst", dst)],
            });
            self
        }

        pub fn ipv6(mut self, src: &'static str, dst: &'static str) -> Self {
            self.layers.push(FakeLayer {
                name: "ipv6",
                fields: vec![("ipv6.src", src), ("ipv6.dst", dst)],
            });
            self
        }

        pub fn icmp(mut self) -> Self {
            self.layers.push(FakeLayer { name: "icmp", fields: vec![("icmp.type", "3")] });
            self
        }

        pub fn tcp(mut self, flags: &'static str) -> Self {
            self.layers.push(FakeLayer { name: "tcp", fields: vec![("tcp.flags", flags)] });
            self
        }

        pub fn syn(src: &'static str, dst: &'static str) -> Self {
            FakeFrame::new().ip(src, dst).tcp("0x0002")
        }

        pub fn synack(src: &'static str, dst: &'static str) -> Self {
            FakeFrame::new().ip(src, dst).tcp("0x0012")
        }
    }

    impl DissectedFrame for FakeFrame {
        type Layer = FakeLayer;

        fn layers(&self) -> Vec<&FakeLayer> {
            self.layers.iter().collect()
        }

        fn timestamp(&self) -> Option<i64> {
            self.timestamp
        }
    }

    /// Replays frames, then an optional read error, then end of capture.
    pub struct FakeReader {
        frames: VecDeque<io::Result<FakeFrame>>,
        pub closed: Rc<Cell<bool>>,
    }

    impl FakeReader {
        pub fn new(frames: Vec<FakeFrame>) -> Self {
            Self {
                frames: frames.into_iter().map(Ok).collect(),
                closed: Rc::new(Cell::new(false)),
            }
        }

        pub fn failing_after(frames: Vec<FakeFrame>) -> Self {
            let mut reader = Self::new(frames);
            reader
                .frames
                .push_back(Err(io::Error::new(io::ErrorKind::InvalidData, "truncated PDML")));
            reader
        }
    }

    impl FrameReader for FakeReader {
        type Frame = FakeFrame;

        fn read_frame(&mut self) -> io::Result<Option<FakeFrame>> {
            self.frames.pop_front().transpose()
        }

        fn close(&mut self) {
            self.closed.set(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeFrame, FakeReader};
    use super::*;
    use crate::analyser::flags::{tcp_flags, SegmentKind};

    fn addr(value: &str) -> IpAddr {
        value.parse().unwrap()
    }

    #[test]
    fn test_build_filter() {
        assert_eq!(build_filter(None), "tcp");
        assert_eq!(build_filter(Some("  ")), "tcp");
        assert_eq!(build_filter(Some("ip.addr==10.0.0.1")), "tcp && (ip.addr==10.0.0.1)");
    }

    #[test]
    fn test_parse_flag_field() {
        assert_eq!(parse_flag_field("0x0002"), Some(0x0002));
        assert_eq!(parse_flag_field("0x012"), Some(0x0012));
        assert_eq!(parse_flag_field("18"), Some(18));
        assert_eq!(parse_flag_field("0xzz"), None);
        assert_eq!(parse_flag_field(""), None);
    }

    #[test]
    fn test_segment_from_fields_ipv4() {
        let segment = segment_from_fields("10.0.0.1", "10.0.0.2", "0x0002").unwrap();
        assert_eq!(segment.source, addr("10.0.0.1"));
        assert_eq!(segment.destination, addr("10.0.0.2"));
        assert_eq!(segment.flags, tcp_flags::SYN);
    }

    #[test]
    fn test_segment_from_fields_ipv6_with_reserved_bits() {
        let segment = segment_from_fields("fe80::1", "fe80::2", "0x0112").unwrap();
        assert!(segment.source.is_ipv6());
        assert_eq!(
            SegmentKind::classify(TcpFlags::from_bits(segment.flags)),
            SegmentKind::SynAckReply
        );
    }

    #[test]
    fn test_segment_from_fields_rejects_garbage() {
        assert!(segment_from_fields("not-an-ip", "10.0.0.2", "0x0002").is_none());
        assert!(segment_from_fields("10.0.0.1", "10.0.0.2", "SYN").is_none());
    }

    #[test]
    fn test_segment_from_frame_plain_tcp() {
        let segment = segment_from_frame(&FakeFrame::syn("10.0.0.9", "192.168.1.1")).unwrap();
        let expected = TcpSegment::new(addr("10.0.0.9"), addr("192.168.1.1"), tcp_flags::SYN);
        assert_eq!(segment, expected);

        let v6 = FakeFrame::new().ipv6("2001:db8::1", "2001:db8::2").tcp("0x0012");
        let segment = segment_from_frame(&v6).unwrap();
        assert_eq!(segment.source, addr("2001:db8::1"));
        assert_eq!(segment.flags, tcp_flags::SYN | tcp_flags::ACK);
    }

    #[test]
    fn test_segment_from_frame_skips_icmp_quoting_tcp() {
        // Port unreachable from a router, quoting the SYN it rejected.
        let frame = FakeFrame::new()
            .ip("192.168.1.254", "10.0.0.9")
            .icmp()
            .ip("10.0.0.9", "192.168.1.1")
            .tcp("0x0002");
        assert!(segment_from_frame(&frame).is_none());
    }

    #[test]
    fn test_segment_from_frame_uses_innermost_ip() {
        // 6in4 tunnel: outer IPv4 between tunnel endpoints, inner IPv6 carries TCP.
        let frame = FakeFrame::new()
            .ip("198.51.100.1", "198.51.100.2")
            .ipv6("2001:db8::7", "2001:db8::8")
            .tcp("0x0002");
        let segment = segment_from_frame(&frame).unwrap();
        assert_eq!(segment.source, addr("2001:db8::7"));
        assert_eq!(segment.destination, addr("2001:db8::8"));
    }

    #[test]
    fn test_segment_from_frame_needs_ip_and_tcp() {
        assert!(segment_from_frame(&FakeFrame::new().ip("10.0.0.1", "10.0.0.2")).is_none());
        assert!(segment_from_frame(&FakeFrame::new().tcp("0x0002")).is_none());
    }

    #[test]
    fn test_capture_source_counts_frames() {
        let reader = FakeReader::new(vec![
            FakeFrame::syn("10.0.0.9", "192.168.1.1").at(1_000),
            FakeFrame::new()
                .ip("192.168.1.254", "10.0.0.9")
                .icmp()
                .ip("10.0.0.9", "192.168.1.1")
                .tcp("0x0002")
                .at(2_000),
            FakeFrame::synack("192.168.1.1", "10.0.0.9").at(3_000),
        ]);
        let mut source = CaptureSource::from_reader(reader);

        let segments: Vec<TcpSegment> = source.by_ref().map(|s| s.unwrap()).collect();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].source, addr("10.0.0.9"));
        assert_eq!(segments[1].destination, addr("10.0.0.9"));
        let stats = source.stats();
        assert_eq!(stats.frames_read, 3);
        assert_eq!(stats.frames_skipped, 1);
        assert_eq!(stats.first_timestamp, Some(1_000));
        assert_eq!(stats.last_timestamp, Some(3_000));
        assert!(source.next().is_none());
    }

    #[test]
    fn test_capture_source_stops_after_error() {
        let reader = FakeReader::failing_after(vec![FakeFrame::syn("10.0.0.1", "10.0.0.2")]);
        let mut source = CaptureSource::from_reader(reader);

        assert!(matches!(source.next(), Some(Ok(_))));
        assert!(matches!(source.next(), Some(Err(SnifferError::Capture(_)))));
        assert!(source.next().is_none());
        assert!(source.next().is_none());
    }

    #[test]
    fn test_capture_source_closes_reader_on_drop() {
        let reader = FakeReader::new(Vec::new());
        let closed = reader.closed.clone();
        let source = CaptureSource::from_reader(reader);

        assert!(!closed.get());
        drop(source);
        assert!(closed.get());
    }
}
