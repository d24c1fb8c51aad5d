//! Packet sources: pcap/pcapng streams from a file, standard input, or the
//! stdout of a spawned capture tool.

use std::fs::File;
use std::io::{self, Chain, Cursor, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};

use super::packet::LinkLayer;
use crate::configuration::types::CaptureSource;
use crate::error_handling::types::EngineError;

const READER_CAPACITY: usize = 65536;
/// Room kept above the snapshot length for block headers and options.
const BLOCK_OVERHEAD: usize = 1024;
/// The read buffer doubles on demand up to this size.
const MAX_READER_CAPACITY: usize = 16 * 1024 * 1024;

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const LEGACY_MAGICS: [[u8; 4]; 6] = [
    [0xd4, 0xc3, 0xb2, 0xa1],
    [0xa1, 0xb2, 0xc3, 0xd4],
    [0x4d, 0x3c, 0xb2, 0xa1],
    [0xa1, 0xb2, 0x3c, 0x4d],
    [0x34, 0xcd, 0xb2, 0xa1],
    [0xa1, 0xb2, 0xcd, 0x34],
];
const LEGACY_HEADER_LEN: usize = 24;
const PCAPNG_MIN_SECTION_LEN: usize = 28;

/// One captured frame and the link layer it was captured on.
#[derive(Debug, Clone)]
pub struct Packet {
    pub link: LinkLayer,
    pub data: Vec<u8>,
}

pub trait PacketSource {
    /// Next frame, or `None` once the input is exhausted.
    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError>;
}

impl<P: PacketSource + ?Sized> PacketSource for Box<P> {
    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError> {
        (**self).next_packet()
    }
}

/// The file header, already read, followed by the rest of the stream.
type Input = Chain<Cursor<Vec<u8>>, Box<dyn Read + Send>>;

enum Reader {
    Legacy(LegacyPcapReader<Input>),
    Ng(PcapNGReader<Input>),
}

impl Reader {
    fn blocks(&mut self) -> &mut dyn PcapReaderIterator {
        match self {
            Reader::Legacy(r) => r,
            Reader::Ng(r) => r,
        }
    }
}

/// Reads legacy pcap or pcapng from any byte stream.
pub struct PcapSource {
    reader: Reader,
    capacity: usize,
    legacy_link: Option<LinkLayer>,
    interfaces: Vec<Option<LinkLayer>>,
    exhausted: bool,
}

/// Buffer size that holds one block of `snaplen` captured bytes.
fn reader_capacity(snaplen: u32) -> usize {
    std::cmp::max(READER_CAPACITY, snaplen as usize + BLOCK_OVERHEAD)
}

fn header_error(err: io::Error) -> EngineError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        EngineError::PcapError("input ends inside the capture file header".to_string())
    } else {
        EngineError::IoError(err)
    }
}

/// Reads the whole pcapng section header block, whose length field follows
/// the magic in the byte order the block declares.
fn read_section_header(
    input: &mut dyn Read,
    mut head: Vec<u8>,
    capacity: usize,
) -> Result<Vec<u8>, EngineError> {
    head.resize(12, 0);
    input.read_exact(&mut head[4..12]).map_err(header_error)?;
    let len_bytes = [head[4], head[5], head[6], head[7]];
    let block_len = match [head[8], head[9], head[10], head[11]] {
        [0x4d, 0x3c, 0x2b, 0x1a] => u32::from_le_bytes(len_bytes) as usize,
        [0x1a, 0x2b, 0x3c, 0x4d] => u32::from_be_bytes(len_bytes) as usize,
        _ => {
            return Err(EngineError::PcapError(
                "pcapng section header has no byte-order magic".to_string(),
            ))
        }
    };
    if block_len < PCAPNG_MIN_SECTION_LEN || block_len % 4 != 0 || block_len > capacity {
        return Err(EngineError::PcapError(format!(
            "invalid pcapng section header length {}",
            block_len
        )));
    }
    head.resize(block_len, 0);
    input.read_exact(&mut head[12..]).map_err(header_error)?;
    Ok(head)
}

impl PcapSource {
    /// Detects the capture format; blocks until the stream's file header is
    /// available. `snaplen` sizes the read buffer so a full-length frame fits.
    pub fn new(mut input: Box<dyn Read + Send>, snaplen: u32) -> Result<Self, EngineError> {
        let capacity = reader_capacity(snaplen);
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic).map_err(header_error)?;

        let reader = if magic == PCAPNG_MAGIC {
            let head = read_section_header(&mut input, magic.to_vec(), capacity)?;
            let input = Cursor::new(head).chain(input);
            Reader::Ng(PcapNGReader::new(capacity, input).map_err(pcap_error)?)
        } else if LEGACY_MAGICS.contains(&magic) {
            let mut head = magic.to_vec();
            head.resize(LEGACY_HEADER_LEN, 0);
            input.read_exact(&mut head[4..]).map_err(header_error)?;
            let input = Cursor::new(head).chain(input);
            Reader::Legacy(LegacyPcapReader::new(capacity, input).map_err(pcap_error)?)
        } else {
            return Err(EngineError::PcapError(format!(
                "not a pcap or pcapng stream (magic {:02x?})",
                magic
            )));
        };
        debug!("Packet reader buffer: {} bytes", capacity);

        Ok(Self {
            reader,
            capacity,
            legacy_link: None,
            interfaces: Vec::new(),
            exhausted: false,
        })
    }
}

fn pcap_error<I: std::fmt::Debug>(err: PcapError<I>) -> EngineError {
    EngineError::PcapError(format!("{:?}", err))
}

/// Turns one parsed block into a packet, updating link-type state from header
/// blocks along the way.
fn frame_of(
    block: PcapBlockOwned<'_>,
    legacy_link: &mut Option<LinkLayer>,
    interfaces: &mut Vec<Option<LinkLayer>>,
) -> Result<Option<Packet>, EngineError> {
    match block {
        PcapBlockOwned::LegacyHeader(header) => {
            *legacy_link = Some(LinkLayer::from_linktype(header.network.0)?);
            Ok(None)
        }
        PcapBlockOwned::Legacy(b) => match *legacy_link {
            Some(link) => Ok(Some(Packet {
                link,
                data: b.data.to_vec(),
            })),
            None => Err(EngineError::PcapError("packet before pcap header".to_string())),
        },
        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
            interfaces.clear();
            Ok(None)
        }
        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
            let link = match LinkLayer::from_linktype(idb.linktype.0) {
                Ok(link) => Some(link),
                Err(e) => {
                    warn!("Skipping packets of interface {}: {}", interfaces.len(), e);
                    None
                }
            };
            interfaces.push(link);
            Ok(None)
        }
        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
            let link = interfaces.get(epb.if_id as usize).copied().flatten();
            let caplen = std::cmp::min(epb.caplen as usize, epb.data.len());
            Ok(link.map(|link| Packet {
                link,
                data: epb.data[..caplen].to_vec(),
            }))
        }
        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
            let link = interfaces.first().copied().flatten();
            let len = std::cmp::min(spb.origlen as usize, spb.data.len());
            Ok(link.map(|link| Packet {
                link,
                data: spb.data[..len].to_vec(),
            }))
        }
        PcapBlockOwned::NG(_) => Ok(None),
    }
}

impl PacketSource for PcapSource {
    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            match self.reader.blocks().next() {
                Ok((offset, block)) => {
                    let packet = frame_of(block, &mut self.legacy_link, &mut self.interfaces)?;
                    self.reader.blocks().consume(offset);
                    if let Some(packet) = packet {
                        return Ok(Some(packet));
                    }
                }
                Err(PcapError::Eof) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                Err(PcapError::UnexpectedEof) => {
                    warn!("Capture input ends inside a block; ignoring the truncated tail");
                    self.exhausted = true;
                    return Ok(None);
                }
                Err(PcapError::Incomplete(_)) => {
                    self.reader.blocks().refill().map_err(pcap_error)?;
                }
                Err(PcapError::BufferTooSmall) => {
                    let grown = self.capacity * 2;
                    if grown > MAX_READER_CAPACITY || !self.reader.blocks().grow(grown) {
                        return Err(EngineError::PcapError(format!(
                            "block larger than {} bytes",
                            self.capacity
                        )));
                    }
                    debug!("Packet reader buffer grown to {} bytes", grown);
                    self.capacity = grown;
                    self.reader.blocks().refill().map_err(pcap_error)?;
                }
                Err(e) => return Err(pcap_error(e)),
            }
        }
    }
}

/// Stops a running capture from another thread.
///
/// Setting the flag ends the engine loop at the next packet boundary; killing
/// the capture tool unblocks a read that is waiting for the next packet.
#[derive(Clone, Debug, Default)]
pub struct CaptureStopper {
    flag: Arc<AtomicBool>,
    child: Option<Arc<Mutex<Child>>>,
}

impl CaptureStopper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Some(child) = &self.child {
            if let Ok(mut child) = child.lock() {
                if let Err(e) = child.kill() {
                    debug!("Capture tool already gone: {}", e);
                }
            }
        }
    }

    /// Waits for the capture tool, if any, so it does not linger as a zombie.
    pub fn reap(&self) {
        let Some(child) = &self.child else { return };
        let Ok(mut child) = child.lock() else { return };
        match child.try_wait() {
            Ok(Some(status)) => info!("Capture tool exited: {}", status),
            Ok(None) => {
                let _ = child.kill();
                match child.wait() {
                    Ok(status) => info!("Capture tool exited: {}", status),
                    Err(e) => warn!("Unable to reap capture tool: {}", e),
                }
            }
            Err(e) => warn!("Unable to reap capture tool: {}", e),
        }
    }
}

/// Builds the command line of the live capture tool.
///
/// The tool must write a pcap stream of TCP traffic to its stdout, flushing
/// per packet.
pub fn capture_command(tool: &str, interface: Option<&str>, snaplen: u32) -> Command {
    let mut cmd = Command::new(tool);
    if let Some(iface) = interface {
        cmd.arg("-i").arg(iface);
    }
    cmd.args(["-U", "-n", "-s"])
        .arg(snaplen.to_string())
        .args(["-w", "-", "tcp"]);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    cmd
}

/// Opens the configured packet source together with the handle that stops it.
pub fn open_source(
    source: &CaptureSource,
    snaplen: u32,
) -> Result<(PcapSource, CaptureStopper), EngineError> {
    match source {
        CaptureSource::File(path) => {
            info!("Reading packets from {}", path.display());
            let file = File::open(path)?;
            Ok((PcapSource::new(Box::new(file), snaplen)?, CaptureStopper::new()))
        }
        CaptureSource::Stdin => {
            info!("Reading packets from standard input");
            Ok((
                PcapSource::new(Box::new(std::io::stdin()), snaplen)?,
                CaptureStopper::new(),
            ))
        }
        CaptureSource::Live { interface, tool } => {
            info!(
                "Starting live capture with {} on {}",
                tool,
                interface.as_deref().unwrap_or("the default interface")
            );
            let mut child = capture_command(tool, interface.as_deref(), snaplen)
                .spawn()
                .map_err(EngineError::SpawnFailed)?;
            let stdout = match child.stdout.take() {
                Some(stdout) => stdout,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EngineError::PcapError(
                        "capture tool has no output stream".to_string(),
                    ));
                }
            };
            let stopper = CaptureStopper {
                flag: Arc::new(AtomicBool::new(false)),
                child: Some(Arc::new(Mutex::new(child))),
            };
            match PcapSource::new(Box::new(stdout), snaplen) {
                Ok(source) => Ok((source, stopper)),
                Err(e) => {
                    stopper.reap();
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Legacy little-endian pcap with microsecond timestamps.
    pub(crate) fn pcap_bytes(linktype: u32, frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&linktype.to_le_bytes());
        for (i, frame) in frames.iter().enumerate() {
            out.extend_from_slice(&(1_700_000_000u32 + i as u32).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(frame);
        }
        out
    }

    /// Little-endian pcapng: one section, one interface, one enhanced packet
    /// block per frame.
    fn pcapng_bytes(linktype: u16, frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x0a0d_0d0au32.to_le_bytes());
        out.extend_from_slice(&28u32.to_le_bytes());
        out.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(-1i64).to_le_bytes());
        out.extend_from_slice(&28u32.to_le_bytes());

        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&20u32.to_le_bytes());
        out.extend_from_slice(&linktype.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&20u32.to_le_bytes());

        for frame in frames {
            let padded = (frame.len() + 3) & !3;
            let block_len = (32 + padded) as u32;
            out.extend_from_slice(&6u32.to_le_bytes());
            out.extend_from_slice(&block_len.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(frame);
            out.resize(out.len() + padded - frame.len(), 0);
            out.extend_from_slice(&block_len.to_le_bytes());
        }
        out
    }

    /// Hands out at most `chunk` bytes per read, like a pipe.
    struct Trickle {
        data: Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.data.read(&mut buf[..n])
        }
    }

    /// Replays frames without a pcap container.
    pub(crate) struct VecSource {
        pub(crate) link: LinkLayer,
        pub(crate) frames: std::collections::VecDeque<Vec<u8>>,
    }

    impl VecSource {
        pub(crate) fn ethernet(frames: Vec<Vec<u8>>) -> Self {
            Self {
                link: LinkLayer::Ethernet,
                frames: frames.into(),
            }
        }
    }

    impl PacketSource for VecSource {
        fn next_packet(&mut self) -> Result<Option<Packet>, EngineError> {
            Ok(self.frames.pop_front().map(|data| Packet {
                link: self.link,
                data,
            }))
        }
    }

    #[test]
    fn reads_legacy_pcap_frames_in_order() {
        let frames = vec![vec![1u8; 60], vec![2u8; 80], vec![]];
        let bytes = pcap_bytes(1, &frames);
        let mut source = PcapSource::new(Box::new(Cursor::new(bytes)), 65535).unwrap();

        for expected in &frames {
            let packet = source.next_packet().unwrap().unwrap();
            assert_eq!(packet.link, LinkLayer::Ethernet);
            assert_eq!(&packet.data, expected);
        }
        assert!(source.next_packet().unwrap().is_none());
    }

    #[test]
    fn rejects_unsupported_linktype() {
        let bytes = pcap_bytes(105, &[vec![0u8; 40]]);
        let mut source = PcapSource::new(Box::new(Cursor::new(bytes)), 65535).unwrap();
        assert!(matches!(
            source.next_packet(),
            Err(EngineError::UnsupportedLinktype(105))
        ));
    }

    #[test]
    fn rejects_garbage_input() {
        let garbage = b"definitely not a capture file".to_vec();
        assert!(matches!(
            PcapSource::new(Box::new(Cursor::new(garbage)), 65535),
            Err(EngineError::PcapError(_))
        ));
    }

    #[test]
    fn opens_capture_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.pcap");
        std::fs::write(&path, pcap_bytes(101, &[vec![0x45; 20]])).unwrap();

        let (mut source, stopper) = open_source(&CaptureSource::File(path), 65535).unwrap();
        assert_eq!(source.next_packet().unwrap().unwrap().link, LinkLayer::Raw);
        assert!(!stopper.is_stopped());
        stopper.stop();
        assert!(stopper.flag().load(Ordering::SeqCst));
    }

    #[test]
    fn missing_capture_file_is_an_io_error() {
        let err = open_source(&CaptureSource::File("/nonexistent/in.pcap".into()), 65535)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::IoError(_)));
    }

    #[test]
    fn missing_capture_tool_fails_to_spawn() {
        let source = CaptureSource::Live {
            interface: Some("lo".to_string()),
            tool: "/nonexistent/capture-tool".to_string(),
        };
        assert!(matches!(
            open_source(&source, 65535).err().unwrap(),
            EngineError::SpawnFailed(_)
        ));
    }

    #[test]
    fn capture_command_line() {
        let cmd = capture_command("tcpdump", Some("eth0"), 1500);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-i", "eth0", "-U", "-n", "-s", "1500", "-w", "-", "tcp"]
        );
    }

    #[test]
    fn source_can_move_to_the_capture_thread() {
        fn assert_send<T: Send>() {}
        assert_send::<PcapSource>();
    }

    #[test]
    fn reads_pcapng_enhanced_packets() {
        let frames = vec![vec![0x45u8; 21], vec![7u8; 64]];
        let bytes = pcapng_bytes(1, &frames);
        let mut source = PcapSource::new(Box::new(Cursor::new(bytes)), 65535).unwrap();
        for expected in &frames {
            let packet = source.next_packet().unwrap().unwrap();
            assert_eq!(packet.link, LinkLayer::Ethernet);
            assert_eq!(&packet.data, expected);
        }
        assert!(source.next_packet().unwrap().is_none());
    }

    #[test]
    fn header_split_across_short_reads() {
        let frames = vec![vec![3u8; 100]];
        for bytes in [pcap_bytes(1, &frames), pcapng_bytes(1, &frames)] {
            let input = Trickle {
                data: Cursor::new(bytes),
                chunk: 3,
            };
            let mut source = PcapSource::new(Box::new(input), 65535).unwrap();
            assert_eq!(source.next_packet().unwrap().unwrap().data, frames[0]);
            assert!(source.next_packet().unwrap().is_none());
        }
    }

    #[test]
    fn full_snaplen_frame_is_read() {
        let frames = vec![vec![0xabu8; 65535], vec![1u8; 60]];
        // a small snaplen starts with a smaller buffer that has to grow
        for snaplen in [65535, 1500] {
            let bytes = pcap_bytes(1, &frames);
            let mut source = PcapSource::new(Box::new(Cursor::new(bytes)), snaplen).unwrap();
            assert_eq!(source.next_packet().unwrap().unwrap().data.len(), 65535);
            assert_eq!(source.next_packet().unwrap().unwrap().data, frames[1]);
            assert!(source.next_packet().unwrap().is_none());
        }
    }

    #[test]
    fn buffer_follows_snaplen() {
        assert_eq!(reader_capacity(1500), READER_CAPACITY);
        assert_eq!(reader_capacity(262144), 262144 + BLOCK_OVERHEAD);
    }

    #[test]
    fn truncated_tail_ends_the_input() {
        let frames = vec![vec![1u8; 60], vec![2u8; 80]];
        let mut bytes = pcap_bytes(1, &frames);
        bytes.truncate(bytes.len() - 30);
        let mut source = PcapSource::new(Box::new(Cursor::new(bytes)), 65535).unwrap();
        assert_eq!(source.next_packet().unwrap().unwrap().data, frames[0]);
        assert!(source.next_packet().unwrap().is_none());
        assert!(source.next_packet().unwrap().is_none());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            PcapSource::new(Box::new(Cursor::new(Vec::new())), 65535),
            Err(EngineError::PcapError(_))
        ));
    }
}
