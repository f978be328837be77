use chrono::Utc;
use pcap_parser::LegacyPcapReader;
use pcap_parser::PcapBlockOwned;
use pcap_parser::PcapError;
use pcap_parser::PcapNGReader;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pnet::datalink;
use pnet::datalink::Channel::Ethernet;
use pnet::datalink::DataLinkReceiver;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use tracing::warn;

use crate::error::PktforgeError;
use crate::layer::RawBuffer;
use crate::utils::find_interface_by_name;

const PCAP_BUFF_SIZE: usize = 65536;
const LINKTYPE_ETHERNET: i32 = 1;

const MAGIC_MICRO: u32 = 0xa1b2c3d4;
const MAGIC_MICRO_SWAPPED: u32 = 0xd4c3b2a1;
const MAGIC_NANO: u32 = 0xa1b23c4d;
const MAGIC_NANO_SWAPPED: u32 = 0x4d3cb2a1;
const MAGIC_PCAPNG: u32 = 0x0a0d0d0a;

/// Capture time of a frame, split like `struct timeval`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FrameTimestamp {
    pub seconds: i64,
    pub microseconds: i64,
}

impl FrameTimestamp {
    pub fn new(seconds: i64, microseconds: i64) -> FrameTimestamp {
        FrameTimestamp {
            seconds,
            microseconds,
        }
    }
    /// Seconds elapsed since `anchor`. The microsecond difference may be
    /// negative, it is not borrowed from the seconds field first.
    pub fn relative_to(&self, anchor: &FrameTimestamp) -> f64 {
        (self.seconds - anchor.seconds) as f64
            + (self.microseconds - anchor.microseconds) as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub timestamp: FrameTimestamp,
    /// Starts at the Ethernet header.
    pub data: RawBuffer,
}

impl Frame {
    pub fn new(timestamp: FrameTimestamp, data: Vec<u8>) -> Frame {
        Frame {
            timestamp,
            data: RawBuffer::from(data),
        }
    }
}

/// Sequential supplier of captured frames. `Ok(None)` marks the end.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, PktforgeError>;
}

/// Replays frames held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> MemorySource {
        MemorySource {
            frames: frames.into(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, PktforgeError> {
        Ok(self.frames.pop_front())
    }
}

enum PcapReader<R: Read> {
    Legacy(LegacyPcapReader<BufReader<R>>),
    Ng(PcapNGReader<BufReader<R>>),
}

/// Legacy pcap (micro or nanosecond, either byte order) or pcapng file.
pub struct PcapFileSource<R: Read> {
    reader: PcapReader<R>,
    nanosecond: bool,
    link_type: i32,
    frames: u64,
}

impl PcapFileSource<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<PcapFileSource<File>, PktforgeError> {
        let path = path.as_ref();
        let open_failure = |e: String| PktforgeError::SourceOpenFailure {
            path: path.display().to_string(),
            e,
        };
        let file = File::open(path).map_err(|e| open_failure(e.to_string()))?;
        PcapFileSource::from_reader(file).map_err(|e| match e {
            PktforgeError::SourceOpenFailure { e, .. } => open_failure(e),
            e => e,
        })
    }
}

impl<R: Read> PcapFileSource<R> {
    pub fn from_reader(source: R) -> Result<PcapFileSource<R>, PktforgeError> {
        let open_failure = |e: String| PktforgeError::SourceOpenFailure {
            path: String::from("<reader>"),
            e,
        };
        // the header readers parse from a single read, so the magic is peeked, not consumed
        let mut buffered = BufReader::with_capacity(PCAP_BUFF_SIZE, source);
        let magic = {
            let head = buffered
                .fill_buf()
                .map_err(|e| open_failure(format!("can not read the capture magic: {}", e)))?;
            match head.get(..4) {
                Some(m) => u32::from_le_bytes([m[0], m[1], m[2], m[3]]),
                None => {
                    return Err(open_failure(format!(
                        "capture too short for a magic number: {} bytes",
                        head.len()
                    )));
                }
            }
        };

        let (reader, nanosecond) = match magic {
            MAGIC_MICRO | MAGIC_MICRO_SWAPPED | MAGIC_NANO | MAGIC_NANO_SWAPPED => {
                let nanosecond = matches!(magic, MAGIC_NANO | MAGIC_NANO_SWAPPED);
                let reader = LegacyPcapReader::new(PCAP_BUFF_SIZE, buffered)
                    .map_err(|e| open_failure(format!("legacy pcap header: {}", e)))?;
                (PcapReader::Legacy(reader), nanosecond)
            }
            MAGIC_PCAPNG => {
                let reader = PcapNGReader::new(PCAP_BUFF_SIZE, buffered)
                    .map_err(|e| open_failure(format!("pcapng header: {}", e)))?;
                (PcapReader::Ng(reader), false)
            }
            m => return Err(open_failure(format!("unknown capture magic 0x{:08x}", m))),
        };
        debug!("capture opened, nanosecond: {}", nanosecond);
        Ok(PcapFileSource {
            reader,
            nanosecond,
            link_type: LINKTYPE_ETHERNET,
            frames: 0,
        })
    }
    pub fn link_type(&self) -> i32 {
        self.link_type
    }
    pub fn frame_count(&self) -> u64 {
        self.frames
    }
    fn set_link_type(&mut self, link_type: i32) {
        if link_type != LINKTYPE_ETHERNET {
            warn!("link type {} is not ethernet, frames are read as ethernet", link_type);
        }
        self.link_type = link_type;
    }
}

fn parse_error<I: std::fmt::Debug>(e: PcapError<I>) -> PktforgeError {
    PktforgeError::CaptureParseError { e: e.to_string() }
}

impl<R: Read> FrameSource for PcapFileSource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, PktforgeError> {
        loop {
            let mut link_type = None;
            let frame = match &mut self.reader {
                PcapReader::Legacy(reader) => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::Legacy(packet) => {
                                let fraction = if self.nanosecond {
                                    packet.ts_usec as i64 / 1000
                                } else {
                                    packet.ts_usec as i64
                                };
                                let ts = FrameTimestamp::new(packet.ts_sec as i64, fraction);
                                Some(Frame::new(ts, packet.data.to_vec()))
                            }
                            PcapBlockOwned::LegacyHeader(header) => {
                                link_type = Some(header.network.0);
                                None
                            }
                            _ => None,
                        };
                        reader.consume(offset);
                        frame
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::Incomplete(_)) => {
                        reader.refill().map_err(parse_error)?;
                        continue;
                    }
                    Err(e) => return Err(parse_error(e)),
                },
                PcapReader::Ng(reader) => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                                link_type = Some(idb.linktype.0);
                                None
                            }
                            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                                // default if_tsresol, microseconds
                                let us = ((epb.ts_high as i64) << 32) | (epb.ts_low as i64);
                                let ts = FrameTimestamp::new(us / 1_000_000, us % 1_000_000);
                                Some(Frame::new(ts, epb.data.to_vec()))
                            }
                            PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                                Some(Frame::new(FrameTimestamp::default(), spb.data.to_vec()))
                            }
                            _ => None,
                        };
                        reader.consume(offset);
                        frame
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::Incomplete(_)) => {
                        reader.refill().map_err(parse_error)?;
                        continue;
                    }
                    Err(e) => return Err(parse_error(e)),
                },
            };
            if let Some(link_type) = link_type {
                self.set_link_type(link_type);
            }
            if let Some(frame) = frame {
                self.frames += 1;
                return Ok(Some(frame));
            }
        }
    }
}

/// Frames read live from an interface, stamped with the arrival wall clock.
pub struct LiveSource {
    rx: Box<dyn DataLinkReceiver>,
    max_frames: Option<u64>,
    frames: u64,
}

impl LiveSource {
    pub fn open(interface_name: &str, max_frames: Option<u64>) -> Result<LiveSource, PktforgeError> {
        let interface = match find_interface_by_name(interface_name) {
            Some(i) => i,
            None => {
                return Err(PktforgeError::CanNotFoundInterface {
                    i: interface_name.to_string(),
                });
            }
        };
        let rx = match datalink::channel(&interface, Default::default()) {
            Ok(Ethernet(_, rx)) => rx,
            Ok(_) => return Err(PktforgeError::CreateDatalinkChannelFailed),
            Err(e) => {
                return Err(PktforgeError::SourceOpenFailure {
                    path: interface_name.to_string(),
                    e: e.to_string(),
                });
            }
        };
        debug!("live capture on {}", interface.name);
        Ok(LiveSource {
            rx,
            max_frames,
            frames: 0,
        })
    }
}

impl FrameSource for LiveSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, PktforgeError> {
        if let Some(max) = self.max_frames {
            if self.frames >= max {
                return Ok(None);
            }
        }
        let data = self.rx.next()?;
        let now = Utc::now();
        let ts = FrameTimestamp::new(now.timestamp(), now.timestamp_subsec_micros() as i64);
        self.frames += 1;
        Ok(Some(Frame::new(ts, data.to_vec())))
    }
}
