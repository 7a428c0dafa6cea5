//! Streaming decoder for the EventPipe `nettrace` format.
//!
//! A nettrace stream is a FastSerialization object stream: after the `Nettrace` magic and the
//! `!FastSerialization.1` header it carries one `Trace` object followed by any number of
//! `MetadataBlock`, `EventBlock`, `StackBlock` and `SPBlock` objects, terminated by a
//! `NullReference` tag or by the writer closing the stream.
//!
//! [`NettraceReader`] pulls from any [`std::io::Read`], decodes one block at a time and hands
//! out [`TraceEvent`]s in stream order. Metadata events are consumed internally to map
//! metadata ids onto provider names and event ids.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotslim::trace::nettrace::NettraceReader;
//!
//! let file = std::fs::File::open("session.nettrace")?;
//! let mut reader = NettraceReader::new(std::io::BufReader::new(file))?;
//! while let Some(event) = reader.next_event()? {
//!     println!("{} / {}", event.provider, event.event_id);
//! }
//! # Ok::<(), dotslim::Error>(())
//! ```

use std::{
    collections::{HashMap, VecDeque},
    io::{ErrorKind, Read},
    sync::Arc,
};

use uguid::Guid;

use crate::{file::parser::Parser, Result};

/// Magic bytes at the very start of a nettrace stream
pub const NETTRACE_MAGIC: &[u8; 8] = b"Nettrace";
/// FastSerialization header following the magic
pub const SERIALIZATION_HEADER: &str = "!FastSerialization.1";

const TAG_NULL_REFERENCE: u8 = 1;
const TAG_BEGIN_PRIVATE_OBJECT: u8 = 5;
const TAG_END_OBJECT: u8 = 6;

const TRACE_PAYLOAD_SIZE: usize = 48;
const MAX_BLOCK_SIZE: usize = 256 * 1024 * 1024;

/// Fixed size of an uncompressed (V4) event header
pub const EVENT_HEADER_SIZE: usize = 80;

/// Compressed header flag bits
mod header_flags {
    pub const METADATA_ID: u8 = 1 << 0;
    pub const CAPTURE_THREAD_AND_SEQUENCE: u8 = 1 << 1;
    pub const THREAD_ID: u8 = 1 << 2;
    pub const STACK_ID: u8 = 1 << 3;
    pub const ACTIVITY_ID: u8 = 1 << 4;
    pub const RELATED_ACTIVITY_ID: u8 = 1 << 5;
    pub const SORTED: u8 = 1 << 6;
    pub const DATA_LENGTH: u8 = 1 << 7;
}

/// Contents of the `Trace` object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceInfo {
    /// UTC wall clock at session start, as `SYSTEMTIME` fields
    pub sync_time: [u16; 8],
    /// QPC value matching `sync_time`
    pub sync_time_qpc: i64,
    /// QPC ticks per second
    pub qpc_frequency: i64,
    /// Pointer size of the traced process
    pub pointer_size: i32,
    /// Process id of the traced process
    pub process_id: i32,
    /// Logical processor count
    pub processor_count: i32,
    /// Expected CPU sampling rate
    pub sampling_rate: i32,
}

/// Description of an event kind, delivered through a `MetadataBlock`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventMetadata {
    /// Id referenced by event headers
    pub id: u32,
    /// Provider that emits the event
    pub provider: String,
    /// Event id within the provider
    pub event_id: u32,
    /// Event name, often empty for manifest based providers
    pub name: String,
    /// Keyword mask
    pub keywords: u64,
    /// Event version
    pub version: u32,
    /// Verbosity level
    pub level: u32,
}

/// One decoded event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    /// Metadata the event refers to
    pub metadata: Arc<EventMetadata>,
    /// Provider name, copied from the metadata
    pub provider: String,
    /// Event id, copied from the metadata
    pub event_id: u32,
    /// Sequence number within the emitting thread
    pub sequence: u32,
    /// OS thread id
    pub thread_id: u64,
    /// Processor the event was captured on
    pub processor: u32,
    /// Id into the stack block, 0 when none
    pub stack_id: u32,
    /// QPC timestamp
    pub timestamp: i64,
    /// Activity id
    pub activity_id: Guid,
    /// Related activity id
    pub related_activity_id: Guid,
    /// Event payload
    pub payload: Vec<u8>,
}

/// Counters over everything the reader decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Objects read from the stream
    pub objects: u64,
    /// Event blocks decoded
    pub event_blocks: u64,
    /// Metadata entries registered
    pub metadata: u64,
    /// Events handed out
    pub events: u64,
    /// Stack and sequence point blocks skipped
    pub skipped_blocks: u64,
    /// Bytes consumed from the stream
    pub bytes: u64,
}

/// Header fields carried from one event to the next inside a block.
#[derive(Clone, Default)]
struct HeaderState {
    metadata_id: u32,
    sequence: u32,
    thread_id: u64,
    capture_thread_id: u64,
    processor: u32,
    stack_id: u32,
    timestamp: i64,
    activity_id: [u8; 16],
    related_activity_id: [u8; 16],
    payload_size: u32,
}

enum BlockKind {
    Event,
    Metadata,
    Skipped,
}

/// Pull decoder over a nettrace stream.
pub struct NettraceReader<R: Read> {
    reader: R,
    position: u64,
    info: Option<TraceInfo>,
    metadata: HashMap<u32, Arc<EventMetadata>>,
    pending: VecDeque<TraceEvent>,
    finished: bool,
    stats: ReaderStats,
}

impl<R: Read> NettraceReader<R> {
    /// Validate the stream preamble and return a reader positioned at the first object.
    ///
    /// # Errors
    /// Returns an error if the magic or serialization header does not match.
    pub fn new(reader: R) -> Result<NettraceReader<R>> {
        let mut reader = NettraceReader {
            reader,
            position: 0,
            info: None,
            metadata: HashMap::new(),
            pending: VecDeque::new(),
            finished: false,
            stats: ReaderStats::default(),
        };

        let magic = reader.read_array::<8>()?;
        if &magic != NETTRACE_MAGIC {
            return Err(malformed_error!("Stream does not start with the nettrace magic"));
        }

        let header_length = reader.read_i32()?;
        if header_length != SERIALIZATION_HEADER.len() as i32 {
            return Err(malformed_error!(
                "Unexpected serialization header length - {}",
                header_length
            ));
        }

        let header = reader.read_vec(SERIALIZATION_HEADER.len())?;
        if header != SERIALIZATION_HEADER.as_bytes() {
            return Err(malformed_error!("Unsupported serialization header"));
        }

        Ok(reader)
    }

    /// The `Trace` object, once it has been read
    #[must_use]
    pub fn info(&self) -> Option<&TraceInfo> {
        self.info.as_ref()
    }

    /// Decoder counters
    #[must_use]
    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Metadata registered under `id`
    #[must_use]
    pub fn metadata(&self, id: u32) -> Option<&EventMetadata> {
        self.metadata.get(&id).map(AsRef::as_ref)
    }

    /// Next event in stream order, or `None` once the stream ended cleanly.
    ///
    /// The stream ends cleanly at a `NullReference` tag or when the writer closes it between
    /// two objects. Running out of data inside an object is an error.
    ///
    /// # Errors
    /// Returns an error on I/O failure, truncation or malformed content.
    pub fn next_event(&mut self) -> Result<Option<TraceEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                self.stats.events += 1;
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }

            self.read_object()?;
        }
    }

    fn read_object(&mut self) -> Result<()> {
        let Some(tag) = self.read_tag_or_eof()? else {
            self.finished = true;
            return Ok(());
        };

        match tag {
            TAG_NULL_REFERENCE => {
                self.finished = true;
                return Ok(());
            }
            TAG_BEGIN_PRIVATE_OBJECT => {}
            other => {
                return Err(malformed_error!(
                    "Expected an object at stream offset {} - tag {}",
                    self.position - 1,
                    other
                ))
            }
        }

        let name = self.read_type_descriptor()?;
        match name.as_str() {
            "Trace" => {
                let payload = self.read_vec(TRACE_PAYLOAD_SIZE)?;
                self.info = Some(parse_trace_info(&payload)?);
            }
            "EventBlock" => self.read_block(BlockKind::Event)?,
            "MetadataBlock" => self.read_block(BlockKind::Metadata)?,
            "StackBlock" | "SPBlock" => self.read_block(BlockKind::Skipped)?,
            other => {
                return Err(malformed_error!("Unknown nettrace object type - {}", other));
            }
        }

        self.expect_tag(TAG_END_OBJECT)?;
        self.stats.objects += 1;
        Ok(())
    }

    fn read_type_descriptor(&mut self) -> Result<String> {
        self.expect_tag(TAG_BEGIN_PRIVATE_OBJECT)?;
        self.expect_tag(TAG_NULL_REFERENCE)?;

        let _version = self.read_i32()?;
        let _min_reader_version = self.read_i32()?;
        let name_length = self.read_i32()?;
        if !(0..=256).contains(&name_length) {
            return Err(malformed_error!("Invalid type name length - {}", name_length));
        }

        let name = self.read_vec(name_length as usize)?;
        self.expect_tag(TAG_END_OBJECT)?;

        String::from_utf8(name).map_err(|_| malformed_error!("Type name is not valid UTF-8"))
    }

    fn read_block(&mut self, kind: BlockKind) -> Result<()> {
        let size = self.read_i32()?;
        if size < 0 || size as usize > MAX_BLOCK_SIZE {
            return Err(malformed_error!("Invalid block size - {}", size));
        }

        let padding = (4 - (self.position % 4)) % 4;
        self.read_vec(padding as usize)?;

        let block = self.read_vec(size as usize)?;
        match kind {
            BlockKind::Event => {
                self.stats.event_blocks += 1;
                self.decode_events(&block, false)
            }
            BlockKind::Metadata => self.decode_events(&block, true),
            BlockKind::Skipped => {
                self.stats.skipped_blocks += 1;
                Ok(())
            }
        }
    }

    fn decode_events(&mut self, block: &[u8], is_metadata: bool) -> Result<()> {
        let mut parser = Parser::new(block);

        let header_size = parser.read_le::<u16>()? as usize;
        let flags = parser.read_le::<u16>()?;
        if header_size < 4 {
            return Err(malformed_error!("Block header too small - {}", header_size));
        }
        parser.seek(header_size)?;

        let compressed = flags & 1 != 0;
        let mut state = HeaderState::default();

        while parser.has_more_data() {
            if compressed {
                read_compressed_header(&mut parser, &mut state)?;
            } else {
                read_uncompressed_header(&mut parser, &mut state)?;
            }

            let payload = parser.read_bytes(state.payload_size as usize)?;

            if is_metadata {
                let metadata = parse_metadata(payload)?;
                self.metadata.insert(metadata.id, Arc::new(metadata));
                self.stats.metadata += 1;
            } else {
                let Some(metadata) = self.metadata.get(&state.metadata_id) else {
                    return Err(malformed_error!(
                        "Event references unknown metadata id {}",
                        state.metadata_id
                    ));
                };

                self.pending.push_back(TraceEvent {
                    metadata: metadata.clone(),
                    provider: metadata.provider.clone(),
                    event_id: metadata.event_id,
                    sequence: state.sequence,
                    thread_id: state.thread_id,
                    processor: state.processor,
                    stack_id: state.stack_id,
                    timestamp: state.timestamp,
                    activity_id: Guid::from_bytes(state.activity_id),
                    related_activity_id: Guid::from_bytes(state.related_activity_id),
                    payload: payload.to_vec(),
                });
            }

            if !compressed {
                let padding = (4 - parser.pos() % 4) % 4;
                parser.advance_by(padding.min(parser.remaining()))?;
            }
        }

        Ok(())
    }

    fn read_tag_or_eof(&mut self) -> Result<Option<u8>> {
        let mut tag = [0u8; 1];
        loop {
            match self.reader.read(&mut tag) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.position += 1;
                    self.stats.bytes += 1;
                    return Ok(Some(tag[0]));
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn expect_tag(&mut self, expected: u8) -> Result<()> {
        let [tag] = self.read_array::<1>()?;
        if tag != expected {
            return Err(malformed_error!(
                "Expected tag {} at stream offset {} - found {}",
                expected,
                self.position - 1,
                tag
            ));
        }
        Ok(())
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buffer = [0u8; N];
        self.fill(&mut buffer)?;
        Ok(buffer)
    }

    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.fill(&mut buffer)?;
        Ok(buffer)
    }

    fn fill(&mut self, buffer: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buffer) {
            Ok(()) => {
                self.position += buffer.len() as u64;
                self.stats.bytes += buffer.len() as u64;
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => Err(malformed_error!(
                "Stream truncated at offset {} while reading {} bytes",
                self.position,
                buffer.len()
            )),
            Err(error) => Err(error.into()),
        }
    }
}

impl<R: Read> Iterator for NettraceReader<R> {
    type Item = Result<TraceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(error) => {
                self.finished = true;
                self.pending.clear();
                Some(Err(error))
            }
        }
    }
}

fn parse_trace_info(payload: &[u8]) -> Result<TraceInfo> {
    let mut parser = Parser::new(payload);

    let mut sync_time = [0u16; 8];
    for field in &mut sync_time {
        *field = parser.read_le::<u16>()?;
    }

    Ok(TraceInfo {
        sync_time,
        sync_time_qpc: parser.read_le::<i64>()?,
        qpc_frequency: parser.read_le::<i64>()?,
        pointer_size: parser.read_le::<i32>()?,
        process_id: parser.read_le::<i32>()?,
        processor_count: parser.read_le::<i32>()?,
        sampling_rate: parser.read_le::<i32>()?,
    })
}

fn read_uncompressed_header(parser: &mut Parser, state: &mut HeaderState) -> Result<()> {
    let event_size = parser.read_le::<i32>()?;
    state.metadata_id = parser.read_le::<u32>()? & 0x7FFF_FFFF;
    state.sequence = parser.read_le::<u32>()?;
    state.thread_id = parser.read_le::<u64>()?;
    state.capture_thread_id = parser.read_le::<u64>()?;
    state.processor = parser.read_le::<u32>()?;
    state.stack_id = parser.read_le::<u32>()?;
    state.timestamp = parser.read_le::<i64>()?;
    state.activity_id.copy_from_slice(parser.read_bytes(16)?);
    state.related_activity_id.copy_from_slice(parser.read_bytes(16)?);
    state.payload_size = parser.read_le::<u32>()?;

    if (event_size as i64) < (EVENT_HEADER_SIZE as i64 - 4) + i64::from(state.payload_size) {
        return Err(malformed_error!(
            "Event size {} does not cover payload of {} bytes",
            event_size,
            state.payload_size
        ));
    }

    Ok(())
}

fn read_compressed_header(parser: &mut Parser, state: &mut HeaderState) -> Result<()> {
    use header_flags::*;

    let flags = parser.read_le::<u8>()?;

    if flags & METADATA_ID != 0 {
        state.metadata_id = parser.read_var_u32()?;
    }
    if flags & CAPTURE_THREAD_AND_SEQUENCE != 0 {
        state.sequence = state
            .sequence
            .wrapping_add(parser.read_var_u32()?)
            .wrapping_add(1);
        state.capture_thread_id = parser.read_var_u64()?;
        state.processor = parser.read_var_u32()?;
    } else if state.metadata_id != 0 {
        state.sequence = state.sequence.wrapping_add(1);
    }
    if flags & THREAD_ID != 0 {
        state.thread_id = parser.read_var_u64()?;
    }
    if flags & STACK_ID != 0 {
        state.stack_id = parser.read_var_u32()?;
    }

    state.timestamp = state.timestamp.wrapping_add(parser.read_var_u64()? as i64);

    if flags & ACTIVITY_ID != 0 {
        state.activity_id.copy_from_slice(parser.read_bytes(16)?);
    }
    if flags & RELATED_ACTIVITY_ID != 0 {
        state.related_activity_id.copy_from_slice(parser.read_bytes(16)?);
    }
    let _sorted = flags & SORTED != 0;
    if flags & DATA_LENGTH != 0 {
        state.payload_size = parser.read_var_u32()?;
    }

    Ok(())
}

fn parse_metadata(payload: &[u8]) -> Result<EventMetadata> {
    let mut parser = Parser::new(payload);

    Ok(EventMetadata {
        id: parser.read_le::<u32>()?,
        provider: parser.read_utf16z()?,
        event_id: parser.read_le::<u32>()?,
        name: parser.read_utf16z()?,
        keywords: parser.read_le::<u64>()?,
        version: parser.read_le::<u32>()?,
        level: parser.read_le::<u32>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{NettraceWriter, TestEvent};

    fn events(data: &[u8]) -> Result<Vec<TraceEvent>> {
        NettraceReader::new(data)?.collect()
    }

    #[test]
    fn empty_stream() {
        let data = NettraceWriter::new().finish();
        let mut reader = NettraceReader::new(data.as_slice()).unwrap();

        assert!(reader.next_event().unwrap().is_none());
        assert_eq!(reader.info().unwrap().process_id, 4242);
        assert_eq!(reader.info().unwrap().pointer_size, 8);
    }

    #[test]
    fn closed_without_terminator() {
        let data = NettraceWriter::new()
            .event(TestEvent::new("Provider-A", 7, vec![1, 2, 3]))
            .finish_without_terminator();

        let events = events(&data).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, vec![1, 2, 3]);
    }

    #[test]
    fn uncompressed_and_compressed_agree() {
        let build = |compressed| {
            NettraceWriter::new()
                .compressed(compressed)
                .event(TestEvent::new("Provider-A", 7, vec![1, 2, 3]))
                .event(TestEvent::new("Provider-B", 9, vec![0xAA; 10]).thread(77))
                .event(TestEvent::new("Provider-A", 7, Vec::new()))
                .finish()
        };

        let plain = events(&build(false)).unwrap();
        let packed = events(&build(true)).unwrap();

        assert_eq!(plain.len(), 3);
        for (left, right) in plain.iter().zip(&packed) {
            assert_eq!(left.provider, right.provider);
            assert_eq!(left.event_id, right.event_id);
            assert_eq!(left.thread_id, right.thread_id);
            assert_eq!(left.timestamp, right.timestamp);
            assert_eq!(left.payload, right.payload);
        }
        assert_eq!(plain[1].provider, "Provider-B");
        assert_eq!(plain[1].thread_id, 77);
    }

    #[test]
    fn truncated_inside_object() {
        let data = NettraceWriter::new()
            .event(TestEvent::new("Provider-A", 7, vec![1, 2, 3]))
            .finish();

        for cut in [data.len() - 2, data.len() - 6, 40] {
            let result = events(&data[..cut]);
            assert!(result.is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn bad_magic() {
        assert!(NettraceReader::new(&b"Nettrack"[..]).is_err());
        assert!(NettraceReader::new(&b"Net"[..]).is_err());
    }

    #[test]
    fn unknown_metadata() {
        let data = NettraceWriter::new()
            .event(TestEvent::new("Provider-A", 7, vec![1]).metadata_id(99))
            .finish();

        assert!(events(&data).is_err());
    }

    #[test]
    fn metadata_is_registered() {
        let data = NettraceWriter::new()
            .event(TestEvent::new("Provider-A", 7, vec![1]))
            .finish();
        let mut reader = NettraceReader::new(data.as_slice()).unwrap();
        let event = reader.next_event().unwrap().unwrap();

        let metadata = reader.metadata(event.metadata.id).unwrap();
        assert_eq!(metadata.provider, "Provider-A");
        assert_eq!(metadata.event_id, 7);
        assert_eq!(reader.stats().metadata, 1);
    }
}
