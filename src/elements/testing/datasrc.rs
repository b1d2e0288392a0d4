//! DataSrc element for generating buffers from inline data.

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{Element, PropertyValue};
use crate::elements::base::{CreateResult, PushSrc};
use crate::error::{Error, FlowError, Result};
use crate::event::{Format, Segment};
use crate::metadata::Metadata;

/// Configuration of a [`DataSrc`].
#[derive(Debug, Clone)]
pub struct DataSrcSettings {
    /// Payload split into buffers. Empty means zero-filled buffers forever.
    pub data: Vec<u8>,
    /// Bytes per buffer.
    pub blocksize: usize,
    /// Start over at the end of `data` instead of ending the stream.
    pub repeat: bool,
    /// Duration of each buffer; buffers are timestamped when set.
    pub buffer_duration: ClockTime,
    /// Caps of the produced data.
    pub caps: Caps,
    /// Produce data only in PLAYING.
    pub is_live: bool,
}

impl Default for DataSrcSettings {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            blocksize: 4096,
            repeat: false,
            buffer_duration: ClockTime::NONE,
            caps: Caps::new_any(),
            is_live: false,
        }
    }
}

#[derive(Debug, Default)]
struct Position {
    offset: u64,
    index: u64,
}

/// A source that produces buffers from inline data.
///
/// Useful for testing and embedding small amounts of data directly in code.
/// Supports seeking in bytes, and in time when a buffer duration is set, and
/// serves pulling peers.
///
/// # Example
///
/// ```rust
/// use mediaflow::clock::ClockTime;
/// use mediaflow::elements::{DataSrc, SourceElement};
///
/// let src = SourceElement::new(
///     "src",
///     DataSrc::from_string("hello world")
///         .with_blocksize(4)
///         .with_buffer_duration(ClockTime::from_millis(10)),
/// );
/// assert!(src.static_pad("src").is_some());
/// ```
#[derive(Debug, Default)]
pub struct DataSrc {
    settings: Mutex<DataSrcSettings>,
    position: Mutex<Position>,
}

impl DataSrc {
    /// Create a DataSrc producing zero-filled buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a DataSrc from a byte vector.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::with_settings(DataSrcSettings {
            data,
            ..Default::default()
        })
    }

    /// Create a DataSrc from a string.
    pub fn from_string(data: &str) -> Self {
        Self::from_bytes(data.as_bytes().to_vec())
    }

    /// Create a DataSrc from settings.
    pub fn with_settings(settings: DataSrcSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            position: Mutex::new(Position::default()),
        }
    }

    /// Set the number of bytes per buffer.
    pub fn with_blocksize(self, blocksize: usize) -> Self {
        self.settings.lock().blocksize = blocksize.max(1);
        self
    }

    /// Loop over the data forever.
    pub fn repeat(self) -> Self {
        self.settings.lock().repeat = true;
        self
    }

    /// Timestamp buffers, each lasting `duration`.
    pub fn with_buffer_duration(self, duration: ClockTime) -> Self {
        self.settings.lock().buffer_duration = duration;
        self
    }

    /// Set the caps of the produced data.
    pub fn with_caps(self, caps: Caps) -> Self {
        self.settings.lock().caps = caps;
        self
    }

    /// Produce data only in PLAYING.
    pub fn live(self) -> Self {
        self.settings.lock().is_live = true;
        self
    }

    /// Byte offset of the next buffer.
    pub fn offset(&self) -> u64 {
        self.position.lock().offset
    }

    fn timestamp(metadata: Metadata, index: u64, duration: ClockTime) -> Metadata {
        if duration.is_none() {
            return metadata;
        }
        metadata
            .with_pts(ClockTime::from_nanos(index.saturating_mul(duration.nanos())))
            .with_duration(duration)
    }
}

impl PushSrc for DataSrc {
    fn caps(&self) -> Caps {
        self.settings.lock().caps.clone()
    }

    fn is_live(&self) -> bool {
        self.settings.lock().is_live
    }

    fn format(&self) -> Format {
        if self.settings.lock().buffer_duration.is_some() {
            Format::Time
        } else {
            Format::Bytes
        }
    }

    fn start(&self, _element: &Element) -> Result<()> {
        *self.position.lock() = Position::default();
        Ok(())
    }

    fn create(&self, _element: &Element) -> CreateResult {
        let settings = self.settings.lock();
        let mut position = self.position.lock();
        let blocksize = settings.blocksize.max(1);

        let data = if settings.data.is_empty() {
            vec![0; blocksize]
        } else {
            let len = settings.data.len() as u64;
            if position.offset >= len {
                if !settings.repeat {
                    return Ok(None);
                }
                position.offset = 0;
            }
            chunk_at(&settings.data, position.offset, blocksize).to_vec()
        };

        let size = data.len() as u64;
        let metadata = Metadata::new().with_offsets(position.offset, position.offset + size);
        let metadata = Self::timestamp(metadata, position.index, settings.buffer_duration);
        position.offset += size;
        position.index += 1;
        Ok(Some(Buffer::with_metadata(data, metadata)))
    }

    fn fill(&self, _element: &Element, offset: u64, size: u32) -> std::result::Result<Buffer, FlowError> {
        let settings = self.settings.lock();
        if settings.data.is_empty() {
            return Ok(Buffer::from_vec(vec![0; size as usize]));
        }
        if offset >= settings.data.len() as u64 {
            return Err(FlowError::Eos);
        }
        let chunk = chunk_at(&settings.data, offset, size as usize);
        let metadata = Metadata::new().with_offsets(offset, offset + chunk.len() as u64);
        Ok(Buffer::with_metadata(chunk.to_vec(), metadata))
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn do_seek(&self, segment: &mut Segment) -> bool {
        let settings = self.settings.lock();
        let blocksize = settings.blocksize.max(1) as u64;
        let mut position = self.position.lock();
        match segment.format {
            Format::Bytes => {
                position.offset = segment.start;
                position.index = segment.start / blocksize;
                true
            }
            Format::Time if settings.buffer_duration.is_some() => {
                let duration = settings.buffer_duration.nanos().max(1);
                position.index = segment.start / duration;
                position.offset = position.index.saturating_mul(blocksize);
                if !settings.data.is_empty() && settings.repeat {
                    position.offset %= settings.data.len() as u64;
                }
                true
            }
            _ => false,
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut settings = self.settings.lock();
        match name {
            "data" => settings.data = value.as_string().into_bytes(),
            "blocksize" => {
                let size = value.expect_with(name, "a positive integer", PropertyValue::as_u64)?;
                settings.blocksize = usize::try_from(size).unwrap_or(usize::MAX).max(1);
            }
            "repeat" => settings.repeat = value.expect_with(name, "a boolean", PropertyValue::as_bool)?,
            "buffer-duration" => {
                let nanos = value.expect_with(name, "nanoseconds", PropertyValue::as_i64)?;
                settings.buffer_duration = u64::try_from(nanos)
                    .map(ClockTime::from_nanos)
                    .unwrap_or(ClockTime::NONE);
            }
            "caps" => settings.caps = value.expect_with(name, "caps", PropertyValue::as_caps)?,
            "is-live" => settings.is_live = value.expect_with(name, "a boolean", PropertyValue::as_bool)?,
            _ => {
                return Err(Error::UnknownProperty {
                    element: element.name().to_string(),
                    property: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        let settings = self.settings.lock();
        match name {
            "data" => Some(String::from_utf8_lossy(&settings.data).into_owned().into()),
            "blocksize" => Some((settings.blocksize as u64).into()),
            "repeat" => Some(settings.repeat.into()),
            "buffer-duration" => Some(match settings.buffer_duration.to_option() {
                Some(duration) => duration.nanos().into(),
                None => (-1i64).into(),
            }),
            "caps" => Some(settings.caps.clone().into()),
            "is-live" => Some(settings.is_live.into()),
            _ => None,
        }
    }
}

/// At most `len` bytes of `data` starting at `offset`.
fn chunk_at(data: &[u8], offset: u64, len: usize) -> &[u8] {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
    let end = start.saturating_add(len).min(data.len());
    &data[start..end]
}
