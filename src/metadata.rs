//! Buffer metadata types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::ClockTime;

/// Flags indicating buffer properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Data is not contiguous with the previous buffer.
    pub const DISCONT: Self = Self(1 << 0);
    /// Buffer cannot be decoded on its own.
    pub const DELTA_UNIT: Self = Self(1 << 1);
    /// Buffer marks a gap in the stream; the payload carries no data.
    pub const GAP: Self = Self(1 << 2);
    /// Buffer is corrupted or incomplete.
    pub const CORRUPTED: Self = Self(1 << 3);
    /// Buffer must be decoded but not rendered.
    pub const DECODE_ONLY: Self = Self(1 << 4);

    /// Check if all bits of `flag` are set.
    #[inline]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    /// Combine flags using bitwise OR.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Clear a flag.
    #[inline]
    pub const fn remove(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }

    /// Raw bit representation.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Possible values for extra metadata fields.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// String value.
    String(String),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// Metadata associated with a buffer.
///
/// Contains timing information, offsets, flags, extensible key-value fields
/// and typed side-channel metas keyed by their Rust type.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Presentation timestamp.
    pub pts: ClockTime,

    /// Decode timestamp.
    pub dts: ClockTime,

    /// Duration of this buffer's content.
    pub duration: ClockTime,

    /// Media-specific offset (byte position or frame number) of the first unit.
    pub offset: Option<u64>,

    /// Offset one past the last unit.
    pub offset_end: Option<u64>,

    /// Buffer flags.
    pub flags: BufferFlags,

    /// Extra key-value metadata fields. Usually empty.
    pub extra: Vec<(String, MetadataValue)>,

    metas: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Metadata {
    /// Create new metadata with every timestamp unset.
    pub fn new() -> Self {
        Self {
            pts: ClockTime::NONE,
            dts: ClockTime::NONE,
            duration: ClockTime::NONE,
            ..Default::default()
        }
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: ClockTime) -> Self {
        self.pts = pts;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: ClockTime) -> Self {
        self.duration = duration;
        self
    }

    /// Set the offsets.
    pub fn with_offsets(mut self, offset: u64, offset_end: u64) -> Self {
        self.offset = Some(offset);
        self.offset_end = Some(offset_end);
        self
    }

    /// Add flags.
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }

    /// Add an extra field.
    pub fn with_extra(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.extra.push((key.into(), value));
        self
    }

    /// Get an extra field by key.
    pub fn get_extra(&self, key: &str) -> Option<&MetadataValue> {
        self.extra.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Attach a typed meta, replacing any previous meta of the same type.
    pub fn add_meta<M: Any + Send + Sync>(&mut self, meta: M) {
        self.metas.insert(TypeId::of::<M>(), Arc::new(meta));
    }

    /// Get the typed meta of type `M`.
    pub fn meta<M: Any + Send + Sync>(&self) -> Option<&M> {
        self.metas
            .get(&TypeId::of::<M>())
            .and_then(|m| m.downcast_ref::<M>())
    }

    /// Remove the typed meta of type `M`. Returns true if one was present.
    pub fn remove_meta<M: Any + Send + Sync>(&mut self) -> bool {
        self.metas.remove(&TypeId::of::<M>()).is_some()
    }

    /// Number of typed metas attached.
    pub fn n_metas(&self) -> usize {
        self.metas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RegionOfInterest {
        x: u32,
        y: u32,
    }

    #[test]
    fn test_metadata_builder() {
        let meta = Metadata::new()
            .with_pts(ClockTime::from_millis(100))
            .with_duration(ClockTime::from_millis(33))
            .with_flags(BufferFlags::DISCONT)
            .with_extra("source", MetadataValue::String("camera1".into()));

        assert_eq!(meta.pts, ClockTime::from_millis(100));
        assert!(meta.dts.is_none());
        assert!(meta.flags.contains(BufferFlags::DISCONT));
        assert!(!meta.flags.contains(BufferFlags::GAP));
        assert_eq!(
            meta.get_extra("source"),
            Some(&MetadataValue::String("camera1".into()))
        );
    }

    #[test]
    fn test_typed_meta() {
        let mut meta = Metadata::new();
        meta.add_meta(RegionOfInterest { x: 1, y: 2 });
        assert_eq!(meta.meta::<RegionOfInterest>(), Some(&RegionOfInterest { x: 1, y: 2 }));
        assert!(meta.meta::<u32>().is_none());

        let copy = meta.clone();
        assert!(meta.remove_meta::<RegionOfInterest>());
        assert_eq!(meta.n_metas(), 0);
        assert_eq!(copy.n_metas(), 1);
    }
}
