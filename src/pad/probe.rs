//! Pad probes: callbacks that observe or intercept data on a pad.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::event::Event;

use super::Pad;

/// Which data a probe is called for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProbeMask(u32);

impl ProbeMask {
    /// Nothing.
    pub const NONE: Self = Self(0);
    /// Buffers.
    pub const BUFFER: Self = Self(1 << 0);
    /// Events travelling downstream.
    pub const EVENT_DOWNSTREAM: Self = Self(1 << 1);
    /// Events travelling upstream.
    pub const EVENT_UPSTREAM: Self = Self(1 << 2);
    /// Everything.
    pub const ALL: Self = Self(0b111);

    /// Check if any bit is shared.
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Union of masks.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ProbeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// What a probe decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Let the data through.
    Pass,
    /// Drop the data; the sender sees success.
    Drop,
    /// Let the data through and remove this probe.
    Remove,
}

/// Data passed to a probe. Probes may modify it.
#[derive(Debug)]
pub enum ProbeInfo<'a> {
    /// A buffer.
    Buffer(&'a mut Buffer),
    /// An event.
    Event(&'a mut Event),
}

impl ProbeInfo<'_> {
    /// Mask bit this data matches on a pad.
    pub(crate) fn mask(&self, upstream: bool) -> ProbeMask {
        match self {
            ProbeInfo::Buffer(_) => ProbeMask::BUFFER,
            ProbeInfo::Event(_) if upstream => ProbeMask::EVENT_UPSTREAM,
            ProbeInfo::Event(_) => ProbeMask::EVENT_DOWNSTREAM,
        }
    }
}

/// Handle for removing a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeId(pub(crate) u64);

/// Probe callback.
pub type ProbeCallback = Arc<dyn Fn(&Pad, &mut ProbeInfo<'_>) -> ProbeReturn + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Probe {
    pub(crate) id: ProbeId,
    pub(crate) mask: ProbeMask,
    pub(crate) callback: ProbeCallback,
}
