//! Pad templates.
//!
//! A template describes a pad an element type can have: its name (or name
//! pattern for request pads, e.g. `src_%u`), direction, presence and the
//! caps it can handle.

use crate::caps::Caps;

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data (data flows out of the element).
    Src,
    /// Consumes data (data flows into the element).
    Sink,
}

impl PadDirection {
    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Src => Self::Sink,
            Self::Sink => Self::Src,
        }
    }
}

/// Whether a pad is always present or created dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is created with the element.
    Always,
    /// Pad appears at runtime (e.g. demuxers).
    Sometimes,
    /// Pad is created on request.
    Request,
}

/// Template for creating pads.
#[derive(Debug, Clone)]
pub struct PadTemplate {
    name: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Caps,
}

impl PadTemplate {
    /// Create a new pad template.
    pub fn new(
        name: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Always-present sink template.
    pub fn sink(caps: Caps) -> Self {
        Self::new("sink", PadDirection::Sink, PadPresence::Always, caps)
    }

    /// Always-present src template.
    pub fn src(caps: Caps) -> Self {
        Self::new("src", PadDirection::Src, PadPresence::Always, caps)
    }

    /// Name or name pattern.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction of pads created from this template.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Presence of pads created from this template.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Template caps.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Check if `pad_name` can be created from this template.
    ///
    /// Patterns support `%u` (unsigned number), `%d` (signed number) and
    /// `%s` (any string) as the final conversion.
    pub fn matches_name(&self, pad_name: &str) -> bool {
        match self.name.find('%') {
            None => self.name == pad_name,
            Some(idx) => {
                let (prefix, conv) = self.name.split_at(idx);
                let Some(rest) = pad_name.strip_prefix(prefix) else {
                    return false;
                };
                match conv {
                    "%u" => !rest.is_empty() && rest.parse::<u32>().is_ok(),
                    "%d" => !rest.is_empty() && rest.parse::<i32>().is_ok(),
                    "%s" => !rest.is_empty(),
                    _ => false,
                }
            }
        }
    }

    /// Produce a concrete pad name from the pattern using `index`.
    pub fn name_for_index(&self, index: u32) -> String {
        match self.name.find('%') {
            None => self.name.clone(),
            Some(idx) => format!("{}{}", &self.name[..idx], index),
        }
    }

    /// True if the name is a pattern rather than a fixed name.
    pub fn is_pattern(&self) -> bool {
        self.name.contains('%')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_patterns() {
        let t = PadTemplate::new("src_%u", PadDirection::Src, PadPresence::Request, Caps::new_any());
        assert!(t.is_pattern());
        assert!(t.matches_name("src_0"));
        assert!(t.matches_name("src_12"));
        assert!(!t.matches_name("src_"));
        assert!(!t.matches_name("src_x"));
        assert!(!t.matches_name("sink_0"));
        assert_eq!(t.name_for_index(3), "src_3");
    }

    #[test]
    fn test_fixed_name() {
        let t = PadTemplate::sink(Caps::new_any());
        assert!(t.matches_name("sink"));
        assert!(!t.matches_name("sink_0"));
        assert_eq!(t.direction(), PadDirection::Sink);
        assert_eq!(t.presence(), PadPresence::Always);
    }
}
