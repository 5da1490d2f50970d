//! Port allocation for concurrently running desktops.
//!
//! Every desktop needs one port per [`PortKind`]. Ports are derived from a
//! per-kind base and the 1-based task index (`base + index - 1`), so tasks
//! with distinct indices never collide as long as the ranges of the
//! different kinds do not overlap. [`PortBases::validate`] checks the latter
//! for a given number of slots.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The ports a desktop exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Vnc,
    Api,
    Marionette,
    Socat,
}

impl PortKind {
    pub const ALL: [PortKind; 4] = [Self::Vnc, Self::Api, Self::Marionette, Self::Socat];
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vnc => "vnc",
            Self::Api => "api",
            Self::Marionette => "marionette",
            Self::Socat => "socat",
        };
        f.write_str(s)
    }
}

/// Base port for each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBases {
    pub vnc: u16,
    pub api: u16,
    pub marionette: u16,
    pub socat: u16,
}

impl Default for PortBases {
    fn default() -> Self {
        Self {
            vnc: 5900,
            api: 8000,
            marionette: 3838,
            socat: 2828,
        }
    }
}

impl PortBases {
    /// Base port for a kind.
    pub fn base(&self, kind: PortKind) -> u16 {
        match kind {
            PortKind::Vnc => self.vnc,
            PortKind::Api => self.api,
            PortKind::Marionette => self.marionette,
            PortKind::Socat => self.socat,
        }
    }

    /// Builder method to override one base.
    pub fn with_base(mut self, kind: PortKind, port: u16) -> Self {
        match kind {
            PortKind::Vnc => self.vnc = port,
            PortKind::Api => self.api = port,
            PortKind::Marionette => self.marionette = port,
            PortKind::Socat => self.socat = port,
        }
        self
    }

    /// Compute the assignment for a 1-based task index.
    pub fn allocate(&self, index: u32) -> Result<ResourceAssignment, CoreError> {
        self.allocate_shifted(index, 0)
    }

    /// Compute the assignment for `index`, moved up by `shift` slots.
    ///
    /// Used by the next-free conflict policy; `shift == 0` is `allocate`.
    pub fn allocate_shifted(
        &self,
        index: u32,
        shift: u32,
    ) -> Result<ResourceAssignment, CoreError> {
        if index == 0 {
            return Err(CoreError::InvalidIndex {
                index,
                reason: "task indices are 1-based".to_string(),
            });
        }
        let offset = (index - 1)
            .checked_add(shift)
            .ok_or_else(|| CoreError::InvalidIndex {
                index,
                reason: "offset overflow".to_string(),
            })?;

        let port = |kind: PortKind| -> Result<u16, CoreError> {
            u32::from(self.base(kind))
                .checked_add(offset)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| CoreError::InvalidIndex {
                    index,
                    reason: format!("{} port would exceed {}", kind, u16::MAX),
                })
        };

        Ok(ResourceAssignment {
            vnc: port(PortKind::Vnc)?,
            api: port(PortKind::Api)?,
            marionette: port(PortKind::Marionette)?,
            socat: port(PortKind::Socat)?,
        })
    }

    /// Check that `slots` consecutive indices fit in `u16` and that the
    /// ranges of different kinds never overlap.
    pub fn validate(&self, slots: u32) -> Result<(), CoreError> {
        if slots == 0 {
            return Ok(());
        }

        let mut ranges = Vec::with_capacity(PortKind::ALL.len());
        for kind in PortKind::ALL {
            let start = u32::from(self.base(kind));
            let end = start.saturating_add(slots - 1);
            if end > u32::from(u16::MAX) {
                return Err(CoreError::InvalidInput(format!(
                    "{} ports {}..={} exceed {}",
                    kind,
                    start,
                    end,
                    u16::MAX
                )));
            }
            ranges.push((kind, start, end));
        }

        for (i, (kind_a, start_a, end_a)) in ranges.iter().enumerate() {
            for (kind_b, start_b, end_b) in &ranges[i + 1..] {
                if start_a <= end_b && start_b <= end_a {
                    return Err(CoreError::PortRangeOverlap {
                        first: format!("{} {}..={}", kind_a, start_a, end_a),
                        second: format!("{} {}..={}", kind_b, start_b, end_b),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Ports assigned to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAssignment {
    pub vnc: u16,
    pub api: u16,
    pub marionette: u16,
    pub socat: u16,
}

impl ResourceAssignment {
    /// Port for one kind.
    pub fn port(&self, kind: PortKind) -> u16 {
        match kind {
            PortKind::Vnc => self.vnc,
            PortKind::Api => self.api,
            PortKind::Marionette => self.marionette,
            PortKind::Socat => self.socat,
        }
    }

    /// All ports in [`PortKind::ALL`] order.
    pub fn ports(&self) -> [u16; 4] {
        [self.vnc, self.api, self.marionette, self.socat]
    }
}

impl fmt::Display for ResourceAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vnc={} api={} marionette={} socat={}",
            self.vnc, self.api, self.marionette, self.socat
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_first_index_uses_bases() {
        let ports = PortBases::default().allocate(1).unwrap();
        assert_eq!(ports.vnc, 5900);
        assert_eq!(ports.api, 8000);
        assert_eq!(ports.marionette, 3838);
        assert_eq!(ports.socat, 2828);
    }

    #[test]
    fn test_index_offsets_every_kind() {
        let ports = PortBases::default().allocate(3).unwrap();
        assert_eq!(ports.ports(), [5902, 8002, 3840, 2830]);
        assert_eq!(ports.port(PortKind::Api), 8002);
    }

    #[test]
    fn test_zero_index_rejected() {
        let err = PortBases::default().allocate(0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidIndex { index: 0, .. }));
    }

    #[test]
    fn test_overflow_rejected() {
        let bases = PortBases::default().with_base(PortKind::Api, u16::MAX);
        assert!(bases.allocate(1).is_ok());
        assert!(bases.allocate(2).is_err());
    }

    #[test]
    fn test_shift_moves_all_kinds() {
        let bases = PortBases::default();
        let shifted = bases.allocate_shifted(2, 3).unwrap();
        assert_eq!(shifted, bases.allocate(5).unwrap());
    }

    #[test]
    fn test_validate_detects_overlap() {
        // socat 2828.. runs into marionette 3838 after 1010 slots
        let bases = PortBases::default();
        assert!(bases.validate(1010).is_ok());
        let err = bases.validate(1011).unwrap_err();
        assert!(matches!(err, CoreError::PortRangeOverlap { .. }));
    }

    #[test]
    fn test_validate_detects_same_base() {
        let bases = PortBases::default().with_base(PortKind::Socat, 5900);
        assert!(bases.validate(1).is_err());
    }

    proptest! {
        #[test]
        fn prop_concurrent_assignments_are_disjoint(n in 1u32..=50) {
            let bases = PortBases::default();
            prop_assert!(bases.validate(n).is_ok());

            let mut seen = HashSet::new();
            for index in 1..=n {
                let assignment = bases.allocate(index).unwrap();
                for port in assignment.ports() {
                    prop_assert!(seen.insert(port), "port {} handed out twice", port);
                }
            }
            prop_assert_eq!(seen.len(), (n as usize) * PortKind::ALL.len());
        }
    }
}
