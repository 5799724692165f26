//! Interrupt arbitration.
//!
//! Devices drive one interrupt line each, at a priority level 1..=7. The
//! effective CPU IPL is the highest level with at least one asserter.
//! Acknowledge picks one asserter per level, round-robin, so devices
//! sharing a level are serviced fairly. Level 7 is edge-sensitive: it is
//! presented to the CPU once per rising edge, levels 1..=6 are
//! level-sensitive.

use crate::device::DeviceId;

/// Vector returned when an acknowledged level has no asserter left.
pub const SPURIOUS_VECTOR: u8 = 24;

/// Base of the autovector block; the autovector for level `n` is `24 + n`.
pub const AUTOVECTOR_BASE: u8 = 24;

/// Autovector delivered for `level` when the device supplies no vector.
#[must_use]
pub const fn autovector(level: u8) -> u8 {
    AUTOVECTOR_BASE + level
}

/// Per-level asserter sets with round-robin acknowledge state.
#[derive(Default)]
pub struct InterruptController {
    /// Asserting devices per level, in assertion order. Index 0 is unused.
    asserters: [Vec<DeviceId>; 8],
    /// Next round-robin pick per level.
    rr: [usize; 8],
    /// A device newly rose to level 7 and the edge has not been acknowledged.
    nmi_pending: bool,
}

impl InterruptController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `device`'s line at `level` (1..=7). Level 0 deasserts.
    /// Re-asserting the current level is a no-op.
    pub fn assert_line(&mut self, device: DeviceId, level: u8) {
        if level == 0 {
            self.deassert_line(device);
            return;
        }
        let level = usize::from(level.min(7));
        if self.asserters[level].contains(&device) {
            return;
        }
        // One line per device: moving level implies releasing the old one.
        self.remove(device);
        if level == 7 {
            self.nmi_pending = true;
        }
        self.asserters[level].push(device);
    }

    /// Release `device`'s line. Idempotent.
    pub fn deassert_line(&mut self, device: DeviceId) {
        self.remove(device);
    }

    fn remove(&mut self, device: DeviceId) {
        for level in 1..8 {
            if let Some(pos) = self.asserters[level].iter().position(|&d| d == device) {
                self.asserters[level].remove(pos);
                // Keep the rotation pointing after the last served device.
                if pos < self.rr[level] {
                    self.rr[level] -= 1;
                }
            }
        }
    }

    /// Level currently driven by `device`, 0 when deasserted.
    #[must_use]
    pub fn asserted_level(&self, device: DeviceId) -> u8 {
        for level in 1..8 {
            if self.asserters[level].contains(&device) {
                return level as u8;
            }
        }
        0
    }

    /// Effective IPL presented on the CPU's interrupt pins.
    ///
    /// Level 7 appears only while an unacknowledged edge is pending; a
    /// device holding its line at 7 does not re-interrupt.
    #[must_use]
    pub fn current_ipl(&self) -> u8 {
        if self.nmi_pending {
            return 7;
        }
        for level in (1..7).rev() {
            if !self.asserters[level].is_empty() {
                return level as u8;
            }
        }
        0
    }

    /// Pick the device to service an acknowledge at `level`.
    ///
    /// Returns `None` when nothing asserts `level` any more (the caller
    /// reports the spurious vector). Consumes a pending level-7 edge.
    pub fn acknowledge(&mut self, level: u8) -> Option<DeviceId> {
        if level == 7 {
            self.nmi_pending = false;
        }
        let level = usize::from(level);
        if level == 0 || level > 7 || self.asserters[level].is_empty() {
            return None;
        }
        let idx = self.rr[level] % self.asserters[level].len();
        self.rr[level] = idx + 1;
        Some(self.asserters[level][idx])
    }

    /// Release every line and forget acknowledge state.
    pub fn clear(&mut self) {
        for level in 0..8 {
            self.asserters[level].clear();
            self.rr[level] = 0;
        }
        self.nmi_pending = false;
    }
}
