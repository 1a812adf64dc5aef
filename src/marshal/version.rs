// Protocol version negotiation
//
// Every verb carries a monotonic 64-bit protocol version. A receiver outside
// its supported window answers invalid-version together with a version-hint
// back-channel entry advertising what it does support; the sender retries
// exactly once at the maximum common version when the windows intersect.

use serde::{Deserialize, Serialize};

/// Oldest protocol version this runtime still accepts
pub const LOWEST_SUPPORTED_VERSION: u64 = 2;

/// Newest protocol version this runtime speaks
pub const HIGHEST_SUPPORTED_VERSION: u64 = 3;

/// The version stamped on outbound calls before negotiation
pub const PROTOCOL_VERSION: u64 = HIGHEST_SUPPORTED_VERSION;

/// An inclusive window of supported protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionWindow {
    pub lowest: u64,
    pub highest: u64,
}

impl VersionWindow {
    pub const fn new(lowest: u64, highest: u64) -> Self {
        Self { lowest, highest }
    }

    /// Whether a version falls inside this window
    pub fn supports(&self, version: u64) -> bool {
        version >= self.lowest && version <= self.highest
    }

    /// The maximum version both windows support, if the windows intersect
    pub fn common(&self, other: &VersionWindow) -> Option<u64> {
        let candidate = self.highest.min(other.highest);
        if candidate >= self.lowest && candidate >= other.lowest {
            Some(candidate)
        } else {
            None
        }
    }
}

impl Default for VersionWindow {
    fn default() -> Self {
        Self {
            lowest: LOWEST_SUPPORTED_VERSION,
            highest: HIGHEST_SUPPORTED_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_matches_constants() {
        let window = VersionWindow::default();
        assert!(window.supports(LOWEST_SUPPORTED_VERSION));
        assert!(window.supports(HIGHEST_SUPPORTED_VERSION));
        assert!(!window.supports(LOWEST_SUPPORTED_VERSION - 1));
        assert!(!window.supports(HIGHEST_SUPPORTED_VERSION + 1));
    }

    #[test]
    fn test_common_picks_maximum_shared_version() {
        let a = VersionWindow::new(2, 5);
        let b = VersionWindow::new(3, 4);
        assert_eq!(a.common(&b), Some(4));
        assert_eq!(b.common(&a), Some(4));
    }

    #[test]
    fn test_disjoint_windows_have_no_common_version() {
        let old = VersionWindow::new(1, 2);
        let new = VersionWindow::new(3, 4);
        assert_eq!(old.common(&new), None);
        assert_eq!(new.common(&old), None);
    }

    #[test]
    fn test_touching_windows_negotiate_the_boundary() {
        let a = VersionWindow::new(1, 3);
        let b = VersionWindow::new(3, 6);
        assert_eq!(a.common(&b), Some(3));
    }
}
