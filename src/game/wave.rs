//! Wave Progress
//!
//! Counts waves against the session's configured [`WaveCount`].

use serde::{Deserialize, Serialize};

use crate::core::settings::WaveCount;

/// Result of advancing one wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveOutcome {
    /// Another wave begins.
    Continue {
        /// The wave now running (1-based).
        wave: u32,
    },
    /// The configured waves are exhausted.
    Exhausted {
        /// The wave counter after the final advance.
        wave: u32,
    },
}

/// Configured and current wave of the running game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveProgress {
    /// Configured wave count.
    pub configured: WaveCount,
    /// Waves advanced so far. Zero until the first advance.
    pub current: u32,
}

impl WaveProgress {
    /// Fresh progress for `configured` waves.
    pub fn new(configured: WaveCount) -> Self {
        Self { configured, current: 0 }
    }

    /// Back to wave zero, keeping the configuration.
    pub fn reset(&mut self) {
        self.current = 0;
    }

    /// Advance one wave.
    pub fn advance(&mut self) -> WaveOutcome {
        self.current = self.current.saturating_add(1);
        if self.configured.is_exceeded_by(self.current) {
            WaveOutcome::Exhausted { wave: self.current }
        } else {
            WaveOutcome::Continue { wave: self.current }
        }
    }

    /// Waves left before exhaustion. `None` when unbounded.
    pub fn remaining(&self) -> Option<u32> {
        match self.configured {
            WaveCount::Finite(n) => Some(n.get().saturating_sub(self.current)),
            WaveCount::Unbounded => None,
        }
    }
}

impl Default for WaveProgress {
    fn default() -> Self {
        Self::new(WaveCount::Unbounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_three_waves() {
        let mut progress = WaveProgress::new(WaveCount::finite(3).unwrap());
        assert_eq!(progress.advance(), WaveOutcome::Continue { wave: 1 });
        assert_eq!(progress.advance(), WaveOutcome::Continue { wave: 2 });
        assert_eq!(progress.remaining(), Some(1));
        assert_eq!(progress.advance(), WaveOutcome::Continue { wave: 3 });
        assert_eq!(progress.advance(), WaveOutcome::Exhausted { wave: 4 });
    }

    #[test]
    fn test_reset_keeps_configuration() {
        let mut progress = WaveProgress::new(WaveCount::finite(1).unwrap());
        progress.advance();
        progress.reset();
        assert_eq!(progress.current, 0);
        assert_eq!(progress.configured, WaveCount::finite(1).unwrap());
    }

    proptest! {
        #[test]
        fn prop_finite_exhausts_after_n(n in 1u32..200) {
            let mut progress = WaveProgress::new(WaveCount::finite(n).unwrap());
            for wave in 1..=n {
                prop_assert_eq!(progress.advance(), WaveOutcome::Continue { wave });
            }
            prop_assert_eq!(progress.advance(), WaveOutcome::Exhausted { wave: n + 1 });
        }

        #[test]
        fn prop_unbounded_never_exhausts(k in 1usize..500) {
            let mut progress = WaveProgress::default();
            for _ in 0..k {
                let exhausted = matches!(progress.advance(), WaveOutcome::Exhausted { .. });
                prop_assert!(!exhausted);
            }
            prop_assert_eq!(progress.remaining(), None);
        }
    }
}
