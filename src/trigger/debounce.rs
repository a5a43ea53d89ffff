//! Key press debouncing

use std::time::{Duration, Instant};

use crate::trigger::{KeyEdge, ToggleEvent, TriggerEvent};

/// Rate limit measured from the last *accepted* activation
#[derive(Debug, Clone)]
pub struct CooldownGate {
    last_accepted: Option<Instant>,
    cooldown: Duration,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_accepted: None,
            cooldown,
        }
    }

    /// Accept `now` unless it falls inside the cooldown of the last accepted activation
    pub fn try_accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Turns raw key edges into toggle events
#[derive(Debug, Clone)]
pub struct TriggerDebouncer {
    key_code: u16,
    gate: CooldownGate,
}

impl TriggerDebouncer {
    pub fn new(key_code: u16, cooldown: Duration) -> Self {
        Self {
            key_code,
            gate: CooldownGate::new(cooldown),
        }
    }

    pub fn key_code(&self) -> u16 {
        self.key_code
    }

    pub fn cooldown(&self) -> Duration {
        self.gate.cooldown()
    }

    /// Feed one edge; yields a toggle for an accepted press of the trigger key
    pub fn process(&mut self, event: &TriggerEvent) -> Option<ToggleEvent> {
        if event.code != self.key_code || event.edge != KeyEdge::Press {
            return None;
        }

        if self.gate.try_accept(event.timestamp) {
            Some(ToggleEvent {
                timestamp: event.timestamp,
            })
        } else {
            tracing::debug!("Trigger press ignored (cooldown {:?})", self.gate.cooldown());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: u16 = 168;

    fn press(base: Instant, at_ms: u64) -> TriggerEvent {
        TriggerEvent {
            timestamp: base + Duration::from_millis(at_ms),
            code: KEY,
            edge: KeyEdge::Press,
        }
    }

    fn accepted_at(presses_ms: &[u64], cooldown: Duration) -> Vec<u64> {
        let base = Instant::now();
        let mut debouncer = TriggerDebouncer::new(KEY, cooldown);
        presses_ms
            .iter()
            .filter_map(|&t| debouncer.process(&press(base, t)))
            .map(|toggle| (toggle.timestamp - base).as_millis() as u64)
            .collect()
    }

    #[test]
    fn test_cooldown_sequence() {
        let accepted = accepted_at(&[0, 500, 1900, 2100, 4500], Duration::from_secs(2));
        assert_eq!(accepted, vec![0, 2100, 4500]);
    }

    #[test]
    fn test_cooldown_boundary_is_accepted() {
        let accepted = accepted_at(&[0, 2000], Duration::from_secs(2));
        assert_eq!(accepted, vec![0, 2000]);
    }

    #[test]
    fn test_other_keys_and_edges_are_ignored() {
        let base = Instant::now();
        let mut debouncer = TriggerDebouncer::new(KEY, Duration::from_secs(2));

        let other_key = TriggerEvent {
            timestamp: base,
            code: 30,
            edge: KeyEdge::Press,
        };
        let release = TriggerEvent {
            edge: KeyEdge::Release,
            ..press(base, 0)
        };
        let repeat = TriggerEvent {
            edge: KeyEdge::Repeat,
            ..press(base, 0)
        };

        assert!(debouncer.process(&other_key).is_none());
        assert!(debouncer.process(&release).is_none());
        assert!(debouncer.process(&repeat).is_none());

        // ignored edges do not consume the cooldown
        assert!(debouncer.process(&press(base, 10)).is_some());
    }

    #[test]
    fn test_zero_cooldown_accepts_every_press() {
        let accepted = accepted_at(&[0, 0, 1, 2], Duration::ZERO);
        assert_eq!(accepted.len(), 4);
    }

    proptest! {
        #[test]
        fn burst_inside_cooldown_yields_one_toggle(offsets in prop::collection::vec(0u64..2000, 1..50)) {
            let mut presses = offsets;
            presses.sort_unstable();
            let accepted = accepted_at(&presses, Duration::from_secs(2));
            prop_assert_eq!(accepted.len(), 1);
        }

        #[test]
        fn accepted_toggles_respect_cooldown(offsets in prop::collection::vec(0u64..20_000, 1..100)) {
            let mut presses = offsets;
            presses.sort_unstable();
            let accepted = accepted_at(&presses, Duration::from_secs(2));
            for pair in accepted.windows(2) {
                prop_assert!(pair[1] - pair[0] >= 2000);
            }
        }
    }
}
