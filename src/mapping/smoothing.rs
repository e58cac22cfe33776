//! Per-entity exponential smoothing state

use super::TargetParameter;
use std::collections::HashMap;

/// Last smoothed value per entity per parameter.
///
/// An entity's slot exists from its first smoothed observation until
/// [`Smoother::clear_entity`].
#[derive(Debug, Default)]
pub struct Smoother {
    entities: HashMap<String, [Option<f64>; TargetParameter::COUNT]>,
}

impl Smoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend `raw` into the running average for `(entity_id, parameter)`.
    ///
    /// `smoothing == 0` and non-finite values return `raw` untouched and
    /// leave the state alone. The first observation seeds the average with
    /// `raw` itself.
    pub fn smooth(&mut self, entity_id: &str, parameter: TargetParameter, raw: f64, smoothing: f64) -> f64 {
        if smoothing <= 0.0 || !raw.is_finite() {
            return raw;
        }

        if !self.entities.contains_key(entity_id) {
            self.entities
                .insert(entity_id.to_string(), [None; TargetParameter::COUNT]);
        }
        let Some(slots) = self.entities.get_mut(entity_id) else {
            return raw;
        };

        let slot = &mut slots[parameter.index()];
        let smoothed = match *slot {
            Some(previous) => smoothing * previous + (1.0 - smoothing) * raw,
            None => raw,
        };
        *slot = Some(smoothed);
        smoothed
    }

    /// Last smoothed value, if any
    pub fn get(&self, entity_id: &str, parameter: TargetParameter) -> Option<f64> {
        self.entities
            .get(entity_id)
            .and_then(|slots| slots[parameter.index()])
    }

    /// Drop all state for an entity. Returns whether any existed.
    pub fn clear_entity(&mut self, entity_id: &str) -> bool {
        self.entities.remove(entity_id).is_some()
    }

    pub fn has_entity(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    /// Number of entities with smoothing state
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const P: TargetParameter = TargetParameter::Pitch;

    #[test]
    fn test_zero_smoothing_is_passthrough() {
        let mut smoother = Smoother::new();
        for raw in [1.0, 500.0, -3.0, 42.0] {
            assert_eq!(smoother.smooth("a", P, raw, 0.0), raw);
        }
        assert!(!smoother.has_entity("a"));
    }

    #[test]
    fn test_first_observation_seeds_state() {
        let mut smoother = Smoother::new();
        assert_eq!(smoother.smooth("a", P, 440.0, 0.9), 440.0);
        assert_eq!(smoother.get("a", P), Some(440.0));
    }

    #[test]
    fn test_ema_update() {
        let mut smoother = Smoother::new();
        smoother.smooth("a", P, 100.0, 0.5);
        assert_abs_diff_eq!(smoother.smooth("a", P, 200.0, 0.5), 150.0);
        assert_abs_diff_eq!(smoother.smooth("a", P, 200.0, 0.5), 175.0);
    }

    #[test]
    fn test_high_smoothing_barely_moves() {
        let mut smoother = Smoother::new();
        smoother.smooth("a", P, 0.0, 0.999);
        let mut previous = 0.0;
        for _ in 0..10 {
            let value = smoother.smooth("a", P, 1000.0, 0.999);
            assert!(value - previous < 1.01);
            previous = value;
        }
        assert!(previous < 10.0);
    }

    #[test]
    fn test_parameters_and_entities_are_independent() {
        let mut smoother = Smoother::new();
        smoother.smooth("a", P, 100.0, 0.5);
        smoother.smooth("a", TargetParameter::Pan, -1.0, 0.5);
        smoother.smooth("b", P, 300.0, 0.5);

        assert_eq!(smoother.get("a", P), Some(100.0));
        assert_eq!(smoother.get("a", TargetParameter::Pan), Some(-1.0));
        assert_eq!(smoother.get("b", P), Some(300.0));
        assert_eq!(smoother.entity_count(), 2);
    }

    #[test]
    fn test_non_finite_values_are_not_stored() {
        let mut smoother = Smoother::new();
        smoother.smooth("a", P, 100.0, 0.5);
        assert!(smoother.smooth("a", P, f64::NAN, 0.5).is_nan());
        assert_eq!(smoother.get("a", P), Some(100.0));
        assert_abs_diff_eq!(smoother.smooth("a", P, 500.0, 0.5), 300.0);

        // Nor seeded from one
        smoother.smooth("b", P, f64::INFINITY, 0.5);
        assert!(!smoother.has_entity("b"));
    }

    #[test]
    fn test_clear_entity() {
        let mut smoother = Smoother::new();
        smoother.smooth("a", P, 100.0, 0.5);
        smoother.smooth("b", P, 100.0, 0.5);

        assert!(smoother.clear_entity("a"));
        assert!(!smoother.clear_entity("a"));
        assert!(!smoother.has_entity("a"));
        assert!(smoother.has_entity("b"));

        // A reused id starts fresh
        assert_eq!(smoother.smooth("a", P, 900.0, 0.5), 900.0);
    }
}
