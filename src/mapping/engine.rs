//! The mapping engine: packets in, sparse synth parameter values out

use super::rule::{MappingRule, TargetParameter};
use super::scale::{nearest_note_freq, Scale};
use super::smoothing::Smoother;
use crate::error::{Error, Result};
use crate::sources::DataPacket;
use crate::synth::Voice;
use std::collections::HashSet;
use tracing::debug;

/// A rule plus its materialized quantization notes
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MappingRule,
    notes: Option<Vec<u8>>,
}

impl CompiledRule {
    fn compile(rule: MappingRule) -> Result<Self> {
        rule.validate()?;
        let notes = rule
            .transform
            .quantize
            .as_ref()
            .filter(|q| q.scale != Scale::None)
            .map(|q| q.notes());
        Ok(Self { rule, notes })
    }

    fn matches(&self, packet: &DataPacket) -> bool {
        let source = &self.rule.source;
        self.rule.enabled
            && source.data_source_type == packet.source_type
            && source
                .entity_filter
                .as_ref()
                .map_or(true, |entity| *entity == packet.source_id)
    }
}

/// Parameter values produced for one packet. Only mapped parameters are set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MappedValues {
    values: [Option<f64>; TargetParameter::COUNT],
}

impl MappedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, parameter: TargetParameter) -> Option<f64> {
        self.values[parameter.index()]
    }

    pub fn set(&mut self, parameter: TargetParameter, value: f64) {
        self.values[parameter.index()] = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn len(&self) -> usize {
        self.values.iter().flatten().count()
    }

    /// Set parameters in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (TargetParameter, f64)> + '_ {
        TargetParameter::ALL
            .iter()
            .filter_map(|&p| self.get(p).map(|value| (p, value)))
    }

    /// Ramp every mapped parameter on `voice` over `smooth_time` seconds.
    /// Parameters that are not mapped are left alone.
    pub fn apply_to_voice(&self, voice: &mut Voice, smooth_time: f64) {
        for (parameter, value) in self.iter() {
            apply_parameter(voice, parameter, value, smooth_time);
        }
    }
}

/// Route one parameter to its voice setter
pub fn apply_parameter(voice: &mut Voice, parameter: TargetParameter, value: f64, smooth_time: f64) {
    match parameter {
        TargetParameter::Pitch => voice.set_pitch(value, smooth_time),
        TargetParameter::FilterFreq => voice.set_filter_freq(value, smooth_time),
        TargetParameter::FilterQ => voice.set_filter_q(value, smooth_time),
        TargetParameter::Amplitude => voice.set_gain(value, smooth_time),
        TargetParameter::Pan => voice.set_pan(value, smooth_time),
        TargetParameter::OscAGain => voice.set_osc_gain(0, value, smooth_time),
        TargetParameter::OscBGain => voice.set_osc_gain(1, value, smooth_time),
        TargetParameter::OscCGain => voice.set_osc_gain(2, value, smooth_time),
    }
}

/// Owns the rule list and per-entity smoothing state
#[derive(Debug, Default)]
pub struct MappingEngine {
    rules: Vec<CompiledRule>,
    smoother: Smoother,
}

impl MappingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine from a rule list, rejecting it whole if any rule is invalid
    pub fn with_rules(rules: Vec<MappingRule>) -> Result<Self> {
        let mut engine = Self::new();
        engine.set_mappings(rules)?;
        Ok(engine)
    }

    /// Replace every rule. On error the current rules stay in place.
    pub fn set_mappings(&mut self, rules: Vec<MappingRule>) -> Result<()> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if !seen.insert(rule.id.clone()) {
                return Err(duplicate(&rule.id));
            }
            compiled.push(CompiledRule::compile(rule)?);
        }

        debug!(count = compiled.len(), "mapping rules replaced");
        self.rules = compiled;
        Ok(())
    }

    /// Append a rule; it wins over earlier rules for the same parameter
    pub fn add_mapping(&mut self, rule: MappingRule) -> Result<()> {
        if self.rules.iter().any(|r| r.rule.id == rule.id) {
            return Err(duplicate(&rule.id));
        }
        let compiled = CompiledRule::compile(rule)?;
        debug!(rule = %compiled.rule.id, parameter = %compiled.rule.parameter(), "mapping rule added");
        self.rules.push(compiled);
        Ok(())
    }

    /// Remove a rule by id. Returns whether it existed.
    pub fn remove_mapping(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.rule.id != id);
        before != self.rules.len()
    }

    /// Current rules in evaluation order
    pub fn mappings(&self) -> Vec<MappingRule> {
        self.rules.iter().map(|r| r.rule.clone()).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Map one packet. Rules whose field is missing or not a finite number
    /// are skipped; later rules overwrite earlier ones targeting the same
    /// parameter.
    pub fn process(&mut self, packet: &DataPacket) -> MappedValues {
        let mut mapped = MappedValues::new();

        for compiled in &self.rules {
            if !compiled.matches(packet) {
                continue;
            }
            let rule = &compiled.rule;
            let Some(raw) = packet.value(&rule.source.field).filter(|v| v.is_finite()) else {
                continue;
            };

            let parameter = rule.parameter();
            let shaped = rule.transform.map(raw);
            if !shaped.is_finite() {
                continue;
            }
            let mut value = self
                .smoother
                .smooth(&packet.source_id, parameter, shaped, rule.transform.smoothing);

            if parameter == TargetParameter::Pitch {
                if let Some(notes) = &compiled.notes {
                    value = nearest_note_freq(value, notes);
                }
            }

            mapped.set(parameter, value);
        }

        mapped
    }

    /// Forget an entity's smoothing state. Call once, when it is gone.
    pub fn clear_entity(&mut self, entity_id: &str) -> bool {
        self.smoother.clear_entity(entity_id)
    }

    pub fn smoother(&self) -> &Smoother {
        &self.smoother
    }
}

fn duplicate(id: &str) -> Error {
    Error::InvalidRule {
        rule: id.to_string(),
        reason: "duplicate rule id".to_string(),
    }
}
