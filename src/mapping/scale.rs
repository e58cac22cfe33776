//! Musical scales and pitch quantization
//!
//! Pure functions over MIDI note numbers (A4 = note 69 = 440 Hz,
//! 12-tone equal temperament).

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest valid MIDI note
pub const MAX_NOTE: i32 = 127;

/// Octave span that can hold MIDI notes (C-1 is note 0, G9 is note 127)
pub const MIN_OCTAVE: i32 = -1;
pub const MAX_OCTAVE: i32 = 9;

/// Named scale templates (semitone offsets from the root)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Chromatic,
    Major,
    NaturalMinor,
    PentatonicMajor,
    PentatonicMinor,
    Dorian,
    Mixolydian,
    WholeTone,
    HarmonicMinor,
    /// No quantization, continuous Hz
    None,
}

impl Scale {
    pub const ALL: [Scale; 10] = [
        Scale::Chromatic,
        Scale::Major,
        Scale::NaturalMinor,
        Scale::PentatonicMajor,
        Scale::PentatonicMinor,
        Scale::Dorian,
        Scale::Mixolydian,
        Scale::WholeTone,
        Scale::HarmonicMinor,
        Scale::None,
    ];

    /// Semitone offsets from the root, ascending within one octave
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Scale::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            Scale::Major => &[0, 2, 4, 5, 7, 9, 11],
            Scale::NaturalMinor => &[0, 2, 3, 5, 7, 8, 10],
            Scale::PentatonicMajor => &[0, 2, 4, 7, 9],
            Scale::PentatonicMinor => &[0, 3, 5, 7, 10],
            Scale::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Scale::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Scale::WholeTone => &[0, 2, 4, 6, 8, 10],
            Scale::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Scale::None => &[],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scale::Chromatic => "chromatic",
            Scale::Major => "major",
            Scale::NaturalMinor => "natural_minor",
            Scale::PentatonicMajor => "pentatonic_major",
            Scale::PentatonicMinor => "pentatonic_minor",
            Scale::Dorian => "dorian",
            Scale::Mixolydian => "mixolydian",
            Scale::WholeTone => "whole_tone",
            Scale::HarmonicMinor => "harmonic_minor",
            Scale::None => "none",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scale {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_lowercase().as_str() {
            "chromatic" => Ok(Scale::Chromatic),
            "major" | "ionian" => Ok(Scale::Major),
            "minor" | "natural_minor" | "aeolian" => Ok(Scale::NaturalMinor),
            "pentatonic_major" | "major_pentatonic" => Ok(Scale::PentatonicMajor),
            "pentatonic" | "pentatonic_minor" | "minor_pentatonic" => Ok(Scale::PentatonicMinor),
            "dorian" => Ok(Scale::Dorian),
            "mixolydian" => Ok(Scale::Mixolydian),
            "whole_tone" | "wholetone" => Ok(Scale::WholeTone),
            "harmonic_minor" => Ok(Scale::HarmonicMinor),
            "none" => Ok(Scale::None),
            _ => Err(Error::UnknownScale(name.to_string())),
        }
    }
}

/// Convert a (fractional) MIDI note number to frequency in Hz
pub fn midi_to_freq(note: f64) -> f64 {
    440.0 * 2.0_f64.powf((note - 69.0) / 12.0)
}

/// Convert a frequency in Hz to its fractional MIDI note number
pub fn freq_to_midi(freq: f64) -> f64 {
    69.0 + 12.0 * (freq / 440.0).log2()
}

/// Every valid note of `scale` rooted at `root_note`'s pitch class, across
/// `octave_low..=octave_high`. Ascending, deduplicated, within 0..=127.
pub fn build_scale_notes(scale: Scale, root_note: i32, octave_low: i32, octave_high: i32) -> Vec<u8> {
    let root_pitch = root_note.rem_euclid(12);
    // Octaves outside this span hold no MIDI notes
    let octaves = octave_low.max(MIN_OCTAVE)..=octave_high.min(MAX_OCTAVE);
    let mut notes: Vec<u8> = octaves
        .flat_map(|octave| {
            scale
                .intervals()
                .iter()
                .map(move |&interval| root_pitch + interval as i32 + (octave + 1) * 12)
        })
        .filter(|note| (0..=MAX_NOTE).contains(note))
        .map(|note| note as u8)
        .collect();

    notes.sort_unstable();
    notes.dedup();
    notes
}

/// Snap a frequency to the nearest note in `notes`.
///
/// Ties go to the lowest candidate. An empty candidate list or a
/// non-positive frequency returns the input unchanged.
pub fn nearest_note_freq(freq: f64, notes: &[u8]) -> f64 {
    let Some(&first) = notes.first() else {
        return freq;
    };
    if freq <= 0.0 || !freq.is_finite() {
        return freq;
    }

    let midi = freq_to_midi(freq);
    let mut closest = first;
    let mut min_dist = (midi - first as f64).abs();

    for &note in notes {
        let dist = (midi - note as f64).abs();
        if dist < min_dist {
            min_dist = dist;
            closest = note;
        }
    }

    midi_to_freq(closest as f64)
}

/// Quantize a frequency to the nearest note of a scale
pub fn quantize_to_scale(freq: f64, scale: Scale, root_note: i32, octave_low: i32, octave_high: i32) -> f64 {
    if scale == Scale::None {
        return freq;
    }
    let notes = build_scale_notes(scale, root_note, octave_low, octave_high);
    nearest_note_freq(freq, &notes)
}
