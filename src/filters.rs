//! Composable audio-effect state and its serialization to a node's filter
//! payload (§4.4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single 15-band equalizer entry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    pub band: u8,
    pub gain: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Karaoke {
    pub level: f64,
    pub mono_level: f64,
    pub filter_band: f64,
    pub filter_width: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timescale {
    pub speed: f64,
    pub pitch: f64,
    pub rate: f64,
}

impl Default for Timescale {
    fn default() -> Timescale {
        Timescale {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vibrato {
    pub frequency: f64,
    pub depth: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub rotation_hz: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub sin_offset: f64,
    pub sin_scale: f64,
    pub cos_offset: f64,
    pub cos_scale: f64,
    pub tan_offset: f64,
    pub tan_scale: f64,
    pub offset: f64,
    pub scale: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reverb {
    pub delay: f64,
    pub decay: f64,
}

/// A named effect toggled on/off as a side effect of applying a preset
/// (§4.4); tracked separately from the underlying filter blocks so a host
/// application can display "what's currently on" without re-deriving it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterEffect {
    BassBoost,
    Nightcore,
    Slowmo,
    EightD,
    Vaporwave,
    Soft,
    Tv,
    Party,
    Chipmunk,
    China,
    Daycore,
    Doubletime,
    Demon,
    Earrape,
    Electronic,
    Radio,
    Tremolo,
    TrebleBass,
    Pop,
    Distort,
    DarthVader,
}

const ALL_EFFECTS: &[FilterEffect] = &[
    FilterEffect::BassBoost,
    FilterEffect::Nightcore,
    FilterEffect::Slowmo,
    FilterEffect::EightD,
    FilterEffect::Vaporwave,
    FilterEffect::Soft,
    FilterEffect::Tv,
    FilterEffect::Party,
    FilterEffect::Chipmunk,
    FilterEffect::China,
    FilterEffect::Daycore,
    FilterEffect::Doubletime,
    FilterEffect::Demon,
    FilterEffect::Earrape,
    FilterEffect::Electronic,
    FilterEffect::Radio,
    FilterEffect::Tremolo,
    FilterEffect::TrebleBass,
    FilterEffect::Pop,
    FilterEffect::Distort,
    FilterEffect::DarthVader,
];

/// The non-null subset of filter blocks, serialized verbatim as the node's
/// `filters` patch body.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FilterPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Vec<EqualizerBand>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverb: Option<Reverb>,
}

/// The full filter stack for one player.
#[derive(Clone, Debug, Default)]
pub struct FilterStack {
    pub volume: Option<f64>,
    pub equalizer: Option<Vec<EqualizerBand>>,
    pub karaoke: Option<Karaoke>,
    pub timescale: Option<Timescale>,
    pub vibrato: Option<Vibrato>,
    pub rotation: Option<Rotation>,
    pub distortion: Option<Distortion>,
    pub reverb: Option<Reverb>,
    active_effects: HashMap<FilterEffect, bool>,
}

impl FilterStack {
    pub fn new() -> FilterStack {
        FilterStack::default()
    }

    /// Rebuilds a stack from a snapshotted payload. Active-effect flags are
    /// not persisted on the wire, so they come back empty; the blocks
    /// themselves round-trip exactly.
    pub fn from_payload(payload: FilterPayload) -> FilterStack {
        FilterStack {
            volume: payload.volume,
            equalizer: payload.equalizer,
            karaoke: payload.karaoke,
            timescale: payload.timescale,
            vibrato: payload.vibrato,
            rotation: payload.rotation,
            distortion: payload.distortion,
            reverb: payload.reverb,
            active_effects: HashMap::new(),
        }
    }

    /// Non-null subset as a payload ready for `update_player`'s `filters`
    /// field.
    pub fn to_payload(&self) -> FilterPayload {
        FilterPayload {
            volume: self.volume,
            equalizer: self.equalizer.clone(),
            karaoke: self.karaoke.clone(),
            timescale: self.timescale,
            vibrato: self.vibrato,
            rotation: self.rotation,
            distortion: self.distortion,
            reverb: self.reverb,
        }
    }

    /// The derived `filtersStatus` map: every known effect name mapped to
    /// whether it is currently active.
    pub fn filters_status(&self) -> HashMap<FilterEffect, bool> {
        ALL_EFFECTS
            .iter()
            .map(|effect| (*effect, self.active_effects.get(effect).copied().unwrap_or(false)))
            .collect()
    }

    /// Resets every block and active-effect flag.
    pub fn clear(&mut self) {
        *self = FilterStack::default();
    }

    fn set_active(&mut self, effect: FilterEffect) {
        self.active_effects.clear();
        self.active_effects.insert(effect, true);
    }

    /// `bassBoost(level)`, `level` clamped to `[-3, 3]` (§4.4).
    pub fn bass_boost(&mut self, level: i8) {
        let level = level.clamp(-3, 3) as f64;
        let gain = 0.1 * level;
        self.equalizer = Some(
            (0..3)
                .map(|band| EqualizerBand {
                    band,
                    gain: gain.clamp(-0.25, 1.0),
                })
                .collect(),
        );
        self.set_active(FilterEffect::BassBoost);
    }

    pub fn nightcore(&mut self) {
        self.timescale = Some(Timescale {
            speed: 1.2,
            pitch: 1.2,
            rate: 1.0,
        });
        self.set_active(FilterEffect::Nightcore);
    }

    pub fn slowmo(&mut self) {
        self.timescale = Some(Timescale {
            speed: 0.8,
            pitch: 0.8,
            rate: 1.0,
        });
        self.set_active(FilterEffect::Slowmo);
    }

    pub fn eight_d(&mut self) {
        self.rotation = Some(Rotation { rotation_hz: 0.2 });
        self.set_active(FilterEffect::EightD);
    }

    pub fn vaporwave(&mut self) {
        self.timescale = Some(Timescale {
            speed: 0.85,
            pitch: 0.85,
            rate: 1.0,
        });
        self.set_active(FilterEffect::Vaporwave);
    }

    pub fn soft(&mut self) {
        self.equalizer = Some(
            (0..15)
                .map(|band| EqualizerBand {
                    band,
                    gain: if band > 5 { -0.25 } else { 0.0 },
                })
                .collect(),
        );
        self.set_active(FilterEffect::Soft);
    }

    pub fn tv(&mut self) {
        self.equalizer = Some(vec![EqualizerBand { band: 8, gain: 0.65 }]);
        self.set_active(FilterEffect::Tv);
    }

    pub fn party(&mut self) {
        self.equalizer = Some(
            (0..3)
                .map(|band| EqualizerBand { band, gain: 0.3 })
                .collect(),
        );
        self.set_active(FilterEffect::Party);
    }

    pub fn chipmunk(&mut self) {
        self.timescale = Some(Timescale {
            speed: 1.05,
            pitch: 1.35,
            rate: 1.25,
        });
        self.set_active(FilterEffect::Chipmunk);
    }

    pub fn china(&mut self) {
        self.timescale = Some(Timescale {
            speed: 1.0,
            pitch: 1.5,
            rate: 1.0,
        });
        self.set_active(FilterEffect::China);
    }

    pub fn daycore(&mut self) {
        self.timescale = Some(Timescale {
            speed: 0.95,
            pitch: 0.85,
            rate: 1.0,
        });
        self.set_active(FilterEffect::Daycore);
    }

    pub fn doubletime(&mut self) {
        self.timescale = Some(Timescale {
            speed: 2.0,
            pitch: 1.0,
            rate: 1.0,
        });
        self.set_active(FilterEffect::Doubletime);
    }

    pub fn demon(&mut self) {
        self.timescale = Some(Timescale {
            speed: 0.95,
            pitch: 0.65,
            rate: 1.0,
        });
        self.set_active(FilterEffect::Demon);
    }

    pub fn earrape(&mut self) {
        self.equalizer = Some((0..15).map(|band| EqualizerBand { band, gain: 1.0 }).collect());
        self.set_active(FilterEffect::Earrape);
    }

    pub fn electronic(&mut self) {
        self.equalizer = Some(
            (0..15)
                .map(|band| EqualizerBand {
                    band,
                    gain: if band < 5 { 0.4 } else { 0.15 },
                })
                .collect(),
        );
        self.set_active(FilterEffect::Electronic);
    }

    pub fn radio(&mut self) {
        self.distortion = Some(Distortion {
            sin_offset: 0.0,
            sin_scale: 0.27,
            cos_offset: 0.0,
            cos_scale: 0.58,
            tan_offset: 0.0,
            tan_scale: 0.0,
            offset: 0.0,
            scale: 1.0,
        });
        self.set_active(FilterEffect::Radio);
    }

    pub fn tremolo(&mut self) {
        self.vibrato = Some(Vibrato {
            frequency: 2.0,
            depth: 0.5,
        });
        self.set_active(FilterEffect::Tremolo);
    }

    pub fn treble_bass(&mut self) {
        self.equalizer = Some(
            (0..15)
                .map(|band| EqualizerBand {
                    band,
                    gain: if band < 2 || band > 12 { 0.35 } else { 0.0 },
                })
                .collect(),
        );
        self.set_active(FilterEffect::TrebleBass);
    }

    pub fn pop(&mut self) {
        self.equalizer = Some(
            (0..15)
                .map(|band| EqualizerBand {
                    band,
                    gain: if (2..7).contains(&band) { 0.25 } else { 0.0 },
                })
                .collect(),
        );
        self.set_active(FilterEffect::Pop);
    }

    pub fn distort(&mut self) {
        self.distortion = Some(Distortion {
            sin_offset: 0.5,
            sin_scale: 0.5,
            cos_offset: 0.5,
            cos_scale: 0.5,
            tan_offset: 0.5,
            tan_scale: 0.5,
            offset: 0.5,
            scale: 0.5,
        });
        self.set_active(FilterEffect::Distort);
    }

    pub fn darth_vader(&mut self) {
        self.timescale = Some(Timescale {
            speed: 0.975,
            pitch: 0.5,
            rate: 1.0,
        });
        self.set_active(FilterEffect::DarthVader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bass_boost_clamps_level() {
        let mut stack = FilterStack::new();
        stack.bass_boost(10);
        let status = stack.filters_status();
        assert!(status[&FilterEffect::BassBoost]);
        assert!(!status[&FilterEffect::Nightcore]);
    }

    #[test]
    fn clear_resets_blocks_and_flags() {
        let mut stack = FilterStack::new();
        stack.nightcore();
        stack.clear();
        assert!(stack.timescale.is_none());
        assert!(!stack.filters_status()[&FilterEffect::Nightcore]);
    }

    #[test]
    fn payload_only_sends_non_null_subset() {
        let mut stack = FilterStack::new();
        stack.nightcore();
        let payload = serde_json::to_value(stack.to_payload()).unwrap();
        let obj = payload.as_object().unwrap();
        assert!(obj.contains_key("timescale"));
        assert!(!obj.contains_key("karaoke"));
    }
}
