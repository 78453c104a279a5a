//! Declarative effect descriptions
//!
//! The UI sends a flat tagged object per effect:
//!
//! ```json
//! { "id": "hall", "enabled": true, "type": "reverb", "decay": 3.0, "wet": 0.4 }
//! ```
//!
//! Missing parameters fall back to their defaults. Unrecognised `type` values
//! parse to [`EffectKind::Unknown`] so a newer UI does not break an older core.

use serde::{Deserialize, Serialize};

/// One declared effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEffect {
    /// Unique id; node sets are keyed by it
    pub id: String,

    /// Disabled effects are tracked but not wired
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Effect type and its parameters
    #[serde(flatten)]
    pub kind: EffectKind,
}

fn default_enabled() -> bool {
    true
}

impl AudioEffect {
    /// Create an enabled effect
    pub fn new(id: impl Into<String>, kind: EffectKind) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            kind,
        }
    }

    /// Reverb with default parameters
    pub fn reverb(id: impl Into<String>) -> Self {
        Self::new(id, EffectKind::Reverb(ReverbParams::default()))
    }

    /// Delay with default parameters
    pub fn delay(id: impl Into<String>) -> Self {
        Self::new(id, EffectKind::Delay(DelayParams::default()))
    }

    /// Filter of the given type at `frequency` Hz
    pub fn filter(id: impl Into<String>, filter_type: FilterType, frequency: f32) -> Self {
        Self::new(
            id,
            EffectKind::Filter(FilterParams {
                filter_type,
                frequency,
                ..FilterParams::default()
            }),
        )
    }

    /// Compressor with default parameters
    pub fn compressor(id: impl Into<String>) -> Self {
        Self::new(id, EffectKind::Compressor(CompressorParams::default()))
    }

    /// Gain stage with the given linear value
    pub fn gain(id: impl Into<String>, value: f32) -> Self {
        Self::new(id, EffectKind::Gain(GainParams { value }))
    }

    /// Same effect with `enabled` set
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Effect type, tagged on `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EffectKind {
    Reverb(ReverbParams),
    Delay(DelayParams),
    Filter(FilterParams),
    Compressor(CompressorParams),
    Gain(GainParams),
    /// Any type this build does not know
    #[serde(other)]
    Unknown,
}

impl EffectKind {
    /// Type name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Reverb(_) => "reverb",
            EffectKind::Delay(_) => "delay",
            EffectKind::Filter(_) => "filter",
            EffectKind::Compressor(_) => "compressor",
            EffectKind::Gain(_) => "gain",
            EffectKind::Unknown => "unknown",
        }
    }

    /// Whether two kinds are the same variant, ignoring parameters
    pub fn same_variant(&self, other: &EffectKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Convolution reverb
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReverbParams {
    /// Impulse response length in seconds
    pub duration: f32,
    /// Decay exponent of the impulse envelope
    pub decay: f32,
    /// Wet (processed) level, 0..=1
    pub wet: f32,
    /// Dry (direct) level, 0..=1
    pub dry: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            duration: 2.0,
            decay: 2.0,
            wet: 0.3,
            dry: 0.7,
        }
    }
}

/// Feedback delay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayParams {
    /// Delay time in seconds
    pub time: f32,
    /// Feedback amount, 0..0.95
    pub feedback: f32,
    /// Level of the delayed signal
    pub wet: f32,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            time: 0.3,
            feedback: 0.4,
            wet: 0.5,
        }
    }
}

/// Biquad filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterParams {
    pub filter_type: FilterType,
    /// Cutoff or centre frequency in Hz
    pub frequency: f32,
    pub q: f32,
    /// Gain in dB (shelf and peaking types only)
    pub gain: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            frequency: 350.0,
            q: 1.0,
            gain: 0.0,
        }
    }
}

/// Biquad response type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

impl FilterType {
    /// Low-pass filters sit after the delay; every other type sits before the reverb
    pub fn is_post_filter(self) -> bool {
        self == FilterType::Lowpass
    }
}

/// Dynamics compressor, Web Audio defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressorParams {
    /// dB
    pub threshold: f32,
    /// dB
    pub knee: f32,
    pub ratio: f32,
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub release: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold: -24.0,
            knee: 30.0,
            ratio: 12.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

/// Linear gain stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainParams {
    pub value: f32,
}

impl Default for GainParams {
    fn default() -> Self {
        Self { value: 1.0 }
    }
}
