//! Host audio-graph abstraction
//!
//! Nodes are addressed by opaque handles so the processor never holds host
//! objects directly. A browser host maps these calls onto Web Audio nodes;
//! `VirtualGraph` records them in memory.

use crate::effect::FilterType;
use crate::error::Result;

/// Opaque handle to a node in the audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Node kinds the processor and engine create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Source bound to the engine's media element
    MediaSource,
    /// Frequency analyser sitting in front of the destination
    Analyser,
    Gain,
    BiquadFilter,
    Convolver,
    Delay,
    DynamicsCompressor,
}

impl NodeKind {
    /// Short lowercase name, used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::MediaSource => "media-source",
            NodeKind::Analyser => "analyser",
            NodeKind::Gain => "gain",
            NodeKind::BiquadFilter => "biquad-filter",
            NodeKind::Convolver => "convolver",
            NodeKind::Delay => "delay",
            NodeKind::DynamicsCompressor => "dynamics-compressor",
        }
    }

    /// Parameters a node of this kind exposes
    pub fn params(self) -> &'static [ParamKind] {
        match self {
            NodeKind::MediaSource | NodeKind::Convolver => &[],
            NodeKind::Analyser => &[ParamKind::FftSize],
            NodeKind::Gain => &[ParamKind::Gain],
            NodeKind::BiquadFilter => &[ParamKind::Frequency, ParamKind::Q, ParamKind::Gain],
            NodeKind::Delay => &[ParamKind::DelayTime],
            NodeKind::DynamicsCompressor => &[
                ParamKind::Threshold,
                ParamKind::Knee,
                ParamKind::Ratio,
                ParamKind::Attack,
                ParamKind::Release,
            ],
        }
    }
}

/// Named numeric parameter of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Gain,
    Frequency,
    Q,
    DelayTime,
    Threshold,
    Knee,
    Ratio,
    Attack,
    Release,
    FftSize,
}

/// Host audio graph
///
/// All methods take `&self`; implementations use interior mutability because the
/// graph is shared between the engine and its effects processor.
///
/// `disconnect` follows Web Audio semantics: it removes every outgoing
/// connection of the node and leaves incoming ones alone.
pub trait AudioBackend: Send + Sync {
    /// Sample rate of the context in Hz
    fn sample_rate(&self) -> f32;

    /// Context clock in seconds, the time base for scheduled ramps
    fn current_time(&self) -> f64;

    /// Start or resume the context
    ///
    /// Browsers only allow this after a user gesture, so the engine calls it
    /// lazily on the first `play()`.
    fn resume(&self) -> Result<()>;

    /// Final output node
    fn destination(&self) -> NodeId;

    /// Create a node with default parameters
    fn create_node(&self, kind: NodeKind) -> Result<NodeId>;

    /// Connect the output of `from` to the input of `to`
    fn connect(&self, from: NodeId, to: NodeId) -> Result<()>;

    /// Remove all outgoing connections of `node`
    fn disconnect(&self, node: NodeId);

    /// Disconnect and forget a node; the handle becomes invalid
    fn release(&self, node: NodeId);

    /// Set a parameter immediately, at `current_time()`
    fn set_param(&self, node: NodeId, param: ParamKind, value: f32) -> Result<()>;

    /// Current value of a parameter
    fn param(&self, node: NodeId, param: ParamKind) -> Result<f32>;

    /// Drop every automation event scheduled on a parameter
    fn cancel_scheduled(&self, node: NodeId, param: ParamKind) -> Result<()>;

    /// Schedule a linear ramp reaching `value` at context time `end_time`
    fn linear_ramp(&self, node: NodeId, param: ParamKind, value: f32, end_time: f64)
        -> Result<()>;

    /// Set the response type of a biquad filter
    fn set_filter_type(&self, node: NodeId, filter_type: FilterType) -> Result<()>;

    /// Load a (planar) impulse response into a convolver
    fn set_buffer(&self, node: NodeId, channels: Vec<Vec<f32>>) -> Result<()>;

    /// Byte frequency data of an analyser, `fft_size / 2` bins
    fn frequency_data(&self, node: NodeId) -> Result<Vec<u8>>;

    /// Shut the context down
    fn close(&self);
}
