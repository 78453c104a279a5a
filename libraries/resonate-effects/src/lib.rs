//! Resonate - Effects Graph
//!
//! Builds and rebuilds the audio-processing signal path between a fixed media
//! source and a fixed analysis node from a declarative list of effects.
//!
//! This crate provides:
//! - `AudioBackend`: node-handle based abstraction over a host audio graph
//! - `VirtualGraph`: in-memory backend that records nodes, edges and automation
//! - `AudioEffect`: tagged effect descriptions (reverb, delay, filter, compressor, gain)
//! - `EffectsProcessor`: owns the per-effect node sets and rewires the chain
//!
//! # Signal path
//!
//! ```text
//! wet: source → high-pass → convolver → delay(+feedback) → low-pass → reverb wet
//! dry: source → reverb dry
//!      (wet + dry) → master → gain → compressor → analysis → destination
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use resonate_effects::{AudioBackend, AudioEffect, EffectsProcessor, NodeKind, VirtualGraph};
//!
//! let graph = Arc::new(VirtualGraph::new(48_000.0));
//! let source = graph.create_node(NodeKind::MediaSource).unwrap();
//! let analyser = graph.create_node(NodeKind::Analyser).unwrap();
//!
//! let mut processor = EffectsProcessor::new(graph.clone(), source, analyser).unwrap();
//! processor.apply_effects(&[AudioEffect::reverb("room")]).unwrap();
//! assert!(graph.has_path(source, analyser));
//! ```

mod effect;
mod error;
mod graph;
pub mod impulse;
mod processor;
mod virtual_graph;

pub use effect::{
    AudioEffect, CompressorParams, DelayParams, EffectKind, FilterParams, FilterType, GainParams,
    ReverbParams,
};
pub use error::{GraphError, Result};
pub use graph::{AudioBackend, NodeId, NodeKind, ParamKind};
pub use processor::EffectsProcessor;
pub use virtual_graph::{ScheduledRamp, VirtualGraph};
