//! Effects processor - builds the signal path from declared effects
//!
//! The processor owns one node set per enabled effect id. Every structural
//! change (`apply_effects`, `remove_effect`) tears the whole chain down and
//! wires it again from the fixed slot order; parameter changes
//! (`update_effect`, `update_wet_dry`) touch node parameters only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::effect::{
    AudioEffect, CompressorParams, DelayParams, EffectKind, FilterParams, ReverbParams,
};
use crate::error::{GraphError, Result};
use crate::graph::{AudioBackend, NodeId, NodeKind, ParamKind};
use crate::impulse;

/// Longest delay time accepted, in seconds
const MAX_DELAY_SECS: f32 = 5.0;

/// Feedback above this rings forever
const MAX_FEEDBACK: f32 = 0.95;

/// Position of an effect in the chain, in signal order
///
/// Declared order is the wiring order; list position of an effect in
/// `apply_effects` never matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    PreFilter,
    Convolution,
    Delay,
    PostFilter,
    // wet/dry mix and master gain sit here
    Gain,
    Compression,
}

/// Nodes backing one effect
#[derive(Debug, Clone, Copy)]
enum EffectNodes {
    Reverb {
        convolver: NodeId,
        wet: NodeId,
        dry: NodeId,
    },
    Delay {
        delay: NodeId,
        feedback: NodeId,
        wet: NodeId,
        through: NodeId,
        output: NodeId,
    },
    Filter {
        filter: NodeId,
        post: bool,
    },
    Compressor(NodeId),
    Gain(NodeId),
}

impl EffectNodes {
    fn all(&self) -> Vec<NodeId> {
        match *self {
            EffectNodes::Reverb { convolver, wet, dry } => vec![convolver, wet, dry],
            EffectNodes::Delay {
                delay,
                feedback,
                wet,
                through,
                output,
            } => vec![delay, feedback, wet, through, output],
            EffectNodes::Filter { filter, .. } => vec![filter],
            EffectNodes::Compressor(node) | EffectNodes::Gain(node) => vec![node],
        }
    }

    fn slot(&self) -> Slot {
        match self {
            EffectNodes::Reverb { .. } => Slot::Convolution,
            EffectNodes::Delay { .. } => Slot::Delay,
            EffectNodes::Filter { post: false, .. } => Slot::PreFilter,
            EffectNodes::Filter { post: true, .. } => Slot::PostFilter,
            EffectNodes::Gain(_) => Slot::Gain,
            EffectNodes::Compressor(_) => Slot::Compression,
        }
    }
}

/// Builds and maintains the effect chain between `source` and `output`
pub struct EffectsProcessor {
    backend: Arc<dyn AudioBackend>,
    source: NodeId,
    output: NodeId,
    master: NodeId,
    desired: Vec<AudioEffect>,
    nodes: HashMap<String, EffectNodes>,
    rng: StdRng,
    disposed: bool,
}

impl EffectsProcessor {
    /// Create a processor and wire `source` straight to `output`
    pub fn new(backend: Arc<dyn AudioBackend>, source: NodeId, output: NodeId) -> Result<Self> {
        let master = backend.create_node(NodeKind::Gain)?;
        let mut processor = Self {
            backend,
            source,
            output,
            master,
            desired: Vec::new(),
            nodes: HashMap::new(),
            rng: StdRng::from_entropy(),
            disposed: false,
        };
        processor.rebuild()?;
        Ok(processor)
    }

    /// Replace the full desired effect set
    ///
    /// Node sets for ids no longer present are released. Existing node sets
    /// of the same type are reused with new parameters. The chain is then
    /// rewired from scratch.
    pub fn apply_effects(&mut self, effects: &[AudioEffect]) -> Result<()> {
        self.ensure_live()?;

        let mut seen = HashSet::new();
        let effects: Vec<AudioEffect> = effects
            .iter()
            .filter(|effect| {
                let fresh = seen.insert(effect.id.clone());
                if !fresh {
                    warn!("Duplicate effect id {}, keeping the first", effect.id);
                }
                fresh
            })
            .cloned()
            .collect();

        let previous: HashMap<String, EffectKind> = self
            .desired
            .iter()
            .map(|effect| (effect.id.clone(), effect.kind.clone()))
            .collect();

        // New node sets are staged first; the current chain stays untouched
        // until every one of them exists.
        let mut staged: HashMap<String, EffectNodes> = HashMap::new();
        let mut reused: Vec<&AudioEffect> = Vec::new();
        for effect in &effects {
            if effect.kind == EffectKind::Unknown {
                debug!("Effect {} has an unknown type, tracking without nodes", effect.id);
                continue;
            }
            if !effect.enabled {
                continue;
            }

            let reusable = self.nodes.contains_key(&effect.id)
                && previous
                    .get(&effect.id)
                    .is_some_and(|old| old.same_variant(&effect.kind));
            if reusable {
                reused.push(effect);
                continue;
            }

            match self.build_nodes(&effect.kind) {
                Ok(Some(nodes)) => {
                    staged.insert(effect.id.clone(), nodes);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Effect {} could not be built, keeping the current chain: {}",
                        effect.id, e
                    );
                    for nodes in staged.into_values() {
                        self.release_set(nodes);
                    }
                    return Err(e);
                }
            }
        }

        let kept: HashSet<&str> = reused.iter().map(|effect| effect.id.as_str()).collect();
        let dropped: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| !kept.contains(id.as_str()))
            .cloned()
            .collect();
        for id in dropped {
            self.release_nodes(&id);
        }
        self.nodes.extend(staged);

        let mut outcome = Ok(());
        for effect in reused {
            let Some(nodes) = self.nodes.get(&effect.id).copied() else {
                continue;
            };
            let nodes = self.refresh_filter_slot(&effect.id, nodes, &effect.kind);
            if let Err(e) = self.apply_params(nodes, &effect.kind, previous.get(&effect.id)) {
                warn!("Effect {} parameters not applied: {}", effect.id, e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        self.desired = effects;
        self.rebuild()?;
        outcome
    }

    /// Change the parameters of an existing effect in place, without rewiring
    ///
    /// A filter moved between the low-pass slot and the pre-reverb slot is the
    /// one update that has to rewire. Enabling or disabling an effect changes
    /// the chain's structure and goes through `apply_effects`.
    pub fn update_effect(&mut self, effect: &AudioEffect) -> Result<()> {
        self.ensure_live()?;

        let index = self
            .desired
            .iter()
            .position(|d| d.id == effect.id)
            .ok_or_else(|| GraphError::UnknownEffect(effect.id.clone()))?;
        if self.desired[index].enabled != effect.enabled {
            return Err(GraphError::EnabledChange(effect.id.clone()));
        }
        let previous = self.desired[index].kind.clone();
        if !previous.same_variant(&effect.kind) {
            return Err(GraphError::KindMismatch {
                id: effect.id.clone(),
                expected: previous.name(),
                actual: effect.kind.name(),
            });
        }

        self.desired[index].kind = effect.kind.clone();

        let Some(nodes) = self.nodes.get(&effect.id).copied() else {
            debug!("Effect {} has no nodes, stored parameters only", effect.id);
            return Ok(());
        };
        let moved = self.refresh_filter_slot(&effect.id, nodes, &effect.kind);
        self.apply_params(moved, &effect.kind, Some(&previous))?;
        if moved.slot() != nodes.slot() {
            self.rebuild()?;
        }
        Ok(())
    }

    /// Ramp an effect's wet and dry levels linearly over `duration_secs`
    ///
    /// Pending ramps on the same gains are cancelled first, and each ramp
    /// starts from the gain's current value.
    pub fn update_wet_dry(&mut self, id: &str, wet: f32, dry: f32, duration_secs: f64) -> Result<()> {
        self.ensure_live()?;

        let nodes = self
            .nodes
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownEffect(id.to_string()))?;
        let (wet_node, dry_node) = match nodes {
            EffectNodes::Reverb { wet, dry, .. } => (wet, dry),
            EffectNodes::Delay { wet, through, .. } => (wet, through),
            _ => return Err(GraphError::NoWetDry(id.to_string())),
        };

        let wet = unit(wet, 0.0);
        let dry = unit(dry, 1.0);
        let duration = if duration_secs.is_finite() {
            duration_secs.max(0.0)
        } else {
            0.0
        };
        let end_time = self.backend.current_time() + duration;

        for (node, target) in [(wet_node, wet), (dry_node, dry)] {
            self.backend.cancel_scheduled(node, ParamKind::Gain)?;
            let current = self.backend.param(node, ParamKind::Gain)?;
            self.backend.set_param(node, ParamKind::Gain, current)?;
            self.backend
                .linear_ramp(node, ParamKind::Gain, target, end_time)?;
        }

        if let Some(effect) = self.desired.iter_mut().find(|d| d.id == id) {
            match &mut effect.kind {
                EffectKind::Reverb(params) => {
                    params.wet = wet;
                    params.dry = dry;
                }
                EffectKind::Delay(params) => params.wet = wet,
                _ => {}
            }
        }
        Ok(())
    }

    /// Drop one effect and rewire
    pub fn remove_effect(&mut self, id: &str) -> Result<()> {
        self.ensure_live()?;

        let before = self.desired.len();
        self.desired.retain(|d| d.id != id);
        if self.desired.len() == before {
            return Err(GraphError::UnknownEffect(id.to_string()));
        }
        self.release_nodes(id);
        self.rebuild()
    }

    /// Disconnect and release everything; safe to call more than once
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let ids: Vec<String> = self.nodes.keys().cloned().collect();
        for id in ids {
            self.release_nodes(&id);
        }
        self.backend.release(self.master);
        self.backend.disconnect(self.source);
        self.desired.clear();
        self.disposed = true;
        debug!("Effects processor disposed");
    }

    /// Ids of effects that currently have nodes, in declared order
    pub fn active_ids(&self) -> Vec<String> {
        self.desired
            .iter()
            .filter(|d| self.nodes.contains_key(&d.id))
            .map(|d| d.id.clone())
            .collect()
    }

    /// Ids of every declared effect, including disabled and unknown ones
    pub fn tracked_ids(&self) -> Vec<String> {
        self.desired.iter().map(|d| d.id.clone()).collect()
    }

    /// Declared effects as last applied or updated
    pub fn effects(&self) -> &[AudioEffect] {
        &self.desired
    }

    /// Nodes owned by an effect
    pub fn nodes_for(&self, id: &str) -> Vec<NodeId> {
        self.nodes.get(id).map(EffectNodes::all).unwrap_or_default()
    }

    /// Master gain node, present while the processor is live
    pub fn master(&self) -> NodeId {
        self.master
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(GraphError::Disposed)
        } else {
            Ok(())
        }
    }

    fn release_nodes(&mut self, id: &str) {
        if let Some(nodes) = self.nodes.remove(id) {
            self.release_set(nodes);
            debug!("Released nodes for effect {}", id);
        }
    }

    fn release_set(&self, nodes: EffectNodes) {
        for node in nodes.all() {
            self.backend.release(node);
        }
    }

    /// Keep a filter's slot in sync with its type
    fn refresh_filter_slot(&mut self, id: &str, nodes: EffectNodes, kind: &EffectKind) -> EffectNodes {
        match (nodes, kind) {
            (EffectNodes::Filter { filter, post }, EffectKind::Filter(params))
                if post != params.filter_type.is_post_filter() =>
            {
                let moved = EffectNodes::Filter {
                    filter,
                    post: params.filter_type.is_post_filter(),
                };
                self.nodes.insert(id.to_string(), moved);
                moved
            }
            _ => nodes,
        }
    }

    /// Create and configure the node set for `kind`
    ///
    /// On failure every node created so far is released again.
    fn build_nodes(&mut self, kind: &EffectKind) -> Result<Option<EffectNodes>> {
        let mut created = Vec::new();
        let built = self.create_nodes(kind, &mut created).and_then(|nodes| {
            if let Some(nodes) = nodes {
                self.apply_params(nodes, kind, None)?;
            }
            Ok(nodes)
        });
        if built.is_err() {
            for node in created {
                self.backend.release(node);
            }
        }
        built
    }

    fn create_nodes(
        &self,
        kind: &EffectKind,
        created: &mut Vec<NodeId>,
    ) -> Result<Option<EffectNodes>> {
        let backend = &self.backend;
        let mut node = |kind: NodeKind| -> Result<NodeId> {
            let id = backend.create_node(kind)?;
            created.push(id);
            Ok(id)
        };
        let nodes = match kind {
            EffectKind::Reverb(_) => EffectNodes::Reverb {
                convolver: node(NodeKind::Convolver)?,
                wet: node(NodeKind::Gain)?,
                dry: node(NodeKind::Gain)?,
            },
            EffectKind::Delay(_) => {
                let delay = node(NodeKind::Delay)?;
                let feedback = node(NodeKind::Gain)?;
                let wet = node(NodeKind::Gain)?;
                let through = node(NodeKind::Gain)?;
                let output = node(NodeKind::Gain)?;
                backend.set_param(through, ParamKind::Gain, 1.0)?;
                backend.set_param(output, ParamKind::Gain, 1.0)?;
                EffectNodes::Delay {
                    delay,
                    feedback,
                    wet,
                    through,
                    output,
                }
            }
            EffectKind::Filter(params) => EffectNodes::Filter {
                filter: node(NodeKind::BiquadFilter)?,
                post: params.filter_type.is_post_filter(),
            },
            EffectKind::Compressor(_) => {
                EffectNodes::Compressor(node(NodeKind::DynamicsCompressor)?)
            }
            EffectKind::Gain(_) => EffectNodes::Gain(node(NodeKind::Gain)?),
            EffectKind::Unknown => return Ok(None),
        };
        Ok(Some(nodes))
    }

    fn apply_params(
        &mut self,
        nodes: EffectNodes,
        kind: &EffectKind,
        previous: Option<&EffectKind>,
    ) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        match (nodes, kind) {
            (EffectNodes::Reverb { convolver, wet, dry }, EffectKind::Reverb(params)) => {
                let defaults = ReverbParams::default();
                backend.set_param(wet, ParamKind::Gain, unit(params.wet, defaults.wet))?;
                backend.set_param(dry, ParamKind::Gain, unit(params.dry, defaults.dry))?;
                let regenerate = match previous {
                    Some(EffectKind::Reverb(old)) => {
                        old.duration != params.duration || old.decay != params.decay
                    }
                    _ => true,
                };
                if regenerate {
                    let response = impulse::generate(
                        backend.sample_rate(),
                        params.duration,
                        params.decay,
                        &mut self.rng,
                    );
                    backend.set_buffer(convolver, response)?;
                }
            }
            (
                EffectNodes::Delay {
                    delay,
                    feedback,
                    wet,
                    ..
                },
                EffectKind::Delay(params),
            ) => {
                let defaults = DelayParams::default();
                let time = finite_or(params.time, defaults.time).clamp(0.0, MAX_DELAY_SECS);
                let amount =
                    finite_or(params.feedback, defaults.feedback).clamp(0.0, MAX_FEEDBACK);
                backend.set_param(delay, ParamKind::DelayTime, time)?;
                backend.set_param(feedback, ParamKind::Gain, amount)?;
                backend.set_param(wet, ParamKind::Gain, unit(params.wet, defaults.wet))?;
            }
            (EffectNodes::Filter { filter, .. }, EffectKind::Filter(params)) => {
                let defaults = FilterParams::default();
                let nyquist = backend.sample_rate() / 2.0;
                backend.set_filter_type(filter, params.filter_type)?;
                backend.set_param(
                    filter,
                    ParamKind::Frequency,
                    finite_or(params.frequency, defaults.frequency).clamp(10.0, nyquist),
                )?;
                backend.set_param(filter, ParamKind::Q, finite_or(params.q, defaults.q))?;
                backend.set_param(
                    filter,
                    ParamKind::Gain,
                    finite_or(params.gain, defaults.gain),
                )?;
            }
            (EffectNodes::Compressor(node), EffectKind::Compressor(params)) => {
                let defaults = CompressorParams::default();
                let values = [
                    (ParamKind::Threshold, params.threshold, defaults.threshold),
                    (ParamKind::Knee, params.knee, defaults.knee),
                    (ParamKind::Ratio, params.ratio, defaults.ratio),
                    (ParamKind::Attack, params.attack, defaults.attack),
                    (ParamKind::Release, params.release, defaults.release),
                ];
                for (param, value, fallback) in values {
                    backend.set_param(node, param, finite_or(value, fallback))?;
                }
            }
            (EffectNodes::Gain(node), EffectKind::Gain(params)) => {
                backend.set_param(node, ParamKind::Gain, finite_or(params.value, 1.0).max(0.0))?;
            }
            (_, kind) => {
                warn!("Parameters of type {} do not fit the built nodes", kind.name());
            }
        }
        Ok(())
    }

    /// Disconnect everything and wire the chain in slot order
    fn rebuild(&mut self) -> Result<()> {
        let backend = Arc::clone(&self.backend);

        backend.disconnect(self.source);
        backend.disconnect(self.master);
        for nodes in self.nodes.values() {
            for node in nodes.all() {
                backend.disconnect(node);
            }
        }

        let mut active: Vec<EffectNodes> = self
            .desired
            .iter()
            .filter_map(|d| self.nodes.get(&d.id).copied())
            .collect();

        if active.is_empty() {
            backend.connect(self.source, self.output)?;
            debug!("Effect chain empty, source wired to output");
            return Ok(());
        }

        // Stable: effects sharing a slot keep their declared order.
        active.sort_by_key(EffectNodes::slot);

        let mix = active.iter().find_map(|nodes| match *nodes {
            EffectNodes::Reverb { convolver, wet, dry } => Some((convolver, wet, dry)),
            _ => None,
        });

        let mut tail = self.source;
        for nodes in active.iter().filter(|n| n.slot() < Slot::Gain) {
            tail = match *nodes {
                EffectNodes::Reverb { convolver, wet, .. } => {
                    backend.connect(tail, convolver)?;
                    if mix.is_some_and(|(primary, _, _)| primary == convolver) {
                        convolver
                    } else {
                        backend.connect(convolver, wet)?;
                        wet
                    }
                }
                EffectNodes::Delay {
                    delay,
                    feedback,
                    wet,
                    through,
                    output,
                } => {
                    backend.connect(tail, delay)?;
                    backend.connect(tail, through)?;
                    backend.connect(delay, feedback)?;
                    backend.connect(feedback, delay)?;
                    backend.connect(delay, wet)?;
                    backend.connect(wet, output)?;
                    backend.connect(through, output)?;
                    output
                }
                EffectNodes::Filter { filter, .. } => {
                    backend.connect(tail, filter)?;
                    filter
                }
                EffectNodes::Gain(_) | EffectNodes::Compressor(_) => tail,
            };
        }

        match mix {
            Some((_, wet, dry)) => {
                backend.connect(tail, wet)?;
                backend.connect(wet, self.master)?;
                backend.connect(self.source, dry)?;
                backend.connect(dry, self.master)?;
            }
            None => backend.connect(tail, self.master)?,
        }

        let mut tail = self.master;
        for nodes in active.iter().filter(|n| n.slot() >= Slot::Gain) {
            if let EffectNodes::Gain(node) | EffectNodes::Compressor(node) = *nodes {
                backend.connect(tail, node)?;
                tail = node;
            }
        }
        backend.connect(tail, self.output)?;

        debug!("Effect chain rebuilt with {} effects", active.len());
        Ok(())
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn unit(value: f32, fallback: f32) -> f32 {
    finite_or(value, fallback).clamp(0.0, 1.0)
}
