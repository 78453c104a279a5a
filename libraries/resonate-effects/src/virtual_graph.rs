//! In-memory audio graph
//!
//! Records nodes, connections, parameter values and scheduled ramps without
//! producing sound. Used by tests, the simulator, and as the reference for
//! what a host backend has to do.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;

use crate::effect::FilterType;
use crate::error::{GraphError, Result};
use crate::graph::{AudioBackend, NodeId, NodeKind, ParamKind};

/// A ramp scheduled with `linear_ramp`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledRamp {
    /// Value when the ramp was scheduled
    pub from: f32,
    /// Target value
    pub to: f32,
    /// Context time the ramp was scheduled at
    pub start_time: f64,
    /// Context time the target is reached
    pub end_time: f64,
}

#[derive(Debug)]
struct NodeRecord {
    kind: NodeKind,
    params: HashMap<ParamKind, f32>,
    ramps: HashMap<ParamKind, Vec<ScheduledRamp>>,
    filter_type: Option<FilterType>,
    buffer_frames: usize,
}

impl NodeRecord {
    fn new(kind: NodeKind) -> Self {
        let params = kind
            .params()
            .iter()
            .map(|&param| (param, default_value(kind, param)))
            .collect();
        Self {
            kind,
            params,
            ramps: HashMap::new(),
            filter_type: (kind == NodeKind::BiquadFilter).then_some(FilterType::Lowpass),
            buffer_frames: 0,
        }
    }
}

fn default_value(kind: NodeKind, param: ParamKind) -> f32 {
    match (kind, param) {
        (NodeKind::BiquadFilter, ParamKind::Frequency) => 350.0,
        (NodeKind::BiquadFilter, ParamKind::Q) => 1.0,
        (NodeKind::BiquadFilter, ParamKind::Gain) => 0.0,
        (NodeKind::Analyser, ParamKind::FftSize) => 2048.0,
        (NodeKind::DynamicsCompressor, ParamKind::Threshold) => -24.0,
        (NodeKind::DynamicsCompressor, ParamKind::Knee) => 30.0,
        (NodeKind::DynamicsCompressor, ParamKind::Ratio) => 12.0,
        (NodeKind::DynamicsCompressor, ParamKind::Attack) => 0.003,
        (NodeKind::DynamicsCompressor, ParamKind::Release) => 0.25,
        (NodeKind::Delay, ParamKind::DelayTime) => 0.0,
        _ => 1.0,
    }
}

#[derive(Debug, Default)]
struct GraphState {
    next_id: u32,
    nodes: HashMap<NodeId, NodeRecord>,
    edges: BTreeSet<(NodeId, NodeId)>,
    current_time: f64,
    resumed: bool,
    closed: bool,
    resume_failure: Option<String>,
    create_failure: Option<NodeKind>,
    analysis_frame: u32,
}

/// Recording implementation of [`AudioBackend`]
#[derive(Debug)]
pub struct VirtualGraph {
    sample_rate: f32,
    destination: NodeId,
    state: Mutex<GraphState>,
}

impl VirtualGraph {
    /// Create an empty graph; node 0 is the destination
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            destination: NodeId(0),
            state: Mutex::new(GraphState {
                next_id: 1,
                ..GraphState::default()
            }),
        }
    }

    /// Make the next `resume()` fail with `reason`
    pub fn fail_resume(&self, reason: impl Into<String>) {
        self.state.lock().resume_failure = Some(reason.into());
    }

    /// Make creation of `kind` nodes fail
    pub fn fail_create(&self, kind: NodeKind) {
        self.state.lock().create_failure = Some(kind);
    }

    /// Let node creation succeed again after `fail_create`
    pub fn allow_create(&self) {
        self.state.lock().create_failure = None;
    }

    /// Move the context clock forward
    pub fn advance_time(&self, seconds: f64) {
        self.state.lock().current_time += seconds;
    }

    /// Whether `resume()` succeeded at least once
    pub fn is_resumed(&self) -> bool {
        self.state.lock().resumed
    }

    /// Whether `close()` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// All connections as `(from, to)` pairs
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.state.lock().edges.iter().copied().collect()
    }

    /// Direct connection check
    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.state.lock().edges.contains(&(from, to))
    }

    /// Outgoing connections of `node`
    pub fn outputs(&self, node: NodeId) -> Vec<NodeId> {
        self.state
            .lock()
            .edges
            .iter()
            .filter(|(from, _)| *from == node)
            .map(|&(_, to)| to)
            .collect()
    }

    /// Whether `to` is reachable from `from`
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        let state = self.state.lock();
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            stack.extend(
                state
                    .edges
                    .iter()
                    .filter(|(a, _)| *a == node)
                    .map(|&(_, b)| b),
            );
        }
        false
    }

    /// Kind of a live node
    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.state.lock().nodes.get(&node).map(|n| n.kind)
    }

    /// Live nodes of a kind, in creation order
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        let state = self.state.lock();
        let mut nodes: Vec<NodeId> = state
            .nodes
            .iter()
            .filter(|(_, record)| record.kind == kind)
            .map(|(&id, _)| id)
            .collect();
        nodes.sort();
        nodes
    }

    /// Number of live nodes, excluding the destination
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Ramps scheduled on a parameter since the last cancel
    pub fn ramps(&self, node: NodeId, param: ParamKind) -> Vec<ScheduledRamp> {
        self.state
            .lock()
            .nodes
            .get(&node)
            .and_then(|n| n.ramps.get(&param).cloned())
            .unwrap_or_default()
    }

    /// Filter type of a biquad node
    pub fn filter_type(&self, node: NodeId) -> Option<FilterType> {
        self.state.lock().nodes.get(&node).and_then(|n| n.filter_type)
    }

    /// Frames in a convolver's impulse response
    pub fn buffer_frames(&self, node: NodeId) -> usize {
        self.state
            .lock()
            .nodes
            .get(&node)
            .map_or(0, |n| n.buffer_frames)
    }
}

impl AudioBackend for VirtualGraph {
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.resume_failure.take() {
            return Err(GraphError::ContextUnavailable(reason));
        }
        if state.closed {
            return Err(GraphError::ContextUnavailable("context closed".to_string()));
        }
        state.resumed = true;
        Ok(())
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn create_node(&self, kind: NodeKind) -> Result<NodeId> {
        let mut state = self.state.lock();
        if state.create_failure == Some(kind) {
            return Err(GraphError::NodeCreation {
                kind: kind.name(),
                reason: "backend refused".to_string(),
            });
        }
        let id = NodeId(state.next_id);
        state.next_id += 1;
        state.nodes.insert(id, NodeRecord::new(kind));
        Ok(id)
    }

    fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.nodes.contains_key(&from) {
            return Err(GraphError::UnknownNode(from));
        }
        if to != self.destination && !state.nodes.contains_key(&to) {
            return Err(GraphError::UnknownNode(to));
        }
        state.edges.insert((from, to));
        Ok(())
    }

    fn disconnect(&self, node: NodeId) {
        self.state.lock().edges.retain(|(from, _)| *from != node);
    }

    fn release(&self, node: NodeId) {
        let mut state = self.state.lock();
        state.edges.retain(|(from, to)| *from != node && *to != node);
        state.nodes.remove(&node);
    }

    fn set_param(&self, node: NodeId, param: ParamKind, value: f32) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?;
        let slot = record
            .params
            .get_mut(&param)
            .ok_or(GraphError::UnsupportedParam { node, param })?;
        *slot = value;
        Ok(())
    }

    fn param(&self, node: NodeId, param: ParamKind) -> Result<f32> {
        let state = self.state.lock();
        let record = state.nodes.get(&node).ok_or(GraphError::UnknownNode(node))?;
        record
            .params
            .get(&param)
            .copied()
            .ok_or(GraphError::UnsupportedParam { node, param })
    }

    fn cancel_scheduled(&self, node: NodeId, param: ParamKind) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?;
        if !record.params.contains_key(&param) {
            return Err(GraphError::UnsupportedParam { node, param });
        }
        record.ramps.remove(&param);
        Ok(())
    }

    fn linear_ramp(
        &self,
        node: NodeId,
        param: ParamKind,
        value: f32,
        end_time: f64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let now = state.current_time;
        let record = state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?;
        let from = *record
            .params
            .get(&param)
            .ok_or(GraphError::UnsupportedParam { node, param })?;
        record.ramps.entry(param).or_default().push(ScheduledRamp {
            from,
            to: value,
            start_time: now,
            end_time,
        });
        // The recorded value is the automation target, as a host would report
        // once the ramp has run.
        record.params.insert(param, value);
        Ok(())
    }

    fn set_filter_type(&self, node: NodeId, filter_type: FilterType) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?;
        if record.kind != NodeKind::BiquadFilter {
            return Err(GraphError::UnsupportedParam {
                node,
                param: ParamKind::Frequency,
            });
        }
        record.filter_type = Some(filter_type);
        Ok(())
    }

    fn set_buffer(&self, node: NodeId, channels: Vec<Vec<f32>>) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?;
        record.buffer_frames = channels.first().map_or(0, Vec::len);
        Ok(())
    }

    fn frequency_data(&self, node: NodeId) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let fft_size = state
            .nodes
            .get(&node)
            .filter(|n| n.kind == NodeKind::Analyser)
            .and_then(|n| n.params.get(&ParamKind::FftSize).copied())
            .ok_or(GraphError::UnknownNode(node))?;
        state.analysis_frame = state.analysis_frame.wrapping_add(1);
        let frame = state.analysis_frame;
        let bins = (fft_size as usize / 2).max(1);
        Ok((0..bins)
            .map(|bin| ((bin as u32).wrapping_mul(7).wrapping_add(frame) % 256) as u8)
            .collect())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.resumed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_only_removes_outgoing() {
        let graph = VirtualGraph::new(48_000.0);
        let a = graph.create_node(NodeKind::Gain).unwrap();
        let b = graph.create_node(NodeKind::Gain).unwrap();
        let c = graph.create_node(NodeKind::Gain).unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(b, c).unwrap();

        graph.disconnect(b);

        assert!(graph.has_edge(a, b));
        assert!(!graph.has_edge(b, c));
    }

    #[test]
    fn release_drops_node_and_edges() {
        let graph = VirtualGraph::new(48_000.0);
        let a = graph.create_node(NodeKind::Gain).unwrap();
        let b = graph.create_node(NodeKind::Delay).unwrap();
        graph.connect(a, b).unwrap();

        graph.release(b);

        assert!(graph.edges().is_empty());
        assert_eq!(graph.kind(b), None);
        assert!(matches!(
            graph.set_param(b, ParamKind::DelayTime, 0.1),
            Err(GraphError::UnknownNode(_))
        ));
    }

    #[test]
    fn unsupported_param_is_rejected() {
        let graph = VirtualGraph::new(48_000.0);
        let gain = graph.create_node(NodeKind::Gain).unwrap();
        assert!(matches!(
            graph.set_param(gain, ParamKind::Ratio, 4.0),
            Err(GraphError::UnsupportedParam { .. })
        ));
    }

    #[test]
    fn ramp_records_start_and_target() {
        let graph = VirtualGraph::new(48_000.0);
        let gain = graph.create_node(NodeKind::Gain).unwrap();
        graph.advance_time(1.5);
        graph.set_param(gain, ParamKind::Gain, 0.2).unwrap();
        graph.linear_ramp(gain, ParamKind::Gain, 0.8, 2.5).unwrap();

        let ramps = graph.ramps(gain, ParamKind::Gain);
        assert_eq!(
            ramps,
            vec![ScheduledRamp {
                from: 0.2,
                to: 0.8,
                start_time: 1.5,
                end_time: 2.5
            }]
        );

        graph.cancel_scheduled(gain, ParamKind::Gain).unwrap();
        assert!(graph.ramps(gain, ParamKind::Gain).is_empty());
    }

    #[test]
    fn resume_failure_is_one_shot() {
        let graph = VirtualGraph::new(48_000.0);
        graph.fail_resume("not allowed");
        assert!(graph.resume().is_err());
        assert!(graph.resume().is_ok());
        assert!(graph.is_resumed());
    }

    #[test]
    fn analyser_reports_half_fft_bins() {
        let graph = VirtualGraph::new(48_000.0);
        let analyser = graph.create_node(NodeKind::Analyser).unwrap();
        graph.set_param(analyser, ParamKind::FftSize, 256.0).unwrap();
        assert_eq!(graph.frequency_data(analyser).unwrap().len(), 128);
    }
}
