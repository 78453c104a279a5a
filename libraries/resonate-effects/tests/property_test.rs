//! Property-based tests for graph rebuilding

use std::sync::Arc;

use proptest::prelude::*;
use resonate_effects::{
    AudioBackend, AudioEffect, EffectsProcessor, FilterType, NodeId, NodeKind, VirtualGraph,
};

// ===== Helpers =====

fn catalogue() -> Vec<AudioEffect> {
    vec![
        AudioEffect::filter("hp", FilterType::Highpass, 120.0),
        AudioEffect::filter("notch", FilterType::Notch, 1000.0),
        AudioEffect::reverb("hall"),
        AudioEffect::delay("echo"),
        AudioEffect::filter("lp", FilterType::Lowpass, 6000.0),
        AudioEffect::gain("trim", 0.8),
        AudioEffect::compressor("comp"),
    ]
}

/// Any subset of the catalogue, in any order
fn effect_set() -> impl Strategy<Value = Vec<AudioEffect>> {
    let all = catalogue();
    let len = all.len();
    proptest::sample::subsequence(all, 0..=len).prop_shuffle()
}

fn setup() -> (Arc<VirtualGraph>, NodeId, NodeId, EffectsProcessor) {
    let graph = Arc::new(VirtualGraph::new(48_000.0));
    let source = graph.create_node(NodeKind::MediaSource).unwrap();
    let analyser = graph.create_node(NodeKind::Analyser).unwrap();
    graph.connect(analyser, graph.destination()).unwrap();
    let processor = EffectsProcessor::new(graph.clone(), source, analyser).unwrap();
    (graph, source, analyser, processor)
}

// ===== Property Tests =====

proptest! {
    /// Property: the source always reaches the analyser, whatever is applied
    #[test]
    fn source_always_reaches_analyser(effects in effect_set()) {
        let (graph, source, analyser, mut processor) = setup();

        processor.apply_effects(&effects).unwrap();

        prop_assert!(graph.has_path(source, analyser));
        prop_assert!(graph.has_path(source, graph.destination()));
    }

    /// Property: every applied id gets nodes, in declared order
    #[test]
    fn applied_ids_are_active(effects in effect_set()) {
        let (_graph, _source, _analyser, mut processor) = setup();

        processor.apply_effects(&effects).unwrap();

        let ids: Vec<String> = effects.iter().map(|e| e.id.clone()).collect();
        prop_assert_eq!(processor.active_ids(), ids);
    }

    /// Property: any sequence of rebuilds ending in `[]` leaves no effect nodes behind
    #[test]
    fn rebuilds_never_leak_nodes(sets in proptest::collection::vec(effect_set(), 1..5)) {
        let (graph, source, analyser, mut processor) = setup();
        let base = graph.node_count();

        for effects in &sets {
            processor.apply_effects(effects).unwrap();
        }
        processor.apply_effects(&[]).unwrap();

        prop_assert_eq!(graph.node_count(), base);
        prop_assert_eq!(graph.outputs(source), vec![analyser]);
    }
}
