//! Stage dependency graph and its execution schedule.
//!
//! Stages are nodes and buffers are edges: an edge `a -> b` labelled
//! with buffer `B` means stage `a` writes `B` and stage `b` reads it.
//! Every buffer has exactly one producer, except [`BufferId::Source`],
//! which is filled by the caller before the first stage runs.
//!
//! The graph is levelled into *waves*. A stage's wave is one past the
//! deepest wave of any stage it reads from, so every stage in a wave
//! depends only on earlier waves and the stages of a wave can run
//! concurrently.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

// ───────────────────────────── Buffers ──────────────────────────────

/// Every buffer a pipeline run reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BufferId {
    /// The input image, copied in by the caller.
    Source,
    /// Source after the small blur.
    BlurredSmall,
    /// Source after the large blur.
    BlurredLarge,
    /// Source after the unsharp-mask blur.
    BlurredUnsharpen,
    /// Edge magnitude of the small blur.
    MaskSmall,
    /// Edge magnitude of the large blur.
    MaskLarge,
    /// Minimum of [`MaskLarge`](Self::MaskLarge).
    Minimum,
    /// Maximum of [`MaskLarge`](Self::MaskLarge).
    Maximum,
    /// [`MaskLarge`](Self::MaskLarge) stretched over its range.
    MaskLargeExtended,
    /// Sharpened source.
    Unsharpened,
    /// Sharpened source blended with the large blur.
    Blended,
    /// Final image.
    Output,
}

impl BufferId {
    /// Number of buffers.
    pub const COUNT: usize = 12;

    /// All buffers in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Source,
        Self::BlurredSmall,
        Self::BlurredLarge,
        Self::BlurredUnsharpen,
        Self::MaskSmall,
        Self::MaskLarge,
        Self::Minimum,
        Self::Maximum,
        Self::MaskLargeExtended,
        Self::Unsharpened,
        Self::Blended,
        Self::Output,
    ];

    /// Position in [`ALL`](Self::ALL).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether the buffer holds a single value rather than an image.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(self, Self::Minimum | Self::Maximum)
    }

    /// Snake-case name used in logs and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::BlurredSmall => "blurred_small",
            Self::BlurredLarge => "blurred_large",
            Self::BlurredUnsharpen => "blurred_unsharpen",
            Self::MaskSmall => "mask_small",
            Self::MaskLarge => "mask_large",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::MaskLargeExtended => "mask_large_extended",
            Self::Unsharpened => "unsharpened",
            Self::Blended => "blended",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of buffers fully written during the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadySet(u16);

impl ReadySet {
    /// No buffer ready.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mark `buffer` as written.
    pub const fn insert(&mut self, buffer: BufferId) {
        self.0 |= 1 << buffer.index();
    }

    /// Whether `buffer` has been written.
    #[must_use]
    pub const fn contains(self, buffer: BufferId) -> bool {
        self.0 & (1 << buffer.index()) != 0
    }

    /// Confirm every buffer `stage` reads is ready.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BufferNotReady`] naming the first
    /// missing input.
    pub fn ensure_inputs(self, stage: StageKind) -> Result<(), PipelineError> {
        match stage.reads().iter().find(|&&buffer| !self.contains(buffer)) {
            Some(&buffer) => Err(PipelineError::BufferNotReady { stage, buffer }),
            None => Ok(()),
        }
    }
}

// ───────────────────────────── Stages ───────────────────────────────

/// Every stage of the sharpening pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    /// Small Gaussian blur of the source.
    BlurSmall,
    /// Large Gaussian blur of the source.
    BlurLarge,
    /// Gaussian blur of the source for the unsharp mask.
    BlurUnsharpen,
    /// Sobel magnitude of the small blur.
    SobelSmall,
    /// Sobel magnitude of the large blur.
    SobelLarge,
    /// Minimum of the large mask.
    ReduceMin,
    /// Maximum of the large mask.
    ReduceMax,
    /// Stretch the large mask over its range.
    Extend,
    /// Sharpen the source against its blur.
    Unsharpen,
    /// Blend the sharpened image with the large blur by the extended mask.
    CombineLarge,
    /// Blend the previous result with the small blur by the small mask.
    CombineSmall,
}

/// Total number of stages.
pub const STAGE_COUNT: usize = 11;

impl StageKind {
    /// All stages in canonical order.
    pub const ALL: [Self; STAGE_COUNT] = [
        Self::BlurSmall,
        Self::BlurLarge,
        Self::BlurUnsharpen,
        Self::SobelSmall,
        Self::SobelLarge,
        Self::ReduceMin,
        Self::ReduceMax,
        Self::Extend,
        Self::Unsharpen,
        Self::CombineLarge,
        Self::CombineSmall,
    ];

    /// Position in the canonical order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name used in logs and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BlurSmall => "blur_small",
            Self::BlurLarge => "blur_large",
            Self::BlurUnsharpen => "blur_unsharpen",
            Self::SobelSmall => "sobel_small",
            Self::SobelLarge => "sobel_large",
            Self::ReduceMin => "reduce_min",
            Self::ReduceMax => "reduce_max",
            Self::Extend => "extend",
            Self::Unsharpen => "unsharpen",
            Self::CombineLarge => "combine_large",
            Self::CombineSmall => "combine_small",
        }
    }

    /// Buffers the stage reads.
    #[must_use]
    pub const fn reads(self) -> &'static [BufferId] {
        use BufferId as B;
        match self {
            Self::BlurSmall | Self::BlurLarge | Self::BlurUnsharpen => &[B::Source],
            Self::SobelSmall => &[B::BlurredSmall],
            Self::SobelLarge => &[B::BlurredLarge],
            Self::ReduceMin | Self::ReduceMax => &[B::MaskLarge],
            Self::Extend => &[B::MaskLarge, B::Minimum, B::Maximum],
            Self::Unsharpen => &[B::Source, B::BlurredUnsharpen],
            Self::CombineLarge => &[B::Unsharpened, B::BlurredLarge, B::MaskLargeExtended],
            Self::CombineSmall => &[B::Blended, B::BlurredSmall, B::MaskSmall],
        }
    }

    /// The buffer the stage writes.
    #[must_use]
    pub const fn writes(self) -> BufferId {
        match self {
            Self::BlurSmall => BufferId::BlurredSmall,
            Self::BlurLarge => BufferId::BlurredLarge,
            Self::BlurUnsharpen => BufferId::BlurredUnsharpen,
            Self::SobelSmall => BufferId::MaskSmall,
            Self::SobelLarge => BufferId::MaskLarge,
            Self::ReduceMin => BufferId::Minimum,
            Self::ReduceMax => BufferId::Maximum,
            Self::Extend => BufferId::MaskLargeExtended,
            Self::Unsharpen => BufferId::Unsharpened,
            Self::CombineLarge => BufferId::Blended,
            Self::CombineSmall => BufferId::Output,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One node of a [`TaskGraph`]: a stage with its buffer signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    /// Which stage this node runs.
    pub kind: StageKind,
    /// Buffers read.
    pub reads: Vec<BufferId>,
    /// Buffer written.
    pub writes: BufferId,
}

impl StageNode {
    /// Node with the built-in signature of `kind`.
    #[must_use]
    pub fn of(kind: StageKind) -> Self {
        Self {
            kind,
            reads: kind.reads().to_vec(),
            writes: kind.writes(),
        }
    }
}

// ──────────────────────────── TaskGraph ─────────────────────────────

/// Validated stage DAG with its wave and serial schedules.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<StageKind, BufferId>,
    waves: Vec<Vec<StageKind>>,
    serial: Vec<StageKind>,
}

impl TaskGraph {
    /// The graph of the full sharpening pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidGraph`] only if the built-in stage
    /// signatures are inconsistent.
    pub fn standard() -> Result<Self, PipelineError> {
        Self::build(StageKind::ALL.into_iter().map(StageNode::of))
    }

    /// Build and validate a graph from stage nodes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidGraph`] if a stage appears twice,
    /// a buffer has two producers, a stage writes the source, a read
    /// buffer has no producer, or the dependencies form a cycle.
    pub fn build(nodes: impl IntoIterator<Item = StageNode>) -> Result<Self, PipelineError> {
        let nodes: Vec<StageNode> = nodes.into_iter().collect();
        let mut graph = DiGraph::with_capacity(nodes.len(), nodes.len() * 2);
        let mut index_of: HashMap<StageKind, NodeIndex> = HashMap::new();
        let mut producer: HashMap<BufferId, StageKind> = HashMap::new();

        for node in &nodes {
            if index_of.insert(node.kind, graph.add_node(node.kind)).is_some() {
                return Err(invalid(format!("stage {} appears twice", node.kind)));
            }
            if node.writes == BufferId::Source {
                return Err(invalid(format!(
                    "stage {} writes the source buffer",
                    node.kind
                )));
            }
            if let Some(other) = producer.insert(node.writes, node.kind) {
                return Err(invalid(format!(
                    "buffer {} has two producers: {other} and {}",
                    node.writes, node.kind
                )));
            }
        }

        for node in &nodes {
            for &buffer in &node.reads {
                if buffer == BufferId::Source {
                    continue;
                }
                let Some(&from) = producer.get(&buffer) else {
                    return Err(invalid(format!(
                        "stage {} reads buffer {buffer}, which no stage produces",
                        node.kind
                    )));
                };
                graph.add_edge(index_of[&from], index_of[&node.kind], buffer);
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            invalid(format!("dependency cycle through stage {}", graph[cycle.node_id()]))
        })?;

        let waves = level(&graph, &order);
        let serial = canonical_topological_order(&graph);
        Ok(Self {
            graph,
            waves,
            serial,
        })
    }

    /// Stages grouped into waves; stages of one wave are independent.
    /// Each wave is sorted in canonical order.
    #[must_use]
    pub fn waves(&self) -> &[Vec<StageKind>] {
        &self.waves
    }

    /// Topological order that prefers the canonical stage order.
    #[must_use]
    pub fn serial_order(&self) -> &[StageKind] {
        &self.serial
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.graph.node_count()
    }

    /// `(producer, consumer, buffer)` for every dependency edge.
    pub fn dependencies(&self) -> impl Iterator<Item = (StageKind, StageKind, BufferId)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (self.graph[e.source()], self.graph[e.target()], *e.weight()))
    }

    /// Stages that read what `stage` writes.
    #[must_use]
    pub fn consumers(&self, stage: StageKind) -> Vec<StageKind> {
        let Some(node) = self.graph.node_indices().find(|&n| self.graph[n] == stage) else {
            return Vec::new();
        };
        let mut out: Vec<StageKind> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

fn invalid(message: String) -> PipelineError {
    PipelineError::InvalidGraph(message)
}

/// Longest-path level of every node, grouped.
fn level(graph: &DiGraph<StageKind, BufferId>, order: &[NodeIndex]) -> Vec<Vec<StageKind>> {
    let mut depth = vec![0_usize; graph.node_count()];
    for &node in order {
        depth[node.index()] = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|pred| depth[pred.index()] + 1)
            .max()
            .unwrap_or(0);
    }

    let wave_count = depth.iter().max().map_or(0, |d| d + 1);
    let mut waves = vec![Vec::new(); wave_count];
    for node in graph.node_indices() {
        waves[depth[node.index()]].push(graph[node]);
    }
    for wave in &mut waves {
        wave.sort_unstable();
    }
    waves
}

/// Kahn's algorithm, always releasing the ready stage that comes first
/// in canonical order. Assumes the graph is acyclic.
fn canonical_topological_order(graph: &DiGraph<StageKind, BufferId>) -> Vec<StageKind> {
    let mut pending: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.edges_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<(StageKind, NodeIndex)>> = graph
        .node_indices()
        .filter(|n| pending[n.index()] == 0)
        .map(|n| Reverse((graph[n], n)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((stage, node))) = ready.pop() {
        order.push(stage);
        for edge in graph.edges_directed(node, Direction::Outgoing) {
            let next = edge.target();
            pending[next.index()] -= 1;
            if pending[next.index()] == 0 {
                ready.push(Reverse((graph[next], next)));
            }
        }
    }
    order
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use StageKind as S;

    #[test]
    fn stage_and_buffer_tables_are_consistent() {
        for (i, stage) in StageKind::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
        for (i, buffer) in BufferId::ALL.iter().enumerate() {
            assert_eq!(buffer.index(), i);
        }
        // Every buffer except the source has exactly one writer.
        for buffer in BufferId::ALL.iter().skip(1) {
            let writers = StageKind::ALL.iter().filter(|s| s.writes() == *buffer).count();
            assert_eq!(writers, 1, "{buffer}");
        }
    }

    #[test]
    fn standard_graph_levels_into_expected_waves() {
        let graph = TaskGraph::standard().unwrap();
        assert_eq!(
            graph.waves(),
            &[
                vec![S::BlurSmall, S::BlurLarge, S::BlurUnsharpen],
                vec![S::SobelSmall, S::SobelLarge, S::Unsharpen],
                vec![S::ReduceMin, S::ReduceMax],
                vec![S::Extend],
                vec![S::CombineLarge],
                vec![S::CombineSmall],
            ]
        );
        assert_eq!(graph.stage_count(), STAGE_COUNT);
    }

    #[test]
    fn serial_order_is_the_canonical_order() {
        let graph = TaskGraph::standard().unwrap();
        assert_eq!(graph.serial_order(), &StageKind::ALL);
    }

    #[test]
    fn edges_are_labelled_by_buffer() {
        let graph = TaskGraph::standard().unwrap();
        let deps: Vec<_> = graph.dependencies().collect();
        assert!(deps.contains(&(S::ReduceMin, S::Extend, BufferId::Minimum)));
        assert!(deps.contains(&(S::SobelSmall, S::CombineSmall, BufferId::MaskSmall)));
        assert!(deps.contains(&(S::BlurLarge, S::CombineLarge, BufferId::BlurredLarge)));
        // Reads of the source are external and carry no edge.
        assert!(deps.iter().all(|&(_, _, b)| b != BufferId::Source));
        assert_eq!(
            graph.consumers(S::SobelLarge),
            vec![S::ReduceMin, S::ReduceMax, S::Extend]
        );
    }

    #[test]
    fn duplicate_producer_is_rejected() {
        let mut rogue = StageNode::of(S::Unsharpen);
        rogue.writes = BufferId::MaskSmall;
        let nodes = StageKind::ALL
            .into_iter()
            .filter(|&k| k != S::Unsharpen)
            .map(StageNode::of)
            .chain([rogue]);
        let err = TaskGraph::build(nodes).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InvalidGraph(
                "buffer mask_small has two producers: sobel_small and unsharpen".to_string()
            )
        );
    }

    #[test]
    fn missing_producer_is_rejected() {
        let nodes = StageKind::ALL
            .into_iter()
            .filter(|&k| k != S::ReduceMax)
            .map(StageNode::of);
        let err = TaskGraph::build(nodes).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGraph(msg) if msg.contains("maximum")));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut extend = StageNode::of(S::Extend);
        extend.reads.push(BufferId::Output);
        let nodes = StageKind::ALL
            .into_iter()
            .map(|k| if k == S::Extend { extend.clone() } else { StageNode::of(k) });
        let err = TaskGraph::build(nodes).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGraph(msg) if msg.contains("cycle")));
    }

    #[test]
    fn writing_the_source_is_rejected() {
        let mut blur = StageNode::of(S::BlurSmall);
        blur.writes = BufferId::Source;
        assert!(TaskGraph::build([blur]).is_err());
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let nodes = [StageNode::of(S::BlurSmall), StageNode::of(S::BlurSmall)];
        let err = TaskGraph::build(nodes).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGraph(msg) if msg.contains("twice")));
    }

    #[test]
    fn ready_set_tracks_inputs() {
        let mut ready = ReadySet::empty();
        ready.insert(BufferId::MaskLarge);
        ready.insert(BufferId::Minimum);
        assert_eq!(
            ready.ensure_inputs(S::Extend),
            Err(PipelineError::BufferNotReady {
                stage: S::Extend,
                buffer: BufferId::Maximum,
            })
        );
        ready.insert(BufferId::Maximum);
        assert!(ready.ensure_inputs(S::Extend).is_ok());
        assert!(!ready.contains(BufferId::Output));
    }

    #[test]
    fn names_are_snake_case() {
        assert_eq!(S::CombineLarge.to_string(), "combine_large");
        assert_eq!(BufferId::MaskLargeExtended.to_string(), "mask_large_extended");
        assert!(BufferId::Minimum.is_scalar());
        assert!(!BufferId::Output.is_scalar());
    }
}
