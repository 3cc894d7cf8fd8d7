//! StageGraph - validated stage DAG
//!
//! Validation runs once at construction and is fatal. Checks, in order:
//! 1. stage ids are unique
//! 2. every artifact / transform has exactly one producer (inputs included)
//! 3. every requirement has a producer
//! 4. the stage dependency graph is acyclic (Kahn)
//! 5. requirements are produced by an input or a strictly earlier stage
//! 6. argument templates and transform declarations are consistent

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use contracts::{
    ArgToken, ArtifactName, PipelineDefinition, PipelineError, Producer, SourceDecl, StageId,
    StageSpec, TransformName,
};
use tracing::debug;

const ARTIFACT: &str = "artifact";
const TRANSFORM: &str = "transform";

/// Validated, immutable pipeline definition
#[derive(Debug, Clone)]
pub struct StageGraph {
    definition: PipelineDefinition,
    positions: HashMap<StageId, usize>,
    artifact_producers: HashMap<ArtifactName, Producer>,
    transform_producers: HashMap<TransformName, StageId>,
    /// Upstream stage indices of each stage
    upstream: Vec<BTreeSet<usize>>,
    /// Downstream stage indices of each stage
    downstream: Vec<BTreeSet<usize>>,
}

impl StageGraph {
    /// Validate a definition
    ///
    /// # Errors
    /// `DuplicateStage`, `DuplicateProducer`, `UnknownDependency`,
    /// `DependencyCycle`, `ForwardReference` or `InvalidStage`.
    pub fn new(definition: PipelineDefinition) -> Result<Self, PipelineError> {
        let positions = index_stages(&definition.stages)?;
        let (artifact_producers, transform_producers) = collect_producers(&definition)?;

        let stages = &definition.stages;
        let mut upstream = vec![BTreeSet::new(); stages.len()];
        let mut downstream = vec![BTreeSet::new(); stages.len()];

        for (idx, stage) in stages.iter().enumerate() {
            for name in &stage.required_artifacts {
                match artifact_producers.get(name) {
                    Some(Producer::Input) => {}
                    Some(Producer::Stage(producer)) => {
                        let p = positions[producer];
                        upstream[idx].insert(p);
                        downstream[p].insert(idx);
                    }
                    None => return Err(unknown(stage, ARTIFACT, name)),
                }
            }
            for name in &stage.required_transforms {
                match transform_producers.get(name) {
                    Some(producer) => {
                        let p = positions[producer];
                        upstream[idx].insert(p);
                        downstream[p].insert(idx);
                    }
                    None => return Err(unknown(stage, TRANSFORM, name)),
                }
            }
        }

        check_acyclic(stages, &upstream, &downstream)?;

        let graph = Self {
            definition,
            positions,
            artifact_producers,
            transform_producers,
            upstream,
            downstream,
        };
        graph.check_no_forward_references()?;
        for stage in graph.stages() {
            check_stage(stage)?;
        }

        debug!(
            version = %graph.definition.version,
            stages = graph.definition.stages.len(),
            sources = graph.definition.sources.len(),
            "Stage graph validated"
        );
        Ok(graph)
    }

    fn check_no_forward_references(&self) -> Result<(), PipelineError> {
        for (idx, stage) in self.stages().iter().enumerate() {
            for name in &stage.required_artifacts {
                if let Some(Producer::Stage(producer)) = self.artifact_producers.get(name) {
                    if self.positions[producer] >= idx {
                        return Err(forward(stage, ARTIFACT, name, producer));
                    }
                }
            }
            for name in &stage.required_transforms {
                if let Some(producer) = self.transform_producers.get(name) {
                    if self.positions[producer] >= idx {
                        return Err(forward(stage, TRANSFORM, name, producer));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn version(&self) -> &str {
        &self.definition.version
    }

    /// Stages in execution order (the declared order)
    pub fn stages(&self) -> &[StageSpec] {
        &self.definition.stages
    }

    pub fn sources(&self) -> &[SourceDecl] {
        &self.definition.sources
    }

    pub fn stage(&self, id: &str) -> Option<&StageSpec> {
        self.position(id).map(|idx| &self.definition.stages[idx])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.definition.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definition.stages.is_empty()
    }

    pub fn artifact_producer(&self, name: &str) -> Option<&Producer> {
        self.artifact_producers.get(name)
    }

    pub fn transform_producer(&self, name: &str) -> Option<&StageId> {
        self.transform_producers.get(name)
    }

    /// Stages the given stage directly consumes from, in execution order
    pub fn dependencies(&self, id: &str) -> Vec<&StageId> {
        self.related(id, &self.upstream)
    }

    /// Stages directly consuming the given stage's outputs, in execution order
    pub fn dependents(&self, id: &str) -> Vec<&StageId> {
        self.related(id, &self.downstream)
    }

    /// Every stage that directly or transitively depends on `id`, in execution order
    pub fn transitive_dependents(&self, id: &str) -> Vec<&StageId> {
        let Some(start) = self.position(id) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for &next in &self.downstream[idx] {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.into_iter()
            .map(|idx| &self.definition.stages[idx].id)
            .collect()
    }

    /// The graph restricted to the stages up to and including `id`
    ///
    /// # Errors
    /// `InvalidStage` when `id` is not part of the pipeline.
    pub fn through(&self, id: &str) -> Result<StageGraph, PipelineError> {
        let idx = self
            .position(id)
            .ok_or_else(|| PipelineError::invalid_stage(id, "no such stage in this pipeline"))?;
        let definition = PipelineDefinition {
            version: self.definition.version.clone(),
            sources: self.definition.sources.clone(),
            stages: self.definition.stages[..=idx].to_vec(),
        };
        StageGraph::new(definition)
    }

    fn related<'a>(&'a self, id: &str, edges: &'a [BTreeSet<usize>]) -> Vec<&'a StageId> {
        match self.position(id) {
            Some(idx) => edges[idx]
                .iter()
                .map(|&i| &self.definition.stages[i].id)
                .collect(),
            None => Vec::new(),
        }
    }
}

fn index_stages(stages: &[StageSpec]) -> Result<HashMap<StageId, usize>, PipelineError> {
    let mut positions = HashMap::with_capacity(stages.len());
    for (idx, stage) in stages.iter().enumerate() {
        if positions.insert(stage.id.clone(), idx).is_some() {
            return Err(PipelineError::DuplicateStage {
                stage: stage.id.to_string(),
            });
        }
    }
    Ok(positions)
}

type Producers = (HashMap<ArtifactName, Producer>, HashMap<TransformName, StageId>);

fn collect_producers(definition: &PipelineDefinition) -> Result<Producers, PipelineError> {
    let mut artifacts: HashMap<ArtifactName, Producer> = HashMap::new();
    let mut transforms: HashMap<TransformName, StageId> = HashMap::new();

    let mut claim = |name: &ArtifactName, producer: Producer| match artifacts.get(name) {
        Some(first) => Err(PipelineError::DuplicateProducer {
            what: ARTIFACT,
            name: name.to_string(),
            first: first.to_string(),
            second: producer.to_string(),
        }),
        None => {
            artifacts.insert(name.clone(), producer);
            Ok(())
        }
    };

    for source in &definition.sources {
        claim(&source.name, Producer::Input)?;
    }
    for stage in &definition.stages {
        for decl in &stage.produced_artifacts {
            claim(&decl.name, Producer::Stage(stage.id.clone()))?;
        }
    }

    for stage in &definition.stages {
        for decl in &stage.produced_transforms {
            if let Some(first) = transforms.get(&decl.name) {
                return Err(PipelineError::DuplicateProducer {
                    what: TRANSFORM,
                    name: decl.name.to_string(),
                    first: first.to_string(),
                    second: stage.id.to_string(),
                });
            }
            transforms.insert(decl.name.clone(), stage.id.clone());
        }
    }
    Ok((artifacts, transforms))
}

/// Kahn's algorithm; on failure names one cycle
fn check_acyclic(
    stages: &[StageSpec],
    upstream: &[BTreeSet<usize>],
    downstream: &[BTreeSet<usize>],
) -> Result<(), PipelineError> {
    let mut in_degree: Vec<usize> = upstream.iter().map(BTreeSet::len).collect();
    let mut ready: VecDeque<usize> = (0..stages.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut done = 0;

    while let Some(idx) = ready.pop_front() {
        done += 1;
        for &next in &downstream[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if done == stages.len() {
        return Ok(());
    }

    // Every remaining stage has an upstream edge inside the remainder, so
    // walking upstream from any of them must revisit a stage.
    let remaining: HashSet<usize> = (0..stages.len()).filter(|&i| in_degree[i] > 0).collect();
    let start = remaining.iter().copied().min().unwrap_or_default();
    let mut path = vec![start];
    let mut cursor = start;
    loop {
        let Some(&prev) = upstream[cursor].iter().find(|&&p| remaining.contains(&p)) else {
            break;
        };
        if let Some(at) = path.iter().position(|&i| i == prev) {
            path.push(prev);
            path.drain(..at);
            break;
        }
        path.push(prev);
        cursor = prev;
    }
    // Walked against the edges; report in dependency direction
    path.reverse();

    Err(PipelineError::DependencyCycle {
        stages: path
            .into_iter()
            .map(|i| stages[i].id.to_string())
            .collect(),
    })
}

/// Argument template and transform declarations of one stage
fn check_stage(stage: &StageSpec) -> Result<(), PipelineError> {
    if stage.command.program.trim().is_empty() {
        return Err(PipelineError::invalid_stage(stage.id.as_str(), "no program"));
    }
    if stage.produced_artifacts.is_empty() {
        return Err(PipelineError::invalid_stage(
            stage.id.as_str(),
            "declares no output artifacts, so completion could never be checked",
        ));
    }

    let produced: HashSet<&str> = stage.produced_artifact_names().map(|n| n.as_str()).collect();

    for decl in &stage.produced_artifacts {
        if decl.file_name.is_empty() || decl.file_name.contains('/') {
            return Err(PipelineError::invalid_stage(
                stage.id.as_str(),
                format!("output '{}' needs a plain file name", decl.name),
            ));
        }
    }

    for token in stage.tokens() {
        match token {
            ArgToken::Input(name) if !stage.required_artifacts.contains(name) => {
                return Err(PipelineError::invalid_stage(
                    stage.id.as_str(),
                    format!("argument {token} is not a required artifact"),
                ));
            }
            ArgToken::Output(name) if !produced.contains(name.as_str()) => {
                return Err(PipelineError::invalid_stage(
                    stage.id.as_str(),
                    format!("argument {token} is not a produced artifact"),
                ));
            }
            ArgToken::Chain { from, to } if from != to && stage.required_transforms.is_empty() => {
                return Err(PipelineError::invalid_stage(
                    stage.id.as_str(),
                    format!("argument {token} needs declared transform requirements"),
                ));
            }
            _ => {}
        }
    }

    for decl in &stage.produced_transforms {
        let files = std::iter::once(&decl.file).chain(decl.inverse_file.as_ref());
        for file in files {
            if !produced.contains(file.as_str()) {
                return Err(PipelineError::invalid_stage(
                    stage.id.as_str(),
                    format!(
                        "transform '{}' is backed by '{file}', which the stage does not produce",
                        decl.name
                    ),
                ));
            }
        }
        if decl.source_space == decl.target_space {
            return Err(PipelineError::invalid_stage(
                stage.id.as_str(),
                format!("transform '{}' maps {} onto itself", decl.name, decl.source_space),
            ));
        }
    }
    Ok(())
}

fn unknown(stage: &StageSpec, what: &'static str, name: &str) -> PipelineError {
    PipelineError::UnknownDependency {
        stage: stage.id.to_string(),
        what,
        name: name.to_string(),
    }
}

fn forward(stage: &StageSpec, what: &'static str, name: &str, producer: &StageId) -> PipelineError {
    PipelineError::ForwardReference {
        stage: stage.id.to_string(),
        what,
        name: name.to_string(),
        producer: producer.to_string(),
    }
}
