//! TransformRegistry - space graph of registered transforms

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use contracts::{CoordinateSpace, PipelineError, Transform, TransformKind, TransformName};
use tracing::debug;

use crate::TransformChain;

/// Transforms registered between the same ordered pair of spaces
///
/// A registration tool that writes an affine and a warp for one alignment
/// yields one edge whose members are applied in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EdgeKey {
    source: CoordinateSpace,
    target: CoordinateSpace,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    edge: EdgeKey,
    forward: bool,
}

/// Named transforms of one subject, resolvable into chains between spaces
#[derive(Debug, Default)]
pub struct TransformRegistry {
    transforms: Vec<Transform>,
    index: HashMap<TransformName, usize>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform from `source` to `target`
    pub fn register(
        &mut self,
        name: TransformName,
        source: CoordinateSpace,
        target: CoordinateSpace,
        kind: TransformKind,
        path: impl Into<PathBuf>,
    ) -> Result<(), PipelineError> {
        self.insert(Transform::new(name, source, target, kind, path))
    }

    /// Register a warp together with its inverse displacement field
    pub fn register_with_inverse(
        &mut self,
        name: TransformName,
        source: CoordinateSpace,
        target: CoordinateSpace,
        kind: TransformKind,
        path: impl Into<PathBuf>,
        inverse_path: impl Into<PathBuf>,
    ) -> Result<(), PipelineError> {
        self.insert(Transform::new(name, source, target, kind, path).with_inverse(inverse_path))
    }

    /// Register a fully built transform
    ///
    /// Registering an identical transform again is a no-op, so a resumed
    /// stage can re-announce what it produced.
    ///
    /// # Errors
    /// - `TransformConflict` when the name is taken by a different transform
    /// - `InvalidTransformChain` when source and target coincide
    pub fn insert(&mut self, transform: Transform) -> Result<(), PipelineError> {
        if transform.source_space == transform.target_space {
            return Err(PipelineError::InvalidTransformChain {
                message: format!(
                    "transform '{}' maps {} onto itself",
                    transform.name, transform.source_space
                ),
            });
        }
        if let Some(&idx) = self.index.get(&transform.name) {
            if self.transforms[idx] == transform {
                return Ok(());
            }
            return Err(PipelineError::TransformConflict {
                name: transform.name.to_string(),
            });
        }

        debug!(
            transform = %transform.name,
            source = %transform.source_space,
            target = %transform.target_space,
            kind = ?transform.kind,
            "Registering transform"
        );
        self.index
            .insert(transform.name.clone(), self.transforms.len());
        self.transforms.push(transform);
        Ok(())
    }

    /// # Errors
    /// `TransformNotRegistered` for an unknown name.
    pub fn get(&self, name: &str) -> Result<&Transform, PipelineError> {
        self.index
            .get(name)
            .map(|&idx| &self.transforms[idx])
            .ok_or_else(|| PipelineError::TransformNotRegistered {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All transforms in registration order
    pub fn transforms(&self) -> impl Iterator<Item = &Transform> {
        self.transforms.iter()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Chain of transforms carrying `from` into `to`, in application order
    ///
    /// Breadth-first over the space graph, so the chain uses the fewest
    /// edges. An edge is walked backwards by applying its members in reverse
    /// order, each inverted; warps without an inverse field cannot be walked
    /// backwards. `from == to` yields an empty chain.
    ///
    /// # Errors
    /// `NoTransformPath` when the spaces are not connected.
    pub fn resolve(
        &self,
        from: CoordinateSpace,
        to: CoordinateSpace,
    ) -> Result<TransformChain, PipelineError> {
        if from == to {
            return TransformChain::new(from, to, Vec::new());
        }

        let edges = self.edges();
        let mut parent: HashMap<CoordinateSpace, (CoordinateSpace, Step)> = HashMap::new();
        let mut visited: HashSet<CoordinateSpace> = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(space) = queue.pop_front() {
            if space == to {
                break;
            }
            for (edge, members) in &edges {
                let step = if edge.source == space {
                    Step { edge: *edge, forward: true }
                } else if edge.target == space && members.iter().all(|t| t.inverted().is_some()) {
                    Step { edge: *edge, forward: false }
                } else {
                    continue;
                };
                let next = if step.forward { edge.target } else { edge.source };
                if visited.insert(next) {
                    parent.insert(next, (space, step));
                    queue.push_back(next);
                }
            }
        }

        if !visited.contains(&to) {
            return Err(PipelineError::NoTransformPath { from, to });
        }

        let mut steps = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let (prev, step) = parent[&cursor];
            steps.push(step);
            cursor = prev;
        }
        steps.reverse();

        let lookup: HashMap<EdgeKey, &Vec<&Transform>> =
            edges.iter().map(|(k, v)| (*k, v)).collect();
        let mut entries = Vec::new();
        for step in &steps {
            let members = lookup[&step.edge];
            if step.forward {
                entries.extend(members.iter().map(|t| (*t).clone()));
            } else {
                for t in members.iter().rev() {
                    // Checked traversable above
                    if let Some(inv) = t.inverted() {
                        entries.push(inv);
                    }
                }
            }
        }

        debug!(%from, %to, hops = steps.len(), transforms = entries.len(), "Resolved transform chain");
        TransformChain::new(from, to, entries)
    }

    /// Edges in first-registration order
    fn edges(&self) -> Vec<(EdgeKey, Vec<&Transform>)> {
        let mut edges: Vec<(EdgeKey, Vec<&Transform>)> = Vec::new();
        for t in &self.transforms {
            let key = EdgeKey {
                source: t.source_space,
                target: t.target_space,
            };
            match edges.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(t),
                None => edges.push((key, vec![t])),
            }
        }
        edges
    }
}
