//! Job dependency graph
//!
//! Nodes are the jobs of one experiment; edges come from a static,
//! declarative list. Nodes the execution plan does not run are contracted:
//! their dependents inherit their dependencies. Emission order is Kahn's
//! algorithm with ties broken by node order, so the graph is deterministic.

use crate::capabilities::ExecutionPlan;
use crate::error::{Result, ToolchainError};
use crate::types::{Cohort, Group, ScoreType, Stage};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// One job of the experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobNode {
    Preprocess,
    ExtractTrain,
    Extract,
    ProjectTrain,
    Project,
    EnrollTrain,
    Enroll { cohort: Cohort, group: Group },
    Score { score_type: ScoreType, group: Group },
    ZNormMerge { group: Group },
    Concatenate { group: Group },
}

impl JobNode {
    pub fn stage(self) -> Stage {
        match self {
            JobNode::Preprocess => Stage::Preprocess,
            JobNode::ExtractTrain => Stage::ExtractTrain,
            JobNode::Extract => Stage::Extract,
            JobNode::ProjectTrain => Stage::ProjectTrain,
            JobNode::Project => Stage::Project,
            JobNode::EnrollTrain => Stage::EnrollTrain,
            JobNode::Enroll { .. } => Stage::Enroll,
            JobNode::Score { .. } => Stage::Score,
            JobNode::ZNormMerge { .. } => Stage::ZNormMerge,
            JobNode::Concatenate { .. } => Stage::Concatenate,
        }
    }

    /// Job name, e.g. `enroll-N-dev` or `score-C-eval`
    pub fn name(self) -> String {
        match self {
            JobNode::Enroll { cohort, group } => format!("enroll-{}-{}", cohort.letter(), group),
            JobNode::Score { score_type, group } => format!("score-{}-{}", score_type, group),
            JobNode::ZNormMerge { group } | JobNode::Concatenate { group } => {
                format!("{}-{}", self.stage(), group)
            }
            other => other.stage().label().to_string(),
        }
    }

    /// Trainers run as a single task; everything else is an array job
    pub fn is_array(self) -> bool {
        !self.stage().is_trainer()
    }

    /// Only meaningful with ZT normalization
    pub fn needs_zt(self) -> bool {
        match self {
            JobNode::Enroll { cohort, .. } => cohort == Cohort::TModels,
            JobNode::Score { score_type, .. } => score_type != ScoreType::A,
            _ => false,
        }
    }

    /// Every node of an experiment over `groups`, in node order
    pub fn all(groups: &[Group]) -> Vec<JobNode> {
        let mut nodes = vec![
            JobNode::Preprocess,
            JobNode::ExtractTrain,
            JobNode::Extract,
            JobNode::ProjectTrain,
            JobNode::Project,
            JobNode::EnrollTrain,
        ];
        for &group in groups {
            for cohort in [Cohort::Models, Cohort::TModels] {
                nodes.push(JobNode::Enroll { cohort, group });
            }
            for score_type in ScoreType::ALL {
                nodes.push(JobNode::Score { score_type, group });
            }
            nodes.push(JobNode::ZNormMerge { group });
            nodes.push(JobNode::Concatenate { group });
        }
        nodes.sort();
        nodes
    }
}

impl fmt::Display for JobNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn parse_cohort(letter: &str) -> Option<Cohort> {
    match letter {
        "N" => Some(Cohort::Models),
        "T" => Some(Cohort::TModels),
        _ => None,
    }
}

fn parse_score_type(letter: &str) -> Option<ScoreType> {
    ScoreType::ALL.into_iter().find(|t| t.letter() == letter)
}

impl FromStr for JobNode {
    type Err = ToolchainError;

    fn from_str(name: &str) -> Result<Self> {
        let unknown = || ToolchainError::Config(format!("unknown job '{}'", name));
        let simple = [
            JobNode::Preprocess,
            JobNode::ExtractTrain,
            JobNode::Extract,
            JobNode::ProjectTrain,
            JobNode::Project,
            JobNode::EnrollTrain,
        ];
        if let Some(node) = simple.into_iter().find(|n| n.name() == name) {
            return Ok(node);
        }

        let (head, group) = name.rsplit_once('-').ok_or_else(unknown)?;
        let group: Group = group.parse().map_err(|_| unknown())?;
        let node = if let Some(letter) = head.strip_prefix("enroll-") {
            JobNode::Enroll {
                cohort: parse_cohort(letter).ok_or_else(unknown)?,
                group,
            }
        } else if let Some(letter) = head.strip_prefix("score-") {
            JobNode::Score {
                score_type: parse_score_type(letter).ok_or_else(unknown)?,
                group,
            }
        } else if head == Stage::ZNormMerge.label() {
            JobNode::ZNormMerge { group }
        } else if head == Stage::Concatenate.label() {
            JobNode::Concatenate { group }
        } else {
            return Err(unknown());
        };
        Ok(node)
    }
}

/// Static dependency edges `(upstream, downstream)` for `groups`
pub fn edges(groups: &[Group]) -> Vec<(JobNode, JobNode)> {
    use JobNode::*;

    let mut edges = vec![
        (Preprocess, ExtractTrain),
        (Preprocess, Extract),
        (ExtractTrain, Extract),
        (Extract, ProjectTrain),
        (Extract, Project),
        (Extract, EnrollTrain),
        (ProjectTrain, Project),
        (Project, EnrollTrain),
    ];
    for &group in groups {
        for cohort in [Cohort::Models, Cohort::TModels] {
            let enroll = Enroll { cohort, group };
            edges.push((Extract, enroll));
            edges.push((Project, enroll));
            edges.push((EnrollTrain, enroll));
        }
        for score_type in ScoreType::ALL {
            let cohort = if score_type.uses_t_models() {
                Cohort::TModels
            } else {
                Cohort::Models
            };
            let score = Score { score_type, group };
            edges.push((Enroll { cohort, group }, score));
            edges.push((score, ZNormMerge { group }));
        }
        edges.push((ZNormMerge { group }, Concatenate { group }));
    }
    edges
}

/// Jobs to run and their direct dependencies, in topological order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobGraph {
    order: Vec<JobNode>,
    dependencies: BTreeMap<JobNode, BTreeSet<JobNode>>,
}

impl JobGraph {
    /// Build the graph of nodes the plan runs
    pub fn build(plan: &ExecutionPlan, groups: &[Group]) -> Result<Self> {
        // Cohort jobs do not exist without ZT; they are removed, not contracted
        let exists = |n: &JobNode| plan.zt_norm || !n.needs_zt();
        let active: BTreeSet<JobNode> = JobNode::all(groups)
            .into_iter()
            .filter(|n| exists(n) && plan.runs(n.stage()))
            .collect();
        let edges: Vec<(JobNode, JobNode)> = edges(groups)
            .into_iter()
            .filter(|(from, to)| exists(from) && exists(to))
            .collect();
        Self::from_edges(&active, &edges)
    }

    /// Contract every node outside `active` and order the rest
    pub fn from_edges(active: &BTreeSet<JobNode>, edges: &[(JobNode, JobNode)]) -> Result<Self> {
        let mut upstream: BTreeMap<JobNode, BTreeSet<JobNode>> = BTreeMap::new();
        for (from, to) in edges {
            upstream.entry(*to).or_default().insert(*from);
        }

        let mut dependencies = BTreeMap::new();
        for node in active {
            let mut deps = BTreeSet::new();
            let mut stack: Vec<JobNode> = upstream.get(node).into_iter().flatten().copied().collect();
            let mut seen = BTreeSet::new();
            while let Some(candidate) = stack.pop() {
                if !seen.insert(candidate) {
                    continue;
                }
                if active.contains(&candidate) {
                    deps.insert(candidate);
                } else {
                    stack.extend(upstream.get(&candidate).into_iter().flatten().copied());
                }
            }
            dependencies.insert(*node, deps);
        }

        // Kahn, smallest ready node first
        let mut remaining: BTreeMap<JobNode, usize> =
            dependencies.iter().map(|(n, d)| (*n, d.len())).collect();
        let mut ready: BTreeSet<JobNode> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(dependencies.len());
        while let Some(node) = ready.pop_first() {
            remaining.remove(&node);
            order.push(node);
            for (other, deps) in &dependencies {
                if deps.contains(&node) {
                    if let Some(count) = remaining.get_mut(other) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(*other);
                        }
                    }
                }
            }
        }
        if !remaining.is_empty() {
            return Err(ToolchainError::Config(format!(
                "job graph has a cycle through {}",
                remaining
                    .keys()
                    .map(|n| n.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        Ok(Self {
            order,
            dependencies,
        })
    }

    /// Nodes in topological order
    pub fn nodes(&self) -> &[JobNode] {
        &self.order
    }

    pub fn dependencies(&self, node: JobNode) -> impl Iterator<Item = JobNode> + '_ {
        self.dependencies.get(&node).into_iter().flatten().copied()
    }

    pub fn contains(&self, node: JobNode) -> bool {
        self.dependencies.contains_key(&node)
    }
}
