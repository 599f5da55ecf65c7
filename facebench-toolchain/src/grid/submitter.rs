//! Grid submitter
//!
//! Walks a [`JobGraph`] in topological order and submits one request per
//! node. Array jobs get `ceil(units / units_per_job)` tasks; every request
//! depends on the ids of the node's upstream jobs.

use super::backend::{JobId, JobRequest, SubmissionBackend};
use super::graph::{JobGraph, JobNode};
use super::GridProfile;
use crate::error::{Result, ToolchainError};
use crate::sharder::shard_count;
use std::collections::BTreeMap;

/// Build the request for one node
pub fn job_request(
    node: JobNode,
    units: usize,
    profile: &GridProfile,
    base_command: &[String],
    dependencies: Vec<JobId>,
) -> JobRequest {
    let stage = node.stage();
    let array_size = node
        .is_array()
        .then(|| shard_count(units, profile.units_per_job(stage)).max(1));

    let mut command = base_command.to_vec();
    command.push("--execute-job".to_string());
    command.push(node.name());

    JobRequest {
        name: node.name(),
        command,
        array_size,
        queue: profile.queue(stage).to_string(),
        memory: profile.memory.clone(),
        dependencies,
    }
}

/// Submit every node of the graph; returns the id of each node
pub fn submit_graph(
    graph: &JobGraph,
    unit_counts: &BTreeMap<JobNode, usize>,
    profile: &GridProfile,
    base_command: &[String],
    backend: &mut dyn SubmissionBackend,
) -> Result<BTreeMap<JobNode, JobId>> {
    let mut ids: BTreeMap<JobNode, JobId> = BTreeMap::new();
    for &node in graph.nodes() {
        let dependencies = graph
            .dependencies(node)
            .map(|dep| {
                ids.get(&dep).cloned().ok_or_else(|| {
                    ToolchainError::Config(format!("{} submitted before its dependency {}", node, dep))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let units = unit_counts.get(&node).copied().unwrap_or(1);
        let request = job_request(node, units, profile, base_command, dependencies);
        let id = backend.submit(&request)?;
        tracing::info!(
            job = %node,
            id = %id,
            units,
            tasks = request.array_size.unwrap_or(1),
            "Submitted job"
        );
        ids.insert(node, id);
    }
    Ok(ids)
}
