use std::collections::HashMap;

use serde_json::Value;
use shared::domain::{
    Command, HighlightedEdge, HighlightedMap, HighlightedNode, LocationId, MapEdge, MapGraph,
    MapNode,
};

use crate::error::NavigationError;

/// Command targets in order of first appearance. Commands without a target
/// contribute nothing.
pub fn extract_path(commands: &[Command]) -> Vec<LocationId> {
    let mut path: Vec<LocationId> = Vec::new();
    for command in commands {
        if !command.target.is_empty() && !path.contains(&command.target) {
            path.push(command.target.clone());
        }
    }
    path
}

/// Marks the nodes visited by `commands` and the edges actually walked between
/// consecutive path entries. Every node and edge of `map` is returned.
pub fn compute_highlights(commands: &[Command], map: &MapGraph) -> HighlightedMap {
    let path = extract_path(commands);
    let positions: HashMap<&LocationId, usize> =
        path.iter().enumerate().map(|(i, id)| (id, i)).collect();

    let nodes = map
        .nodes
        .iter()
        .map(|node| HighlightedNode {
            highlight: positions.contains_key(&node.id),
            node: node.clone(),
        })
        .collect();

    let edges = map
        .edges
        .iter()
        .map(|edge| {
            let walked = match (positions.get(&edge.source), positions.get(&edge.target)) {
                (Some(source), Some(target)) => source.abs_diff(*target) == 1,
                _ => false,
            };
            HighlightedEdge {
                highlight: walked,
                edge: edge.clone(),
            }
        })
        .collect();

    HighlightedMap { nodes, edges }
}

/// Decodes a raw map payload, requiring both `nodes` and `edges` arrays.
pub fn parse_map_graph(value: &Value) -> Result<MapGraph, NavigationError> {
    let Some(object) = value.as_object() else {
        return Err(NavigationError::invalid_argument("map data must be an object"));
    };

    let nodes = object
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| NavigationError::invalid_argument("map data is missing the nodes array"))?;
    let edges = object
        .get("edges")
        .and_then(Value::as_array)
        .ok_or_else(|| NavigationError::invalid_argument("map data is missing the edges array"))?;

    let nodes = nodes
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            serde_json::from_value::<MapNode>(raw.clone()).map_err(|e| {
                NavigationError::invalid_argument(format!("map node at index {i} is malformed: {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let edges = edges
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            serde_json::from_value::<MapEdge>(raw.clone()).map_err(|e| {
                NavigationError::invalid_argument(format!("map edge at index {i} is malformed: {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MapGraph { nodes, edges })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightSummary {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub highlighted_nodes: Vec<LocationId>,
    pub highlighted_edges: Vec<(LocationId, LocationId)>,
}

impl HighlightSummary {
    pub fn of(map: &HighlightedMap) -> Self {
        Self {
            total_nodes: map.nodes.len(),
            total_edges: map.edges.len(),
            highlighted_nodes: map
                .nodes
                .iter()
                .filter(|n| n.highlight)
                .map(|n| n.node.id.clone())
                .collect(),
            highlighted_edges: map
                .edges
                .iter()
                .filter(|e| e.highlight)
                .map(|e| (e.edge.source.clone(), e.edge.target.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.highlighted_nodes.is_empty() && self.highlighted_edges.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/highlight_tests.rs"]
mod tests;
