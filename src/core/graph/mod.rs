//! Resource dependency graph
//!
//! Nodes are resources, edges run from a dependency to its dependent. Edges come
//! from references inside resource configuration and from explicit `depends_on`.
//!
//! Building the graph checks that names are unique, that every reference targets a
//! declared resource and an attribute its kind exports, and that there is no cycle.
//! The creation order is a topological order with ties broken by logical name, so
//! the same declarations always produce the same order.

pub mod lint;

use crate::core::resource::Resource;
use crate::core::validation::LogicalName;
use crate::error::{PlanError, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Validated, acyclic resource graph
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    graph: DiGraph<LogicalName, ()>,
    index: BTreeMap<LogicalName, NodeIndex>,
    resources: BTreeMap<LogicalName, Resource>,
    order: Vec<LogicalName>,
}

impl ResourceGraph {
    /// Build and validate the graph
    pub fn build(resources: impl IntoIterator<Item = Resource>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for resource in resources {
            let name = resource.name().clone();
            if by_name.insert(name.clone(), resource).is_some() {
                return Err(PlanError::DuplicateName(name));
            }
        }

        // Nodes in name order keep every later traversal deterministic
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        for name in by_name.keys() {
            index.insert(name.clone(), graph.add_node(name.clone()));
        }

        for (name, resource) in &by_name {
            for reference in resource.references() {
                let target = by_name.get(&reference.resource).ok_or_else(|| {
                    PlanError::UnknownResource {
                        from: name.clone(),
                        to: reference.resource.clone(),
                    }
                })?;
                if !target.kind().exports(&reference.attribute) {
                    return Err(PlanError::UnknownAttribute {
                        from: name.clone(),
                        reference: reference.clone(),
                    });
                }
            }
            for dep in resource.dependencies() {
                let from = *index.get(&dep).ok_or_else(|| PlanError::UnknownResource {
                    from: name.clone(),
                    to: dep.clone(),
                })?;
                graph.update_edge(from, index[name], ());
            }
        }

        if let Some(cycle) = find_cycle(&graph) {
            return Err(PlanError::Cycle(cycle));
        }

        let order = topological_order(&graph, &index);
        debug!(
            resources = order.len(),
            edges = graph.edge_count(),
            "Built resource graph"
        );

        Ok(ResourceGraph {
            graph,
            index,
            resources: by_name,
            order,
        })
    }

    /// Creation order
    pub fn order(&self) -> &[LogicalName] {
        &self.order
    }

    /// Destruction order (reverse of creation)
    pub fn destroy_order(&self) -> impl Iterator<Item = &LogicalName> {
        self.order.iter().rev()
    }

    /// Resources in creation order
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.order.iter().filter_map(|n| self.resources.get(n))
    }

    pub fn get(&self, name: &LogicalName) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &LogicalName) -> bool {
        self.resources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Groups of mutually independent resources
    ///
    /// Everything in level `n` depends only on resources in levels `< n`, so an
    /// engine may materialize each level in parallel.
    pub fn levels(&self) -> Vec<Vec<LogicalName>> {
        let mut depth: BTreeMap<&LogicalName, usize> = BTreeMap::new();
        let mut levels: Vec<Vec<LogicalName>> = Vec::new();

        for name in &self.order {
            let node = self.index[name];
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| depth[&self.graph[dep]] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(name.clone());
        }
        levels
    }

    /// Direct dependencies of a resource
    pub fn dependencies_of(&self, name: &LogicalName) -> BTreeSet<LogicalName> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of a resource
    pub fn dependents_of(&self, name: &LogicalName) -> BTreeSet<LogicalName> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &LogicalName, direction: Direction) -> BTreeSet<LogicalName> {
        match self.index.get(name) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, direction)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Every resource that depends on `name`, directly or transitively
    pub fn transitive_dependents(&self, name: &LogicalName) -> BTreeSet<LogicalName> {
        let mut out = BTreeSet::new();
        if let Some(&start) = self.index.get(name) {
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node) = bfs.next(&self.graph) {
                if node != start {
                    out.insert(self.graph[node].clone());
                }
            }
        }
        out
    }

    /// Every resource `name` depends on, directly or transitively
    pub fn transitive_dependencies(&self, name: &LogicalName) -> BTreeSet<LogicalName> {
        let mut out = BTreeSet::new();
        if let Some(&start) = self.index.get(name) {
            let reversed = Reversed(&self.graph);
            let mut bfs = Bfs::new(reversed, start);
            while let Some(node) = bfs.next(reversed) {
                if node != start {
                    out.insert(self.graph[node].clone());
                }
            }
        }
        out
    }
}

/// Kahn's algorithm, always releasing the smallest ready name first
fn topological_order(
    graph: &DiGraph<LogicalName, ()>,
    index: &BTreeMap<LogicalName, NodeIndex>,
) -> Vec<LogicalName> {
    let mut in_degree: BTreeMap<NodeIndex, usize> = index
        .values()
        .map(|&n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();

    let mut ready: BTreeSet<&LogicalName> = index
        .iter()
        .filter(|(_, n)| in_degree[*n] == 0)
        .map(|(name, _)| name)
        .collect();

    let mut order = Vec::with_capacity(index.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.clone());
        for next in graph.neighbors_directed(index[name], Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(&graph[next]);
                }
            }
        }
    }
    order
}

/// First cycle found, as a closed path starting at its smallest member
fn find_cycle(graph: &DiGraph<LogicalName, ()>) -> Option<Vec<LogicalName>> {
    tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .filter_map(|scc| cycle_path(graph, &scc))
        .min_by(|a, b| a[0].cmp(&b[0]))
}

fn cycle_path(graph: &DiGraph<LogicalName, ()>, scc: &[NodeIndex]) -> Option<Vec<LogicalName>> {
    let members: BTreeSet<NodeIndex> = scc.iter().copied().collect();
    let start = *scc.iter().min_by_key(|&&n| &graph[n])?;

    // Shortest way back to `start` inside the component
    let mut parent: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        let mut next: Vec<NodeIndex> = graph
            .neighbors_directed(node, Direction::Outgoing)
            .filter(|n| members.contains(n))
            .collect();
        next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

        for succ in next {
            if succ == start {
                let mut path = vec![node];
                let mut current = node;
                while current != start {
                    current = parent[&current];
                    path.push(current);
                }
                path.reverse();
                path.push(start);
                return Some(path.into_iter().map(|n| graph[n].clone()).collect());
            }
            if !parent.contains_key(&succ) {
                parent.insert(succ, node);
                queue.push_back(succ);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iam::PolicyDocument;
    use crate::core::resource::{Identity, PolicyAttachment, StorageBucket};
    use crate::core::template::Template;
    use crate::core::validation::BucketName;

    fn name(s: &str) -> LogicalName {
        LogicalName::new(s).unwrap()
    }

    fn bucket(n: &str) -> Resource {
        Resource::new(
            name(n),
            StorageBucket::new(BucketName::new(format!("{}-bucket", n.replace('_', "-"))).unwrap()),
        )
        .unwrap()
    }

    fn role(n: &str) -> Resource {
        Resource::new(name(n), Identity::assumed_by(n, "codebuild.amazonaws.com").unwrap()).unwrap()
    }

    fn attach(n: &str, role: &str, bucket: &str) -> Resource {
        let policy = PolicyDocument::from_json(&format!(
            r#"{{"Version":"2012-10-17","Statement":[{{"Effect":"Allow","Action":"s3:PutObject","Resource":"${{{}.arn}}/*"}}]}}"#,
            bucket
        ))
        .unwrap();
        Resource::new(
            name(n),
            PolicyAttachment::new(Template::parse(&format!("${{{}.name}}", role)).unwrap(), n, policy),
        )
        .unwrap()
    }

    #[test]
    fn test_order_respects_references() {
        let graph = ResourceGraph::build(vec![
            attach("policy", "role", "site"),
            role("role"),
            bucket("site"),
        ])
        .unwrap();

        let order: Vec<&str> = graph.order().iter().map(LogicalName::as_str).collect();
        assert_eq!(order, vec!["role", "site", "policy"]);

        let destroy: Vec<&str> = graph.destroy_order().map(LogicalName::as_str).collect();
        assert_eq!(destroy, vec!["policy", "site", "role"]);
    }

    #[test]
    fn test_levels() {
        let graph = ResourceGraph::build(vec![
            attach("policy", "role", "site"),
            role("role"),
            bucket("site"),
            bucket("other"),
        ])
        .unwrap();
        let levels = graph.levels();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec![name("other"), name("role"), name("site")]);
        assert_eq!(levels[1], vec![name("policy")]);
    }

    #[test]
    fn test_duplicate_names() {
        let err = ResourceGraph::build(vec![bucket("site"), bucket("site")]).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateName(n) if n.as_str() == "site"));
    }

    #[test]
    fn test_unknown_reference() {
        let err = ResourceGraph::build(vec![attach("policy", "role", "site"), role("role")]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownResource { ref to, .. } if to.as_str() == "site"));
        assert!(err.is_structural());
    }

    #[test]
    fn test_unknown_attribute() {
        let policy = PolicyDocument::from_json(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:PutObject","Resource":"${site.owner}/*"}]}"#,
        )
        .unwrap();
        let attachment = Resource::new(
            name("policy"),
            PolicyAttachment::new(Template::parse("${role.name}").unwrap(), "p", policy),
        )
        .unwrap();
        let err = ResourceGraph::build(vec![attachment, role("role"), bucket("site")]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownAttribute { .. }));
    }

    #[test]
    fn test_cycle_is_named() {
        // role's inline policy points at the attachment, the attachment at the role
        let inline = PolicyDocument::from_json(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"iam:GetRole","Resource":"${policy.id}"}]}"#,
        )
        .unwrap();
        let role = Resource::new(
            name("role"),
            Identity::assumed_by("role", "codebuild.amazonaws.com")
                .unwrap()
                .with_inline_policy("inline", inline),
        )
        .unwrap();

        let err = ResourceGraph::build(vec![role, attach("policy", "role", "site"), bucket("site")])
            .unwrap_err();
        match err {
            PlanError::Cycle(members) => {
                let members: Vec<&str> = members.iter().map(LogicalName::as_str).collect();
                assert_eq!(members, vec!["policy", "role", "policy"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency() {
        let err = ResourceGraph::build(vec![bucket("site").depends_on(&name("site"))]).unwrap_err();
        assert!(matches!(err, PlanError::Cycle(ref m) if m.len() == 2));
    }

    #[test]
    fn test_transitive_queries() {
        let graph = ResourceGraph::build(vec![
            attach("policy", "role", "site"),
            role("role"),
            bucket("site"),
            bucket("other").depends_on(&name("policy")),
        ])
        .unwrap();

        assert_eq!(
            graph.transitive_dependents(&name("site")),
            BTreeSet::from([name("policy"), name("other")])
        );
        assert_eq!(
            graph.transitive_dependencies(&name("other")),
            BTreeSet::from([name("policy"), name("role"), name("site")])
        );
        assert_eq!(graph.dependencies_of(&name("policy")), BTreeSet::from([name("role"), name("site")]));
        assert_eq!(graph.dependents_of(&name("policy")), BTreeSet::from([name("other")]));
    }
}
