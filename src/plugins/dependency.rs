//! Load-order resolution over declared plugin dependencies.
//!
//! Edges come from `PluginDependencies` documents, which map a base type to
//! the subtypes that must be available before the declaring plugin loads.
//! The walk is iterative with an explicit stack, so deep chains cannot
//! overflow the call stack and cycles are detected by marking.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::PluginId;

pub(crate) const KEY_PLUGIN_DEPENDENCIES: &str = "PluginDependencies";

/// "Before `plugin` loads, the type `subtype` (derived from `base_type`)
/// must be available."
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub plugin: String,
    pub base_type: String,
    pub subtype: String,
}

impl DependencyEdge {
    /// Collects edges from `Info.PluginDependencies` and every
    /// `Info.Types.<T>.PluginDependencies`, dropping duplicates.
    pub fn parse_all(plugin: &str, info: &Map<String, Value>) -> Vec<DependencyEdge> {
        let mut edges = Vec::new();
        push_edges(plugin, info.get(KEY_PLUGIN_DEPENDENCIES), &mut edges);

        if let Some(types) = info
            .get(crate::type_system::KEY_TYPES)
            .and_then(Value::as_object)
        {
            for entry in types.values() {
                push_edges(
                    plugin,
                    entry.get(KEY_PLUGIN_DEPENDENCIES),
                    &mut edges,
                );
            }
        }
        edges
    }
}

fn push_edges(plugin: &str, section: Option<&Value>, edges: &mut Vec<DependencyEdge>) {
    let Some(section) = section else {
        return;
    };
    let Some(by_base) = section.as_object() else {
        tracing::debug!(plugin, "Ignoring malformed PluginDependencies");
        return;
    };
    for (base_type, subtypes) in by_base {
        let names: Vec<&str> = match subtypes {
            Value::String(single) => vec![single.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => {
                tracing::debug!(plugin, base_type = %base_type, "Ignoring malformed dependency list");
                continue;
            }
        };
        for subtype in names {
            let edge = DependencyEdge {
                plugin: plugin.to_string(),
                base_type: base_type.clone(),
                subtype: subtype.to_string(),
            };
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }
    }
}

/// Recoverable problem found while resolving a load order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyDiagnostic {
    #[error("Dependency cycle: '{plugin}' -> '{dependency}', edge dropped")]
    Cycle { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' depends on unknown base type '{base_type}'")]
    UnknownBaseType { plugin: String, base_type: String },

    #[error("Plugin '{plugin}' depends on unknown type '{subtype}' derived from '{base_type}'")]
    UnknownSubtype {
        plugin: String,
        base_type: String,
        subtype: String,
    },

    #[error("Plugin '{plugin}' depends on '{subtype}', which no plugin provides")]
    NoProvidingPlugin { plugin: String, subtype: String },
}

/// What the resolver needs to know about the plugin graph.
pub trait DependencyGraph {
    type Node: Clone;

    fn id(&self, node: &Self::Node) -> PluginId;

    fn label(&self, node: &Self::Node) -> String;

    /// Direct prerequisites of `node`. Edges that cannot be resolved are
    /// reported through `diagnostics` and left out.
    fn prerequisites(
        &self,
        node: &Self::Node,
        diagnostics: &mut Vec<DependencyDiagnostic>,
    ) -> Vec<Self::Node>;

    /// True for nodes whose load is already in progress further up the
    /// current call chain; they must not be waited on.
    fn in_progress(&self, _node: &Self::Node) -> bool {
        false
    }
}

/// Prerequisites in the order they must load, plus what was dropped.
#[derive(Debug, Clone)]
pub struct LoadOrder<N> {
    pub plugins: Vec<N>,
    pub diagnostics: Vec<DependencyDiagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// Computes the transitive prerequisites of `root`, dependencies first,
/// excluding `root` itself.
pub fn resolve_load_order<G: DependencyGraph>(graph: &G, root: &G::Node) -> LoadOrder<G::Node> {
    let root_id = graph.id(root);
    let mut diagnostics = Vec::new();
    let mut marks: HashMap<PluginId, Mark> = HashMap::from([(root_id, Mark::OnPath)]);
    let mut order = Vec::new();

    let children = graph.prerequisites(root, &mut diagnostics);
    let mut stack: Vec<(G::Node, std::vec::IntoIter<G::Node>)> =
        vec![(root.clone(), children.into_iter())];

    loop {
        let next = match stack.last_mut() {
            None => break,
            Some((_, children)) => children.next(),
        };

        let Some(child) = next else {
            if let Some((node, _)) = stack.pop() {
                let id = graph.id(&node);
                marks.insert(id, Mark::Done);
                if id != root_id {
                    order.push(node);
                }
            }
            continue;
        };

        let child_id = graph.id(&child);
        match marks.get(&child_id).copied() {
            Some(Mark::Done) => {}
            Some(Mark::OnPath) => diagnostics.push(DependencyDiagnostic::Cycle {
                plugin: top_label(graph, &stack),
                dependency: graph.label(&child),
            }),
            None if graph.in_progress(&child) => {
                diagnostics.push(DependencyDiagnostic::Cycle {
                    plugin: top_label(graph, &stack),
                    dependency: graph.label(&child),
                });
                marks.insert(child_id, Mark::Done);
            }
            None => {
                marks.insert(child_id, Mark::OnPath);
                let grandchildren = graph.prerequisites(&child, &mut diagnostics);
                stack.push((child, grandchildren.into_iter()));
            }
        }
    }

    for diagnostic in &diagnostics {
        tracing::warn!(root = %graph.label(root), "{diagnostic}");
    }

    LoadOrder {
        plugins: order,
        diagnostics,
    }
}

fn top_label<G: DependencyGraph>(graph: &G, stack: &[(G::Node, std::vec::IntoIter<G::Node>)]) -> String {
    stack
        .last()
        .map(|(node, _)| graph.label(node))
        .unwrap_or_default()
}
