//! Navigation filtering: prune a menu tree down to what a principal may use.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gatehouse_core::{Action, ResourceCode};

use crate::batch::EvaluationRequest;
use crate::engine::DecisionEngine;
use crate::principal::Principal;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Grouping node; disappears when it has nothing left to show.
    Catalog,
    #[default]
    Menu,
    Button,
}

/// Capability a node requires to be shown.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MenuGate {
    pub resource: ResourceCode,
    pub action: Action,
}

impl MenuGate {
    pub fn new(resource: ResourceCode, action: Action) -> Self {
        Self { resource, action }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationNode {
    pub key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub kind: NodeKind,
    /// Ungated nodes are always shown (subject to their children).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<MenuGate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavigationNode>,
}

impl NavigationNode {
    pub fn new(key: impl Into<String>, title: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            path: None,
            kind,
            gate: None,
            children: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn gated(mut self, resource: ResourceCode, action: Action) -> Self {
        self.gate = Some(MenuGate::new(resource, action));
        self
    }

    pub fn with_child(mut self, child: NavigationNode) -> Self {
        self.children.push(child);
        self
    }

    /// Every distinct gate in the subtree.
    pub fn gates(&self) -> BTreeSet<MenuGate> {
        let mut out = BTreeSet::new();
        self.collect_gates(&mut out);
        out
    }

    fn collect_gates(&self, out: &mut BTreeSet<MenuGate>) {
        if let Some(gate) = &self.gate {
            out.insert(gate.clone());
        }
        for child in &self.children {
            child.collect_gates(out);
        }
    }

    /// Copy of the subtree without the nodes `allowed` rejects.
    fn prune(&self, allowed: &HashMap<MenuGate, bool>) -> Option<NavigationNode> {
        if let Some(gate) = &self.gate {
            if !allowed.get(gate).copied().unwrap_or(false) {
                return None;
            }
        }

        let children: Vec<NavigationNode> = self
            .children
            .iter()
            .filter_map(|child| child.prune(allowed))
            .collect();

        if self.kind == NodeKind::Catalog && !self.children.is_empty() && children.is_empty() {
            return None;
        }

        Some(NavigationNode {
            children,
            ..self.shallow_clone()
        })
    }

    fn shallow_clone(&self) -> NavigationNode {
        NavigationNode {
            key: self.key.clone(),
            title: self.title.clone(),
            path: self.path.clone(),
            kind: self.kind,
            gate: self.gate.clone(),
            children: Vec::new(),
        }
    }
}

impl DecisionEngine {
    /// The part of `tree` that `principal` may see, or `None` when even the
    /// root is denied or left empty.
    ///
    /// All gates are evaluated together through the batch path, so a tree
    /// with many nodes on the same resource costs one decision per gate.
    pub async fn filter_menu(
        &self,
        tree: &NavigationNode,
        principal: &Principal,
    ) -> Option<NavigationNode> {
        let gates: Vec<MenuGate> = tree.gates().into_iter().collect();
        let mut allowed = HashMap::with_capacity(gates.len());

        for chunk in gates.chunks(self.config.max_batch_size) {
            let requests: Vec<EvaluationRequest> = chunk
                .iter()
                .map(|g| EvaluationRequest::new(g.resource.clone(), g.action))
                .collect();

            match self.evaluate_batch(principal, &requests).await {
                Ok(decisions) => {
                    for (gate, decision) in chunk.iter().zip(decisions) {
                        allowed.insert(gate.clone(), decision.is_allowed());
                    }
                }
                Err(err) => {
                    // Gates missing from the map are treated as denied.
                    warn!(principal_id = %principal.id, error = %err, "menu gate evaluation failed");
                }
            }
        }

        let filtered = tree.prune(&allowed);
        debug!(
            principal_id = %principal.id,
            gates = gates.len(),
            visible = filtered.is_some(),
            "filtered navigation tree"
        );
        filtered
    }
}
