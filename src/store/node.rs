use derive_more::{Display, From};
use serde::Deserialize;

/// Revision marker handed out by the store. Every mutation bumps it, so a
/// watch started from a known index never misses a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, From)]
pub struct ChangeIndex(u64);

impl ChangeIndex {
    /// First index a watch has to wait for to observe changes made after `self`.
    pub fn next(self) -> Self {
        ChangeIndex(self.0.saturating_add(1))
    }
}

/// A single element of the key tree as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// The root of the keyspace comes back without a key.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub modified_index: u64,
}

impl Node {
    /// Last segment of the slash-delimited key.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }

    pub fn children(&self) -> &[Node] {
        &self.nodes
    }

    pub fn value_or_empty(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn leaf(key: impl Into<String>, value: impl Into<String>) -> Self {
        Node {
            key: key.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Builds a two-level tree under `prefix` from `(group, [(name, value)])`.
    #[cfg(test)]
    pub fn tree(prefix: &str, groups: Vec<(&str, Vec<(&str, &str)>)>) -> Self {
        let nodes = groups
            .into_iter()
            .map(|(group, entries)| {
                let entries = entries
                    .into_iter()
                    .map(|(name, value)| Node::leaf(format!("{prefix}/{group}/{name}"), value))
                    .collect();
                Node::directory(format!("{prefix}/{group}"), entries)
            })
            .collect();
        Node::directory(prefix, nodes)
    }

    #[cfg(test)]
    pub fn directory(key: impl Into<String>, nodes: Vec<Node>) -> Self {
        Node {
            key: key.into(),
            dir: true,
            nodes,
            ..Default::default()
        }
    }
}

/// Result of one recursive read: the subtree and the index it was taken at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub root: Node,
    pub index: ChangeIndex,
}
