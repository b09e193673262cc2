use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreResult;
use crate::header::resolve_column;
use crate::table::Table;

/// Header aliases for the three columns that place a person in a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyColumns {
    pub community: Vec<String>,
    pub tower: Vec<String>,
    pub unit: Vec<String>,
}

impl Default for HierarchyColumns {
    fn default() -> Self {
        Self {
            community: vec!["comunidad".to_string()],
            tower: vec!["torre".to_string()],
            unit: vec![
                "casa o apto".to_string(),
                "casa".to_string(),
                "apto".to_string(),
            ],
        }
    }
}

/// Column indices of the hierarchy columns in a given header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub community: usize,
    pub tower: usize,
    pub unit: usize,
}

impl HierarchyColumns {
    pub fn resolve(&self, header: &[String]) -> StoreResult<ResolvedColumns> {
        Ok(ResolvedColumns {
            community: resolve_column(header, &self.community)?,
            tower: resolve_column(header, &self.tower)?,
            unit: resolve_column(header, &self.unit)?,
        })
    }
}

/// (community, tower, unit) triple identifying a household.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct HierarchyKey {
    #[serde(rename = "comunidad")]
    pub community: String,
    #[serde(rename = "torre")]
    pub tower: String,
    #[serde(rename = "casa")]
    pub unit: String,
}

impl HierarchyKey {
    pub fn new(community: impl Into<String>, tower: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            community: community.into(),
            tower: tower.into(),
            unit: unit.into(),
        }
    }

    /// Key of a row, trimmed. `None` when the row is too short or any part is blank.
    fn from_row(row: &[String], cols: &ResolvedColumns) -> Option<Self> {
        let part = |idx: usize| {
            row.get(idx)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            community: part(cols.community)?,
            tower: part(cols.tower)?,
            unit: part(cols.unit)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Comunidad,
    Torre,
    Casa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeState {
    pub opened: bool,
}

/// One node of the tree widget payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub children: Vec<TreeNode>,
    pub state: NodeState,
}

impl TreeNode {
    fn new(text: String, kind: NodeKind, children: Vec<TreeNode>) -> Self {
        Self {
            text,
            kind,
            children,
            state: NodeState::default(),
        }
    }
}

/// Community → tower → unit tree of every complete key in the table.
///
/// Siblings are ordered by name and each unit appears once per tower.
pub fn build_tree(table: &Table, columns: &HierarchyColumns) -> StoreResult<Vec<TreeNode>> {
    let cols = columns.resolve(table.header())?;

    let mut grouped: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
    for (_, row) in table.data_rows() {
        if let Some(key) = HierarchyKey::from_row(row, &cols) {
            grouped
                .entry(key.community)
                .or_default()
                .entry(key.tower)
                .or_default()
                .insert(key.unit);
        }
    }

    let tree = grouped
        .into_iter()
        .map(|(community, towers)| {
            let towers = towers
                .into_iter()
                .map(|(tower, units)| {
                    let units = units
                        .into_iter()
                        .map(|unit| TreeNode::new(format!("Casa/Apto {unit}"), NodeKind::Casa, Vec::new()))
                        .collect();
                    TreeNode::new(format!("Torre {tower}"), NodeKind::Torre, units)
                })
                .collect();
            TreeNode::new(community, NodeKind::Comunidad, towers)
        })
        .collect();
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> Table {
        Table::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_tree_groups_and_sorts() {
        let t = table(&[
            &["Nombre", "COMUNIDAD", "Torre", "Casa o Apto"],
            &["Ana", "B", "2", "5"],
            &["Luis", "A", "1", "1"],
            &["Eva", "A ", " 1", "1 "],
            &["Rosa", "A", "1", "3"],
            &["Sin casa", "A", "1", ""],
            &["Corto", "A"],
        ]);
        let tree = build_tree(&t, &HierarchyColumns::default()).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].text, "A");
        assert_eq!(tree[0].children.len(), 1);
        let units: Vec<&str> = tree[0].children[0]
            .children
            .iter()
            .map(|n| n.text.as_str())
            .collect();
        assert_eq!(units, vec!["Casa/Apto 1", "Casa/Apto 3"]);
        assert_eq!(tree[1].children[0].text, "Torre 2");
    }

    #[test]
    fn test_tree_node_json_shape() {
        let t = table(&[&["comunidad", "torre", "apto"], &["A", "1", "7"]]);
        let tree = build_tree(&t, &HierarchyColumns::default()).unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "text": "A",
                "type": "comunidad",
                "state": {"opened": false},
                "children": [{
                    "text": "Torre 1",
                    "type": "torre",
                    "state": {"opened": false},
                    "children": [{
                        "text": "Casa/Apto 7",
                        "type": "casa",
                        "state": {"opened": false},
                        "children": []
                    }]
                }]
            }])
        );
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() {
        let t = table(&[&["comunidad", "torre"], &["A", "1"]]);
        let err = build_tree(&t, &HierarchyColumns::default()).unwrap_err();
        assert_eq!(err.code(), "schema_mismatch");
    }

    #[test]
    fn test_empty_table_gives_empty_tree() {
        let t = table(&[&["comunidad", "torre", "casa"]]);
        assert!(build_tree(&t, &HierarchyColumns::default()).unwrap().is_empty());
    }
}
