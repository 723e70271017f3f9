//! Node/edge classes
//!
//! A class gives one table a role in the graph. Generic classes have none,
//! node classes know the edge classes touching them, and edge classes record
//! how to walk from their own table to the tables of their source and target
//! node classes. Those paths list the intermediate tables only, ordered
//! outward from the edge table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::OrigraphError;
use crate::table::TableId;

mod convert;
mod edge;
mod handle;
mod node;

pub use handle::ClassHandle;

pub type ClassId = String;

/// Endpoints of an edge class and the table paths leading to them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLinks {
    pub source_class_id: Option<ClassId>,
    pub target_class_id: Option<ClassId>,
    pub source_table_ids: Vec<TableId>,
    pub target_table_ids: Vec<TableId>,
    pub directed: bool,
}

impl EdgeLinks {
    pub fn class_id(&self, side: Side) -> Option<&ClassId> {
        match side {
            Side::Source => self.source_class_id.as_ref(),
            Side::Target => self.target_class_id.as_ref(),
        }
    }

    pub fn table_ids(&self, side: Side) -> &[TableId] {
        match side {
            Side::Source => &self.source_table_ids,
            Side::Target => &self.target_table_ids,
        }
    }

    pub(crate) fn set_side(&mut self, side: Side, class_id: Option<ClassId>, table_ids: Vec<TableId>) {
        match side {
            Side::Source => {
                self.source_class_id = class_id;
                self.source_table_ids = table_ids;
            }
            Side::Target => {
                self.target_class_id = class_id;
                self.target_table_ids = table_ids;
            }
        }
    }

    /// Sides on which `class_id` is attached
    pub fn sides_of(&self, class_id: &str) -> Vec<Side> {
        [Side::Source, Side::Target]
            .into_iter()
            .filter(|side| self.class_id(*side).is_some_and(|id| id == class_id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassKind {
    #[serde(rename = "GenericClass")]
    Generic,
    #[serde(rename = "NodeClass")]
    Node { edge_class_ids: BTreeSet<ClassId> },
    #[serde(rename = "EdgeClass")]
    Edge(EdgeLinks),
}

impl ClassKind {
    pub fn node() -> Self {
        ClassKind::Node {
            edge_class_ids: BTreeSet::new(),
        }
    }

    pub fn edge() -> Self {
        ClassKind::Edge(EdgeLinks::default())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClassKind::Generic => "GenericClass",
            ClassKind::Node { .. } => "NodeClass",
            ClassKind::Edge(_) => "EdgeClass",
        }
    }

    /// Same kind with no connections
    pub(crate) fn blank(&self) -> Self {
        match self {
            ClassKind::Generic => ClassKind::Generic,
            ClassKind::Node { .. } => ClassKind::node(),
            ClassKind::Edge(_) => ClassKind::edge(),
        }
    }
}

/// One end of an edge class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Source => Side::Target,
            Side::Target => Side::Source,
        }
    }
}

impl FromStr for Side {
    type Err = OrigraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Side::Source),
            "target" => Ok(Side::Target),
            other => Err(OrigraphError::InvalidSide(other.to_string())),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub class_id: ClassId,
    pub table_id: TableId,
    /// Display name; the table's name when unset
    pub class_name: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    pub kind: ClassKind,
}

impl Class {
    pub fn new(class_id: ClassId, table_id: TableId, kind: ClassKind) -> Self {
        Self {
            class_id,
            table_id,
            class_name: None,
            annotations: BTreeMap::new(),
            kind,
        }
    }

    pub fn edge_links(&self) -> Option<&EdgeLinks> {
        match &self.kind {
            ClassKind::Edge(links) => Some(links),
            _ => None,
        }
    }

    pub fn edge_class_ids(&self) -> Option<&BTreeSet<ClassId>> {
        match &self.kind {
            ClassKind::Node { edge_class_ids } => Some(edge_class_ids),
            _ => None,
        }
    }

    /// Whether an edge path of this class runs through `table_id`
    pub fn path_uses_table(&self, table_id: &str) -> bool {
        self.edge_links().is_some_and(|links| {
            links
                .source_table_ids
                .iter()
                .chain(links.target_table_ids.iter())
                .any(|id| id == table_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parsing() {
        assert_eq!("source".parse::<Side>().unwrap(), Side::Source);
        assert_eq!(Side::Target.to_string(), "target");
        let err = "middle".parse::<Side>().unwrap_err();
        assert!(matches!(err, OrigraphError::InvalidSide(side) if side == "middle"));
    }

    #[test]
    fn test_kind_serialization_is_tagged() {
        let class = Class::new(
            "1".to_string(),
            "4".to_string(),
            ClassKind::Edge(EdgeLinks {
                source_class_id: Some("0".to_string()),
                source_table_ids: vec!["3".to_string()],
                ..EdgeLinks::default()
            }),
        );
        let value = serde_json::to_value(&class).unwrap();
        assert_eq!(value["kind"]["type"], "EdgeClass");
        assert_eq!(value["kind"]["source_table_ids"][0], "3");
        let back: Class = serde_json::from_value(value).unwrap();
        assert_eq!(back, class);
        assert!(back.path_uses_table("3"));
        assert!(!back.path_uses_table("4"));
    }

    #[test]
    fn test_sides_of_self_loop() {
        let links = EdgeLinks {
            source_class_id: Some("0".to_string()),
            target_class_id: Some("0".to_string()),
            ..EdgeLinks::default()
        };
        assert_eq!(links.sides_of("0"), vec![Side::Source, Side::Target]);
        assert!(links.sides_of("1").is_empty());
    }
}
