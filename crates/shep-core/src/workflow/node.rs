use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::feature::Lifecycle;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A step of the feature-agent graph.
///
/// The five agent phases run in declaration order, then `merge`, then the
/// optional self-looping `ci_fix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Analyze,
    Requirements,
    Research,
    Plan,
    Implement,
    Merge,
    CiFix,
}

impl Node {
    pub const PHASES: [Node; 5] = [
        Node::Analyze,
        Node::Requirements,
        Node::Research,
        Node::Plan,
        Node::Implement,
    ];

    pub fn first() -> Node {
        Node::Analyze
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Node::Analyze => "analyze",
            Node::Requirements => "requirements",
            Node::Research => "research",
            Node::Plan => "plan",
            Node::Implement => "implement",
            Node::Merge => "merge",
            Node::CiFix => "ci_fix",
        }
    }

    /// Static successor. `merge` and `ci_fix` route dynamically.
    pub fn successor(self) -> Option<Node> {
        match self {
            Node::Analyze => Some(Node::Requirements),
            Node::Requirements => Some(Node::Research),
            Node::Research => Some(Node::Plan),
            Node::Plan => Some(Node::Implement),
            Node::Implement => Some(Node::Merge),
            Node::Merge | Node::CiFix => None,
        }
    }

    /// The approval gate checked after this node's own work.
    pub fn gate(self) -> Option<Gate> {
        match self {
            Node::Requirements => Some(Gate::Prd),
            Node::Plan => Some(Gate::Plan),
            Node::Merge => Some(Gate::Merge),
            _ => None,
        }
    }

    /// Feature lifecycle recorded when this node starts.
    pub fn lifecycle(self) -> Lifecycle {
        match self {
            Node::Analyze => Lifecycle::Analyze,
            Node::Requirements => Lifecycle::Requirements,
            Node::Research => Lifecycle::Research,
            Node::Plan => Lifecycle::Planning,
            Node::Implement => Lifecycle::Implementation,
            Node::Merge | Node::CiFix => Lifecycle::Review,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Node {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Node::Analyze),
            "requirements" => Ok(Node::Requirements),
            "research" => Ok(Node::Research),
            "plan" => Ok(Node::Plan),
            "implement" => Ok(Node::Implement),
            "merge" => Ok(Node::Merge),
            "ci_fix" => Ok(Node::CiFix),
            other => Err(format!("unknown node: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    Prd,
    Plan,
    Merge,
}

impl Gate {
    pub fn as_str(self) -> &'static str {
        match self {
            Gate::Prd => "allow_prd",
            Gate::Plan => "allow_plan",
            Gate::Merge => "allow_merge",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
