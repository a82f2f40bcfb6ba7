//! The Design data model (§3): a DAG of blocks, each running one [`crate::agent::Agent`] pattern,
//! connected by block-level and agent-level edges. Generalizes this codebase's single-block
//! `OrchestrationMode` tagged-enum style (`execute_sequential`/`execute_parallel`/...) into a
//! `Pattern` enum attached to a graph-aware `Block`, since this codebase otherwise has no
//! multi-block concept at all — grounded in shape on the DAG runner design in
//! `other_examples/2f2fefba_pcastone-orca__src-crates-langgraph-core-src-lib.rs.rs`.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::RunnerError;

/// How the agents within one block interact. One variant per pattern executor in `patterns/`,
/// plus `Reflection`, which the data model names (GLOSSARY) but which has no defined operation
/// (§9 open-question decision) — kept for serde round-tripping, rejected at validation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    Sequential,
    Parallel {
        /// Agent name to run as aggregator, if any. Must name an agent in the block.
        aggregator: Option<String>,
    },
    Hierarchical {
        /// Agent name that plans and synthesizes. Must name an agent in the block.
        manager: String,
    },
    Debate {
        /// Agent name that closes the debate, if any. Must name an agent in the block.
        moderator: Option<String>,
        rounds: u32,
    },
    Routing {
        /// Agent name that picks a specialist. Must name an agent in the block.
        router: String,
    },
    /// Named in the data model, not given an operation. See module docs.
    Reflection,
}

/// One block: the unit of pattern execution and credential/workspace isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Unique within the owning design.
    pub id: String,
    pub pattern: Pattern,
    /// Every agent this block's pattern may invoke, in declaration order.
    pub agents: Vec<Agent>,
    /// The prompt fed to the block absent any inbound connection overriding it.
    pub task: String,
    /// If set, the Broker checks out this repository before any agent call (§4.4).
    pub git_repo: Option<String>,
}

impl Block {
    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.name.as_str())
    }

    pub fn find_agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }
}

/// A directed edge between two blocks (the source's aggregate `final_output` feeds the target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConnection {
    pub source_block: String,
    pub target_block: String,
}

/// A directed edge between two named agents in different blocks, overriding the block-level
/// aggregate for the named target agent only (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConnection {
    pub source_block: String,
    pub source_agent: String,
    pub target_block: String,
    pub target_agent: String,
}

/// One connection in a design: block-level or agent-level (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Connection {
    Block(BlockConnection),
    Agent(AgentConnection),
}

impl Connection {
    fn source_block(&self) -> &str {
        match self {
            Connection::Block(c) => &c.source_block,
            Connection::Agent(c) => &c.source_block,
        }
    }

    fn target_block(&self) -> &str {
        match self {
            Connection::Block(c) => &c.target_block,
            Connection::Agent(c) => &c.target_block,
        }
    }
}

/// A design: a DAG of blocks with block-level and agent-level connections (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Design {
    pub id: String,
    pub name: String,
    pub blocks: Vec<Block>,
    pub connections: Vec<Connection>,
}

impl Design {
    /// Validate structural invariants: unique block ids, every connection endpoint references an
    /// existing block/agent, no `reflection` blocks, and the connection graph is acyclic.
    /// Runs synchronously before an `Execution` row is created (§4.3 "Validation").
    pub fn validate(&self) -> Result<(), RunnerError> {
        let mut seen_ids = HashSet::new();
        for block in &self.blocks {
            if !seen_ids.insert(block.id.as_str()) {
                return Err(RunnerError::InvalidDesign(format!("duplicate block id: {}", block.id)));
            }
            if matches!(block.pattern, Pattern::Reflection) {
                return Err(RunnerError::InvalidDesign(format!(
                    "block {} declares the reflection pattern, which has no defined operation",
                    block.id
                )));
            }
            self.validate_pattern_references(block)?;
        }

        let by_id: HashMap<&str, &Block> = self.blocks.iter().map(|b| (b.id.as_str(), b)).collect();
        for conn in &self.connections {
            let source = by_id
                .get(conn.source_block())
                .ok_or_else(|| RunnerError::InvalidDesign(format!("connection references unknown block: {}", conn.source_block())))?;
            let target = by_id
                .get(conn.target_block())
                .ok_or_else(|| RunnerError::InvalidDesign(format!("connection references unknown block: {}", conn.target_block())))?;
            if let Connection::Agent(agent_conn) = conn {
                if source.find_agent(&agent_conn.source_agent).is_none() {
                    return Err(RunnerError::InvalidDesign(format!(
                        "connection references unknown agent {} in block {}",
                        agent_conn.source_agent, agent_conn.source_block
                    )));
                }
                if target.find_agent(&agent_conn.target_agent).is_none() {
                    return Err(RunnerError::InvalidDesign(format!(
                        "connection references unknown agent {} in block {}",
                        agent_conn.target_agent, agent_conn.target_block
                    )));
                }
            }
        }

        self.check_acyclic()
    }

    fn validate_pattern_references(&self, block: &Block) -> Result<(), RunnerError> {
        let missing = |role: &str, name: &str| {
            RunnerError::InvalidDesign(format!("block {} names {} agent '{}' not present in its agents", block.id, role, name))
        };
        match &block.pattern {
            Pattern::Sequential | Pattern::Reflection => {}
            Pattern::Parallel { aggregator } => {
                if let Some(name) = aggregator {
                    if block.find_agent(name).is_none() {
                        return Err(missing("aggregator", name));
                    }
                }
            }
            Pattern::Hierarchical { manager } => {
                if block.find_agent(manager).is_none() {
                    return Err(missing("manager", manager));
                }
            }
            Pattern::Debate { moderator, .. } => {
                if let Some(name) = moderator {
                    if block.find_agent(name).is_none() {
                        return Err(missing("moderator", name));
                    }
                }
            }
            Pattern::Routing { router } => {
                if block.find_agent(router).is_none() {
                    return Err(missing("router", router));
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over the block-level dependency graph (both connection kinds count as an
    /// edge between their source/target *blocks* for cycle-detection purposes).
    fn check_acyclic(&self) -> Result<(), RunnerError> {
        let mut in_degree: HashMap<&str, usize> = self.blocks.iter().map(|b| (b.id.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = self.blocks.iter().map(|b| (b.id.as_str(), Vec::new())).collect();

        for conn in &self.connections {
            adjacency.get_mut(conn.source_block()).expect("validated above").push(conn.target_block());
            *in_degree.get_mut(conn.target_block()).expect("validated above") += 1;
        }

        let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(&id, _)| id).collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for &next in &adjacency[id] {
                let deg = in_degree.get_mut(next).expect("validated above");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited != self.blocks.len() {
            return Err(RunnerError::DesignCyclic);
        }
        Ok(())
    }

    /// Topological execution order (Kahn's algorithm). Only valid to call after [`Design::validate`]
    /// has confirmed acyclicity.
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self.blocks.iter().map(|b| (b.id.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = self.blocks.iter().map(|b| (b.id.as_str(), Vec::new())).collect();
        for conn in &self.connections {
            adjacency.get_mut(conn.source_block()).expect("acyclic design").push(conn.target_block());
            *in_degree.get_mut(conn.target_block()).expect("acyclic design") += 1;
        }

        let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(&id, _)| id).collect();
        let mut order = Vec::with_capacity(self.blocks.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for &next in &adjacency[id] {
                let deg = in_degree.get_mut(next).expect("acyclic design");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Predecessor block ids of `block_id`, deduplicated, in connection-declaration order.
    pub fn predecessors_of(&self, block_id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut preds = Vec::new();
        for conn in &self.connections {
            if conn.target_block() == block_id && seen.insert(conn.source_block()) {
                preds.push(conn.source_block());
            }
        }
        preds
    }

    pub fn find_block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }
}
