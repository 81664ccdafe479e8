use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use weft_core::error::Result;

use crate::unit::Unit;
use crate::validate;

/// Runs its children strictly in order against the same mutable state; each
/// child observes every write made by its predecessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequential {
    pub name: String,
    pub children: Vec<Step>,
}

impl Sequential {
    pub fn new(name: impl Into<String>, children: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

/// Runs its children concurrently, each against an isolated snapshot of the
/// incoming state; declared outputs are merged back once all complete.
/// Output keys across children must be disjoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parallel {
    pub name: String,
    pub children: Vec<Step>,
}

impl Parallel {
    pub fn new(name: impl Into<String>, children: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

/// Runs its children in sequence repeatedly, up to `max_iterations` times,
/// stopping early when the termination tool fires during an iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    pub name: String,
    pub children: Vec<Step>,
    pub max_iterations: usize,
}

impl Loop {
    pub fn new(name: impl Into<String>, children: Vec<Step>, max_iterations: usize) -> Self {
        Self {
            name: name.into(),
            children,
            max_iterations,
        }
    }
}

/// A node in the composite tree: a unit, or one of the three composition
/// strategies. The tree is fixed at definition time; there is no dynamic
/// graph mutation at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Unit(Unit),
    Sequential(Sequential),
    Parallel(Parallel),
    Loop(Loop),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Unit(u) => &u.name,
            Step::Sequential(s) => &s.name,
            Step::Parallel(p) => &p.name,
            Step::Loop(l) => &l.name,
        }
    }

    /// Every output key a unit in this subtree may write.
    pub fn output_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        self.collect_output_keys(&mut keys);
        keys
    }

    fn collect_output_keys(&self, keys: &mut BTreeSet<String>) {
        match self {
            Step::Unit(u) => {
                keys.insert(u.output_key.clone());
            }
            Step::Sequential(s) => {
                for child in &s.children {
                    child.collect_output_keys(keys);
                }
            }
            Step::Parallel(p) => {
                for child in &p.children {
                    child.collect_output_keys(keys);
                }
            }
            Step::Loop(l) => {
                for child in &l.children {
                    child.collect_output_keys(keys);
                }
            }
        }
    }

    /// Visit every unit in this subtree, depth-first.
    pub fn visit_units<'a>(&'a self, f: &mut impl FnMut(&'a Unit)) {
        match self {
            Step::Unit(u) => f(u),
            Step::Sequential(s) => {
                for child in &s.children {
                    child.visit_units(f);
                }
            }
            Step::Parallel(p) => {
                for child in &p.children {
                    child.visit_units(f);
                }
            }
            Step::Loop(l) => {
                for child in &l.children {
                    child.visit_units(f);
                }
            }
        }
    }
}

impl From<Unit> for Step {
    fn from(unit: Unit) -> Self {
        Step::Unit(unit)
    }
}

impl From<Sequential> for Step {
    fn from(seq: Sequential) -> Self {
        Step::Sequential(seq)
    }
}

impl From<Parallel> for Step {
    fn from(par: Parallel) -> Self {
        Step::Parallel(par)
    }
}

impl From<Loop> for Step {
    fn from(l: Loop) -> Self {
        Step::Loop(l)
    }
}

/// A validated composite tree ready to run.
///
/// Construction validates the whole tree: disjoint parallel output keys,
/// satisfiable template references, termination tool only inside a loop,
/// sane iteration budgets. An invalid definition never reaches execution.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    root: Step,
    input_keys: Vec<String>,
}

impl Pipeline {
    /// Build a pipeline whose templates rely only on keys written by earlier
    /// units.
    pub fn new(name: impl Into<String>, root: impl Into<Step>) -> Result<Self> {
        Self::with_inputs(name, root, Vec::new())
    }

    /// Build a pipeline that additionally expects `input_keys` to be present
    /// in the initial state (e.g. the user's topic under a known key).
    pub fn with_inputs(
        name: impl Into<String>,
        root: impl Into<Step>,
        input_keys: Vec<String>,
    ) -> Result<Self> {
        let root = root.into();
        validate::validate(&root, &input_keys)?;
        Ok(Self {
            name: name.into(),
            root,
            input_keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Step {
        &self.root
    }

    pub fn input_keys(&self) -> &[String] {
        &self.input_keys
    }
}
