use std::collections::{BTreeMap, BTreeSet};

use weft_core::error::{Result, WeftError};
use weft_core::types::TERMINATION_TOOL;

use crate::composite::Step;
use crate::template;
use crate::unit::Unit;

/// Validate a composite tree before any execution.
///
/// `input_keys` are the keys the pipeline expects in its initial state.
/// Checks, all of which fail construction rather than a run:
/// - every template placeholder is written by some unit that executes
///   strictly before it in every possible execution order (a parallel
///   sibling's writes only count after the parallel completes);
/// - output keys across parallel siblings are disjoint;
/// - the termination tool is only declared inside a loop;
/// - loops have a non-zero iteration budget and composites have children.
pub fn validate(root: &Step, input_keys: &[String]) -> Result<()> {
    let mut available: BTreeSet<String> = input_keys.iter().cloned().collect();
    check_step(root, &mut available, false)
}

fn check_step(step: &Step, available: &mut BTreeSet<String>, in_loop: bool) -> Result<()> {
    match step {
        Step::Unit(unit) => check_unit(unit, available, in_loop),
        Step::Sequential(seq) => {
            if seq.children.is_empty() {
                return Err(WeftError::Definition(format!(
                    "sequential '{}' has no children",
                    seq.name
                )));
            }
            for child in &seq.children {
                check_step(child, available, in_loop)?;
            }
            Ok(())
        }
        Step::Parallel(par) => {
            if par.children.is_empty() {
                return Err(WeftError::Definition(format!(
                    "parallel '{}' has no children",
                    par.name
                )));
            }

            // Output keys across siblings must be disjoint, or merged writes
            // would otherwise race on the same key.
            let mut owners: BTreeMap<String, String> = BTreeMap::new();
            for child in &par.children {
                for key in child.output_keys() {
                    if let Some(owner) = owners.get(&key) {
                        return Err(WeftError::Definition(format!(
                            "parallel '{}': children '{}' and '{}' both write key '{}'",
                            par.name,
                            owner,
                            child.name(),
                            key
                        )));
                    }
                    owners.insert(key, child.name().to_string());
                }
            }

            // Each branch sees only the state from before the fan-out; a
            // sibling's writes become visible after the merge.
            for child in &par.children {
                let mut branch = available.clone();
                check_step(child, &mut branch, in_loop)?;
            }
            for key in owners.into_keys() {
                available.insert(key);
            }
            Ok(())
        }
        Step::Loop(l) => {
            if l.max_iterations == 0 {
                return Err(WeftError::Definition(format!(
                    "loop '{}' has max_iterations = 0",
                    l.name
                )));
            }
            if l.children.is_empty() {
                return Err(WeftError::Definition(format!(
                    "loop '{}' has no children",
                    l.name
                )));
            }
            // The first iteration is the binding constraint: later
            // iterations only ever see more keys.
            for child in &l.children {
                check_step(child, available, true)?;
            }
            Ok(())
        }
    }
}

fn check_unit(unit: &Unit, available: &mut BTreeSet<String>, in_loop: bool) -> Result<()> {
    for key in template::placeholders(&unit.instruction) {
        if !available.contains(&key) {
            return Err(WeftError::Definition(format!(
                "unit '{}' references '{{{}}}', which no earlier step writes",
                unit.name, key
            )));
        }
    }

    if unit.declares_tool(TERMINATION_TOOL) && !in_loop {
        return Err(WeftError::Definition(format!(
            "unit '{}' declares '{}' but has no enclosing loop to catch the signal",
            unit.name, TERMINATION_TOOL
        )));
    }

    available.insert(unit.output_key.clone());
    Ok(())
}
