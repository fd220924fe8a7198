//! Step dependency graph validation.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use super::Step;
use crate::error::SequencerError;

/// Check that step names and types are unique, every dependency is
/// registered, and the graph is acyclic.
///
/// # Errors
///
/// Returns [`SequencerError::DuplicateStep`],
/// [`SequencerError::MissingDependency`], or
/// [`SequencerError::DependencyCycle`] naming the offending steps.
pub fn validate(steps: &[&dyn Step]) -> Result<(), SequencerError> {
    let mut names = HashSet::new();
    let mut ids = HashSet::new();
    for step in steps {
        if !names.insert(step.name()) || !ids.insert(step.step_id()) {
            return Err(SequencerError::DuplicateStep(step.name().to_string()));
        }
    }

    if let Some(step) = steps
        .iter()
        .find(|s| s.dependencies().iter().any(|d| !ids.contains(d)))
    {
        return Err(SequencerError::MissingDependency(step.name().to_string()));
    }

    let cyclic = unresolved(steps);
    if cyclic.is_empty() {
        Ok(())
    } else {
        let names: Vec<&str> = cyclic
            .iter()
            .filter_map(|&i| steps.get(i).map(|s| s.name()))
            .collect();
        Err(SequencerError::DependencyCycle(names.join(", ")))
    }
}

/// Indices Kahn's algorithm cannot order: steps on a cycle or downstream of
/// one. Dependencies on unregistered steps are ignored.
fn unresolved(steps: &[&dyn Step]) -> Vec<usize> {
    let type_to_idx: HashMap<TypeId, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.step_id(), i))
        .collect();

    let mut in_degree: Vec<usize> = steps
        .iter()
        .map(|s| {
            s.dependencies()
                .iter()
                .filter(|d| type_to_idx.contains_key(d))
                .count()
        })
        .collect();

    let mut reverse_deps: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, s) in steps.iter().enumerate() {
        for dep in s.dependencies() {
            if let Some(&dep_idx) = type_to_idx.get(dep)
                && let Some(rd) = reverse_deps.get_mut(dep_idx)
            {
                rd.push(i);
            }
        }
    }

    let mut queue: Vec<usize> = in_degree
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| (d == 0).then_some(i))
        .collect();
    let mut processed = vec![false; steps.len()];

    while let Some(idx) = queue.pop() {
        if let Some(p) = processed.get_mut(idx) {
            *p = true;
        }
        if let Some(dependents) = reverse_deps.get(idx) {
            for &dep in dependents {
                if let Some(count) = in_degree.get_mut(dep) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push(dep);
                    }
                }
            }
        }
    }

    processed
        .iter()
        .enumerate()
        .filter_map(|(i, &done)| (!done).then_some(i))
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::sequencer::StepResult;
    use crate::steps::StepContext;

    use anyhow::Result;

    // Each mock is a distinct type so TypeId-based deps work.
    macro_rules! mock_step {
        ($name:ident, $display:expr, $deps:expr) => {
            struct $name;
            impl Step for $name {
                fn name(&self) -> &str {
                    $display
                }
                fn dependencies(&self) -> &[TypeId] {
                    const DEPS: &[TypeId] = $deps;
                    DEPS
                }
                fn run(&self, _ctx: &StepContext) -> Result<StepResult> {
                    Ok(StepResult::Ok)
                }
            }
        };
    }

    mock_step!(StepA, "a", &[]);
    mock_step!(StepB, "b", &[]);
    mock_step!(StepC, "c", &[]);

    // Chain: DepA → DepB → DepC
    mock_step!(DepA, "dep-a", &[]);
    mock_step!(DepB, "dep-b", &[TypeId::of::<DepA>()]);
    mock_step!(DepC, "dep-c", &[TypeId::of::<DepB>()]);

    // Diamond: DiaA → DiaB + DiaC → DiaD
    mock_step!(DiaA, "dia-a", &[]);
    mock_step!(DiaB, "dia-b", &[TypeId::of::<DiaA>()]);
    mock_step!(DiaC, "dia-c", &[TypeId::of::<DiaA>()]);
    mock_step!(DiaD, "dia-d", &[TypeId::of::<DiaB>(), TypeId::of::<DiaC>()]);

    // Cycle CycA → CycB → CycA, with CycTail hanging off it
    mock_step!(CycA, "cyc-a", &[TypeId::of::<CycB>()]);
    mock_step!(CycB, "cyc-b", &[TypeId::of::<CycA>()]);
    mock_step!(CycTail, "cyc-tail", &[TypeId::of::<CycB>()]);

    mock_step!(MissingDep, "missing-dep", &[TypeId::of::<DepC>()]);
    mock_step!(SameNameAsA, "a", &[]);

    #[test]
    fn no_cycle_independent_steps() {
        let steps: Vec<&dyn Step> = vec![&StepA, &StepB, &StepC];
        assert!(unresolved(&steps).is_empty());
        assert!(validate(&steps).is_ok());
    }

    #[test]
    fn no_cycle_linear_chain() {
        let steps: Vec<&dyn Step> = vec![&DepA, &DepB, &DepC];
        assert!(unresolved(&steps).is_empty());
        assert!(validate(&steps).is_ok());
    }

    #[test]
    fn no_cycle_diamond() {
        let steps: Vec<&dyn Step> = vec![&DiaA, &DiaB, &DiaC, &DiaD];
        assert!(validate(&steps).is_ok());
    }

    #[test]
    fn cycle_detected_and_named() {
        let steps: Vec<&dyn Step> = vec![&StepA, &CycA, &CycB, &CycTail];
        assert_eq!(unresolved(&steps).len(), 3);
        let err = validate(&steps).unwrap_err();
        let SequencerError::DependencyCycle(names) = err else {
            panic!("expected cycle error");
        };
        let list: Vec<&str> = names.split(", ").collect();
        assert!(list.contains(&"cyc-a") && list.contains(&"cyc-b"));
        assert!(list.contains(&"cyc-tail"));
        assert!(!list.contains(&"a"));
    }

    #[test]
    fn missing_dependency_rejected() {
        let steps: Vec<&dyn Step> = vec![&MissingDep, &StepA];
        assert!(unresolved(&steps).is_empty(), "unregistered dependencies are not cycles");
        assert!(matches!(
            validate(&steps),
            Err(SequencerError::MissingDependency(name)) if name == "missing-dep"
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let steps: Vec<&dyn Step> = vec![&StepA, &SameNameAsA];
        assert!(matches!(
            validate(&steps),
            Err(SequencerError::DuplicateStep(name)) if name == "a"
        ));
    }

    #[test]
    fn setup_steps_form_a_valid_graph() {
        let steps = crate::steps::all_setup_steps(true);
        let refs: Vec<&dyn Step> = steps.iter().map(Box::as_ref).collect();
        assert!(validate(&refs).is_ok());
    }
}
