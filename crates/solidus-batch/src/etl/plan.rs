//! Migration ordering
//!
//! Orders resolved entity types so every type is migrated after the types its
//! relation fields point at. Relations to types outside the run are ignored;
//! they are looked up against whatever the destination already holds.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::error::MigrationError;
use super::schema::EntityDef;

/// Topologically sort `entities` by their relation dependencies
///
/// Ties are broken by the input order, so a run over independent tables keeps
/// the order the source enumerated them in.
pub fn plan(entities: &[&'static EntityDef]) -> Result<Vec<&'static EntityDef>, MigrationError> {
    let index: BTreeMap<&str, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name, i))
        .collect();

    let mut in_degree = vec![0usize; entities.len()];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); entities.len()];

    for (i, entity) in entities.iter().enumerate() {
        let deps: BTreeSet<usize> = entity
            .dependencies()
            .filter_map(|target| index.get(target).copied())
            .collect();
        in_degree[i] = deps.len();
        for dep in deps {
            dependents[dep].insert(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..entities.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(entities.len());

    while let Some(i) = ready.pop_front() {
        ordered.push(entities[i]);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if ordered.len() != entities.len() {
        let mut cycle: Vec<&str> = (0..entities.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| entities[i].name)
            .collect();
        cycle.sort_unstable();
        return Err(MigrationError::DependencyCycle(cycle.join(", ")));
    }

    Ok(ordered)
}
