//! Execution and query ordering of migration tasks.
//!
//! Ordering happens in three steps:
//! 1. zoning: special entities first, readonly entities next, then the rest
//!    placed ahead of any already-placed entity that looks them up;
//! 2. a stable topological sort of the normal zone over lookup edges, using the
//!    zoning position as tie-break and to break lookup cycles;
//! 3. a capped repair pass that moves master-detail parents in front of their
//!    children.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::models::{DescriptorSet, EntityDescriptor};
use crate::task::MigrationTask;

/// Upper bound on master-detail repair passes. A master-detail cycle can never
/// be satisfied, so the repair gives up after this many passes.
pub const MASTER_DETAIL_REPAIR_PASSES: usize = 10;

#[derive(Debug)]
pub struct Schedule {
    /// Tasks in execution order.
    pub tasks: Vec<MigrationTask>,
    /// Indices into `tasks`, in query order.
    pub query_order: Vec<usize>,
    /// `false` when the master-detail repair ran out of passes.
    pub master_detail_converged: bool,
}

impl Schedule {
    pub fn build(descriptors: &DescriptorSet) -> Self {
        let (mut ordered, normal_start) = zone_order(descriptors.iter().cloned());

        let normal = ordered.split_off(normal_start);
        let mut normal = lookup_topological_order(normal);
        let master_detail_converged = repair_master_detail_order(&mut normal);
        ordered.extend(normal);

        let tasks: Vec<MigrationTask> = ordered.into_iter().map(MigrationTask::new).collect();
        let query_order = query_order(&tasks);

        Self {
            tasks,
            query_order,
            master_detail_converged,
        }
    }

    pub fn task_index(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.name() == name)
    }

    pub fn execution_names(&self) -> Vec<&str> {
        self.tasks.iter().map(MigrationTask::name).collect()
    }

    pub fn query_names(&self) -> Vec<&str> {
        self.query_order
            .iter()
            .map(|&index| self.tasks[index].name())
            .collect()
    }

    /// Aligned text table of both orders, for the log.
    pub fn render_table(&self) -> String {
        let width = self
            .tasks
            .iter()
            .map(|task| task.name().len())
            .max()
            .unwrap_or(0)
            .max("Execution".len());
        let mut out = format!("{:>3}  {:<width$}  {}\n", "#", "Execution", "Query");
        for (position, task) in self.tasks.iter().enumerate() {
            let queried = self.tasks[self.query_order[position]].name();
            out.push_str(&format!(
                "{:>3}  {:<width$}  {}\n",
                position + 1,
                task.name(),
                queried
            ));
        }
        out
    }
}

/// Places special, readonly and normal entities. Returns the order and the
/// index where the normal zone starts.
fn zone_order(
    descriptors: impl Iterator<Item = Arc<EntityDescriptor>>,
) -> (Vec<Arc<EntityDescriptor>>, usize) {
    let mut ordered: Vec<Arc<EntityDescriptor>> = Vec::new();
    let mut special_end = 0;
    let mut readonly_end = 0;

    for descriptor in descriptors {
        if descriptor.traits.special {
            ordered.insert(special_end, descriptor);
            special_end += 1;
            readonly_end += 1;
        } else if descriptor.traits.readonly {
            ordered.insert(readonly_end, descriptor);
            readonly_end += 1;
        } else {
            // Land before the earliest placed child that looks this entity up.
            let mut index = ordered.len();
            for position in (readonly_end..ordered.len()).rev() {
                if ordered[position].is_lookup_child_of(&descriptor.name) {
                    index = position;
                }
            }
            ordered.insert(index, descriptor);
        }
    }

    (ordered, readonly_end)
}

/// Kahn's algorithm over lookup edges, ties broken by current position.
fn lookup_topological_order(zone: Vec<Arc<EntityDescriptor>>) -> Vec<Arc<EntityDescriptor>> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); zone.len()];
    let mut pending_parents = vec![0usize; zone.len()];
    {
        let positions: HashMap<&str, usize> = zone
            .iter()
            .enumerate()
            .map(|(position, descriptor)| (descriptor.name.as_str(), position))
            .collect();
        for (child, descriptor) in zone.iter().enumerate() {
            for parent in descriptor.parent_lookups() {
                // Parents outside the normal zone are already placed ahead.
                if let Some(&parent) = positions.get(parent) {
                    children[parent].push(child);
                    pending_parents[child] += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..zone.len())
        .filter(|&position| pending_parents[position] == 0)
        .collect();
    let mut emitted = vec![false; zone.len()];
    let mut order = Vec::with_capacity(zone.len());

    while order.len() < zone.len() {
        let next = match ready.pop_first() {
            Some(position) => position,
            None => {
                let Some(position) = (0..zone.len()).find(|&position| !emitted[position]) else {
                    break;
                };
                log::debug!(
                    "Lookup cycle through '{}', keeping its zoning position",
                    zone[position].name
                );
                position
            }
        };
        if emitted[next] {
            continue;
        }
        emitted[next] = true;
        order.push(next);

        for &child in &children[next] {
            if emitted[child] {
                continue;
            }
            pending_parents[child] -= 1;
            if pending_parents[child] == 0 {
                ready.insert(child);
            }
        }
    }

    let mut slots: Vec<Option<Arc<EntityDescriptor>>> = zone.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|position| slots[position].take())
        .collect()
}

/// Moves master-detail parents immediately before their children.
/// Returns `false` when violations remain after the pass cap.
fn repair_master_detail_order(zone: &mut Vec<Arc<EntityDescriptor>>) -> bool {
    for _ in 0..MASTER_DETAIL_REPAIR_PASSES {
        let mut moved = false;
        let mut left = 0;
        while left < zone.len() {
            let parent_position = (left + 1..zone.len())
                .find(|&right| zone[left].is_master_detail_child_of(&zone[right].name));
            if let Some(right) = parent_position {
                let parent = zone.remove(right);
                zone.insert(left, parent);
                moved = true;
            }
            left += 1;
        }
        if !moved {
            return true;
        }
    }

    if master_detail_violations(zone) == 0 {
        return true;
    }
    log::warn!(
        "Master-detail ordering did not converge after {} passes; check for master-detail cycles among: {}",
        MASTER_DETAIL_REPAIR_PASSES,
        zone.iter()
            .map(|descriptor| descriptor.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    false
}

fn master_detail_violations(zone: &[Arc<EntityDescriptor>]) -> usize {
    let mut violations = 0;
    for (left, child) in zone.iter().enumerate() {
        violations += zone[left + 1..]
            .iter()
            .filter(|parent| child.is_master_detail_child_of(&parent.name))
            .count();
    }
    violations
}

fn query_order(tasks: &[MigrationTask]) -> Vec<usize> {
    let (mut unfiltered, filtered): (Vec<usize>, Vec<usize>) = (0..tasks.len())
        .partition(|&index| tasks[index].descriptor.requires_unfiltered_query());
    unfiltered.extend(filtered);
    unfiltered
}
