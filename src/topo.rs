use std::collections::{BTreeMap, BTreeSet};

use crate::models::TableDescriptor;

/// Result of ordering tables by FK dependency. `order` lists every table;
/// `cyclic` names the tables whose mutual references could not be resolved.
/// Cycle members are appended to the order by name and load with their
/// in-cycle dependencies ignored; all their FKs install in the post-step.
#[derive(Debug)]
pub struct TopologyResult {
    pub order: Vec<String>,
    pub cyclic: BTreeSet<String>,
}

/// Kahn's algorithm over "A references B" edges, restricted to the selected
/// set. Self-references never count as a dependency. Ties break by name so
/// plans are deterministic.
pub fn sort_by_dependency(tables: &[TableDescriptor]) -> TopologyResult {
    let selected: BTreeSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();

    // deps[A] = set of tables A references and must load after
    let mut deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for table in tables {
        let entry = deps.entry(table.name.as_str()).or_default();
        for fk in &table.foreign_keys {
            let referenced = fk.referenced_table.as_str();
            if referenced != table.name && selected.contains(referenced) {
                entry.insert(referenced);
            }
        }
    }

    let mut order = Vec::with_capacity(tables.len());
    let mut resolved: BTreeSet<&str> = BTreeSet::new();

    loop {
        let ready: Vec<&str> = deps
            .iter()
            .filter(|(name, remaining)| {
                !resolved.contains(*name) && remaining.iter().all(|d| resolved.contains(d))
            })
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            break;
        }
        for name in ready {
            resolved.insert(name);
            order.push(name.to_string());
        }
    }

    // Whatever is left participates in a cycle.
    let cyclic: BTreeSet<String> = deps
        .keys()
        .filter(|name| !resolved.contains(**name))
        .map(|name| name.to_string())
        .collect();
    order.extend(cyclic.iter().cloned());

    TopologyResult { order, cyclic }
}

/// Dependencies a table must wait on before loading, given the topology.
/// Cycle members wait on nothing inside their component.
pub fn load_dependencies(
    table: &TableDescriptor,
    selected: &BTreeSet<String>,
    cyclic: &BTreeSet<String>,
) -> BTreeSet<String> {
    if cyclic.contains(&table.name) {
        return table
            .foreign_keys
            .iter()
            .map(|fk| fk.referenced_table.clone())
            .filter(|r| r != &table.name && selected.contains(r) && !cyclic.contains(r))
            .collect();
    }
    table
        .foreign_keys
        .iter()
        .map(|fk| fk.referenced_table.clone())
        .filter(|r| r != &table.name && selected.contains(r))
        .collect()
}
