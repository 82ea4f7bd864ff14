//! Provider ordering.
//!
//! Providers are sorted so that every provider runs after the providers of
//! everything it consumes. Ties keep registration order.

use std::collections::{BTreeSet, HashMap};

use crate::lifecycle::container::TypeKey;
use crate::lifecycle::error::ProvisionError;
use crate::lifecycle::provider::Provider;

const SUPPLIED: &str = "supplied value";

/// Indices into `providers`, in the order they must run.
pub(crate) fn resolve_order(providers: &[Provider], supplied: &[TypeKey]) -> Result<Vec<usize>, ProvisionError> {
    let mut owner: HashMap<TypeKey, usize> = HashMap::new();
    for (idx, provider) in providers.iter().enumerate() {
        for key in &provider.provides {
            if supplied.contains(key) {
                return Err(ProvisionError::DuplicateProvider {
                    dependency: key.name(),
                    first: SUPPLIED.to_string(),
                    second: provider.name.clone(),
                });
            }
            if let Some(&first) = owner.get(key) {
                return Err(ProvisionError::DuplicateProvider {
                    dependency: key.name(),
                    first: providers[first].name.clone(),
                    second: provider.name.clone(),
                });
            }
            owner.insert(*key, idx);
        }
    }

    // edges[q] lists providers that consume something q produces.
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); providers.len()];
    let mut indegree = vec![0usize; providers.len()];
    for (idx, provider) in providers.iter().enumerate() {
        let mut upstream = BTreeSet::new();
        for key in &provider.requires {
            match owner.get(key) {
                Some(&q) => {
                    upstream.insert(q);
                }
                None if supplied.contains(key) => {}
                None => {
                    return Err(ProvisionError::MissingDependency {
                        provider: provider.name.clone(),
                        dependency: key.name(),
                    })
                }
            }
        }
        for key in &provider.optional {
            if let Some(&q) = owner.get(key) {
                upstream.insert(q);
            }
        }
        for q in upstream {
            if q == idx {
                return Err(ProvisionError::Cycle {
                    path: vec![provider.name.clone(), provider.name.clone()],
                });
            }
            edges[q].push(idx);
            indegree[idx] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..providers.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(providers.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &down in &edges[next] {
            indegree[down] -= 1;
            if indegree[down] == 0 {
                ready.insert(down);
            }
        }
    }

    if order.len() < providers.len() {
        let path = find_cycle(&edges, &indegree)
            .into_iter()
            .map(|i| providers[i].name.clone())
            .collect();
        return Err(ProvisionError::Cycle { path });
    }
    Ok(order)
}

/// Walk the unresolved nodes until one repeats.
fn find_cycle(edges: &[Vec<usize>], indegree: &[usize]) -> Vec<usize> {
    let Some(start) = indegree.iter().position(|&d| d > 0) else {
        return Vec::new();
    };

    // Follow edges backwards: every unresolved node has an unresolved upstream.
    let mut upstream_of = vec![None; edges.len()];
    for (q, downs) in edges.iter().enumerate() {
        if indegree[q] == 0 {
            continue;
        }
        for &d in downs {
            if indegree[d] > 0 && upstream_of[d].is_none() {
                upstream_of[d] = Some(q);
            }
        }
    }

    let mut seen = vec![None; edges.len()];
    let mut walk = Vec::new();
    let mut node = start;
    loop {
        if let Some(pos) = seen[node] {
            let mut cycle: Vec<usize> = walk[pos..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        seen[node] = Some(walk.len());
        walk.push(node);
        match upstream_of[node] {
            Some(q) => node = q,
            None => return walk,
        }
    }
}
