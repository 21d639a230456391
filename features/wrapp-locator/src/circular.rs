//! Detection of resolutions that would wait on themselves

use std::collections::{HashMap, HashSet, VecDeque};

use crate::token::InstanceName;

/// Searches the waiting-for graph for a path from `target` back to `waiter`
///
/// `waiting_for` returns the instances a holder is currently blocked on.
/// Returns the cycle starting and ending with `waiter`, e.g. `[A, B, A]`.
pub(crate) fn detect_cycle(
    waiter: &InstanceName,
    target: &InstanceName,
    waiting_for: impl Fn(&InstanceName) -> Vec<InstanceName>,
) -> Option<Vec<InstanceName>> {
    if waiter == target {
        return Some(vec![waiter.clone(), target.clone()]);
    }

    let mut previous: HashMap<InstanceName, InstanceName> = HashMap::new();
    let mut visited: HashSet<InstanceName> = HashSet::from([target.clone()]);
    let mut queue = VecDeque::from([target.clone()]);

    while let Some(current) = queue.pop_front() {
        for next in waiting_for(&current) {
            if !visited.insert(next.clone()) {
                continue;
            }
            previous.insert(next.clone(), current.clone());

            if &next == waiter {
                // Walk back from the waiter to the target
                let mut path = vec![next];
                while let Some(before) = previous.get(&path[path.len() - 1]) {
                    path.push(before.clone());
                }
                path.push(waiter.clone());
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    None
}

/// Circular path from the chain of ongoing resolutions, if `name` is already part of it
pub(crate) fn chain_cycle(chain: &[InstanceName], name: &InstanceName) -> Option<Vec<InstanceName>> {
    let start = chain.iter().position(|entry| entry == name)?;
    let mut path = chain[start..].to_vec();
    path.push(name.clone());
    Some(path)
}

/// `A -> B -> A`
pub(crate) fn format_path(path: &[InstanceName]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use rstest::rstest;

    fn name(label: &str) -> InstanceName {
        Token::<()>::new(label).request().name().clone()
    }

    fn graph(edges: Vec<(InstanceName, InstanceName)>) -> impl Fn(&InstanceName) -> Vec<InstanceName> {
        move |from| {
            edges
                .iter()
                .filter(|(source, _)| source == from)
                .map(|(_, to)| to.clone())
                .collect()
        }
    }

    #[rstest]
    fn finds_direct_cycle() {
        let (a, b) = (name("A"), name("B"));
        // B already waits on A, now A wants to wait on B
        let path = detect_cycle(&a, &b, graph(vec![(b.clone(), a.clone())])).unwrap();
        assert_eq!(format_path(&path), "A -> B -> A");
    }

    #[rstest]
    fn finds_transitive_cycle() {
        let (a, b, c) = (name("A"), name("B"), name("C"));
        let edges = vec![(b.clone(), c.clone()), (c.clone(), a.clone())];
        let path = detect_cycle(&a, &b, graph(edges)).unwrap();
        assert_eq!(format_path(&path), "A -> B -> C -> A");
    }

    #[rstest]
    fn no_cycle_without_path_back() {
        let (a, b, c) = (name("A"), name("B"), name("C"));
        let edges = vec![(b.clone(), c.clone()), (a.clone(), c.clone())];
        assert!(detect_cycle(&a, &b, graph(edges)).is_none());
    }

    #[rstest]
    fn self_wait_is_a_cycle() {
        let a = name("A");
        let path = detect_cycle(&a, &a, graph(vec![])).unwrap();
        assert_eq!(format_path(&path), "A -> A");
    }

    #[rstest]
    fn chain_cycle_starts_at_first_occurrence() {
        let (a, b, c) = (name("A"), name("B"), name("C"));
        let chain = vec![a.clone(), b.clone(), c.clone()];
        assert_eq!(format_path(&chain_cycle(&chain, &b).unwrap()), "B -> C -> B");
        assert!(chain_cycle(&chain, &name("D")).is_none());
    }
}
