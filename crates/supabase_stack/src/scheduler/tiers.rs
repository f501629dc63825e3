//! Dependency tiers by Kahn's algorithm.

use std::collections::{BTreeMap, BTreeSet};

use crate::stack::ServiceName;
use crate::util::errors::GraphError;

pub type Dependencies = BTreeMap<ServiceName, BTreeSet<ServiceName>>;

/// Group services into tiers whose dependencies all sit in earlier tiers.
///
/// Every tier is sorted by name, so flattening the result gives the
/// topological order with ties broken by name.
pub fn tiers(dependencies: &Dependencies) -> Result<Vec<Vec<ServiceName>>, GraphError> {
    let mut in_degree: BTreeMap<ServiceName, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<ServiceName, BTreeSet<ServiceName>> = BTreeMap::new();

    for (&service, deps) in dependencies {
        in_degree.insert(service, deps.len());
        for &dependency in deps {
            if !dependencies.contains_key(&dependency) {
                return Err(GraphError::UnknownDependency { service, dependency });
            }
            dependents.entry(dependency).or_default().insert(service);
        }
    }

    let mut ready: BTreeSet<ServiceName> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(service, _)| *service)
        .collect();

    let mut tiers = vec![];
    let mut placed = 0;
    while !ready.is_empty() {
        let tier: Vec<ServiceName> = std::mem::take(&mut ready).into_iter().collect();
        for service in &tier {
            for dependent in dependents.get(service).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
        placed += tier.len();
        tiers.push(tier);
    }

    if placed < dependencies.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(service, _)| service)
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(tiers)
}

/// Every service that depends on `service`, directly or not.
pub fn dependents_of(dependencies: &Dependencies, service: ServiceName) -> BTreeSet<ServiceName> {
    let mut found = BTreeSet::new();
    let mut frontier = vec![service];
    while let Some(current) = frontier.pop() {
        for (&candidate, deps) in dependencies {
            if deps.contains(&current) && found.insert(candidate) {
                frontier.push(candidate);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::ServiceName::*;

    fn deps(edges: &[(ServiceName, &[ServiceName])]) -> Dependencies {
        edges
            .iter()
            .map(|(service, deps)| (*service, deps.iter().copied().collect()))
            .collect()
    }

    fn stack() -> Dependencies {
        deps(&[
            (Postgres, &[]),
            (Postgrest, &[Postgres]),
            (Gotrue, &[Postgres]),
            (Realtime, &[Postgres]),
            (Storage, &[Postgres]),
            (Kong, &[Postgrest, Gotrue, Realtime, Storage]),
        ])
    }

    #[test]
    fn stack_tiers() {
        assert_eq!(
            tiers(&stack()).unwrap(),
            vec![vec![Postgres], vec![Gotrue, Postgrest, Realtime, Storage], vec![Kong]]
        );
    }

    #[test]
    fn independent_services_share_a_tier_in_name_order() {
        let independent = deps(&[(Storage, &[]), (Kong, &[]), (Gotrue, &[])]);
        assert_eq!(tiers(&independent).unwrap(), vec![vec![Gotrue, Kong, Storage]]);
    }

    #[test]
    fn cycle_is_reported() {
        let cyclic = deps(&[(Postgres, &[Kong]), (Kong, &[Postgres]), (Gotrue, &[])]);
        assert!(matches!(
            tiers(&cyclic),
            Err(GraphError::Cycle(members)) if members == vec![Kong, Postgres]
        ));
    }

    #[test]
    fn dangling_dependency() {
        let dangling = deps(&[(Kong, &[Gotrue])]);
        assert!(matches!(
            tiers(&dangling),
            Err(GraphError::UnknownDependency { service: Kong, dependency: Gotrue })
        ));
    }

    #[test]
    fn transitive_dependents() {
        let all = dependents_of(&stack(), Postgres);
        assert_eq!(all.len(), 5);
        assert_eq!(dependents_of(&stack(), Storage), BTreeSet::from([Kong]));
        assert!(dependents_of(&stack(), Kong).is_empty());
    }
}
