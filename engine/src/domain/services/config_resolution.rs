//! Configuration resolution
//! Validates the application graph and computes its start order

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::domain::entities::Application;
use crate::domain::error::{DomainError, Result};

/// Validates a resolved application set and orders it for startup.
///
/// The graph must reference only declared applications, contain exactly one
/// entrypoint and no cycles. Ordering is a stable topological sort: ties are
/// broken by declaration order so runs are reproducible.
pub struct ConfigResolutionService;

impl ConfigResolutionService {
    pub fn new() -> Self {
        Self
    }

    /// Validate the graph and return the applications in start order.
    pub fn resolve(&self, applications: Vec<Application>) -> Result<Vec<Application>> {
        self.validate(&applications)?;
        let order = self.compute_start_order(&applications)?;
        debug!(order = ?order.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
               "resolved application start order");
        Ok(order)
    }

    fn validate(&self, applications: &[Application]) -> Result<()> {
        if applications.is_empty() {
            return Err(DomainError::ConfigInvalid(
                "configuration declares no applications".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for app in applications {
            if !seen.insert(app.id.as_str()) {
                return Err(DomainError::DuplicateApplication(app.id.clone()));
            }
        }

        for app in applications {
            for dep in &app.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(DomainError::DependencyNotFound {
                        application: app.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let entrypoints: Vec<&str> = applications
            .iter()
            .filter(|a| a.entrypoint)
            .map(|a| a.id.as_str())
            .collect();
        match entrypoints.len() {
            0 => return Err(DomainError::MissingEntrypoint),
            1 => {}
            _ => {
                return Err(DomainError::DuplicateEntrypoint(
                    entrypoints.join(", "),
                ))
            }
        }

        Ok(())
    }

    /// Kahn's algorithm over the dependency graph. Each round drains the
    /// queue in declaration order, so independent applications keep their
    /// configured relative order.
    fn compute_start_order(&self, applications: &[Application]) -> Result<Vec<Application>> {
        let index: HashMap<&str, usize> = applications
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; applications.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); applications.len()];
        for (i, app) in applications.iter().enumerate() {
            for dep in &app.dependencies {
                let d = index[dep.as_str()];
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..applications.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(applications.len());

        while let Some(i) = queue.pop_front() {
            order.push(i);
            let mut released: Vec<usize> = Vec::new();
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    released.push(j);
                }
            }
            released.sort_unstable();
            queue.extend(released);
        }

        if order.len() != applications.len() {
            let stuck: Vec<&str> = (0..applications.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| applications[i].id.as_str())
                .collect();
            return Err(DomainError::DependencyCycle(stuck.join(", ")));
        }

        let mut by_index: Vec<Option<Application>> =
            applications.iter().cloned().map(Some).collect();
        Ok(order
            .into_iter()
            .map(|i| by_index[i].take().expect("each index appears once"))
            .collect())
    }
}

impl Default for ConfigResolutionService {
    fn default() -> Self {
        Self::new()
    }
}
