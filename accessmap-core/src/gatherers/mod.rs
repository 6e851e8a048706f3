//! Pipeline stages.
//!
//! A gatherer reads the model accumulated by the stages before it and returns
//! a delta plus the issues it found. It never mutates the model; the
//! [`Pipeline`](crate::pipeline::Pipeline) merges the delta before running the
//! next stage.
//!
//! # Module Structure
//! - `account`: cloud account identity
//! - `database_config`: declared databases and their master passwords
//! - `inventory`: live database instances reconciled against declarations
//! - `access`: optional direct connectivity check
//! - `services`: declared service connections
//! - `applications`: declared applications
//! - `users`: declared users, permissions and schedules
//! - `identity`: identity provider enrichment

use crate::Result;
use crate::issue::Issue;
use crate::models::Model;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::future::Future;

pub mod access;
pub mod account;
pub mod applications;
pub mod database_config;
pub mod identity;
pub mod inventory;
pub mod services;
pub mod users;

pub use access::AccessProbeGatherer;
pub use account::AccountGatherer;
pub use applications::ApplicationsGatherer;
pub use database_config::DatabaseConfigGatherer;
pub use identity::IdentityGatherer;
pub use inventory::InventoryGatherer;
pub use services::ServicesGatherer;
pub use users::UsersGatherer;

/// Output of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gathered {
    /// Only the keys this stage asserts
    pub delta: Model,
    /// Findings in entity order
    pub issues: Vec<Issue>,
}

impl Gathered {
    pub fn new(delta: Model, issues: Vec<Issue>) -> Self {
        Self { delta, issues }
    }
}

/// One stage of the pipeline.
///
/// # Object Safety
/// This trait is object-safe; the pipeline holds stages as
/// `Box<dyn Gatherer>`.
#[async_trait]
pub trait Gatherer: Send + Sync {
    /// Short stage name used in logs.
    fn name(&self) -> &'static str;

    /// Computes this stage's delta from the current model.
    ///
    /// # Errors
    /// Returns error only for failures that make the whole run meaningless;
    /// anything scoped to one entity is reported as an issue instead
    async fn gather(&self, model: &Model) -> Result<Gathered>;
}

/// Runs `task` for every item with at most `max_workers` in flight and
/// returns the outcomes in input order.
pub(crate) async fn bounded_map<I, T, F, Fut, O>(items: I, max_workers: usize, task: F) -> Vec<O>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = O>,
{
    let futures = items.into_iter().enumerate().map(|(index, item)| {
        let future = task(item);
        async move { (index, future.await) }
    });

    let mut outcomes: Vec<(usize, O)> = stream::iter(futures)
        .buffer_unordered(max_workers.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_bounded_map_restores_order() {
        let outcomes = bounded_map(vec![30u64, 10, 20, 0], 4, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay
        })
        .await;
        assert_eq!(outcomes, vec![30, 10, 20, 0]);
    }

    #[tokio::test]
    async fn test_bounded_map_limits_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        bounded_map(0..10, 3, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
