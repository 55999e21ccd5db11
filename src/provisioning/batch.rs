use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use super::orchestrator::{ProvisionOutcome, Provisioner};
use super::ranker::StorageRanker;
use crate::config::BatchPolicy;
use crate::core::MachineSpec;

#[derive(Debug)]
pub enum MachineResult {
    Done {
        outcome: ProvisionOutcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// The batch stopped before this entry came up.
    NotAttempted,
}

#[derive(Debug)]
pub struct MachineReport {
    pub name: String,
    pub result: MachineResult,
}

impl MachineReport {
    pub fn outcome(&self) -> Option<&ProvisionOutcome> {
        match &self.result {
            MachineResult::Done { outcome, .. } => Some(outcome),
            MachineResult::NotAttempted => None,
        }
    }
}

/// Per-machine results in document order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub machines: Vec<MachineReport>,
    pub aborted: bool,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&ProvisionOutcome) -> bool) -> usize {
        self.machines
            .iter()
            .filter_map(MachineReport::outcome)
            .filter(|o| pred(o))
            .count()
    }

    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, ProvisionOutcome::Created { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ProvisionOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(ProvisionOutcome::is_failed)
    }

    pub fn not_attempted(&self) -> usize {
        self.machines
            .iter()
            .filter(|m| matches!(m.result, MachineResult::NotAttempted))
            .count()
    }

    /// What the exit code hangs on.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.failed() == 0
    }
}

impl Provisioner {
    async fn provision_timed(&self, spec: &MachineSpec) -> MachineReport {
        if self.waiter().cancellation().is_cancelled() {
            return MachineReport {
                name: spec.name.clone(),
                result: MachineResult::NotAttempted,
            };
        }

        let started_at = Utc::now();
        let outcome = self.provision(spec).await;
        MachineReport {
            name: spec.name.clone(),
            result: MachineResult::Done {
                outcome,
                started_at,
                finished_at: Utc::now(),
            },
        }
    }

    /// Runs every entry in document order under the configured batch policy.
    pub async fn run_batch(&self, specs: &[MachineSpec]) -> BatchReport {
        info!(machines = specs.len(), "Starting provisioning batch");
        match StorageRanker::new(self.api()).rank().await {
            Ok(ranking) => info!(?ranking, "Volumes by free space"),
            Err(e) => warn!(error = %e, "Could not rank volumes"),
        }

        let policy = self.settings().batch_policy;
        let parallel = self.settings().max_parallel.max(1);

        let report = if parallel > 1 && policy == BatchPolicy::Continue {
            info!(parallel, "Provisioning machines concurrently");
            // `buffered` yields in input order, so the report stays in document order
            let machines = stream::iter(specs)
                .map(|spec| self.provision_timed(spec))
                .buffered(parallel)
                .collect::<Vec<_>>()
                .await;
            BatchReport {
                machines,
                aborted: self.waiter().cancellation().is_cancelled(),
            }
        } else {
            if parallel > 1 {
                warn!("max_parallel is ignored under the abort batch policy");
            }
            self.run_sequential(specs, policy).await
        };

        info!(
            created = report.created(),
            skipped = report.skipped(),
            failed = report.failed(),
            not_attempted = report.not_attempted(),
            "Batch finished"
        );
        report
    }

    async fn run_sequential(&self, specs: &[MachineSpec], policy: BatchPolicy) -> BatchReport {
        let mut report = BatchReport::default();

        for spec in specs {
            if report.aborted {
                report.machines.push(MachineReport {
                    name: spec.name.clone(),
                    result: MachineResult::NotAttempted,
                });
                continue;
            }

            let machine = self.provision_timed(spec).await;
            let failed = machine.outcome().is_some_and(ProvisionOutcome::is_failed);
            report.machines.push(machine);

            if failed && policy == BatchPolicy::Abort {
                warn!(machine = %spec.name, "Aborting batch after failure");
                report.aborted = true;
            } else if self.waiter().cancellation().is_cancelled() {
                warn!("Batch cancelled, remaining machines will not be attempted");
                report.aborted = true;
            }
        }
        report
    }
}
