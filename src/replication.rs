use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use data_model::{BlobServer, ObjectId};
use metrics::{replication_stats, Timer};
use opentelemetry::KeyValue;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{client::BlobServerClient, registry::ServerRegistry};

/// Outcome of a replication pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub groups: usize,
    /// Members left out of the pass because their listing failed.
    pub skipped_members: Vec<String>,
    pub copied: usize,
    pub failed: usize,
}

impl ReplicationReport {
    fn merge(&mut self, other: ReplicationReport) {
        self.groups += other.groups;
        self.skipped_members.extend(other.skipped_members);
        self.copied += other.copied;
        self.failed += other.failed;
    }
}

/// Drives every group towards all members holding the union of the group's
/// objects.
///
/// Reconciliation is pairwise: every member's listing is pushed to every
/// other member of the same group. Objects never cross group boundaries.
pub struct ReplicationEngine {
    registry: Arc<ServerRegistry>,
    client: BlobServerClient,
    verbose: bool,
    metrics: replication_stats::Metrics,
}

impl ReplicationEngine {
    pub fn new(registry: Arc<ServerRegistry>, client: BlobServerClient, verbose: bool) -> Self {
        Self {
            registry,
            client,
            verbose,
            metrics: replication_stats::Metrics::new(),
        }
    }

    /// Runs a single pass over every group.
    pub async fn run_pass(&self) -> ReplicationReport {
        let _timer = Timer::start(&self.metrics.pass_latency);
        let mut report = ReplicationReport::default();
        for group in self.registry.groups() {
            if self.verbose {
                info!(group = %group, "syncing group");
            }
            let members = self.registry.group_members(&group);
            report.merge(self.sync_group(&group, &members).await);
        }
        info!(
            groups = report.groups,
            copied = report.copied,
            failed = report.failed,
            skipped_members = report.skipped_members.len(),
            "replication pass finished"
        );
        report
    }

    /// Runs passes every `interval` until `shutdown_rx` fires.
    pub async fn run_periodically(
        &self,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass().await;
                }
                _ = shutdown_rx.changed() => {
                    info!("replicator shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Reconciles the members of one group.
    pub async fn sync_group(&self, group: &str, members: &[BlobServer]) -> ReplicationReport {
        let mut report = ReplicationReport {
            groups: 1,
            ..Default::default()
        };
        if self.verbose {
            for member in members {
                info!(group, location = %member.base(), "group member");
            }
        }

        // Listings taken at the start of the pass; updated as copies land so
        // later pairs do not probe for objects we just delivered.
        let mut participants = Vec::with_capacity(members.len());
        let mut held: HashMap<&str, HashSet<ObjectId>> = HashMap::new();
        for member in members {
            match self.client.list(member).await {
                Ok(ids) => {
                    held.insert(member.base(), ids.into_iter().collect());
                    participants.push(member);
                }
                Err(e) => {
                    error!(group, location = %member.base(), error = %e, "failed to list objects, skipping member");
                    self.metrics.listing_failures.add(1, &[]);
                    report.skipped_members.push(member.base().to_string());
                }
            }
        }

        for source in &participants {
            let mut objects: Vec<ObjectId> = held
                .get(source.base())
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default();
            objects.sort();

            for id in &objects {
                for destination in &participants {
                    if destination.base() == source.base() {
                        continue;
                    }
                    if self.holds(&held, destination, id).await {
                        continue;
                    }
                    if self.mirror_object(source, destination, id).await {
                        report.copied += 1;
                        if let Some(ids) = held.get_mut(destination.base()) {
                            ids.insert(id.clone());
                        }
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    async fn holds(
        &self,
        held: &HashMap<&str, HashSet<ObjectId>>,
        destination: &BlobServer,
        id: &ObjectId,
    ) -> bool {
        if held
            .get(destination.base())
            .is_some_and(|ids| ids.contains(id))
        {
            return true;
        }
        match self.client.exists(destination, id).await {
            Ok(true) => {
                debug!(object = %id, server = %destination.base(), "object present");
                true
            }
            Ok(false) => {
                debug!(object = %id, server = %destination.base(), "object missing");
                false
            }
            Err(e) => {
                // Treated as missing: the copy attempt will surface the failure.
                warn!(object = %id, server = %destination.base(), error = %e, "failed to probe object");
                false
            }
        }
    }

    /// Copies one object, extension headers included. Returns whether the
    /// destination accepted it.
    async fn mirror_object(&self, source: &BlobServer, destination: &BlobServer, id: &ObjectId) -> bool {
        if self.verbose {
            info!(object = %id, from = %source.base(), to = %destination.base(), "mirroring object");
        }
        let labels = [KeyValue::new("group", source.group.clone())];

        let blob = match self.client.fetch(source, id).await {
            Ok(blob) => blob,
            Err(e) => {
                error!(object = %id, src = %source.base(), error = %e, "error fetching object");
                self.metrics.copy_failures.add(1, &labels);
                return false;
            }
        };
        match self
            .client
            .store(destination, id, blob.data, &blob.metadata)
            .await
        {
            Ok(_) => {
                self.metrics.objects_copied.add(1, &labels);
                true
            }
            Err(e) => {
                error!(object = %id, dst = %destination.base(), error = %e, "error sending object");
                self.metrics.copy_failures.add(1, &labels);
                false
            }
        }
    }
}
