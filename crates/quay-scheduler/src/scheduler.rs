//! Segregated scheduler — pool-restricted, spread-preserving placement.
//!
//! Given a cluster view and an (app, process) tuple, the scheduler:
//!
//! 1. Resolves the candidate pools for the app (explicit pool, pools of
//!    the owning team, or the default pool)
//! 2. Filters cluster nodes to those tagged with a candidate pool
//! 3. Optionally discards nodes whose committed memory would exceed the
//!    configured budget
//! 4. Picks the node with the fewest containers of the same (app,
//!    process), spreading ties by total container count and then by
//!    sorted host address
//!
//! The aggregate-and-persist pair in `choose_node` runs under a
//! process-wide placement lock, so concurrent placements for the same
//! (app, process) over K hosts end with per-host counts differing by at
//! most one.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use quay_core::cluster::{ClusterView, Node, POOL_METADATA};
use quay_core::config::SchedulerConfig;
use quay_core::types::App;
use quay_state::StateStore;

use crate::error::{SchedulerError, SchedulerResult};

const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Options for the container the placement is being made for.
///
/// When `name` is non-empty, the chosen host is persisted into the
/// container registry under that container name before returning.
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    pub name: String,
}

/// The segregated scheduler. Cheap to share behind an `Arc`; all state
/// lives in the store except the placement lock.
pub struct SegregatedScheduler {
    store: StateStore,
    config: SchedulerConfig,
    /// Serializes the aggregate-and-persist pair in `choose_node`.
    placement: Mutex<()>,
}

impl SegregatedScheduler {
    pub fn new(store: StateStore, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            placement: Mutex::new(()),
        }
    }

    /// Choose a node for one new container of (app, process).
    ///
    /// Returns the chosen node; the caller instantiates the container on
    /// that host. Does not create the container itself.
    pub fn schedule(
        &self,
        cluster: &ClusterView,
        opts: &CreateContainerOptions,
        app_name: &str,
        process_name: &str,
    ) -> SchedulerResult<Node> {
        let app = self
            .store
            .app(app_name)?
            .ok_or_else(|| SchedulerError::AppNotFound(app_name.to_string()))?;
        let nodes = self.nodes_for_app(cluster, &app)?;
        let nodes = self.filter_by_memory_usage(&app, nodes)?;
        let node = self.choose_node(&nodes, &opts.name, app_name, process_name)?;
        debug!(
            app = app_name,
            process = process_name,
            node = %node.address,
            "scheduled container"
        );
        Ok(node)
    }

    /// Pick one existing container of (app, process) that sits on the
    /// most-loaded host for that tuple, as a candidate for removal when
    /// scaling down.
    pub fn get_removable_container(
        &self,
        cluster: &ClusterView,
        app_name: &str,
        process_name: &str,
    ) -> SchedulerResult<String> {
        let app = self
            .store
            .app(app_name)?
            .ok_or_else(|| SchedulerError::AppNotFound(app_name.to_string()))?;
        let nodes = self.nodes_for_app(cluster, &app)?;
        self.choose_container_from_max_count(&nodes, app_name, process_name)
    }

    // ── Candidate resolution ───────────────────────────────────────

    /// Candidate pool names for the app, in resolution order: the app's
    /// explicit pool, else every pool of the owning team, else the
    /// default pool.
    fn candidate_pools(&self, app: &App) -> SchedulerResult<Vec<String>> {
        if !app.pool.is_empty() {
            let pool = self
                .store
                .pool(&app.pool)?
                .ok_or_else(|| SchedulerError::PoolNotFound(app.pool.clone()))?;
            if !pool.public && !pool.teams.iter().any(|t| *t == app.team_owner) {
                return Err(SchedulerError::PoolAccessDenied {
                    pool: pool.name,
                    team: app.team_owner.clone(),
                });
            }
            return Ok(vec![pool.name]);
        }
        let team_pools = self.store.pools_for_team(&app.team_owner)?;
        if !team_pools.is_empty() {
            return Ok(team_pools.into_iter().map(|p| p.name).collect());
        }
        match self.store.default_pool()? {
            Some(pool) => Ok(vec![pool.name]),
            None => Err(SchedulerError::NoDefaultPool),
        }
    }

    /// Cluster nodes eligible for the app: the first candidate pool with
    /// at least one tagged node wins.
    fn nodes_for_app(&self, cluster: &ClusterView, app: &App) -> SchedulerResult<Vec<Node>> {
        let pools = self.candidate_pools(app)?;
        for pool in &pools {
            let nodes = cluster.nodes_for_metadata(POOL_METADATA, pool);
            if !nodes.is_empty() {
                return Ok(nodes);
            }
        }
        Err(SchedulerError::NoNodesInPools(pools))
    }

    // ── Memory awareness ───────────────────────────────────────────

    /// Discard nodes whose committed memory plus the app's plan memory
    /// would exceed the configured fraction of the host budget.
    ///
    /// When no node is left: with autoscaling enabled the full candidate
    /// set is used and a warning is emitted; otherwise placement fails.
    fn filter_by_memory_usage(&self, app: &App, nodes: Vec<Node>) -> SchedulerResult<Vec<Node>> {
        if !self.config.memory_aware() {
            return Ok(nodes);
        }
        let mut plan_memory_cache: HashMap<String, Option<u64>> = HashMap::new();
        let mut chosen = Vec::new();
        for node in &nodes {
            let total: f64 = node
                .metadata
                .get(&self.config.total_memory_metadata)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0);
            let used = self.host_committed_memory(&node.host(), &mut plan_memory_cache)?;
            let budget = total * f64::from(self.config.max_memory_ratio);
            if (used + app.plan.memory) as f64 <= budget {
                chosen.push(node.clone());
            }
        }
        if chosen.is_empty() {
            let requested_mb = app.plan.memory as f64 / MEGABYTE;
            if self.config.auto_scale_enabled {
                warn!(
                    app = %app.name,
                    requested_mb,
                    "no nodes found with enough memory for container; \
                     scheduling anyway since autoscale is enabled"
                );
                return Ok(nodes);
            }
            return Err(SchedulerError::NotEnoughMemory {
                app: app.name.clone(),
                requested_mb,
            });
        }
        Ok(chosen)
    }

    /// Sum of plan memory over containers placed on the host, counting
    /// only containers whose app's plan memory is known.
    fn host_committed_memory(
        &self,
        host: &str,
        plan_memory_cache: &mut HashMap<String, Option<u64>>,
    ) -> SchedulerResult<u64> {
        let mut used = 0;
        for container in self.store.containers_on_host(host)? {
            let memory = match plan_memory_cache.get(&container.app_name) {
                Some(cached) => *cached,
                None => {
                    let memory = self.store.app(&container.app_name)?.map(|a| a.plan.memory);
                    plan_memory_cache.insert(container.app_name.clone(), memory);
                    memory
                }
            };
            if let Some(memory) = memory {
                used += memory;
            }
        }
        Ok(used)
    }

    // ── Node choice ────────────────────────────────────────────────

    /// Pick the host minimizing the (app, process) container count,
    /// breaking ties by total container count and then by sorted host
    /// address. When a container name is given, the chosen host is
    /// persisted into that container record before returning.
    ///
    /// Runs under the placement lock: the aggregation and the host
    /// persist happen atomically with respect to concurrent placements.
    fn choose_node(
        &self,
        nodes: &[Node],
        container_name: &str,
        app_name: &str,
        process_name: &str,
    ) -> SchedulerResult<Node> {
        let _guard = self.placement.lock().expect("placement lock");
        let (hosts, hosts_map) = nodes_to_hosts(nodes);
        let host_counts = self.store.aggregate_containers_by_host(&hosts)?;
        let app_counts =
            self.store
                .aggregate_containers_by_host_app_process(&hosts, app_name, process_name)?;

        let mut chosen: Option<&String> = None;
        let mut min_key = (usize::MAX, usize::MAX);
        for host in &hosts {
            let key = (
                app_counts.get(host).copied().unwrap_or(0),
                host_counts.get(host).copied().unwrap_or(0),
            );
            if key < min_key {
                min_key = key;
                chosen = Some(host);
            }
        }
        let host = chosen.ok_or(SchedulerError::NoNodesAvailable)?;
        debug!(
            host = %host,
            app = app_name,
            process = process_name,
            app_count = min_key.0,
            total_count = min_key.1,
            "chose node"
        );
        if !container_name.is_empty() && !self.store.set_container_host_by_name(container_name, host)? {
            return Err(SchedulerError::State(quay_state::StateError::NotFound(
                container_name.to_string(),
            )));
        }
        Ok(hosts_map[host].clone())
    }

    // ── Removable-container choice ─────────────────────────────────

    /// The id of one container of (app, process) on the host with the
    /// most such containers. Ties between hosts break lexicographically
    /// by host address.
    fn choose_container_from_max_count(
        &self,
        nodes: &[Node],
        app_name: &str,
        process_name: &str,
    ) -> SchedulerResult<String> {
        let (hosts, _) = nodes_to_hosts(nodes);
        let counts =
            self.store
                .aggregate_containers_by_host_app_process(&hosts, app_name, process_name)?;

        let mut chosen: Option<&String> = None;
        let mut max_count = 0;
        for host in &hosts {
            let count = counts.get(host).copied().unwrap_or(0);
            if count > max_count {
                max_count = count;
                chosen = Some(host);
            }
        }
        let host = chosen.ok_or(SchedulerError::UnitNotFound)?;
        self.container_from_host(host, app_name, process_name)
    }

    /// Any one container of (app, process) on the host.
    fn container_from_host(
        &self,
        host: &str,
        app_name: &str,
        process_name: &str,
    ) -> SchedulerResult<String> {
        self.store
            .container_on_host(host, app_name, process_name)?
            .map(|c| c.id)
            .ok_or(SchedulerError::UnitNotFound)
    }
}

/// Map nodes to their bare hosts: a sorted host list plus a host → node
/// lookup. Sorted order is what makes tie-breaking deterministic.
fn nodes_to_hosts(nodes: &[Node]) -> (Vec<String>, HashMap<String, Node>) {
    let mut hosts: Vec<String> = Vec::with_capacity(nodes.len());
    let mut hosts_map = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let host = node.host();
        if !hosts_map.contains_key(&host) {
            hosts.push(host.clone());
        }
        hosts_map.insert(host, node.clone());
    }
    hosts.sort();
    (hosts, hosts_map)
}
