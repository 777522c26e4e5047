//! StateStore — redb-backed metadata persistence for quay.
//!
//! Provides typed CRUD and aggregation operations over apps, containers,
//! pools, plans, platforms, service instances, logs and deploys. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! The store is the only durable shared state of the platform and is
//! authoritative; in-memory `App` structs held by callers are snapshots.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use quay_core::types::*;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Maximum number of retained log entries per app (capped collection).
const LOG_CAP: usize = 5000;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe metadata store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "metadata store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory metadata store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(APPS).map_err(map_err!(Table))?;
        txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(PLANS).map_err(map_err!(Table))?;
        txn.open_table(PLATFORMS).map_err(map_err!(Table))?;
        txn.open_table(SERVICE_INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(LOGS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic document helpers ───────────────────────────────────

    fn put<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        doc: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let doc = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Collect all documents in a table that satisfy `keep`.
    fn scan<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        mut keep: impl FnMut(&str, &T) -> bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let doc: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(key.value(), &doc) {
                results.push(doc);
            }
        }
        Ok(results)
    }

    /// Insert a document only if its key is not yet taken.
    fn insert_unique<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        doc: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key.to_string()));
            }
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Apps ───────────────────────────────────────────────────────

    /// Insert a new app document. Fails if the name is taken.
    pub fn insert_app(&self, app: &App) -> StateResult<()> {
        self.insert_unique(APPS, &app.name, app)?;
        debug!(app = %app.name, "app document inserted");
        Ok(())
    }

    /// Get an app by name.
    pub fn app(&self, name: &str) -> StateResult<Option<App>> {
        self.get(APPS, name)
    }

    /// Insert or replace an app document.
    pub fn save_app(&self, app: &App) -> StateResult<()> {
        self.put(APPS, &app.name, app)
    }

    /// Delete an app document. Returns true if it existed.
    pub fn delete_app(&self, name: &str) -> StateResult<bool> {
        let existed = self.remove(APPS, name)?;
        debug!(app = name, existed, "app document deleted");
        Ok(existed)
    }

    /// List apps matching the filter.
    pub fn list_apps(&self, filter: &AppFilter) -> StateResult<Vec<App>> {
        self.scan(APPS, |_, app: &App| filter.matches(app))
    }

    /// Apply `mutate` to the stored app document in one write transaction.
    /// Returns false when the document does not exist.
    fn update_app(&self, name: &str, mutate: impl FnOnce(&mut App)) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            let current = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    let app: App =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(app)
                }
                None => None,
            };
            match current {
                Some(mut app) => {
                    mutate(&mut app);
                    let value = serde_json::to_vec(&app).map_err(map_err!(Serialize))?;
                    table.insert(name, value.as_slice()).map_err(map_err!(Write))?;
                    found = true;
                }
                None => found = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    /// Replace the app's env map.
    pub fn update_app_env(&self, name: &str, env: &std::collections::HashMap<String, EnvVar>) -> StateResult<()> {
        let env = env.clone();
        if !self.update_app(name, |app| app.env = env)? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Set the app's quota usage.
    pub fn set_app_quota_in_use(&self, name: &str, in_use: u64) -> StateResult<()> {
        if !self.update_app(name, |app| app.quota.in_use = in_use)? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Append a CNAME to the app document.
    pub fn push_cname(&self, name: &str, cname: &str) -> StateResult<()> {
        let cname = cname.to_string();
        if !self.update_app(name, |app| app.cname.push(cname))? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Remove a CNAME from the app document.
    pub fn pull_cname(&self, name: &str, cname: &str) -> StateResult<()> {
        let cname = cname.to_string();
        if !self.update_app(name, |app| app.cname.retain(|c| *c != cname))? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Set the app's pool.
    pub fn set_app_pool(&self, name: &str, pool: &str) -> StateResult<()> {
        let pool = pool.to_string();
        if !self.update_app(name, |app| app.pool = pool)? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Set the app's public address.
    pub fn set_app_ip(&self, name: &str, ip: &str) -> StateResult<()> {
        let ip = ip.to_string();
        if !self.update_app(name, |app| app.ip = ip)? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Set the update-platform flag.
    pub fn set_update_platform(&self, name: &str, value: bool) -> StateResult<()> {
        if !self.update_app(name, |app| app.update_platform = value)? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Conditionally acquire the app lock: the update applies iff the
    /// document exists and its lock is currently not held. Returns true
    /// on acquisition, false when the document is missing or the lock is
    /// held by someone else.
    pub fn try_acquire_app_lock(&self, name: &str, lock: &AppLock) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let acquired;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            let current = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    let app: App =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(app)
                }
                None => None,
            };
            match current {
                Some(mut app) if !app.lock.locked => {
                    app.lock = lock.clone();
                    let value = serde_json::to_vec(&app).map_err(map_err!(Serialize))?;
                    table.insert(name, value.as_slice()).map_err(map_err!(Write))?;
                    acquired = true;
                }
                _ => acquired = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(acquired)
    }

    /// Unconditionally zero the app lock. Missing documents are ignored.
    pub fn release_app_lock(&self, name: &str) -> StateResult<()> {
        self.update_app(name, |app| app.lock = AppLock::default())?;
        Ok(())
    }

    /// Add a team to the app's access list (idempotent).
    pub fn grant_team(&self, name: &str, team: &str) -> StateResult<()> {
        let team = team.to_string();
        if !self.update_app(name, |app| {
            if !app.teams.contains(&team) {
                app.teams.push(team);
            }
        })? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Remove a team from the app's access list.
    pub fn revoke_team(&self, name: &str, team: &str) -> StateResult<()> {
        if !self.update_app(name, |app| app.teams.retain(|t| t != team))? {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Whether any app declares the given CNAME.
    pub fn cname_in_use(&self, cname: &str) -> StateResult<bool> {
        let matches = self.scan(APPS, |_, app: &App| app.cname.iter().any(|c| c == cname))?;
        Ok(!matches.is_empty())
    }

    // ── Containers ─────────────────────────────────────────────────

    /// Insert a new container record. Fails if the id is taken.
    pub fn insert_container(&self, container: &ContainerInfo) -> StateResult<()> {
        self.insert_unique(CONTAINERS, &container.id, container)
    }

    /// Get a container by id.
    pub fn container(&self, id: &str) -> StateResult<Option<ContainerInfo>> {
        self.get(CONTAINERS, id)
    }

    /// Delete a container by id. Returns true if it existed.
    pub fn delete_container(&self, id: &str) -> StateResult<bool> {
        self.remove(CONTAINERS, id)
    }

    /// All containers of an app.
    pub fn containers_for_app(&self, app_name: &str) -> StateResult<Vec<ContainerInfo>> {
        self.scan(CONTAINERS, |_, c: &ContainerInfo| c.app_name == app_name)
    }

    /// Delete all containers of an app. Returns number deleted.
    pub fn delete_containers_for_app(&self, app_name: &str) -> StateResult<u32> {
        let ids: Vec<String> = self
            .containers_for_app(app_name)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            for id in &ids {
                table.remove(id.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(ids.len() as u32)
    }

    /// All containers placed on a host.
    pub fn containers_on_host(&self, host: &str) -> StateResult<Vec<ContainerInfo>> {
        self.scan(CONTAINERS, |_, c: &ContainerInfo| c.host_addr == host)
    }

    /// Persist the chosen host into the container identified by name.
    /// Returns false when no container carries that name.
    pub fn set_container_host_by_name(&self, name: &str, host: &str) -> StateResult<bool> {
        let ids: Vec<String> = self
            .scan(CONTAINERS, |_, c: &ContainerInfo| c.name == name)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let Some(id) = ids.first() else {
            return Ok(false);
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let mut container: ContainerInfo = match table.get(id.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Ok(false),
            };
            container.host_addr = host.to_string();
            let value = serde_json::to_vec(&container).map_err(map_err!(Serialize))?;
            table
                .insert(id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    /// Count containers per host for the given (app, process) tuple.
    /// Hosts with no matching containers are omitted from the result.
    pub fn aggregate_containers_by_host_app_process(
        &self,
        hosts: &[String],
        app_name: &str,
        process_name: &str,
    ) -> StateResult<std::collections::HashMap<String, usize>> {
        let matching = self.scan(CONTAINERS, |_, c: &ContainerInfo| {
            c.app_name == app_name
                && c.process_name == process_name
                && hosts.contains(&c.host_addr)
        })?;
        let mut counts = std::collections::HashMap::new();
        for container in matching {
            *counts.entry(container.host_addr).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Count all containers per host, regardless of app or process.
    pub fn aggregate_containers_by_host(
        &self,
        hosts: &[String],
    ) -> StateResult<std::collections::HashMap<String, usize>> {
        let matching =
            self.scan(CONTAINERS, |_, c: &ContainerInfo| hosts.contains(&c.host_addr))?;
        let mut counts = std::collections::HashMap::new();
        for container in matching {
            *counts.entry(container.host_addr).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// First container (id order) on the host matching (app, process).
    pub fn container_on_host(
        &self,
        host: &str,
        app_name: &str,
        process_name: &str,
    ) -> StateResult<Option<ContainerInfo>> {
        let matches = self.scan(CONTAINERS, |_, c: &ContainerInfo| {
            c.host_addr == host && c.app_name == app_name && c.process_name == process_name
        })?;
        Ok(matches.into_iter().next())
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Add a pool. Fails when the name is taken or a second default
    /// pool would be introduced.
    pub fn add_pool(&self, pool: &Pool) -> StateResult<()> {
        if pool.is_default && self.default_pool()?.is_some() {
            return Err(StateError::AlreadyExists(
                "a default pool already exists".to_string(),
            ));
        }
        self.insert_unique(POOLS, &pool.name, pool)
    }

    /// Get a pool by name.
    pub fn pool(&self, name: &str) -> StateResult<Option<Pool>> {
        self.get(POOLS, name)
    }

    /// Remove a pool. Returns true if it existed.
    pub fn remove_pool(&self, name: &str) -> StateResult<bool> {
        self.remove(POOLS, name)
    }

    /// All pools.
    pub fn list_pools(&self) -> StateResult<Vec<Pool>> {
        self.scan(POOLS, |_, _: &Pool| true)
    }

    /// Pools whose team set contains the given team.
    pub fn pools_for_team(&self, team: &str) -> StateResult<Vec<Pool>> {
        self.scan(POOLS, |_, p: &Pool| p.teams.iter().any(|t| t == team))
    }

    /// The pool flagged as default, if any.
    pub fn default_pool(&self) -> StateResult<Option<Pool>> {
        let defaults = self.scan(POOLS, |_, p: &Pool| p.is_default)?;
        Ok(defaults.into_iter().next())
    }

    /// Add teams to a pool's team set (idempotent per team).
    pub fn add_teams_to_pool(&self, name: &str, teams: &[&str]) -> StateResult<()> {
        let mut pool = self
            .pool(name)?
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;
        for team in teams {
            if !pool.teams.iter().any(|t| t == team) {
                pool.teams.push(team.to_string());
            }
        }
        self.put(POOLS, name, &pool)
    }

    /// Remove teams from a pool's team set.
    pub fn remove_teams_from_pool(&self, name: &str, teams: &[&str]) -> StateResult<()> {
        let mut pool = self
            .pool(name)?
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;
        pool.teams.retain(|t| !teams.contains(&t.as_str()));
        self.put(POOLS, name, &pool)
    }

    // ── Plans ──────────────────────────────────────────────────────

    /// Add a plan. Fails if the name is taken.
    pub fn add_plan(&self, plan: &Plan) -> StateResult<()> {
        self.insert_unique(PLANS, &plan.name, plan)
    }

    /// Get a plan by name.
    pub fn plan(&self, name: &str) -> StateResult<Option<Plan>> {
        self.get(PLANS, name)
    }

    /// Remove a plan. Returns true if it existed.
    pub fn remove_plan(&self, name: &str) -> StateResult<bool> {
        self.remove(PLANS, name)
    }

    /// All plans.
    pub fn list_plans(&self) -> StateResult<Vec<Plan>> {
        self.scan(PLANS, |_, _: &Plan| true)
    }

    /// The plan flagged as default, if any.
    pub fn default_plan(&self) -> StateResult<Option<Plan>> {
        let defaults = self.scan(PLANS, |_, p: &Plan| p.is_default)?;
        Ok(defaults.into_iter().next())
    }

    // ── Platforms ──────────────────────────────────────────────────

    /// Insert or replace a platform.
    pub fn save_platform(&self, platform: &Platform) -> StateResult<()> {
        self.put(PLATFORMS, &platform.name, platform)
    }

    /// Get a platform by name.
    pub fn platform(&self, name: &str) -> StateResult<Option<Platform>> {
        self.get(PLATFORMS, name)
    }

    // ── Service instances ──────────────────────────────────────────

    /// Insert or replace a service instance record.
    pub fn save_service_instance(&self, instance: &ServiceInstance) -> StateResult<()> {
        let key = format!("{}/{}", instance.service_name, instance.name);
        self.put(SERVICE_INSTANCES, &key, instance)
    }

    /// Remove a service instance record. Returns true if it existed.
    pub fn remove_service_instance(&self, service: &str, name: &str) -> StateResult<bool> {
        self.remove(SERVICE_INSTANCES, &format!("{service}/{name}"))
    }

    /// Service instances bound to the given app.
    pub fn service_instances_for_app(&self, app_name: &str) -> StateResult<Vec<ServiceInstance>> {
        self.scan(SERVICE_INSTANCES, |_, si: &ServiceInstance| {
            si.apps.iter().any(|a| a == app_name)
        })
    }

    // ── Logs ───────────────────────────────────────────────────────

    /// Append log entries for an app, trimming the oldest entries past
    /// the per-app cap.
    pub fn append_logs(&self, app_name: &str, entries: &[AppLog]) -> StateResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let prefix = format!("{app_name}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOGS).map_err(map_err!(Table))?;
            let mut keys: Vec<String> = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                let k = key.value().to_string();
                if k.starts_with(&prefix) {
                    keys.push(k);
                }
            }
            let mut next_seq = keys
                .last()
                .and_then(|k| k[prefix.len()..].parse::<u64>().ok())
                .map(|s| s + 1)
                .unwrap_or(0);
            for log in entries {
                let key = format!("{prefix}{next_seq:020}");
                let value = serde_json::to_vec(log).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                keys.push(key);
                next_seq += 1;
            }
            if keys.len() > LOG_CAP {
                for key in keys.iter().take(keys.len() - LOG_CAP) {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Last `lines` log entries of an app in chronological order,
    /// optionally filtered by source and unit.
    pub fn last_logs(
        &self,
        app_name: &str,
        lines: usize,
        source: &str,
        unit: &str,
    ) -> StateResult<Vec<AppLog>> {
        let prefix = format!("{app_name}:");
        let mut logs = self.scan(LOGS, |key, log: &AppLog| {
            key.starts_with(&prefix)
                && (source.is_empty() || log.source == source)
                && (unit.is_empty() || log.unit == unit)
        })?;
        if logs.len() > lines {
            logs.drain(..logs.len() - lines);
        }
        Ok(logs)
    }

    /// Drop all log entries of an app. Returns number removed.
    pub fn drop_logs(&self, app_name: &str) -> StateResult<u32> {
        let prefix = format!("{app_name}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(LOGS).map_err(map_err!(Table))?;
            let keys: Vec<String> = table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect();
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
                count += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Deploys ────────────────────────────────────────────────────

    /// Record a deploy of an app.
    pub fn record_deploy(&self, deploy: &DeployRecord) -> StateResult<()> {
        let key = format!("{}:{}", deploy.app_name, deploy.id);
        self.put(DEPLOYS, &key, deploy)
    }

    /// All deploy records of an app.
    pub fn deploys_for_app(&self, app_name: &str) -> StateResult<Vec<DeployRecord>> {
        self.scan(DEPLOYS, |_, d: &DeployRecord| d.app_name == app_name)
    }

    /// Flag every deploy record of the app as removed. Returns number
    /// updated.
    pub fn mark_deploys_removed(&self, app_name: &str) -> StateResult<u32> {
        let deploys = self.deploys_for_app(app_name)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(DEPLOYS).map_err(map_err!(Table))?;
            for mut deploy in deploys {
                deploy.removed = true;
                let key = format!("{}:{}", deploy.app_name, deploy.id);
                let value = serde_json::to_vec(&deploy).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                count += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
