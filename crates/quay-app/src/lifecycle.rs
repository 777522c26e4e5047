//! Lifecycle coordinator — orchestrates app operations.
//!
//! The `AppService` turns application intents (create, change plan,
//! scale, delete, swap, access control, env changes) into pipelines and
//! collaborator calls. Every mutating operation on an existing app takes
//! the app lock first, so placement decisions are atomic with respect to
//! membership changes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{error, info, warn};

use quay_core::cluster::ClusterView;
use quay_core::types::*;
use quay_core::validate::{valid_app_name, valid_cname};
use quay_scheduler::SegregatedScheduler;
use quay_state::{epoch_secs, StateStore};

use crate::action::{Pipeline, PipelineCtx};
use crate::actions::{
    create_app_pipeline, change_plan_pipeline, add_units_pipeline,
};
use crate::auth::AuthScheme;
use crate::driver::ContainerDriver;
use crate::error::{AppError, AppResult};
use crate::lock::{acquire_app_lock_wait, release_app_lock};
use crate::repository::RepositoryManager;
use crate::router::RouterRegistry;

/// How long lifecycle operations wait for a held app lock.
const LOCK_WAIT: Duration = Duration::from_secs(10);

/// The lifecycle coordinator.
///
/// Collaborators are injected; the coordinator holds no state of its own
/// beyond them, so it is cheap to share behind an `Arc`.
pub struct AppService {
    pub(crate) store: StateStore,
    pub(crate) driver: Arc<dyn ContainerDriver>,
    pub(crate) routers: RouterRegistry,
    pub(crate) repository: Arc<dyn RepositoryManager>,
    pub(crate) auth: Arc<dyn AuthScheme>,
    pub(crate) scheduler: Arc<SegregatedScheduler>,
    pub(crate) cluster: Arc<RwLock<ClusterView>>,
}

/// Releases the app lock when the operation's scope ends.
pub(crate) struct LockGuard {
    store: StateStore,
    app_name: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        release_app_lock(&self.store, &self.app_name);
    }
}

/// Per-unit input for [`AppService::update_units_status`].
#[derive(Debug, Clone)]
pub struct UpdateUnitsData {
    pub id: String,
    pub name: String,
    pub status: UnitStatus,
}

/// Per-unit outcome of [`AppService::update_units_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateUnitsResult {
    pub id: String,
    pub found: bool,
}

impl AppService {
    pub fn new(
        store: StateStore,
        driver: Arc<dyn ContainerDriver>,
        routers: RouterRegistry,
        repository: Arc<dyn RepositoryManager>,
        auth: Arc<dyn AuthScheme>,
        scheduler: Arc<SegregatedScheduler>,
        cluster: Arc<RwLock<ClusterView>>,
    ) -> Self {
        Self {
            store,
            driver,
            routers,
            repository,
            auth,
            scheduler,
            cluster,
        }
    }

    /// Fetch an app by name, failing when it does not exist.
    pub fn app(&self, name: &str) -> AppResult<App> {
        self.store.app(name)?.ok_or(AppError::AppNotFound)
    }

    /// Take the app lock for an operation, waiting up to the standard
    /// timeout. The returned guard releases on drop.
    pub(crate) async fn lock_app(&self, app_name: &str, reason: &str) -> AppResult<LockGuard> {
        let acquired = acquire_app_lock_wait(
            &self.store,
            app_name,
            INTERNAL_APP_NAME,
            reason,
            LOCK_WAIT,
        )
        .await?;
        if acquired {
            return Ok(LockGuard {
                store: self.store.clone(),
                app_name: app_name.to_string(),
            });
        }
        match self.store.app(app_name)? {
            Some(app) => Err(AppError::Locked {
                app: app_name.to_string(),
                holder: app.lock.to_string(),
            }),
            None => Err(AppError::AppNotFound),
        }
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Create a new app for the given user.
    ///
    /// Validates the request, resolves plan and pool, then runs the
    /// create pipeline: reserve user quota, insert the document, export
    /// base env vars, create the git repository, provision the router
    /// backend and record the app address. On any step failure the
    /// completed steps are compensated and the error is wrapped.
    pub fn create_app(&self, app: &mut App, user: &User) -> AppResult<()> {
        if user.teams.is_empty() {
            return Err(AppError::NoTeams);
        }
        let platform = self
            .store
            .platform(&app.platform)?
            .ok_or_else(|| AppError::PlatformNotFound(app.platform.clone()))?;
        if platform.disabled && !user.admin {
            return Err(AppError::DisabledPlatform);
        }
        let plan = if app.plan.name.is_empty() {
            self.store.default_plan()?.ok_or(AppError::NoDefaultPlan)?
        } else {
            self.store
                .plan(&app.plan.name)?
                .ok_or_else(|| AppError::PlanNotFound(app.plan.name.clone()))?
        };
        if app.team_owner.is_empty() {
            if user.teams.len() > 1 {
                return Err(AppError::ManyTeams);
            }
            app.team_owner = user.teams[0].clone();
        }
        self.validate_team_owner(app, user)?;
        app.plan = plan;
        self.set_pool(app)?;
        app.teams = vec![app.team_owner.clone()];
        app.owner = user.email.clone();
        if !valid_app_name(&app.name) {
            return Err(AppError::InvalidName);
        }

        let mut ctx = PipelineCtx::new(self, app.clone());
        ctx.user = user.clone();
        let pipeline = Pipeline::new(create_app_pipeline());
        if let Err(err) = pipeline.execute(&mut ctx) {
            return Err(AppError::AppCreation {
                app: app.name.clone(),
                source: Box::new(err),
            });
        }
        *app = ctx.app;
        info!(app = %app.name, owner = %app.owner, pool = %app.pool, "app created");
        Ok(())
    }

    fn validate_team_owner(&self, app: &App, user: &User) -> AppResult<()> {
        if user.admin || user.teams.iter().any(|t| *t == app.team_owner) {
            return Ok(());
        }
        Err(AppError::InvalidTeamOwner(app.team_owner.clone()))
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Resolve the pool an app may use. Returns the empty string when
    /// the app names no pool and its team owner has no pool; the
    /// default-pool fallback is the caller's concern.
    fn pool_for_app(&self, app: &App, pool_name: &str) -> AppResult<String> {
        let pools = if pool_name.is_empty() {
            self.store.pools_for_team(&app.team_owner)?
        } else {
            self.store.pool(pool_name)?.into_iter().collect()
        };
        if pools.len() > 1 {
            return Err(AppError::ManyPools);
        }
        let Some(pool) = pools.first() else {
            if pool_name.is_empty() {
                return Ok(String::new());
            }
            return Err(AppError::PoolNotFound);
        };
        let member = pool.teams.iter().any(|t| *t == app.team_owner);
        if !pool.public && !member {
            return Err(AppError::PoolAccessDenied(pool.name.clone()));
        }
        Ok(pool.name.clone())
    }

    /// Pick the app's pool: its declared pool, a team pool, or the
    /// default pool.
    fn set_pool(&self, app: &mut App) -> AppResult<()> {
        let mut pool = self.pool_for_app(app, &app.pool.clone())?;
        if pool.is_empty() {
            pool = self
                .store
                .default_pool()?
                .ok_or(AppError::NoDefaultPool)?
                .name;
        }
        app.pool = pool;
        Ok(())
    }

    /// Move the app to another pool.
    pub fn change_pool(&self, app_name: &str, new_pool: &str) -> AppResult<()> {
        let app = self.app(app_name)?;
        let pool = self.pool_for_app(&app, new_pool)?;
        if pool.is_empty() {
            return Err(AppError::PoolNotFound);
        }
        self.store.set_app_pool(app_name, &pool)?;
        Ok(())
    }

    // ── Plan changes ───────────────────────────────────────────────

    /// Swap the app onto a new plan.
    ///
    /// A router change implies moving all unit routes from the old
    /// backend to the new one and then removing the old backend.
    pub async fn change_plan(&self, app_name: &str, plan_name: &str) -> AppResult<()> {
        let _guard = self.lock_app(app_name, "change-plan").await?;
        let mut app = self.app(app_name)?;
        let plan = self
            .store
            .plan(plan_name)?
            .ok_or_else(|| AppError::PlanNotFound(plan_name.to_string()))?;
        let old_plan = std::mem::replace(&mut app.plan, plan);

        let mut ctx = PipelineCtx::new(self, app);
        ctx.old_plan = Some(old_plan);
        Pipeline::new(change_plan_pipeline()).execute(&mut ctx)?;
        info!(app = app_name, plan = plan_name, "plan changed");
        Ok(())
    }

    // ── Unit scale ─────────────────────────────────────────────────

    /// Add `n` units of the given process: reserve quota, then place and
    /// register one container per unit.
    pub async fn add_units(&self, app_name: &str, n: u32, process: &str) -> AppResult<()> {
        if n == 0 {
            return Err(AppError::ZeroUnits);
        }
        let _guard = self.lock_app(app_name, "add-units").await?;
        let app = self.app(app_name)?;

        let mut ctx = PipelineCtx::new(self, app);
        ctx.units = n;
        ctx.process = process.to_string();
        Pipeline::new(add_units_pipeline()).execute(&mut ctx)?;
        info!(app = app_name, units = n, process, "units added");
        Ok(())
    }

    /// Remove `n` units of the given process via the driver, then settle
    /// quota usage on the unit count the driver reports.
    ///
    /// The driver decides which units die; the container registry is
    /// reconciled afterwards against the surviving units, so scheduler
    /// aggregations keep matching what actually runs.
    pub async fn remove_units(&self, app_name: &str, n: u32, process: &str) -> AppResult<()> {
        let _guard = self.lock_app(app_name, "remove-units").await?;
        let app = self.app(app_name)?;

        self.driver.remove_units(&app, n, process)?;

        let units = self.driver.units(&app)?;
        let surviving: std::collections::HashSet<&str> =
            units.iter().map(|u| u.id.as_str()).collect();
        for container in self.store.containers_for_app(app_name)? {
            if !surviving.contains(container.id.as_str()) {
                self.store.delete_container(&container.id)?;
            }
        }
        self.store.set_app_quota_in_use(app_name, units.len() as u64)?;
        info!(app = app_name, units = n, process, "units removed");
        Ok(())
    }

    /// Generate a fresh container id for a new unit of (app, process).
    pub(crate) fn next_container_id(&self, app_name: &str, process: &str) -> AppResult<String> {
        let mut n = self.store.containers_for_app(app_name)?.len();
        loop {
            let id = format!("{app_name}-{process}-{n}");
            if self.store.container(&id)?.is_none() {
                return Ok(id);
            }
            n += 1;
        }
    }

    // ── Deletion ───────────────────────────────────────────────────

    /// Delete an app. Refuses while the app is part of a router swap;
    /// afterwards tears everything down best-effort, logging each
    /// failure and reporting a summary instead of stopping.
    pub async fn delete(&self, app_name: &str) -> AppResult<()> {
        let _guard = self.lock_app(app_name, "delete-app").await?;
        let app = self.app(app_name)?;
        let router = self.routers.get(&app.plan.router)?;
        let (swapped, swapped_with) = router.is_swapped(app_name)?;
        if swapped {
            return Err(AppError::AppSwapped(swapped_with));
        }

        let mut has_errors = false;
        let mut log_err = |stage: &str, err: String| {
            error!(app = app_name, stage, error = %err, "delete stage failed");
            has_errors = true;
        };

        if let Err(err) = self.driver.destroy(&app) {
            log_err("destroy containers", err.to_string());
        }
        if let Err(err) = self.store.delete_containers_for_app(app_name) {
            log_err("delete container records", err.to_string());
        }
        if let Err(err) = self.unbind_all(&app) {
            log_err("unbind service instances", err);
        }
        match router.remove_backend(app_name) {
            Ok(()) | Err(crate::router::RouterError::BackendNotFound) => {}
            Err(err) => log_err("remove router backend", err.to_string()),
        }
        if let Err(err) = self.repository.remove_repository(app_name) {
            log_err("remove repository", err.to_string());
        }
        if let Some(token) = app.env.get(APP_TOKEN_ENV_VAR) {
            if let Err(err) = self.auth.app_logout(&token.value) {
                log_err("revoke app token", err.to_string());
            }
        }
        if let Err(err) = self.auth.release_app(&app.owner) {
            log_err("release user quota", err.to_string());
        }
        if let Err(err) = self.store.drop_logs(app_name) {
            log_err("drop log collection", err.to_string());
        }
        if let Err(err) = self.store.delete_app(app_name) {
            log_err("delete app document", err.to_string());
        }
        if let Err(err) = self.store.mark_deploys_removed(app_name) {
            log_err("mark deploys removed", err.to_string());
        }

        if has_errors {
            warn!(app = app_name, "some errors occurred during removal");
        }
        info!(app = app_name, "app removed");
        Ok(())
    }

    /// Remove the app from every service instance bound to it.
    fn unbind_all(&self, app: &App) -> Result<(), String> {
        let instances = self
            .store
            .service_instances_for_app(&app.name)
            .map_err(|e| e.to_string())?;
        let mut failures = Vec::new();
        for mut instance in instances {
            instance.apps.retain(|a| *a != app.name);
            if let Err(err) = self.store.save_service_instance(&instance) {
                failures.push(format!("{} ({err})", instance.name));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "failed to unbind the following instances: {}",
                failures.join(", ")
            ))
        }
    }

    // ── Swap ───────────────────────────────────────────────────────

    /// Swap the routable addresses of two apps, exchanging their CNAME
    /// lists and re-reading each address from the driver.
    pub async fn swap(&self, app1_name: &str, app2_name: &str) -> AppResult<()> {
        // Lock in name order so concurrent swaps cannot deadlock.
        let (first, second) = if app1_name <= app2_name {
            (app1_name, app2_name)
        } else {
            (app2_name, app1_name)
        };
        let _guard1 = self.lock_app(first, "swap").await?;
        let _guard2 = self.lock_app(second, "swap").await?;

        let mut app1 = self.app(app1_name)?;
        let mut app2 = self.app(app2_name)?;
        self.driver.swap(&app1, &app2)?;
        std::mem::swap(&mut app1.cname, &mut app2.cname);
        for app in [&mut app1, &mut app2] {
            app.ip = self.driver.addr(app)?;
            self.store.save_app(app)?;
        }
        info!(app1 = app1_name, app2 = app2_name, "apps swapped");
        Ok(())
    }

    // ── Access control ─────────────────────────────────────────────

    /// Grant a team access to the app, propagating repository access to
    /// the team's users. The team is pulled back out when repository
    /// propagation fails.
    pub fn grant(&self, app_name: &str, team: &Team) -> AppResult<()> {
        let app = self.app(app_name)?;
        if app.teams.iter().any(|t| *t == team.name) {
            return Err(AppError::AlreadyHaveAccess);
        }
        self.store.grant_team(app_name, &team.name)?;
        for user in &team.users {
            if let Err(err) = self.repository.grant_access(app_name, user) {
                if let Err(rollback_err) = self.store.revoke_team(app_name, &team.name) {
                    error!(
                        app = app_name,
                        team = %team.name,
                        error = %rollback_err,
                        "could not roll back team grant"
                    );
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Revoke a team's access. Refuses to orphan the app; repository
    /// access is revoked only for users not present in any remaining
    /// team (`remaining` carries the member lists of the teams that keep
    /// access).
    pub fn revoke(&self, app_name: &str, team: &Team, remaining: &[Team]) -> AppResult<()> {
        let app = self.app(app_name)?;
        if app.teams.len() == 1 {
            return Err(AppError::CannotOrphanApp);
        }
        if !app.teams.iter().any(|t| *t == team.name) {
            return Err(AppError::NoAccess);
        }
        self.store.revoke_team(app_name, &team.name)?;
        for user in &team.users {
            let still_covered = remaining.iter().any(|t| t.contains_user(user));
            if still_covered {
                continue;
            }
            if let Err(err) = self.repository.revoke_access(app_name, user) {
                if let Err(rollback_err) = self.store.grant_team(app_name, &team.name) {
                    error!(
                        app = app_name,
                        team = %team.name,
                        error = %rollback_err,
                        "could not roll back team revocation"
                    );
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Change the app's owning team. The new team is granted access if
    /// it does not have it yet.
    pub fn set_team_owner(&self, app_name: &str, team: &Team, user: &User) -> AppResult<()> {
        let mut app = self.app(app_name)?;
        app.team_owner = team.name.clone();
        self.validate_team_owner(&app, user)?;
        if !app.teams.iter().any(|t| *t == team.name) {
            app.teams.push(team.name.clone());
        }
        self.store.save_app(&app)?;
        Ok(())
    }

    // ── Environment ────────────────────────────────────────────────

    /// Set environment variables on the app, restarting it when units
    /// exist. With `public_only`, private variables bound to a service
    /// instance are not overwritten.
    pub fn set_envs(&self, app_name: &str, envs: Vec<EnvVar>, public_only: bool) -> AppResult<()> {
        let mut app = self.app(app_name)?;
        let should_restart = !self.driver.units(&app)?.is_empty();
        self.set_envs_to_app(&mut app, envs, public_only, should_restart)
    }

    pub(crate) fn set_envs_to_app(
        &self,
        app: &mut App,
        envs: Vec<EnvVar>,
        public_only: bool,
        should_restart: bool,
    ) -> AppResult<()> {
        if envs.is_empty() {
            return Ok(());
        }
        for env in envs {
            let overwrite_forbidden = public_only
                && app
                    .get_env(&env.name)
                    .is_some_and(|e| !e.public && !e.instance_name.is_empty());
            if !overwrite_forbidden {
                app.set_env(env);
            }
        }
        self.store.update_app_env(&app.name, &app.env)?;
        if should_restart {
            self.driver.restart(app, "")?;
        }
        Ok(())
    }

    /// Unset environment variables, restarting when units exist. With
    /// `public_only`, only public variables are removed.
    pub fn unset_envs(
        &self,
        app_name: &str,
        names: &[String],
        public_only: bool,
    ) -> AppResult<()> {
        let mut app = self.app(app_name)?;
        let should_restart = !self.driver.units(&app)?.is_empty();
        self.unset_envs_to_app(&mut app, names, public_only, should_restart)
    }

    pub(crate) fn unset_envs_to_app(
        &self,
        app: &mut App,
        names: &[String],
        public_only: bool,
        should_restart: bool,
    ) -> AppResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            let removable = !public_only || app.get_env(name).is_some_and(|e| e.public);
            if removable {
                app.env.remove(name);
            }
        }
        self.store.update_app_env(&app.name, &app.env)?;
        if should_restart {
            self.driver.restart(app, "")?;
        }
        Ok(())
    }

    // ── CNAMEs ─────────────────────────────────────────────────────

    /// Declare CNAMEs on the app. Each CNAME is validated, checked for
    /// duplicates across all apps, published through the driver's CNAME
    /// capability when advertised, and persisted.
    pub fn add_cname(&self, app_name: &str, cnames: &[&str]) -> AppResult<()> {
        let app = self.app(app_name)?;
        for cname in cnames {
            if !valid_cname(cname) {
                return Err(AppError::InvalidCname);
            }
            if self.store.cname_in_use(cname)? {
                return Err(AppError::CnameExists);
            }
            if let Some(manager) = self.driver.cname_manager() {
                manager.set_cname(&app, cname)?;
            }
            self.store.push_cname(app_name, cname)?;
        }
        Ok(())
    }

    /// Retire CNAMEs from the app.
    pub fn remove_cname(&self, app_name: &str, cnames: &[&str]) -> AppResult<()> {
        let app = self.app(app_name)?;
        for cname in cnames {
            if !app.cname.iter().any(|c| c == cname) {
                return Err(AppError::CnameNotFound);
            }
            if let Some(manager) = self.driver.cname_manager() {
                manager.unset_cname(&app, cname)?;
            }
            self.store.pull_cname(app_name, cname)?;
        }
        Ok(())
    }

    // ── Units and process control ──────────────────────────────────

    /// All units of the app, as reported by the driver.
    pub fn units(&self, app_name: &str) -> AppResult<Vec<Unit>> {
        let app = self.app(app_name)?;
        Ok(self.driver.units(&app)?)
    }

    /// Whether at least one unit is serving (or presumed serving).
    pub fn available(&self, app_name: &str) -> AppResult<bool> {
        Ok(self.units(app_name)?.iter().any(|u| u.available()))
    }

    /// Change the status of the unit whose id starts with `unit_name`.
    pub fn set_unit_status(
        &self,
        app_name: &str,
        unit_name: &str,
        status: UnitStatus,
    ) -> AppResult<()> {
        let units = self.units(app_name)?;
        for unit in &units {
            if unit.id.starts_with(unit_name) {
                self.driver.set_unit_status(unit, status)?;
                return Ok(());
            }
        }
        Err(AppError::UnitNotFound)
    }

    /// Bulk status update across apps, reporting which units were found.
    pub fn update_units_status(
        &self,
        units: &[UpdateUnitsData],
    ) -> AppResult<Vec<UpdateUnitsResult>> {
        let mut results = Vec::with_capacity(units.len());
        for data in units {
            let unit = Unit {
                id: data.id.clone(),
                name: data.name.clone(),
                app_name: String::new(),
                process_name: String::new(),
                address: String::new(),
                status: data.status,
            };
            match self.driver.set_unit_status(&unit, data.status) {
                Ok(()) => results.push(UpdateUnitsResult { id: data.id.clone(), found: true }),
                Err(crate::driver::DriverError::UnitNotFound) => {
                    results.push(UpdateUnitsResult { id: data.id.clone(), found: false });
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(results)
    }

    /// Register a unit with the driver, matching by id prefix.
    pub fn register_unit(
        &self,
        app_name: &str,
        unit_id: &str,
        custom_data: HashMap<String, String>,
    ) -> AppResult<()> {
        let units = self.units(app_name)?;
        for unit in &units {
            if unit.id.starts_with(unit_id) {
                self.driver.register_unit(unit, custom_data)?;
                return Ok(());
            }
        }
        Err(AppError::UnitNotFound)
    }

    /// Run a command on the app's units, sourcing the app environment
    /// first. `once` limits execution to a single unit.
    pub fn run_command(&self, app_name: &str, cmd: &str, once: bool) -> AppResult<String> {
        if !self.available(app_name)? {
            return Err(AppError::NotAvailable);
        }
        let app = self.app(app_name)?;
        self.log(app_name, &format!("running '{cmd}'"), "quay", "")?;
        let sourced = format!(
            "[ -f /home/application/apprc ] && source /home/application/apprc; \
             [ -d {dir} ] && cd {dir}; {cmd}",
            dir = DEFAULT_APP_DIR,
        );
        let output = if once {
            self.driver.execute_command_once(&app, &sourced, &[])?
        } else {
            self.driver.execute_command(&app, &sourced)?
        };
        Ok(output)
    }

    /// Restart the app's process (all processes when empty).
    pub async fn restart(&self, app_name: &str, process: &str) -> AppResult<()> {
        let _guard = self.lock_app(app_name, "restart").await?;
        let app = self.app(app_name)?;
        self.driver.restart(&app, process)?;
        Ok(())
    }

    /// Start the app's process.
    pub async fn start(&self, app_name: &str, process: &str) -> AppResult<()> {
        let _guard = self.lock_app(app_name, "start").await?;
        let app = self.app(app_name)?;
        self.driver.start(&app, process)?;
        Ok(())
    }

    /// Stop the app's process.
    pub async fn stop(&self, app_name: &str, process: &str) -> AppResult<()> {
        let _guard = self.lock_app(app_name, "stop").await?;
        let app = self.app(app_name)?;
        self.driver.stop(&app, process)?;
        Ok(())
    }

    // ── Misc document operations ───────────────────────────────────

    /// Environment variables the driver exposes for metric collection.
    pub fn metric_envs(&self, app_name: &str) -> AppResult<HashMap<String, String>> {
        let app = self.app(app_name)?;
        Ok(self.driver.metric_envs(&app))
    }

    /// Flag the app for a platform update on next deploy.
    pub fn set_update_platform(&self, app_name: &str, value: bool) -> AppResult<()> {
        self.store.set_update_platform(app_name, value)?;
        Ok(())
    }

    /// Set the app's quota usage directly.
    pub fn set_quota_in_use(&self, app_name: &str, in_use: u64) -> AppResult<()> {
        let app = self.app(app_name)?;
        if app.quota.is_unlimited() {
            return Err(AppError::UnlimitedQuota);
        }
        if in_use > app.quota.limit as u64 {
            return Err(AppError::QuotaUsageTooHigh(app.quota.limit));
        }
        self.store.set_app_quota_in_use(app_name, in_use)?;
        Ok(())
    }

    /// List apps visible to the user (admins and anonymous internal
    /// callers see everything), optionally filtered.
    pub fn list(&self, user: Option<&User>, filter: &AppFilter) -> AppResult<Vec<App>> {
        let mut apps = self.store.list_apps(filter)?;
        if let Some(user) = user {
            if !user.admin {
                apps.retain(|app| app.teams.iter().any(|t| user.teams.contains(t)));
            }
        }
        Ok(apps)
    }

    // ── Logs ───────────────────────────────────────────────────────

    /// Append a log message for the app, splitting multi-line input.
    pub fn log(&self, app_name: &str, message: &str, source: &str, unit: &str) -> AppResult<()> {
        let date = epoch_secs();
        let entries: Vec<AppLog> = message
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(|line| AppLog {
                date,
                message: line.to_string(),
                source: source.to_string(),
                app_name: app_name.to_string(),
                unit: unit.to_string(),
            })
            .collect();
        self.store.append_logs(app_name, &entries)?;
        Ok(())
    }

    /// The last `lines` log entries, optionally filtered by source and
    /// unit, in chronological order.
    pub fn last_logs(
        &self,
        app_name: &str,
        lines: usize,
        source: &str,
        unit: &str,
    ) -> AppResult<Vec<AppLog>> {
        Ok(self.store.last_logs(app_name, lines, source, unit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::auth::AuthScheme as _;
    use crate::fakes::{seed_app, test_service, test_service_with_driver, FakeDriver};
    use crate::repository::RepositoryManager as _;
    use crate::router::Router as _;

    fn test_user() -> User {
        User {
            email: "me@example.com".to_string(),
            teams: vec!["cobrateam".to_string()],
            admin: false,
        }
    }

    fn new_app(name: &str) -> App {
        App {
            name: name.to_string(),
            platform: "python".to_string(),
            ..Default::default()
        }
    }

    // ── Creation ───────────────────────────────────────────────────

    #[test]
    fn create_app_runs_the_full_pipeline() {
        let harness = test_service();
        let mut app = new_app("myapp");
        harness.svc.create_app(&mut app, &test_user()).unwrap();

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.teams, vec!["cobrateam".to_string()]);
        assert_eq!(stored.team_owner, "cobrateam");
        assert_eq!(stored.owner, "me@example.com");
        assert_eq!(stored.pool, "test-default");
        assert_eq!(stored.plan.name, "autogenerated");
        assert_eq!(stored.env["QUAY_APP_NAME"].value, "myapp");
        assert_eq!(stored.env[APP_TOKEN_ENV_VAR].value, "token-myapp");
        assert_eq!(stored.ip, "myapp.fake.quay.net");

        assert!(harness.repository.has_repo("myapp"));
        assert!(harness.repository.access_of("myapp").contains("me@example.com"));
        assert!(harness.router.has_backend("myapp"));
        assert_eq!(harness.auth.reserved_for("me@example.com"), 1);
        // The in-memory copy reflects the pipeline's updates.
        assert_eq!(app.ip, "myapp.fake.quay.net");
    }

    #[test]
    fn create_app_requires_a_team() {
        let harness = test_service();
        let user = User { email: "x@example.com".to_string(), ..Default::default() };
        let result = harness.svc.create_app(&mut new_app("myapp"), &user);
        assert!(matches!(result, Err(AppError::NoTeams)));
    }

    #[test]
    fn create_app_validates_name() {
        let harness = test_service();
        for bad in ["MyApp", "1app", INTERNAL_APP_NAME] {
            let result = harness.svc.create_app(&mut new_app(bad), &test_user());
            assert!(matches!(result, Err(AppError::InvalidName)), "{bad} accepted");
        }
    }

    #[test]
    fn create_app_rejects_unknown_platform() {
        let harness = test_service();
        let mut app = new_app("myapp");
        app.platform = "cobol".to_string();
        let result = harness.svc.create_app(&mut app, &test_user());
        assert!(matches!(result, Err(AppError::PlatformNotFound(_))));
    }

    #[test]
    fn create_app_reserves_disabled_platforms_to_admins() {
        let harness = test_service();
        let mut app = new_app("myapp");
        app.platform = "secret".to_string();
        let result = harness.svc.create_app(&mut app, &test_user());
        assert!(matches!(result, Err(AppError::DisabledPlatform)));

        let admin = User { admin: true, ..test_user() };
        let mut app = new_app("adminapp");
        app.platform = "secret".to_string();
        harness.svc.create_app(&mut app, &admin).unwrap();
    }

    #[test]
    fn create_app_needs_explicit_owner_with_many_teams() {
        let harness = test_service();
        let user = User {
            email: "me@example.com".to_string(),
            teams: vec!["cobrateam".to_string(), "pythonteam".to_string()],
            admin: false,
        };
        let result = harness.svc.create_app(&mut new_app("myapp"), &user);
        assert!(matches!(result, Err(AppError::ManyTeams)));

        let mut app = new_app("myapp");
        app.team_owner = "pythonteam".to_string();
        harness.svc.create_app(&mut app, &user).unwrap();
        assert_eq!(app.teams, vec!["pythonteam".to_string()]);
    }

    #[test]
    fn create_app_rejects_foreign_team_owner() {
        let harness = test_service();
        let mut app = new_app("myapp");
        app.team_owner = "someoneelse".to_string();
        let result = harness.svc.create_app(&mut app, &test_user());
        assert!(matches!(result, Err(AppError::InvalidTeamOwner(_))));
    }

    #[test]
    fn create_app_rejects_unknown_plan() {
        let harness = test_service();
        let mut app = new_app("myapp");
        app.plan.name = "gigantic".to_string();
        let result = harness.svc.create_app(&mut app, &test_user());
        assert!(matches!(result, Err(AppError::PlanNotFound(_))));
    }

    #[test]
    fn create_app_rolls_back_on_repository_failure() {
        let harness = test_service();
        *harness.repository.fail_create.lock().unwrap() = true;

        let result = harness.svc.create_app(&mut new_app("myapp"), &test_user());
        assert!(matches!(result, Err(AppError::AppCreation { .. })));

        // Every completed step was compensated.
        assert!(harness.store.app("myapp").unwrap().is_none());
        assert_eq!(harness.auth.reserved_for("me@example.com"), 0);
        assert!(harness.auth.logged_out.lock().unwrap().contains(&"token-myapp".to_string()));
        assert!(!harness.router.has_backend("myapp"));
    }

    #[test]
    fn create_app_rejects_duplicate_names() {
        let harness = test_service();
        seed_app(&harness, "myapp");

        let result = harness.svc.create_app(&mut new_app("myapp"), &test_user());
        assert!(matches!(result, Err(AppError::AppCreation { .. })));
        assert_eq!(harness.auth.reserved_for("me@example.com"), 0);
    }

    // ── Plan changes ───────────────────────────────────────────────

    #[tokio::test]
    async fn change_plan_persists_and_restarts() {
        let harness = test_service();
        seed_app(&harness, "myapp");

        harness.svc.change_plan("myapp", "large").await.unwrap();

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.plan.name, "large");
        assert_eq!(
            *harness.driver.restarts.lock().unwrap(),
            vec![("myapp".to_string(), String::new())]
        );
        assert!(!stored.lock.locked, "lock must be released after the operation");
    }

    #[tokio::test]
    async fn change_plan_rejects_unknown_plan() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        let result = harness.svc.change_plan("myapp", "gigantic").await;
        assert!(matches!(result, Err(AppError::PlanNotFound(_))));
    }

    #[tokio::test]
    async fn change_plan_moves_routes_to_the_new_router() {
        let harness = test_service();
        let app = seed_app(&harness, "myapp");
        harness.router.add_backend("myapp").unwrap();
        harness.router.add_route("myapp", "http://10.10.10.1:49153").unwrap();
        harness.driver.push_unit(
            "myapp",
            Unit {
                id: "myapp-web-0".to_string(),
                name: "myapp-web-0".to_string(),
                app_name: app.name.clone(),
                process_name: "web".to_string(),
                address: "http://10.10.10.1:49153".to_string(),
                status: UnitStatus::Started,
            },
        );

        harness.svc.change_plan("myapp", "large-fallback").await.unwrap();

        assert!(harness.fallback_router.has_backend("myapp"));
        assert_eq!(
            harness.fallback_router.routes_of("myapp"),
            vec!["http://10.10.10.1:49153".to_string()]
        );
        assert!(!harness.router.has_backend("myapp"), "old backend must be removed");
    }

    #[tokio::test]
    async fn change_plan_restores_old_plan_when_restart_fails() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.driver.fail("restart");

        let result = harness.svc.change_plan("myapp", "large-fallback").await;
        assert!(result.is_err());

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.plan.name, "autogenerated");
        assert!(!harness.fallback_router.has_backend("myapp"));
    }

    // ── Unit scale ─────────────────────────────────────────────────

    #[tokio::test]
    async fn add_units_places_containers_and_registers_units() {
        let harness = test_service();
        let mut app = seed_app(&harness, "myapp");
        app.set_env(EnvVar {
            name: "DATABASE_HOST".to_string(),
            value: "10.0.0.2".to_string(),
            public: false,
            instance_name: String::new(),
        });
        harness.store.save_app(&app).unwrap();

        harness.svc.add_units("myapp", 4, "web").await.unwrap();

        assert_eq!(harness.driver.unit_count("myapp"), 4);
        let containers = harness.store.containers_for_app("myapp").unwrap();
        assert_eq!(containers.len(), 4);
        assert!(containers.iter().all(|c| !c.host_addr.is_empty()));

        // Spread over the two seeded nodes.
        let hosts = vec!["10.10.10.1".to_string(), "10.10.10.2".to_string()];
        let counts = harness.store.aggregate_containers_by_host(&hosts).unwrap();
        assert_eq!(counts["10.10.10.1"], 2);
        assert_eq!(counts["10.10.10.2"], 2);

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.quota.in_use, 4);

        // Every registered unit carried the app environment.
        let registered = harness.driver.registered_data.lock().unwrap();
        assert_eq!(registered.len(), 4);
        for container in &containers {
            assert_eq!(
                registered[&container.id].get("DATABASE_HOST"),
                Some(&"10.0.0.2".to_string())
            );
        }
    }

    #[tokio::test]
    async fn add_units_rejects_zero() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        let result = harness.svc.add_units("myapp", 0, "web").await;
        assert!(matches!(result, Err(AppError::ZeroUnits)));
    }

    #[tokio::test]
    async fn add_units_enforces_quota() {
        let harness = test_service();
        let mut app = seed_app(&harness, "myapp");
        app.quota = Quota { limit: 2, in_use: 1 };
        harness.store.save_app(&app).unwrap();

        let result = harness.svc.add_units("myapp", 2, "web").await;
        assert!(matches!(
            result,
            Err(AppError::QuotaExceeded { requested: 2, available: 1 })
        ));
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.quota.in_use, 1);
        assert!(harness.store.containers_for_app("myapp").unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_units_rolls_back_on_register_failure() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.driver.fail("register_unit");

        let result = harness.svc.add_units("myapp", 2, "web").await;
        assert!(result.is_err());

        assert!(harness.store.containers_for_app("myapp").unwrap().is_empty());
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.quota.in_use, 0);
    }

    #[tokio::test]
    async fn remove_units_prunes_and_settles_quota() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.svc.add_units("myapp", 4, "web").await.unwrap();

        harness.svc.remove_units("myapp", 1, "web").await.unwrap();

        assert_eq!(harness.driver.unit_count("myapp"), 3);
        assert_eq!(harness.store.containers_for_app("myapp").unwrap().len(), 3);
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.quota.in_use, 3);
    }

    #[tokio::test]
    async fn remove_units_reconciles_records_with_surviving_units() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.svc.add_units("myapp", 3, "web").await.unwrap();

        // The driver picks the victims; whichever units it destroys,
        // the registry must end up mirroring the survivors exactly.
        harness.svc.remove_units("myapp", 2, "web").await.unwrap();

        let surviving: Vec<String> = harness
            .driver
            .units
            .lock()
            .unwrap()
            .get("myapp")
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|u| u.id)
            .collect();
        let records = harness.store.containers_for_app("myapp").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(surviving, vec![records[0].id.clone()]);
    }

    #[tokio::test]
    async fn remove_units_leaves_records_intact_when_the_driver_refuses() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.svc.add_units("myapp", 1, "web").await.unwrap();

        let result = harness.svc.remove_units("myapp", 3, "web").await;
        assert!(result.is_err());
        // Nothing was destroyed, so the registry must be untouched.
        assert_eq!(harness.store.containers_for_app("myapp").unwrap().len(), 1);
        assert_eq!(harness.driver.unit_count("myapp"), 1);
    }

    // ── Deletion ───────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_tears_everything_down() {
        let harness = test_service();
        let mut app = seed_app(&harness, "myapp");
        app.set_env(EnvVar {
            name: APP_TOKEN_ENV_VAR.to_string(),
            value: "token-myapp".to_string(),
            public: false,
            instance_name: String::new(),
        });
        harness.store.save_app(&app).unwrap();
        harness.svc.add_units("myapp", 2, "web").await.unwrap();
        harness.router.add_backend("myapp").unwrap();
        harness.repository.create_repository("myapp", &[]).unwrap();
        harness.auth.reserve_app("me@example.com").unwrap();
        harness
            .store
            .save_service_instance(&ServiceInstance {
                name: "mydb".to_string(),
                service_name: "mysql".to_string(),
                apps: vec!["myapp".to_string()],
                ..Default::default()
            })
            .unwrap();
        harness
            .store
            .record_deploy(&DeployRecord {
                id: "d1".to_string(),
                app_name: "myapp".to_string(),
                timestamp: 1,
                image: "v1".to_string(),
                removed: false,
            })
            .unwrap();
        harness.svc.log("myapp", "hello", "web", "").unwrap();

        harness.svc.delete("myapp").await.unwrap();

        assert!(harness.store.app("myapp").unwrap().is_none());
        assert!(harness.store.containers_for_app("myapp").unwrap().is_empty());
        assert!(harness.driver.destroyed.lock().unwrap().contains(&"myapp".to_string()));
        assert!(!harness.repository.has_repo("myapp"));
        assert!(!harness.router.has_backend("myapp"));
        assert!(harness.auth.logged_out.lock().unwrap().contains(&"token-myapp".to_string()));
        assert_eq!(harness.auth.reserved_for("me@example.com"), 0);
        let bound = harness.store.service_instances_for_app("myapp").unwrap();
        assert!(bound.is_empty());
        assert!(harness.store.deploys_for_app("myapp").unwrap()[0].removed);
        assert!(harness.store.last_logs("myapp", 10, "", "").unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_refuses_swapped_apps() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.router.set_swapped("myapp", "otherapp");

        let result = harness.svc.delete("myapp").await;
        assert!(matches!(result, Err(AppError::AppSwapped(other)) if other == "otherapp"));
        assert!(harness.store.app("myapp").unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_continues_past_collaborator_errors() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.driver.fail("destroy");

        harness.svc.delete("myapp").await.unwrap();
        assert!(harness.store.app("myapp").unwrap().is_none());
    }

    // ── Swap ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn swap_exchanges_cnames_and_refreshes_addresses() {
        let harness = test_service();
        let mut app1 = seed_app(&harness, "alpha");
        app1.cname = vec!["alpha.example.com".to_string()];
        harness.store.save_app(&app1).unwrap();
        let mut app2 = seed_app(&harness, "beta");
        app2.cname = vec!["beta.example.com".to_string()];
        harness.store.save_app(&app2).unwrap();

        harness.svc.swap("alpha", "beta").await.unwrap();

        let alpha = harness.store.app("alpha").unwrap().unwrap();
        let beta = harness.store.app("beta").unwrap().unwrap();
        assert_eq!(alpha.cname, vec!["beta.example.com".to_string()]);
        assert_eq!(beta.cname, vec!["alpha.example.com".to_string()]);
        assert_eq!(alpha.ip, "alpha.fake.quay.net");
        assert_eq!(beta.ip, "beta.fake.quay.net");
        assert_eq!(
            *harness.driver.swaps.lock().unwrap(),
            vec![("alpha".to_string(), "beta".to_string())]
        );
        assert!(!alpha.lock.locked);
        assert!(!beta.lock.locked);
    }

    // ── Access control ─────────────────────────────────────────────

    #[test]
    fn grant_adds_team_and_repo_access() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        let team = Team {
            name: "pluto".to_string(),
            users: vec!["them@example.com".to_string()],
        };

        harness.svc.grant("myapp", &team).unwrap();

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert!(stored.teams.contains(&"pluto".to_string()));
        assert!(harness.repository.access_of("myapp").contains("them@example.com"));

        let result = harness.svc.grant("myapp", &team);
        assert!(matches!(result, Err(AppError::AlreadyHaveAccess)));
    }

    #[test]
    fn grant_rolls_back_team_on_repo_failure() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness
            .repository
            .fail_grant_for
            .lock()
            .unwrap()
            .insert("them@example.com".to_string());
        let team = Team {
            name: "pluto".to_string(),
            users: vec!["them@example.com".to_string()],
        };

        let result = harness.svc.grant("myapp", &team);
        assert!(result.is_err());
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert!(!stored.teams.contains(&"pluto".to_string()));
    }

    #[test]
    fn revoke_refuses_to_orphan_the_app() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        let team = Team { name: "cobrateam".to_string(), users: vec![] };

        let result = harness.svc.revoke("myapp", &team, &[]);
        assert!(matches!(result, Err(AppError::CannotOrphanApp)));
    }

    #[test]
    fn revoke_requires_existing_access() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness
            .svc
            .grant("myapp", &Team { name: "pluto".to_string(), users: vec![] })
            .unwrap();

        let team = Team { name: "strangers".to_string(), users: vec![] };
        let result = harness.svc.revoke("myapp", &team, &[]);
        assert!(matches!(result, Err(AppError::NoAccess)));
    }

    #[test]
    fn revoke_keeps_repo_access_for_users_in_remaining_teams() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        let shared_user = "both@example.com".to_string();
        let solo_user = "solo@example.com".to_string();
        let pluto = Team {
            name: "pluto".to_string(),
            users: vec![shared_user.clone(), solo_user.clone()],
        };
        let cobrateam = Team {
            name: "cobrateam".to_string(),
            users: vec![shared_user.clone()],
        };
        harness.svc.grant("myapp", &pluto).unwrap();

        harness.svc.revoke("myapp", &pluto, &[cobrateam]).unwrap();

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.teams, vec!["cobrateam".to_string()]);
        let access = harness.repository.access_of("myapp");
        assert!(access.contains(&shared_user));
        assert!(!access.contains(&solo_user));
    }

    // ── Environment ────────────────────────────────────────────────

    fn env(name: &str, value: &str, public: bool, instance: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: value.to_string(),
            public,
            instance_name: instance.to_string(),
        }
    }

    #[test]
    fn set_envs_persists_and_restarts_with_units() {
        let harness = test_service();
        let app = seed_app(&harness, "myapp");
        harness.driver.push_unit(
            "myapp",
            Unit {
                id: "u1".to_string(),
                name: "u1".to_string(),
                app_name: app.name.clone(),
                process_name: "web".to_string(),
                address: "http://10.0.0.1:80".to_string(),
                status: UnitStatus::Started,
            },
        );

        harness
            .svc
            .set_envs("myapp", vec![env("DEBUG", "1", true, "")], false)
            .unwrap();

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.env["DEBUG"].value, "1");
        assert_eq!(harness.driver.restarts.lock().unwrap().len(), 1);
    }

    #[test]
    fn set_envs_without_units_skips_restart() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness
            .svc
            .set_envs("myapp", vec![env("DEBUG", "1", true, "")], false)
            .unwrap();
        assert!(harness.driver.restarts.lock().unwrap().is_empty());
    }

    #[test]
    fn set_envs_public_only_protects_instance_bound_private_vars() {
        let harness = test_service();
        let mut app = seed_app(&harness, "myapp");
        app.set_env(env("DATABASE_HOST", "10.0.0.2", false, "mydb"));
        harness.store.save_app(&app).unwrap();

        harness
            .svc
            .set_envs("myapp", vec![env("DATABASE_HOST", "attacker", true, "")], true)
            .unwrap();
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.env["DATABASE_HOST"].value, "10.0.0.2");

        // Without public_only the overwrite goes through.
        harness
            .svc
            .set_envs("myapp", vec![env("DATABASE_HOST", "new-host", false, "mydb")], false)
            .unwrap();
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.env["DATABASE_HOST"].value, "new-host");
    }

    #[test]
    fn unset_envs_public_only_keeps_private_vars() {
        let harness = test_service();
        let mut app = seed_app(&harness, "myapp");
        app.set_env(env("PUBLIC_VAR", "1", true, ""));
        app.set_env(env("PRIVATE_VAR", "2", false, ""));
        harness.store.save_app(&app).unwrap();

        harness
            .svc
            .unset_envs(
                "myapp",
                &["PUBLIC_VAR".to_string(), "PRIVATE_VAR".to_string()],
                true,
            )
            .unwrap();

        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert!(!stored.env.contains_key("PUBLIC_VAR"));
        assert!(stored.env.contains_key("PRIVATE_VAR"));
    }

    // ── CNAMEs ─────────────────────────────────────────────────────

    #[test]
    fn add_cname_validates_and_detects_duplicates() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        seed_app(&harness, "otherapp");

        harness.svc.add_cname("myapp", &["ktulu.example.com"]).unwrap();
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert_eq!(stored.cname, vec!["ktulu.example.com".to_string()]);

        let result = harness.svc.add_cname("otherapp", &["ktulu.example.com"]);
        assert!(matches!(result, Err(AppError::CnameExists)));

        let result = harness.svc.add_cname("myapp", &["not valid"]);
        assert!(matches!(result, Err(AppError::InvalidCname)));
    }

    #[test]
    fn cname_capability_is_used_when_advertised() {
        let driver = Arc::new(FakeDriver { cname_enabled: true, ..Default::default() });
        let harness = test_service_with_driver(driver);
        seed_app(&harness, "myapp");

        harness.svc.add_cname("myapp", &["ktulu.example.com"]).unwrap();
        assert_eq!(
            *harness.driver.cnames.lock().unwrap(),
            vec![("myapp".to_string(), "ktulu.example.com".to_string())]
        );

        harness.svc.remove_cname("myapp", &["ktulu.example.com"]).unwrap();
        assert!(harness.driver.cnames.lock().unwrap().is_empty());
        let stored = harness.store.app("myapp").unwrap().unwrap();
        assert!(stored.cname.is_empty());
    }

    #[test]
    fn remove_cname_requires_declared_cname() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        let result = harness.svc.remove_cname("myapp", &["ghost.example.com"]);
        assert!(matches!(result, Err(AppError::CnameNotFound)));
    }

    // ── Units and process control ──────────────────────────────────

    #[test]
    fn available_and_unit_status() {
        let harness = test_service();
        let app = seed_app(&harness, "myapp");
        assert!(!harness.svc.available("myapp").unwrap());

        harness.driver.push_unit(
            "myapp",
            Unit {
                id: "myapp-web-0".to_string(),
                name: "myapp-web-0".to_string(),
                app_name: app.name.clone(),
                process_name: "web".to_string(),
                address: "http://10.0.0.1:80".to_string(),
                status: UnitStatus::Started,
            },
        );
        assert!(harness.svc.available("myapp").unwrap());

        harness
            .svc
            .set_unit_status("myapp", "myapp-web", UnitStatus::Stopped)
            .unwrap();
        assert!(!harness.svc.available("myapp").unwrap());

        let result = harness.svc.set_unit_status("myapp", "ghost", UnitStatus::Started);
        assert!(matches!(result, Err(AppError::UnitNotFound)));
    }

    #[test]
    fn update_units_status_reports_missing_units() {
        let harness = test_service();
        let app = seed_app(&harness, "myapp");
        harness.driver.push_unit(
            "myapp",
            Unit {
                id: "u1".to_string(),
                name: "u1".to_string(),
                app_name: app.name,
                process_name: "web".to_string(),
                address: String::new(),
                status: UnitStatus::Starting,
            },
        );

        let results = harness
            .svc
            .update_units_status(&[
                UpdateUnitsData {
                    id: "u1".to_string(),
                    name: "u1".to_string(),
                    status: UnitStatus::Started,
                },
                UpdateUnitsData {
                    id: "ghost".to_string(),
                    name: "ghost".to_string(),
                    status: UnitStatus::Started,
                },
            ])
            .unwrap();

        assert_eq!(
            results,
            vec![
                UpdateUnitsResult { id: "u1".to_string(), found: true },
                UpdateUnitsResult { id: "ghost".to_string(), found: false },
            ]
        );
    }

    #[test]
    fn run_command_requires_availability_and_sources_env() {
        let harness = test_service();
        let app = seed_app(&harness, "myapp");
        let result = harness.svc.run_command("myapp", "ls", false);
        assert!(matches!(result, Err(AppError::NotAvailable)));

        harness.driver.push_unit(
            "myapp",
            Unit {
                id: "u1".to_string(),
                name: "u1".to_string(),
                app_name: app.name,
                process_name: "web".to_string(),
                address: String::new(),
                status: UnitStatus::Started,
            },
        );
        harness.svc.run_command("myapp", "ls", false).unwrap();
        let commands = harness.driver.commands.lock().unwrap();
        assert!(commands[0].contains("source /home/application/apprc"));
        assert!(commands[0].ends_with("ls"));
    }

    // ── Misc ───────────────────────────────────────────────────────

    #[test]
    fn quota_usage_validation() {
        let harness = test_service();
        let mut app = seed_app(&harness, "myapp");

        let result = harness.svc.set_quota_in_use("myapp", 2);
        assert!(matches!(result, Err(AppError::UnlimitedQuota)));

        app.quota = Quota { limit: 4, in_use: 0 };
        harness.store.save_app(&app).unwrap();
        let result = harness.svc.set_quota_in_use("myapp", 5);
        assert!(matches!(result, Err(AppError::QuotaUsageTooHigh(4))));

        harness.svc.set_quota_in_use("myapp", 3).unwrap();
        assert_eq!(harness.store.app("myapp").unwrap().unwrap().quota.in_use, 3);
    }

    #[test]
    fn list_restricts_non_admin_users_to_their_teams() {
        let harness = test_service();
        seed_app(&harness, "ours");
        let mut foreign = seed_app(&harness, "theirs");
        foreign.teams = vec!["strangers".to_string()];
        foreign.team_owner = "strangers".to_string();
        harness.store.save_app(&foreign).unwrap();

        let user = test_user();
        let visible = harness.svc.list(Some(&user), &AppFilter::default()).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "ours");

        let admin = User { admin: true, ..test_user() };
        assert_eq!(harness.svc.list(Some(&admin), &AppFilter::default()).unwrap().len(), 2);
        assert_eq!(harness.svc.list(None, &AppFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn change_pool_validates_target() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness
            .store
            .add_pool(&Pool {
                name: "other-pool".to_string(),
                teams: vec!["cobrateam".to_string()],
                ..Default::default()
            })
            .unwrap();

        harness.svc.change_pool("myapp", "other-pool").unwrap();
        assert_eq!(harness.store.app("myapp").unwrap().unwrap().pool, "other-pool");

        let result = harness.svc.change_pool("myapp", "ghost-pool");
        assert!(matches!(result, Err(AppError::PoolNotFound)));
    }

    #[test]
    fn logs_are_split_and_filtered() {
        let harness = test_service();
        seed_app(&harness, "myapp");
        harness.svc.log("myapp", "line one\nline two\n\n", "web", "u1").unwrap();
        harness.svc.log("myapp", "other", "worker", "u2").unwrap();

        let all = harness.svc.last_logs("myapp", 10, "", "").unwrap();
        assert_eq!(all.len(), 3);
        let web = harness.svc.last_logs("myapp", 10, "web", "").unwrap();
        assert_eq!(web.len(), 2);
        assert_eq!(web[0].message, "line one");
    }
}
