//! Concrete pipeline actions for app creation, plan changes and unit
//! scaling. Each action's backward undoes exactly what its forward did;
//! rollback problems are logged, never surfaced.

use std::collections::HashMap;

use tracing::{error, warn};

use quay_core::cluster::Node;
use quay_core::types::{APP_TOKEN_ENV_VAR, ContainerInfo, EnvVar, Unit, UnitStatus};
use quay_scheduler::CreateContainerOptions;

use crate::action::{Action, PipelineCtx};
use crate::error::{AppError, AppResult};
use crate::router::RouterError;

/// Steps of the create-app pipeline, in execution order.
pub fn create_app_pipeline() -> Vec<Box<dyn Action>> {
    vec![
        Box::new(ReserveUserApp),
        Box::new(InsertApp),
        Box::new(ExportBaseEnvs),
        Box::new(CreateRepository),
        Box::new(ProvisionApp),
        Box::new(SetAppIp),
    ]
}

/// Steps of the change-plan pipeline, in execution order.
pub fn change_plan_pipeline() -> Vec<Box<dyn Action>> {
    vec![
        Box::new(MoveRouterUnits),
        Box::new(SaveApp),
        Box::new(RestartApp),
        Box::new(RemoveOldBackend),
    ]
}

/// Steps of the add-units pipeline, in execution order.
pub fn add_units_pipeline() -> Vec<Box<dyn Action>> {
    vec![Box::new(ReserveUnitsToAdd), Box::new(ProvisionAddUnits)]
}

// ── Create app ────────────────────────────────────────────────────

/// Reserve one app slot in the creating user's quota.
struct ReserveUserApp;

impl Action for ReserveUserApp {
    fn name(&self) -> &'static str {
        "reserve-user-app"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        ctx.svc.auth.reserve_app(&ctx.user.email)?;
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        if let Err(err) = ctx.svc.auth.release_app(&ctx.user.email) {
            error!(user = %ctx.user.email, error = %err, "could not release user app quota");
        }
    }
}

/// Persist the app document.
struct InsertApp;

impl Action for InsertApp {
    fn name(&self) -> &'static str {
        "insert-app"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        ctx.svc.store.insert_app(&ctx.app)?;
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        if let Err(err) = ctx.svc.store.delete_app(&ctx.app.name) {
            error!(app = %ctx.app.name, error = %err, "could not delete app document");
        }
    }
}

/// Issue the app token and export the base environment variables.
struct ExportBaseEnvs;

impl Action for ExportBaseEnvs {
    fn name(&self) -> &'static str {
        "export-base-envs"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        let token = ctx.svc.auth.app_login(&ctx.app.name)?;
        let envs = [
            ("QUAY_APP_NAME", ctx.app.name.clone()),
            (APP_TOKEN_ENV_VAR, token.clone()),
        ];
        for (name, value) in envs {
            ctx.app.set_env(EnvVar {
                name: name.to_string(),
                value,
                public: false,
                instance_name: String::new(),
            });
        }
        ctx.svc.store.update_app_env(&ctx.app.name, &ctx.app.env)?;
        ctx.token = Some(token);
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        if let Some(token) = ctx.token.take() {
            if let Err(err) = ctx.svc.auth.app_logout(&token) {
                error!(app = %ctx.app.name, error = %err, "could not revoke app token");
            }
        }
    }
}

/// Create the app's git repository.
struct CreateRepository;

impl Action for CreateRepository {
    fn name(&self) -> &'static str {
        "create-repository"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        let users = vec![ctx.user.email.clone()];
        ctx.svc.repository.create_repository(&ctx.app.name, &users)?;
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        if let Err(err) = ctx.svc.repository.remove_repository(&ctx.app.name) {
            error!(app = %ctx.app.name, error = %err, "could not remove repository");
        }
    }
}

/// Publish the app's backend on its plan's router.
struct ProvisionApp;

impl Action for ProvisionApp {
    fn name(&self) -> &'static str {
        "provision-app"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        let router = ctx.svc.routers.get(&ctx.app.plan.router)?;
        match router.add_backend(&ctx.app.name) {
            Ok(()) | Err(RouterError::BackendExists) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        let Ok(router) = ctx.svc.routers.get(&ctx.app.plan.router) else {
            return;
        };
        if let Err(err) = router.remove_backend(&ctx.app.name) {
            error!(app = %ctx.app.name, error = %err, "could not remove router backend");
        }
    }
}

/// Record the app's public address on the document.
struct SetAppIp;

impl Action for SetAppIp {
    fn name(&self) -> &'static str {
        "set-app-ip"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        let ip = ctx.svc.driver.addr(&ctx.app)?;
        ctx.svc.store.set_app_ip(&ctx.app.name, &ip)?;
        ctx.app.ip = ip;
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        ctx.app.ip = String::new();
        if let Err(err) = ctx.svc.store.set_app_ip(&ctx.app.name, "") {
            error!(app = %ctx.app.name, error = %err, "could not clear app address");
        }
    }
}

// ── Change plan ───────────────────────────────────────────────────

fn router_changed(ctx: &PipelineCtx<'_>) -> bool {
    ctx.old_plan
        .as_ref()
        .is_some_and(|old| old.router != ctx.app.plan.router)
}

/// When the plan changes routers, publish the backend on the new router
/// and copy every unit route over.
struct MoveRouterUnits;

impl Action for MoveRouterUnits {
    fn name(&self) -> &'static str {
        "move-router-units"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        if !router_changed(ctx) {
            return Ok(());
        }
        let router = ctx.svc.routers.get(&ctx.app.plan.router)?;
        match router.add_backend(&ctx.app.name) {
            Ok(()) | Err(RouterError::BackendExists) => {}
            Err(err) => return Err(err.into()),
        }
        for unit in ctx.svc.driver.routable_units(&ctx.app)? {
            router.add_route(&ctx.app.name, &unit.address)?;
        }
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        if !router_changed(ctx) {
            return;
        }
        let Ok(router) = ctx.svc.routers.get(&ctx.app.plan.router) else {
            return;
        };
        if let Err(err) = router.remove_backend(&ctx.app.name) {
            error!(app = %ctx.app.name, error = %err, "could not remove backend from new router");
        }
    }
}

/// Persist the app document with the new plan.
struct SaveApp;

impl Action for SaveApp {
    fn name(&self) -> &'static str {
        "save-app"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        ctx.svc.store.save_app(&ctx.app)?;
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        let Some(old_plan) = ctx.old_plan.clone() else {
            return;
        };
        let mut app = ctx.app.clone();
        app.plan = old_plan;
        if let Err(err) = ctx.svc.store.save_app(&app) {
            error!(app = %app.name, error = %err, "could not restore previous plan");
        }
    }
}

/// Restart the app so the new resource envelope takes effect.
struct RestartApp;

impl Action for RestartApp {
    fn name(&self) -> &'static str {
        "restart-app"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        ctx.svc.driver.restart(&ctx.app, "")?;
        Ok(())
    }
}

/// Drop the backend from the old router once traffic moved. Failures
/// here leave a stale backend behind, which is reported but not fatal.
struct RemoveOldBackend;

impl Action for RemoveOldBackend {
    fn name(&self) -> &'static str {
        "remove-old-backend"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        if !router_changed(ctx) {
            return Ok(());
        }
        let Some(old_plan) = &ctx.old_plan else {
            return Ok(());
        };
        match ctx.svc.routers.get(&old_plan.router) {
            Ok(router) => {
                if let Err(err) = router.remove_backend(&ctx.app.name) {
                    warn!(app = %ctx.app.name, error = %err, "could not remove old backend");
                }
            }
            Err(err) => {
                warn!(app = %ctx.app.name, error = %err, "old router is gone");
            }
        }
        Ok(())
    }
}

// ── Add units ─────────────────────────────────────────────────────

/// Reserve the new units in the app quota.
struct ReserveUnitsToAdd;

impl Action for ReserveUnitsToAdd {
    fn name(&self) -> &'static str {
        "reserve-units-to-add"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        let quota = ctx.app.quota;
        if !quota.is_unlimited() {
            let available = (quota.limit as u64).saturating_sub(quota.in_use);
            if u64::from(ctx.units) > available {
                return Err(AppError::QuotaExceeded {
                    requested: u64::from(ctx.units),
                    available,
                });
            }
        }
        let in_use = quota.in_use + u64::from(ctx.units);
        ctx.svc.store.set_app_quota_in_use(&ctx.app.name, in_use)?;
        ctx.app.quota.in_use = in_use;
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        let in_use = ctx.app.quota.in_use.saturating_sub(u64::from(ctx.units));
        ctx.app.quota.in_use = in_use;
        if let Err(err) = ctx.svc.store.set_app_quota_in_use(&ctx.app.name, in_use) {
            error!(app = %ctx.app.name, error = %err, "could not roll back quota reservation");
        }
    }
}

/// Place one container per requested unit and register it with the
/// driver. Each placement goes through the scheduler, which persists the
/// chosen host into the container record.
struct ProvisionAddUnits;

impl ProvisionAddUnits {
    fn place_one(
        &self,
        ctx: &mut PipelineCtx<'_>,
        cluster: &quay_core::cluster::ClusterView,
    ) -> AppResult<Node> {
        let id = ctx.svc.next_container_id(&ctx.app.name, &ctx.process)?;
        let container = ContainerInfo {
            id: id.clone(),
            name: id.clone(),
            app_name: ctx.app.name.clone(),
            process_name: ctx.process.clone(),
            host_addr: String::new(),
            status: "starting".to_string(),
        };
        ctx.svc.store.insert_container(&container)?;

        let opts = CreateContainerOptions { name: id.clone() };
        let node = match ctx
            .svc
            .scheduler
            .schedule(cluster, &opts, &ctx.app.name, &ctx.process)
        {
            Ok(node) => node,
            Err(err) => {
                // The placement failed; drop the half-created record so
                // the registry does not accumulate unplaced containers.
                if let Err(cleanup_err) = ctx.svc.store.delete_container(&id) {
                    error!(container = %id, error = %cleanup_err, "could not delete unplaced container");
                }
                return Err(err.into());
            }
        };

        let unit = Unit {
            id: id.clone(),
            name: id.clone(),
            app_name: ctx.app.name.clone(),
            process_name: ctx.process.clone(),
            address: node.address.clone(),
            status: UnitStatus::Starting,
        };
        // The app environment rides along as the unit's custom data, so
        // the driver can materialize it inside the new container.
        let custom_data: HashMap<String, String> = ctx
            .app
            .env
            .values()
            .map(|env| (env.name.clone(), env.value.clone()))
            .collect();
        if let Err(err) = ctx.svc.driver.register_unit(&unit, custom_data) {
            if let Err(cleanup_err) = ctx.svc.store.delete_container(&id) {
                error!(container = %id, error = %cleanup_err, "could not delete unregistered container");
            }
            return Err(err.into());
        }
        ctx.created_containers.push(id);
        Ok(node)
    }
}

impl Action for ProvisionAddUnits {
    fn name(&self) -> &'static str {
        "provision-add-units"
    }

    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        let cluster = ctx.svc.cluster.read().expect("cluster view").clone();
        for _ in 0..ctx.units {
            if let Err(err) = self.place_one(ctx, &cluster) {
                // Units placed in earlier iterations are this step's own
                // partial work; the pipeline only compensates completed
                // steps, so undo them here before surfacing the error.
                self.backward(ctx);
                return Err(err);
            }
        }
        Ok(())
    }

    fn backward(&self, ctx: &mut PipelineCtx<'_>) {
        let created = std::mem::take(&mut ctx.created_containers);
        if created.is_empty() {
            return;
        }
        for id in &created {
            if let Err(err) = ctx.svc.store.delete_container(id) {
                error!(container = %id, error = %err, "could not delete container record");
            }
        }
        if let Err(err) =
            ctx.svc
                .driver
                .remove_units(&ctx.app, created.len() as u32, &ctx.process)
        {
            error!(app = %ctx.app.name, error = %err, "could not remove provisioned units");
        }
    }
}
