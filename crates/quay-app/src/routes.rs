//! Route reconciliation — converge router state onto routable units.
//!
//! `rebuild_routes` is idempotent: it ensures the backend and CNAMEs
//! exist (tolerating "already exists"), refreshes the app address, and
//! diffs the router's current routes against the driver's routable
//! units, adding and removing only the difference.

use tracing::info;

use crate::error::AppResult;
use crate::lifecycle::AppService;
use crate::router::RouterError;

/// Routes added and removed by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildRoutesResult {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl AppService {
    /// Reconcile the app's router state. Returns what changed; a second
    /// consecutive call returns empty sets.
    pub fn rebuild_routes(&self, app_name: &str) -> AppResult<RebuildRoutesResult> {
        let mut app = self.app(app_name)?;
        let router = self.routers.get(&app.plan.router)?;

        match router.add_backend(&app.name) {
            Ok(()) | Err(RouterError::BackendExists) => {}
            Err(err) => return Err(err.into()),
        }
        if let Ok(new_addr) = router.addr(&app.name) {
            if new_addr != app.ip {
                self.store.set_app_ip(&app.name, &new_addr)?;
                app.ip = new_addr;
            }
        }
        for cname in &app.cname {
            match router.set_cname(cname, &app.name) {
                Ok(()) | Err(RouterError::CnameExists) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let current = router.routes(&app.name)?;
        let mut expected: Vec<String> = self
            .driver
            .routable_units(&app)?
            .into_iter()
            .map(|unit| unit.address)
            .collect();
        expected.sort();
        expected.dedup();

        let mut to_remove = Vec::new();
        for address in &current {
            if let Some(pos) = expected.iter().position(|e| e == address) {
                expected.remove(pos);
            } else {
                to_remove.push(address.clone());
            }
        }

        let mut result = RebuildRoutesResult::default();
        for address in expected {
            router.add_route(&app.name, &address)?;
            result.added.push(address);
        }
        for address in to_remove {
            router.remove_route(&app.name, &address)?;
            result.removed.push(address);
        }
        if !result.added.is_empty() || !result.removed.is_empty() {
            info!(
                app = app_name,
                added = result.added.len(),
                removed = result.removed.len(),
                "routes rebuilt"
            );
        }
        Ok(result)
    }
}
