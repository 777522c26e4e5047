//! In-memory fakes for the external collaborators, plus a wired-up
//! `AppService` harness for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use quay_core::cluster::{ClusterView, Node};
use quay_core::config::SchedulerConfig;
use quay_core::types::*;
use quay_scheduler::SegregatedScheduler;
use quay_state::StateStore;

use crate::auth::{AuthError, AuthResult, AuthScheme};
use crate::driver::{CNameManager, ContainerDriver, DriverError, DriverResult};
use crate::lifecycle::AppService;
use crate::repository::{RepositoryError, RepositoryManager, RepositoryResult};
use crate::router::{Router, RouterError, RouterRegistry, RouterResult};

// ── Fake container driver ─────────────────────────────────────────

#[derive(Default)]
pub struct FakeDriver {
    pub units: Mutex<HashMap<String, Vec<Unit>>>,
    pub destroyed: Mutex<Vec<String>>,
    pub restarts: Mutex<Vec<(String, String)>>,
    pub starts: Mutex<Vec<(String, String)>>,
    pub stops: Mutex<Vec<(String, String)>>,
    pub commands: Mutex<Vec<String>>,
    pub swaps: Mutex<Vec<(String, String)>>,
    pub cnames: Mutex<Vec<(String, String)>>,
    /// Custom data received at registration, by unit id.
    pub registered_data: Mutex<HashMap<String, HashMap<String, String>>>,
    /// Operations forced to fail, by name.
    pub fail_ops: Mutex<HashSet<&'static str>>,
    /// Advertise the CNAME capability.
    pub cname_enabled: bool,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, op: &'static str) {
        self.fail_ops.lock().unwrap().insert(op);
    }

    fn check(&self, op: &'static str) -> DriverResult<()> {
        if self.fail_ops.lock().unwrap().contains(op) {
            return Err(DriverError::Failed(format!("forced failure: {op}")));
        }
        Ok(())
    }

    pub fn unit_count(&self, app: &str) -> usize {
        self.units.lock().unwrap().get(app).map_or(0, |u| u.len())
    }

    pub fn push_unit(&self, app: &str, unit: Unit) {
        self.units.lock().unwrap().entry(app.to_string()).or_default().push(unit);
    }
}

impl ContainerDriver for FakeDriver {
    fn units(&self, app: &App) -> DriverResult<Vec<Unit>> {
        self.check("units")?;
        Ok(self.units.lock().unwrap().get(&app.name).cloned().unwrap_or_default())
    }

    fn routable_units(&self, app: &App) -> DriverResult<Vec<Unit>> {
        self.check("routable_units")?;
        self.units(app)
    }

    fn destroy(&self, app: &App) -> DriverResult<()> {
        self.check("destroy")?;
        self.units.lock().unwrap().remove(&app.name);
        self.destroyed.lock().unwrap().push(app.name.clone());
        Ok(())
    }

    fn restart(&self, app: &App, process: &str) -> DriverResult<()> {
        self.check("restart")?;
        self.restarts.lock().unwrap().push((app.name.clone(), process.to_string()));
        Ok(())
    }

    fn stop(&self, app: &App, process: &str) -> DriverResult<()> {
        self.check("stop")?;
        self.stops.lock().unwrap().push((app.name.clone(), process.to_string()));
        Ok(())
    }

    fn start(&self, app: &App, process: &str) -> DriverResult<()> {
        self.check("start")?;
        self.starts.lock().unwrap().push((app.name.clone(), process.to_string()));
        Ok(())
    }

    fn execute_command(&self, _app: &App, cmd: &str) -> DriverResult<String> {
        self.check("execute_command")?;
        self.commands.lock().unwrap().push(cmd.to_string());
        Ok(String::new())
    }

    fn execute_command_once(&self, _app: &App, cmd: &str, _flags: &[&str]) -> DriverResult<String> {
        self.check("execute_command_once")?;
        self.commands.lock().unwrap().push(cmd.to_string());
        Ok(String::new())
    }

    fn set_unit_status(&self, unit: &Unit, status: UnitStatus) -> DriverResult<()> {
        self.check("set_unit_status")?;
        let mut units = self.units.lock().unwrap();
        for app_units in units.values_mut() {
            if let Some(found) = app_units.iter_mut().find(|u| u.id == unit.id) {
                found.status = status;
                return Ok(());
            }
        }
        Err(DriverError::UnitNotFound)
    }

    fn register_unit(&self, unit: &Unit, custom_data: HashMap<String, String>) -> DriverResult<()> {
        self.check("register_unit")?;
        self.registered_data
            .lock()
            .unwrap()
            .insert(unit.id.clone(), custom_data);
        self.push_unit(&unit.app_name, unit.clone());
        Ok(())
    }

    fn swap(&self, app1: &App, app2: &App) -> DriverResult<()> {
        self.check("swap")?;
        let mut units = self.units.lock().unwrap();
        let u1 = units.remove(&app1.name).unwrap_or_default();
        let u2 = units.remove(&app2.name).unwrap_or_default();
        units.insert(app1.name.clone(), u2);
        units.insert(app2.name.clone(), u1);
        self.swaps.lock().unwrap().push((app1.name.clone(), app2.name.clone()));
        Ok(())
    }

    fn addr(&self, app: &App) -> DriverResult<String> {
        self.check("addr")?;
        Ok(format!("{}.fake.quay.net", app.name))
    }

    fn remove_units(&self, app: &App, n: u32, process: &str) -> DriverResult<()> {
        self.check("remove_units")?;
        let mut units = self.units.lock().unwrap();
        let app_units = units.entry(app.name.clone()).or_default();
        let matching = app_units
            .iter()
            .filter(|u| process.is_empty() || u.process_name == process)
            .count();
        if (n as usize) > matching {
            return Err(DriverError::Failed(
                "cannot remove more units than the app has".to_string(),
            ));
        }
        let mut left = n as usize;
        app_units.retain(|u| {
            if left > 0 && (process.is_empty() || u.process_name == process) {
                left -= 1;
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn metric_envs(&self, _app: &App) -> HashMap<String, String> {
        HashMap::new()
    }

    fn cname_manager(&self) -> Option<&dyn CNameManager> {
        if self.cname_enabled {
            Some(self)
        } else {
            None
        }
    }
}

impl CNameManager for FakeDriver {
    fn set_cname(&self, app: &App, cname: &str) -> DriverResult<()> {
        self.cnames.lock().unwrap().push((app.name.clone(), cname.to_string()));
        Ok(())
    }

    fn unset_cname(&self, app: &App, cname: &str) -> DriverResult<()> {
        self.cnames
            .lock()
            .unwrap()
            .retain(|(a, c)| !(a == &app.name && c == cname));
        Ok(())
    }
}

// ── Fake router ───────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRouter {
    pub backends: Mutex<HashMap<String, Vec<String>>>,
    pub cnames: Mutex<HashMap<String, String>>,
    pub swapped: Mutex<HashMap<String, String>>,
    pub fail_ops: Mutex<HashSet<&'static str>>,
}

impl FakeRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, op: &'static str) {
        self.fail_ops.lock().unwrap().insert(op);
    }

    fn check(&self, op: &'static str) -> RouterResult<()> {
        if self.fail_ops.lock().unwrap().contains(op) {
            return Err(RouterError::Failed(format!("forced failure: {op}")));
        }
        Ok(())
    }

    pub fn has_backend(&self, name: &str) -> bool {
        self.backends.lock().unwrap().contains_key(name)
    }

    pub fn routes_of(&self, name: &str) -> Vec<String> {
        self.backends.lock().unwrap().get(name).cloned().unwrap_or_default()
    }

    pub fn set_swapped(&self, name: &str, other: &str) {
        self.swapped.lock().unwrap().insert(name.to_string(), other.to_string());
    }
}

impl Router for FakeRouter {
    fn add_backend(&self, name: &str) -> RouterResult<()> {
        self.check("add_backend")?;
        let mut backends = self.backends.lock().unwrap();
        if backends.contains_key(name) {
            return Err(RouterError::BackendExists);
        }
        backends.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn remove_backend(&self, name: &str) -> RouterResult<()> {
        self.check("remove_backend")?;
        if self.backends.lock().unwrap().remove(name).is_none() {
            return Err(RouterError::BackendNotFound);
        }
        Ok(())
    }

    fn set_cname(&self, cname: &str, name: &str) -> RouterResult<()> {
        self.check("set_cname")?;
        let mut cnames = self.cnames.lock().unwrap();
        if cnames.contains_key(cname) {
            return Err(RouterError::CnameExists);
        }
        cnames.insert(cname.to_string(), name.to_string());
        Ok(())
    }

    fn unset_cname(&self, cname: &str, _name: &str) -> RouterResult<()> {
        self.check("unset_cname")?;
        if self.cnames.lock().unwrap().remove(cname).is_none() {
            return Err(RouterError::CnameNotFound);
        }
        Ok(())
    }

    fn addr(&self, name: &str) -> RouterResult<String> {
        self.check("addr")?;
        if !self.has_backend(name) {
            return Err(RouterError::BackendNotFound);
        }
        Ok(format!("{name}.fakerouter.net"))
    }

    fn routes(&self, name: &str) -> RouterResult<Vec<String>> {
        self.check("routes")?;
        self.backends
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or(RouterError::BackendNotFound)
    }

    fn add_route(&self, name: &str, address: &str) -> RouterResult<()> {
        self.check("add_route")?;
        let mut backends = self.backends.lock().unwrap();
        let routes = backends.get_mut(name).ok_or(RouterError::BackendNotFound)?;
        if !routes.iter().any(|r| r == address) {
            routes.push(address.to_string());
        }
        Ok(())
    }

    fn remove_route(&self, name: &str, address: &str) -> RouterResult<()> {
        self.check("remove_route")?;
        let mut backends = self.backends.lock().unwrap();
        let routes = backends.get_mut(name).ok_or(RouterError::BackendNotFound)?;
        let before = routes.len();
        routes.retain(|r| r != address);
        if routes.len() == before {
            return Err(RouterError::RouteNotFound);
        }
        Ok(())
    }

    fn is_swapped(&self, name: &str) -> RouterResult<(bool, String)> {
        self.check("is_swapped")?;
        match self.swapped.lock().unwrap().get(name) {
            Some(other) => Ok((true, other.clone())),
            None => Ok((false, String::new())),
        }
    }
}

// ── Fake repository manager ───────────────────────────────────────

#[derive(Default)]
pub struct FakeRepositoryManager {
    pub repos: Mutex<HashSet<String>>,
    pub grants: Mutex<HashMap<String, HashSet<String>>>,
    /// Users whose grant calls fail.
    pub fail_grant_for: Mutex<HashSet<String>>,
    pub fail_create: Mutex<bool>,
}

impl FakeRepositoryManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn has_repo(&self, name: &str) -> bool {
        self.repos.lock().unwrap().contains(name)
    }

    pub fn access_of(&self, repo: &str) -> HashSet<String> {
        self.grants.lock().unwrap().get(repo).cloned().unwrap_or_default()
    }
}

impl RepositoryManager for FakeRepositoryManager {
    fn create_repository(&self, name: &str, users: &[String]) -> RepositoryResult<()> {
        if *self.fail_create.lock().unwrap() {
            return Err(RepositoryError("forced failure: create_repository".to_string()));
        }
        self.repos.lock().unwrap().insert(name.to_string());
        let mut grants = self.grants.lock().unwrap();
        grants
            .entry(name.to_string())
            .or_default()
            .extend(users.iter().cloned());
        Ok(())
    }

    fn remove_repository(&self, name: &str) -> RepositoryResult<()> {
        self.repos.lock().unwrap().remove(name);
        self.grants.lock().unwrap().remove(name);
        Ok(())
    }

    fn grant_access(&self, repo: &str, user: &str) -> RepositoryResult<()> {
        if self.fail_grant_for.lock().unwrap().contains(user) {
            return Err(RepositoryError(format!("forced failure granting {user}")));
        }
        self.grants
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .insert(user.to_string());
        Ok(())
    }

    fn revoke_access(&self, repo: &str, user: &str) -> RepositoryResult<()> {
        if let Some(users) = self.grants.lock().unwrap().get_mut(repo) {
            users.remove(user);
        }
        Ok(())
    }
}

// ── Fake auth scheme ──────────────────────────────────────────────

#[derive(Default)]
pub struct FakeAuthScheme {
    /// token → app name.
    pub tokens: Mutex<HashMap<String, String>>,
    /// user email → reserved app count.
    pub reserved: Mutex<HashMap<String, i64>>,
    pub logged_out: Mutex<Vec<String>>,
    pub fail_reserve: Mutex<bool>,
}

impl FakeAuthScheme {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reserved_for(&self, email: &str) -> i64 {
        self.reserved.lock().unwrap().get(email).copied().unwrap_or(0)
    }
}

impl AuthScheme for FakeAuthScheme {
    fn app_login(&self, app_name: &str) -> AuthResult<String> {
        let token = format!("token-{app_name}");
        self.tokens.lock().unwrap().insert(token.clone(), app_name.to_string());
        Ok(token)
    }

    fn app_logout(&self, token: &str) -> AuthResult<()> {
        self.tokens.lock().unwrap().remove(token);
        self.logged_out.lock().unwrap().push(token.to_string());
        Ok(())
    }

    fn reserve_app(&self, user_email: &str) -> AuthResult<()> {
        if *self.fail_reserve.lock().unwrap() {
            return Err(AuthError("forced failure: reserve_app".to_string()));
        }
        *self.reserved.lock().unwrap().entry(user_email.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn release_app(&self, user_email: &str) -> AuthResult<()> {
        *self.reserved.lock().unwrap().entry(user_email.to_string()).or_insert(0) -= 1;
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────

pub const FAKE_ROUTER: &str = "fake";
pub const FALLBACK_ROUTER: &str = "fallback";

/// A wired-up `AppService` over in-memory fakes, seeded with a default
/// plan, a default pool, a python platform and one cluster node.
pub struct Harness {
    pub svc: AppService,
    pub store: StateStore,
    pub driver: Arc<FakeDriver>,
    pub router: Arc<FakeRouter>,
    pub fallback_router: Arc<FakeRouter>,
    pub repository: Arc<FakeRepositoryManager>,
    pub auth: Arc<FakeAuthScheme>,
    pub cluster: Arc<RwLock<ClusterView>>,
}

pub fn test_service() -> Harness {
    test_service_with_driver(FakeDriver::new())
}

pub fn test_service_with_driver(driver: Arc<FakeDriver>) -> Harness {
    let store = StateStore::open_in_memory().unwrap();
    store
        .add_plan(&Plan {
            name: "autogenerated".to_string(),
            memory: 512 * 1024 * 1024,
            cpu_share: 100,
            router: FAKE_ROUTER.to_string(),
            is_default: true,
            ..Default::default()
        })
        .unwrap();
    store
        .add_plan(&Plan {
            name: "large".to_string(),
            memory: 4 << 30,
            cpu_share: 200,
            router: FAKE_ROUTER.to_string(),
            ..Default::default()
        })
        .unwrap();
    store
        .add_plan(&Plan {
            name: "large-fallback".to_string(),
            memory: 4 << 30,
            cpu_share: 200,
            router: FALLBACK_ROUTER.to_string(),
            ..Default::default()
        })
        .unwrap();
    store
        .save_platform(&Platform { name: "python".to_string(), disabled: false })
        .unwrap();
    store
        .save_platform(&Platform { name: "secret".to_string(), disabled: true })
        .unwrap();
    store
        .add_pool(&Pool {
            name: "test-default".to_string(),
            is_default: true,
            public: true,
            ..Default::default()
        })
        .unwrap();

    let router = FakeRouter::new();
    let fallback_router = FakeRouter::new();
    let mut routers = RouterRegistry::new(FAKE_ROUTER);
    routers.register(FAKE_ROUTER, router.clone());
    routers.register(FALLBACK_ROUTER, fallback_router.clone());

    let repository = FakeRepositoryManager::new();
    let auth = FakeAuthScheme::new();
    let scheduler = Arc::new(SegregatedScheduler::new(
        store.clone(),
        SchedulerConfig::default(),
    ));

    let mut view = ClusterView::new();
    view.register(Node {
        address: "http://10.10.10.1:4243".to_string(),
        metadata: HashMap::from([("pool".to_string(), "test-default".to_string())]),
    });
    view.register(Node {
        address: "http://10.10.10.2:4243".to_string(),
        metadata: HashMap::from([("pool".to_string(), "test-default".to_string())]),
    });
    let cluster = Arc::new(RwLock::new(view));

    let svc = AppService::new(
        store.clone(),
        driver.clone(),
        routers,
        repository.clone(),
        auth.clone(),
        scheduler,
        cluster.clone(),
    );
    Harness {
        svc,
        store,
        driver,
        router,
        fallback_router,
        repository,
        auth,
        cluster,
    }
}

/// An app document pre-inserted into the store, bypassing the create
/// pipeline. Uses the default plan and pool.
pub fn seed_app(harness: &Harness, name: &str) -> App {
    let app = App {
        name: name.to_string(),
        platform: "python".to_string(),
        teams: vec!["cobrateam".to_string()],
        team_owner: "cobrateam".to_string(),
        owner: "me@example.com".to_string(),
        pool: "test-default".to_string(),
        plan: Plan {
            name: "autogenerated".to_string(),
            memory: 512 * 1024 * 1024,
            cpu_share: 100,
            router: FAKE_ROUTER.to_string(),
            is_default: true,
            ..Default::default()
        },
        ..Default::default()
    };
    harness.store.insert_app(&app).unwrap();
    app
}
