//! Domain types for the quay platform.
//!
//! These types represent the persisted state of applications, container
//! units, pools, plans, and service instances. All types are serializable
//! to/from JSON for storage in redb tables.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved application name, used internally for token generation.
/// App validation rejects it.
pub const INTERNAL_APP_NAME: &str = "quayd";

/// Name of the aggregated service-bindings descriptor env var. Holds a
/// JSON object mapping service name to the list of bound instances.
pub const SERVICES_ENV_VAR: &str = "QUAY_SERVICES";

/// Name of the per-app auth token env var.
pub const APP_TOKEN_ENV_VAR: &str = "QUAY_APP_TOKEN";

/// Default working directory inside application containers.
pub const DEFAULT_APP_DIR: &str = "/home/application/current";

// ── Application ───────────────────────────────────────────────────

/// A tenant application: the main document of the platform.
///
/// Holds the app's identity, access control (teams), resource plan,
/// target pool, environment and routing state. Container units are not
/// embedded here; they live in the container registry and reference the
/// app by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct App {
    pub name: String,
    pub platform: String,
    /// Teams with access to the app. Always contains `team_owner`.
    pub teams: Vec<String>,
    pub team_owner: String,
    /// Email of the user that created the app.
    pub owner: String,
    pub pool: String,
    pub plan: Plan,
    /// Public address, refreshed by route reconciliation and swap.
    pub ip: String,
    pub cname: Vec<String>,
    pub env: HashMap<String, EnvVar>,
    pub quota: Quota,
    pub lock: AppLock,
    pub deploys: u64,
    pub update_platform: bool,
}

impl App {
    /// Set an environment variable on the in-memory document.
    pub fn set_env(&mut self, env: EnvVar) {
        self.env.insert(env.name.clone(), env);
    }

    /// Get a declared environment variable, if any.
    pub fn get_env(&self, name: &str) -> Option<&EnvVar> {
        self.env.get(name)
    }

    /// Environment variables belonging to the given service instance.
    pub fn instance_env(&self, instance: &str) -> HashMap<String, EnvVar> {
        self.env
            .iter()
            .filter(|(_, v)| v.instance_name == instance)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The aggregated services descriptor parsed from the env map.
    /// Absent or unparsable descriptors yield an empty map.
    pub fn parsed_services(&self) -> HashMap<String, Vec<BoundInstance>> {
        self.env
            .get(SERVICES_ENV_VAR)
            .and_then(|v| serde_json::from_str(&v.value).ok())
            .unwrap_or_default()
    }
}

/// An environment variable bound to an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    /// Public variables are visible to users; private ones are not.
    pub public: bool,
    /// Name of the service instance that provided this variable, or
    /// empty when it was set directly.
    pub instance_name: String,
}

/// A service instance bound to an app, as recorded in the services
/// descriptor env var.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundInstance {
    pub name: String,
    pub envs: HashMap<String, String>,
}

/// Unit quota for an app: `in_use` may never exceed `limit` unless the
/// quota is unlimited (`limit < 0`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quota {
    pub limit: i64,
    pub in_use: u64,
}

impl Quota {
    pub fn unlimited() -> Self {
        Self { limit: -1, in_use: 0 }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit < 0
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::unlimited()
    }
}

// ── App lock ──────────────────────────────────────────────────────

/// Advisory single-holder lock stored on the app document.
///
/// `locked == true` implies reason, owner and acquire date are all set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppLock {
    pub locked: bool,
    pub reason: String,
    pub owner: String,
    /// Unix timestamp (seconds, UTC) of acquisition.
    pub acquire_date: u64,
}

impl fmt::Display for AppLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.locked {
            return write!(f, "Not locked");
        }
        write!(
            f,
            "App locked by {}, running {}. Acquired in {}",
            self.owner, self.reason, self.acquire_date
        )
    }
}

// ── Plan ──────────────────────────────────────────────────────────

/// Resource envelope for an app: memory/swap budgets, cpu share and the
/// router responsible for its traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Plan {
    pub name: String,
    /// Memory limit in bytes.
    pub memory: u64,
    /// Swap limit in bytes.
    pub swap: u64,
    /// Relative cpu share.
    pub cpu_share: u32,
    /// Router name traffic for this plan goes through.
    pub router: String,
    /// Used when an app is created without naming a plan.
    #[serde(default)]
    pub is_default: bool,
}

// ── Pool ──────────────────────────────────────────────────────────

/// A named subset of hosts reserved for specific teams.
///
/// At most one pool carries the default flag. A non-public pool is only
/// usable by apps whose team owner is in its team set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Pool {
    pub name: String,
    pub teams: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub public: bool,
}

// ── Container unit ────────────────────────────────────────────────

/// A placed container: one running instance of an app process on a host.
///
/// `id` is globally unique; `name` and `(app_name, process_name)` are
/// free-form keys used for aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub app_name: String,
    pub process_name: String,
    /// Bare host address (no scheme or port); empty until placed.
    pub host_addr: String,
    pub status: String,
}

/// A unit as reported by the container driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub id: String,
    pub name: String,
    pub app_name: String,
    pub process_name: String,
    /// Routable address of the unit.
    pub address: String,
    pub status: UnitStatus,
}

/// Lifecycle status of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Created,
    Building,
    Starting,
    Started,
    Stopped,
    Unreachable,
    Error,
}

impl Unit {
    /// A unit is available when it is either serving or presumed to be
    /// serving (unreachable units may still hold traffic).
    pub fn available(&self) -> bool {
        matches!(self.status, UnitStatus::Started | UnitStatus::Unreachable)
    }
}

// ── Service instance ──────────────────────────────────────────────

/// A provisioned service instance and the apps bound to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceInstance {
    pub name: String,
    pub service_name: String,
    /// Names of apps bound to this instance.
    pub apps: Vec<String>,
    /// Variables this instance exports to bound apps.
    pub envs: HashMap<String, String>,
}

// ── Users and teams ───────────────────────────────────────────────

/// A platform user, as handed over by the external identity module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct User {
    pub email: String,
    /// Names of teams the user belongs to.
    pub teams: Vec<String>,
    pub admin: bool,
}

/// A team and its members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Team {
    pub name: String,
    /// Member emails.
    pub users: Vec<String>,
}

impl Team {
    pub fn contains_user(&self, email: &str) -> bool {
        self.users.iter().any(|u| u == email)
    }
}

// ── Platform ──────────────────────────────────────────────────────

/// A build platform apps may target. Disabled platforms are reserved to
/// admin users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Platform {
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
}

// ── Logs and deploys ──────────────────────────────────────────────

/// A single app log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppLog {
    /// Unix timestamp (seconds, UTC).
    pub date: u64,
    pub message: String,
    pub source: String,
    pub app_name: String,
    pub unit: String,
}

/// A recorded deploy of an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeployRecord {
    pub id: String,
    pub app_name: String,
    /// Unix timestamp (seconds, UTC).
    pub timestamp: u64,
    pub image: String,
    /// Set when the owning app has been deleted.
    #[serde(default)]
    pub removed: bool,
}

// ── Listing filter ────────────────────────────────────────────────

/// Filter for app listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AppFilter {
    /// Substring match on the app name.
    pub name: String,
    pub platform: String,
    pub team_owner: String,
    pub owner: String,
    pub locked: bool,
}

impl AppFilter {
    /// Whether the given app matches this filter.
    pub fn matches(&self, app: &App) -> bool {
        if !self.name.is_empty() && !app.name.contains(&self.name) {
            return false;
        }
        if !self.platform.is_empty() && app.platform != self.platform {
            return false;
        }
        if !self.team_owner.is_empty() && app.team_owner != self.team_owner {
            return false;
        }
        if !self.owner.is_empty() && app.owner != self.owner {
            return false;
        }
        if self.locked && !app.lock.locked {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_display() {
        let unlocked = AppLock::default();
        assert_eq!(unlocked.to_string(), "Not locked");

        let locked = AppLock {
            locked: true,
            reason: "POST /apps/x/restart".to_string(),
            owner: "someone@example.com".to_string(),
            acquire_date: 1000,
        };
        assert_eq!(
            locked.to_string(),
            "App locked by someone@example.com, running POST /apps/x/restart. Acquired in 1000"
        );
    }

    #[test]
    fn quota_unlimited() {
        assert!(Quota::unlimited().is_unlimited());
        assert!(!Quota { limit: 4, in_use: 0 }.is_unlimited());
    }

    #[test]
    fn unit_availability() {
        let mut unit = Unit {
            id: "u1".to_string(),
            name: "u1".to_string(),
            app_name: "app".to_string(),
            process_name: "web".to_string(),
            address: "http://10.0.0.1:1234".to_string(),
            status: UnitStatus::Started,
        };
        assert!(unit.available());
        unit.status = UnitStatus::Unreachable;
        assert!(unit.available());
        unit.status = UnitStatus::Stopped;
        assert!(!unit.available());
    }

    #[test]
    fn instance_env_filters_by_instance() {
        let mut app = App::default();
        app.set_env(EnvVar {
            name: "DATABASE_HOST".to_string(),
            value: "10.0.0.2".to_string(),
            public: false,
            instance_name: "mydb".to_string(),
        });
        app.set_env(EnvVar {
            name: "OTHER".to_string(),
            value: "x".to_string(),
            public: true,
            instance_name: String::new(),
        });

        let envs = app.instance_env("mydb");
        assert_eq!(envs.len(), 1);
        assert!(envs.contains_key("DATABASE_HOST"));
    }

    #[test]
    fn parsed_services_tolerates_garbage() {
        let mut app = App::default();
        assert!(app.parsed_services().is_empty());

        app.set_env(EnvVar {
            name: SERVICES_ENV_VAR.to_string(),
            value: "not json".to_string(),
            public: false,
            instance_name: String::new(),
        });
        assert!(app.parsed_services().is_empty());

        app.set_env(EnvVar {
            name: SERVICES_ENV_VAR.to_string(),
            value: r#"{"mysql":[{"name":"mydb","envs":{"A":"1"}}]}"#.to_string(),
            public: false,
            instance_name: String::new(),
        });
        let services = app.parsed_services();
        assert_eq!(services["mysql"].len(), 1);
        assert_eq!(services["mysql"][0].name, "mydb");
    }

    #[test]
    fn filter_matching() {
        let app = App {
            name: "myapp".to_string(),
            platform: "python".to_string(),
            team_owner: "cobrateam".to_string(),
            owner: "me@example.com".to_string(),
            ..Default::default()
        };

        assert!(AppFilter::default().matches(&app));
        assert!(AppFilter { name: "my".to_string(), ..Default::default() }.matches(&app));
        assert!(!AppFilter { name: "their".to_string(), ..Default::default() }.matches(&app));
        assert!(!AppFilter { platform: "go".to_string(), ..Default::default() }.matches(&app));
        assert!(!AppFilter { locked: true, ..Default::default() }.matches(&app));
    }
}
