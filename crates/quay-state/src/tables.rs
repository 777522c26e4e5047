//! redb table definitions for the quay metadata store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Apps, pools, plans and platforms are keyed by their unique
//! name; containers by their unique id; composite keys follow the
//! pattern `{parent}:{child}` or `{service}/{instance}`.

use redb::TableDefinition;

/// App documents keyed by `{name}`.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// Placed containers keyed by `{id}`.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// Pools keyed by `{name}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Plans keyed by `{name}`.
pub const PLANS: TableDefinition<&str, &[u8]> = TableDefinition::new("plans");

/// Platforms keyed by `{name}`.
pub const PLATFORMS: TableDefinition<&str, &[u8]> = TableDefinition::new("platforms");

/// Service instances keyed by `{service}/{instance}`.
pub const SERVICE_INSTANCES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("service_instances");

/// App log entries keyed by `{app}:{seq}` (zero-padded, natural order).
pub const LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("logs");

/// Deploy records keyed by `{app}:{deploy_id}`.
pub const DEPLOYS: TableDefinition<&str, &[u8]> = TableDefinition::new("deploys");
