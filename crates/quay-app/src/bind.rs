//! Service binding propagation — keep app environment in sync with
//! bound service instances.
//!
//! Two env layers are maintained: per-instance variables (private,
//! tagged with the instance name) and the aggregated services
//! descriptor, a JSON object mapping service name to the list of bound
//! instances. Removal searches the remaining descriptor for another
//! instance providing the same variable and preserves it (instance
//! fallback), so unbinding one of two database instances keeps the app
//! configured against the survivor.

use quay_core::types::{BoundInstance, EnvVar, SERVICES_ENV_VAR};

use crate::error::{AppError, AppResult};
use crate::lifecycle::AppService;

/// Find an instance in the descriptor providing the given variable.
fn find_service_env<'a>(
    services: &'a std::collections::HashMap<String, Vec<BoundInstance>>,
    name: &str,
) -> Option<(&'a str, &'a str)> {
    for instances in services.values() {
        for instance in instances {
            if let Some(value) = instance.envs.get(name) {
                if !value.is_empty() {
                    return Some((&instance.name, value));
                }
            }
        }
    }
    None
}

fn descriptor_env(value: String) -> EnvVar {
    EnvVar {
        name: SERVICES_ENV_VAR.to_string(),
        value,
        public: false,
        instance_name: String::new(),
    }
}

impl AppService {
    /// Bind a service instance to the app: record it in the services
    /// descriptor and flatten its variables into private, instance-tagged
    /// env vars. The app restarts when units exist (through `SetEnvs`).
    pub fn add_instance(
        &self,
        app_name: &str,
        service_name: &str,
        instance: &BoundInstance,
    ) -> AppResult<()> {
        let mut app = self.app(app_name)?;
        let mut services = app.parsed_services();
        services
            .entry(service_name.to_string())
            .or_default()
            .push(instance.clone());
        let descriptor = serde_json::to_string(&services)
            .map_err(|e| AppError::Serialize(e.to_string()))?;
        if instance.envs.is_empty() {
            return Ok(());
        }

        let mut env_vars = Vec::with_capacity(instance.envs.len() + 1);
        for (name, value) in &instance.envs {
            env_vars.push(EnvVar {
                name: name.clone(),
                value: value.clone(),
                public: false,
                instance_name: instance.name.clone(),
            });
        }
        env_vars.push(descriptor_env(descriptor));

        let should_restart = !self.driver.units(&app)?.is_empty();
        self.set_envs_to_app(&mut app, env_vars, false, should_restart)
    }

    /// Unbind a service instance: drop it from the descriptor, unset the
    /// variables it provided unless another bound instance provides them
    /// (which then takes them over), and restart the app at most once.
    pub fn remove_instance(
        &self,
        app_name: &str,
        service_name: &str,
        instance: &BoundInstance,
    ) -> AppResult<()> {
        let mut app = self.app(app_name)?;
        let mut services = app.parsed_services();
        let to_unset: Vec<String> = instance.envs.keys().cloned().collect();

        let mut found = false;
        if let Some(instances) = services.get_mut(service_name) {
            if let Some(index) = instances.iter().position(|i| i.name == instance.name) {
                instances.remove(index);
                found = true;
            }
        }
        if services.get(service_name).is_some_and(|i| i.is_empty()) {
            services.remove(service_name);
        }
        let descriptor = if found {
            Some(serde_json::to_string(&services).map_err(|e| AppError::Serialize(e.to_string()))?)
        } else {
            None
        };

        let mut envs_to_set = Vec::new();
        for name in &to_unset {
            if let Some((instance_name, value)) = find_service_env(&services, name) {
                envs_to_set.push(EnvVar {
                    name: name.clone(),
                    value: value.to_string(),
                    public: false,
                    instance_name: instance_name.to_string(),
                });
            }
        }
        if let Some(descriptor) = descriptor {
            envs_to_set.push(descriptor_env(descriptor));
        }

        if !to_unset.is_empty() {
            let units = self.driver.units(&app)?;
            // Restart here only when no SetEnvs follows; otherwise the
            // set pass restarts and we would bounce the app twice.
            let should_restart = envs_to_set.is_empty() && !units.is_empty();
            self.unset_envs_to_app(&mut app, &to_unset, false, should_restart)?;
        }
        if envs_to_set.is_empty() {
            return Ok(());
        }
        let should_restart = !self.driver.units(&app)?.is_empty();
        self.set_envs_to_app(&mut app, envs_to_set, false, should_restart)
    }
}
