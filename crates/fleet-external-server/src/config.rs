//! Server configuration.
//!
//! The configuration is a single JSON document. Unknown keys are rejected.
//! Module handler libraries can be configured once for the whole process
//! (`common_modules`) or per car (`specific_modules`); the two sets must be
//! disjoint and their union per car must be non-empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_protocol::topics;
use serde::Deserialize;

use crate::error::ConfigError;

/// Configuration of one module handler library.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Path to the handler shared library.
    pub lib_path: PathBuf,
    /// Key-value pairs forwarded to the library's `init`. Values must be
    /// strings or integers.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// Per-car section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarModulesConfig {
    /// Modules hosted only for this car.
    #[serde(default)]
    pub specific_modules: BTreeMap<String, ModuleConfig>,
}

/// The raw configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Company identity segment, lowercase `[a-z0-9_]+`.
    pub company_name: String,
    /// MQTT broker host.
    pub mqtt_address: String,
    /// MQTT broker port.
    pub mqtt_port: u16,
    /// Seconds to wait for the broker to accept a connection, at least 1.
    pub mqtt_timeout: u64,
    /// Protocol timeout in seconds, at least 1. Applies to the handshake
    /// waits and to both the status and command-response timers.
    pub timeout: u64,
    /// Publish module-produced commands whose device references a different
    /// module than the one that produced them.
    pub send_invalid_command: bool,
    /// Seconds to sleep before retrying a refused broker connection.
    pub sleep_duration_after_connection_refused: f64,
    /// Track status liveness per device instead of per session.
    #[serde(default)]
    pub per_device_status_timeout: bool,
    /// Modules hosted for every configured car.
    #[serde(default)]
    pub common_modules: BTreeMap<String, ModuleConfig>,
    /// Cars served by this process, keyed by car name.
    pub cars: BTreeMap<String, CarModulesConfig>,
    /// Passed through to the logging subsystem untouched.
    #[serde(default)]
    pub logging: serde_json::Value,
}

/// Resolved view of the configuration for a single car session.
#[derive(Debug, Clone)]
pub struct CarConfig {
    /// Company identity segment.
    pub company_name: String,
    /// Car identity segment.
    pub car_name: String,
    /// MQTT broker host.
    pub mqtt_address: String,
    /// MQTT broker port.
    pub mqtt_port: u16,
    /// Broker connection timeout.
    pub mqtt_timeout: Duration,
    /// Protocol timeout (handshake waits, status and command-response timers).
    pub timeout: Duration,
    /// See [`ServerConfig::send_invalid_command`].
    pub send_invalid_command: bool,
    /// Back-off after a refused broker connection.
    pub sleep_after_connection_refused: Duration,
    /// See [`ServerConfig::per_device_status_timeout`].
    pub per_device_status_timeout: bool,
    /// Union of common and car-specific modules, keyed by module id.
    pub modules: BTreeMap<u16, ModuleConfig>,
}

impl ServerConfig {
    /// Loads and validates the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates identities, numeric ranges and module id sets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !topics::is_valid_identifier(&self.company_name) {
            return Err(ConfigError::InvalidIdentifier {
                field: "company_name",
                value: self.company_name.clone(),
            });
        }
        if self.mqtt_address.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "mqtt_address",
                reason: "must not be empty".to_string(),
            });
        }
        if self.mqtt_timeout < 1 {
            return Err(ConfigError::InvalidValue {
                field: "mqtt_timeout",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.timeout < 1 {
            return Err(ConfigError::InvalidValue {
                field: "timeout",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if !self.sleep_duration_after_connection_refused.is_finite()
            || self.sleep_duration_after_connection_refused < 0.0
        {
            return Err(ConfigError::InvalidValue {
                field: "sleep_duration_after_connection_refused",
                reason: "must be a non-negative number".to_string(),
            });
        }
        if self.cars.is_empty() {
            return Err(ConfigError::NoCars);
        }

        let common = parse_module_ids(&self.common_modules)?;
        validate_module_values(&self.common_modules)?;
        for (car_name, car) in &self.cars {
            if !topics::is_valid_identifier(car_name) {
                return Err(ConfigError::InvalidIdentifier {
                    field: "car name",
                    value: car_name.clone(),
                });
            }
            let specific = parse_module_ids(&car.specific_modules)?;
            validate_module_values(&car.specific_modules)?;
            if let Some(&id) = specific.keys().find(|id| common.contains_key(*id)) {
                return Err(ConfigError::DuplicateModule {
                    id,
                    car: car_name.clone(),
                });
            }
            if common.is_empty() && specific.is_empty() {
                return Err(ConfigError::NoModules(car_name.clone()));
            }
        }
        Ok(())
    }

    /// Resolved configuration of one car. The car must exist in `cars`.
    #[must_use]
    pub fn car_config(&self, car_name: &str) -> CarConfig {
        let mut modules: BTreeMap<u16, ModuleConfig> = BTreeMap::new();
        for (id, module) in &self.common_modules {
            modules.insert(id.parse().expect("validated module id"), module.clone());
        }
        if let Some(car) = self.cars.get(car_name) {
            for (id, module) in &car.specific_modules {
                modules.insert(id.parse().expect("validated module id"), module.clone());
            }
        }
        CarConfig {
            company_name: self.company_name.clone(),
            car_name: car_name.to_string(),
            mqtt_address: self.mqtt_address.clone(),
            mqtt_port: self.mqtt_port,
            mqtt_timeout: Duration::from_secs(self.mqtt_timeout),
            timeout: Duration::from_secs(self.timeout),
            send_invalid_command: self.send_invalid_command,
            sleep_after_connection_refused: Duration::from_secs_f64(
                self.sleep_duration_after_connection_refused,
            ),
            per_device_status_timeout: self.per_device_status_timeout,
            modules,
        }
    }

    /// Names of all configured cars.
    pub fn car_names(&self) -> impl Iterator<Item = &str> {
        self.cars.keys().map(String::as_str)
    }
}

fn parse_module_ids(
    modules: &BTreeMap<String, ModuleConfig>,
) -> Result<BTreeMap<u16, ()>, ConfigError> {
    let mut parsed = BTreeMap::new();
    for id in modules.keys() {
        let module_id: u16 = id
            .parse()
            .map_err(|_| ConfigError::InvalidModuleId(id.clone()))?;
        parsed.insert(module_id, ());
    }
    Ok(parsed)
}

fn validate_module_values(modules: &BTreeMap<String, ModuleConfig>) -> Result<(), ConfigError> {
    for (id, module) in modules {
        for (key, value) in &module.config {
            let ok = value.is_string() || value.as_i64().is_some() || value.as_u64().is_some();
            if !ok {
                return Err(ConfigError::InvalidValue {
                    field: "config",
                    reason: format!("module {id}: value for '{key}' must be a string or integer"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra: &str) -> String {
        format!(
            r#"{{
                "company_name": "acme",
                "mqtt_address": "localhost",
                "mqtt_port": 1883,
                "mqtt_timeout": 2,
                "timeout": 5,
                "send_invalid_command": false,
                "sleep_duration_after_connection_refused": 0.5,
                "common_modules": {{
                    "2": {{ "lib_path": "/opt/modules/button.so", "config": {{ "retries": 3 }} }}
                }},
                "cars": {{ "v1": {{ "specific_modules": {{}} }} }}
                {extra}
            }}"#
        )
    }

    fn parse(json: &str) -> Result<ServerConfig, ConfigError> {
        let config: ServerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_is_accepted() {
        let config = parse(&minimal_config("")).unwrap();
        let car = config.car_config("v1");
        assert_eq!(car.company_name, "acme");
        assert_eq!(car.car_name, "v1");
        assert_eq!(car.timeout, Duration::from_secs(5));
        assert_eq!(car.modules.len(), 1);
        assert!(car.modules.contains_key(&2));
    }

    #[test]
    fn load_reads_and_validates_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, minimal_config("")).unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.company_name, "acme");
        assert!(matches!(
            ServerConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let json = minimal_config(r#", "unexpected": true"#);
        assert!(matches!(parse(&json), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn uppercase_company_name_is_rejected() {
        let json = minimal_config("").replace("\"acme\"", "\"Acme\"");
        assert!(matches!(
            parse(&json),
            Err(ConfigError::InvalidIdentifier { field: "company_name", .. })
        ));
    }

    #[test]
    fn duplicate_module_ids_are_rejected() {
        let json = minimal_config("").replace(
            r#""v1": { "specific_modules": {} }"#,
            r#""v1": { "specific_modules": { "2": { "lib_path": "/opt/other.so" } } }"#,
        );
        assert!(matches!(
            parse(&json),
            Err(ConfigError::DuplicateModule { id: 2, .. })
        ));
    }

    #[test]
    fn car_without_modules_is_rejected() {
        let json = minimal_config("").replace(
            r#""common_modules": {
                    "2": { "lib_path": "/opt/modules/button.so", "config": { "retries": 3 } }
                }"#,
            r#""common_modules": {}"#,
        );
        assert!(matches!(parse(&json), Err(ConfigError::NoModules(car)) if car == "v1"));
    }

    #[test]
    fn non_numeric_module_id_is_rejected() {
        let json = minimal_config("").replace("\"2\":", "\"two\":");
        assert!(matches!(parse(&json), Err(ConfigError::InvalidModuleId(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let json = minimal_config("").replace("\"timeout\": 5", "\"timeout\": 0");
        assert!(matches!(
            parse(&json),
            Err(ConfigError::InvalidValue { field: "timeout", .. })
        ));
    }

    #[test]
    fn module_config_values_must_be_scalar() {
        let json = minimal_config("").replace(
            r#"{ "retries": 3 }"#,
            r#"{ "retries": [1, 2] }"#,
        );
        assert!(matches!(parse(&json), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn car_config_merges_common_and_specific_modules() {
        let json = minimal_config("").replace(
            r#""v1": { "specific_modules": {} }"#,
            r#""v1": { "specific_modules": { "7": { "lib_path": "/opt/mission.so" } } }"#,
        );
        let config = parse(&json).unwrap();
        let car = config.car_config("v1");
        assert_eq!(car.modules.keys().copied().collect::<Vec<_>>(), vec![2, 7]);
    }
}
