//! `core.rootConfig`: the process configuration, read by dotted key.

use std::sync::Arc;

use figment::Figment;
use figment::providers::Serialized;
use ingot_core::{
    BoxError, DEFAULT_SERVICE_FACTORIES, ProduceContext, ServiceFactory, ServiceRef, ServiceScope,
};
use linkme::distributed_slice;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{ConfigError, ConfigLoader, ConfigResult};

/// The process configuration.
pub static ROOT_CONFIG: ServiceRef<RootConfig> =
    ServiceRef::new("core.rootConfig", ServiceScope::Root);

/// Read access to the merged configuration tree.
///
/// ```rust,ignore
/// let config = deps.get(&ROOT_CONFIG)?;
/// let name: String = config.get("app.greeter.name")?;
/// let port: u16 = config.get_optional("app.port")?.unwrap_or(8080);
/// ```
#[derive(Debug, Clone)]
pub struct RootConfig {
    figment: Figment,
}

impl RootConfig {
    /// Wraps an already merged figment.
    pub fn new(figment: Figment) -> Self {
        Self { figment }
    }

    /// A configuration with no keys.
    pub fn empty() -> Self {
        Self::new(Figment::new())
    }

    /// Builds a configuration from any serializable value, usually a
    /// `serde_json::json!` literal in tests.
    pub fn from_value<T: Serialize>(value: T) -> Self {
        Self::new(Figment::from(Serialized::defaults(value)))
    }

    /// Returns `true` if `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.figment.find_value(key).is_ok()
    }

    /// Extracts the value at `key`.
    ///
    /// Fails with [`ConfigError::MissingKey`] when the key is absent and
    /// [`ConfigError::Extract`] when it has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<T> {
        self.get_optional(key)?
            .ok_or_else(|| ConfigError::missing_key(key))
    }

    /// Extracts the value at `key`, or `None` when it is absent.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        if !self.has(key) {
            return Ok(None);
        }
        Ok(Some(self.figment.extract_inner(key)?))
    }

    /// The underlying figment.
    pub fn figment(&self) -> &Figment {
        &self.figment
    }
}

/// Default factory for [`ROOT_CONFIG`]: loads from the default locations.
pub fn root_config_factory() -> ServiceFactory {
    ServiceFactory::builder(&ROOT_CONFIG).produce(|_ctx: ProduceContext| async {
        let figment = ConfigLoader::new().load_figment()?;
        Ok::<_, BoxError>(Arc::new(RootConfig::new(figment)))
    })
}

/// Binds [`ROOT_CONFIG`] to a fixed configuration.
pub fn root_config_instance(config: RootConfig) -> ServiceFactory {
    ServiceFactory::builder(&ROOT_CONFIG).instance(Arc::new(config))
}

#[distributed_slice(DEFAULT_SERVICE_FACTORIES)]
static ROOT_CONFIG_DEFAULT: fn() -> ServiceFactory = root_config_factory;

#[cfg(test)]
mod tests {
    use ingot_backend::{Backend, BackendPlugin, InitDescriptor};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greeter {
        name: String,
        times: u32,
    }

    fn sample() -> RootConfig {
        RootConfig::from_value(json!({
            "app": { "greeter": { "name": "ada", "times": 3 } }
        }))
    }

    #[test]
    fn test_typed_lookup() {
        let config = sample();
        assert!(config.has("app.greeter.name"));
        assert_eq!(config.get::<String>("app.greeter.name").unwrap(), "ada");
        assert_eq!(
            config.get::<Greeter>("app.greeter").unwrap(),
            Greeter {
                name: "ada".to_string(),
                times: 3
            }
        );
    }

    #[test]
    fn test_missing_and_mistyped_keys() {
        let config = sample();
        assert_eq!(config.get_optional::<u16>("app.port").unwrap(), None);
        assert!(matches!(
            config.get::<u16>("app.port"),
            Err(ConfigError::MissingKey { ref key }) if key == "app.port"
        ));
        assert!(matches!(
            config.get::<u32>("app.greeter.name"),
            Err(ConfigError::Extract(_))
        ));
        assert!(!RootConfig::empty().has("app"));
    }

    #[tokio::test]
    async fn test_plugins_read_the_bound_config() {
        let seen = Arc::new(Mutex::new(None));
        let out = Arc::clone(&seen);

        let backend = Backend::builder()
            .override_factory(root_config_instance(sample()))
            .build();
        backend
            .add(BackendPlugin::new("greeter", move |reg| {
                reg.register_init(InitDescriptor::builder().dep(&ROOT_CONFIG).init(
                    move |deps| async move {
                        let config = deps.get(&ROOT_CONFIG)?;
                        *out.lock() = Some(config.get::<u32>("app.greeter.times")?);
                        Ok(())
                    },
                ))?;
                Ok(())
            }))
            .unwrap();

        backend.start().await.unwrap();
        assert_eq!(*seen.lock(), Some(3));
    }
}
