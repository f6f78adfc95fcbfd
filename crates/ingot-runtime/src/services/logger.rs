//! `core.logger`: a per-plugin logger backed by `tracing`.
//!
//! Every event carries a `plugin` field naming the consumer, so one
//! subscriber can filter or route plugins' output separately.

use std::fmt;
use std::sync::Arc;

use ingot_backend::services::PLUGIN_METADATA;
use ingot_core::{
    BoxError, DEFAULT_SERVICE_FACTORIES, PluginId, ProduceContext, ServiceFactory, ServiceRef,
    ServiceScope,
};
use linkme::distributed_slice;
use tracing::{debug, error, info, trace, warn};

use crate::config::LogLevel;

/// Logger of the consuming plugin.
pub static LOGGER: ServiceRef<dyn Logger> = ServiceRef::new("core.logger", ServiceScope::Plugin);

/// A logging sink handed to plugins.
pub trait Logger: Send + Sync + fmt::Debug {
    /// The plugin this logger reports for.
    fn plugin_id(&self) -> &PluginId;

    /// Emits `message` at `level`.
    fn log(&self, level: LogLevel, message: &str);

    /// Returns a logger that also tags events with `component`.
    fn child(&self, component: &str) -> Arc<dyn Logger>;

    /// Emits `message` at [`LogLevel::Trace`].
    fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    /// Emits `message` at [`LogLevel::Debug`].
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Emits `message` at [`LogLevel::Info`].
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Emits `message` at [`LogLevel::Warn`].
    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Emits `message` at [`LogLevel::Error`].
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// [`Logger`] emitting `tracing` events under the `ingot::plugin` target.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: PluginId,
    component: Option<Arc<str>>,
}

impl PluginLogger {
    pub fn new(plugin_id: PluginId) -> Self {
        Self {
            plugin_id,
            component: None,
        }
    }
}

macro_rules! emit {
    ($macro:ident, $self:ident, $message:ident) => {
        match &$self.component {
            Some(component) => $macro!(
                target: "ingot::plugin",
                plugin = %$self.plugin_id,
                component = %component,
                "{}",
                $message
            ),
            None => $macro!(target: "ingot::plugin", plugin = %$self.plugin_id, "{}", $message),
        }
    };
}

impl Logger for PluginLogger {
    fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => emit!(trace, self, message),
            LogLevel::Debug => emit!(debug, self, message),
            LogLevel::Info => emit!(info, self, message),
            LogLevel::Warn => emit!(warn, self, message),
            LogLevel::Error => emit!(error, self, message),
        }
    }

    fn child(&self, component: &str) -> Arc<dyn Logger> {
        let component = match &self.component {
            Some(parent) => format!("{parent}.{component}"),
            None => component.to_string(),
        };
        Arc::new(Self {
            plugin_id: self.plugin_id.clone(),
            component: Some(Arc::from(component)),
        })
    }
}

/// Default factory for [`LOGGER`].
pub fn logger_factory() -> ServiceFactory {
    ServiceFactory::builder(&LOGGER)
        .dep(&PLUGIN_METADATA)
        .produce(|ctx: ProduceContext| async move {
            let meta = ctx.deps().get(&PLUGIN_METADATA)?;
            let logger: Arc<dyn Logger> = Arc::new(PluginLogger::new(meta.plugin_id().clone()));
            Ok::<_, BoxError>(logger)
        })
}

#[distributed_slice(DEFAULT_SERVICE_FACTORIES)]
static LOGGER_DEFAULT: fn() -> ServiceFactory = logger_factory;

#[cfg(test)]
mod tests {
    use std::io;

    use ingot_backend::{Backend, BackendModule, BackendPlugin, InitDescriptor};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, captured.contents())
    }

    #[test]
    fn test_events_carry_plugin_and_component() {
        let logger = PluginLogger::new(PluginId::from("catalog"));
        let ((), output) = capture(|| {
            logger.info("ready");
            logger.child("refresh").child("github").warn("rate limited");
        });

        assert!(output.contains("INFO"));
        assert!(output.contains("plugin=catalog"));
        assert!(output.contains("ready"));
        assert!(output.contains("component=refresh.github"));
        assert!(output.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_logger_is_scoped_to_the_consumer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let backend = Backend::new();

        for id in ["search", "catalog"] {
            let seen = Arc::clone(&seen);
            backend
                .add(BackendPlugin::new(id, move |reg| {
                    reg.register_init(InitDescriptor::builder().dep(&LOGGER).init(
                        move |deps| async move {
                            let logger = deps.get(&LOGGER)?;
                            seen.lock().push(logger.plugin_id().to_string());
                            Ok(())
                        },
                    ))?;
                    Ok(())
                }))
                .unwrap();
        }

        let module_seen = Arc::clone(&seen);
        backend
            .add(BackendModule::new("catalog", "github", move |reg| {
                reg.register_init(InitDescriptor::builder().dep(&LOGGER).init(
                    move |deps| async move {
                        let logger = deps.get(&LOGGER)?;
                        module_seen.lock().push(format!("github@{}", logger.plugin_id()));
                        Ok(())
                    },
                ))?;
                Ok(())
            }))
            .unwrap();

        backend.start().await.unwrap();

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["catalog", "github@catalog", "search"]);
    }
}
