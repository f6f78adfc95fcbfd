//! Greetings Example
//!
//! The `greeter` plugin publishes a `greetings` extension point. The
//! `greeter/english` and `greeter/french` modules contribute to it while
//! registering, and the plugin's init reads the frozen list.
//!
//! ```text
//! register:  greeter ──publishes──▶ greetings ◀──contributes── english, french
//! init:      english, french (nothing to do) ──▶ greeter reads ["hello", "bonjour"]
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package greetings -- --once
//! INGOT_APP__GREETER__AUDIENCE=ferris cargo run --package greetings
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ingot::prelude::*;
use tracing::info;

// ============================================================================
// Extension point
// ============================================================================

/// Greetings collected from the modules of `greeter`.
#[derive(Debug, Default)]
struct Greetings {
    items: Vec<String>,
}

impl Greetings {
    fn add_greeting(&mut self, greeting: impl Into<String>) {
        self.items.push(greeting.into());
    }

    fn items(&self) -> &[String] {
        &self.items
    }
}

static GREETINGS: ExtensionPointRef<Greetings> = ExtensionPointRef::new("greeter.greetings");

// ============================================================================
// Plugin and modules
// ============================================================================

fn greeter_plugin() -> BackendPlugin {
    BackendPlugin::new("greeter", |reg| {
        reg.register_extension_point(&GREETINGS, Greetings::default())?;
        reg.register_init(
            InitDescriptor::builder()
                .dep(&LOGGER)
                .dep(&ROOT_CONFIG)
                .dep(&LIFECYCLE)
                .extension(&GREETINGS)
                .init(|deps| async move {
                    let logger = deps.get(&LOGGER)?;
                    let audience = deps
                        .get(&ROOT_CONFIG)?
                        .get_optional::<String>("app.greeter.audience")?
                        .unwrap_or_else(|| "world".to_string());

                    for greeting in deps.extension(&GREETINGS)?.items() {
                        logger.info(&format!("{greeting}, {audience}!"));
                    }

                    let farewell = logger.child("farewell");
                    deps.get(&LIFECYCLE)?.add_shutdown_hook(move || async move {
                        farewell.info(&format!("goodbye, {audience}"));
                        Ok(())
                    });
                    Ok(())
                }),
        )?;
        Ok(())
    })
}

fn language_module(module_id: &'static str, greeting: &'static str) -> BackendModule {
    BackendModule::new("greeter", module_id, move |reg| {
        reg.extension_point(&GREETINGS)?
            .update(|greetings| greetings.add_greeting(greeting))?;
        Ok(())
    })
}

// ============================================================================
// Main
// ============================================================================

#[derive(Debug, Parser)]
#[command(about = "Greets through a plugin extension point")]
struct Args {
    /// Configuration file, instead of searching for `ingot.toml`.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop right after startup instead of waiting for Ctrl+C.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = IngotRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let runtime = builder.build()?;

    runtime.add(greeter_plugin())?;
    runtime.add(language_module("english", "hello"))?;
    runtime.add(language_module("french", "bonjour"))?;

    if args.once {
        runtime.run_until(async {}).await?;
    } else {
        runtime.run().await?;
    }

    info!("Greetings demo exited");
    Ok(())
}
