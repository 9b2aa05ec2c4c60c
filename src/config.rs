use std::sync::LazyLock;

use anyhow::Context;
use media_bus::recorder::RecorderConfig;

/// Environment variable naming a JSON file with recorder settings.
pub const CONFIG_ENV: &str = "TEE_REC_CONFIG";

fn load() -> anyhow::Result<RecorderConfig> {
    let Ok(path) = std::env::var(CONFIG_ENV) else {
        return Ok(RecorderConfig::default());
    };
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))
}

pub fn config() -> &'static RecorderConfig {
    static CONFIG: LazyLock<RecorderConfig> = LazyLock::new(|| {
        load().unwrap_or_else(|e| {
            eprintln!("Error loading configuration: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}
