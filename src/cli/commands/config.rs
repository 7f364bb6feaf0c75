//! `config`: print the effective configuration.

use anyhow::Result;

use crate::adapters::sqlite::redact_database_url;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

impl CommandOutput for Config {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&redacted(self)).unwrap_or_default()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(redacted(self)).unwrap_or_default()
    }
}

fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    shown.database.url = redact_database_url(&config.database.url);
    shown
}

pub fn execute(config: &Config, json_mode: bool) -> Result<()> {
    output(config, json_mode);
    Ok(())
}
