//! `gateway config validate` / `gateway config show`.

use gw_domain::config::{Config, ConfigSeverity};

/// Print every validation issue, prefixed by severity. Returns `true`
/// when no error-severity issue was found.
pub fn validate(config: &Config) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("config OK — no issues found");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();
    if errors > 0 {
        println!("{errors} error(s)");
        false
    } else {
        true
    }
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
