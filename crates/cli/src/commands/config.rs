use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
    /// `None` for file-only settings.
    env_key: Option<String>,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_key.as_deref(),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let transport = &config.transport;
    let shared_secret = if transport.shared_secret.is_some() { "<redacted>" } else { "<unset>" };

    let mut entries = vec![
        entry("database.url", config.database.url.clone()),
        entry("database.max_connections", config.database.max_connections.to_string()),
        entry("database.timeout_secs", config.database.timeout_secs.to_string()),
        entry("server.bind_address", config.server.bind_address.clone()),
        entry("server.port", config.server.port.to_string()),
        entry("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        entry("transport.mode", transport.mode.as_str().to_string()),
        entry("transport.queue_capacity", transport.queue_capacity.to_string()),
        entry("transport.max_redeliveries", transport.max_redeliveries.to_string()),
        Entry {
            key: "transport.redelivery_backoff_millis",
            value: transport.redelivery_backoff_millis.to_string(),
            env_key: None,
        },
        entry("transport.processing_base_url", optional(&transport.processing_base_url)),
        entry("transport.request_base_url", optional(&transport.request_base_url)),
        entry("transport.call_timeout_secs", transport.call_timeout_secs.to_string()),
        entry("transport.shared_secret", shared_secret.to_string()),
    ];

    let retry = &config.retry;
    for (max_attempts, backoff_millis, settings) in [
        ("retry.propagation.max_attempts", "retry.propagation.backoff_millis", retry.propagation),
        (
            "retry.result_delivery.max_attempts",
            "retry.result_delivery.backoff_millis",
            retry.result_delivery,
        ),
        ("retry.lock.max_attempts", "retry.lock.backoff_millis", retry.lock),
        ("retry.notification.max_attempts", "retry.notification.backoff_millis", retry.notification),
    ] {
        entries.push(entry(max_attempts, settings.max_attempts.to_string()));
        entries.push(entry(backoff_millis, settings.backoff_millis.to_string()));
    }

    entries.extend([
        entry("directory.base_url", optional(&config.directory.base_url)),
        entry("notification.base_url", optional(&config.notification.base_url)),
        entry("logging.level", config.logging.level.clone()),
        entry("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ]);
    entries
}

fn entry(key: &'static str, value: String) -> Entry {
    Entry { key, value, env_key: Some(env_key_for(key)) }
}

fn env_key_for(key_path: &str) -> String {
    format!("SIGNOFF_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "<unset>".to_string())
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("signoff.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/signoff.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, env_key_for, field_source};
    use std::path::Path;
    use toml::Value;

    #[test]
    fn env_keys_follow_section_and_field_names() {
        assert_eq!(
            env_key_for("transport.processing_base_url"),
            "SIGNOFF_TRANSPORT_PROCESSING_BASE_URL"
        );
        assert_eq!(
            env_key_for("retry.result_delivery.max_attempts"),
            "SIGNOFF_RETRY_RESULT_DELIVERY_MAX_ATTEMPTS"
        );
    }

    #[test]
    fn file_values_are_attributed_to_the_file() {
        let doc: Value = "[transport]\nmode = \"call\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "transport.mode"));
        assert!(!contains_path(&doc, "transport.queue_capacity"));

        let source =
            field_source("transport.mode", None, Some(&doc), Some(Path::new("signoff.toml")));
        assert_eq!(source, "file (signoff.toml)");
        assert_eq!(field_source("transport.queue_capacity", None, Some(&doc), None), "default");
    }
}
