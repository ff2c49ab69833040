use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use servyy_core::config::{AppConfig, LoadOptions, CONFIG_FILE_CANDIDATES};
use toml::Value;

/// One reported setting: dotted key, rendered value and the env variables
/// that can set it, in precedence order.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Setting {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(
            setting.key,
            setting.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(setting.key, &setting.value, source));
    }
    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    vec![
        Setting::new("database.url", &config.database.url, &["SERVYY_DATABASE_URL"]),
        Setting::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SERVYY_DATABASE_MAX_CONNECTIONS"],
        ),
        Setting::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SERVYY_DATABASE_TIMEOUT_SECS"],
        ),
        Setting::new("llm.provider", config.llm.provider.as_str(), &["SERVYY_LLM_PROVIDER"]),
        Setting::new("llm.model", &config.llm.model, &["SERVYY_LLM_MODEL"]),
        Setting::new(
            "llm.base_url",
            config.llm_base_url().unwrap_or_else(|| "<unset>".to_string()),
            &["SERVYY_LLM_BASE_URL"],
        ),
        Setting::new(
            "llm.api_key",
            redact_secret(config.llm.api_key.as_ref()),
            &["SERVYY_LLM_API_KEY", "GROQ_API_KEY"],
        ),
        Setting::new(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["SERVYY_LLM_TIMEOUT_SECS"],
        ),
        Setting::new(
            "search.api_key",
            redact_secret(config.search.api_key.as_ref()),
            &["SERVYY_SEARCH_API_KEY", "SERPER_API_KEY", "SERPAPI_API_KEY"],
        ),
        Setting::new("search.base_url", &config.search.base_url, &["SERVYY_SEARCH_BASE_URL"]),
        Setting::new(
            "search.results",
            config.search.results.to_string(),
            &["SERVYY_SEARCH_RESULTS"],
        ),
        Setting::new(
            "gmail.credentials_path",
            config.gmail.credentials_path.display().to_string(),
            &["SERVYY_GMAIL_CREDENTIALS_PATH"],
        ),
        Setting::new(
            "gmail.token_path",
            config.gmail.token_path.display().to_string(),
            &["SERVYY_GMAIL_TOKEN_PATH"],
        ),
        Setting::new(
            "agent.history_window",
            config.agent.history_window.to_string(),
            &["SERVYY_AGENT_HISTORY_WINDOW"],
        ),
        Setting::new(
            "agent.max_tool_rounds",
            config.agent.max_tool_rounds.to_string(),
            &["SERVYY_AGENT_MAX_TOOL_ROUNDS"],
        ),
        Setting::new(
            "agent.max_stored_turns",
            config.agent.max_stored_turns.to_string(),
            &["SERVYY_AGENT_MAX_STORED_TURNS"],
        ),
        Setting::new(
            "agent.turn_timeout_secs",
            config.agent.turn_timeout_secs.to_string(),
            &["SERVYY_AGENT_TURN_TIMEOUT_SECS"],
        ),
        Setting::new(
            "server.bind_address",
            &config.server.bind_address,
            &["SERVYY_SERVER_BIND_ADDRESS"],
        ),
        Setting::new("server.port", config.server.port.to_string(), &["SERVYY_SERVER_PORT"]),
        Setting::new(
            "server.cors_allowed_origins",
            if config.server.cors_allowed_origins.is_empty() {
                "<any>".to_string()
            } else {
                config.server.cors_allowed_origins.join(",")
            },
            &["SERVYY_SERVER_CORS_ALLOWED_ORIGINS"],
        ),
        Setting::new(
            "logging.level",
            &config.logging.level,
            &["SERVYY_LOGGING_LEVEL", "SERVYY_LOG_LEVEL"],
        ),
        Setting::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["SERVYY_LOGGING_FORMAT", "SERVYY_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    CONFIG_FILE_CANDIDATES.iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|env_key| env::var_os(env_key).is_some()) {
        return format!("env ({env_key})");
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

/// Keeps a short key prefix such as `gsk_` so operators can tell keys apart.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once(['_', '-']) {
        if prefix.len() <= 4 {
            return format!("{prefix}_***");
        }
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_in_full() {
        let groq = SecretString::from("gsk_live_value".to_string());
        let opaque = SecretString::from("abcdef123456".to_string());

        assert_eq!(redact_secret(Some(&groq)), "gsk_***");
        assert_eq!(redact_secret(Some(&opaque)), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
    }

    #[test]
    fn dotted_paths_resolve_in_toml_documents() {
        let doc: Value = "[llm]\nmodel = \"x\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.api_key"));
        assert!(!contains_path(&doc, "search.results"));
    }
}
