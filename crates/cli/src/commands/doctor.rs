use secrecy::ExposeSecret;
use serde::Serialize;
use servyy_agent::email::gmail::AuthorizedUserToken;
use servyy_core::config::{AppConfig, LoadOptions};
use servyy_db::connect_with_settings;

use crate::commands::command_runtime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["database_connectivity", "llm_api_key", "search_api_key", "gmail_token"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_database_connectivity(&config));
            checks.push(check_llm_key(&config));
            checks.push(check_search_key(&config));
            checks.push(check_gmail_token(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in DEPENDENT_CHECKS {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    // Warnings mark optional capabilities that are off; they do not fail the report.
    let failed = checks
        .iter()
        .any(|check| matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped));
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match command_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::new("database_connectivity", CheckStatus::Fail, error),
    }
}

fn check_llm_key(config: &AppConfig) -> DoctorCheck {
    let provider = config.llm.provider;
    match &config.llm.api_key {
        Some(key) if !key.expose_secret().trim().is_empty() => DoctorCheck::new(
            "llm_api_key",
            CheckStatus::Pass,
            format!("{provider} key present for model `{}`", config.llm.model),
        ),
        _ if !provider.requires_api_key() => DoctorCheck::new(
            "llm_api_key",
            CheckStatus::Pass,
            format!("{provider} does not require a key"),
        ),
        _ => DoctorCheck::new(
            "llm_api_key",
            CheckStatus::Fail,
            format!("{provider} requires llm.api_key (SERVYY_LLM_API_KEY or GROQ_API_KEY)"),
        ),
    }
}

fn check_search_key(config: &AppConfig) -> DoctorCheck {
    if config.search.api_key.is_some() {
        DoctorCheck::new(
            "search_api_key",
            CheckStatus::Pass,
            format!("web search enabled via {}", config.search.base_url),
        )
    } else {
        DoctorCheck::new(
            "search_api_key",
            CheckStatus::Warn,
            "no search key configured; web search will report itself unavailable",
        )
    }
}

fn check_gmail_token(config: &AppConfig) -> DoctorCheck {
    let path = &config.gmail.token_path;
    let runtime = match command_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::new(
                "gmail_token",
                CheckStatus::Warn,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    match runtime.block_on(AuthorizedUserToken::load(path)) {
        Ok(token) if token.refresh_token.is_some() => DoctorCheck::new(
            "gmail_token",
            CheckStatus::Pass,
            format!("token at `{}` can be refreshed", path.display()),
        ),
        Ok(_) => DoctorCheck::new(
            "gmail_token",
            CheckStatus::Warn,
            format!("token at `{}` has no refresh token; re-run `servyy gmail-authorize`", path.display()),
        ),
        Err(error) => DoctorCheck::new(
            "gmail_token",
            CheckStatus::Warn,
            format!("email sending unavailable: {error}; run `servyy gmail-authorize`"),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
