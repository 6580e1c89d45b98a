use propbot_core::config::{AppConfig, LoadOptions};
use propbot_db::{connect_from_config, migrations};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
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
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const CONFIG_DEPENDENT_CHECKS: &[&str] = &[
    "telegram_credentials",
    "whatsapp_credentials",
    "llm_provider",
    "transcription",
    "email_dispatch",
    "internal_notify",
    "database_connectivity",
    "schema_version",
];

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_telegram(&config));
            checks.push(check_whatsapp(&config));
            checks.push(check_llm(&config));
            checks.push(check_transcription(&config));
            checks.push(check_email(&config));
            checks.push(check_internal_notify(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(CONFIG_DEPENDENT_CHECKS.iter().map(|name| {
                DoctorCheck::skipped(*name, "skipped because configuration did not load")
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_telegram(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "telegram_credentials";
    if !config.telegram.enabled {
        return DoctorCheck::skipped(NAME, "telegram channel disabled");
    }

    // Bot API tokens look like `<bot id>:<secret>`.
    let token = config.telegram.bot_token.expose_secret().trim();
    match token.split_once(':') {
        Some((bot_id, secret))
            if !bot_id.is_empty()
                && bot_id.chars().all(|ch| ch.is_ascii_digit())
                && !secret.is_empty() =>
        {
            DoctorCheck::pass(
                NAME,
                format!(
                    "bot {bot_id} ({}) via {}",
                    config.telegram.flow.as_str(),
                    config.telegram.api_base_url
                ),
            )
        }
        _ => DoctorCheck::fail(
            NAME,
            format!("bot token {} is not in `<bot id>:<secret>` form", redact_token(token)),
        ),
    }
}

fn check_whatsapp(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "whatsapp_credentials";
    if !config.whatsapp.enabled {
        return DoctorCheck::skipped(NAME, "whatsapp channel disabled");
    }

    let sid = config.whatsapp.account_sid.trim();
    if !sid.starts_with("AC") {
        return DoctorCheck::fail(
            NAME,
            format!("account sid {} should start with `AC`", redact_token(sid)),
        );
    }
    DoctorCheck::pass(
        NAME,
        format!(
            "account {} sending from {} ({})",
            redact_token(sid),
            config.whatsapp.from_number,
            config.whatsapp.flow.as_str()
        ),
    )
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    let endpoint = config.llm.base_url.as_deref().unwrap_or("provider default");
    DoctorCheck::pass(
        "llm_provider",
        format!(
            "{:?} model `{}` at {endpoint}, timeout {}s, {} retr{}",
            config.llm.provider,
            config.llm.model,
            config.llm.timeout_secs,
            config.llm.max_retries,
            if config.llm.max_retries == 1 { "y" } else { "ies" }
        ),
    )
}

fn check_transcription(config: &AppConfig) -> DoctorCheck {
    if !config.transcription.enabled {
        return DoctorCheck::skipped("transcription", "voice transcription disabled");
    }
    DoctorCheck::pass(
        "transcription",
        format!(
            "model `{}` ({}) at {}",
            config.transcription.model, config.transcription.language, config.transcription.base_url
        ),
    )
}

fn check_email(config: &AppConfig) -> DoctorCheck {
    match config.email.endpoint.as_deref() {
        Some(endpoint) => {
            DoctorCheck::pass("email_dispatch", format!("dispatching through {endpoint}"))
        }
        None => {
            DoctorCheck::skipped("email_dispatch", "no email endpoint configured, sends will fail")
        }
    }
}

fn check_internal_notify(config: &AppConfig) -> DoctorCheck {
    match config.server.internal_token.as_ref() {
        Some(token) if !token.expose_secret().trim().is_empty() => {
            DoctorCheck::pass("internal_notify", "bearer token configured")
        }
        _ => {
            DoctorCheck::skipped("internal_notify", "server.internal_token unset, endpoint disabled")
        }
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped(
                    "schema_version",
                    "skipped because the database is unreachable",
                ),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped(
                        "schema_version",
                        "skipped because the database is unreachable",
                    ),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        );
        let schema = match migrations::pending_versions(&pool).await {
            Ok(pending) if pending.is_empty() => {
                DoctorCheck::pass("schema_version", "schema up to date")
            }
            Ok(pending) => DoctorCheck::fail(
                "schema_version",
                format!("{} pending migration(s) {pending:?}; run `propbot migrate`", pending.len()),
            ),
            Err(error) => DoctorCheck::fail(
                "schema_version",
                format!("could not read migration ledger: {error}"),
            ),
        };
        pool.close().await;

        vec![connectivity, schema]
    })
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.get(..4) {
        Some(prefix) if trimmed.len() > 8 => format!("{prefix}***"),
        _ => "<redacted>".to_string(),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
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

#[cfg(test)]
mod tests {
    use super::redact_token;

    #[test]
    fn redaction_keeps_only_a_short_prefix() {
        assert_eq!(redact_token("ACabcdef1234567890"), "ACab***");
        assert_eq!(redact_token("short"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }
}
