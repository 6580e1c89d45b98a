use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use propbot_cli::commands::{doctor, migrate, sessions};
use propbot_core::config::LoadOptions;
use propbot_core::{Channel, Session, SessionKey};
use propbot_db::{connect_with_settings, migrations, SessionStore, SqlSessionStore};
use serde_json::Value;
use tempfile::TempDir;

const VALID_TOKEN: &str = "123456789:AAF-test-token";

struct Workspace {
    dir: TempDir,
    config_path: PathBuf,
}

impl Workspace {
    fn new(telegram_token: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("propbot.toml");
        let database = dir.path().join("propbot.db");
        fs::write(
            &config_path,
            format!(
                "[database]\nurl = \"sqlite://{}\"\nmax_connections = 1\n\n\
                 [telegram]\nbot_token = \"{telegram_token}\"\n",
                database.display()
            ),
        )
        .expect("write config");
        Self { dir, config_path }
    }

    fn options(&self) -> LoadOptions {
        LoadOptions {
            config_path: Some(self.config_path.clone()),
            require_file: true,
            ..LoadOptions::default()
        }
    }

    fn database_url(&self) -> String {
        format!("sqlite://{}", self.dir.path().join("propbot.db").display())
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn check<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("doctor report should contain `{name}`"))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime")
}

#[test]
fn migrate_applies_schema_once() {
    let workspace = Workspace::new(VALID_TOKEN);

    let first = migrate::run(workspace.options());
    assert_eq!(first.exit_code, 0, "expected successful migrate run: {}", first.output);
    let payload = parse_payload(&first.output);
    assert_eq!(payload["command"], "migrate");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["message"], "applied 1 pending migration(s)");

    let second = migrate::run(workspace.options());
    assert_eq!(second.exit_code, 0);
    assert_eq!(parse_payload(&second.output)["message"], "schema already up to date");
}

#[test]
fn migrate_returns_config_failure_for_missing_file() {
    let options = LoadOptions {
        config_path: Some(Path::new("/nonexistent/propbot.toml").to_path_buf()),
        require_file: true,
        ..LoadOptions::default()
    };

    let result = migrate::run(options);

    assert_eq!(result.exit_code, 2, "expected config validation failure code");
    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "config_validation");
}

#[test]
fn doctor_reports_pending_schema_until_migrated() {
    let workspace = Workspace::new(VALID_TOKEN);

    let before = doctor::run(workspace.options(), true);
    assert_eq!(before.exit_code, 1);
    let report = parse_payload(&before.output);
    assert_eq!(report["overall_status"], "fail");
    assert_eq!(check(&report, "database_connectivity")["status"], "pass");
    assert_eq!(check(&report, "schema_version")["status"], "fail");
    assert_eq!(check(&report, "whatsapp_credentials")["status"], "skipped");

    assert_eq!(migrate::run(workspace.options()).exit_code, 0);

    let after = doctor::run(workspace.options(), true);
    assert_eq!(after.exit_code, 0, "doctor should pass after migrate: {}", after.output);
    let report = parse_payload(&after.output);
    assert_eq!(report["overall_status"], "pass");
    assert_eq!(check(&report, "telegram_credentials")["status"], "pass");
}

#[test]
fn doctor_flags_malformed_telegram_token_without_leaking_it() {
    let workspace = Workspace::new("not-a-bot-token");

    let result = doctor::run(workspace.options(), false);

    assert_eq!(result.exit_code, 1);
    assert!(result.output.contains("- [fail] telegram_credentials"));
    assert!(!result.output.contains("not-a-bot-token"));
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    let workspace = Workspace::new("   ");

    let result = doctor::run(workspace.options(), true);

    let report = parse_payload(&result.output);
    assert_eq!(check(&report, "config_validation")["status"], "fail");
    assert_eq!(check(&report, "database_connectivity")["status"], "skipped");
}

#[test]
fn sessions_prune_deletes_only_expired_rows() {
    let workspace = Workspace::new(VALID_TOKEN);
    assert_eq!(migrate::run(workspace.options()).exit_code, 0);

    runtime().block_on(async {
        let pool = connect_with_settings(&workspace.database_url(), 1, 5).await.expect("connect");
        let store = SqlSessionStore::new(pool.clone(), Duration::hours(24));
        let stale_at = Utc::now() - Duration::hours(48);
        let now = Utc::now();

        let stale = SessionKey::new(Channel::Telegram, "5001");
        store
            .save(Session::new(stale, stale_at, Duration::hours(24)), stale_at)
            .await
            .expect("save stale");
        let live = SessionKey::new(Channel::Whatsapp, "+5511999999999");
        store.save(Session::new(live, now, Duration::hours(24)), now).await.expect("save live");
        pool.close().await;
    });

    let result = sessions::prune(workspace.options());

    assert_eq!(result.exit_code, 0, "prune should succeed: {}", result.output);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "sessions prune");
    assert_eq!(payload["message"], "pruned 1 expired session(s)");

    runtime().block_on(async {
        let pool = connect_with_settings(&workspace.database_url(), 1, 5).await.expect("connect");
        assert_eq!(remaining_sessions(&pool).await, 1);
        pool.close().await;
    });
}

#[test]
fn sessions_prune_requires_migrated_schema() {
    let workspace = Workspace::new(VALID_TOKEN);

    let result = sessions::prune(workspace.options());

    assert_eq!(result.exit_code, 5);
    assert_eq!(parse_payload(&result.output)["error_class"], "schema_outdated");
}

async fn remaining_sessions(pool: &propbot_db::DbPool) -> usize {
    let pending = migrations::pending_versions(pool).await.expect("ledger");
    assert!(pending.is_empty());
    let store = SqlSessionStore::new(pool.clone(), Duration::hours(24));
    let live = store
        .load(&SessionKey::new(Channel::Whatsapp, "+5511999999999"), Utc::now())
        .await
        .expect("load live");
    let stale = store
        .load(&SessionKey::new(Channel::Telegram, "5001"), Utc::now())
        .await
        .expect("load stale");
    [live, stale].iter().filter(|session| session.is_some()).count()
}
