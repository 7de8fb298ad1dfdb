use std::io::Write as _;

use ticketq::config::{Config, Policy};

// Environment variables are process-global, so everything touching them
// lives in one test.
#[test]
fn config_from_env_reads_vars_and_policy_file() {
    let mut file = scratch_file("policy.toml");
    writeln!(file.1, "claim_duration_secs = 600\nmax_retries = 5").unwrap();

    unsafe {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("TICKETQ_POLICY");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("DATABASE_URL", "sqlite::memory:");
        std::env::set_var("TICKETQ_POLICY", &file.0);
        std::env::remove_var("LOG_LEVEL");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.log_level, "info");
    assert_eq!(config.policy.claim_duration(), chrono::Duration::minutes(10));
    assert_eq!(config.policy.max_retries, 5);
    assert_eq!(config.policy.default_worker_id, "agent");

    unsafe {
        std::env::set_var("TICKETQ_POLICY", "/nonexistent/policy.toml");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("TICKETQ_POLICY");
    }
    let _ = std::fs::remove_file(&file.0);
}

#[test]
fn policy_defaults_match_documented_values() {
    let policy = Policy::default();
    assert_eq!(policy.claim_duration(), chrono::Duration::minutes(30));
    assert_eq!(policy.sweep_interval(), std::time::Duration::from_secs(60));
    assert_eq!(policy.max_retries, 3);
}

fn scratch_file(name: &str) -> (std::path::PathBuf, std::fs::File) {
    let dir = std::env::temp_dir().join(format!("ticketq-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    (path, file)
}
