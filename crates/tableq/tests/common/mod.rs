use std::path::PathBuf;
use tableq::store::BackendType;
use tableq::{Config, Queue};

/// DSN for an integration test.
///
/// `TABLEQ_TEST_DSN` points the suite at a shared server (postgres, mysql); each test
/// then uses its own table. Without it every test gets a fresh SQLite file.
#[allow(dead_code)]
pub fn test_dsn(test_name: &str) -> String {
    if let Ok(dsn) = std::env::var("TABLEQ_TEST_DSN") {
        BackendType::detect(&dsn).unwrap_or_else(|e| panic!("{}", e));
        return dsn;
    }

    let dir = option_env!("CARGO_TARGET_TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let path = dir.join(format!("tableq_{}_{}.db", test_name, uuid::Uuid::new_v4()));
    format!("sqlite://{}?mode=rwc", path.display())
}

/// Config with a one-second poll interval and short default timeout.
#[allow(dead_code)]
pub fn test_config(dsn: &str) -> Config {
    Config::from_dsn(dsn)
        .with_default_timeout(2)
        .with_poll_interval(1)
}

/// Open queue `name` and give it an empty table.
#[allow(dead_code)]
pub async fn fresh_queue(name: &str, dsn: &str) -> Queue {
    let mut queue = tableq::queue(name, &test_config(dsn))
        .await
        .expect("Failed to open queue");
    queue.flush().await.expect("Failed to flush queue");
    queue
}
