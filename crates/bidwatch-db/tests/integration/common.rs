use std::time::Duration;

use bidwatch_db::{Database, DatabaseConfig};
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

const READY_ATTEMPTS: u32 = 30;

/// Starts PostgreSQL 16 in a container and opens a migrated [`Database`].
///
/// Keep the returned container alive for the whole test; dropping it stops
/// the server.
pub async fn setup_test_db() -> (Database, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "bidwatch_test")
        .start()
        .await
        .expect("postgres container should start");

    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("mapped postgres port");
    let config = DatabaseConfig::new(format!(
        "postgresql://postgres:postgres@{host}:{port}/bidwatch_test"
    ))
    .with_max_connections(2);

    // the ready message can precede the port accepting connections
    let mut attempt = 0;
    let database = loop {
        attempt += 1;
        match Database::open(&config).await {
            Ok(db) => break db,
            Err(e) if attempt >= READY_ATTEMPTS => {
                panic!("snapshot database not reachable after {attempt} attempts: {e}")
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    };

    (database, container)
}
