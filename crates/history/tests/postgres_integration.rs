//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p history --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{FlowId, SagaKey};
use futures_util::StreamExt;
use history::{
    HistoryEntry, HistoryKind, HistoryQuery, HistoryRecorder, HistoryStore, HistoryStoreExt,
    PostgresHistoryStore, spawn_writer,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_flow_history_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresHistoryStore {
    let info = get_container_info().await;
    let store = PostgresHistoryStore::connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE flow_history")
        .execute(store.pool())
        .await
        .unwrap();

    store
}

fn entry(key: &str, flow: &str, kind: HistoryKind, action: &str) -> HistoryEntry {
    HistoryEntry::builder()
        .saga_key(SagaKey::new(key))
        .flow_id(FlowId::new(flow))
        .kind(kind)
        .action(action)
        .details("switch 00:00:00:00:00:00:00:01")
        .try_build()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn append_and_read_saga_trail() {
    let store = get_test_store().await;
    store
        .append(vec![
            entry("k1", "F1", HistoryKind::Event, "Flow update started"),
            entry("k1", "F1", HistoryKind::Action, "Flow was validated successfully"),
        ])
        .await
        .unwrap();

    let trail = store.entries_for_saga(&SagaKey::new("k1")).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].kind, HistoryKind::Event);
    assert_eq!(trail[1].action, "Flow was validated successfully");
    assert_eq!(
        trail[1].details.as_deref(),
        Some("switch 00:00:00:00:00:00:00:01")
    );
}

#[tokio::test]
#[serial]
async fn query_by_flow_and_kind() {
    let store = get_test_store().await;
    store
        .append(vec![
            entry("k1", "F1", HistoryKind::Action, "a"),
            entry("k2", "F1", HistoryKind::Error, "b"),
            entry("k3", "F2", HistoryKind::Error, "c"),
        ])
        .await
        .unwrap();

    let flow_trail = store.entries_for_flow(&FlowId::new("F1")).await.unwrap();
    assert_eq!(flow_trail.len(), 2);

    let errors = store
        .query(HistoryQuery::for_flow(FlowId::new("F1")).kind(HistoryKind::Error))
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action, "b");
}

#[tokio::test]
#[serial]
async fn stream_all_returns_everything() {
    let store = get_test_store().await;
    for i in 0..3 {
        store
            .append_entry(entry("k1", "F1", HistoryKind::Action, &format!("{i}")))
            .await
            .unwrap();
    }

    let stream = store.stream_all().await.unwrap();
    let all: Vec<_> = stream.collect().await;
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|e| e.is_ok()));
}

#[tokio::test]
#[serial]
async fn background_writer_persists_recorded_entries() {
    let store = get_test_store().await;
    let (recorder, handle) = spawn_writer(Arc::new(store.clone()));

    recorder.record(entry("k9", "F9", HistoryKind::Action, "Resources allocated"));
    drop(recorder);
    handle.await.unwrap();

    let trail = store.entries_for_saga(&SagaKey::new("k9")).await.unwrap();
    assert_eq!(trail.len(), 1);
}
