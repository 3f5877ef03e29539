use bidwatch_core::models::Listing;
use bidwatch_core::traits::SnapshotStore;

use crate::integration::common::setup_test_db;

fn listing(id: &str, status: &str) -> Listing {
    Listing::new(
        id,
        format!("Solicitation {id}"),
        "Department of General Services",
        "IT",
        status,
        format!("https://portal.test/Procurement_Details.aspx?id={id}"),
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn empty_table_loads_empty_snapshot() {
    let (db, _container) = setup_test_db().await;
    let store = db.snapshot_store();

    assert!(store.load().await.unwrap().is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn save_and_load_preserves_order() {
    let (db, _container) = setup_test_db().await;
    let store = db.snapshot_store();

    let snapshot = vec![
        listing("300", "Open"),
        listing("100", "Closed").with_description(Some("Cloud migration services".into())),
        listing("200", "Open"),
    ];
    store.save(&snapshot).await.unwrap();

    assert_eq!(store.load().await.unwrap(), snapshot);
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn save_replaces_whole_snapshot() {
    let (db, _container) = setup_test_db().await;
    let store = db.snapshot_store();

    store
        .save(&[listing("1", "Open"), listing("2", "Open")])
        .await
        .unwrap();
    store.save(&[listing("2", "Awarded")]).await.unwrap();

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].status, "Awarded");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn failed_save_keeps_previous_snapshot() {
    let (db, _container) = setup_test_db().await;
    let store = db.snapshot_store();

    store.save(&[listing("1", "Open")]).await.unwrap();
    // duplicate primary key aborts the transaction
    let err = store
        .save(&[listing("9", "Open"), listing("9", "Open")])
        .await
        .unwrap_err();
    assert!(matches!(err, bidwatch_core::AppError::DatabaseError(_)));

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded, vec![listing("1", "Open")]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn migrations_are_idempotent() {
    let (db, _container) = setup_test_db().await;
    db.migrate().await.unwrap();
}
