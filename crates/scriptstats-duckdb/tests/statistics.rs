use std::sync::Arc;

use chrono::NaiveDate;
use scriptstats_core::event::Operation;
use scriptstats_core::repository::StatisticsRepository;
use scriptstats_duckdb::DuckDbBackend;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).expect("valid date")
}

fn repo() -> Arc<dyn StatisticsRepository> {
    Arc::new(DuckDbBackend::open_in_memory().expect("in-memory DuckDB"))
}

#[tokio::test]
async fn test_missing_rows_read_as_none() {
    let repo = repo();
    assert!(repo.find_script(1).await.expect("find").is_none());
    assert!(repo.find_script_date(1, day(1)).await.expect("find").is_none());
    assert!(repo.list_script_ids().await.expect("list").is_empty());
}

#[tokio::test]
async fn test_first_record_creates_row_with_one() {
    let repo = repo();
    repo.record(7, day(1), Operation::Download)
        .await
        .expect("record");

    let stats = repo.find_script(7).await.expect("find").expect("row");
    assert_eq!(stats.download, 1);
    assert_eq!(stats.update, 0);
    assert_eq!(stats.score, 0);

    let daily = repo
        .find_script_date(7, day(1))
        .await
        .expect("find")
        .expect("row");
    assert_eq!(daily.date, day(1));
    assert_eq!(daily.download, 1);
    assert_eq!(daily.update, 0);
}

#[tokio::test]
async fn test_records_accumulate_per_column_and_per_day() {
    let repo = repo();
    repo.record(7, day(1), Operation::Download).await.expect("record");
    repo.record(7, day(1), Operation::Download).await.expect("record");
    repo.record(7, day(1), Operation::Update).await.expect("record");
    repo.record(7, day(2), Operation::Download).await.expect("record");

    let stats = repo.find_script(7).await.expect("find").expect("row");
    assert_eq!((stats.download, stats.update), (3, 1));

    let first = repo.find_script_date(7, day(1)).await.expect("find").expect("row");
    assert_eq!((first.download, first.update), (2, 1));
    let second = repo.find_script_date(7, day(2)).await.expect("find").expect("row");
    assert_eq!((second.download, second.update), (1, 0));
}

#[tokio::test]
async fn test_view_has_no_durable_column() {
    let repo = repo();
    repo.record(3, day(1), Operation::View).await.expect("record");
    assert!(repo.find_script(3).await.expect("find").is_none());
}

#[tokio::test]
async fn test_concurrent_first_writers_both_land() {
    let repo = repo();
    let mut handles = Vec::new();
    for _ in 0..20 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            repo.record(11, day(5), Operation::Update).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("record");
    }
    let stats = repo.find_script(11).await.expect("find").expect("row");
    assert_eq!(stats.update, 20);
}

#[tokio::test]
async fn test_list_script_ids_is_sorted() {
    let repo = repo();
    for id in [9, 2, 5] {
        repo.record(id, day(1), Operation::Download).await.expect("record");
    }
    assert_eq!(repo.list_script_ids().await.expect("list"), vec![2, 5, 9]);
}

#[tokio::test]
async fn test_score_columns_are_read_back() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    db.record(4, day(1), Operation::Download).await.expect("record");
    {
        let conn = db.conn_for_test().await;
        conn.execute(
            "UPDATE script_statistics SET score = ?1, score_count = ?2 WHERE script_id = ?3",
            scriptstats_duckdb::duckdb::params![45i64, 10i64, 4i64],
        )
        .expect("seed score");
    }
    let stats = db.find_script(4).await.expect("find").expect("row");
    assert_eq!((stats.score, stats.score_count), (45, 10));
    assert_eq!(stats.download, 1);
}

#[tokio::test]
async fn test_ping() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    db.ping().await.expect("ping");
}
