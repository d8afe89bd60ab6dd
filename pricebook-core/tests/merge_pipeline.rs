//! End-to-end merge tests against real files in a scratch directory.

use pricebook_core::{
    merge_multi, merge_single, LoadStatus, MergeOutcome, PriceStore, PricebookConfig, RecordShape,
    StoreError, StoredPrice,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn config_in(dir: &Path) -> PricebookConfig {
    PricebookConfig {
        store_path: dir.join("history_prices.json"),
        batch_path: dir.join("temp_batch_input.json"),
        ..PricebookConfig::default()
    }
}

fn candle(date: &str, close: &str) -> Value {
    json!({
        "timestamp": format!("{date}T16:00:00.000Z"),
        "open": close, "high": close, "low": close,
        "close": close, "volume": "1000", "turnover": "0"
    })
}

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn read_store(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn corrupt_copies(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().contains(".corrupt-"))
        .collect()
}

#[test]
fn merging_the_same_batch_twice_leaves_identical_bytes() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "1"), candle("2022-01-04", "2")]));

    merge_single(&cfg, "A", &batch).unwrap();
    let first = fs::read(&cfg.store_path).unwrap();
    let report = merge_single(&cfg, "A", &batch).unwrap();
    let second = fs::read(&cfg.store_path).unwrap();

    assert_eq!(first, second);
    assert!(report.stats.is_noop());
}

#[test]
fn timestamps_become_calendar_date_keys() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "12.50")]));

    merge_single(&cfg, "A", &batch).unwrap();
    let store = read_store(&cfg.store_path);
    let keys: Vec<&String> = store["A"].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["2022-01-03"]);
}

#[test]
fn string_fields_are_stored_as_numbers() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    let batch = dir.path().join("a.json");
    write_json(
        &batch,
        &json!([{
            "timestamp": "2022-01-03T16:00:00.000Z",
            "close": "12.50", "open": "12.00", "high": "12.80", "low": "11.90",
            "volume": "100000", "turnover": "1250000"
        }]),
    );

    merge_single(&cfg, "A", &batch).unwrap();
    assert_eq!(
        read_store(&cfg.store_path)["A"]["2022-01-03"],
        json!({"close": 12.5, "open": 12.0, "high": 12.8, "low": 11.9, "volume": 100000.0})
    );
}

#[test]
fn batch_value_wins_for_overlapping_dates_only() {
    let dir = TempDir::new().unwrap();
    let cfg = PricebookConfig {
        record_shape: RecordShape::Close,
        ..config_in(dir.path())
    };
    write_json(
        &cfg.store_path,
        &json!({"A": {"2022-01-03": 100, "2022-01-04": 101}, "B": {"2022-01-03": 7}}),
    );
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "105")]));

    let report = merge_single(&cfg, "A", &batch).unwrap();
    assert_eq!(report.stats.replaced, 1);

    let store = read_store(&cfg.store_path);
    assert_eq!(store["A"]["2022-01-03"], json!(105.0));
    assert_eq!(store["A"]["2022-01-04"], json!(101.0));
    assert_eq!(store["B"]["2022-01-03"], json!(7.0));
}

#[test]
fn multi_symbol_batch_merges_every_symbol() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    write_json(&cfg.store_path, &json!({"OLD": {"2021-12-31": 1}}));
    write_json(
        &cfg.batch_path,
        &json!({
            "A": [candle("2022-01-03", "1"), candle("2022-01-04", "2"), candle("2022-01-05", "3")],
            "B": [candle("2022-01-03", "4"), candle("2022-01-04", "5")]
        }),
    );

    let MergeOutcome::Merged(report) = merge_multi(&cfg, None).unwrap() else {
        panic!("expected a merge");
    };
    assert_eq!(report.symbols_merged, 2);
    assert_eq!(report.total_symbols, 3);

    let store = PriceStore::load(&cfg.store_path).unwrap().store;
    assert_eq!(store.prices("A").unwrap().len(), 3);
    assert_eq!(store.prices("B").unwrap().len(), 2);
    assert_eq!(store.close_on("OLD", "2021-12-31"), Some(1.0));
}

#[test]
fn corrupt_store_is_replaced_and_kept_aside() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    fs::write(&cfg.store_path, "{\"A\": {\"2022-01-03\": 1").unwrap();
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "9")]));

    let report = merge_single(&cfg, "A", &batch).unwrap();
    assert!(report.store_recovered());
    assert!(report.store_written);

    assert_eq!(
        read_store(&cfg.store_path),
        json!({"A": {"2022-01-03": {"close": 9.0, "open": 9.0, "high": 9.0, "low": 9.0, "volume": 1000.0}}})
    );
    let copies = corrupt_copies(dir.path());
    assert_eq!(copies.len(), 1);
    assert_eq!(Some(copies[0].clone()), report.quarantined);
    assert_eq!(
        fs::read_to_string(&copies[0]).unwrap(),
        "{\"A\": {\"2022-01-03\": 1"
    );
}

#[test]
fn corrupt_store_without_backup_leaves_no_copy() {
    let dir = TempDir::new().unwrap();
    let cfg = PricebookConfig {
        backup_corrupt: false,
        ..config_in(dir.path())
    };
    fs::write(&cfg.store_path, "not json").unwrap();
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "9")]));

    let report = merge_single(&cfg, "A", &batch).unwrap();
    assert!(report.quarantined.is_none());
    assert!(corrupt_copies(dir.path()).is_empty());
    assert_eq!(PriceStore::load(&cfg.store_path).unwrap().status, LoadStatus::Loaded);
}

#[test]
fn bad_candles_are_skipped_and_the_rest_merged() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    let batch = dir.path().join("a.json");
    write_json(
        &batch,
        &json!([
            candle("2022-01-03", "1"),
            candle("2022-01-04", "2"),
            candle("2022-01-05", "abc"),
            candle("2022-01-06", "4"),
            candle("2022-01-07", "5"),
        ]),
    );

    let report = merge_single(&cfg, "A", &batch).unwrap();
    assert_eq!(report.candles_seen, 5);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].index, 2);

    let store = PriceStore::load(&cfg.store_path).unwrap().store;
    assert_eq!(store.prices("A").unwrap().len(), 4);
    assert!(store.get("A", "2022-01-05").is_none());
}

#[test]
fn missing_multi_batch_is_nothing_to_do() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    write_json(&cfg.store_path, &json!({"A": {"2022-01-03": 1}}));
    let before = fs::read(&cfg.store_path).unwrap();

    let outcome = merge_multi(&cfg, None).unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::NothingToDo {
            batch_path: cfg.batch_path.clone()
        }
    );
    assert_eq!(fs::read(&cfg.store_path).unwrap(), before);
}

#[test]
fn missing_multi_batch_does_not_create_a_store() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    merge_multi(&cfg, None).unwrap();
    assert!(!cfg.store_path.exists());
}

#[test]
fn missing_single_batch_is_an_error() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    let err = merge_single(&cfg, "A", &dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, StoreError::MissingInput { .. }));
    assert!(!cfg.store_path.exists());
}

#[test]
fn multi_batch_is_removed_after_success() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    write_json(&cfg.batch_path, &json!({"A": [candle("2022-01-03", "1")]}));

    let MergeOutcome::Merged(report) = merge_multi(&cfg, None).unwrap() else {
        panic!("expected a merge");
    };
    assert!(report.batch_removed);
    assert!(!cfg.batch_path.exists());
}

#[test]
fn batch_and_store_survive_a_rejected_batch() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    write_json(&cfg.store_path, &json!({"A": {"2022-01-03": 1}}));
    let before = fs::read(&cfg.store_path).unwrap();
    write_json(&cfg.batch_path, &json!([candle("2022-01-03", "1")]));

    let err = merge_multi(&cfg, None).unwrap_err();
    assert!(matches!(err, StoreError::InvalidBatchShape(_)));
    assert!(cfg.batch_path.exists());
    assert_eq!(fs::read(&cfg.store_path).unwrap(), before);
}

#[test]
fn unparseable_batch_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    fs::write(&cfg.batch_path, "{\"A\": [").unwrap();

    let err = merge_multi(&cfg, None).unwrap_err();
    assert!(matches!(err, StoreError::InvalidBatchShape(_)));
    assert!(cfg.batch_path.exists());
    assert!(!cfg.store_path.exists());
}

#[test]
fn single_batch_is_kept_unless_asked() {
    let dir = TempDir::new().unwrap();
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "1")]));

    let cfg = config_in(dir.path());
    assert!(!merge_single(&cfg, "A", &batch).unwrap().batch_removed);
    assert!(batch.exists());

    let cfg = PricebookConfig {
        delete_single_batch: true,
        ..cfg
    };
    assert!(merge_single(&cfg, "A", &batch).unwrap().batch_removed);
    assert!(!batch.exists());
}

#[test]
fn legacy_store_keeps_close_only_values_after_ohlcv_merge() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    fs::copy(fixture("legacy_store.json"), &cfg.store_path).unwrap();
    fs::copy(fixture("multi_batch.json"), &cfg.batch_path).unwrap();

    let MergeOutcome::Merged(report) = merge_multi(&cfg, None).unwrap() else {
        panic!("expected a merge");
    };
    assert_eq!(report.load_status, LoadStatus::Loaded);
    assert_eq!(report.stats.added, 5);
    assert_eq!(report.total_symbols, 3);

    let store = PriceStore::load(&cfg.store_path).unwrap().store;
    assert_eq!(store.get("AAPL.US", "2021-12-31"), Some(&StoredPrice::Close(177.57)));
    assert_eq!(store.close_on("AAPL.US", "2022-01-04"), Some(179.7));
    assert!(matches!(
        store.get("700.HK", "2022-01-03"),
        Some(StoredPrice::Ohlcv(r)) if r.volume == 11547021.0
    ));
    assert_eq!(store.close_on("9988.HK", "2021-12-31"), Some(95.0));

    let summary = store
        .summaries()
        .into_iter()
        .find(|s| s.symbol == "AAPL.US")
        .unwrap();
    assert_eq!(summary.entries, 5);
    assert_eq!(summary.legacy_entries, 2);
    assert_eq!(summary.first_date.as_deref(), Some("2021-12-30"));
    assert_eq!(summary.last_date.as_deref(), Some("2022-01-05"));
}

#[test]
fn no_temp_file_is_left_behind() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "1")]));
    merge_single(&cfg, "A", &batch).unwrap();

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
}

#[test]
fn null_entry_does_not_cost_the_rest_of_the_store() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    fs::write(
        &cfg.store_path,
        r#"{"700.HK": {"2022-01-03": 461.4, "2022-01-04": null}, "AAPL.US": {"2021-12-31": 177.57}}"#,
    )
    .unwrap();
    let batch = dir.path().join("9988.json");
    write_json(&batch, &json!([candle("2022-01-03", "115.1")]));

    let report = merge_single(&cfg, "9988.HK", &batch).unwrap();

    assert_eq!(report.load_status, LoadStatus::Loaded);
    assert!(report.quarantined.is_none());
    assert!(corrupt_copies(dir.path()).is_empty());
    assert_eq!(report.total_symbols, 3);
    assert_eq!(report.dropped_entries.len(), 1);
    assert_eq!(report.dropped_entries[0].symbol, "700.HK");
    assert_eq!(report.dropped_entries[0].date, "2022-01-04");

    let store = PriceStore::load(&cfg.store_path).unwrap().store;
    assert_eq!(store.close_on("700.HK", "2022-01-03"), Some(461.4));
    assert_eq!(store.get("700.HK", "2022-01-04"), None);
    assert_eq!(store.close_on("AAPL.US", "2021-12-31"), Some(177.57));
    assert_eq!(store.close_on("9988.HK", "2022-01-03"), Some(115.1));
}

#[test]
fn incomplete_ohlcv_entry_is_kept_as_close_only() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    fs::write(
        &cfg.store_path,
        r#"{"AAPL.US": {"2022-01-03": {"open": 177.83, "high": 182.88, "low": 177.71, "close": 182.01}}}"#,
    )
    .unwrap();
    let batch = dir.path().join("msft.json");
    write_json(&batch, &json!([candle("2022-01-03", "334.75")]));

    let report = merge_single(&cfg, "MSFT.US", &batch).unwrap();

    assert_eq!(report.load_status, LoadStatus::Loaded);
    assert!(report.dropped_entries.is_empty());
    assert_eq!(report.total_symbols, 2);
    let store = PriceStore::load(&cfg.store_path).unwrap().store;
    assert_eq!(store.get("AAPL.US", "2022-01-03"), Some(&StoredPrice::Close(182.01)));
}

#[test]
fn symbol_without_an_entry_object_still_recovers() {
    let dir = TempDir::new().unwrap();
    let cfg = config_in(dir.path());
    fs::write(&cfg.store_path, r#"{"AAPL.US": [177.57]}"#).unwrap();
    let batch = dir.path().join("a.json");
    write_json(&batch, &json!([candle("2022-01-03", "1")]));

    let report = merge_single(&cfg, "A", &batch).unwrap();

    assert!(matches!(report.load_status, LoadStatus::Recovered { .. }));
    assert_eq!(report.total_symbols, 1);
    assert_eq!(corrupt_copies(dir.path()).len(), 1);
}
