use systemair_save_driver::store::{JsonFileStore, ScopedStore, Store};
use std::collections::BTreeMap;
use std::sync::Arc;

#[test]
fn state_survives_reopening() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("state").join("driver.json");
    {
        let store = Arc::new(JsonFileStore::open(path.clone()).unwrap()) as Arc<dyn Store>;
        let unit = ScopedStore::new(Arc::clone(&store), "unit-a");
        let alarms = BTreeMap::from([("REG_ALARM_FILTER_ALARM".to_string(), "active".to_string())]);
        unit.save("alarms", &alarms).unwrap();
        assert!(!path.with_extension("tmp").exists());
    }
    let store = Arc::new(JsonFileStore::open(path.clone()).unwrap()) as Arc<dyn Store>;
    let unit = ScopedStore::new(Arc::clone(&store), "unit-a");
    let other = ScopedStore::new(store, "unit-b");
    let alarms: Option<BTreeMap<String, String>> = unit.load("alarms").unwrap();
    assert_eq!(alarms.unwrap()["REG_ALARM_FILTER_ALARM"], "active");
    assert!(!other.contains("alarms").unwrap());
}

#[test]
fn missing_files_start_empty() {
    let directory = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(directory.path().join("absent.json")).unwrap();
    assert_eq!(store.get("anything").unwrap(), None);
}

#[test]
fn corrupt_files_are_reported() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("driver.json");
    std::fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(
        JsonFileStore::open(path),
        Err(systemair_save_driver::store::Error::Parse(..))
    ));
}

#[test]
fn failed_writes_leave_nothing_behind() {
    let directory = tempfile::tempdir().unwrap();
    let blocker = directory.path().join("state");
    let path = blocker.join("driver.json");
    let store = JsonFileStore::open(path.clone()).unwrap();
    // A file where the directory should go.
    std::fs::write(&blocker, b"").unwrap();
    assert!(matches!(
        store.set("unit-a/alarms", serde_json::json!({"REG_ALARM_FILTER_ALARM": "active"})),
        Err(systemair_save_driver::store::Error::Write(..))
    ));
    assert_eq!(store.get("unit-a/alarms").unwrap(), None);

    std::fs::remove_file(&blocker).unwrap();
    store.set("unit-a/functions", serde_json::json!({})).unwrap();
    let reopened = JsonFileStore::open(path).unwrap();
    assert_eq!(reopened.get("unit-a/alarms").unwrap(), None);
    assert_eq!(reopened.get("unit-a/functions").unwrap(), Some(serde_json::json!({})));
}
