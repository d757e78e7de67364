//! Tests for the JSON-file alarm source.

use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use chime_alarms::{AlarmError, AlarmSource, FileAlarmStore};

const DOCUMENT: &str = r#"{
  "alarms": [
    {
      "id": "1",
      "cron": "0 9 * * 1-5",
      "subject": "Standup",
      "message": "Standup starts now",
      "subscriptions": [
        { "recipient_id": "10", "address": "a@example.com", "deactivate_code": "code-a" },
        { "recipient_id": "11", "address": "b@example.com", "active": false, "deactivate_code": "code-b" }
      ]
    },
    {
      "id": "2",
      "cron_expression": "*/30 * * * * *",
      "subject": "Heartbeat",
      "message": "Still here"
    }
  ]
}"#;

fn write_document(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn lists_every_definition() {
    let file = write_document(DOCUMENT);
    let store = FileAlarmStore::new(file.path());

    let alarms = store.list_all().await.unwrap();
    let ids: Vec<&str> = alarms.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(alarms[0].cron_expression, "0 9 * * 1-5");
    assert_eq!(alarms[1].cron_expression, "*/30 * * * * *");
}

#[tokio::test]
async fn delivery_contains_only_active_subscriptions() {
    let file = write_document(DOCUMENT);
    let store = FileAlarmStore::new(file.path());

    let delivery = store.get_alarm("1").await.unwrap().unwrap();
    assert_eq!(delivery.alarm.subject, "Standup");
    assert_eq!(delivery.subscriptions.len(), 1);
    assert_eq!(delivery.subscriptions[0].recipient.address, "a@example.com");
    assert_eq!(delivery.subscriptions[0].deactivate_code, "code-a");
    assert_eq!(delivery.subscriptions[0].alarm_id, "1");
}

#[tokio::test]
async fn missing_alarm_is_none() {
    let file = write_document(DOCUMENT);
    let store = FileAlarmStore::new(file.path());
    assert!(store.get_alarm("3").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_id_resolves_to_last_entry() {
    let file = write_document(
        r#"{
  "alarms": [
    { "id": "1", "cron": "0 9 * * *", "subject": "old", "message": "old message" },
    {
      "id": "1",
      "cron": "0 10 * * *",
      "subject": "new",
      "message": "new message",
      "subscriptions": [
        { "recipient_id": "10", "address": "a@example.com", "deactivate_code": "code-a" }
      ]
    }
  ]
}"#,
    );
    let store = FileAlarmStore::new(file.path());

    let listed = store.list_all().await.unwrap();
    let last = listed.last().unwrap();
    let delivery = store.get_alarm("1").await.unwrap().unwrap();

    assert_eq!(delivery.alarm.subject, "new");
    assert_eq!(&delivery.alarm, last);
    assert_eq!(delivery.subscriptions.len(), 1);
}

#[tokio::test]
async fn edits_are_seen_on_next_read() {
    let file = write_document(DOCUMENT);
    let store = FileAlarmStore::new(file.path());
    assert_eq!(store.list_all().await.unwrap().len(), 2);

    std::fs::write(file.path(), r#"{ "alarms": [] }"#).unwrap();
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileAlarmStore::new(dir.path().join("absent.json"));
    assert!(matches!(
        store.list_all().await,
        Err(AlarmError::Io { .. })
    ));
}

#[tokio::test]
async fn malformed_document_is_an_error() {
    let file = write_document("{ not json");
    let store = FileAlarmStore::new(file.path());
    assert!(matches!(store.list_all().await, Err(AlarmError::Json(_))));
}
