use std::sync::Arc;

use esui::{ConcurrencyMode, Esui, JsonlEventLog};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> Esui {
    Esui::builder()
        .event_log(Arc::new(JsonlEventLog::new(dir.path())))
        .concurrency(ConcurrencyMode::Optimistic)
        .build()
        .unwrap()
}

#[tokio::test]
async fn state_survives_reopening_the_directory() {
    let dir = TempDir::new().unwrap();

    let id = {
        let engine = engine(&dir);
        let id = engine.create_entity("product").await.unwrap();
        engine.add_event_to_entity(&id, "product_created").await.unwrap();
        engine
            .add_attribute(&id, "product_created", "price", "float")
            .await
            .unwrap();
        id
    };

    let reopened = engine(&dir);
    let folded = reopened.load_entity(&id).await.unwrap();
    assert_eq!(folded.state.name, "product");
    assert_eq!(
        folded.state.event("product_created").unwrap().attributes["price"],
        "float"
    );
    assert_eq!(folded.version, 3);
    assert!(folded.skipped.is_empty());

    let log = JsonlEventLog::new(dir.path());
    assert_eq!(log.layout().list_streams("entity").unwrap(), vec![id]);
}

#[tokio::test]
async fn corrupt_payload_on_disk_is_skipped() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let id = engine.create_projection("orders").await.unwrap();
    engine.create_table(&id, "t1").await.unwrap();

    let stream = esui::StreamLayout::new(dir.path())
        .stream_dir("projection", &id)
        .unwrap();
    {
        let mut writer = eventfold::EventWriter::open(&stream).unwrap();
        let bad = eventfold::Event::new("column_added", serde_json::json!({"table_name": 7}))
            .with_meta(serde_json::json!({
                "event_id": "bad-1",
                "aggregate_id": id,
                "aggregate_name": "projection",
            }));
        writer.append(&bad).unwrap();
    }

    // The corrupt record still counts toward the stream version, so an
    // optimistic append after it succeeds.
    engine.add_column(&id, "t1", "c1", "string").await.unwrap();

    let folded = engine.load_projection(&id).await.unwrap();
    assert_eq!(folded.skipped.len(), 1);
    assert_eq!(folded.skipped[0].event_id, "bad-1");
    assert_eq!(folded.state.table("t1").unwrap().columns["c1"].column_type, "string");
}
