//! End-to-end run over an in-memory table: driver, reconciler, relocator,
//! with scripted HTTP and a recording object store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rehost_core::{Row, TableSpec};
use rehost_runner::traits::BodyStream;
use rehost_runner::{
    BatchConfig, FetchResponse, FetchTransport, LocationRewrite, MemoryRowStore, ObjectAcl, ObjectStore,
    RelocationConfig, Relocator, RowReconciler, ShutdownController, StoredObject, TableBatchDriver,
};
use serde_json::{json, Value};

fn empty() -> BodyStream {
    Box::pin(futures_util::stream::empty::<anyhow::Result<Bytes>>())
}

/// Serves fixed bodies; `http://old.example/moved/*` redirects to the CDN
/// path of the same name, anything unknown is a 404.
struct FakeWeb {
    bodies: HashMap<String, &'static [u8]>,
}

#[async_trait]
impl FetchTransport for FakeWeb {
    async fn get(&self, url: &str) -> anyhow::Result<FetchResponse> {
        if let Some(name) = url.strip_prefix("http://old.example/moved/") {
            return Ok(FetchResponse {
                status: 301,
                location: Some(format!("/files/{name}")),
                body: empty(),
            });
        }
        Ok(match self.bodies.get(url) {
            Some(&body) => FetchResponse {
                status: 200,
                location: None,
                body: Box::pin(futures_util::stream::iter(vec![Ok::<_, anyhow::Error>(Bytes::from_static(body))])),
            },
            None => FetchResponse {
                status: 404,
                location: None,
                body: empty(),
            },
        })
    }
}

#[derive(Default)]
struct RecordingBucket {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for RecordingBucket {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        _content_type: Option<&str>,
        _acl: ObjectAcl,
    ) -> anyhow::Result<StoredObject> {
        anyhow::ensure!(tokio::fs::metadata(path).await?.is_file(), "missing upload file");
        self.keys.lock().push(key.to_string());
        Ok(StoredObject {
            location: format!("http://assets.bucket.example/{key}"),
            key: key.to_string(),
        })
    }
}

fn table() -> TableSpec {
    serde_json::from_value(json!({
        "name": "posts",
        "primaryKey": "id",
        "fields": [
            { "name": "photo" },
            { "name": "meta", "type": "json", "props": ["cover.url"] },
            { "name": "gallery" },
            { "name": "blocks", "type": "json_array", "props": ["image.src"] },
        ],
    }))
    .unwrap()
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn seeded_store() -> Arc<MemoryRowStore> {
    let store = Arc::new(MemoryRowStore::new());
    store.insert(
        "posts",
        "id",
        [
            row(json!({
                "id": 7,
                "photo": "http://old.example/p.jpg",
                "meta": r#"{"cover":{"url":"http://old.example/c.jpg"},"name":"x"}"#,
                "gallery": ["http://old.example/g1.png", "local/g2.png", "http://old.example/missing.png"],
                "blocks": [
                    {"image": {"src": "http://old.example/moved/b.gif"}, "caption": "hi"},
                    {"text": "no image"},
                ],
            })),
            row(json!({
                "id": 8,
                "photo": "/static/local.jpg",
                "meta": "{not json",
                "gallery": null,
                "blocks": "not an array",
            })),
        ],
    );
    store
}

fn web() -> FakeWeb {
    FakeWeb {
        bodies: HashMap::from([
            ("http://old.example/p.jpg".to_string(), &b"p"[..]),
            ("http://old.example/c.jpg".to_string(), &b"c"[..]),
            ("http://old.example/g1.png".to_string(), &b"g1"[..]),
            ("http://old.example/files/b.gif".to_string(), &b"b"[..]),
        ]),
    }
}

fn driver(store: &Arc<MemoryRowStore>, bucket: &Arc<RecordingBucket>, temp: &Path) -> TableBatchDriver {
    let relocator = Relocator::new(
        Arc::new(web()),
        bucket.clone(),
        LocationRewrite {
            force_https: true,
            base_url: Some("https://cdn.new".into()),
        },
        RelocationConfig {
            temp_dir: temp.to_path_buf(),
            ..RelocationConfig::default()
        },
    );
    TableBatchDriver::new(
        RowReconciler::new(store.clone(), Arc::new(relocator)),
        BatchConfig {
            page_size: 1,
            ..BatchConfig::default()
        },
        Arc::new(ShutdownController::new()),
    )
}

fn cdn(bucket: &RecordingBucket, suffix: &str) -> String {
    let keys = bucket.keys.lock();
    let key = keys
        .iter()
        .find(|k| k.ends_with(suffix))
        .unwrap_or_else(|| panic!("no upload ending in {suffix}: {keys:?}"));
    format!("https://cdn.new/{key}")
}

#[tokio::test]
async fn relocates_every_shape_and_writes_only_changed_rows() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store();
    let bucket = Arc::new(RecordingBucket::default());

    let report = driver(&store, &bucket, temp.path())
        .run_all(&[table()], &[])
        .await
        .unwrap();

    let posts = &report.tables[0];
    assert_eq!(posts.attempted, 2);
    assert_eq!(posts.updated, 1);
    assert_eq!(posts.unchanged, 1);
    assert_eq!(posts.failed, 0);
    assert!(!report.any_aborted());
    assert_eq!(bucket.keys.lock().len(), 4);

    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].primary_key, json!(7));

    let rows = store.rows("posts");
    let seven = &rows[0];
    assert_eq!(seven["photo"], json!(cdn(&bucket, "p.jpg")));
    assert_eq!(
        seven["meta"],
        json!(format!(r#"{{"cover":{{"url":"{}"}},"name":"x"}}"#, cdn(&bucket, "c.jpg")))
    );
    assert_eq!(
        seven["gallery"],
        json!([cdn(&bucket, "g1.png"), "local/g2.png", "http://old.example/missing.png"])
    );
    assert_eq!(
        seven["blocks"],
        json!([
            {"image": {"src": cdn(&bucket, "b.gif")}, "caption": "hi"},
            {"text": "no image"},
        ])
    );

    let eight = &rows[1];
    assert_eq!(eight["meta"], json!("{not json"));
    assert_eq!(eight["blocks"], json!("not an array"));

    assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let temp = tempfile::tempdir().unwrap();
    let store = seeded_store();
    let bucket = Arc::new(RecordingBucket::default());
    let d = driver(&store, &bucket, temp.path());

    d.run_all(&[table()], &[]).await.unwrap();
    let after_first = store.rows("posts");
    let uploads = bucket.keys.lock().len();

    let report = d.run_all(&[table()], &[]).await.unwrap();
    assert_eq!(report.tables[0].updated, 0);
    assert_eq!(store.rows("posts"), after_first);
    assert_eq!(store.writes().len(), 1);
    assert_eq!(bucket.keys.lock().len(), uploads);
}
