//! Polling engine integration tests against the in-process fake controller

mod support;

use std::sync::Arc;
use std::time::Duration;

use mcsrv::{
    CacheStore, Communication, DataSet, DeviceCode, McClient, McClientConfig, McSrvError,
    MemoryCacheStore, PlcValue, Tag, TagPoller, TagType,
};
use support::FakePlc;

fn client_for(plc: &FakePlc) -> McClient {
    McClient::new(McClientConfig {
        host: plc.host(),
        port: plc.port(),
        connect_timeout: Duration::from_secs(1),
        request_timeout: Duration::from_millis(500),
    })
}

fn poller_for(plc: &FakePlc) -> (TagPoller, Arc<MemoryCacheStore>) {
    let client: Arc<dyn Communication> = Arc::new(client_for(plc));
    let store = Arc::new(MemoryCacheStore::new());
    (TagPoller::new(client, store.clone()), store)
}

fn data_set(id: i64, name: &str, start: u32, length: u16, interval_ms: u64) -> DataSet {
    DataSet {
        id,
        name: name.to_string(),
        device: DeviceCode::D,
        start_address: start,
        length,
        polling_interval_ms: interval_ms,
        enabled: true,
    }
}

fn tag(key: &str, data_set_id: i64, offset: u16, data_type: TagType) -> Tag {
    Tag {
        key: key.to_string(),
        data_set_id,
        offset,
        data_type,
        word_length: None,
        bit_position: match data_type {
            TagType::Bool => Some(0),
            _ => None,
        },
    }
}

#[tokio::test]
async fn test_first_poll_runs_immediately() {
    let plc = FakePlc::start().await;
    plc.set_words(0xA8, 100, &[1234]).await;

    let (poller, store) = poller_for(&plc);
    // one-minute period: only the immediate first poll can have run
    poller
        .set_configuration(
            vec![data_set(1, "slow", 100, 1, 60_000)],
            vec![tag("slow.value", 1, 0, TagType::Int16)],
        )
        .await
        .unwrap();
    poller.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let row = store.tag_cache("slow.value").await.unwrap().unwrap();
    assert_eq!(row.value, PlcValue::Int(1234));
    assert!(row.error.is_none());
    assert_eq!(poller.metrics().await.read_count, 1);

    poller.stop_polling().await;
}

#[tokio::test]
async fn test_block_poll_decodes_every_tag_type() {
    let plc = FakePlc::start().await;
    // int16 | int32 lo/hi | real lo/hi (25.0 = 0x41C80000) | "OK" | bit 5
    plc.set_words(
        0xA8,
        100,
        &[
            0xFFFE, 0x0002, 0x0001, 0x0000, 0x41C8, 0x4B4F, 0x0000, 0x0020,
        ],
    )
    .await;

    let (poller, store) = poller_for(&plc);
    let mut string_tag = tag("line.recipe", 1, 5, TagType::String);
    string_tag.word_length = Some(2);
    let mut bool_tag = tag("line.running", 1, 7, TagType::Bool);
    bool_tag.bit_position = Some(5);
    poller
        .set_configuration(
            vec![data_set(1, "line", 100, 8, 60_000)],
            vec![
                tag("line.count", 1, 0, TagType::Int16),
                tag("line.total", 1, 1, TagType::Int32),
                tag("line.temp", 1, 3, TagType::Real),
                string_tag,
                bool_tag,
            ],
        )
        .await
        .unwrap();
    poller.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    poller.stop_polling().await;

    let get = |key: &str| {
        let store = store.clone();
        let key = key.to_string();
        async move { store.tag_cache(&key).await.unwrap().unwrap().value }
    };
    assert_eq!(get("line.count").await, PlcValue::Int(-2));
    assert_eq!(get("line.total").await, PlcValue::Int(0x0001_0002));
    assert_eq!(get("line.temp").await, PlcValue::Real(25.0));
    assert_eq!(get("line.recipe").await, PlcValue::Text("OK".to_string()));
    assert_eq!(get("line.running").await, PlcValue::Bool(true));

    let block = store.data_set_cache(1).await.unwrap().unwrap();
    assert_eq!(block.length, 8);
    assert_eq!(block.values[0], 0xFFFE);
    assert!(block.error.is_none());
}

#[tokio::test]
async fn test_one_bad_tag_does_not_stop_siblings() {
    let plc = FakePlc::start().await;
    plc.set_words(0xA8, 0, &[7, 0x0009, 0, 0]).await;
    // the controller answers with only 2 of the 4 requested words, so the
    // int32 tag at offset 2 cannot be decoded
    plc.set_truncate_read_words(Some(2)).await;

    let (poller, store) = poller_for(&plc);
    poller
        .set_configuration(
            vec![data_set(1, "partial", 0, 4, 60_000)],
            vec![
                tag("partial.a", 1, 0, TagType::Int16),
                tag("partial.b", 1, 1, TagType::Int16),
                tag("partial.c", 1, 2, TagType::Int32),
            ],
        )
        .await
        .unwrap();
    poller.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    poller.stop_polling().await;

    let a = store.tag_cache("partial.a").await.unwrap().unwrap();
    assert_eq!(a.value, PlcValue::Int(7));
    assert!(a.error.is_none());

    let b = store.tag_cache("partial.b").await.unwrap().unwrap();
    assert_eq!(b.value, PlcValue::Int(9));
    assert!(b.error.is_none());

    // the bad tag gets its fallback plus an error, siblings are untouched
    let c = store.tag_cache("partial.c").await.unwrap().unwrap();
    assert_eq!(c.value, PlcValue::Int(0));
    assert!(c.error.is_some());

    let block = store.data_set_cache(1).await.unwrap().unwrap();
    assert_eq!(block.length, 2);
    assert!(block.error.is_none());
}

#[tokio::test]
async fn test_block_read_failure_writes_fallbacks_then_recovers() {
    let plc = FakePlc::start().await;
    plc.set_words(0xA8, 0, &[5, 0, 0, 0]).await;
    plc.set_end_code(0x0055);

    let (poller, store) = poller_for(&plc);
    poller
        .set_configuration(
            vec![data_set(1, "flaky", 0, 4, 100)],
            vec![
                tag("flaky.n", 1, 0, TagType::Int16),
                tag("flaky.f", 1, 1, TagType::Real),
                tag("flaky.s", 1, 3, TagType::String),
            ],
        )
        .await
        .unwrap();
    poller.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // every tag carries its type-appropriate fallback and the same error
    let n = store.tag_cache("flaky.n").await.unwrap().unwrap();
    let f = store.tag_cache("flaky.f").await.unwrap().unwrap();
    let s = store.tag_cache("flaky.s").await.unwrap().unwrap();
    assert_eq!(n.value, PlcValue::Int(0));
    assert_eq!(f.value, PlcValue::Real(0.0));
    assert_eq!(s.value, PlcValue::Text(String::new()));
    let message = n.error.clone().unwrap();
    assert!(message.contains("0x0055"));
    assert_eq!(f.error.as_deref(), Some(message.as_str()));
    assert_eq!(s.error.as_deref(), Some(message.as_str()));

    // the block row keeps its length metadata and carries the error
    let block = store.data_set_cache(1).await.unwrap().unwrap();
    assert_eq!(block.length, 4);
    assert!(block.error.is_some());

    // one bad cycle never stops the next: clear the fault and wait a tick
    plc.set_end_code(0);
    tokio::time::sleep(Duration::from_millis(250)).await;
    poller.stop_polling().await;

    let n = store.tag_cache("flaky.n").await.unwrap().unwrap();
    assert_eq!(n.value, PlcValue::Int(5));
    assert!(n.error.is_none());
    let block = store.data_set_cache(1).await.unwrap().unwrap();
    assert!(block.error.is_none());
}

#[tokio::test]
async fn test_bulk_write_refreshes_cache_immediately() {
    let plc = FakePlc::start().await;

    let (poller, store) = poller_for(&plc);
    poller
        .set_configuration(vec![data_set(1, "out", 300, 8, 60_000)], vec![])
        .await
        .unwrap();
    poller.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    poller
        .write_data_set_values(1, vec![10, 20, 30])
        .await
        .unwrap();

    assert_eq!(plc.word(0xA8, 300).await, 10);
    assert_eq!(plc.word(0xA8, 302).await, 30);

    // the raw cache reflects the write without waiting for the next tick
    let block = store.data_set_cache(1).await.unwrap().unwrap();
    assert_eq!(block.values, vec![10, 20, 30]);
    assert_eq!(block.length, 3);
    let snapshot = poller.data_set_cache_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].values, vec![10, 20, 30]);

    // validation failures never reach the wire
    assert!(matches!(
        poller.write_data_set_values(1, vec![]).await.unwrap_err(),
        McSrvError::InvalidData(_)
    ));
    assert!(matches!(
        poller.write_data_set_values(1, vec![0; 9]).await.unwrap_err(),
        McSrvError::InvalidData(_)
    ));
    assert!(matches!(
        poller.write_data_set_values(99, vec![1]).await.unwrap_err(),
        McSrvError::NotFound(_)
    ));

    poller.stop_polling().await;
}

#[tokio::test]
async fn test_write_tag_value_per_type() {
    let plc = FakePlc::start().await;
    plc.set_words(0xA8, 404, &[0b0100]).await;

    let (poller, store) = poller_for(&plc);
    let mut bool_tag = tag("out.flag", 1, 4, TagType::Bool);
    bool_tag.bit_position = Some(1);
    let mut string_tag = tag("out.label", 1, 5, TagType::String);
    string_tag.word_length = Some(3);
    poller
        .set_configuration(
            vec![data_set(1, "out", 400, 8, 60_000)],
            vec![
                tag("out.speed", 1, 0, TagType::Int16),
                tag("out.total", 1, 1, TagType::Int32),
                bool_tag,
                string_tag,
            ],
        )
        .await
        .unwrap();

    poller
        .write_tag_value("out.speed", PlcValue::Int(-5))
        .await
        .unwrap();
    assert_eq!(plc.word(0xA8, 400).await, 0xFFFB);

    poller
        .write_tag_value("out.total", PlcValue::Int(0x0003_0004))
        .await
        .unwrap();
    assert_eq!(plc.word(0xA8, 401).await, 0x0004);
    assert_eq!(plc.word(0xA8, 402).await, 0x0003);

    // bool goes through read-modify-write and preserves sibling bits
    poller
        .write_tag_value("out.flag", PlcValue::Bool(true))
        .await
        .unwrap();
    assert_eq!(plc.word(0xA8, 404).await, 0b0110);

    poller
        .write_tag_value("out.label", PlcValue::Text("AB".to_string()))
        .await
        .unwrap();
    assert_eq!(plc.word(0xA8, 405).await, 0x4241);

    // cache rows updated on successful writes
    let row = store.tag_cache("out.speed").await.unwrap().unwrap();
    assert_eq!(row.value, PlcValue::Int(-5));
    assert!(row.error.is_none());

    // type mismatches and unknown tags are rejected before the wire
    assert!(matches!(
        poller
            .write_tag_value("out.speed", PlcValue::Text("x".to_string()))
            .await
            .unwrap_err(),
        McSrvError::InvalidParameter(_)
    ));
    assert!(matches!(
        poller
            .write_tag_value("nope", PlcValue::Int(0))
            .await
            .unwrap_err(),
        McSrvError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_metrics_and_stop_clears_state() {
    let plc = FakePlc::start().await;
    plc.set_words(0xA8, 0, &[1]).await;

    let (poller, store) = poller_for(&plc);
    poller
        .set_configuration(
            vec![data_set(1, "fast", 0, 1, 20)],
            vec![tag("fast.v", 1, 0, TagType::Int16)],
        )
        .await
        .unwrap();

    assert!(!poller.is_polling());
    assert_eq!(poller.metrics().await.read_count, 0);

    poller.start_polling().await.unwrap();
    assert!(poller.is_polling());
    tokio::time::sleep(Duration::from_millis(150)).await;
    let metrics = poller.metrics().await;
    assert!(metrics.read_count >= 2, "read_count = {}", metrics.read_count);

    poller.stop_polling().await;
    assert!(!poller.is_polling());
    let metrics = poller.metrics().await;
    assert_eq!(metrics.read_count, 0);
    assert_eq!(metrics.reads_per_second, 0);
    assert!(poller.data_set_cache_snapshot().is_empty());

    // the persisted store keeps its rows after polling stops
    assert!(store.tag_cache("fast.v").await.unwrap().is_some());
}

#[tokio::test]
async fn test_disabled_data_set_is_not_polled() {
    let plc = FakePlc::start().await;

    let (poller, store) = poller_for(&plc);
    let mut disabled = data_set(2, "disabled", 50, 1, 20);
    disabled.enabled = false;
    poller
        .set_configuration(
            vec![data_set(1, "enabled", 0, 1, 20), disabled],
            vec![
                tag("enabled.v", 1, 0, TagType::Int16),
                tag("disabled.v", 2, 0, TagType::Int16),
            ],
        )
        .await
        .unwrap();
    poller.start_polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    poller.stop_polling().await;

    assert!(store.tag_cache("enabled.v").await.unwrap().is_some());
    assert!(store.tag_cache("disabled.v").await.unwrap().is_none());
}
