//! End-to-end lifecycle: simulated parse events through the filter
//! pipeline, per-instance persistence, then the summary roll-ups.

use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use wado_store::filter::{AttributeContext, FilterPipeline};
use wado_store::frames::FRAMES_REFERENCE;
use wado_store::reader::FileReader;
use wado_store::tags::{self, AttributeMap};
use wado_store::writer::{FileWriter, OpenOptions, ResourceWriter};
use wado_store::{IdentityCell, StoreConfig, SummaryService, Uid};

const STUDY: &str = "1.2.840.99.7.1";
const SERIES: &str = "1.2.840.99.7.1.2";
const TRANSFER_SYNTAX: &str = "1.2.840.10008.1.2.1";

fn identity_for(sop: &str) -> Arc<IdentityCell> {
    let cell = IdentityCell::new();
    cell.set_study_uid(Uid::parse(STUDY).unwrap()).unwrap();
    cell.set_series_uid(Uid::parse(SERIES).unwrap()).unwrap();
    cell.set_sop_instance_uid(Uid::parse(sop).unwrap()).unwrap();
    cell.set_transfer_syntax_uid(Uid::parse(TRANSFER_SYNTAX).unwrap())
        .unwrap();
    Arc::new(cell)
}

fn base_attributes(sop: &str, instance_number: u32) -> AttributeMap {
    serde_json::from_value(json!({
        tags::SOP_INSTANCE_UID: { "vr": "UI", "Value": [sop] },
        tags::STUDY_INSTANCE_UID: { "vr": "UI", "Value": [STUDY] },
        tags::SERIES_INSTANCE_UID: { "vr": "UI", "Value": [SERIES] },
        tags::INSTANCE_NUMBER: { "vr": "IS", "Value": [instance_number.to_string()] },
        tags::SERIES_NUMBER: { "vr": "IS", "Value": ["1"] },
        tags::MODALITY: { "vr": "CS", "Value": ["XA"] },
        tags::PATIENT_ID: { "vr": "LO", "Value": ["P-123"] },
        tags::NUMBER_OF_FRAMES: { "vr": "IS", "Value": ["96"] },
    }))
    .unwrap()
}

/// Drives one instance through the diversion pipeline and persists its
/// metadata document, the way the parser integration does.
async fn ingest_instance(
    root: &std::path::Path,
    config: &StoreConfig,
    sop: &str,
    instance_number: u32,
    frame_count: u32,
) {
    let writer = FileWriter::with_identity(root, identity_for(sop));
    let mut attrs = base_attributes(sop, instance_number);
    let mut pipeline = FilterPipeline::standard(&writer, config);

    // an oversized public attribute: diverted to the bulk store
    let big = vec![0xA5u8; 140_000];
    assert!(pipeline.attribute_open(AttributeContext {
        tag: "00420011".to_owned(),
        vr: Some("OB".to_owned()),
        declared_length: Some(big.len()),
    }));
    pipeline.value(Bytes::from(big)).await.unwrap();
    pipeline.attribute_close(&mut attrs).await.unwrap();

    // a small attribute: the pipeline declines it, it stays inline
    assert!(!pipeline.attribute_open(AttributeContext {
        tag: "00081030".to_owned(),
        vr: Some("LO".to_owned()),
        declared_length: Some(50),
    }));
    tags::set_value(&mut attrs, "00081030", "LO", json!("Neuro angiography"));

    // multi-frame pixel data: one file per frame
    assert!(pipeline.attribute_open(AttributeContext {
        tag: tags::PIXEL_DATA.to_owned(),
        vr: Some("OW".to_owned()),
        declared_length: None,
    }));
    for frame in 0..frame_count {
        pipeline
            .value(Bytes::from(format!("{sop}-frame-{frame}").into_bytes()))
            .await
            .unwrap();
    }
    pipeline.attribute_close(&mut attrs).await.unwrap();

    // persist the residual metadata document
    let handle = writer
        .open_instance_stream("metadata", OpenOptions::default().with_gzip(config.gzip_json()))
        .await
        .unwrap();
    handle
        .sink
        .write_binary_value(serde_json::to_vec(&Value::Object(attrs)).unwrap())
        .await
        .unwrap();
    writer.close_stream(&handle.key).await.unwrap();
}

#[tokio::test]
async fn full_study_lifecycle() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig::new(temp.path());
    let reader = FileReader::new(temp.path());

    let sop_a = format!("{SERIES}.1");
    let sop_b = format!("{SERIES}.2");
    ingest_instance(temp.path(), &config, &sop_a, 1, 96).await;
    ingest_instance(temp.path(), &config, &sop_b, 2, 4).await;

    let series_path = format!("studies/{STUDY}/series/{SERIES}");

    // 96 frame files, 1-based, gzip-wrapped for the uncompressed syntax
    let frames_dir = temp
        .path()
        .join(format!("{series_path}/instances/{sop_a}/frames"));
    assert_eq!(std::fs::read_dir(&frames_dir).unwrap().count(), 96);
    assert!(frames_dir.join("1.mht.gz").exists());
    assert!(frames_dir.join("96.mht.gz").exists());

    // the instance metadata carries only the frames reference
    let instance_doc = reader
        .read_json_document(&format!("{series_path}/instances/{sop_a}"), "metadata")
        .await
        .unwrap();
    assert_eq!(
        instance_doc[tags::PIXEL_DATA],
        json!({ "BulkDataURI": FRAMES_REFERENCE })
    );
    // the diverted attribute is a hash reference; the small one is inline
    let bulk_uri = instance_doc["00420011"]["BulkDataURI"].as_str().unwrap();
    assert!(bulk_uri.starts_with("bulkdata/"));
    assert!(bulk_uri.ends_with(".mht"));
    assert_eq!(
        instance_doc["00081030"]["Value"][0].as_str().unwrap(),
        "Neuro angiography"
    );

    // identical oversized payloads deduplicated across the two instances
    let bulk_b = reader
        .read_json_document(&format!("{series_path}/instances/{sop_b}"), "metadata")
        .await
        .unwrap();
    assert_eq!(bulk_b["00420011"]["BulkDataURI"].as_str().unwrap(), bulk_uri);

    // the diverted payload round-trips byte-identically
    let (bulk_dir, bulk_name) = bulk_uri.rsplit_once('/').unwrap();
    let part = reader
        .read_bulkdata(&format!("{series_path}/{bulk_dir}"), bulk_name)
        .await
        .unwrap();
    assert_eq!(part.payload.len(), 140_000);
    assert!(part.payload.iter().all(|&b| b == 0xA5));

    // frame payload round-trip, with the transfer syntax recorded
    let frame = reader
        .read_bulkdata(
            &format!("{series_path}/instances/{sop_a}/frames"),
            "96.mht",
        )
        .await
        .unwrap();
    assert_eq!(frame.payload, Bytes::from(format!("{sop_a}-frame-95")));
    assert_eq!(
        frame.content_type.as_deref(),
        Some("application/octet-stream;transfer-syntax=1.2.840.10008.1.2.1")
    );

    // roll up: series, study, global index
    let service = SummaryService::new(config.clone());
    let study_uid = Uid::parse(STUDY).unwrap();
    let series_uid = Uid::parse(SERIES).unwrap();

    let outcome = service.update_series(&study_uid, &series_uid).await.unwrap();
    assert!(!outcome.up_to_date);
    let outcome = service.update_study(&study_uid).await.unwrap();
    assert!(!outcome.up_to_date);
    let outcome = service
        .update_studies_index(std::slice::from_ref(&study_uid))
        .await
        .unwrap();
    assert!(!outcome.up_to_date);

    // series metadata: both instances, series-relative frame references
    let series_doc = reader
        .read_json_document(&series_path, "metadata")
        .await
        .unwrap();
    let series_doc = series_doc.as_array().unwrap();
    assert_eq!(series_doc.len(), 2);
    assert_eq!(
        series_doc[0][tags::PIXEL_DATA]["BulkDataURI"]
            .as_str()
            .unwrap(),
        format!("instances/{sop_a}/frames")
    );

    let singleton = reader
        .read_json_document(&series_path, "series-singleton.json")
        .await
        .unwrap();
    assert_eq!(
        singleton[0][tags::NUMBER_OF_SERIES_RELATED_INSTANCES]["Value"][0]
            .as_u64()
            .unwrap(),
        2
    );

    let study_doc = reader
        .read_json_document(&format!("studies/{STUDY}"), "index.json")
        .await
        .unwrap();
    let query = &study_doc[0];
    assert_eq!(query[tags::MODALITIES_IN_STUDY]["Value"], json!(["XA"]));
    assert_eq!(
        query[tags::NUMBER_OF_STUDY_RELATED_INSTANCES]["Value"][0]
            .as_i64()
            .unwrap(),
        2
    );
    assert_eq!(query[tags::PATIENT_ID]["Value"][0].as_str().unwrap(), "P-123");

    let index = reader
        .read_json_document("studies", "index.json")
        .await
        .unwrap();
    assert_eq!(index.as_array().unwrap().len(), 1);
    assert_eq!(
        index[0][tags::STUDY_INSTANCE_UID]["Value"][0]
            .as_str()
            .unwrap(),
        STUDY
    );

    // idempotent regeneration: everything short-circuits or is identical
    assert!(service
        .update_series(&study_uid, &series_uid)
        .await
        .unwrap()
        .up_to_date);
    assert!(service.update_study(&study_uid).await.unwrap().up_to_date);
    assert!(service
        .update_studies_index(std::slice::from_ref(&study_uid))
        .await
        .unwrap()
        .up_to_date);
}
