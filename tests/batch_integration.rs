// Batch reassembly over scripted streams.
mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::Status;

use common::{Row, ScriptedTransport, StreamReply, client, group, int, key, string};
use kvgate::api::{BatchPolicy, BatchRecord, Bin, CallKind, ErrorKind, Operation, Value};
use kvgate::core::envelope::ProxyResponse;
use kvgate::core::result_code;

fn writes(count: i64) -> Vec<BatchRecord> {
    (0..count)
        .map(|n| BatchRecord::write(key(n), vec![Operation::put(Bin::new("a", n))]))
        .collect()
}

#[tokio::test]
async fn rows_land_in_their_slots_across_frames() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![
        Ok(ProxyResponse::chunk(group(&[
            Row::ok(1, 0).index(2).bin("name", string("c")),
            Row::code(result_code::KEY_NOT_FOUND).index(1),
        ]))),
        Ok(ProxyResponse::last(group(&[
            Row::ok(4, 0).index(0).bin("name", string("a")),
            Row::last(),
        ]))),
    ]));
    let client = client(&transport);

    let records = client
        .get_many(&BatchPolicy::default(), &[key(0), key(1), key(2)], None)
        .await
        .expect("get_many");
    let names: Vec<_> = records
        .iter()
        .map(|record| {
            record
                .as_ref()
                .expect("row")
                .as_ref()
                .and_then(|record| record.get("name").cloned())
        })
        .collect();
    assert_eq!(
        names,
        vec![
            Some(Value::String("a".to_string())),
            None,
            Some(Value::String("c".to_string())),
        ]
    );
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, CallKind::BatchOperate);
    assert_eq!(requests[0].message.payload.len(), 3);
}

#[tokio::test]
async fn severed_write_batch_marks_unanswered_slots_in_doubt() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![
        Ok(ProxyResponse::chunk(group(&[Row::ok(1, 0).index(0)]))),
        Err(Status::unavailable("connection reset")),
    ]));
    let client = client(&transport);
    let mut records = writes(3);

    let err = client
        .batch_operate(&BatchPolicy::default(), &mut records)
        .await
        .expect_err("severed");
    assert_eq!(err.kind(), ErrorKind::ServerUnavailable);

    let outcome: Vec<_> = records
        .iter()
        .map(|slot| (slot.result_code, slot.in_doubt))
        .collect();
    assert_eq!(
        outcome,
        vec![
            (result_code::OK, false),
            (result_code::NO_RESPONSE, true),
            (result_code::NO_RESPONSE, true),
        ]
    );
}

#[tokio::test]
async fn severed_read_batch_is_never_in_doubt() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![
        Ok(ProxyResponse::chunk(group(&[Row::ok(1, 0).index(1)]))),
        Err(Status::unavailable("connection reset")),
    ]));
    let client = client(&transport);
    let mut records: Vec<_> = (0..3).map(|n| BatchRecord::read(key(n), None)).collect();

    client
        .batch_operate(&BatchPolicy::default(), &mut records)
        .await
        .expect_err("severed");
    assert!(records.iter().all(|slot| !slot.in_doubt));
    assert_eq!(records[1].result_code, result_code::OK);
    assert!(records[0].is_pending());
    assert!(records[2].is_pending());
}

#[tokio::test]
async fn row_errors_report_false_and_keep_per_slot_codes() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![Ok(ProxyResponse::last(group(&[
        Row::ok(1, 0).index(0),
        Row::code(result_code::TIMEOUT).index(1),
        Row::code(result_code::KEY_EXISTS).index(2),
        Row::last(),
    ])))]));
    let client = client(&transport);
    let mut records = writes(3);

    let all_ok = client
        .batch_operate(&BatchPolicy::default(), &mut records)
        .await
        .expect("batch");
    assert!(!all_ok);
    assert!(records[0].is_ok());
    assert_eq!(records[1].result_code, result_code::TIMEOUT);
    assert!(records[1].in_doubt);
    assert_eq!(records[2].result_code, result_code::KEY_EXISTS);
    assert!(!records[2].in_doubt);
}

#[tokio::test]
async fn graceful_end_with_missing_rows_is_a_row_error() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![Ok(ProxyResponse::last(group(&[
        Row::ok(1, 0).index(0),
        Row::last(),
    ])))]));
    let client = client(&transport);
    let mut records: Vec<_> = (0..2).map(|n| BatchRecord::read(key(n), None)).collect();

    let all_ok = client
        .batch_operate(&BatchPolicy::default(), &mut records)
        .await
        .expect("batch");
    assert!(!all_ok);
    assert_eq!(records[1].result_code, result_code::NO_RESPONSE);
    assert!(!records[1].in_doubt);
}

#[tokio::test]
async fn row_errors_stay_with_their_key() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![Ok(ProxyResponse::last(group(&[
        Row::ok(1, 0).index(0).bin("name", string("a")),
        Row::code(result_code::BATCH_DISABLED).index(1),
        Row::last(),
    ])))]));
    let client = client(&transport);

    let rows = client
        .get_many(&BatchPolicy::default(), &[key(0), key(1)], None)
        .await
        .expect("get_many");
    let first = rows[0].as_ref().expect("first row").as_ref().expect("record");
    assert_eq!(first.get("name"), Some(&Value::String("a".to_string())));
    let err = rows[1].as_ref().expect_err("row error");
    assert_eq!(err.result_code(), result_code::BATCH_DISABLED);
}

#[tokio::test]
async fn failed_get_many_keeps_answered_rows() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![
        Ok(ProxyResponse::chunk(group(&[Row::ok(5, 0).index(1)]))),
        Err(Status::unavailable("connection reset")),
    ]));
    let client = client(&transport);

    let err = client
        .get_many(&BatchPolicy::default(), &[key(0), key(1)], None)
        .await
        .expect_err("severed");
    assert_eq!(err.error.kind(), ErrorKind::ServerUnavailable);
    assert_eq!(err.records.len(), 2);
    assert!(err.records[0].is_pending());
    assert!(!err.records[0].in_doubt);
    assert_eq!(err.records[1].record.as_ref().map(|r| r.generation), Some(5));
    assert!(err.to_string().contains("1/2 rows answered"));
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_write_batch_sweeps_unanswered_slots() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Stall(vec![Ok(ProxyResponse::chunk(group(&[
        Row::ok(1, 0).index(0),
    ])))]));
    let token = CancellationToken::new();
    let client = client(&transport).with_cancellation(token.clone());
    let mut records = writes(3);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });
    let err = client
        .batch_operate(&BatchPolicy::default(), &mut records)
        .await
        .expect_err("cancelled");
    canceller.await.expect("canceller");
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let outcome: Vec<_> = records
        .iter()
        .map(|slot| (slot.result_code, slot.in_doubt))
        .collect();
    assert_eq!(
        outcome,
        vec![
            (result_code::OK, false),
            (result_code::NO_RESPONSE, true),
            (result_code::NO_RESPONSE, true),
        ]
    );
}

#[tokio::test]
async fn exists_and_delete_helpers() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![Ok(ProxyResponse::last(group(&[
        Row::ok(1, 0).index(0),
        Row::code(result_code::KEY_NOT_FOUND).index(1),
        Row::last(),
    ])))]));
    transport.push_stream(StreamReply::Open(vec![Ok(ProxyResponse::last(group(&[
        Row::ok(0, 0).index(0),
        Row::code(result_code::KEY_NOT_FOUND).index(1),
        Row::last(),
    ])))]));
    let client = client(&transport);
    let policy = BatchPolicy::default();

    let exists = client
        .exists_many(&policy, &[key(0), key(1)])
        .await
        .expect("exists");
    let exists: Vec<bool> = exists
        .into_iter()
        .map(|flag| flag.expect("exists row"))
        .collect();
    assert_eq!(exists, vec![true, false]);

    let deleted = client
        .delete_many(&policy, &[key(0), key(1)])
        .await
        .expect("delete");
    assert!(deleted[0].is_ok());
    assert!(deleted[0].has_write);
    assert_eq!(deleted[1].result_code, result_code::KEY_NOT_FOUND);
}

#[tokio::test]
async fn udf_failure_rows_keep_their_record() {
    let transport = ScriptedTransport::new();
    transport.push_stream(StreamReply::Open(vec![Ok(ProxyResponse::last(group(&[
        Row::ok(1, 0).index(0).bin("SUCCESS", int(1)),
        Row::code(result_code::UDF_BAD_RESPONSE)
            .index(1)
            .bin("FAILURE", string("rate.lua:9:4: bad rate")),
        Row::last(),
    ])))]));
    let client = client(&transport);

    let slots = client
        .apply_udf_many(&BatchPolicy::default(), &[key(0), key(1)], "rate", "bump", &[])
        .await
        .expect("udf batch");
    assert!(slots[0].is_ok());
    assert_eq!(slots[1].result_code, result_code::UDF_BAD_RESPONSE);
    let failure = slots[1].record.as_ref().and_then(|record| record.get("FAILURE"));
    assert!(failure.is_some());
}

#[tokio::test]
async fn empty_batches_never_reach_the_gateway() {
    let transport = ScriptedTransport::new();
    let client = client(&transport);

    let all_ok = client
        .batch_operate(&BatchPolicy::default(), &mut [])
        .await
        .expect("empty");
    assert!(all_ok);
    assert!(transport.requests().is_empty());
}
