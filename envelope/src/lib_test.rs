use super::*;
use serde_json::json;

fn decode(value: &Value) -> Result<Inbound, CodecError> {
    decode_inbound(value.to_string().as_bytes())
}

#[test]
fn encode_request_uses_id_method_params_shape() {
    let request = Request::new(7, "getModelList", json!({}));
    let bytes = encode_request(&request).expect("encode");
    let value: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(value, json!({"id": 7, "method": "getModelList", "params": {}}));
}

#[test]
fn decode_request_reads_encoded_request() {
    let request = Request::new(3, "deleteModel", json!("model-1"));
    let bytes = encode_request(&request).expect("encode");
    assert_eq!(decode_request(&bytes).expect("decode"), request);
}

#[test]
fn decode_plain_result() {
    let inbound = decode(&json!({"id": 0, "result": []})).expect("decode");
    assert_eq!(inbound.id, 0);
    assert_eq!(
        inbound.reply,
        Reply::Result {
            value: json!([]),
            end: false
        }
    );
}

#[test]
fn decode_final_stream_chunk() {
    let inbound = decode(&json!({"id": 1, "result": {"assistantMessageId": "m1"}, "end": true}))
        .expect("decode");
    assert_eq!(
        inbound.reply,
        Reply::Result {
            value: json!({"assistantMessageId": "m1"}),
            end: true
        }
    );
}

#[test]
fn end_must_be_boolean_true() {
    let inbound = decode(&json!({"id": 1, "result": "x", "end": "yes"})).expect("decode");
    assert_eq!(
        inbound.reply,
        Reply::Result {
            value: json!("x"),
            end: false
        }
    );
}

#[test]
fn null_result_is_still_a_result() {
    let inbound = decode(&json!({"id": 2, "result": null})).expect("decode");
    assert_eq!(
        inbound.reply,
        Reply::Result {
            value: Value::Null,
            end: false
        }
    );
}

#[test]
fn decode_error_passes_code_and_message_through() {
    let inbound =
        decode(&json!({"id": 4, "error": {"code": 404, "message": "no such chat"}})).expect("decode");
    assert_eq!(
        inbound.reply,
        Reply::Error {
            code: codes::NOT_FOUND,
            message: "no such chat".to_owned()
        }
    );
}

#[test]
fn error_wins_over_result() {
    let inbound = decode(&json!({"id": 4, "result": 1, "error": {"code": 500, "message": "boom"}}))
        .expect("decode");
    assert!(matches!(inbound.reply, Reply::Error { code: 500, .. }));
}

#[test]
fn error_without_message_is_malformed() {
    let inbound = decode(&json!({"id": 4, "error": {"code": 500}})).expect("decode");
    assert_eq!(inbound.reply, Reply::Malformed);
}

#[test]
fn envelope_without_result_or_error_is_malformed() {
    let inbound = decode(&json!({"id": 9})).expect("decode");
    assert_eq!(inbound.reply, Reply::Malformed);
}

#[test]
fn integral_float_id_is_accepted() {
    let inbound = decode_inbound(br#"{"id": 5.0, "result": true}"#).expect("decode");
    assert_eq!(inbound.id, 5);
}

#[test]
fn fractional_or_negative_id_is_rejected() {
    let raws: [&[u8]; 5] = [
        br#"{"id": 1.5, "result": 1}"#,
        br#"{"id": -1, "result": 1}"#,
        br#"{"id": "1", "result": 1}"#,
        br#"{"result": 1}"#,
        br"[1, 2, 3]",
    ];
    for raw in raws {
        let err = decode_inbound(raw).expect_err("id should be rejected");
        assert!(matches!(err, CodecError::MissingId), "unexpected error {err:?}");
    }
}

#[test]
fn decode_rejects_invalid_json() {
    let err = decode_inbound(b"{not json").expect_err("json should fail");
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn decode_rejects_invalid_utf8() {
    let err = decode_inbound(&[0xff, 0xfe, 0x00]).expect_err("utf8 should fail");
    assert!(matches!(err, CodecError::Utf8(_)));
}

#[test]
fn encode_reply_matches_wire_shapes() {
    let chunk = encode_reply(
        1,
        &Reply::Result {
            value: json!("Hel"),
            end: false,
        },
    )
    .expect("encode");
    assert_eq!(
        serde_json::from_slice::<Value>(&chunk).expect("json"),
        json!({"id": 1, "result": "Hel"})
    );

    let last = encode_reply(
        1,
        &Reply::Result {
            value: json!({}),
            end: true,
        },
    )
    .expect("encode");
    assert_eq!(
        serde_json::from_slice::<Value>(&last).expect("json"),
        json!({"id": 1, "result": {}, "end": true})
    );

    let error = encode_reply(
        2,
        &Reply::Error {
            code: codes::CONFLICT,
            message: "busy".to_owned(),
        },
    )
    .expect("encode");
    assert_eq!(
        serde_json::from_slice::<Value>(&error).expect("json"),
        json!({"id": 2, "error": {"code": 409, "message": "busy"}})
    );
}

#[test]
fn max_safe_id_is_two_pow_53_minus_one() {
    assert_eq!(MAX_SAFE_ID, 9_007_199_254_740_991);
}
