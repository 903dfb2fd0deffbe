//! Line framing over arbitrarily chunked input.

use agent_tether::agent::codec::{AgentCodec, Line, MAX_LINE_BYTES};
use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::Decoder;

fn decode_all(codec: &mut AgentCodec, buf: &mut BytesMut) -> Vec<Line> {
    let mut out = Vec::new();
    while let Some(line) = codec.decode(buf).expect("decode") {
        out.push(line);
    }
    out
}

#[test]
fn line_split_across_chunks_is_reassembled() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::new();

    buf.extend_from_slice(br#"{"type":"ass"#);
    assert!(decode_all(&mut codec, &mut buf).is_empty());

    buf.extend_from_slice(br#"istant","n":1}"#);
    assert!(decode_all(&mut codec, &mut buf).is_empty());

    buf.extend_from_slice(b"\n");
    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![Line::Structured(json!({"type": "assistant", "n": 1}))]
    );
}

#[test]
fn several_lines_in_one_chunk_keep_order() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from(&b"{\"a\":1}\nhello world\n{\"b\":2}\n"[..]);
    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![
            Line::Structured(json!({"a": 1})),
            Line::Raw("hello world".into()),
            Line::Structured(json!({"b": 2})),
        ]
    );
    assert!(buf.is_empty());
}

#[test]
fn blank_lines_are_skipped() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from(&b"\n   \n\r\nvalue\n\n"[..]);
    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![Line::Raw("value".into())]
    );
}

#[test]
fn malformed_json_falls_back_to_raw_text() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from(&b"{\"type\": \"assistant\",\n"[..]);
    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![Line::Raw("{\"type\": \"assistant\",".into())]
    );
}

#[test]
fn trailing_partial_line_is_emitted_at_eof() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from(&b"first\nsecond"[..]);
    assert_eq!(
        decode_all(&mut codec, &mut buf),
        vec![Line::Raw("first".into())]
    );
    assert_eq!(
        codec.decode_eof(&mut buf).expect("eof"),
        Some(Line::Raw("second".into()))
    );
    assert_eq!(codec.decode_eof(&mut buf).expect("eof"), None);
}

#[test]
fn oversize_line_is_flushed_without_dropping_data() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 10]);
    buf.extend_from_slice(b"\n");

    let lines = decode_all(&mut codec, &mut buf);
    assert_eq!(lines.len(), 2);
    match (&lines[0], &lines[1]) {
        (Line::Raw(head), Line::Raw(tail)) => {
            assert_eq!(head.len(), MAX_LINE_BYTES);
            assert_eq!(tail.len(), 10);
        }
        other => panic!("unexpected lines: {other:?}"),
    }
}

#[test]
fn invalid_utf8_is_decoded_lossily() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from(&b"ok \xff\xfe bytes\n"[..]);
    let lines = decode_all(&mut codec, &mut buf);
    assert_eq!(lines.len(), 1);
    match &lines[0] {
        Line::Raw(text) => {
            assert!(text.starts_with("ok "));
            assert!(text.ends_with(" bytes"));
            assert!(text.contains('\u{fffd}'));
        }
        Line::Structured(value) => panic!("unexpected structured line: {value}"),
    }
}

#[test]
fn byte_at_a_time_feed_matches_bulk_feed() {
    let input = b"{\"type\":\"system\"}\nplain\n{\"x\":[1,2]}\n";
    let mut bulk_codec = AgentCodec::new();
    let mut bulk = BytesMut::from(&input[..]);
    let expected = decode_all(&mut bulk_codec, &mut bulk);

    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::new();
    let mut got = Vec::new();
    for byte in input {
        buf.extend_from_slice(&[*byte]);
        got.extend(decode_all(&mut codec, &mut buf));
    }
    assert_eq!(got, expected);
    assert_eq!(got.len(), 3);
}

#[test]
fn oversize_line_splits_the_same_in_bulk_and_in_chunks() {
    let mut input = vec![b'x'; MAX_LINE_BYTES + 10];
    input.extend_from_slice(b"\n{\"after\":true}\n");

    let mut bulk_codec = AgentCodec::new();
    let mut bulk = BytesMut::from(&input[..]);
    let expected = decode_all(&mut bulk_codec, &mut bulk);

    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::new();
    let mut got = Vec::new();
    for chunk in input.chunks(4096) {
        buf.extend_from_slice(chunk);
        got.extend(decode_all(&mut codec, &mut buf));
    }

    assert_eq!(got, expected);
    let lengths: Vec<usize> = got
        .iter()
        .map(|line| match line {
            Line::Raw(text) => text.len(),
            Line::Structured(_) => 0,
        })
        .collect();
    assert_eq!(lengths, vec![MAX_LINE_BYTES, 10, 0]);
    assert_eq!(got[2], Line::Structured(json!({"after": true})));
}

#[test]
fn line_of_exactly_the_limit_is_flushed_once() {
    let mut input = vec![b'y'; MAX_LINE_BYTES];
    input.push(b'\n');
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from(&input[..]);
    let lines = decode_all(&mut codec, &mut buf);
    assert_eq!(lines.len(), 1);
    assert!(buf.is_empty());
}
