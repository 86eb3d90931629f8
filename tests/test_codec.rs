//! Integration tests: RESP framing over partial input, as a socket delivers it.

use bytes::{Bytes, BytesMut};
use resplink::resp::{encode_pipeline, encode_value, parse, resp_frame_len};
use resplink::{cmd, Error, RespValue};

/// Feed `wire` in `chunk`-sized reads and collect every complete reply.
fn decode_in_chunks(wire: &[u8], chunk: usize) -> Vec<RespValue> {
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    for piece in wire.chunks(chunk) {
        buf.extend_from_slice(piece);
        loop {
            match resp_frame_len(&buf) {
                Ok(len) => {
                    let frame = buf.split_to(len).freeze();
                    let (value, consumed) = parse(&frame).unwrap();
                    assert_eq!(consumed, len);
                    out.push(value);
                }
                Err(Error::Incomplete) => break,
                Err(e) => panic!("unexpected framing error: {e}"),
            }
        }
    }
    assert!(buf.is_empty(), "{} trailing bytes", buf.len());
    out
}

fn bulk(s: &[u8]) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(s))
}

#[test]
fn replies_survive_any_read_split() {
    let replies = vec![
        RespValue::SimpleString("OK".into()),
        RespValue::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into()),
        RespValue::Integer(-42),
        bulk(b"line\r\nbreaks\r\ninside"),
        RespValue::Null,
        RespValue::Array(vec![
            bulk(b"message"),
            bulk(b"foo"),
            RespValue::Array(vec![RespValue::Integer(1), RespValue::Null]),
        ]),
        RespValue::Array(Vec::new()),
    ];
    let wire: Vec<u8> = replies.iter().flat_map(encode_value).collect();

    for chunk in [1, 2, 3, 7, 64, wire.len()] {
        assert_eq!(decode_in_chunks(&wire, chunk), replies, "chunk size {chunk}");
    }
}

#[test]
fn multi_megabyte_bulk_in_small_reads() {
    let payload: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let wire = encode_value(&RespValue::BulkString(Bytes::from(payload.clone())));

    let decoded = decode_in_chunks(&wire, 16 * 1024);
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].as_bytes().map(<[u8]>::len), Some(payload.len()));
    assert_eq!(decoded[0].as_bytes(), Some(payload.as_slice()));
}

#[test]
fn null_bulk_and_null_array_decode_alike() {
    let (a, _) = parse(&Bytes::from_static(b"$-1\r\n")).unwrap();
    let (b, _) = parse(&Bytes::from_static(b"*-1\r\n")).unwrap();
    assert_eq!(a, RespValue::Null);
    assert_eq!(a, b);
}

#[test]
fn pipelined_requests_decode_as_arrays() {
    let commands = vec![cmd!("SET", "key", b"\x00\xff"), cmd!("GET", "key"), cmd!("PING")];
    let wire = encode_pipeline::<_, Bytes>(&commands);

    let decoded = decode_in_chunks(&wire, 5);
    assert_eq!(decoded.len(), 3);
    for (value, command) in decoded.into_iter().zip(&commands) {
        let args: Vec<Bytes> = value
            .into_array()
            .unwrap()
            .into_iter()
            .map(|v| Bytes::copy_from_slice(v.as_bytes().unwrap()))
            .collect();
        assert_eq!(args.as_slice(), command.args());
    }
}

#[test]
fn malformed_frames_are_protocol_errors() {
    let cases: [&[u8]; 4] = [b"?what\r\n", b"$abc\r\nxyz\r\n", b"$3\r\nabcXY", b":12a\r\n"];
    for wire in cases {
        let result = resp_frame_len(wire)
            .and_then(|len| parse(&Bytes::copy_from_slice(&wire[..len])).map(|_| ()));
        match result {
            Err(Error::Protocol(_)) => {}
            other => panic!(
                "{:?}: expected protocol error, got {other:?}",
                String::from_utf8_lossy(wire)
            ),
        }
    }
}
