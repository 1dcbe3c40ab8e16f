//! End-to-end tests of the single-threaded pipeline: bytes in, variables out

mod common;

use common::mock_helpers::{channel_stream, feed_chunks};
use proptest::prelude::*;
use sensorvis_rs::backend::{preprocessor::ScriptPreprocessor, Dispatcher, StreamRegistry};
use sensorvis_rs::crc::lookup_preset;
use sensorvis_rs::framing::{
    CrcTrailer, Endianness, Framer, FramingPolicy, HeaderLayout, TimeoutSetting,
};
use sensorvis_rs::parser::{parse, render};
use sensorvis_rs::types::{ParsedRecord, Value, Variable, VariableKey};
use std::time::{Duration, Instant};

fn sensor_header() -> HeaderLayout {
    HeaderLayout {
        start_sequence: vec![0xAA, 0xBB],
        header_size: 4,
        length_field_offset: 2,
        length_field_size: 2,
        header_included_in_length: true,
        endianness: Endianness::Little,
    }
}

fn header_crc_policy() -> FramingPolicy {
    FramingPolicy::HeaderCrc {
        header: sensor_header(),
        trailer: CrcTrailer {
            model: lookup_preset("CRC16-MODBUS").unwrap(),
            crc_included_in_length: true,
            endianness: Endianness::Little,
        },
    }
}

fn dispatcher_with(stream: sensorvis_rs::backend::DataStream, fields: &[&str]) -> Dispatcher {
    let mut registry = StreamRegistry::new();
    let name = stream.name().to_string();
    registry.add_stream(stream).unwrap();
    for field in fields {
        registry
            .register_variable(Variable::new(VariableKey::new(*field, name.as_str())))
            .unwrap();
    }
    Dispatcher::new(registry)
}

// ==================== Framing ====================

#[test]
fn test_fixed_length_across_chunks() {
    let mut framer = Framer::new(FramingPolicy::FixedLength { len: 3 }).unwrap();
    let frames = feed_chunks(&mut framer, [&b"ab"[..], &b"cd"[..], &b"efg"[..]]);

    assert_eq!(frames, vec![b"abc".to_vec(), b"def".to_vec()]);
    assert_eq!(framer.state().buffer(), b"g");
}

#[test]
fn test_line_feed_keeps_partial_line() {
    let mut framer = Framer::new(FramingPolicy::LineFeed).unwrap();
    let frames = feed_chunks(&mut framer, [&b"{a: 1}\n{a:"[..], &b" 2}\n{a: 3"[..]]);

    assert_eq!(frames.len(), 2);
    let second = parse(std::str::from_utf8(&frames[1]).unwrap()).unwrap();
    assert_eq!(second.get("a"), Some(&Value::Integer(2)));
    assert_eq!(framer.state().buffer(), b"{a: 3");
}

#[test]
fn test_timeout_emits_after_silence() {
    let mut framer = Framer::new(FramingPolicy::Timeout {
        timeout: TimeoutSetting::Fixed(Duration::from_millis(100)),
    })
    .unwrap();
    let t0 = Instant::now();

    assert!(framer.feed_at(b"hel", t0).is_none());
    assert!(framer.feed_at(b"lo", t0 + Duration::from_millis(50)).is_none());
    assert!(framer.feed_at(b"", t0 + Duration::from_millis(100)).is_none());

    let frame = framer.feed_at(b"", t0 + Duration::from_millis(200));
    assert_eq!(frame.as_deref(), Some(&b"hello"[..]));
    assert!(framer.state().buffer().is_empty());
}

#[test]
fn test_header_crc_skips_noise_and_corruption() {
    let policy = header_crc_policy();
    let mut stream = vec![0x00, 0x13, 0xAA];
    stream.extend(policy.encode(b"{v: 1}").unwrap());
    let mut corrupted = policy.encode(b"{v: 2}").unwrap();
    corrupted[6] ^= 0x01;
    stream.extend(corrupted);
    stream.extend(policy.encode(b"{v: 3}").unwrap());

    let mut framer = Framer::new(policy).unwrap();
    let frames = feed_chunks(&mut framer, stream.chunks(5));

    assert_eq!(frames.len(), 2);
    assert_eq!(framer.stats().crc_failures, 1);
    assert!(framer.stats().bytes_discarded >= 3);
}

fn encoded_stream(policy: &FramingPolicy, payloads: &[String]) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|p| policy.encode(p.as_bytes()).unwrap())
        .collect()
}

proptest! {
    #[test]
    fn test_frames_do_not_depend_on_chunking(
        payloads in prop::collection::vec("[a-z0-9 ]{1,12}", 1..8),
        cuts in prop::collection::vec(1usize..9, 1..20),
        use_crc in any::<bool>(),
    ) {
        let policy = if use_crc { header_crc_policy() } else { FramingPolicy::LineFeed };
        let bytes = encoded_stream(&policy, &payloads);

        let mut whole = Framer::new(policy.clone()).unwrap();
        let expected = feed_chunks(&mut whole, [bytes.as_slice()]);
        prop_assert_eq!(expected.len(), payloads.len());

        let mut chunks = Vec::new();
        let mut rest = bytes.as_slice();
        for cut in cuts.iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at((*cut).min(rest.len()));
            chunks.push(head);
            rest = tail;
        }

        let mut pieces = Framer::new(policy).unwrap();
        let actual = feed_chunks(&mut pieces, chunks);
        prop_assert_eq!(actual, expected);
    }
}

// ==================== Parsing ====================

#[test]
fn test_rendered_record_reads_back() {
    let record = ParsedRecord::from_pairs(vec![
        ("temp".to_string(), Value::Float(21.5)),
        ("count".to_string(), Value::Integer(7)),
        ("label".to_string(), Value::String("boiler, left".into())),
        ("raw".to_string(), Value::Bytes(vec![0, 1, 2, 255])),
    ]);

    let text = render(&record);
    assert_eq!(parse(&text), Some(record));
}

#[test]
fn test_parse_uses_first_group_only() {
    let record = parse("noise {a: 1} {a: 2}").unwrap();
    assert_eq!(record.len(), 1);
    assert_eq!(record.get("a"), Some(&Value::Integer(1)));
}

// ==================== Dispatch ====================

#[test]
fn test_dispatcher_delivers_fields_to_variables() {
    let (tx, stream) = channel_stream("uart", FramingPolicy::CarriageLineFeed);
    let mut dispatcher = dispatcher_with(stream, &["temp", "count"]);

    tx.send(Ok(b"{temp: 21.5, count: 3, extra: 'x'}\r\n{temp: 22".to_vec()))
        .unwrap();
    let report = dispatcher.tick();
    assert_eq!(report.updates.len(), 2);
    assert_eq!(report.updates[0].field, "temp");
    assert_eq!(report.updates[0].value, Value::Float(21.5));

    tx.send(Ok(b".0}\r\n".to_vec())).unwrap();
    let report = dispatcher.tick();
    assert_eq!(report.updates.len(), 1);

    let temp = dispatcher
        .registry()
        .variable(&VariableKey::new("temp", "uart"))
        .unwrap();
    assert_eq!(temp.value(), Some(&Value::Float(22.0)));
    assert_eq!(temp.history().len(), 2);

    let stats = dispatcher.stats();
    assert_eq!(stats.records_parsed, 2);
    assert_eq!(stats.unmatched_fields, 1);
}

#[test]
fn test_dispatcher_counts_crc_failures_per_stream() {
    let policy = header_crc_policy();
    let mut bytes = policy.encode(b"{v: 1}").unwrap();
    let mut corrupted = policy.encode(b"{v: 2}").unwrap();
    corrupted[5] ^= 0x40;
    bytes.extend(corrupted);
    bytes.extend(policy.encode(b"{v: 3}").unwrap());

    let (tx, stream) = channel_stream("bus", policy);
    let mut dispatcher = dispatcher_with(stream, &["v"]);
    tx.send(Ok(bytes)).unwrap();

    let values: Vec<Value> = dispatcher
        .tick()
        .updates
        .into_iter()
        .map(|u| u.value)
        .collect();
    assert_eq!(values, vec![Value::Integer(1), Value::Integer(3)]);
    assert_eq!(dispatcher.stats().streams[0].crc_failures, 1);
}

#[test]
fn test_script_preprocessor_decodes_binary_frames() {
    let policy = FramingPolicy::Header(sensor_header());
    let (tx, stream) = channel_stream("bin", policy.clone());
    let script = ScriptPreprocessor::new(
        "#{ temp: read_i16_le(bytes, 4), seq: read_u8(bytes, 6) }",
    )
    .unwrap();
    let stream = stream.with_preprocessor(Box::new(script));
    let mut dispatcher = dispatcher_with(stream, &["temp", "seq"]);

    let mut payload = (-40i16).to_le_bytes().to_vec();
    payload.push(9);
    tx.send(Ok(policy.encode(&payload).unwrap())).unwrap();

    let report = dispatcher.tick();
    let temp = report.updates.iter().find(|u| u.field == "temp").unwrap();
    let seq = report.updates.iter().find(|u| u.field == "seq").unwrap();
    // Signed text is not digit-only, so it reads back as a float
    assert_eq!(temp.value, Value::Float(-40.0));
    assert_eq!(seq.value, Value::Integer(9));
}

#[test]
fn test_stream_faults_when_input_ends() {
    let (tx, stream) = channel_stream("short", FramingPolicy::LineFeed);
    let mut dispatcher = dispatcher_with(stream, &["a"]);

    tx.send(Ok(b"{a: 1}\n".to_vec())).unwrap();
    drop(tx);

    let first = dispatcher.tick();
    assert_eq!(first.updates.len(), 1);
    assert!(first.faults.is_empty());

    let second = dispatcher.tick();
    assert_eq!(second.faults.len(), 1);
    assert!(second.faults[0].1.is_transport());
    assert_eq!(dispatcher.registry().active_count(), 0);

    assert!(dispatcher.tick().is_empty());
    assert_eq!(dispatcher.stats().transport_errors, 1);
}
