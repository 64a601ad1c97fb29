use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use neurolink_core::{PetState, Record, StructuredValue};
use neurolink_sync::codec;
use serde_json::json;

fn nested_record() -> Record {
    let mut inventory = Record::new();
    inventory.insert("apples".into(), StructuredValue::Integer(3));
    inventory.insert("toys".into(), StructuredValue::from(vec!["ball", "rope", "bell"]));

    let mut record = PetState::default().to_record();
    record.insert("inventory".into(), StructuredValue::Record(inventory));
    record.insert(
        "history".into(),
        StructuredValue::Sequence((0..32).map(|i| StructuredValue::Double(f64::from(i) * 1.5)).collect()),
    );
    record
}

fn bench_encode_pet(c: &mut Criterion) {
    let record = PetState::default().to_record();

    c.bench_function("encode_pet_record", |b| {
        b.iter(|| {
            let wire = codec::encode_fields(black_box(&record));
            black_box(codec::fields_to_json(&wire));
        })
    });
}

fn bench_decode_pet(c: &mut Criterion) {
    let record = PetState::default().to_record();
    let json = serde_json::Value::Object(codec::fields_to_json(&codec::encode_fields(&record)));

    c.bench_function("decode_pet_record", |b| {
        b.iter(|| {
            let decoded = codec::decode_fields_json(black_box(&json));
            black_box(PetState::from_record(&decoded));
        })
    });
}

fn bench_nested_roundtrip(c: &mut Criterion) {
    let record = nested_record();

    c.bench_function("nested_record_roundtrip", |b| {
        b.iter(|| {
            let text = serde_json::to_string(&codec::encode_fields(black_box(&record))).unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            black_box(codec::decode_fields_json(&parsed));
        })
    });
}

fn bench_decode_tolerant(c: &mut Criterion) {
    // Mix of valid nodes and nodes the decoder has to drop.
    let json = json!({
        "hunger": {"doubleValue": 12.5},
        "broken": {"doubleValue": 1.0, "stringValue": "x"},
        "empty": {},
        "stamp": {"timestampValue": "2024-05-01T00:00:00Z"},
        "tags": {"arrayValue": {"values": [{"stringValue": "a"}, {"nullValue": null}]}},
    });

    c.bench_function("decode_tolerant_fields", |b| {
        b.iter(|| {
            black_box(codec::decode_fields_json(black_box(&json)));
        })
    });
}

criterion_group!(
    benches,
    bench_encode_pet,
    bench_decode_pet,
    bench_nested_roundtrip,
    bench_decode_tolerant,
);
criterion_main!(benches);
