use chrono::{TimeZone, Utc};
use cotrelay_cot::{parse_cot, serialize_event, CotConverter, CotSettings};
use cotrelay_nmea::parse_str;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const EXAMPLE: &str =
    "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001*60";

fn bench_convert(c: &mut Criterion) {
    let report = parse_str(EXAMPLE).expect("valid sentence");
    let converter = CotConverter::new(CotSettings::default());
    let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();

    c.bench_function("convert", |b| {
        b.iter(|| converter.convert_at(black_box(&report), now))
    });

    let event = converter.convert_at(&report, now);
    c.bench_function("serialize", |b| b.iter(|| serialize_event(black_box(&event))));

    c.bench_function("sentence_to_xml", |b| {
        b.iter(|| {
            let report = parse_str(black_box(EXAMPLE)).expect("valid sentence");
            serialize_event(&converter.convert_at(&report, now))
        })
    });

    let xml = serialize_event(&event);
    c.bench_function("parse_xml", |b| b.iter(|| parse_cot(black_box(&xml))));
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
