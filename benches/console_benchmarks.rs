//! Performance benchmarks for the realtime console
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::time::Duration;
use waav_realtime_console::console::{ConversationStore, DecodedAudio, EventLog};
use waav_realtime_console::core::audio::{FrequencyKind, SpectrumAnalyzer};
use waav_realtime_console::core::realtime::{
    EventSource, ItemEvent, ItemRole, ItemStatus, ItemType, ProtocolItem,
};

/// Audio deltas arrive many times per second and mostly merge into one entry.
fn bench_event_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_log");
    group.measurement_time(Duration::from_secs(5));

    let delta = json!({
        "type": "response.audio.delta",
        "item_id": "item_1",
        "delta": "A".repeat(6400),
    });
    let types = [
        "response.audio.delta",
        "response.audio_transcript.delta",
        "input_audio_buffer.append",
    ];

    group.bench_function("record_merging", |b| {
        b.iter(|| {
            let mut log = EventLog::new();
            for _ in 0..100 {
                log.record(EventSource::Server, black_box(delta.clone()));
            }
            log
        });
    });

    group.bench_function("record_alternating", |b| {
        b.iter(|| {
            let mut log = EventLog::new();
            for i in 0..100 {
                log.record(
                    EventSource::Server,
                    black_box(json!({ "type": types[i % types.len()] })),
                );
            }
            log
        });
    });

    for entries in [10usize, 100, 1000] {
        let mut log = EventLog::new();
        for i in 0..entries {
            log.record(EventSource::Server, json!({ "type": types[i % types.len()], "i": i }));
        }
        group.bench_with_input(
            BenchmarkId::new("snapshot_clone", entries),
            &log,
            |b, log| {
                b.iter(|| black_box(log.entries().to_vec()));
            },
        );
    }

    group.finish();
}

fn bench_conversation(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversation");
    group.measurement_time(Duration::from_secs(5));

    let created = ItemEvent::Created {
        item: ProtocolItem {
            id: "item_1".to_string(),
            item_type: ItemType::Message,
            role: Some(ItemRole::Assistant),
            status: ItemStatus::InProgress,
            text: String::new(),
            transcript: String::new(),
            tool: None,
            output: None,
        },
        previous_item_id: None,
        input_audio: None,
    };
    let chunk = vec![1200i16; 2400];

    group.throughput(Throughput::Elements(50));
    group.bench_function("audio_deltas", |b| {
        b.iter(|| {
            let mut store = ConversationStore::new();
            store.apply(created.clone());
            for _ in 0..50 {
                store.apply(ItemEvent::AudioDelta {
                    item_id: "item_1".to_string(),
                    samples: black_box(chunk.clone()),
                });
            }
            store
        });
    });

    // Five seconds of 24 kHz audio.
    let samples = vec![1200i16; 120_000];
    group.throughput(Throughput::Bytes((samples.len() * 2) as u64));
    group.bench_function("wav_encode", |b| {
        b.iter(|| DecodedAudio::encode(black_box(&samples)));
    });

    group.finish();
}

fn bench_spectrum(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectrum");
    let analyzer = SpectrumAnalyzer::new();
    let samples: Vec<f32> = (0..1024)
        .map(|i| (i as f32 * 0.05).sin() * 0.5)
        .collect();

    for kind in [FrequencyKind::Frequency, FrequencyKind::Music, FrequencyKind::Voice] {
        group.bench_with_input(
            BenchmarkId::new("analyze", format!("{kind:?}")),
            &kind,
            |b, kind| {
                b.iter(|| analyzer.analyze(black_box(&samples), *kind));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_event_log, bench_conversation, bench_spectrum);
criterion_main!(benches);
