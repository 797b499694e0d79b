use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keyveto_core::backend::{NullBackend, INJECTED_EXTRA_INFO};
use keyveto_core::engine::Engine;
use keyveto_core::types::{EngineConfig, KeyEdge, KeyGroup, KeyId, KeyTransition};
use std::sync::Arc;

fn make_engine() -> Engine {
    let config = EngineConfig {
        enabled: true,
        groups: vec![
            KeyGroup::exclusive([KeyId::W, KeyId::S]),
            KeyGroup::exclusive([KeyId::A, KeyId::D]),
            KeyGroup::simultaneous([KeyId::LEFT, KeyId::RIGHT]),
        ],
        enabled_keys: [
            KeyId::W,
            KeyId::A,
            KeyId::S,
            KeyId::D,
            KeyId::LEFT,
            KeyId::RIGHT,
        ]
        .into_iter()
        .collect(),
    };
    let engine =
        Engine::with_config(config, Arc::new(NullBackend)).expect("failed to build bench engine");
    engine.start().expect("null backend always starts");
    engine
}

fn bench_single_tap(c: &mut Criterion) {
    let engine = make_engine();
    c.bench_function("engine/single_tap_managed_key", |b| {
        b.iter(|| {
            black_box(engine.handle_transition(KeyTransition::down(KeyId::W)));
            black_box(engine.handle_transition(KeyTransition::up(KeyId::W)));
        });
    });
}

fn bench_unmanaged_passthrough(c: &mut Criterion) {
    let engine = make_engine();
    let z = KeyId::new(0x5A);
    c.bench_function("engine/unmanaged_key_passthrough", |b| {
        b.iter(|| {
            black_box(engine.handle_transition(KeyTransition::down(z)));
            black_box(engine.handle_transition(KeyTransition::up(z)));
        });
    });
}

fn bench_tagged_echo(c: &mut Criterion) {
    let engine = make_engine();
    let echo = KeyTransition::new(KeyId::W, KeyEdge::Down, INJECTED_EXTRA_INFO);
    c.bench_function("engine/tagged_echo_filter", |b| {
        b.iter(|| black_box(engine.handle_transition(echo)));
    });
}

fn bench_conflict_flip(c: &mut Criterion) {
    let engine = make_engine();
    c.bench_function("engine/conflict_w_then_s", |b| {
        b.iter(|| {
            black_box(engine.handle_transition(KeyTransition::down(KeyId::W))); // W down
            black_box(engine.handle_transition(KeyTransition::down(KeyId::S))); // S steals
            black_box(engine.handle_transition(KeyTransition::up(KeyId::S))); // S up
            black_box(engine.handle_transition(KeyTransition::up(KeyId::W))); // W up
        });
    });
}

fn bench_with_listener(c: &mut Criterion) {
    let engine = make_engine();
    let _sub = engine.on_status_change(|status| {
        black_box(status.active_keys.len());
    });
    c.bench_function("engine/tap_with_status_listener", |b| {
        b.iter(|| {
            black_box(engine.handle_transition(KeyTransition::down(KeyId::A)));
            black_box(engine.handle_transition(KeyTransition::up(KeyId::A)));
        });
    });
}

criterion_group!(
    benches,
    bench_single_tap,
    bench_unmanaged_passthrough,
    bench_tagged_echo,
    bench_conflict_flip,
    bench_with_listener
);
criterion_main!(benches);
