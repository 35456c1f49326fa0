//! Benchmarks for glb components.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glb::backend::algorithms::round_robin;
use glb::util::ConnId;
use glb::{BalanceStrategy, NodeAddr, NodeList, Peer, RoundRobin};

fn node_addrs(count: usize) -> Vec<NodeAddr> {
    (0..count).map(|i| format!("127.0.0.1:{}", 9000 + i)).collect()
}

fn benchmark_round_robin(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_robin_select");
    group.throughput(Throughput::Elements(1));

    let peer = Peer::Tcp {
        client: "192.168.1.100:12345".parse().unwrap(),
    };

    for count in [2, 10, 100] {
        let nodes = node_addrs(count);
        let strategy = RoundRobin::new();

        group.bench_with_input(BenchmarkId::from_parameter(count), &nodes, |b, nodes| {
            b.iter(|| {
                black_box(strategy.select(black_box(nodes), &peer));
            })
        });
    }

    group.finish();
}

fn benchmark_round_robin_unlocked(c: &mut Criterion) {
    let nodes = node_addrs(10);
    let mut last = None;

    c.bench_function("round_robin_fn", |b| {
        b.iter(|| {
            black_box(round_robin(black_box(&nodes), &mut last));
        })
    });
}

fn benchmark_node_list(c: &mut Criterion) {
    let list = NodeList::new();
    list.set(node_addrs(100));

    let mut group = c.benchmark_group("node_list");

    group.bench_function("get", |b| {
        b.iter(|| {
            black_box(list.get());
        })
    });

    group.bench_function("add_existing", |b| {
        let existing = "127.0.0.1:9050".to_string();
        b.iter(|| {
            black_box(list.add(existing.clone()));
        })
    });

    group.bench_function("set", |b| {
        let replacement = node_addrs(100);
        b.iter(|| {
            list.set(replacement.iter().cloned());
        })
    });

    group.finish();
}

fn benchmark_conn_id(c: &mut Criterion) {
    c.bench_function("conn_id_next", |b| {
        b.iter(|| {
            black_box(ConnId::next());
        })
    });
}

criterion_group!(
    benches,
    benchmark_round_robin,
    benchmark_round_robin_unlocked,
    benchmark_node_list,
    benchmark_conn_id,
);

criterion_main!(benches);
