use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;

use lib_dagrad::nn::{Activation, Loss, Mlp, Sgd};
use lib_dagrad::{Graph, GraphOptions, NodeId};

const CHAIN_LENGTHS: [usize; 4] = [10, 100, 1000, 5000];

fn graph(fused: bool) -> Graph {
  Graph::with_options(GraphOptions::new().fused(fused)).unwrap()
}

/// `x -> tanh(x * x + 1)` repeated `len` times; returns the input and the tip
fn chain(graph: &mut Graph, len: usize) -> (NodeId, NodeId) {
  let x = graph.leaf(black_box(0.3)).unwrap();
  let mut tip = x;
  graph.retain(tip).unwrap();
  for _ in 0..len {
    let sq = graph.multiply(tip, tip).unwrap();
    let shifted = graph.add_scalar(sq, 1.0).unwrap();
    let next = graph.tanh(shifted).unwrap();
    for id in [tip, sq, shifted] {
      graph.release(id).unwrap();
    }
    tip = next;
  }
  (x, tip)
}

// =============================================================================
// GRAPH BENCHMARKS
// =============================================================================

fn construction_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("graph/construction_chain");

  for fused in [false, true] {
    for len in CHAIN_LENGTHS {
      group.throughput(Throughput::Elements(len as u64));
      group.bench_with_input(
        BenchmarkId::new(if fused { "fused" } else { "composed" }, len),
        &len,
        |b, &len| {
          let mut graph = graph(fused);
          b.iter(|| {
            let (_, tip) = chain(&mut graph, len);
            let value = graph.value(tip).unwrap();
            graph.clear();
            black_box(value)
          });
        },
      );
    }
  }
  group.finish();
}

fn backward_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("graph/backward_chain");

  for len in CHAIN_LENGTHS {
    group.throughput(Throughput::Elements(len as u64));
    group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
      let mut graph = graph(false);
      let (x, tip) = chain(&mut graph, len);
      b.iter(|| {
        graph.zero_grads(tip).unwrap();
        black_box(graph.backward(tip).unwrap());
        black_box(graph.grad(x).unwrap())
      });
    });
  }
  group.finish();
}

fn release_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("graph/release_cascade");

  for len in CHAIN_LENGTHS {
    group.throughput(Throughput::Elements(len as u64));
    group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
      let mut graph = graph(false);
      b.iter(|| {
        let (x, tip) = chain(&mut graph, len);
        let reclaimed = graph.release(tip).unwrap();
        graph.release(x).unwrap();
        black_box(reclaimed)
      });
    });
  }
  group.finish();
}

// =============================================================================
// INTERNALS
// =============================================================================

fn bench_topological_sort(c: &mut Criterion) {
  let mut group = c.benchmark_group("internals/topo_sort");

  for len in CHAIN_LENGTHS {
    group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
      let mut graph = graph(false);
      let (_, tip) = chain(&mut graph, len);
      b.iter(|| black_box(graph.topological_order(tip).unwrap().len()));
    });
  }
  group.finish();
}

fn bench_gradient_accumulation(c: &mut Criterion) {
  let mut group = c.benchmark_group("internals/grad_accumulation");

  // many paths converge on x
  group.bench_function("diamond", |b| {
    let mut graph = graph(false);
    let x = graph.leaf(black_box(1.0)).unwrap();
    let mut sum = graph.multiply_by_scalar(x, 2.0).unwrap();
    for k in 3..64 {
      let term = graph.multiply_by_scalar(x, k as f64).unwrap();
      let next = graph.add(sum, term).unwrap();
      graph.release(sum).unwrap();
      graph.release(term).unwrap();
      sum = next;
    }
    b.iter(|| {
      graph.zero_grads(sum).unwrap();
      graph.backward(sum).unwrap();
      black_box(graph.grad(x).unwrap())
    });
  });
  group.finish();
}

// =============================================================================
// NETWORK BENCHMARKS
// =============================================================================

fn xor_train_step(c: &mut Criterion) {
  let mut group = c.benchmark_group("nn/xor_train_step");

  for hidden in [2, 4, 16] {
    group.bench_with_input(BenchmarkId::from_parameter(hidden), &hidden, |b, &hidden| {
      let mut graph = Graph::new();
      let mlp = Mlp::new(
        &mut graph,
        2,
        &[hidden, 1],
        &[Activation::Tanh, Activation::Sigmoid],
        &mut StdRng::seed_from_u64(42),
      )
      .unwrap();
      let mut sgd = Sgd::new(0.1);
      b.iter(|| {
        black_box(
          mlp
            .train_step(&mut graph, &[1.0, 0.0], &[1.0], Loss::BinaryCrossEntropy, &mut sgd)
            .unwrap(),
        )
      });
    });
  }
  group.finish();
}

criterion_group!(
  name = benches;
  config = Criterion::default().measurement_time(Duration::from_secs(10));
  targets =
    construction_chain,
    backward_chain,
    release_chain,
    bench_topological_sort,
    bench_gradient_accumulation,
    xor_train_step,
);

criterion_main!(benches);
