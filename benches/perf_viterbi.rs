use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sysinfo::{get_current_pid, ProcessRefreshKind, System};
use trellis::{Transition, ViterbiAlgorithm};

const CANDIDATES: u32 = 4;

/// Pre-generated per-step tables so table construction stays out of the
/// measured region.
struct StepTables {
    emissions: HashMap<u32, f64>,
    transitions: HashMap<Transition<u32>, f64>,
}

fn random_steps(rng: &mut StdRng, len: usize) -> Vec<StepTables> {
    (0..len)
        .map(|_| {
            let emissions = (0..CANDIDATES)
                .map(|s| (s, rng.gen_range(0.05f64..1.0).ln()))
                .collect();
            let mut transitions = HashMap::new();
            for from in 0..CANDIDATES {
                for to in 0..CANDIDATES {
                    transitions.insert(
                        Transition::new(from, to),
                        rng.gen_range(0.05f64..1.0).ln(),
                    );
                }
            }
            StepTables {
                emissions,
                transitions,
            }
        })
        .collect()
}

fn rss_kib() -> u64 {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessRefreshKind::new());
    if let Some(p) = sys.process(get_current_pid().unwrap()) {
        p.memory()
    } else {
        0
    }
}

fn run_chain(steps: &[StepTables]) -> usize {
    let states: Vec<u32> = (0..CANDIDATES).collect();
    let mut viterbi: ViterbiAlgorithm<u32, usize> = ViterbiAlgorithm::new();
    let initial: HashMap<u32, f64> = states.iter().map(|&s| (s, (0.25f64).ln())).collect();
    viterbi
        .start_with_initial_state_probabilities(&states, &initial)
        .unwrap();
    for (t, tables) in steps.iter().enumerate() {
        viterbi
            .next_step(t, &states, &tables.emissions, &tables.transitions)
            .unwrap();
    }
    viterbi.compute_most_likely_sequence().len()
}

fn bench_viterbi_perf(c: &mut Criterion) {
    let mut group = c.benchmark_group("viterbi_streaming");
    for &len in &[10_000usize, 50_000] {
        group.bench_function(format!("viterbi_len_{len}"), |b| {
            b.iter_batched(
                || {
                    let mut rng = StdRng::seed_from_u64(44);
                    random_steps(&mut rng, len)
                },
                |steps| {
                    // Back pointers collapse to a shared prefix on random
                    // lattices, so the RSS delta should stay O(t) rather
                    // than O(t * n^2).
                    let before = rss_kib();
                    let sequence_len = run_chain(&steps);
                    let after = rss_kib();
                    criterion::black_box(sequence_len);
                    eprintln!(
                        "RSS KiB delta (viterbi {len}): {}",
                        after.saturating_sub(before)
                    );
                },
                BatchSize::PerIteration,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_viterbi_perf);
criterion_main!(benches);
