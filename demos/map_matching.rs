//! Example: snapping a noisy GPS trace to road candidates with the Viterbi
//! engine, attaching route descriptors to the winning transitions.
//!
//! Run with:
//! `cargo run --example map_matching`

use std::collections::HashMap;

use trellis::{Transition, ViterbiAlgorithm, ViterbiOptions};

/// A road-position candidate: road name plus offset along it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RoadPosition {
    road: &'static str,
    offset_m: u32,
}

/// A GPS fix.
#[derive(Debug, Clone, Copy)]
struct GpsFix {
    lat: f64,
    lon: f64,
}

fn position(road: &'static str, offset_m: u32) -> RoadPosition {
    RoadPosition { road, offset_m }
}

/// Emission log probability from the distance between fix and candidate;
/// purely illustrative numbers.
fn emission_table(weights: &[(RoadPosition, f64)]) -> HashMap<RoadPosition, f64> {
    weights
        .iter()
        .map(|(candidate, p)| (candidate.clone(), p.ln()))
        .collect()
}

fn main() {
    let fixes = [
        GpsFix { lat: 48.177, lon: 11.556 },
        GpsFix { lat: 48.178, lon: 11.558 },
        GpsFix { lat: 48.180, lon: 11.561 },
    ];

    let step0 = [position("Leopoldstrasse", 120), position("Ungererstrasse", 35)];
    let step1 = [position("Leopoldstrasse", 410), position("Ungererstrasse", 310)];
    let step2 = [position("Feilitzschstrasse", 80), position("Ungererstrasse", 600)];

    let mut viterbi: ViterbiAlgorithm<RoadPosition, GpsFix, String> =
        ViterbiAlgorithm::with_options(ViterbiOptions::new().compute_smoothing_probabilities(true));

    viterbi
        .start_with_initial_observation(
            fixes[0],
            &step0,
            &emission_table(&[(step0[0].clone(), 0.7), (step0[1].clone(), 0.3)]),
        )
        .expect("fresh engine");

    // Transition log probabilities favor short routes; the descriptor is
    // the route itself, returned with the matched sequence.
    let route = |from: &RoadPosition, to: &RoadPosition| -> String {
        format!("{}({}) -> {}({})", from.road, from.offset_m, to.road, to.offset_m)
    };
    let step_tables = |prev: &[RoadPosition], cur: &[RoadPosition], weights: &[f64]| {
        let mut transitions = HashMap::new();
        let mut descriptors = HashMap::new();
        let mut weight_iter = weights.iter();
        for from in prev {
            for to in cur {
                let weight = weight_iter.next().expect("one weight per pair");
                transitions.insert(Transition::new(from.clone(), to.clone()), weight.ln());
                descriptors.insert(Transition::new(from.clone(), to.clone()), route(from, to));
            }
        }
        (transitions, descriptors)
    };

    let (transitions, descriptors) =
        step_tables(&step0, &step1, &[0.8, 0.1, 0.2, 0.7]);
    viterbi
        .next_step_with_descriptors(
            fixes[1],
            &step1,
            &emission_table(&[(step1[0].clone(), 0.6), (step1[1].clone(), 0.4)]),
            &transitions,
            &descriptors,
        )
        .expect("complete tables");

    let (transitions, descriptors) =
        step_tables(&step1, &step2, &[0.5, 0.3, 0.1, 0.8]);
    viterbi
        .next_step_with_descriptors(
            fixes[2],
            &step2,
            &emission_table(&[(step2[0].clone(), 0.5), (step2[1].clone(), 0.5)]),
            &transitions,
            &descriptors,
        )
        .expect("complete tables");

    println!("Matched route:");
    for (t, entry) in viterbi.compute_most_likely_sequence().iter().enumerate() {
        let fix = entry.observation.expect("every step carried a fix");
        println!(
            "  t = {t}: ({:.3}, {:.3}) -> {} at {} m (posterior {:.3})",
            fix.lat,
            fix.lon,
            entry.state.road,
            entry.state.offset_m,
            entry.smoothing_probability.unwrap_or(f64::NAN)
        );
        if let Some(route) = &entry.transition_descriptor {
            println!("        via {route}");
        }
    }
}
