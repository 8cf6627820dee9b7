//! Example: forward-backward smoothing on the classic umbrella model.
//!
//! Run with:
//! `cargo run --example umbrella`

use std::collections::HashMap;

use trellis::{ForwardBackwardAlgorithm, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Weather {
    Rain,
    Sun,
}

#[derive(Debug, Clone, Copy)]
enum Umbrella {
    Carried,
    Left,
}

fn main() {
    use Umbrella::{Carried, Left};
    use Weather::{Rain, Sun};

    let candidates = [Rain, Sun];
    let initial = HashMap::from([(Rain, 0.5), (Sun, 0.5)]);
    let transitions = HashMap::from([
        (Transition::new(Rain, Rain), 0.7),
        (Transition::new(Rain, Sun), 0.3),
        (Transition::new(Sun, Rain), 0.3),
        (Transition::new(Sun, Sun), 0.7),
    ]);
    let emissions = |observation: Umbrella| match observation {
        Carried => HashMap::from([(Rain, 0.9), (Sun, 0.2)]),
        Left => HashMap::from([(Rain, 0.1), (Sun, 0.8)]),
    };

    let observations = [Carried, Carried, Left, Carried, Carried];

    let mut engine = ForwardBackwardAlgorithm::new();
    engine
        .start_with_initial_state_probabilities(&candidates, &initial)
        .expect("valid initial distribution");
    for observation in observations {
        engine
            .next_step(observation, &candidates, &emissions(observation), &transitions)
            .expect("complete emission tables");
    }

    let smoothing = engine
        .compute_smoothing_probabilities()
        .expect("engine is started");

    println!("Observation sequence: {observations:?}");
    println!(
        "log p(observations) = {:.6}",
        engine.observation_log_probability().unwrap()
    );
    println!("Smoothing probabilities per step:");
    for (t, step) in smoothing.iter().enumerate() {
        print!("  t = {t}:");
        for (state, probability) in step {
            print!("  p({state:?}) = {probability:.4}");
        }
        println!();
    }
}
