//! End-to-end pipeline against the synthetic decoder harness: discover a
//! direction from contrast text, compose it, apply it, generate, then
//! remove it. Exercises invariants 1-4 and scenarios S4-S6 together,
//! the way a deployment would actually chain these crates.

use steering_core::DeviceSpec;
use steering_discovery::mean_difference;
use steering_model::{GenerationOptions, SteeringModel};

fn tiny_model() -> SteeringModel {
    SteeringModel::from_components(16, 3, 4, 32, 128, DeviceSpec::Cpu).unwrap()
}

/// Installs a `tracing` subscriber on the first call and is a no-op on
/// later ones, so running the whole binary doesn't panic on re-init.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn full_pipeline_discover_apply_generate_remove() {
    init_tracing();
    let model = tiny_model();

    let positive = vec!["joyful sunrise".to_string(), "delighted friends".to_string()];
    let negative = vec!["grim funeral".to_string(), "bitter loss".to_string()];

    let (vector, metrics) = mean_difference(&model, &positive, &negative, 1, 2, 16).unwrap();
    assert_eq!(vector.hidden_dim(), model.hidden_dim());
    assert!(vector.tensor().iter().all(|v| v.is_finite()));
    assert!(metrics.contains_key("result_magnitude"));

    let mut model = model;
    model.apply_steering(&vector, 2.0).unwrap();
    assert_eq!(model.list_active_steering().len(), 1);

    let options = GenerationOptions {
        max_new_tokens: 4,
        max_length: 24,
        ..Default::default()
    };
    let output = model.generate("hello there", &options).unwrap();
    assert!(!output.is_empty());

    model.remove_steering(Some(vector.layer_index()));
    assert!(model.list_active_steering().is_empty());
}

#[test]
fn generate_with_steering_guarantees_removal_even_when_layer_is_bad() {
    init_tracing();
    let mut model = tiny_model();
    let positive = vec!["good".to_string()];
    let negative = vec!["bad".to_string()];
    let (mut vector, _) = mean_difference(&model, &positive, &negative, 0, 1, 8).unwrap();

    // Re-target a layer index that doesn't exist on this tiny model, so
    // `apply_steering` fails and nothing is ever installed.
    vector = steering_core::SteeringVector::construct(
        vector.tensor().to_vec(),
        99,
        "bogus",
        vector.model_fingerprint().to_string(),
        vector.metadata().clone(),
    )
    .unwrap();

    let options = GenerationOptions::default();
    let result = model.generate_with_steering("prompt", &vector, 1.0, &options);
    assert!(result.is_err());
    assert!(model.list_active_steering().is_empty());
}

#[test]
fn apply_multiple_then_generate_batch() {
    init_tracing();
    let mut model = tiny_model();
    let positive = vec!["calm lake".to_string()];
    let negative = vec!["raging storm".to_string()];

    let (v0, _) = mean_difference(&model, &positive, &negative, 0, 1, 8).unwrap();
    let (v1, _) = mean_difference(&model, &positive, &negative, 1, 1, 8).unwrap();

    model.apply_multiple_steering(&[v0, v1], &[1.0, 0.5]).unwrap();
    assert_eq!(model.list_active_steering().len(), 2);

    let options = GenerationOptions {
        max_new_tokens: 2,
        max_length: 16,
        ..Default::default()
    };
    let outputs = model
        .generate_batch(&["one".to_string(), "two".to_string()], &options)
        .unwrap();
    assert_eq!(outputs.len(), 2);

    model.remove_steering(None);
    assert!(model.list_active_steering().is_empty());
}
