use super::*;

#[test]
fn test_builder_defaults() {
    let path = "model.safetensors".to_string();

    let config = InferenceConfig::builder().checkpoint_path(Some(&path)).build().unwrap();

    assert_eq!(config.checkpoint_path, path);
    assert_eq!(config.temperature, 1.0);
    assert_eq!(config.max_new_tokens, 64);
    assert_eq!(config.max_output_chars, DEFAULT_MAX_OUTPUT_CHARS);
    assert_eq!(config.ctx_length, None);
    assert_eq!(config.n_heads, None);
    assert_eq!(config.norm_eps, None);
    assert_eq!(config.timeout, None);
    assert_eq!(config.prompt, None);
    assert_eq!(config.seed, None);
}

#[test]
fn test_builder_overrides() {
    let path = "model.safetensors".to_string();
    let prompt = "the cat".to_string();

    let config = InferenceConfig::builder()
        .checkpoint_path(Some(&path))
        .temperature(Some(0.0))
        .max_new_tokens(Some(5))
        .ctx_length(Some(8))
        .n_heads(Some(2))
        .norm_eps(Some(1e-6))
        .max_output_chars(Some(100))
        .timeout(Some(Duration::from_millis(250)))
        .prompt(Some(&prompt))
        .seed(Some(9))
        .build()
        .unwrap();

    assert_eq!(config.temperature, 0.0);
    assert_eq!(config.max_new_tokens, 5);
    assert_eq!(config.ctx_length, Some(8));
    assert_eq!(config.n_heads, Some(2));
    assert_eq!(config.norm_eps, Some(1e-6));
    assert_eq!(config.max_output_chars, 100);
    assert_eq!(config.timeout, Some(Duration::from_millis(250)));
    assert_eq!(config.prompt.as_deref(), Some("the cat"));
    assert_eq!(config.seed, Some(9));
}

#[test]
fn test_builder_requires_checkpoint() {
    assert_eq!(InferenceConfig::builder().build().unwrap_err(), "checkpoint_path is required");
}

#[test]
fn test_builder_rejects_invalid_temperature() {
    let path = "model.safetensors".to_string();

    for temperature in [-0.5, f32::NAN, f32::INFINITY] {
        let result = InferenceConfig::builder().checkpoint_path(Some(&path)).temperature(Some(temperature)).build();
        assert!(result.is_err());
    }
}
