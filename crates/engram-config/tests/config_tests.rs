// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Engram configuration system.

use engram_config::diagnostic::ConfigError;
use engram_config::model::{AgentVariant, EmbeddingKind, EngramConfig};
use engram_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

/// Valid TOML with every section deserializes successfully.
#[test]
fn valid_toml_deserializes_into_engram_config() {
    let toml = r#"
[agent]
name = "bench"
variant = "hybrid"
log_level = "debug"
model = "gpt-4o"

[state]
allow_out_of_order = true

[retrieval]
query_window = 4
top_k = 3
shared_memory = true

[augmentation]
budget_tokens = 256
max_records = 2

[bridge]
worker_threads = 4
query_timeout_ms = 1500

[vector]
database_path = "/tmp/engram-test.db"
embedding = "openai"
embedding_dimensions = 1536
min_similarity = 0.2

[graph]
mcp_url = "http://graphiti:8000/mcp"
relevance_weight = 0.5
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.agent.name, "bench");
    assert_eq!(config.agent.variant, AgentVariant::Hybrid);
    assert_eq!(config.agent.model, "gpt-4o");
    assert!(config.state.allow_out_of_order);
    assert_eq!(config.retrieval.query_window, 4);
    assert_eq!(config.retrieval.top_k, 3);
    assert!(config.retrieval.shared_memory);
    assert_eq!(config.augmentation.budget_tokens, 256);
    assert_eq!(config.bridge.worker_threads, 4);
    assert_eq!(config.bridge.query_timeout_ms, 1500);
    assert_eq!(config.bridge.write_timeout_ms, 10_000);
    assert_eq!(config.vector.embedding, EmbeddingKind::OpenAi);
    assert_eq!(config.vector.embedding_dimensions, 1536);
    assert_eq!(config.graph.mcp_url, "http://graphiti:8000/mcp");
    assert_eq!(config.graph.relevance_weight, 0.5);
}

/// Defaults follow the benchmark setup.
#[test]
fn serialized_defaults_are_sensible() {
    let config = EngramConfig::default();

    assert_eq!(config.agent.name, "engram");
    assert_eq!(config.agent.variant, AgentVariant::Vdb);
    assert_eq!(config.agent.model, "gpt-4o-mini");
    assert!(config.agent.system_prompt.is_none());
    assert!(!config.state.allow_out_of_order);
    assert_eq!(config.retrieval.query_window, 2);
    assert!(!config.retrieval.shared_memory);
    assert_eq!(config.vector.embedding, EmbeddingKind::Onnx);
    assert!(config.vector.rerank);
    assert_eq!(config.vector.rerank_candidates, 20);
    assert!(config.vector.model_dir.is_none());
    assert_eq!(config.vector.min_similarity, 0.0);
    assert!(config.vector.database_path.ends_with("memory.db"));
    assert_eq!(config.graph.mcp_url, "http://localhost:8000/mcp");
    assert_eq!(config.graph.relevance_weight, 0.7);
}

/// Missing sections fall back to defaults.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("[agent]\nvariant = \"graph\"\n").expect("should parse");
    assert_eq!(config.agent.variant, AgentVariant::Graph);
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.bridge.clear_timeout_ms, 30_000);
}

/// Environment-style overrides address keys with underscores.
#[test]
fn dotted_override_sets_underscored_key() {
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    let config: EngramConfig = Figment::new()
        .merge(Serialized::defaults(EngramConfig::default()))
        .merge(Toml::string("[bridge]\nquery_timeout_ms = 100\n"))
        .merge(("bridge.query_timeout_ms", 250))
        .extract()
        .expect("should merge override");

    assert_eq!(config.bridge.query_timeout_ms, 250);
}

/// Unknown keys produce an UnknownKey diagnostic with a suggestion.
#[test]
fn diagnostic_error_includes_unknown_key() {
    let toml = r#"
[retrieval]
top_kk = 3
"#;

    let errors = load_and_validate_str(toml).expect_err("should produce errors");
    let has_unknown_key = errors.iter().any(|e| {
        matches!(e, ConfigError::UnknownKey { key, suggestion, valid_keys, .. } if {
            key == "top_kk"
                && suggestion.as_deref() == Some("top_k")
                && valid_keys.contains("query_window")
        })
    });
    assert!(has_unknown_key, "expected UnknownKey for top_kk, got: {errors:?}");
}

/// Unknown top-level sections are rejected.
#[test]
fn deny_unknown_fields_at_top_level() {
    let err = load_config_from_str("[telemetry]\nlevel = \"x\"\n").expect_err("should reject");
    assert!(format!("{err}").contains("telemetry"));
}

/// An unknown variant name is reported against its key.
#[test]
fn unknown_variant_is_invalid_value() {
    let errors =
        load_and_validate_str("[agent]\nvariant = \"graphiti\"\n").expect_err("should reject");
    assert!(
        errors.iter().any(|e| matches!(
            e,
            ConfigError::InvalidValue { detail, .. } if detail.contains("graphiti")
        )),
        "got: {errors:?}"
    );
}

/// Wrong value types are reported.
#[test]
fn diagnostic_invalid_type_message() {
    let err = load_config_from_str("[retrieval]\ntop_k = \"many\"\n")
        .expect_err("should reject invalid type");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("invalid type") || err_str.contains("top_k"),
        "error should mention type mismatch, got: {err_str}"
    );
}

/// Semantic errors surface through load_and_validate_str.
#[test]
fn validation_catches_out_of_range_weight() {
    let toml = r#"
[agent]
variant = "graph"

[graph]
relevance_weight = 2.0
"#;

    let errors = load_and_validate_str(toml).expect_err("weight should fail");
    assert!(errors.iter().any(|e| {
        matches!(e, ConfigError::Validation { key, .. } if key == "graph.relevance_weight")
    }));
}

/// A config file on disk is loaded and validated.
#[test]
fn load_and_validate_path_reads_file() {
    let dir = std::env::temp_dir().join(format!("engram-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("engram.toml");
    std::fs::write(&path, "[agent]\nname = \"from-file\"\nvariant = \"baseline\"\n")
        .expect("write config");

    let config = load_and_validate_path(&path).expect("file should validate");
    assert_eq!(config.agent.name, "from-file");
    assert_eq!(config.agent.variant, AgentVariant::Baseline);

    let _ = std::fs::remove_dir_all(&dir);
}

/// ConfigError renders with miette's graphical handler.
#[test]
fn config_error_renders_with_miette() {
    use miette::{Diagnostic, GraphicalReportHandler};

    let error = ConfigError::UnknownKey {
        key: "mcp_ulr".to_string(),
        suggestion: Some("mcp_url".to_string()),
        valid_keys: "mcp_url, max_nodes".to_string(),
        span: None,
        src: None,
    };

    assert!(error.code().is_some());
    let help = error.help().expect("help text").to_string();
    assert!(help.contains("did you mean `mcp_url`"));

    let mut buf = String::new();
    GraphicalReportHandler::new()
        .render_report(&mut buf, &error)
        .expect("should render without error");
    assert!(buf.contains("mcp_ulr"));
}
