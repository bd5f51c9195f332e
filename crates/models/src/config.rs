//! Flat model configuration and the named preset registry.

use attention::AttentionConfig;
use candle_core::{Error, Result};
use embedding::{EmbeddingsConfig, PositionStyle};
use layers::{Activation, FeedForwardConfig};
use serde::{Deserialize, Serialize};

/// Hyperparameters shared by every model family in this workspace.
///
/// The configuration is owned by the top-level model and handed by reference
/// to sub-layers; nothing mutates it after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    /// Width of the embedding tables. `None` means the hidden size; a
    /// smaller value makes ELECTRA-style stacks project embeddings up.
    #[serde(default)]
    pub embedding_size: Option<usize>,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: Activation,
    pub hidden_dropout_prob: f32,
    pub attention_probs_dropout_prob: f32,
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub type_vocab_size: Option<usize>,
    #[serde(default = "default_initializer_range")]
    pub initializer_range: f64,
    #[serde(default = "default_max_relative_position")]
    pub max_relative_position: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_position_style")]
    pub position_style: PositionStyle,
    #[serde(default)]
    pub pad_token_id: u32,
}

fn default_initializer_range() -> f64 {
    0.02
}

fn default_max_relative_position() -> usize {
    64
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_position_style() -> PositionStyle {
    PositionStyle::Absolute
}

impl ModelConfig {
    /// Effective embedding width.
    pub fn embedding_size(&self) -> usize {
        self.embedding_size.unwrap_or(self.hidden_size)
    }

    /// Whether the embedding output must be projected up to the hidden size.
    pub fn projects_embeddings(&self) -> bool {
        self.embedding_size() != self.hidden_size
    }

    /// Validates the structural invariants once, before assembly.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(Error::Msg("vocab_size must be greater than zero".into()));
        }
        if self.hidden_size == 0 {
            return Err(Error::Msg("hidden_size must be greater than zero".into()));
        }
        if self.num_hidden_layers == 0 {
            return Err(Error::Msg(
                "num_hidden_layers must be greater than zero".into(),
            ));
        }
        if self.num_attention_heads == 0 {
            return Err(Error::Msg(
                "num_attention_heads must be greater than zero".into(),
            ));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Msg(format!(
                "the hidden size ({}) is not a multiple of the number of attention heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.intermediate_size == 0 {
            return Err(Error::Msg(
                "intermediate_size must be greater than zero".into(),
            ));
        }
        if self.max_position_embeddings == 0 {
            return Err(Error::Msg(
                "max_position_embeddings must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("hidden_dropout_prob", self.hidden_dropout_prob),
            (
                "attention_probs_dropout_prob",
                self.attention_probs_dropout_prob,
            ),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(Error::Msg(format!("{name} must be in [0, 1)")));
            }
        }
        if self.layer_norm_eps <= 0.0 {
            return Err(Error::Msg("layer_norm_eps must be positive".into()));
        }
        if self.position_style == PositionStyle::Relative && self.max_relative_position == 0 {
            return Err(Error::Msg(
                "relative positions require max_relative_position > 0".into(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a configuration from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| Error::Msg(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn attention_config(&self) -> AttentionConfig {
        AttentionConfig {
            hidden_size: self.hidden_size,
            num_attention_heads: self.num_attention_heads,
            attention_probs_dropout_prob: self.attention_probs_dropout_prob,
            hidden_dropout_prob: self.hidden_dropout_prob,
            layer_norm_eps: self.layer_norm_eps,
            initializer_range: self.initializer_range,
        }
    }

    pub(crate) fn embeddings_config(&self) -> EmbeddingsConfig {
        EmbeddingsConfig {
            vocab_size: self.vocab_size,
            embedding_size: self.embedding_size(),
            max_position_embeddings: self.max_position_embeddings,
            type_vocab_size: self.type_vocab_size,
            position_style: self.position_style,
            hidden_dropout_prob: self.hidden_dropout_prob,
            layer_norm_eps: self.layer_norm_eps,
            initializer_range: self.initializer_range,
        }
    }

    pub(crate) fn feed_forward_config(&self) -> FeedForwardConfig {
        FeedForwardConfig {
            hidden_size: self.hidden_size,
            intermediate_size: self.intermediate_size,
            activation: self.hidden_act,
        }
    }
}

/// Looks up a named hyperparameter preset; `None` for unknown names.
pub fn preset(name: &str) -> Option<ModelConfig> {
    let config = match name {
        "nezha-base-chinese" | "nezha-base-wwm-chinese" => nezha(768, 12, 12, 3072),
        "nezha-large-chinese" | "nezha-large-wwm-chinese" => nezha(1024, 24, 16, 4096),
        "electra-small" => electra(128, 256, 12, 4, 1024, 30522),
        "electra-base" => electra(768, 768, 12, 12, 3072, 30522),
        "electra-large" => electra(1024, 1024, 24, 16, 4096, 30522),
        "chinese-electra-small" => electra(128, 256, 12, 4, 1024, 21128),
        "chinese-electra-base" => electra(768, 768, 12, 12, 3072, 21128),
        "distilbert-base-uncased" => distilbert(30522),
        "distilbert-base-cased" => distilbert(28996),
        _ => return None,
    };
    Some(config)
}

fn nezha(
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
) -> ModelConfig {
    ModelConfig {
        vocab_size: 21128,
        embedding_size: None,
        hidden_size,
        num_hidden_layers,
        num_attention_heads,
        intermediate_size,
        hidden_act: Activation::Gelu,
        hidden_dropout_prob: 0.1,
        attention_probs_dropout_prob: 0.1,
        max_position_embeddings: 512,
        type_vocab_size: Some(2),
        initializer_range: 0.02,
        max_relative_position: 64,
        layer_norm_eps: 1e-12,
        position_style: PositionStyle::Relative,
        pad_token_id: 0,
    }
}

fn electra(
    embedding_size: usize,
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
    vocab_size: usize,
) -> ModelConfig {
    ModelConfig {
        vocab_size,
        embedding_size: Some(embedding_size),
        hidden_size,
        num_hidden_layers,
        num_attention_heads,
        intermediate_size,
        hidden_act: Activation::Gelu,
        hidden_dropout_prob: 0.1,
        attention_probs_dropout_prob: 0.1,
        max_position_embeddings: 512,
        type_vocab_size: Some(2),
        initializer_range: 0.02,
        max_relative_position: 64,
        layer_norm_eps: 1e-12,
        position_style: PositionStyle::Absolute,
        pad_token_id: 0,
    }
}

fn distilbert(vocab_size: usize) -> ModelConfig {
    ModelConfig {
        vocab_size,
        embedding_size: None,
        hidden_size: 768,
        num_hidden_layers: 6,
        num_attention_heads: 12,
        intermediate_size: 3072,
        hidden_act: Activation::Gelu,
        hidden_dropout_prob: 0.1,
        attention_probs_dropout_prob: 0.1,
        max_position_embeddings: 512,
        type_vocab_size: None,
        initializer_range: 0.02,
        max_relative_position: 64,
        layer_norm_eps: 1e-12,
        position_style: PositionStyle::Absolute,
        pad_token_id: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indivisible_head_count_is_rejected() {
        let mut config = preset("electra-small").unwrap();
        config.num_attention_heads = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a multiple"));
    }

    #[test]
    fn known_presets_resolve_and_validate() {
        for name in [
            "nezha-base-chinese",
            "nezha-large-chinese",
            "electra-small",
            "electra-base",
            "electra-large",
            "distilbert-base-uncased",
            "distilbert-base-cased",
        ] {
            let config = preset(name).unwrap_or_else(|| panic!("missing preset {name}"));
            config.validate().unwrap();
        }
        assert!(preset("bert-base-uncased").is_none());
    }

    #[test]
    fn electra_small_projects_embeddings() {
        let config = preset("electra-small").unwrap();
        assert_eq!(config.embedding_size(), 128);
        assert!(config.projects_embeddings());
        assert!(!preset("electra-base").unwrap().projects_embeddings());
    }

    #[test]
    fn json_round_trip_preserves_the_configuration() -> Result<()> {
        let config = preset("nezha-base-chinese").unwrap();
        let json = serde_json::to_string(&config).map_err(|e| Error::Msg(e.to_string()))?;
        let parsed = ModelConfig::from_json(&json)?;
        assert_eq!(parsed.hidden_size, config.hidden_size);
        assert_eq!(parsed.position_style, PositionStyle::Relative);
        assert_eq!(parsed.hidden_act, Activation::Gelu);
        Ok(())
    }

    #[test]
    fn json_defaults_fill_optional_fields() -> Result<()> {
        let json = r#"{
            "vocab_size": 100,
            "hidden_size": 64,
            "num_hidden_layers": 2,
            "num_attention_heads": 4,
            "intermediate_size": 128,
            "hidden_act": "gelu_new",
            "hidden_dropout_prob": 0.1,
            "attention_probs_dropout_prob": 0.1,
            "max_position_embeddings": 32
        }"#;
        let config = ModelConfig::from_json(json)?;
        assert_eq!(config.embedding_size(), 64);
        assert_eq!(config.max_relative_position, 64);
        assert_eq!(config.position_style, PositionStyle::Absolute);
        assert_eq!(config.pad_token_id, 0);
        Ok(())
    }
}
