use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use embedding::PositionStyle;
use layers::Activation;
use models::config::ModelConfig;
use pretraining::{
    ElectraForTotalPretraining, ElectraGenerator, ElectraPretrainingCriterion, PretrainingConfig,
};

fn tiny_config(hidden_size: usize, intermediate_size: usize) -> ModelConfig {
    ModelConfig {
        vocab_size: 40,
        embedding_size: Some(8),
        hidden_size,
        num_hidden_layers: 2,
        num_attention_heads: 2,
        intermediate_size,
        hidden_act: Activation::Gelu,
        hidden_dropout_prob: 0.1,
        attention_probs_dropout_prob: 0.1,
        max_position_embeddings: 16,
        type_vocab_size: Some(2),
        initializer_range: 0.02,
        max_relative_position: 64,
        layer_norm_eps: 1e-12,
        position_style: PositionStyle::Absolute,
        pad_token_id: 0,
    }
}

fn deterministic_coupling() -> PretrainingConfig {
    PretrainingConfig {
        use_softmax_sample: false,
        ..PretrainingConfig::default()
    }
}

fn build_total(varmap: &VarMap) -> Result<ElectraForTotalPretraining> {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
    // A smaller generator next to the discriminator, as the objective is
    // usually configured.
    Ok(ElectraForTotalPretraining::new(
        &tiny_config(8, 16),
        &tiny_config(16, 32),
        deterministic_coupling(),
        vb.pp("pretraining"),
    )?)
}

fn sample_batch() -> Result<(Tensor, Tensor, Tensor)> {
    let device = Device::Cpu;
    let raw_ids = Tensor::from_slice(&[5i64, 6, 7, 8, 9, 10, 11, 12], (2, 4), &device)?;
    // Positions (0, 1) and (1, 2) are masked out in the corrupted input.
    let input_ids = Tensor::from_slice(&[5i64, 1, 7, 8, 9, 10, 1, 12], (2, 4), &device)?;
    let gen_labels = Tensor::from_slice(
        &[-100i64, 6, -100, -100, -100, -100, 11, -100],
        (2, 4),
        &device,
    )?;
    Ok((input_ids, raw_ids, gen_labels))
}

#[test]
fn coupled_forward_produces_aligned_shapes() -> Result<()> {
    let varmap = VarMap::new();
    let model = build_total(&varmap)?;
    let (input_ids, raw_ids, gen_labels) = sample_batch()?;

    let output = model.forward(&input_ids, None, None, &raw_ids, Some(&gen_labels), false)?;
    assert_eq!(output.generator_logits.dims(), &[2, 4, 40]);
    assert_eq!(output.discriminator_logits.dims(), &[2, 4]);
    assert_eq!(output.discriminator_labels.dims(), &[2, 4]);
    assert_eq!(output.attended_positions.dims(), &[2, 4]);
    Ok(())
}

#[test]
fn substitution_is_restricted_to_masked_positions() -> Result<()> {
    let varmap = VarMap::new();
    let model = build_total(&varmap)?;
    let (input_ids, raw_ids, gen_labels) = sample_batch()?;

    let output = model.forward(&input_ids, None, None, &raw_ids, Some(&gen_labels), false)?;
    let labels = output
        .discriminator_labels
        .flatten_all()?
        .to_vec1::<u32>()?;
    // Only the two masked positions may carry a replaced label.
    for (index, label) in labels.iter().enumerate() {
        let masked = index == 1 || index == 6;
        assert!(*label <= 1);
        if !masked {
            assert_eq!(*label, 0, "unmasked position {index} labelled replaced");
        }
    }
    Ok(())
}

#[test]
fn missing_generator_labels_are_a_fatal_precondition() -> Result<()> {
    let varmap = VarMap::new();
    let model = build_total(&varmap)?;
    let (input_ids, raw_ids, _) = sample_batch()?;

    let err = model
        .forward(&input_ids, None, None, &raw_ids, None, false)
        .unwrap_err();
    assert!(err.to_string().contains("gen_labels"));
    Ok(())
}

#[test]
fn attended_positions_follow_the_padding_token() -> Result<()> {
    let varmap = VarMap::new();
    let model = build_total(&varmap)?;
    let device = Device::Cpu;
    let raw_ids = Tensor::from_slice(&[5i64, 6, 0, 0], (1, 4), &device)?;
    let input_ids = raw_ids.clone();
    let gen_labels = Tensor::full(-100i64, (1, 4), &device)?;

    let output = model.forward(&input_ids, None, None, &raw_ids, Some(&gen_labels), false)?;
    let attended = output.attended_positions.flatten_all()?.to_vec1::<u8>()?;
    assert_eq!(attended, vec![1, 1, 0, 0]);
    Ok(())
}

#[test]
fn criterion_consumes_the_coupled_output() -> Result<()> {
    let varmap = VarMap::new();
    let model = build_total(&varmap)?;
    let (input_ids, raw_ids, gen_labels) = sample_batch()?;

    let output = model.forward(&input_ids, None, None, &raw_ids, Some(&gen_labels), false)?;
    let criterion = ElectraPretrainingCriterion::new(40, 1.0, 50.0);
    let loss = criterion.forward(
        &output.generator_logits,
        &output.discriminator_logits,
        &gen_labels,
        &output.discriminator_labels,
        Some(&output.attended_positions.to_dtype(DType::F32)?),
    )?;
    let value = loss.to_scalar::<f32>()?;
    assert!(value.is_finite() && value > 0.0);
    Ok(())
}

#[test]
fn untied_generator_carries_a_free_projection() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let generator = ElectraGenerator::new(&tiny_config(16, 32), false, vb.pp("generator"))?;
    let ids = Tensor::from_slice(&[3i64, 4, 5, 6], (1, 4), &Device::Cpu)?;
    let logits = generator.forward(&ids, None, None, false)?;
    assert_eq!(logits.dims(), &[1, 4, 40]);
    Ok(())
}

#[test]
fn tied_generator_decodes_through_the_embedding_table() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let generator = ElectraGenerator::new(&tiny_config(16, 32), true, vb.pp("generator"))?;
    let ids = Tensor::from_slice(&[3i64, 4, 5, 6], (1, 4), &Device::Cpu)?;
    let logits = generator.forward(&ids, None, None, false)?;
    assert_eq!(logits.dims(), &[1, 4, 40]);

    // The tied decoder introduces no projection weight of its own.
    let names: Vec<String> = varmap
        .data()
        .lock()
        .unwrap()
        .keys()
        .cloned()
        .collect();
    assert!(names
        .iter()
        .all(|name| !name.contains("generator_lm_head.weight")));
    assert!(names
        .iter()
        .any(|name| name.contains("generator_lm_head.bias")));
    Ok(())
}
