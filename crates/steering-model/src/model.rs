//! The stateful runtime: a loaded causal LM, its tokenizer, the resolved
//! block list, and the active-interceptor table. `SteeringModel` owns
//! the generation loop itself — there is no forward-hook registry in
//! this ecosystem to hang steering off of, so the loop below plays that
//! role directly, applying `output + gain * vector` after the target
//! block's own forward pass.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear_no_bias, rms_norm, Embedding, Linear, RmsNorm, VarBuilder};
use tracing::{debug, info};

use steering_core::{DeviceSpec, SteeringVector};

use crate::blocks::{self, TransformerBlock};
use crate::error::SteeringModelError;
use crate::interceptor::{ActiveInterceptorEntry, ActiveSteeringEntry, InterceptorTable};
use crate::options::{FromPretrainedOptions, GenerationOptions};
use crate::tokenizer::{ByteTokenizer, HuggingFaceTokenizer, PromptTokenizer};

const RMS_NORM_EPS: f64 = 1e-5;

pub struct SteeringModel {
    embed: Embedding,
    blocks: Vec<Box<dyn TransformerBlock>>,
    final_norm: RmsNorm,
    lm_head: Linear,
    tokenizer: Box<dyn PromptTokenizer>,
    architecture: String,
    hidden_dim: usize,
    #[allow(dead_code)]
    vocab_size: usize,
    device: Device,
    device_spec: DeviceSpec,
    model_fingerprint: String,
    interceptors: InterceptorTable,
}

impl std::fmt::Debug for SteeringModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteeringModel")
            .field("architecture", &self.architecture)
            .field("hidden_dim", &self.hidden_dim)
            .field("num_layers", &self.blocks.len())
            .field("model_fingerprint", &self.model_fingerprint)
            .field("active_interceptors", &self.interceptors.snapshot())
            .finish()
    }
}

impl SteeringModel {
    /// Load a causal LM and its tokenizer from a HuggingFace-style repo
    /// (local path or hub name_or_path), via the external model-loading
    /// collaborator. Fails with a clear message if the repo's
    /// architecture has no block adapter in this crate.
    pub fn from_pretrained(
        name_or_path: &str,
        options: FromPretrainedOptions,
    ) -> Result<Self, SteeringModelError> {
        options.validate()?;

        let device = options.device.resolve().map_err(|e| SteeringModelError::External(e.into()))?;

        let api = hf_hub::api::sync::Api::new().map_err(|e| SteeringModelError::External(e.into()))?;
        let repo = api.model(name_or_path.to_string());

        let config_path = repo.get("config.json").map_err(|e| SteeringModelError::External(e.into()))?;
        let config_text = std::fs::read_to_string(&config_path).map_err(|source| SteeringModelError::Io {
            path: config_path.display().to_string(),
            source,
        })?;
        let config: serde_json::Value = serde_json::from_str(&config_text).map_err(|e| {
            SteeringModelError::External(anyhow::anyhow!("invalid config.json: {e}"))
        })?;

        let architecture_tag = config
            .get("model_type")
            .and_then(|v| v.as_str())
            .unwrap_or("generic-decoder")
            .to_string();

        if !blocks::tags_with_block_adapter().contains(&architecture_tag.as_str()) {
            return Err(SteeringModelError::UnknownArchitecture {
                found: architecture_tag,
                supported: blocks::tags_with_block_adapter()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            });
        }

        let hidden_dim = config
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SteeringModelError::Validation("config.json missing hidden_size".into()))?
            as usize;
        let num_layers = config
            .get("num_hidden_layers")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SteeringModelError::Validation("config.json missing num_hidden_layers".into()))?
            as usize;
        let num_heads = config
            .get("num_attention_heads")
            .and_then(|v| v.as_u64())
            .unwrap_or(8) as usize;
        let intermediate_dim = config
            .get("intermediate_size")
            .and_then(|v| v.as_u64())
            .unwrap_or((hidden_dim * 4) as u64) as usize;
        let vocab_size = config
            .get("vocab_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SteeringModelError::Validation("config.json missing vocab_size".into()))?
            as usize;

        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| SteeringModelError::External(e.into()))?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], options.dtype.to_candle(), &device)
                .map_err(|e| SteeringModelError::External(e.into()))?
        };

        let embed = embedding(vocab_size, hidden_dim, vb.pp("model.embed_tokens"))
            .map_err(|e| SteeringModelError::External(e.into()))?;
        let model_blocks = blocks::build_blocks(
            &architecture_tag,
            hidden_dim,
            num_layers,
            num_heads,
            intermediate_dim,
            vb.pp("model"),
        )
        .map_err(|e| SteeringModelError::External(e.into()))?;
        let final_norm = rms_norm(hidden_dim, RMS_NORM_EPS, vb.pp("model.norm"))
            .map_err(|e| SteeringModelError::External(e.into()))?;
        let lm_head = linear_no_bias(hidden_dim, vocab_size, vb.pp("lm_head"))
            .map_err(|e| SteeringModelError::External(e.into()))?;

        let tokenizer_path = match &options.tokenizer_override {
            Some(name) => Path::new(name).to_path_buf(),
            None => repo
                .get("tokenizer.json")
                .map_err(|e| SteeringModelError::External(e.into()))?,
        };
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| SteeringModelError::External(anyhow::anyhow!(e)))?;

        info!(name_or_path, architecture_tag, hidden_dim, num_layers, "loaded pretrained model");

        Ok(Self {
            embed,
            blocks: model_blocks,
            final_norm,
            lm_head,
            tokenizer: Box::new(HuggingFaceTokenizer(tokenizer)),
            architecture: architecture_tag,
            hidden_dim,
            vocab_size,
            device,
            device_spec: options.device,
            model_fingerprint: name_or_path.to_string(),
            interceptors: InterceptorTable::new(),
        })
    }

    /// Build a small, real (not mocked) `generic-decoder` stack with
    /// randomly initialized weights, so callers and tests can exercise
    /// discovery/composition/steering/generation without a downloaded
    /// checkpoint. Uses a byte-level tokenizer with no learned vocabulary.
    pub fn from_components(
        hidden_dim: usize,
        num_layers: usize,
        num_heads: usize,
        intermediate_dim: usize,
        vocab_size: usize,
        device: DeviceSpec,
    ) -> Result<Self, SteeringModelError> {
        if hidden_dim % num_heads != 0 {
            return Err(SteeringModelError::Validation(format!(
                "hidden_dim {hidden_dim} is not divisible by num_heads {num_heads}"
            )));
        }

        let resolved_device = device.resolve().map_err(|e| SteeringModelError::External(e.into()))?;
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &resolved_device);

        let embed = embedding(vocab_size, hidden_dim, vb.pp("embed_tokens"))
            .map_err(|e| SteeringModelError::External(e.into()))?;
        let model_blocks = blocks::build_blocks(
            "generic-decoder",
            hidden_dim,
            num_layers,
            num_heads,
            intermediate_dim,
            vb.clone(),
        )
        .map_err(|e| SteeringModelError::External(e.into()))?;
        let final_norm = rms_norm(hidden_dim, RMS_NORM_EPS, vb.pp("norm"))
            .map_err(|e| SteeringModelError::External(e.into()))?;
        let lm_head = linear_no_bias(hidden_dim, vocab_size, vb.pp("lm_head"))
            .map_err(|e| SteeringModelError::External(e.into()))?;

        debug!(hidden_dim, num_layers, vocab_size, "built synthetic generic-decoder model");

        Ok(Self {
            embed,
            blocks: model_blocks,
            final_norm,
            lm_head,
            tokenizer: Box::new(ByteTokenizer::new(vocab_size)),
            architecture: "generic-decoder".to_string(),
            hidden_dim,
            vocab_size,
            device: resolved_device,
            device_spec: device,
            model_fingerprint: format!("synthetic:generic-decoder:{hidden_dim}x{num_layers}"),
            interceptors: InterceptorTable::new(),
        })
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn model_fingerprint(&self) -> &str {
        &self.model_fingerprint
    }

    pub(crate) fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn tokenizer_encode(
        &self,
        text: &str,
        max_length: usize,
    ) -> Result<Vec<u32>, SteeringModelError> {
        self.tokenizer.encode(text, max_length)
    }

    pub(crate) fn embed_forward(&self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        self.embed.forward(input_ids)
    }

    pub(crate) fn blocks_up_to(&self, layer_index: usize) -> impl Iterator<Item = &Box<dyn TransformerBlock>> {
        self.blocks.iter().take(layer_index + 1)
    }

    /// Installs a steering entry at `vector.layer_index()`. Refuses if
    /// an entry is already registered there — callers must remove it
    /// (or compose vectors first via `steering-composition`) rather than
    /// silently overwrite.
    pub fn apply_steering(&mut self, vector: &SteeringVector, gain: f32) -> Result<(), SteeringModelError> {
        vector.validate(self.hidden_dim)?;

        if vector.layer_index() >= self.blocks.len() {
            return Err(SteeringModelError::Validation(format!(
                "layer_index {} is out of range for a model with {} layers",
                vector.layer_index(),
                self.blocks.len()
            )));
        }
        if self.interceptors.contains(vector.layer_index()) {
            return Err(SteeringModelError::State(format!(
                "layer {} already has an active steering vector; remove it first",
                vector.layer_index()
            )));
        }

        let bound = vector.to_device(self.device_spec.clone());
        info!(layer = vector.layer_index(), gain, "applying steering vector");
        self.interceptors
            .insert(vector.layer_index(), ActiveInterceptorEntry { vector: bound, gain });
        Ok(())
    }

    /// Removes one layer's entry, or every entry if `layer` is `None`.
    /// Idempotent: removing an absent entry succeeds silently.
    pub fn remove_steering(&mut self, layer: Option<usize>) {
        match layer {
            Some(layer_index) => {
                debug!(layer = layer_index, "removing steering vector");
                self.interceptors.remove_one(layer_index);
            }
            None => {
                debug!("removing all steering vectors");
                self.interceptors.remove_all();
            }
        }
    }

    pub fn list_active_steering(&self) -> Vec<ActiveSteeringEntry> {
        self.interceptors.snapshot()
    }

    /// Applies several vectors in order; on the first failure, rolls
    /// back every entry this call added (pre-existing entries are left
    /// untouched).
    pub fn apply_multiple_steering(
        &mut self,
        vectors: &[SteeringVector],
        gains: &[f32],
    ) -> Result<(), SteeringModelError> {
        if vectors.len() != gains.len() {
            return Err(SteeringModelError::Validation(format!(
                "apply_multiple_steering received {} vectors for {} gains",
                vectors.len(),
                gains.len()
            )));
        }

        let mut added_layers = Vec::with_capacity(vectors.len());
        for (vector, &gain) in vectors.iter().zip(gains) {
            match self.apply_steering(vector, gain) {
                Ok(()) => added_layers.push(vector.layer_index()),
                Err(err) => {
                    for layer_index in added_layers {
                        self.interceptors.remove_one(layer_index);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Runs the model's forward pass over `input_ids`, splicing
    /// `output + gain * vector` into the residual stream right after any
    /// target block finishes its own forward pass.
    fn forward_with_interceptors(&self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = self.embed.forward(input_ids)?;
        for (layer_index, block) in self.blocks.iter().enumerate() {
            xs = block.forward(&xs)?;
            if let Some(entry) = self.interceptors.get(layer_index) {
                let addition = entry.vector.to_tensor(&self.device, xs.dtype())?;
                let scaled = (addition * entry.gain as f64)?;
                xs = xs.broadcast_add(&scaled)?;
            }
        }
        self.final_norm.forward(&xs)
    }

    fn logits(&self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.forward_with_interceptors(input_ids)?;
        self.lm_head.forward(&hidden)
    }

    /// Tokenizes, runs the model's generation loop with whatever
    /// interceptors are currently active, and decodes the result.
    pub fn generate(&mut self, prompt: &str, options: &GenerationOptions) -> Result<String, SteeringModelError> {
        options.validate()?;

        let mut ids = self.tokenizer.encode(prompt, options.max_length)?;
        let mut rng_state: u64 = 0x9E3779B97F4A7C15 ^ ids.len() as u64;

        for _ in 0..options.max_new_tokens {
            if ids.len() >= options.max_length {
                break;
            }
            let input = Tensor::from_vec(ids.clone(), (1, ids.len()), &self.device)
                .map_err(|e| SteeringModelError::External(e.into()))?;
            let logits = self.logits(&input).map_err(|e| SteeringModelError::External(e.into()))?;
            let seq_len = ids.len();
            let last = logits
                .narrow(1, seq_len - 1, 1)
                .and_then(|t| t.squeeze(1))
                .and_then(|t| t.squeeze(0))
                .map_err(|e| SteeringModelError::External(e.into()))?;
            let mut logit_values: Vec<f32> =
                last.to_vec1().map_err(|e| SteeringModelError::External(e.into()))?;

            apply_repetition_penalty(&mut logit_values, &ids, options.repetition_penalty);
            let next_id = next_token(&logit_values, options, &mut rng_state);
            ids.push(next_id);
        }

        Ok(self.tokenizer.decode(&ids))
    }

    pub fn generate_batch(
        &mut self,
        prompts: &[String],
        options: &GenerationOptions,
    ) -> Result<Vec<String>, SteeringModelError> {
        prompts.iter().map(|p| self.generate(p, options)).collect()
    }

    /// The canonical one-shot entry point: applies `vector`, generates,
    /// and removes the vector on every exit path, including failure.
    pub fn generate_with_steering(
        &mut self,
        prompt: &str,
        vector: &SteeringVector,
        gain: f32,
        options: &GenerationOptions,
    ) -> Result<String, SteeringModelError> {
        self.apply_steering(vector, gain)?;
        let layer_index = vector.layer_index();
        let result = self.generate(prompt, options);
        self.remove_steering(Some(layer_index));
        result
    }
}

fn apply_repetition_penalty(logits: &mut [f32], generated: &[u32], penalty: f32) {
    if (penalty - 1.0).abs() < f32::EPSILON {
        return;
    }
    for &token in generated {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit = if *logit > 0.0 { *logit / penalty } else { *logit * penalty };
        }
    }
}

fn next_token(logits: &[f32], options: &GenerationOptions, rng_state: &mut u64) -> u32 {
    let temperature = options.temperature.max(1e-6);
    let scaled: Vec<f32> = logits.iter().map(|&l| l / temperature).collect();

    if !options.do_sample {
        return argmax(&scaled);
    }

    let mut ranked: Vec<usize> = (0..scaled.len()).collect();
    ranked.sort_by(|&a, &b| scaled[b].partial_cmp(&scaled[a]).unwrap_or(std::cmp::Ordering::Equal));

    if options.top_k > 0 && options.top_k < ranked.len() {
        ranked.truncate(options.top_k);
    }

    let max_logit = ranked.iter().map(|&i| scaled[i]).fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = ranked.iter().map(|&i| (scaled[i] - max_logit).exp()).collect();
    let total: f32 = exp.iter().sum();
    let probs: Vec<f32> = exp.iter().map(|&v| v / total).collect();

    let mut cumulative = 0.0;
    let mut cutoff = probs.len();
    if options.top_p < 1.0 {
        for (i, &p) in probs.iter().enumerate() {
            cumulative += p;
            if cumulative >= options.top_p {
                cutoff = i + 1;
                break;
            }
        }
    }
    let candidates = &ranked[..cutoff.max(1)];
    let candidate_probs = &probs[..cutoff.max(1)];
    let candidate_total: f32 = candidate_probs.iter().sum();

    let draw = next_uniform(rng_state) * candidate_total;
    let mut acc = 0.0;
    for (&index, &p) in candidates.iter().zip(candidate_probs) {
        acc += p;
        if draw <= acc {
            return index as u32;
        }
    }
    *candidates.last().unwrap_or(&0) as u32
}

fn argmax(values: &[f32]) -> u32 {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx as u32)
        .unwrap_or(0)
}

/// Deterministic xorshift64 PRNG. Sampling determinism is not a goal of
/// this engine (only discovery is required to be deterministic); this
/// just avoids pulling in a dependency the rest of the workspace never
/// otherwise needs.
fn next_uniform(state: &mut u64) -> f32 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    (*state >> 11) as f32 / (1u64 << 53) as f32
}
