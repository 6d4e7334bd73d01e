//! Decoder block harness: one fully-owned transformer block
//! implementation, built from real `candle_nn` primitives, used both as
//! the concrete "generic-decoder" architecture adapter and as the
//! backing for the synthetic model harness. The model implementation
//! itself is otherwise out of scope; this is the minimum needed to give
//! the interceptor mechanism something real to hook into.

use candle_core::{Device, Module, Result as CandleResult, Tensor};
use candle_nn::{linear_no_bias, ops, rms_norm, Linear, RmsNorm, VarBuilder};

/// A single decoder block in a residual-stream stack. Implementors own
/// their forward computation; `SteeringModel` drives the loop over
/// blocks itself and splices steering additions between calls, since
/// nothing in the Rust ML ecosystem offers a PyTorch-style forward-hook
/// registry to hang a callback off of.
pub trait TransformerBlock: std::fmt::Debug + Send + Sync {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor>;
}

const RMS_NORM_EPS: f64 = 1e-5;

/// RMSNorm -> causal self-attention -> residual -> RMSNorm -> SwiGLU MLP
/// -> residual. Structurally a standard decoder-only block; this repo
/// ships exactly one such adapter, tagged `"generic-decoder"` in the
/// architecture registry.
#[derive(Debug)]
pub struct GenericDecoderBlock {
    input_norm: RmsNorm,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    post_attention_norm: RmsNorm,
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl GenericDecoderBlock {
    pub fn new(
        hidden_dim: usize,
        num_heads: usize,
        intermediate_dim: usize,
        vb: VarBuilder,
    ) -> CandleResult<Self> {
        let head_dim = hidden_dim / num_heads;
        Ok(Self {
            input_norm: rms_norm(hidden_dim, RMS_NORM_EPS, vb.pp("input_layernorm"))?,
            q_proj: linear_no_bias(hidden_dim, hidden_dim, vb.pp("self_attn.q_proj"))?,
            k_proj: linear_no_bias(hidden_dim, hidden_dim, vb.pp("self_attn.k_proj"))?,
            v_proj: linear_no_bias(hidden_dim, hidden_dim, vb.pp("self_attn.v_proj"))?,
            o_proj: linear_no_bias(hidden_dim, hidden_dim, vb.pp("self_attn.o_proj"))?,
            post_attention_norm: rms_norm(hidden_dim, RMS_NORM_EPS, vb.pp("post_attention_layernorm"))?,
            gate_proj: linear_no_bias(hidden_dim, intermediate_dim, vb.pp("mlp.gate_proj"))?,
            up_proj: linear_no_bias(hidden_dim, intermediate_dim, vb.pp("mlp.up_proj"))?,
            down_proj: linear_no_bias(intermediate_dim, hidden_dim, vb.pp("mlp.down_proj"))?,
            num_heads,
            head_dim,
        })
    }

    fn self_attention(&self, xs: &Tensor) -> CandleResult<Tensor> {
        let (batch, seq_len, hidden) = xs.dims3()?;

        let q = self.q_proj.forward(xs)?;
        let k = self.k_proj.forward(xs)?;
        let v = self.v_proj.forward(xs)?;

        let shape = (batch, seq_len, self.num_heads, self.head_dim);
        let q = q.reshape(shape)?.transpose(1, 2)?.contiguous()?;
        let k = k.reshape(shape)?.transpose(1, 2)?.contiguous()?;
        let v = v.reshape(shape)?.transpose(1, 2)?.contiguous()?;

        let scale = (self.head_dim as f64).powf(-0.5);
        let attn_scores = (q.matmul(&k.transpose(2, 3)?)? * scale)?;
        let attn_scores = attn_scores.broadcast_add(&causal_mask(seq_len, xs.device())?)?;
        let attn_probs = ops::softmax_last_dim(&attn_scores)?;

        let attn_output = attn_probs.matmul(&v)?;
        let attn_output = attn_output
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden))?;
        self.o_proj.forward(&attn_output)
    }
}

impl TransformerBlock for GenericDecoderBlock {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        let residual = xs;
        let normed = self.input_norm.forward(xs)?;
        let attn_out = self.self_attention(&normed)?;
        let xs = residual.add(&attn_out)?;

        let residual = &xs;
        let normed = self.post_attention_norm.forward(&xs)?;
        let gate = ops::silu(&self.gate_proj.forward(&normed)?)?;
        let up = self.up_proj.forward(&normed)?;
        let mlp_out = self.down_proj.forward(&gate.mul(&up)?)?;
        residual.add(&mlp_out)
    }
}

fn causal_mask(seq_len: usize, device: &Device) -> CandleResult<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (1, 1, seq_len, seq_len), device)
}

/// Resolve an architecture tag to a freshly constructed stack of blocks.
/// Only `"generic-decoder"` has a real adapter; other tags may be known
/// to [`steering_core::architecture`] for diagnostic purposes without
/// this crate being able to build them yet (see DESIGN.md).
pub fn build_blocks(
    architecture_tag: &str,
    hidden_dim: usize,
    num_layers: usize,
    num_heads: usize,
    intermediate_dim: usize,
    vb: VarBuilder,
) -> CandleResult<Vec<Box<dyn TransformerBlock>>> {
    match architecture_tag {
        "generic-decoder" => {
            let mut blocks: Vec<Box<dyn TransformerBlock>> = Vec::with_capacity(num_layers);
            for layer in 0..num_layers {
                let block = GenericDecoderBlock::new(
                    hidden_dim,
                    num_heads,
                    intermediate_dim,
                    vb.pp(format!("layers.{layer}")),
                )?;
                blocks.push(Box::new(block));
            }
            Ok(blocks)
        }
        other => candle_core::bail!("no block adapter registered for architecture '{other}'"),
    }
}

/// Tags `build_blocks` can actually construct, for use in "unknown
/// architecture" error messages. Kept next to the match arms above so the
/// two can't silently drift apart.
pub fn tags_with_block_adapter() -> Vec<&'static str> {
    vec!["generic-decoder"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn generic_decoder_block_preserves_shape() {
        let device = Device::Cpu;
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let block = GenericDecoderBlock::new(8, 2, 16, vb).unwrap();

        let xs = Tensor::zeros((1, 5, 8), DType::F32, &device).unwrap();
        let out = block.forward(&xs).unwrap();
        assert_eq!(out.dims(), &[1, 5, 8]);
    }

    #[test]
    fn build_blocks_rejects_unknown_architecture() {
        let device = Device::Cpu;
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(build_blocks("llama", 8, 1, 2, 16, vb).is_err());
    }

    #[test]
    fn tags_with_block_adapter_matches_buildable_tags() {
        assert_eq!(tags_with_block_adapter(), vec!["generic-decoder"]);
    }
}
