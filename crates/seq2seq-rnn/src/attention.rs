//! Multi-head attention между выходом декодера и скрытыми состояниями энкодера.
//!
//! Раскладка весов как у `nn.MultiheadAttention(batch_first=True)`:
//! - `in_proj_weight`: [3*embed, embed] — упакованные Q/K/V проекции
//! - `in_proj_bias`: [3*embed]
//! - `out_proj.weight`, `out_proj.bias`: [embed, embed], [embed]
//!
//! "Narrow" heads: каждая голова видит срез embed/num_heads скрытого вектора.

use candle_core::{DType, Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

/// Keys/values projected once from the encoder hidden sequence.
#[derive(Debug, Clone)]
pub struct AttentionMemory {
    /// [batch, src_len, hidden]
    pub keys: Tensor,
    /// [batch, src_len, hidden]
    pub values: Tensor,
}

/// Multi-head scaled dot-product attention without masking.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    /// `embed_dim` must be divisible by `num_heads`.
    pub fn new(embed_dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || embed_dim % num_heads != 0 {
            candle_core::bail!(
                "embed_dim ({embed_dim}) must be a positive multiple of num_heads ({num_heads})"
            );
        }

        // xavier_uniform по упакованной матрице [3*embed, embed]
        let bound = (6.0 / (4 * embed_dim) as f64).sqrt();
        let in_proj_weight = vb.get_with_hints(
            (3 * embed_dim, embed_dim),
            "in_proj_weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let in_proj_bias = vb.get_with_hints(3 * embed_dim, "in_proj_bias", Init::Const(0.))?;

        let packed = |i: usize| -> Result<Linear> {
            let weight = in_proj_weight.narrow(0, i * embed_dim, embed_dim)?;
            let bias = in_proj_bias.narrow(0, i * embed_dim, embed_dim)?;
            Ok(Linear::new(weight, Some(bias)))
        };
        let q_proj = packed(0)?;
        let k_proj = packed(1)?;
        let v_proj = packed(2)?;
        let out_proj = Self::out_projection(embed_dim, vb.pp("out_proj"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            num_heads,
            head_dim: embed_dim / num_heads,
        })
    }

    /// `out_proj`: uniform ±1/√embed веса и нулевой bias, как в PyTorch.
    fn out_projection(embed_dim: usize, vb: VarBuilder) -> Result<Linear> {
        let bound = 1.0 / (embed_dim as f64).sqrt();
        let weight = vb.get_with_hints(
            (embed_dim, embed_dim),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let bias = vb.get_with_hints(embed_dim, "bias", Init::Const(0.))?;
        Ok(Linear::new(weight, Some(bias)))
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// [batch, len, embed] → [batch, heads, len, head_dim]
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        xs.reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Attention of `query` [batch, q_len, embed] over `key`/`value` [batch, kv_len, embed].
    ///
    /// Returns [batch, q_len, embed].
    pub fn forward(&self, query: &Tensor, key: &Tensor, value: &Tensor) -> Result<Tensor> {
        let (batch_size, q_len, _) = query.dims3()?;

        let q = self.split_heads(&self.q_proj.forward(query)?)?;
        let k = self.split_heads(&self.k_proj.forward(key)?)?;
        let v = self.split_heads(&self.v_proj.forward(value)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let attn_weights = (q.matmul(&k.transpose(2, 3)?)? / scale)?;

        // softmax в float32 для стабильности
        let input_dtype = attn_weights.dtype();
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights.to_dtype(DType::F32)?)?
            .to_dtype(input_dtype)?;

        let attn_output = attn_weights.matmul(&v)?;
        let attn_output = attn_output.transpose(1, 2)?.contiguous()?.reshape((
            batch_size,
            q_len,
            self.num_heads * self.head_dim,
        ))?;

        self.out_proj.forward(&attn_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_cross_attention_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attn = MultiHeadAttention::new(8, 2, vb).unwrap();
        assert_eq!(attn.head_dim(), 4);

        let query = Tensor::randn(0f32, 1., (3, 5, 8), &Device::Cpu).unwrap();
        let memory = Tensor::randn(0f32, 1., (3, 7, 8), &Device::Cpu).unwrap();
        let out = attn.forward(&query, &memory, &memory).unwrap();
        assert_eq!(out.dims(), &[3, 5, 8]);
    }

    #[test]
    fn test_fresh_out_proj_bias_is_zero() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        MultiHeadAttention::new(8, 4, vb).unwrap();

        let data = varmap.data().lock().unwrap();
        let bias = data.get("out_proj.bias").expect("out_proj.bias not registered");
        assert_eq!(bias.dims(), &[8]);
        let total = bias.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(total, 0.0);

        let weight = data.get("out_proj.weight").expect("out_proj.weight not registered");
        assert_eq!(weight.dims(), &[8, 8]);
    }

    #[test]
    fn test_rejects_uneven_heads() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(MultiHeadAttention::new(10, 3, vb).is_err());
    }

    #[test]
    fn test_uniform_attention_averages_values() {
        // нулевые веса: все логиты равны, выход = out_proj(среднее значений) = 0
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let attn = MultiHeadAttention::new(4, 2, vb).unwrap();
        let query = Tensor::randn(0f32, 1., (1, 2, 4), &Device::Cpu).unwrap();
        let memory = Tensor::randn(0f32, 1., (1, 3, 4), &Device::Cpu).unwrap();
        let out = attn.forward(&query, &memory, &memory).unwrap();
        let total = out.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(total, 0.0);
    }
}
