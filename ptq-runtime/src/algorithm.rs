//! Quantization algorithm presets and the rule table handed to the toolkit.
//!
//! An [`AlgorithmConfig`] is an ordered list of `pattern -> quantizer` rules
//! plus a calibration method. Patterns are globs over module names such as
//! `decoder.layers.3.self_attention.linear_qkv.weight_quantizer`; the special
//! pattern `default` applies to everything at the lowest priority and later
//! rules override earlier ones.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PtqError;

/// Module-name glob matching the final output projection.
pub const OUTPUT_LAYER_PATTERN: &str = "*.output_layer.*";

/// Rule key applied to every module before any other rule.
pub const DEFAULT_RULE: &str = "default";

/// Supported quantization algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantAlgorithm {
    Int8,
    Int8SmoothQuant,
    Fp8,
    Int4Awq,
    W4A8Awq,
}

impl QuantAlgorithm {
    pub const ALL: [QuantAlgorithm; 5] = [
        QuantAlgorithm::Int8,
        QuantAlgorithm::Int8SmoothQuant,
        QuantAlgorithm::Fp8,
        QuantAlgorithm::Int4Awq,
        QuantAlgorithm::W4A8Awq,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QuantAlgorithm::Int8 => "int8",
            QuantAlgorithm::Int8SmoothQuant => "int8_sq",
            QuantAlgorithm::Fp8 => "fp8",
            QuantAlgorithm::Int4Awq => "int4_awq",
            QuantAlgorithm::W4A8Awq => "w4a8_awq",
        }
    }

    /// Comma-separated list of every identifier, for error messages.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The toolkit preset for this algorithm, as shipped.
    pub fn preset(self) -> AlgorithmConfig {
        match self {
            QuantAlgorithm::Int8 => int8_preset(QuantizerAttributes::int(8).with_axis(None)),
            QuantAlgorithm::Int8SmoothQuant => AlgorithmConfig {
                algorithm: CalibrationMethod::Smoothquant,
                ..int8_preset(QuantizerAttributes::int(8).with_axis(Some(-1)))
            },
            QuantAlgorithm::Fp8 => AlgorithmConfig {
                quant_cfg: vec![
                    QuantRule::single("*weight_quantizer", QuantizerAttributes::float(4, 3)),
                    QuantRule::single("*input_quantizer", QuantizerAttributes::float(4, 3)),
                    QuantRule::disabled("*block_sparse_moe.gate*"),
                    QuantRule::disabled(DEFAULT_RULE),
                ],
                algorithm: CalibrationMethod::Max,
            },
            QuantAlgorithm::Int4Awq => AlgorithmConfig {
                quant_cfg: vec![
                    QuantRule::single(
                        "*weight_quantizer",
                        QuantizerAttributes::int(4).with_blocks(BlockSizes::last_axis(128, None)),
                    ),
                    QuantRule::disabled("*input_quantizer"),
                    QuantRule::disabled("*lm_head*"),
                    QuantRule::disabled("*block_sparse_moe.gate*"),
                    QuantRule::disabled(DEFAULT_RULE),
                ],
                algorithm: CalibrationMethod::AwqLite { alpha_step: 0.1 },
            },
            QuantAlgorithm::W4A8Awq => AlgorithmConfig {
                quant_cfg: vec![
                    QuantRule {
                        pattern: "*weight_quantizer".to_string(),
                        quantizer: QuantizerSpec::Chain(vec![
                            QuantizerAttributes::int(4)
                                .with_blocks(BlockSizes::last_axis(128, Some(BlockKind::Static))),
                            QuantizerAttributes::float(4, 3),
                        ]),
                    },
                    QuantRule::single(
                        "*input_quantizer",
                        QuantizerAttributes::float(4, 3).with_axis(Some(-1)),
                    ),
                    QuantRule::disabled("*lm_head*"),
                    QuantRule::disabled("*block_sparse_moe.gate*"),
                    QuantRule::disabled(DEFAULT_RULE),
                ],
                algorithm: CalibrationMethod::AwqLite { alpha_step: 0.1 },
            },
        }
    }

    /// Algorithm configuration used for a run.
    ///
    /// Every algorithm except FP8 keeps the output layer in full precision.
    pub fn derive_config(self) -> AlgorithmConfig {
        let mut config = self.preset();
        if self != QuantAlgorithm::Fp8 {
            config.set_rule(OUTPUT_LAYER_PATTERN, QuantizerSpec::disabled());
        }
        config
    }
}

impl FromStr for QuantAlgorithm {
    type Err = PtqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| PtqError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
                supported: Self::supported(),
            })
    }
}

impl fmt::Display for QuantAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn int8_preset(input: QuantizerAttributes) -> AlgorithmConfig {
    AlgorithmConfig {
        quant_cfg: vec![
            QuantRule::single("*weight_quantizer", QuantizerAttributes::int(8).with_axis(Some(0))),
            QuantRule::single("*input_quantizer", input),
            QuantRule::disabled("*lm_head*"),
            QuantRule::disabled("*block_sparse_moe.gate*"),
            QuantRule::disabled(DEFAULT_RULE),
        ],
        algorithm: CalibrationMethod::Max,
    }
}

/// Bit format of a quantizer: integer bits or an `(exponent, mantissa)` float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumBits {
    Integer(u8),
    Float(u8, u8),
}

/// Block layout for block-wise weight quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSizes {
    pub axis: i32,
    pub size: usize,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BlockKind>,
}

impl BlockSizes {
    pub fn last_axis(size: usize, kind: Option<BlockKind>) -> Self {
        Self { axis: -1, size, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Static,
}

/// Attributes of one quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizerAttributes {
    #[serde(default = "default_enable")]
    pub enable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_bits: Option<NumBits>,

    /// Quantization axis; `None` means per-tensor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_sizes: Option<BlockSizes>,
}

fn default_enable() -> bool {
    true
}

impl QuantizerAttributes {
    pub fn disabled() -> Self {
        Self {
            enable: false,
            num_bits: None,
            axis: None,
            block_sizes: None,
        }
    }

    pub fn int(bits: u8) -> Self {
        Self {
            num_bits: Some(NumBits::Integer(bits)),
            enable: true,
            ..Self::disabled()
        }
    }

    pub fn float(exponent: u8, mantissa: u8) -> Self {
        Self {
            num_bits: Some(NumBits::Float(exponent, mantissa)),
            enable: true,
            ..Self::disabled()
        }
    }

    pub fn with_axis(mut self, axis: Option<i32>) -> Self {
        self.axis = axis;
        self
    }

    pub fn with_blocks(mut self, blocks: BlockSizes) -> Self {
        self.block_sizes = Some(blocks);
        self
    }
}

/// A quantizer, or a chain of quantizers applied in sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuantizerSpec {
    Single(QuantizerAttributes),
    Chain(Vec<QuantizerAttributes>),
}

impl QuantizerSpec {
    pub fn disabled() -> Self {
        QuantizerSpec::Single(QuantizerAttributes::disabled())
    }

    /// True if any quantizer in the spec is enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            QuantizerSpec::Single(attrs) => attrs.enable,
            QuantizerSpec::Chain(chain) => chain.iter().any(|a| a.enable),
        }
    }
}

/// One `pattern -> quantizer` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantRule {
    pub pattern: String,
    pub quantizer: QuantizerSpec,
}

impl QuantRule {
    fn single(pattern: &str, attrs: QuantizerAttributes) -> Self {
        Self {
            pattern: pattern.to_string(),
            quantizer: QuantizerSpec::Single(attrs),
        }
    }

    fn disabled(pattern: &str) -> Self {
        Self::single(pattern, QuantizerAttributes::disabled())
    }

    fn matches(&self, module_name: &str) -> bool {
        if self.pattern == DEFAULT_RULE {
            return true;
        }
        Pattern::new(&self.pattern)
            .map(|p| p.matches(module_name))
            .unwrap_or(false)
    }
}

/// Calibration method the toolkit runs before fixing scales.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalibrationMethod {
    Max,
    Smoothquant,
    AwqLite { alpha_step: f32 },
}

/// Rule table plus calibration method, as consumed by the toolkit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub quant_cfg: Vec<QuantRule>,
    pub algorithm: CalibrationMethod,
}

impl AlgorithmConfig {
    /// Replace the rule for `pattern`, or append it if absent.
    pub fn set_rule(&mut self, pattern: &str, quantizer: QuantizerSpec) {
        match self.quant_cfg.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.quantizer = quantizer,
            None => self.quant_cfg.push(QuantRule {
                pattern: pattern.to_string(),
                quantizer,
            }),
        }
    }

    /// Rule stored under exactly `pattern`.
    pub fn rule(&self, pattern: &str) -> Option<&QuantizerSpec> {
        self.quant_cfg
            .iter()
            .find(|r| r.pattern == pattern)
            .map(|r| &r.quantizer)
    }

    /// Effective quantizer for a module: the last matching glob rule, else `default`.
    pub fn resolve(&self, module_name: &str) -> Option<&QuantizerSpec> {
        self.quant_cfg
            .iter()
            .filter(|r| r.pattern != DEFAULT_RULE)
            .rev()
            .find(|r| r.matches(module_name))
            .or_else(|| self.quant_cfg.iter().find(|r| r.pattern == DEFAULT_RULE))
            .map(|r| &r.quantizer)
    }
}
