//! # ONNX Embedding Engine
//!
//! Embedding generation with ONNX Runtime and a HuggingFace tokenizer,
//! loaded from a local model directory.
//!
//! - Batched inference: each call pads its texts to the longest sequence
//! - Mean or CLS pooling over the last hidden state
//! - CPU, CUDA or CoreML execution providers
//! - Output dimension probed from the graph at load time
//!
//! Vectors are returned raw; the service normalizes them.

use ndarray::{ArrayView, Ix2, Ix3, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, instrument, warn};

use async_trait::async_trait;

use crate::models::provision::ModelDirectory;
use crate::models::{Embedding, EmbeddingEngine, EmbeddingError, EmbeddingResult};
use crate::server::config::{Device, PoolingMode};

/// Model graph locations tried in order
pub const MODEL_CANDIDATES: [&str; 3] = ["model.onnx", "onnx/model.onnx", "model_optimized.onnx"];

/// Tokenizer locations tried in order
pub const TOKENIZER_CANDIDATES: [&str; 2] = ["tokenizer.json", "onnx/tokenizer.json"];

/// Configuration for the ONNX engine
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Path to ONNX Runtime library (DLL/so/dylib)
    pub library_path: Option<String>,
    pub device: Device,
    pub pooling: PoolingMode,
    /// Thread pool size for inference
    pub thread_pool_size: usize,
    /// Maximum sequence length
    pub max_seq_length: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            device: Device::Auto,
            pooling: PoolingMode::Mean,
            thread_pool_size: 4,
            max_seq_length: 512,
        }
    }
}

struct Inner {
    /// ONNX Runtime session, `run` needs exclusive access
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    pooling: PoolingMode,
    /// Whether the graph declares a `token_type_ids` input
    uses_token_type_ids: bool,
    pad_id: u32,
}

/// ONNX-based embedding engine
pub struct OnnxEmbeddingEngine {
    inner: Arc<Inner>,
    dimension: usize,
    device: Device,
}

impl std::fmt::Debug for OnnxEmbeddingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingEngine")
            .field("dimension", &self.dimension)
            .field("device", &self.device)
            .field("pooling", &self.inner.pooling)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingEngine {
    /// Load the graph and tokenizer from a model directory
    pub fn from_directory(directory: &ModelDirectory, config: &OnnxConfig) -> EmbeddingResult<Self> {
        let model_path = directory.locate(&MODEL_CANDIDATES).ok_or_else(|| {
            EmbeddingError::LoadFailure {
                error: format!("no ONNX graph found in {}", directory.root().display()),
            }
        })?;
        let tokenizer_path = directory.locate(&TOKENIZER_CANDIDATES).ok_or_else(|| {
            EmbeddingError::LoadFailure {
                error: format!("no tokenizer.json found in {}", directory.root().display()),
            }
        })?;
        Self::new(&model_path, &tokenizer_path, config)
    }

    /// Create a new ONNX embedding engine
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file (model.onnx)
    /// * `tokenizer_path` - Path to the tokenizer configuration file (tokenizer.json)
    /// * `config` - Device, pooling and runtime settings
    pub fn new(model_path: &Path, tokenizer_path: &Path, config: &OnnxConfig) -> EmbeddingResult<Self> {
        info!(
            "Initializing ONNX embedding engine with model: {} on {}",
            model_path.display(),
            config.device
        );

        if let Some(library_path) = &config.library_path {
            std::env::set_var("ORT_DYLIB_PATH", library_path);
            debug!("Set ORT_DYLIB_PATH to: {}", library_path);
        }

        let (session, device) = build_session(model_path, config)?;

        let uses_token_type_ids = session.inputs.iter().any(|i| i.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            EmbeddingError::LoadFailure {
                error: format!("Failed to load tokenizer: {}", e),
            }
        })?;
        let pad_id = tokenizer.get_padding().map(|p| p.pad_id).unwrap_or(0);
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_seq_length,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::LoadFailure {
                error: format!("Failed to configure truncation: {}", e),
            })?;

        let inner = Inner {
            session: Mutex::new(session),
            tokenizer,
            pooling: config.pooling,
            uses_token_type_ids,
            pad_id,
        };

        // Probe once so the output dimension is known before serving
        let probe = inner
            .infer(&["dimension probe".to_string()])
            .map_err(|e| EmbeddingError::LoadFailure {
                error: format!("probe inference failed: {}", e),
            })?;
        let dimension = probe.first().map(|v| v.len()).unwrap_or(0);
        if dimension == 0 {
            return Err(EmbeddingError::LoadFailure {
                error: "model produced an empty embedding".to_string(),
            });
        }

        info!(
            "ONNX embedding engine initialized: dimension {}, {:?} pooling, {} threads",
            dimension, config.pooling, config.thread_pool_size
        );

        Ok(Self {
            inner: Arc::new(inner),
            dimension,
            device,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

#[async_trait]
impl EmbeddingEngine for OnnxEmbeddingEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[instrument(skip(self, texts), fields(text_count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.infer(&texts))
            .await
            .map_err(|e| EmbeddingError::InferenceError {
                error: format!("inference task aborted: {}", e),
            })?
    }

    fn backend(&self) -> &str {
        "onnxruntime"
    }
}

impl Inner {
    /// Tokenize, pad, run and pool one batch
    fn infer(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        let encodings = texts
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| EmbeddingError::InferenceError {
                        error: format!("Tokenization failed: {}", e),
                    })
            })
            .collect::<EmbeddingResult<Vec<_>>>()?;

        let batch = encodings.len();
        let max_len = encodings
            .iter()
            .map(|enc| enc.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut input_ids = Vec::with_capacity(batch * max_len);
        let mut attention_mask = Vec::with_capacity(batch * max_len);
        for encoding in &encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            input_ids.extend(ids.iter().map(|&id| id as i64));
            attention_mask.extend(mask.iter().map(|&m| m as i64));

            let padding = max_len - ids.len();
            input_ids.extend(std::iter::repeat(self.pad_id as i64).take(padding));
            attention_mask.extend(std::iter::repeat(0i64).take(padding));
        }
        let mask_for_pooling = attention_mask.clone();

        let shape = [batch as i64, max_len as i64];
        let mut inputs = vec![
            ("input_ids", tensor(shape, input_ids)?),
            ("attention_mask", tensor(shape, attention_mask)?),
        ];
        if self.uses_token_type_ids {
            inputs.push(("token_type_ids", tensor(shape, vec![0i64; batch * max_len])?));
        }

        let mut session = self.session.lock().map_err(|_| EmbeddingError::InferenceError {
            error: "ONNX session lock poisoned".to_string(),
        })?;
        let outputs = session.run(inputs).map_err(|e| EmbeddingError::InferenceError {
            error: format!("ONNX inference failed: {}", e),
        })?;

        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::InferenceError {
                error: format!("Failed to extract output tensor: {}", e),
            })?;
        let dims: Vec<usize> = out_shape.iter().map(|&x| x as usize).collect();
        let view = ArrayView::from_shape(IxDyn(&dims), data).map_err(|e| {
            EmbeddingError::InferenceError {
                error: format!("Failed to create output array view: {:?}", e),
            }
        })?;

        match dims.len() {
            3 => {
                let hidden = view.into_dimensionality::<Ix3>().map_err(shape_error)?;
                Ok(pool(&hidden, &mask_for_pooling, max_len, self.pooling))
            }
            // Graphs exported with pooling built in
            2 => {
                let pooled = view.into_dimensionality::<Ix2>().map_err(shape_error)?;
                Ok(pooled.outer_iter().map(|row| row.to_vec()).collect())
            }
            n => Err(EmbeddingError::InferenceError {
                error: format!("Expected 2D or 3D output tensor, got {}D", n),
            }),
        }
    }
}

/// Reduce `[batch, seq_len, hidden]` token states to one vector per text
pub(crate) fn pool(
    hidden: &ndarray::ArrayView3<f32>,
    attention_mask: &[i64],
    seq_len: usize,
    mode: PoolingMode,
) -> Vec<Embedding> {
    let (batch, tokens, width) = hidden.dim();
    let mut pooled = Vec::with_capacity(batch);

    for b in 0..batch {
        let mut vector = vec![0.0f32; width];
        match mode {
            PoolingMode::Cls => {
                for h in 0..width {
                    vector[h] = hidden[[b, 0, h]];
                }
            }
            PoolingMode::Mean => {
                let mut valid_tokens = 0usize;
                for t in 0..tokens.min(seq_len) {
                    if attention_mask[b * seq_len + t] == 1 {
                        for h in 0..width {
                            vector[h] += hidden[[b, t, h]];
                        }
                        valid_tokens += 1;
                    }
                }
                let divisor = valid_tokens.max(1) as f32;
                for val in &mut vector {
                    *val /= divisor;
                }
            }
        }
        pooled.push(vector);
    }
    pooled
}

fn tensor(shape: [i64; 2], data: Vec<i64>) -> EmbeddingResult<Tensor<i64>> {
    Tensor::from_array((shape, data)).map_err(|e| EmbeddingError::InferenceError {
        error: format!("Failed to create input tensor: {}", e),
    })
}

fn shape_error(e: ndarray::ShapeError) -> EmbeddingError {
    EmbeddingError::InferenceError {
        error: format!("Unexpected output shape: {:?}", e),
    }
}

fn session_with(
    model_path: &Path,
    config: &OnnxConfig,
    provider: ExecutionProviderDispatch,
) -> EmbeddingResult<Session> {
    Session::builder()?
        .with_execution_providers([provider])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(config.thread_pool_size)?
        .commit_from_file(model_path)
        .map_err(|e| EmbeddingError::LoadFailure {
            error: format!("Failed to load ONNX model: {}", e),
        })
}

/// Build a session on the configured device. `Auto` tries CUDA first.
fn build_session(model_path: &Path, config: &OnnxConfig) -> EmbeddingResult<(Session, Device)> {
    let cpu = || CPUExecutionProvider::default().build();
    match config.device {
        Device::Cpu => Ok((session_with(model_path, config, cpu())?, Device::Cpu)),
        Device::Cuda(id) => {
            let provider = CUDAExecutionProvider::default()
                .with_device_id(id)
                .build()
                .error_on_failure();
            Ok((session_with(model_path, config, provider)?, Device::Cuda(id)))
        }
        Device::CoreMl => {
            let provider = CoreMLExecutionProvider::default().build().error_on_failure();
            Ok((session_with(model_path, config, provider)?, Device::CoreMl))
        }
        Device::Auto => {
            let provider = CUDAExecutionProvider::default().build().error_on_failure();
            match session_with(model_path, config, provider) {
                Ok(session) => {
                    info!("✅ CUDA execution provider initialized");
                    Ok((session, Device::Cuda(0)))
                }
                Err(e) => {
                    warn!("⚠️  CUDA execution provider unavailable: {}", e);
                    warn!("   Falling back to CPU execution provider");
                    Ok((session_with(model_path, config, cpu())?, Device::Cpu))
                }
            }
        }
    }
}

/// Graph and tokenizer paths the engine would load from
pub fn resolve_paths(directory: &ModelDirectory) -> (Option<PathBuf>, Option<PathBuf>) {
    (
        directory.locate(&MODEL_CANDIDATES),
        directory.locate(&TOKENIZER_CANDIDATES),
    )
}
