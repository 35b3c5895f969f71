use std::path::Path;
use std::sync::Mutex;

use log::info;
use ndarray::{Array2, ArrayView4};
use ort::inputs;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::Value;

use super::ImageEncoder;
use crate::error::{DefectError, Result};

/// Runs an exported vision transformer (input `[N, 3, S, S]`, first output
/// `[N, D]`) through ONNX Runtime.
pub struct OnnxEncoder {
    session: Mutex<Session>,
    dimension: usize,
}

impl OnnxEncoder {
    pub fn open(model: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let model = model.as_ref();
        info!("loading onnx model: {}", model.display());

        // already-initialised environments are fine
        let _ = ort::init().with_name("defsearch").commit();

        let session = SessionBuilder::new()
            .map_err(encoder_error)?
            .commit_from_file(model)
            .map_err(encoder_error)?;
        Ok(Self { session: Mutex::new(session), dimension })
    }
}

impl ImageEncoder for OnnxEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = batch.dim();
        let data = batch.iter().copied().collect::<Vec<_>>();
        let input = Value::from_array((vec![n, c, h, w], data)).map_err(encoder_error)?;

        let mut session =
            self.session.lock().map_err(|_| DefectError::Encoder("session poisoned".into()))?;
        let outputs = session.run(inputs![input]).map_err(encoder_error)?;
        let (_, values) = outputs[0].try_extract_tensor::<f32>().map_err(encoder_error)?;

        if values.len() != n * self.dimension {
            return Err(DefectError::DimensionMismatch {
                expected: n * self.dimension,
                actual: values.len(),
            });
        }
        Array2::from_shape_vec((n, self.dimension), values.to_vec())
            .map_err(|e| DefectError::Encoder(e.to_string()))
    }
}

fn encoder_error(err: ort::Error) -> DefectError {
    DefectError::Encoder(err.to_string())
}
