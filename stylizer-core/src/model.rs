use std::{fmt, fmt::Write, path::Path, sync::Arc};

use anyhow::{Context, Result as AnyResult};
use log::{debug, warn};
use ndarray::Array3;
use stylizer_utils::ModelSettings;
use tract_onnx::prelude::{
    Datum, DatumType, Framework, Graph, InferenceFact, InferenceModelExt, IntoTensor, SimplePlan,
    Tensor, TypedFact, TypedOp, tvec,
};

use crate::error::{Result, StylizerError};
use crate::preprocess::TensorSize;
use crate::tensor::{ImageTensor, TensorData, ValueRange};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tensor contract of a style model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelMetadata {
    pub tensor_size: TensorSize,
    pub channels: usize,
    /// Range the preprocessor writes into the input tensor.
    pub input_range: ValueRange,
    /// Range of the model output; `None` means the same as `input_range`.
    pub output_range: Option<ValueRange>,
}

impl ModelMetadata {
    pub fn validate(&self) -> Result<()> {
        if self.tensor_size.width == 0 || self.tensor_size.height == 0 {
            return Err(StylizerError::config(format!(
                "model tensor size must be non-zero (got {}x{})",
                self.tensor_size.width, self.tensor_size.height
            )));
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(StylizerError::config(format!(
                "model tensors must have 1, 3 or 4 channels (got {})",
                self.channels
            )));
        }
        self.input_range.validate()?;
        self.output_range().validate()
    }

    /// Range used to turn the model output back into pixels.
    pub fn output_range(&self) -> ValueRange {
        self.output_range.unwrap_or(self.input_range)
    }
}

impl Default for ModelMetadata {
    fn default() -> Self {
        (&ModelSettings::default()).into()
    }
}

impl From<&ModelSettings> for ModelMetadata {
    fn from(settings: &ModelSettings) -> Self {
        Self {
            tensor_size: TensorSize::new(settings.tensor_width, settings.tensor_height),
            channels: settings.channels as usize,
            input_range: settings.input_range.into(),
            output_range: settings.output_range.map(Into::into),
        }
    }
}

/// Black-box style model.
///
/// Implementations receive the preprocessed tensor and return their output tensors. An empty
/// vector, or an empty first tensor, means no stylization is available for this input.
pub trait StylizerModel: Send + Sync {
    fn run(&self, input: &ImageTensor) -> AnyResult<Vec<ImageTensor>>;
}

impl<F> StylizerModel for F
where
    F: Fn(&ImageTensor) -> AnyResult<Vec<ImageTensor>> + Send + Sync,
{
    fn run(&self, input: &ImageTensor) -> AnyResult<Vec<ImageTensor>> {
        self(input)
    }
}

/// Model handle plus the metadata describing its tensors.
#[derive(Clone)]
pub struct ModelResources {
    metadata: ModelMetadata,
    model: Arc<dyn StylizerModel>,
}

impl ModelResources {
    pub fn new(metadata: ModelMetadata, model: Arc<dyn StylizerModel>) -> Result<Self> {
        metadata.validate()?;
        Ok(Self { metadata, model })
    }

    /// Load an ONNX model described by `settings`.
    pub fn from_onnx<P: AsRef<Path>>(path: P, settings: &ModelSettings) -> Result<Self> {
        let metadata = ModelMetadata::from(settings);
        metadata.validate()?;
        let model = OnnxStylizerModel::load(path, metadata)?;
        Self::new(metadata, Arc::new(model))
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn model(&self) -> &dyn StylizerModel {
        self.model.as_ref()
    }
}

impl fmt::Debug for ModelResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelResources")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Style model executed with `tract-onnx` on NHWC tensors (`[1, H, W, C]`).
#[derive(Debug)]
pub struct OnnxStylizerModel {
    runnable: RunnableModel,
    metadata: ModelMetadata,
}

impl OnnxStylizerModel {
    /// Load and optimize the ONNX graph, falling back to the decluttered graph when the
    /// optimizer rejects it.
    pub fn load<P: AsRef<Path>>(model_path: P, metadata: ModelMetadata) -> AnyResult<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(path.exists(), "model file not found: {}", path.display());

        let runnable = match load_runnable_model(path, &metadata, true) {
            Ok(model) => {
                debug!(
                    "style model {} optimized successfully ({}x{}x{})",
                    path.display(),
                    metadata.tensor_size.width,
                    metadata.tensor_size.height,
                    metadata.channels
                );
                model
            }
            Err(opt_err) => {
                let optimize_msg = format!("{opt_err}");
                let mut chain_msg = String::new();
                for cause in opt_err.chain() {
                    let _ = writeln!(&mut chain_msg, "  - {cause}");
                }
                warn!(
                    "style model {} failed optimized load ({}); falling back to decluttered graph.\nError chain:\n{}",
                    path.display(),
                    optimize_msg,
                    chain_msg.trim_end()
                );
                load_runnable_model(path, &metadata, false).with_context(|| {
                    format!(
                        "fallback to decluttered style graph failed after optimize error: {optimize_msg}"
                    )
                })?
            }
        };

        Ok(Self { runnable, metadata })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

impl StylizerModel for OnnxStylizerModel {
    fn run(&self, input: &ImageTensor) -> AnyResult<Vec<ImageTensor>> {
        let outputs = self
            .runnable
            .run(tvec![to_tract_tensor(input, &self.metadata)?.into()])
            .map_err(|e| anyhow::anyhow!("style model execution failed: {e}"))?;

        outputs
            .into_iter()
            .map(|value| from_tract_tensor(value.into_tensor(), self.metadata.output_range()))
            .collect()
    }
}

fn load_runnable_model(
    path: &Path,
    metadata: &ModelMetadata,
    optimized: bool,
) -> AnyResult<RunnableModel> {
    let shape = [
        1,
        metadata.tensor_size.height as usize,
        metadata.tensor_size.width as usize,
        metadata.channels,
    ];
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?
        .with_input_fact(0, input_fact(metadata.input_range, shape))
        .map_err(|e| anyhow::anyhow!("unable to set style model input shape: {e}"))?;

    if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize style graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make style graph runnable: {e}"))
    } else {
        model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check style graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter style graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make style graph runnable: {e}"))
    }
}

/// Element type the model input is fed as.
fn input_datum(range: ValueRange) -> DatumType {
    match range {
        ValueRange::Float { .. } => f32::datum_type(),
        ValueRange::Quantized { min, max } if min >= 0 && max <= u8::MAX as i64 => {
            u8::datum_type()
        }
        ValueRange::Quantized { min, max } if min >= i8::MIN as i64 && max <= i8::MAX as i64 => {
            i8::datum_type()
        }
        ValueRange::Quantized { .. } => i32::datum_type(),
    }
}

fn input_fact(range: ValueRange, shape: [usize; 4]) -> InferenceFact {
    InferenceFact::dt_shape(input_datum(range), shape)
}

fn to_tract_tensor(input: &ImageTensor, metadata: &ModelMetadata) -> AnyResult<Tensor> {
    let (h, w, c) = input.dims();
    let shape = [1, h, w, c];
    let tensor = match input.data() {
        TensorData::Float(values) => {
            let flat: Vec<f32> = values.iter().copied().collect();
            Tensor::from_shape(&shape, &flat)?
        }
        TensorData::Quantized(values) => {
            let flat: Vec<i32> = values.iter().copied().collect();
            let wide = Tensor::from_shape(&shape, &flat)?;
            let datum = input_datum(metadata.input_range);
            if datum == i32::datum_type() {
                wide
            } else {
                wide.cast_to_dt(datum)?.into_owned()
            }
        }
    };
    Ok(tensor)
}

fn from_tract_tensor(tensor: Tensor, range: ValueRange) -> AnyResult<ImageTensor> {
    let dims: [usize; 3] = match *tensor.shape() {
        [1, h, w, c] | [h, w, c] => [h, w, c],
        ref other => anyhow::bail!("style model output must be NHWC, got shape {other:?}"),
    };
    let data = match range {
        ValueRange::Float { .. } => {
            let values = tensor.cast_to::<f32>()?;
            TensorData::Float(Array3::from_shape_vec(dims, values.as_slice::<f32>()?.to_vec())?)
        }
        ValueRange::Quantized { .. } => {
            let values = tensor.cast_to::<i32>()?;
            TensorData::Quantized(Array3::from_shape_vec(
                dims,
                values.as_slice::<i32>()?.to_vec(),
            )?)
        }
    };
    Ok(ImageTensor::new(data, range)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_defaults_output_range_to_input_range() {
        let metadata = ModelMetadata::default();
        assert_eq!(metadata.tensor_size, TensorSize::new(256, 256));
        assert_eq!(metadata.output_range(), ValueRange::UNIT);

        let quantized = ModelMetadata {
            output_range: Some(ValueRange::UINT8),
            ..metadata
        };
        assert_eq!(quantized.output_range(), ValueRange::UINT8);
    }

    #[test]
    fn metadata_rejects_bad_contracts() {
        let zero = ModelMetadata {
            tensor_size: TensorSize::new(0, 256),
            ..ModelMetadata::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(StylizerError::InvalidConfiguration(_))
        ));
        let two_channels = ModelMetadata {
            channels: 2,
            ..ModelMetadata::default()
        };
        assert!(two_channels.validate().is_err());
    }

    #[test]
    fn quantized_inputs_use_narrowest_datum() {
        assert_eq!(input_datum(ValueRange::UINT8), u8::datum_type());
        assert_eq!(
            input_datum(ValueRange::Quantized { min: -128, max: 127 }),
            i8::datum_type()
        );
        assert_eq!(
            input_datum(ValueRange::Quantized { min: 0, max: 1023 }),
            i32::datum_type()
        );
        assert_eq!(input_datum(ValueRange::UNIT), f32::datum_type());
    }

    #[test]
    fn tract_tensors_round_trip_through_nhwc() {
        let image = image::RgbaImage::from_fn(3, 2, |x, y| image::Rgba([x as u8 * 80, y as u8 * 90, 5, 255]));
        let metadata = ModelMetadata {
            tensor_size: TensorSize::new(3, 2),
            output_range: Some(ValueRange::UINT8),
            input_range: ValueRange::UINT8,
            channels: 3,
        };
        let input = ImageTensor::from_image(&image, 3, ValueRange::UINT8).expect("tensor");
        let tract = to_tract_tensor(&input, &metadata).expect("to tract");
        assert_eq!(tract.shape(), &[1, 2, 3, 3]);
        assert_eq!(tract.datum_type(), u8::datum_type());

        let back = from_tract_tensor(tract, ValueRange::UINT8).expect("from tract");
        assert_eq!(back, input);
    }

    #[test]
    fn non_image_outputs_are_rejected() {
        let tensor = Tensor::from_shape(&[4, 4], &[0f32; 16]).expect("tensor");
        assert!(from_tract_tensor(tensor, ValueRange::UNIT).is_err());
    }

    #[test]
    fn closures_act_as_models() {
        let model = |input: &ImageTensor| -> AnyResult<Vec<ImageTensor>> { Ok(vec![input.clone()]) };
        let resources =
            ModelResources::new(ModelMetadata::default(), Arc::new(model)).expect("resources");
        let input = ImageTensor::from_image(&image::RgbaImage::new(2, 2), 3, ValueRange::UNIT)
            .expect("tensor");
        let out = resources.model().run(&input).expect("run");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn loading_missing_model_fails() {
        let err = OnnxStylizerModel::load("does/not/exist.onnx", ModelMetadata::default())
            .expect_err("missing file");
        assert!(format!("{err}").contains("model file not found"));
    }
}
