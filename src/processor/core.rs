//! Built-in reference steps.
//!
//! These are deliberately simple per-pixel kernels; heavier image algorithms
//! plug in through [`StepRegistry::register`].

use serde::Deserialize;

use super::TransformStep;
use super::registry::{ConfigurableStep, StepRegistry};
use crate::error::StepError;
use crate::pipeline::types::{Frame, Geometry};

pub fn register_builtin(registry: &mut StepRegistry) {
    registry
        .register_step::<Passthrough>("passthrough")
        .register_step::<Grayscale>("grayscale")
        .register_step::<Invert>("invert")
        .register_step::<Threshold>("threshold")
        .register_step::<Flip>("flip")
        .register_step::<Downscale>("downscale");
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoParams {}

/// Copies the input unchanged
pub struct Passthrough {
    name: String,
}

impl TransformStep for Passthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
        dst.copy_from(src);
        Ok(())
    }
}

impl ConfigurableStep for Passthrough {
    type Params = NoParams;

    fn from_params(name: &str, _params: NoParams) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// RGB(A) to single channel luma. Mono input is copied through.
pub struct Grayscale {
    name: String,
}

impl TransformStep for Grayscale {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
        let channels = src.channels() as usize;
        match channels {
            1 => {
                dst.copy_from(src);
                Ok(())
            }
            3 | 4 => {
                dst.reshape(Geometry::new(src.width(), src.height(), 1));
                for (out, px) in dst
                    .data_mut()
                    .iter_mut()
                    .zip(src.data().chunks_exact(channels))
                {
                    let luma = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
                    *out = (luma >> 8) as u8;
                }
                Ok(())
            }
            n => Err(StepError::UnsupportedInput(format!(
                "grayscale expects 1, 3 or 4 channels, got {n}"
            ))),
        }
    }
}

impl ConfigurableStep for Grayscale {
    type Params = NoParams;

    fn from_params(name: &str, _params: NoParams) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Photographic negative
pub struct Invert {
    name: String,
}

impl TransformStep for Invert {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
        dst.reshape(src.geometry());
        for (out, value) in dst.data_mut().iter_mut().zip(src.data()) {
            *out = 255 - value;
        }
        Ok(())
    }
}

impl ConfigurableStep for Invert {
    type Params = NoParams;

    fn from_params(name: &str, _params: NoParams) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdParams {
    pub value: u8,
    pub max: u8,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            value: 127,
            max: 255,
        }
    }
}

/// Binary threshold applied to every sample
pub struct Threshold {
    name: String,
    params: ThresholdParams,
}

impl TransformStep for Threshold {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), StepError> {
        if self.params.max == 0 {
            return Err(StepError::InvalidParameter(
                "max must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
        let ThresholdParams { value, max } = self.params;
        dst.reshape(src.geometry());
        for (out, sample) in dst.data_mut().iter_mut().zip(src.data()) {
            *out = if *sample > value { max } else { 0 };
        }
        Ok(())
    }
}

impl ConfigurableStep for Threshold {
    type Params = ThresholdParams;

    fn from_params(name: &str, params: ThresholdParams) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipMode {
    #[default]
    Horizontal,
    Vertical,
    Both,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlipParams {
    pub mode: FlipMode,
}

/// Mirror around the vertical axis, the horizontal axis, or both
pub struct Flip {
    name: String,
    mode: FlipMode,
}

impl TransformStep for Flip {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
        let (width, height) = (src.width() as usize, src.height() as usize);
        let channels = src.channels() as usize;
        let stride = src.stride();
        let mirror_x = matches!(self.mode, FlipMode::Horizontal | FlipMode::Both);
        let mirror_y = matches!(self.mode, FlipMode::Vertical | FlipMode::Both);

        dst.reshape(src.geometry());
        let out = dst.data_mut();
        for y in 0..height {
            let sy = if mirror_y { height - 1 - y } else { y };
            let src_row = &src.data()[sy * stride..(sy + 1) * stride];
            let dst_row = &mut out[y * stride..(y + 1) * stride];
            if !mirror_x {
                dst_row.copy_from_slice(src_row);
                continue;
            }
            for x in 0..width {
                let sx = width - 1 - x;
                dst_row[x * channels..(x + 1) * channels]
                    .copy_from_slice(&src_row[sx * channels..(sx + 1) * channels]);
            }
        }
        Ok(())
    }
}

impl ConfigurableStep for Flip {
    type Params = FlipParams;

    fn from_params(name: &str, params: FlipParams) -> Self {
        Self {
            name: name.to_string(),
            mode: params.mode,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownscaleParams {
    pub factor: u32,
}

impl Default for DownscaleParams {
    fn default() -> Self {
        Self { factor: 2 }
    }
}

/// Nearest-neighbour size reduction by an integer factor
pub struct Downscale {
    name: String,
    factor: u32,
}

impl TransformStep for Downscale {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), StepError> {
        if !(1..=16).contains(&self.factor) {
            return Err(StepError::InvalidParameter(format!(
                "factor must be between 1 and 16, got {}",
                self.factor
            )));
        }
        Ok(())
    }

    fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
        let factor = self.factor.max(1);
        let width = (src.width() / factor).max(1);
        let height = (src.height() / factor).max(1);
        let channels = src.channels() as usize;
        let stride = src.stride();

        dst.reshape(Geometry::new(width, height, src.channels()));
        let out_stride = dst.stride();
        let out = dst.data_mut();
        for y in 0..height as usize {
            let sy = y * factor as usize;
            for x in 0..width as usize {
                let sx = x * factor as usize;
                let from = sy * stride + sx * channels;
                let to = y * out_stride + x * channels;
                out[to..to + channels].copy_from_slice(&src.data()[from..from + channels]);
            }
        }
        Ok(())
    }
}

impl ConfigurableStep for Downscale {
    type Params = DownscaleParams;

    fn from_params(name: &str, params: DownscaleParams) -> Self {
        Self {
            name: name.to_string(),
            factor: params.factor,
        }
    }
}
