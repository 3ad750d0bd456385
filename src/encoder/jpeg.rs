use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use std::borrow::Cow;

use crate::error::EncodeError;
use crate::pipeline::types::Frame;

/// Compress a frame to a baseline JPEG.
///
/// One channel encodes as luma, three as RGB; the alpha of a four channel
/// frame is dropped. `quality` is clamped to 1..=100.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Bytes, EncodeError> {
    if frame.is_empty() {
        return Err(EncodeError::EmptyFrame);
    }

    let (pixels, color): (Cow<'_, [u8]>, ExtendedColorType) = match frame.channels() {
        1 => (Cow::Borrowed(frame.data()), ExtendedColorType::L8),
        3 => (Cow::Borrowed(frame.data()), ExtendedColorType::Rgb8),
        4 => (
            Cow::Owned(
                frame
                    .data()
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect(),
            ),
            ExtendedColorType::Rgb8,
        ),
        n => return Err(EncodeError::UnsupportedChannels(n)),
    };

    let mut buffer = Vec::with_capacity(frame.data().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode(
        &pixels,
        frame.width(),
        frame.height(),
        color,
    )?;
    Ok(Bytes::from(buffer))
}
