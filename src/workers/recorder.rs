//! Rotating recorder
//!
//! Every output file holds frames of a single geometry. When the incoming
//! (width, height, channels) signature changes, the current file is
//! finalized and `<base>-<N><ext>` is opened with the next sequence number.

use log::{info, warn};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::assets::{DEFAULT_OUTPUT_EXT, FRAME_RATE, RECORD_JPEG_QUALITY};
use crate::encoder::encode_jpeg;
use crate::error::RecordError;
use crate::pipeline::types::{Frame, Geometry};

/// An open output file accepting frames of one geometry
pub trait VideoWriter: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), RecordError>;

    /// Flush and close the output
    fn finish(&mut self) -> Result<(), RecordError>;
}

/// Opens a [`VideoWriter`] for a new output file
pub trait WriterFactory: Send {
    fn open(
        &mut self,
        path: &Path,
        geometry: Geometry,
        fps: f64,
        color: bool,
    ) -> Result<Box<dyn VideoWriter>, RecordError>;
}

/// Motion-JPEG files: one JPEG per frame, concatenated
pub struct MjpegWriterFactory {
    quality: u8,
}

impl MjpegWriterFactory {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl Default for MjpegWriterFactory {
    fn default() -> Self {
        Self::new(RECORD_JPEG_QUALITY)
    }
}

impl WriterFactory for MjpegWriterFactory {
    fn open(
        &mut self,
        path: &Path,
        geometry: Geometry,
        _fps: f64,
        _color: bool,
    ) -> Result<Box<dyn VideoWriter>, RecordError> {
        let file = File::create(path)?;
        Ok(Box::new(MjpegWriter {
            out: Some(BufWriter::new(file)),
            geometry,
            quality: self.quality,
        }))
    }
}

struct MjpegWriter {
    out: Option<BufWriter<File>>,
    geometry: Geometry,
    quality: u8,
}

impl VideoWriter for MjpegWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), RecordError> {
        if frame.geometry() != self.geometry {
            return Err(RecordError::FormatMismatch {
                expected: self.geometry.to_string(),
                actual: frame.geometry().to_string(),
            });
        }
        let Some(out) = self.out.as_mut() else {
            return Err(RecordError::Io(std::io::Error::other("writer is closed")));
        };
        let jpeg = encode_jpeg(frame, self.quality)?;
        out.write_all(&jpeg)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecordError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}

pub struct RecordingSink {
    base: PathBuf,
    ext: String,
    fps: f64,
    counter: u64,
    signature: Option<Geometry>,
    writer: Option<Box<dyn VideoWriter>>,
    current: Option<PathBuf>,
    factory: Box<dyn WriterFactory>,
}

impl RecordingSink {
    /// Recorder writing Motion-JPEG files derived from `output`
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self::with_factory(output, Box::new(MjpegWriterFactory::default()))
    }

    pub fn with_factory(output: impl AsRef<Path>, factory: Box<dyn WriterFactory>) -> Self {
        let output = output.as_ref();
        let ext = match output.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => DEFAULT_OUTPUT_EXT.to_string(),
        };
        Self {
            base: output.with_extension(""),
            ext,
            fps: FRAME_RATE,
            counter: 0,
            signature: None,
            writer: None,
            current: None,
            factory,
        }
    }

    /// Frame rate stored in new outputs. Non-positive rates are ignored.
    pub fn set_rate(&mut self, fps: f64) {
        if fps > 0.0 && fps.is_finite() {
            self.fps = fps;
        }
    }

    pub fn rate(&self) -> f64 {
        self.fps
    }

    /// `<base>-<n><ext>`
    pub fn file_name(&self, n: u64) -> PathBuf {
        let mut name = OsString::from(self.base.as_os_str());
        name.push(format!("-{n}{}", self.ext));
        PathBuf::from(name)
    }

    /// File currently being written, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Number of output files opened so far
    pub fn files_opened(&self) -> u64 {
        self.counter
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), RecordError> {
        if frame.is_empty() {
            return Ok(());
        }

        let geometry = frame.geometry();
        if let Some(previous) = self.signature
            && self.writer.is_some()
            && previous != geometry
        {
            info!("Recorder: format changed ({previous} -> {geometry}), rotating output");
            self.finish_output()?;
        }

        if self.writer.is_none() {
            let path = self.file_name(self.counter);
            self.counter += 1;
            self.signature = Some(geometry);

            let color = geometry.channels != 1;
            let writer = self.factory.open(&path, geometry, self.fps, color)?;
            info!(
                "Recorder: writing {} ({}, {}, {:.1} fps)",
                path.display(),
                geometry,
                if color { "color" } else { "mono" },
                self.fps
            );
            self.writer = Some(writer);
            self.current = Some(path);
        }

        match self.writer.as_mut() {
            Some(writer) => writer.write(frame),
            None => Ok(()),
        }
    }

    fn finish_output(&mut self) -> Result<(), RecordError> {
        self.current = None;
        match self.writer.take() {
            Some(mut writer) => writer.finish(),
            None => Ok(()),
        }
    }

    /// Finalize the open output. Safe to call any number of times.
    pub fn release(&mut self) {
        let path = self.current.clone();
        if let Err(e) = self.finish_output() {
            warn!("Recorder: failed to finalize output: {e}");
        } else if let Some(path) = path {
            info!("Recorder: closed {}", path.display());
        }
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn jpeg_count(bytes: &[u8]) -> usize {
        bytes
            .windows(3)
            .filter(|w| *w == [0xFF, 0xD8, 0xFF])
            .count()
    }

    #[test]
    fn test_rotation_on_geometry_change() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("capture.mjpeg");
        let mut sink = RecordingSink::new(&output);

        for (w, h, c) in [(64, 48, 3), (64, 48, 3), (32, 24, 3), (64, 48, 3)] {
            sink.write(&Frame::new(w, h, c)).unwrap();
        }
        sink.release();

        let names: Vec<PathBuf> = (0..3).map(|n| dir.path().join(format!("capture-{n}.mjpeg"))).collect();
        for name in &names {
            assert!(name.exists(), "{} missing", name.display());
        }
        assert!(!dir.path().join("capture-3.mjpeg").exists());
        assert_eq!(sink.files_opened(), 3);

        let first = std::fs::read(&names[0]).unwrap();
        assert_eq!(jpeg_count(&first), 2);
        assert_eq!(jpeg_count(&std::fs::read(&names[1]).unwrap()), 1);
    }

    #[test]
    fn test_default_extension() {
        let sink = RecordingSink::new("out/recording");
        assert_eq!(sink.file_name(4), PathBuf::from("out/recording-4.mjpeg"));
    }

    #[test]
    fn test_set_rate_ignores_non_positive() {
        let mut sink = RecordingSink::new("capture.mjpeg");
        sink.set_rate(0.0);
        sink.set_rate(-5.0);
        assert_eq!(sink.rate(), FRAME_RATE);
        sink.set_rate(25.0);
        assert_eq!(sink.rate(), 25.0);
    }

    #[derive(Clone, Default)]
    struct Opened(Arc<Mutex<Vec<(PathBuf, bool)>>>);

    struct NullWriter;

    impl VideoWriter for NullWriter {
        fn write(&mut self, _frame: &Frame) -> Result<(), RecordError> {
            Ok(())
        }

        fn finish(&mut self) -> Result<(), RecordError> {
            Ok(())
        }
    }

    impl WriterFactory for Opened {
        fn open(
            &mut self,
            path: &Path,
            _geometry: Geometry,
            _fps: f64,
            color: bool,
        ) -> Result<Box<dyn VideoWriter>, RecordError> {
            self.0.lock().unwrap().push((path.to_path_buf(), color));
            Ok(Box::new(NullWriter))
        }
    }

    #[test]
    fn test_channel_change_rotates_to_mono() {
        let opened = Opened::default();
        let mut sink = RecordingSink::with_factory("rec.avi", Box::new(opened.clone()));

        sink.write(&Frame::new(8, 8, 3)).unwrap();
        sink.write(&Frame::new(8, 8, 1)).unwrap();
        sink.write(&Frame::empty()).unwrap();

        let opened = opened.0.lock().unwrap();
        assert_eq!(
            *opened,
            vec![
                (PathBuf::from("rec-0.avi"), true),
                (PathBuf::from("rec-1.avi"), false)
            ]
        );
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RecordingSink::new(dir.path().join("a.mjpeg"));
        sink.write(&Frame::new(4, 4, 1)).unwrap();
        assert!(sink.current_path().is_some());

        sink.release();
        sink.release();
        assert!(sink.current_path().is_none());

        // a later frame reopens with the next sequence number
        sink.write(&Frame::new(4, 4, 1)).unwrap();
        assert!(dir.path().join("a-1.mjpeg").exists());
    }

    #[test]
    fn test_open_failure_is_error() {
        let mut sink = RecordingSink::new("/nonexistent-dir/framecast/out.mjpeg");
        assert!(matches!(
            sink.write(&Frame::new(2, 2, 3)),
            Err(RecordError::Io(_))
        ));
    }
}
