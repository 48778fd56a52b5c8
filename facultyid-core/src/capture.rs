use crate::config::CameraConfig;
use image::{ImageBuffer, RgbImage};
use thiserror::Error;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture as V4lCapture;
use v4l::{Device, FourCC};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open camera device: {0}")]
    DeviceOpen(String),
    #[error("Failed to capture frame: {0}")]
    Capture(String),
    #[error("Frame conversion failed: {0}")]
    Conversion(String),
}

/// Pixel formats the camera is asked for, in order of preference
const PREFERRED_FORMATS: [&[u8; 4]; 2] = [b"MJPG", b"YUYV"];

/// Webcam delivering RGB frames
pub struct Camera {
    device: Device,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        let index = device_index(&config.device);
        let device = Device::new(index)
            .map_err(|e| CaptureError::DeviceOpen(format!("{}: {}", config.device, e)))?;

        let mut format = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to get format: {}", e)))?;
        format.width = config.width;
        format.height = config.height;

        for fourcc in PREFERRED_FORMATS {
            format.fourcc = FourCC::new(fourcc);
            if device.set_format(&format).is_ok() {
                break;
            }
        }

        let actual = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to verify format: {}", e)))?;

        log::info!(
            "Camera {} opened: {}x{} {}",
            config.device,
            actual.width,
            actual.height,
            actual.fourcc
        );

        Ok(Self {
            device,
            width: actual.width,
            height: actual.height,
            format: actual.fourcc,
        })
    }

    /// Read the next frame as RGB
    pub fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let mut stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, 4)
            .map_err(|e| CaptureError::Capture(format!("Failed to create stream: {}", e)))?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| CaptureError::Capture(e.to_string()))?;

        match self.format.str() {
            Ok("MJPG") => image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .map(|img| img.to_rgb8())
                .map_err(|e| CaptureError::Conversion(format!("MJPEG decode failed: {}", e))),
            Ok("YUYV") => yuyv_to_rgb(buf, self.width, self.height),
            _ => Err(CaptureError::Conversion(format!(
                "Unsupported pixel format: {}",
                self.format
            ))),
        }
    }
}

/// `/dev/video2` -> 2; a bare number is taken as is
fn device_index(device: &str) -> usize {
    device
        .trim_start_matches("/dev/video")
        .parse::<usize>()
        .unwrap_or(0)
}

/// Convert packed YUYV (Y0 U Y1 V per two pixels) to RGB
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let pixels = (width * height) as usize;
    if data.len() < pixels * 2 {
        return Err(CaptureError::Conversion("YUYV buffer too small".to_string()));
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let u = chunk[1] as i32 - 128;
        let v = chunk[3] as i32 - 128;
        for y in [chunk[0] as i32, chunk[2] as i32] {
            rgb.push((y + ((1436 * v) >> 10)).clamp(0, 255) as u8);
            rgb.push((y - ((354 * u + 732 * v) >> 10)).clamp(0, 255) as u8);
            rgb.push((y + ((1814 * u) >> 10)).clamp(0, 255) as u8);
        }
    }

    ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::Conversion("Failed to create RGB image".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_index() {
        assert_eq!(device_index("/dev/video2"), 2);
        assert_eq!(device_index("1"), 1);
        assert_eq!(device_index("webcam"), 0);
    }

    #[test]
    fn test_yuyv_grey() {
        // Neutral chroma leaves luma as grey
        let data = [100, 128, 200, 128, 50, 128, 0, 128];
        let rgb = yuyv_to_rgb(&data, 2, 2).unwrap();

        assert_eq!(rgb.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 200, 200]);
        assert_eq!(rgb.get_pixel(0, 1).0, [50, 50, 50]);
        assert_eq!(rgb.get_pixel(1, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(yuyv_to_rgb(&[0; 6], 2, 2).is_err());
    }

    #[test]
    #[ignore] // Requires camera hardware
    fn test_camera_capture() {
        let mut camera = Camera::open(&CameraConfig::default()).expect("Failed to open camera");
        let frame = camera.read_frame().expect("Failed to capture frame");
        assert!(frame.width() > 0);
    }
}
