use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use super::frame::{Frame, PixelFormat};

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame buffer holds {actual} bytes, {width}x{height} {format:?} needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("empty frame")]
    Empty,
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Compress a frame to JPEG. Frames that already carry JPEG are passed through.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Bytes, EncodeError> {
    let meta = &frame.meta;
    let Some(bpp) = meta.format.bytes_per_pixel() else {
        if frame.data.is_empty() {
            return Err(EncodeError::Empty);
        }
        return Ok(frame.data.clone());
    };

    if meta.width == 0 || meta.height == 0 {
        return Err(EncodeError::Empty);
    }

    let row = (meta.width * bpp) as usize;
    let stride = (meta.stride as usize).max(row);
    let expected = stride * (meta.height as usize - 1) + row;
    if frame.data.len() < expected {
        return Err(EncodeError::BufferSize {
            width: meta.width,
            height: meta.height,
            format: meta.format,
            expected,
            actual: frame.data.len(),
        });
    }

    // Repack into tight RGB/L8 rows
    let mut packed = Vec::with_capacity(row * meta.height as usize);
    for line in frame.data.chunks(stride).take(meta.height as usize) {
        let line = &line[..row];
        match meta.format {
            PixelFormat::Bgr24 => {
                for px in line.chunks_exact(3) {
                    packed.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            _ => packed.extend_from_slice(line),
        }
    }

    let color = match meta.format {
        PixelFormat::Gray8 => ExtendedColorType::L8,
        _ => ExtendedColorType::Rgb8,
    };

    let mut out = Vec::with_capacity(packed.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &packed,
        meta.width,
        meta.height,
        color,
    )?;
    Ok(Bytes::from(out))
}

/// Wrap one JPEG payload in a multipart part:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(jpeg.len() + 48);
    buf.put_slice(b"--");
    buf.put_slice(MULTIPART_BOUNDARY.as_bytes());
    buf.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}
