use image::DynamicImage;

use crate::error::{Result, RunnerError};
use crate::types::ImageBufferMap;

/// Size of the opaque header ComfyUI prepends to every binary frame.
pub const FRAME_HEADER_LEN: usize = 8;

/// Payload of a binary frame, or `None` if the frame is shorter than its header.
pub fn strip_header(frame: &[u8]) -> Option<&[u8]> {
    frame.get(FRAME_HEADER_LEN..)
}

/// First buffer received for `target_node`.
///
/// Later buffers for the same node are ignored: one image per job.
pub fn extract<'a>(images: &'a ImageBufferMap, target_node: &str) -> Result<&'a [u8]> {
    images
        .get(target_node)
        .and_then(|buffers| buffers.first())
        .map(Vec::as_slice)
        .ok_or_else(|| {
            RunnerError::NoImageData(format!(
                "No image data received from node '{}'",
                target_node
            ))
        })
}

/// Decode PNG/JPEG/WebP bytes into a bitmap.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 40]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_strip_header_lengths() {
        let frame: [u8; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let payload = strip_header(&frame).unwrap();
        assert_eq!(payload, &[9u8, 10]);
        assert_eq!(frame.len(), payload.len() + FRAME_HEADER_LEN);
        assert_eq!(strip_header(&frame[..8]).unwrap().len(), 0);
        assert!(strip_header(&frame[..7]).is_none());
    }

    #[test]
    fn test_extract_first_buffer_twice() {
        let mut images = ImageBufferMap::new();
        images.insert("9".into(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(extract(&images, "9").unwrap(), b"one");
        assert_eq!(extract(&images, "9").unwrap(), b"one");
    }

    #[test]
    fn test_extract_missing_or_empty() {
        let mut images = ImageBufferMap::new();
        assert_eq!(
            extract(&images, "9").unwrap_err().kind(),
            ErrorKind::NoImageData
        );
        images.insert("9".into(), Vec::new());
        assert_eq!(
            extract(&images, "9").unwrap_err().kind(),
            ErrorKind::NoImageData
        );
    }

    #[test]
    fn test_decode_png() {
        let img = decode(&png_bytes(4, 3)).unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
