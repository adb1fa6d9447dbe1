use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use log::{debug, warn};
use std::io::Cursor;

pub const MAX_UPLOAD_WIDTH: u32 = 1024;
pub const MAX_UPLOAD_HEIGHT: u32 = 768;
const JPEG_QUALITY: u8 = 80;

/// Shrinks the photo to fit the upload bounds and re-encodes it as JPEG.
///
/// The image is not a required part of a record, so anything we cannot
/// decode or encode is uploaded unchanged instead of failing the save.
pub fn prepare_upload(data: &[u8]) -> Vec<u8> {
    let decoded = match image::load_from_memory(data) {
        Ok(i) => i,
        Err(e) => {
            warn!("Failed to decode image for upload, sending as is: {:?}", e);
            return data.to_vec();
        }
    };
    let (width, height) = decoded.dimensions();
    let resized = if width > MAX_UPLOAD_WIDTH || height > MAX_UPLOAD_HEIGHT {
        decoded.resize(MAX_UPLOAD_WIDTH, MAX_UPLOAD_HEIGHT, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    match rgb.write_to(&mut out, ImageOutputFormat::Jpeg(JPEG_QUALITY)) {
        Ok(_) => {
            debug!(
                "Prepared {}x{} upload ({} -> {} bytes)",
                rgb.width(),
                rgb.height(),
                data.len(),
                out.get_ref().len()
            );
            out.into_inner()
        }
        Err(e) => {
            warn!("Failed to encode image for upload, sending as is: {:?}", e);
            data.to_vec()
        }
    }
}

/// Content type for bytes coming out of `prepare_upload`, which may be the
/// original file when it could not be re-encoded.
pub fn mime_type(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(format) => format.to_mime_type(),
        Err(_) => "application/octet-stream",
    }
}
