//! Video geometry helpers
//!
//! yuv420p needs even width and height, so odd upscaled sizes are cropped by
//! one pixel before encoding.

/// Frame size after upscaling, saturating instead of overflowing.
pub fn upscaled_dimensions(width: u32, height: u32, scale: u32) -> (u32, u32) {
    (width.saturating_mul(scale), height.saturating_mul(scale))
}

pub fn ensure_even_dimensions(width: u32, height: u32) -> (u32, u32, bool) {
    let even_width = width - (width % 2);
    let even_height = height - (height % 2);
    (even_width, even_height, even_width != width || even_height != height)
}

/// `-vf` chain for the assembled video. Unknown dimensions (0) skip the crop.
pub fn build_assemble_filter_chain(width: u32, height: u32, pix_fmt: &str) -> String {
    let mut filters = Vec::new();

    if width > 0 && height > 0 {
        let (w, h, needs_crop) = ensure_even_dimensions(width, height);
        if needs_crop {
            filters.push(format!("crop={}:{}:0:0", w, h));
        }
    }

    filters.push(format!("format={}", pix_fmt));
    filters.join(",")
}
