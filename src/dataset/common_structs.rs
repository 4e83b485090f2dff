/// Frequently used structs in the provided croppers/statistics

/// A pixel rectangle inside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub top: u32,
    pub left: u32,
    pub height: u32,
    pub width: u32,
}

impl CropRect {
    /// Converts a COCO `[x, y, w, h]` bbox into the box `(x, y, x + w, y + h)` with
    /// its corners rounded to pixels and clipped to an `img_width` x `img_height`
    /// image. None if no pixel is left.
    pub fn from_bbox(bbox: &[f64; 4], img_width: u32, img_height: u32) -> Option<CropRect> {
        let [x, y, w, h] = *bbox;
        let (left, right) = clip_span(x, w, img_width)?;
        let (top, bottom) = clip_span(y, h, img_height)?;
        Some(CropRect {
            top,
            left,
            height: bottom - top,
            width: right - left,
        })
    }
}

/// Rounds `[start, start + len)` to pixels and clips it to `[0, limit)`.
/// Clipping happens in f64, so coordinates far outside the image never reach
/// an integer cast.
fn clip_span(start: f64, len: f64, limit: u32) -> Option<(u32, u32)> {
    if !start.is_finite() || !len.is_finite() {
        return None;
    }
    let limit = f64::from(limit);
    let low = start.round().max(0.);
    let high = (start + len).round().min(limit);
    if high - low < 1. {
        return None;
    }
    Some((low as u32, high as u32))
}
