/// Smallest breakpoint that covers the element's physical pixel width, or the largest breakpoint
/// if none does. Without breakpoints the physical width itself is used.
pub fn select_width(
    css_width: f64,
    device_pixel_ratio: f64,
    breakpoints: &[u32],
) -> u32 {
    let device_pixel_ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
        device_pixel_ratio
    } else {
        1.0
    };

    let css_width = if css_width.is_finite() {
        css_width.max(0.0)
    } else {
        0.0
    };

    let required = (css_width * device_pixel_ratio).ceil().max(1.0) as u32;

    let covering = breakpoints.iter().copied().filter(|&x| x >= required).min();
    match covering {
        Some(width) => width,
        None => breakpoints.iter().copied().max().unwrap_or(required),
    }
}

/// Value for the `sizes` attribute. Until the element has been measured the image is assumed to
/// span the viewport.
pub fn sizes_attribute(css_width: Option<f64>) -> String {
    match css_width {
        Some(width) if width.is_finite() && width > 0.0 => format!("{}px", width.round() as u64),
        _ => "100vw".to_string(),
    }
}
