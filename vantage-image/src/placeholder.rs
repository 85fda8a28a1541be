/// An inline SVG of a solid color, as a `data:` URI, used in place of an image that could not be
/// loaded. Keeps the element's box so the layout doesn't jump.
pub fn placeholder_data_uri(
    width: u32,
    height: u32,
    color: &str,
) -> String {
    let svg = format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='{w}' height='{h}' viewBox='0 0 {w} {h}'><rect width='100%' height='100%' fill='{c}'/></svg>",
        w = width.max(1),
        h = height.max(1),
        c = color
    );

    format!("data:image/svg+xml;charset=utf-8,{}", encode_data_uri(&svg))
}

// Only what has to be escaped in a data URI, the SVG stays readable
fn encode_data_uri(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len() + text.len() / 4);
    for c in text.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '#' => encoded.push_str("%23"),
            '<' => encoded.push_str("%3C"),
            '>' => encoded.push_str("%3E"),
            '"' => encoded.push_str("%22"),
            '\n' | '\r' | '\t' => encoded.push(' '),
            _ => encoded.push(c),
        }
    }

    encoded
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn placeholder_is_an_escaped_svg() {
        let uri = placeholder_data_uri(40, 30, "#e0e0e0");
        assert!(uri.starts_with("data:image/svg+xml;charset=utf-8,%3Csvg "));
        assert!(uri.contains("width='40' height='30'"));
        assert!(uri.contains("viewBox='0 0 40 30'"));
        assert!(uri.contains("fill='%23e0e0e0'"));
        assert!(uri.contains("height='100%25'"));
        assert!(!uri.contains('<'));
        assert!(!uri.contains('#'));
    }

    #[test]
    fn zero_sizes_are_bumped() {
        let uri = placeholder_data_uri(0, 0, "gray");
        assert!(uri.contains("width='1' height='1'"));
    }
}
