//! Server-side HTML for the single page.

use std::fmt::Write;

use facecap_common::params::{
    MIN_NEIGHBORS_MAX, MIN_NEIGHBORS_MIN, SCALE_FACTOR_MAX, SCALE_FACTOR_MIN, SCALE_FACTOR_STEP,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::workflow::{Notice, View};

/// Form field prefix for the per-image selection checkboxes.
pub const PICK_PREFIX: &str = "pick:";

/// Everything but RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

const STYLE: &str = "
body { font-family: system-ui, sans-serif; max-width: 960px; margin: 2rem auto; padding: 0 1rem; }
fieldset { margin-bottom: 1rem; }
label { display: block; margin: .4rem 0; }
.notice { padding: .6rem .8rem; border-radius: 4px; margin: .4rem 0; }
.success { background: #e6f4ea; } .info { background: #e8f0fe; }
.warning { background: #fef7e0; } .error { background: #fce8e6; }
.grid { display: grid; gap: .8rem; }
.grid figure { margin: 0; }
.grid img, .capture img { width: 100%; height: auto; }
figcaption { font-size: .85rem; word-break: break-all; }
";

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode a file name for use as one URL path segment.
pub fn encode_segment(name: &str) -> String {
    utf8_percent_encode(name, PATH_SEGMENT).to_string()
}

pub fn render(view: &View<'_>, columns: usize) -> String {
    let mut html = String::with_capacity(8 * 1024);
    html.push_str("<!doctype html><html lang=\"en\"><head><meta charset=\"utf-8\">");
    html.push_str("<title>Face Detection</title><style>");
    html.push_str(STYLE);
    html.push_str("</style></head><body>");
    html.push_str("<h1>Face detection + gallery with safe deletion</h1>");
    html.push_str(
        "<ol><li>Enable the webcam and capture an image.</li>\
         <li>Name the image before saving it.</li>\
         <li>Delete images by selecting them and confirming.</li></ol>",
    );

    for notice in &view.notices {
        render_notice(&mut html, notice);
    }

    render_controls(&mut html, view);
    render_capture(&mut html, view);
    html.push_str("<hr><h2>Gallery</h2>");
    render_gallery(&mut html, view, columns.max(1));
    html.push_str("</body></html>");
    html
}

fn render_notice(html: &mut String, notice: &Notice) {
    let (class, text) = match notice {
        Notice::Success(t) => ("success", t),
        Notice::Info(t) => ("info", t),
        Notice::Warning(t) => ("warning", t),
        Notice::Error(t) => ("error", t),
    };
    let _ = write!(html, "<div class=\"notice {class}\">{}</div>", escape(text));
}

fn render_controls(html: &mut String, view: &View<'_>) {
    let p = &view.params;
    let _ = write!(
        html,
        "<form method=\"post\" action=\"/capture\"><fieldset><legend>Detection</legend>\
         <label>scaleFactor <input type=\"range\" name=\"scale_factor\" min=\"{min_s}\" max=\"{max_s}\" step=\"{step}\" value=\"{scale:.2}\" \
         oninput=\"this.nextElementSibling.value=this.value\"><output>{scale:.2}</output></label>\
         <label>minNeighbors <input type=\"range\" name=\"min_neighbors\" min=\"{min_n}\" max=\"{max_n}\" step=\"1\" value=\"{neighbors}\" \
         oninput=\"this.nextElementSibling.value=this.value\"><output>{neighbors}</output></label>\
         <label>Box colour <input type=\"color\" name=\"color\" value=\"{color}\"></label>\
         <label><input type=\"checkbox\" name=\"arm\" value=\"yes\"> Enable the webcam and capture an image</label>\
         <button type=\"submit\">Run</button></fieldset></form>",
        min_s = SCALE_FACTOR_MIN,
        max_s = SCALE_FACTOR_MAX,
        step = SCALE_FACTOR_STEP,
        scale = p.scale_factor,
        min_n = MIN_NEIGHBORS_MIN,
        max_n = MIN_NEIGHBORS_MAX,
        neighbors = p.min_neighbors,
        color = p.color,
    );
}

fn render_capture(html: &mut String, view: &View<'_>) {
    let Some(frame) = view.capture else {
        return;
    };
    let _ = write!(
        html,
        "<div class=\"capture\"><figure><img src=\"/capture.png?v={seq}\" alt=\"captured frame\">\
         <figcaption>Captured image: {faces} face(s) found</figcaption></figure>\
         <form method=\"post\" action=\"/save\"><label>File name \
         <input type=\"text\" name=\"name\" value=\"{name}\"></label>\
         <button type=\"submit\">Save image</button></form>\
         <form method=\"post\" action=\"/discard\"><button type=\"submit\">Discard</button></form></div>",
        seq = view.capture_seq,
        faces = frame.faces.len(),
        name = escape(view.default_name.as_deref().unwrap_or_default()),
    );
}

fn render_gallery(html: &mut String, view: &View<'_>, columns: usize) {
    let names = match &view.listing {
        Ok(names) => names,
        Err(message) => {
            render_notice(html, &Notice::Error(message.clone()));
            return;
        }
    };
    if names.is_empty() {
        html.push_str("<div class=\"notice info\">No images saved yet.</div>");
        return;
    }

    html.push_str("<form method=\"post\" action=\"/delete\"><fieldset><legend>Select images to delete</legend>");
    for name in names {
        let checked = if view.selection.contains(name) { " checked" } else { "" };
        let _ = write!(
            html,
            "<label><input type=\"checkbox\" name=\"{PICK_PREFIX}{field}\" value=\"yes\"{checked}> {label}</label>",
            field = escape(name),
            label = escape(name),
        );
    }
    html.push_str(
        "<label><input type=\"checkbox\" name=\"confirm\" value=\"yes\"> \
         I confirm I want to delete the selected images</label>\
         <button type=\"submit\">Delete selected images</button></fieldset></form>",
    );

    let _ = write!(
        html,
        "<div class=\"grid\" style=\"grid-template-columns: repeat({columns}, 1fr)\">"
    );
    for name in names {
        let _ = write!(
            html,
            "<figure><img src=\"/images/{src}\" alt=\"{alt}\" loading=\"lazy\"><figcaption>{alt}</figcaption></figure>",
            src = encode_segment(name),
            alt = escape(name),
        );
    }
    html.push_str("</div>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecap_common::params::DetectionParams;

    fn view(listing: Result<Vec<String>, String>) -> View<'static> {
        View {
            params: DetectionParams::default(),
            capture: None,
            capture_seq: 0,
            default_name: None,
            listing,
            selection: &[],
            notices: vec![],
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn encodes_path_segments() {
        assert_eq!(encode_segment("capture_1.png"), "capture_1.png");
        assert_eq!(encode_segment("a b/#?.png"), "a%20b%2F%23%3F.png");
        assert_eq!(encode_segment("café 100%.png"), "caf%C3%A9%20100%25.png");
    }

    #[test]
    fn empty_gallery_says_so() {
        let html = render(&view(Ok(vec![])), 3);
        assert!(html.contains("No images saved yet."));
        assert!(!html.contains("action=\"/delete\""));
    }

    #[test]
    fn gallery_lists_in_order_with_columns() {
        let names = vec!["b.png".to_string(), "a.png".to_string()];
        let html = render(&view(Ok(names)), 3);
        assert!(html.contains("repeat(3, 1fr)"));
        let b = html.find("/images/b.png").unwrap();
        let a = html.find("/images/a.png").unwrap();
        assert!(b < a);
        assert!(html.contains("name=\"pick:a.png\""));
        assert!(html.contains("name=\"confirm\""));
    }

    #[test]
    fn hostile_names_are_escaped() {
        let html = render(&view(Ok(vec!["<script>.png".to_string()])), 3);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;.png"));
    }

    #[test]
    fn pending_selection_is_prechecked() {
        let selection = vec!["a.png".to_string()];
        let mut v = view(Ok(vec!["a.png".to_string(), "b.png".to_string()]));
        v.selection = &selection;
        let html = render(&v, 2);
        assert!(html.contains("name=\"pick:a.png\" value=\"yes\" checked>"));
        assert!(html.contains("name=\"pick:b.png\" value=\"yes\">"));
    }

    #[test]
    fn listing_error_is_shown() {
        let html = render(&view(Err("permission denied".into())), 3);
        assert!(html.contains("notice error"));
        assert!(html.contains("permission denied"));
    }

    #[test]
    fn notices_and_params_render() {
        let mut v = view(Ok(vec![]));
        v.notices = vec![Notice::Success("2 image(s) deleted.".into())];
        let html = render(&v, 3);
        assert!(html.contains("notice success\">2 image(s) deleted."));
        assert!(html.contains("value=\"1.10\""));
        assert!(html.contains("value=\"#00ff00\""));
        assert!(!html.contains("/capture.png"));
    }
}
