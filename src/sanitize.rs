//! HTML sanitizer applied to everything that ends up in a preview surface.
//!
//! The rules are textual (regex plus a small tag scanner for whole-element
//! removal) and are re-applied until the output stops changing, which makes
//! [`sanitize`] idempotent even when removing one construct splices together
//! another, e.g. `<scr<script></script>ipt>`. Every rule but the `id="root"`
//! rename only deletes text, and a renamed id never matches again, so the
//! loop always reaches that fixpoint.

use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));

static IFRAME_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<iframe\b[^>]*>.*?</iframe\s*>").expect("valid regex"));

// Self-closing, unterminated, stray closing, and dangling-at-EOF tags.
static LONE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(?:script|iframe)\b[^>]*(?:>|$)").expect("valid regex"));

// Only inside a start tag; group 1 is the tag up to the attribute.
static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<[a-z][a-z0-9-]*\b[^>]*?)[\s/]+on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("valid regex")
});

static RESOURCE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<link\b[^>]*\brel\s*=\s*["']?[^"'>]*\b(?:preload|modulepreload|stylesheet|prefetch|preconnect)\b[^>]*>"#,
    )
    .expect("valid regex")
});

static ROOT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<[a-z][a-z0-9-]*\b[^>]*?[\s/])id\s*=\s*(?:"root"|'root')"#)
        .expect("valid regex")
});

// Opening tag of an element injected by a host UI (toolbars, placeholders).
static MARKED_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<([a-z][a-z0-9-]*)\b[^>]*?(?:\bdata-(?:host-ui|preview-toolbar|preview-placeholder)\b|\bclass\s*=\s*["'][^"']*\b(?:host-toolbar|preview-toolbar|preview-placeholder)\b)[^>]*>"#,
    )
    .expect("valid regex")
});

static ANY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(/?)([a-z][a-z0-9-]*)\b[^>]*?(/?)>").expect("valid regex"));

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Strip scripts, iframes, inline handlers, resource links and host-UI
/// elements from `html`, and rename `id="root"` to `id="preview-root"`.
pub fn sanitize(html: &str) -> String {
    let mut current = html.to_string();
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Sanitize a JSON value that is expected to hold HTML. Anything other than a
/// string yields an empty document.
pub fn sanitize_value(value: &serde_json::Value) -> String {
    value.as_str().map(sanitize).unwrap_or_default()
}

fn sanitize_pass(input: &str) -> String {
    let out = SCRIPT_BLOCK.replace_all(input, "");
    let out = IFRAME_BLOCK.replace_all(&out, "");
    let out = LONE_TAG.replace_all(&out, "");
    let out = RESOURCE_LINK.replace_all(&out, "");
    let out = EVENT_HANDLER.replace_all(&out, "${1}");
    let out = strip_marked_elements(&out);
    ROOT_ID
        .replace_all(&out, r#"${1}id="preview-root""#)
        .into_owned()
}

fn strip_marked_elements(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(caps) = MARKED_OPEN.captures(rest) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let name = name.as_str().to_ascii_lowercase();
        out.push_str(&rest[..whole.start()]);

        let after = &rest[whole.end()..];
        if whole.as_str().ends_with("/>") || VOID_ELEMENTS.contains(&name.as_str()) {
            rest = after;
            continue;
        }
        // Without a matching close only the opening tag goes.
        rest = match matching_close(after, &name) {
            Some(end) => &after[end..],
            None => after,
        };
    }

    out.push_str(rest);
    out
}

/// Byte offset just past the close tag balancing an already-open `name`.
fn matching_close(html: &str, name: &str) -> Option<usize> {
    let mut depth = 1usize;
    for caps in ANY_TAG.captures_iter(html) {
        let (Some(whole), Some(tag)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        if !tag.as_str().eq_ignore_ascii_case(name) {
            continue;
        }
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let self_closing = caps.get(3).is_some_and(|m| !m.as_str().is_empty());
        if closing {
            depth -= 1;
            if depth == 0 {
                return Some(whole.end());
            }
        } else if !self_closing {
            depth += 1;
        }
    }
    None
}
