//! Assembling streamed fragments into a renderable, sanitized document.

use crate::sanitize::sanitize;
use crate::transport::{ChatMessage, GenerationResult};

/// Content text used when a backend finishes without one.
pub const DEFAULT_CONTENT: &str = "Preview updated.";

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
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

/// Wrap source code in a static page that shows it without executing it.
pub fn code_preview(code: &str) -> String {
    format!(
        concat!(
            "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n",
            "<title>Code preview</title>\n",
            "<style>body{{margin:0;background:#0f172a;color:#e2e8f0;font:14px/1.5 ui-monospace,monospace}}",
            "pre{{margin:0;padding:24px;white-space:pre-wrap;word-break:break-word}}</style>\n",
            "</head>\n<body>\n<pre class=\"code-preview\"><code>{}</code></pre>\n</body>\n</html>\n"
        ),
        escape_html(code)
    )
}

/// Running state of one tier's fragments.
///
/// Code chunks are deltas and are appended; a reset clears the buffer for
/// backends that resend the whole document. Meta is last-write-wins.
#[derive(Debug, Default, Clone)]
pub struct Aggregator {
    code: String,
    meta: Option<serde_json::Value>,
}

impl Aggregator {
    pub fn push_code(&mut self, chunk: &str) {
        self.code.push_str(chunk);
    }

    pub fn reset_code(&mut self) {
        self.code.clear();
    }

    pub fn set_meta(&mut self, meta: serde_json::Value) {
        self.meta = Some(meta);
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }

    /// Converge on a result once the backend reports completion.
    ///
    /// Explicit HTML wins; otherwise streamed code is shown through
    /// [`code_preview`]. Either way the document is sanitized.
    pub fn finish(
        &self,
        html: Option<String>,
        content: Option<String>,
        messages: Option<Vec<ChatMessage>>,
    ) -> GenerationResult {
        let html = match html.filter(|h| !h.trim().is_empty()) {
            Some(html) => sanitize(&html),
            None if !self.code.is_empty() => sanitize(&code_preview(&self.code)),
            None => String::new(),
        };
        let content = content
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT.to_string());
        GenerationResult {
            html,
            content,
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn code_preview_never_contains_raw_script() {
        let page = code_preview("<script>alert(1)</script>");
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert_eq!(sanitize(&page), page);
    }

    #[test]
    fn appends_and_resets_code() {
        let mut agg = Aggregator::default();
        agg.push_code("<h1>");
        agg.push_code("Hi</h1>");
        assert_eq!(agg.code(), "<h1>Hi</h1>");
        agg.reset_code();
        agg.push_code("<h2>");
        assert_eq!(agg.code(), "<h2>");
    }

    #[test]
    fn meta_is_last_write_wins() {
        let mut agg = Aggregator::default();
        agg.set_meta(serde_json::json!({"a": 1}));
        agg.set_meta(serde_json::json!({"b": 2}));
        assert_eq!(agg.meta(), Some(&serde_json::json!({"b": 2})));
    }

    #[test]
    fn finish_prefers_html_and_sanitizes() {
        let mut agg = Aggregator::default();
        agg.push_code("ignored");
        let res = agg.finish(
            Some("<p onclick=\"x()\">hi</p><script>1</script>".into()),
            None,
            None,
        );
        assert_eq!(res.html, "<p>hi</p>");
        assert_eq!(res.content, DEFAULT_CONTENT);
    }

    #[test]
    fn finish_wraps_code_when_no_html() {
        let mut agg = Aggregator::default();
        agg.push_code("fn main() {}\n");
        agg.push_code("<b>");
        let res = agg.finish(None, Some("done".into()), None);
        assert!(res.html.contains("<pre class=\"code-preview\"><code>fn main() {}\n&lt;b&gt;</code></pre>"));
        assert_eq!(res.content, "done");
    }

    #[test]
    fn finish_with_nothing_is_empty_html() {
        let res = Aggregator::default().finish(Some("  ".into()), None, None);
        assert!(res.html.is_empty());
    }
}
