use pulldown_cmark::{html, Event, Options, Parser, TagEnd};

/// Turns a message body into displayable content.
pub trait ContentRenderer: Send + Sync {
    /// Markdown → HTML.
    fn render(&self, markdown: &str) -> String;

    /// Markdown → plain text, used for topic titles.
    fn strip(&self, markdown: &str) -> String;
}

/// CommonMark renderer. Raw HTML in the input is escaped, never passed through.
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: Options,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self {
            options: Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES,
        }
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentRenderer for MarkdownRenderer {
    fn render(&self, markdown: &str) -> String {
        let events = Parser::new_ext(markdown, self.options).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, events);
        out
    }

    fn strip(&self, markdown: &str) -> String {
        let mut out = String::with_capacity(markdown.len());
        for event in Parser::new_ext(markdown, self.options) {
            match event {
                Event::Text(text) | Event::Code(text) => out.push_str(&text),
                Event::Html(text) | Event::InlineHtml(text) => out.push_str(&text),
                Event::SoftBreak => out.push(' '),
                Event::HardBreak => out.push('\n'),
                Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock) => {
                    out.push('\n')
                }
                _ => {}
            }
        }
        out.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_markdown_to_html() {
        let html = MarkdownRenderer::new().render("Hello **world**");
        assert_eq!(html.trim(), "<p>Hello <strong>world</strong></p>");
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = MarkdownRenderer::new().render("hi <script>alert(1)</script>");
        assert!(!html.contains("<script>"), "{html}");
        assert!(html.contains("&lt;script&gt;"), "{html}");
    }

    #[test]
    fn strip_keeps_only_text() {
        let text = MarkdownRenderer::new().strip("# A *big* `topic`\n\nwith [a link](http://x)");
        assert_eq!(text, "A big topic\nwith a link");
    }
}
