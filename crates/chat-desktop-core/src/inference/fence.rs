//! Code-fence rendering for chat responses
//!
//! Markdown fences become the HTML the chat view styles and attaches its
//! copy button to. Everything outside a fence passes through untouched.
//!
//! ~~~text
//! ```rust                ->  <pre class="rust"><div data-clipboard-success="false" class="clipboard"></div><div class="language">rust</div>
//! fn main() {}           ->  <code class="rust">fn main() {}
//! ```                    ->  </code></pre>
//! ~~~

const FENCE: &str = "```";
const CLOSE: &str = "</code></pre>";

fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn open_block(language: &str) -> String {
    format!(
        "<pre class=\"{lang}\"><div data-clipboard-success=\"false\" class=\"clipboard\"></div><div class=\"language\">{lang}</div>",
        lang = language
    )
}

/// Render every fenced block in `content`.
///
/// Fences alternate open/close in order of appearance. A block still open at
/// the end of the text is closed with a final `</code></pre>` line.
pub fn render_code_fences(content: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_block = false;
    // `<code>` prefix waiting for the first line after an opening fence
    let mut code_prefix: Option<String> = None;

    for line in content.split('\n') {
        if line.starts_with(FENCE) {
            if in_block {
                let prefix = code_prefix.take().unwrap_or_default();
                out.push(format!("{}{}", prefix, CLOSE));
            } else {
                let language = escape_attr(line[FENCE.len()..].trim());
                out.push(open_block(&language));
                code_prefix = Some(format!("<code class=\"{}\">", language));
            }
            in_block = !in_block;
            continue;
        }

        match code_prefix.take() {
            Some(prefix) => out.push(format!("{}{}", prefix, line)),
            None => out.push(line.to_string()),
        }
    }

    if in_block {
        if let Some(prefix) = code_prefix.take() {
            out.push(prefix);
        }
        out.push(CLOSE.to_string());
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_untouched() {
        let text = "just words\n\nand `inline` code";
        assert_eq!(render_code_fences(text), text);
    }

    #[test]
    fn test_single_block() {
        let rendered = render_code_fences("a\n```py\nb\n```\nc");
        let lines: Vec<&str> = rendered.split('\n').collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "a");
        assert_eq!(
            lines[1],
            "<pre class=\"py\"><div data-clipboard-success=\"false\" class=\"clipboard\"></div><div class=\"language\">py</div>"
        );
        assert_eq!(lines[2], "<code class=\"py\">b");
        assert_eq!(lines[3], "</code></pre>");
        assert_eq!(lines[4], "c");
    }

    #[test]
    fn test_multi_line_block_prefixes_first_line_only() {
        let rendered = render_code_fences("```rust\nfn a() {}\nfn b() {}\n```");
        let lines: Vec<&str> = rendered.split('\n').collect();
        assert_eq!(lines[1], "<code class=\"rust\">fn a() {}");
        assert_eq!(lines[2], "fn b() {}");
        assert_eq!(lines[3], "</code></pre>");
    }

    #[test]
    fn test_two_blocks() {
        let rendered = render_code_fences("```a\n1\n```\nmid\n```b\n2\n```");
        assert_eq!(rendered.matches("<pre class=").count(), 2);
        assert_eq!(rendered.matches("</code></pre>").count(), 2);
        assert!(rendered.contains("<code class=\"b\">2"));
    }

    #[test]
    fn test_unterminated_block_is_closed() {
        let rendered = render_code_fences("intro\n```sh\necho hi");
        assert!(rendered.ends_with("\n</code></pre>"));
        assert!(rendered.contains("<code class=\"sh\">echo hi"));
    }

    #[test]
    fn test_fence_on_last_line_is_closed() {
        let rendered = render_code_fences("intro\n```js");
        let lines: Vec<&str> = rendered.split('\n').collect();
        assert_eq!(lines[2], "<code class=\"js\">");
        assert_eq!(lines[3], "</code></pre>");
    }

    #[test]
    fn test_empty_block_stays_balanced() {
        let rendered = render_code_fences("```\n```");
        let lines: Vec<&str> = rendered.split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "<code class=\"\"></code></pre>");
    }

    #[test]
    fn test_language_tag_is_escaped() {
        let rendered = render_code_fences("```\"><script>\nx\n```");
        assert!(!rendered.contains("<script>"));
        assert!(rendered.contains("<pre class=\"&quot;&gt;&lt;script&gt;\">"));
    }
}
