//! HTML served by the engine itself.

/// Escape text for inclusion in HTML.
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

fn shell(title: &str, head: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
{head}<title>{title}</title>
<style>
body {{ font-family: system-ui, sans-serif; background: #0b0b0f; color: #e4e4e7; margin: 0; display: flex; min-height: 100vh; align-items: center; justify-content: center; }}
main {{ max-width: 40rem; padding: 2rem; text-align: center; }}
pre {{ text-align: left; background: #18181b; padding: 1rem; border-radius: 0.5rem; overflow: auto; font-size: 0.8rem; }}
.spinner {{ width: 2rem; height: 2rem; margin: 0 auto 1rem; border: 3px solid #3f3f46; border-top-color: #a1a1aa; border-radius: 50%; animation: spin 1s linear infinite; }}
@keyframes spin {{ to {{ transform: rotate(360deg); }} }}
</style>
</head>
<body>
<main>
{body}
</main>
</body>
</html>
"#,
        head = head,
        title = escape_html(title),
        body = body
    )
}

/// Shown while an environment is being created or recreated. Reloads
/// itself every `refresh_secs`.
pub fn interim_page(refresh_secs: u64) -> String {
    shell(
        "Starting preview",
        &format!("<meta http-equiv=\"refresh\" content=\"{}\">\n", refresh_secs.max(1)),
        "<div class=\"spinner\"></div>\n<h1>Starting the preview environment</h1>\n<p>This page refreshes automatically.</p>",
    )
}

/// Shown when an environment cannot be recreated.
pub fn failed_page(id: &str) -> String {
    shell(
        "Preview unavailable",
        "",
        &format!(
            "<h1>This preview cannot be recreated</h1>\n<p>Clone <code>{}</code> is no longer available. Start a new clone to preview it again.</p>",
            escape_html(id)
        ),
    )
}

/// Read-only view of the composed page source.
pub fn static_preview(id: &str, url: &str, source: &str) -> String {
    shell(
        "Clone source",
        "",
        &format!(
            "<h1>Clone of {}</h1>\n<p>No live environment is running for <code>{}</code>. The generated page source is shown below.</p>\n<pre><code>{}</code></pre>",
            escape_html(url),
            escape_html(id),
            escape_html(source)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interim_page_refreshes() {
        let page = interim_page(3);
        assert!(page.contains(r#"<meta http-equiv="refresh" content="3">"#));
    }

    #[test]
    fn test_static_preview_escapes_source() {
        let page = static_preview("abc", "https://a.dev", "<Hero />");
        assert!(page.contains("&lt;Hero /&gt;"));
        assert!(!page.contains("<Hero />"));
    }

    #[test]
    fn test_failed_page_escapes_id() {
        assert!(failed_page("<x>").contains("&lt;x&gt;"));
    }
}
