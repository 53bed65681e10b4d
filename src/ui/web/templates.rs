pub(crate) const INDEX_HTML: &str = include_str!("templates/index.html");
pub(crate) const APP_JS: &str = include_str!("templates/app.js");
pub(crate) const APP_CSS: &str = include_str!("templates/app.css");
const RESULT_HTML: &str = include_str!("templates/result.html");

/// 下载结果页：把提示文字转义后填进模板。
pub(crate) fn render_result(message: &str) -> String {
    RESULT_HTML.replace("{{message}}", &escape_html(message))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_page_escapes_message() {
        let page = render_result("An error occurred: <script>");
        assert!(page.contains("An error occurred: &lt;script&gt;"));
        assert!(!page.contains("{{message}}"));
    }
}
