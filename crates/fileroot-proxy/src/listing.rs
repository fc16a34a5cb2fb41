//! HTML rendering for directory listings

use crate::origin::Child;

/// Render the listing page for the directory at `key` (empty for the root).
///
/// `children` is `None` when the directory could not be read.
pub fn render(key: &str, children: Option<&[Child]>) -> String {
    let title = if key.is_empty() {
        "/".to_string()
    } else {
        key.rsplit('/').next().unwrap_or(key).to_string()
    };

    let mut html = String::from("<html><body>\n");
    html.push_str(&format!("<h1>Index of {}</h1>\n<ul>\n", escape_html(&title)));

    match children {
        Some(children) => {
            for child in children {
                let display = if child.is_dir {
                    format!("{}/", child.name)
                } else {
                    child.name.clone()
                };
                html.push_str(&format!(
                    "<li><a href=\"{}\">{}</a></li>\n",
                    href_for(key, child),
                    escape_html(&display)
                ));
            }
        }
        None => html.push_str("<li>Directory is empty or inaccessible.</li>\n"),
    }

    html.push_str("</ul>\n</body></html>\n");
    html
}

fn href_for(key: &str, child: &Child) -> String {
    let mut href = String::from("/");
    for segment in key.split('/').filter(|s| !s.is_empty()) {
        href.push_str(&urlencoding::encode(segment));
        href.push('/');
    }
    href.push_str(&urlencoding::encode(&child.name));
    if child.is_dir {
        href.push('/');
    }
    href
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(name: &str, is_dir: bool) -> Child {
        Child {
            name: name.to_string(),
            is_dir,
        }
    }

    #[test]
    fn test_render_root_listing() {
        let children = [child("a.txt", false), child("b", true)];
        let html = render("", Some(&children));

        assert!(html.contains("<h1>Index of /</h1>"));
        assert!(html.contains("<li><a href=\"/a.txt\">a.txt</a></li>"));
        assert!(html.contains("<li><a href=\"/b/\">b/</a></li>"));
    }

    #[test]
    fn test_nested_links_are_absolute_and_encoded() {
        let children = [child("my file.html", false)];
        let html = render("docs/v1", Some(&children));

        assert!(html.contains("<h1>Index of v1</h1>"));
        assert!(html.contains("href=\"/docs/v1/my%20file.html\""));
    }

    #[test]
    fn test_names_are_escaped() {
        let children = [child("<script>.html", false)];
        let html = render("", Some(&children));
        assert!(html.contains("&lt;script&gt;.html"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_unreadable_directory_notice() {
        let html = render("locked", None);
        assert!(html.contains("empty or inaccessible"));
    }
}
