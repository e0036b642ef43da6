//! Template body rendering: `{{placeholder}}` substitution and HTML
//! stripping for the plain-text channel.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap())
}

/// Substitute `{{name}}` placeholders from the map. Unknown placeholders
/// are left as-is so a typo in a template is visible, not silently blank.
pub fn render_template(body: &str, values: &HashMap<&str, String>) -> String {
    placeholder_re()
        .replace_all(body, |caps: &regex::Captures<'_>| {
            match values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Strip HTML down to plain text: drop tags, decode the common entities,
/// collapse runs of blank lines.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n\n");
    let stripped = tag_re().replace_all(&with_breaks, "");

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    let mut lines: Vec<&str> = decoded.lines().map(str::trim_end).collect();
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let mut out = Vec::with_capacity(lines.len());
    let mut blank_run = false;
    for line in lines {
        if line.is_empty() {
            if blank_run {
                continue;
            }
            blank_run = true;
        } else {
            blank_run = false;
        }
        out.push(line);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders() {
        let mut values = HashMap::new();
        values.insert("name", "Asha".to_string());
        values.insert("company", "Acme".to_string());
        assert_eq!(
            render_template("Hi {{name}}, how are things at {{ company }}?", &values),
            "Hi Asha, how are things at Acme?"
        );
    }

    #[test]
    fn unknown_placeholders_survive() {
        let values = HashMap::new();
        assert_eq!(render_template("Hi {{name}}", &values), "Hi {{name}}");
    }

    #[test]
    fn strips_tags_and_entities() {
        let html = "<p>Hello &amp; welcome</p><p>Reply <b>yes</b> to continue</p>";
        assert_eq!(html_to_text(html), "Hello & welcome\n\nReply yes to continue");
    }

    #[test]
    fn collapses_blank_runs() {
        let html = "<div>a</div><p></p><p></p><p>b</p>";
        assert_eq!(html_to_text(html), "a\n\nb");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(html_to_text("just text"), "just text");
    }
}
