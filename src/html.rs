//! Minimal HTML building blocks for the server-rendered pages.

use std::fmt::Write;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

pub fn link(href: &str, text: &str, class: Option<&str>) -> String {
    match class {
        Some(class) => format!(
            "<a href=\"{}\" class=\"{}\">{}</a>",
            escape(href),
            escape(class),
            escape(text)
        ),
        None => format!("<a href=\"{}\">{}</a>", escape(href), escape(text)),
    }
}

/// Cells are inserted as-is; escape text before pushing it.
#[derive(Default, Debug, Clone)]
pub struct Table {
    pub head: Vec<String>,
    pub align: Vec<&'static str>,
    pub data: Vec<Vec<String>>,
}

impl Table {
    pub fn render(&self) -> String {
        let mut out = String::from("<table class=\"generaltable\">\n");
        if !self.head.is_empty() {
            out.push_str("<thead><tr>");
            for (i, h) in self.head.iter().enumerate() {
                let _ = write!(out, "<th style=\"text-align:{}\">{}</th>", self.align_of(i), escape(h));
            }
            out.push_str("</tr></thead>\n");
        }
        out.push_str("<tbody>\n");
        for row in &self.data {
            out.push_str("<tr>");
            for (i, cell) in row.iter().enumerate() {
                let _ = write!(out, "<td style=\"text-align:{}\">{}</td>", self.align_of(i), cell);
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n</table>\n");
        out
    }

    fn align_of(&self, col: usize) -> &'static str {
        self.align.get(col).copied().unwrap_or("left")
    }
}

pub fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>{title}</title>
  <style>
    body{{font-family:sans-serif;margin:1.5em}}
    table.generaltable{{border-collapse:collapse}}
    table.generaltable td,table.generaltable th{{border:1px solid #ddd;padding:4px 8px}}
    a.dimmed{{color:#999}}
  </style>
</head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>"#,
        title = escape(title),
        body = body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<a href='x'>&</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn table_uses_alignment_per_column() {
        let t = Table {
            head: vec!["Week".into(), "Name".into()],
            align: vec!["center", "left"],
            data: vec![vec!["1".into(), link("/view/1", "A & B", None)]],
        };
        let html = t.render();
        assert!(html.contains("<th style=\"text-align:center\">Week</th>"));
        assert!(html.contains("<td style=\"text-align:left\"><a href=\"/view/1\">A &amp; B</a></td>"));
    }
}
