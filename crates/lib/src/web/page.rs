//! Dashboard HTML: the latest message and a submission form.

use crate::message::Message;

/// Minimal HTML escaping for text and attribute values.
pub fn escape_html(s: &str) -> String {
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

pub fn render_dashboard(latest: Option<&Message>, user_id: Option<&str>) -> String {
    let user = match user_id {
        Some(u) => format!("Signed in as <strong>{}</strong>", escape_html(u)),
        None => "Not signed in".to_string(),
    };
    let latest = match latest {
        Some(m) => format!(
            "<p class=\"latest\"><span class=\"{}\">{}</span>: {}</p>\n      <p class=\"time\">{}</p>",
            if m.is_ai() { "author ai" } else { "author" },
            escape_html(&m.author),
            escape_html(&m.text),
            m.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ),
        None => "<p class=\"latest\">No messages yet.</p>".to_string(),
    };
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Postbox</title>
  </head>
  <body>
    <main>
      <div class="user">{user}</div>
      <h1>Latest message</h1>
      {latest}
      <form method="post" action="/messages">
        <textarea name="message" rows="4" cols="60"></textarea>
        <button type="submit">Send</button>
      </form>
    </main>
  </body>
</html>
"#
    )
}
