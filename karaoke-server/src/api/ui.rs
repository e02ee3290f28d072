//! HTML pages: the upload form and the separation result page

use axum::{
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use karaoke_common::events::StemLocators;

use super::jobs::output_url;
use crate::AppState;

/// Build UI routes
pub fn ui_routes() -> Router<AppState> {
    Router::new().route("/", get(root_page))
}

const PAGE_STYLE: &str = r#"
    <style>
        body {
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 720px;
            margin: 40px auto;
            padding: 20px;
            line-height: 1.6;
        }
        h1 {
            color: #333;
            border-bottom: 2px solid #0066cc;
            padding-bottom: 10px;
        }
        .button {
            display: inline-block;
            padding: 10px 20px;
            background: #0066cc;
            color: white;
            border: none;
            text-decoration: none;
            border-radius: 4px;
            cursor: pointer;
        }
        .button:hover {
            background: #0052a3;
        }
        .stem {
            margin: 20px 0;
        }
        audio {
            width: 100%;
        }
    </style>
"#;

/// Upload form
async fn root_page() -> impl IntoResponse {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Karaoke Maker</title>
{style}
</head>
<body>
    <h1>Karaoke Maker</h1>
    <p>Upload a song to split it into a vocal track and an instrumental (karaoke) track.</p>
    <form action="/upload" method="post" enctype="multipart/form-data">
        <input type="file" name="file" accept="audio/*" required>
        <button class="button" type="submit">Separate</button>
    </form>
    <p><small>Separation can take several minutes for a full-length song.</small></p>
</body>
</html>
"#,
        style = PAGE_STYLE
    ))
}

/// Minimal HTML escaping for text and attribute values
fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Result page with players and links for both stems
pub fn render_result_page(filename: &str, locators: &StemLocators) -> Html<String> {
    let stems: String = locators
        .iter()
        .map(|(label, locator)| {
            let url = escape_html(&output_url(locator));
            format!(
                r#"    <div class="stem">
        <h2>{label}</h2>
        <audio controls src="{url}"></audio>
        <p><a href="{url}">{url}</a></p>
    </div>
"#,
                label = label,
                url = url
            )
        })
        .collect();

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Karaoke Maker - Result</title>
{style}
</head>
<body>
    <h1>{filename}</h1>
{stems}    <a class="button" href="/">Separate another song</a>
</body>
</html>
"#,
        style = PAGE_STYLE,
        filename = escape_html(filename),
        stems = stems
    ))
}
