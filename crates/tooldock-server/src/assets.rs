//! Embedded frontend assets.

use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};

const INDEX_HTML: &str = include_str!("../assets/index.html");
const STYLE_CSS: &str = include_str!("../assets/style.css");
const APP_JS: &str = include_str!("../assets/app.js");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn static_asset(Path(path): Path<String>) -> Response {
    match path.as_str() {
        "style.css" => asset(STYLE_CSS, "text/css; charset=utf-8"),
        "app.js" => asset(APP_JS, "application/javascript; charset=utf-8"),
        "index.html" => asset(INDEX_HTML, "text/html; charset=utf-8"),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn asset(body: &'static str, content_type: &'static str) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}
