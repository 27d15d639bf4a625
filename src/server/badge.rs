use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::server::AppState;

const LABEL: &str = "coverage";
const LABEL_WIDTH: u32 = 61;
const CHAR_WIDTH: u32 = 7;
const PADDING: u32 = 10;

/// Shields-style colour for a coverage percentage.
#[must_use]
pub fn badge_color(rate: f64) -> &'static str {
    match rate {
        r if r >= 90.0 => "#4c1",
        r if r >= 75.0 => "#97ca00",
        r if r >= 60.0 => "#dfb317",
        r if r >= 40.0 => "#fe7d37",
        _ => "#e05d44",
    }
}

#[must_use]
pub fn render_badge(rate: f64) -> String {
    let value = format!("{rate:.1}%");
    let value_width = value.len() as u32 * CHAR_WIDTH + PADDING;
    let width = LABEL_WIDTH + value_width;
    let color = badge_color(rate);
    let label_x = LABEL_WIDTH / 2;
    let value_x = LABEL_WIDTH + value_width / 2;

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="20" role="img" aria-label="{LABEL}: {value}">
<linearGradient id="s" x2="0" y2="100%"><stop offset="0" stop-color="#bbb" stop-opacity=".1"/><stop offset="1" stop-opacity=".1"/></linearGradient>
<clipPath id="r"><rect width="{width}" height="20" rx="3" fill="#fff"/></clipPath>
<g clip-path="url(#r)"><rect width="{LABEL_WIDTH}" height="20" fill="#555"/><rect x="{LABEL_WIDTH}" width="{value_width}" height="20" fill="{color}"/><rect width="{width}" height="20" fill="url(#s)"/></g>
<g fill="#fff" text-anchor="middle" font-family="Verdana,Geneva,DejaVu Sans,sans-serif" font-size="11">
<text x="{label_x}" y="15" fill="#010101" fill-opacity=".3">{LABEL}</text><text x="{label_x}" y="14">{LABEL}</text>
<text x="{value_x}" y="15" fill="#010101" fill-opacity=".3">{value}</text><text x="{value_x}" y="14">{value}</text>
</g>
</svg>"##
    )
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub async fn project_badge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_project(&id) {
        Ok(Some(project)) => (
            [
                (header::CONTENT_TYPE, "image/svg+xml"),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            ],
            render_badge(project.coverage_rate),
        )
            .into_response(),
        Ok(None) => plain(StatusCode::NOT_FOUND, "Project not found"),
        Err(e) => {
            tracing::error!("Failed to load project for badge: {e}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_thresholds() {
        assert_eq!(badge_color(100.0), "#4c1");
        assert_eq!(badge_color(90.0), "#4c1");
        assert_eq!(badge_color(89.9), "#97ca00");
        assert_eq!(badge_color(60.0), "#dfb317");
        assert_eq!(badge_color(40.0), "#fe7d37");
        assert_eq!(badge_color(12.0), "#e05d44");
    }

    #[test]
    fn test_badge_text() {
        let svg = render_badge(66.666);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(">66.7%<"));
        assert!(svg.contains(">coverage<"));
    }
}
