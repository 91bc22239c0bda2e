//! HTTP surface of the dashboard.
//!
//! `GET /` renders the page from the current display state. Every control is a
//! plain form post that runs the action and redirects back to the page; a
//! failed action is stored in the state and shown there.

use super::{Dashboard, DisplayState, render};
use crate::{
    core::{SensorKind, Thresholds, history},
    errors::{Error, Result},
};
use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

type SharedDashboard = Arc<Dashboard>;

/// Export file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// `timestamp,kind,value` rows
    Csv,
    /// Array of readings
    Json,
}

impl ExportFormat {
    const fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

/// Splits an export file name such as `temperature.csv` into kind and format.
#[must_use]
pub fn parse_export_name(file: &str) -> Option<(SensorKind, ExportFormat)> {
    let (kind, extension) = file.rsplit_once('.')?;
    let format = match extension {
        "csv" => ExportFormat::Csv,
        "json" => ExportFormat::Json,
        _ => return None,
    };
    Some((kind.parse().ok()?, format))
}

/// JSON API error body; rejected input is a 400, anything else a 500.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API request failed: {}", self.0);
        let status = match self.0 {
            Error::Config { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({"status": "error", "message": self.0.to_string()})),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct IntervalForm {
    secs: u64,
}

/// Builds the router.
pub fn router(dashboard: SharedDashboard) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/state", get(api_state))
        .route("/api/thresholds", get(api_get_thresholds).put(api_put_thresholds))
        .route("/thresholds", post(submit_thresholds))
        .route("/limits", post(submit_limits))
        .route("/limits/load", post(load_limits))
        .route("/refresh", post(refresh))
        .route("/history", post(load_history))
        .route("/reset", post(reset))
        .route("/toggle", post(toggle))
        .route("/interval", post(interval))
        .route("/export/:file", get(export))
        .layer(CorsLayer::permissive())
        .with_state(dashboard)
}

/// Serves the dashboard on `addr` until `shutdown` flips to `true`.
pub async fn serve(
    dashboard: SharedDashboard,
    addr: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| Error::Server {
        message: format!("failed to bind {addr}: {e}"),
    })?;
    info!("Dashboard listening on http://{addr}");

    axum::serve(listener, router(dashboard))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| Error::Server {
            message: e.to_string(),
        })
}

async fn index(State(dashboard): State<SharedDashboard>) -> Html<String> {
    let state = dashboard.snapshot().await;
    Html(render::page(&state, dashboard.source_label().await))
}

async fn api_state(State(dashboard): State<SharedDashboard>) -> Json<DisplayState> {
    Json(dashboard.snapshot().await)
}

async fn api_get_thresholds(
    State(dashboard): State<SharedDashboard>,
) -> std::result::Result<Json<Thresholds>, ApiError> {
    Ok(Json(dashboard.stored_thresholds().await?))
}

async fn api_put_thresholds(
    State(dashboard): State<SharedDashboard>,
    Json(new): Json<Thresholds>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let saved = dashboard.save_thresholds(&new).await?;
    Ok(Json(
        serde_json::json!({"status": "ok", "revision": saved.revision}),
    ))
}

async fn submit_thresholds(
    State(dashboard): State<SharedDashboard>,
    Form(new): Form<Thresholds>,
) -> Redirect {
    if let Err(e) = dashboard.save_thresholds(&new).await {
        error!("Threshold write failed: {e}");
        dashboard
            .report_error(format!("Failed to save thresholds: {e}"))
            .await;
    }
    Redirect::to("/")
}

async fn submit_limits(
    State(dashboard): State<SharedDashboard>,
    Form(limits): Form<Thresholds>,
) -> Redirect {
    dashboard.set_limits(limits).await;
    Redirect::to("/")
}

async fn load_limits(State(dashboard): State<SharedDashboard>) -> Redirect {
    if let Err(e) = dashboard.load_limits().await {
        dashboard
            .report_error(format!("Failed to load thresholds: {e}"))
            .await;
    }
    Redirect::to("/")
}

async fn refresh(State(dashboard): State<SharedDashboard>) -> Redirect {
    dashboard.tick().await;
    Redirect::to("/")
}

async fn load_history(State(dashboard): State<SharedDashboard>) -> Redirect {
    if let Err(e) = dashboard.load_history().await {
        error!("History load failed: {e}");
        dashboard
            .report_error(format!("Failed to load history: {e}"))
            .await;
    }
    Redirect::to("/")
}

async fn reset(State(dashboard): State<SharedDashboard>) -> Redirect {
    dashboard.reset_connection().await;
    Redirect::to("/")
}

async fn toggle(State(dashboard): State<SharedDashboard>) -> Redirect {
    let paused = dashboard.toggle_paused().await;
    info!("Dashboard ticking {}", if paused { "paused" } else { "resumed" });
    Redirect::to("/")
}

async fn interval(
    State(dashboard): State<SharedDashboard>,
    Form(form): Form<IntervalForm>,
) -> Redirect {
    let secs = dashboard.set_refresh_secs(form.secs).await;
    info!("Dashboard refresh interval set to {secs}s");
    Redirect::to("/")
}

async fn export(State(dashboard): State<SharedDashboard>, Path(file): Path<String>) -> Response {
    let Some((kind, format)) = parse_export_name(&file) else {
        return (StatusCode::NOT_FOUND, format!("unknown export {file}")).into_response();
    };

    let points = dashboard.export_points(kind).await;
    let body = match format {
        ExportFormat::Csv => history::to_csv(&points),
        ExportFormat::Json => history::to_json(&points),
    };

    match body {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, format.content_type().to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{file}\""),
                ),
            ],
            body,
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::DashboardSettings;
    use crate::dashboard::DataSource;
    use crate::test_utils::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;
    use tokio::sync::Notify;

    async fn shared_dashboard() -> Result<SharedDashboard> {
        let db = setup_test_db().await?;
        Ok(Arc::new(Dashboard::new(
            db,
            DashboardSettings::default(),
            TEST_COLLECTION,
            test_document(),
            DataSource::Store {
                collection: TEST_COLLECTION.to_string(),
            },
            None,
            Arc::new(Notify::new()),
        )))
    }

    #[test]
    fn test_parse_export_name() {
        assert_eq!(
            parse_export_name("temperature.csv"),
            Some((SensorKind::Temperature, ExportFormat::Csv))
        );
        assert_eq!(
            parse_export_name("umidade.json"),
            Some((SensorKind::Humidity, ExportFormat::Json))
        );
        assert_eq!(parse_export_name("pressure.csv"), None);
        assert_eq!(parse_export_name("temperature.xml"), None);
        assert_eq!(parse_export_name("temperature"), None);
    }

    #[tokio::test]
    async fn test_threshold_form_overwrites_document() -> Result<()> {
        let dashboard = shared_dashboard().await?;
        let new = Thresholds {
            temp_max: 28.0,
            temp_min: 18.0,
            humid_max: 70.0,
            humid_min: 30.0,
        };

        let response = submit_thresholds(State(Arc::clone(&dashboard)), Form(new))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let Json(stored) = api_get_thresholds(State(Arc::clone(&dashboard)))
            .await
            .map_err(|e| e.0)?;
        assert_eq!(stored, new);
        assert_eq!(
            dashboard.snapshot().await.notice.as_deref(),
            Some("Thresholds saved")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_threshold_form_rejects_infinite_limit() -> Result<()> {
        let dashboard = shared_dashboard().await?;
        let request = Request::builder()
            .method("POST")
            .uri("/thresholds")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("temp_max=inf&temp_min=15&umid_max=80&umid_min=30"))
            .unwrap();
        let form = Form::<Thresholds>::from_request(request, &()).await.unwrap();
        assert!(form.0.temp_max.is_infinite());

        let response = submit_thresholds(State(Arc::clone(&dashboard)), form)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let state = dashboard.snapshot().await;
        assert!(
            state
                .last_error
                .unwrap()
                .contains("temp_max must be a finite number")
        );
        let Json(stored) = api_get_thresholds(State(Arc::clone(&dashboard)))
            .await
            .map_err(|e| e.0)?;
        assert_eq!(stored, Thresholds::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_api_put_rejects_non_finite_limit() -> Result<()> {
        let dashboard = shared_dashboard().await?;
        let bad = Thresholds {
            humid_min: f64::NAN,
            ..Thresholds::default()
        };
        let result = api_put_thresholds(State(Arc::clone(&dashboard)), Json(bad)).await;
        let response = match result {
            Ok(ok) => ok.into_response(),
            Err(e) => e.into_response(),
        };
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_interval_and_toggle_forms() -> Result<()> {
        let dashboard = shared_dashboard().await?;

        let response = interval(State(Arc::clone(&dashboard)), Form(IntervalForm { secs: 120 }))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let response = toggle(State(Arc::clone(&dashboard))).await.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let Json(state) = api_state(State(Arc::clone(&dashboard))).await;
        assert_eq!(state.refresh_secs, 60);
        assert!(state.paused);
        Ok(())
    }

    #[tokio::test]
    async fn test_index_renders_page() -> Result<()> {
        let dashboard = shared_dashboard().await?;
        dashboard.set_limits(Thresholds::default()).await;
        let Html(html) = index(State(dashboard)).await;
        assert!(html.contains("EcoSense IoT"));
        assert!(html.contains("Local alert limits updated"));
        Ok(())
    }

    #[tokio::test]
    async fn test_export_statuses() -> Result<()> {
        let dashboard = shared_dashboard().await?;

        let response = export(State(Arc::clone(&dashboard)), Path("temperature.csv".into())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );

        let response = export(State(dashboard), Path("wind.csv".into())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
