use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::process::{ProcessRequest, ProcessResponse};

/// POST /process — start processing a bulk verification job.
///
/// Answers as soon as the job is validated; records are processed in the
/// background.
pub async fn process_bulk(
    State(state): State<AppState>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> (StatusCode, Json<ProcessResponse>) {
    let response = match body {
        Ok(Json(body)) => match (body.validate(), body.bulk_pk()) {
            (Ok(()), Some(bulk_pk)) => state.processor.trigger(bulk_pk).await,
            (Err(report), _) => ProcessResponse::internal_error(format!("Invalid bulkFk: {}", report)),
            (Ok(()), None) => ProcessResponse::internal_error(format!("Invalid bulkFk: {}", body.bulk_fk)),
        },
        Err(rejection) => ProcessResponse::internal_error(rejection.body_text()),
    };

    (status_for(&response), Json(response))
}

fn status_for(response: &ProcessResponse) -> StatusCode {
    if response.code == 0 {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
