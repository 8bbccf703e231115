use actix_web::{get, post, web, HttpResponse};
use validator::Validate;

use crate::{
    app_state::AppState,
    errors::AppError,
    models::dto::{CreateTestRequest, SubmitPart1Request, SubmitPart2Request},
};

#[post("/api/tests")]
async fn create_test(
    state: web::Data<AppState>,
    request: web::Json<CreateTestRequest>,
) -> Result<HttpResponse, AppError> {
    let request = request.into_inner();
    request.validate()?;
    let test = state
        .test_service
        .create_test(&request.student_id, &request.level, &request.unit)
        .await?;
    Ok(HttpResponse::Created().json(test))
}

#[post("/api/tests/{id}/part1")]
async fn submit_part1(
    state: web::Data<AppState>,
    id: web::Path<String>,
    request: web::Json<SubmitPart1Request>,
) -> Result<HttpResponse, AppError> {
    let response = state.test_service.submit_part1(&id, &request).await?;
    Ok(HttpResponse::Accepted().json(response))
}

#[post("/api/tests/{id}/part2")]
async fn submit_part2(
    state: web::Data<AppState>,
    id: web::Path<String>,
    request: web::Json<SubmitPart2Request>,
) -> Result<HttpResponse, AppError> {
    let response = state.test_service.submit_part2(&id, &request).await?;
    Ok(HttpResponse::Accepted().json(response))
}

#[get("/api/tests/{id}")]
async fn get_test_status(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let response = state.test_service.get_status(&id).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[get("/health")]
async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    state.db.health_check().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}
