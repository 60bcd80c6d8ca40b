use serde::{Deserialize, Serialize};

use crate::models::application_models::ApplicationId;

/// Body of `POST /api/applications`. Every field is optional at the serde
/// level so a missing key is reported by validation, not by the extractor.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRequest {
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub business_model: Option<String>,
    #[serde(default)]
    pub automation_level: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub investment: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
    pub id: ApplicationId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
