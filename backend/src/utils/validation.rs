use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::handlers::application_dtos::ApplicationRequest;
use crate::models::application_models::NewApplication;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

pub const MIN_WHATSAPP_DIGITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Todos os campos são obrigatórios")]
    MissingFields,
    #[error("Email inválido")]
    InvalidEmail,
    #[error("WhatsApp inválido")]
    InvalidWhatsapp,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn whatsapp_digit_count(whatsapp: &str) -> usize {
    whatsapp.chars().filter(|c| c.is_ascii_digit()).count()
}

pub fn is_valid_whatsapp(whatsapp: &str) -> bool {
    whatsapp_digit_count(whatsapp) >= MIN_WHATSAPP_DIGITS
}

fn required(value: &Option<String>) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(ValidationError::MissingFields),
    }
}

/// Checks run in order and the first failure wins: presence, then email,
/// then the phone digit count. Values are kept exactly as submitted.
pub fn validate_application(req: &ApplicationRequest) -> Result<NewApplication, ValidationError> {
    let application = NewApplication {
        experience: required(&req.experience)?,
        business_model: required(&req.business_model)?,
        automation_level: required(&req.automation_level)?,
        goal: required(&req.goal)?,
        investment: required(&req.investment)?,
        email: required(&req.email)?,
        whatsapp: required(&req.whatsapp)?,
    };

    if !is_valid_email(&application.email) {
        return Err(ValidationError::InvalidEmail);
    }
    if !is_valid_whatsapp(&application.whatsapp) {
        return Err(ValidationError::InvalidWhatsapp);
    }

    Ok(application)
}

#[cfg(test)]
pub(crate) fn sample_request() -> ApplicationRequest {
    ApplicationRequest {
        experience: Some("Intermediário (6 meses - 2 anos)".to_string()),
        business_model: Some("Dono de Agência Tradicional".to_string()),
        automation_level: Some("Curioso (Estudei mas não vendi)".to_string()),
        goal: Some("Equity/MicroSaaS (Construir ativos)".to_string()),
        investment: Some("Sim, pronto para o jogo de longo prazo".to_string()),
        email: Some("founder@example.com".to_string()),
        whatsapp: Some("(11) 98765-4321".to_string()),
    }
}
