use crate::server::response::ApiError;

const MAX_PROJECT_NAME_LEN: usize = 200;
const MAX_TOKEN_NAME_LEN: usize = 100;
const MAX_GROUP_NAME_LEN: usize = 255;

fn validate_text(value: &str, field: &str, max_len: usize) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} cannot be empty")));
    }
    if value.chars().count() > max_len {
        return Err(ApiError::bad_request(format!(
            "{field} cannot exceed {max_len} characters"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(ApiError::bad_request(format!(
            "{field} cannot contain control characters"
        )));
    }
    Ok(value.to_string())
}

/// Returns the trimmed project name.
pub fn validate_project_name(name: &str) -> Result<String, ApiError> {
    validate_text(name, "Project name", MAX_PROJECT_NAME_LEN)
}

pub fn validate_token_name(name: &str) -> Result<String, ApiError> {
    validate_text(name, "Token name", MAX_TOKEN_NAME_LEN)
}

pub fn validate_group_name(name: &str) -> Result<String, ApiError> {
    validate_text(name, "Group name", MAX_GROUP_NAME_LEN)
}

pub fn validate_email(email: &str) -> Result<String, ApiError> {
    let email = validate_text(email, "Email", MAX_GROUP_NAME_LEN)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ApiError::bad_request("Email must contain a local part and a domain")),
    }
}
