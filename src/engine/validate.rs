use std::fmt;

use crate::models::intake::IntakePayload;

pub const MIN_CUSTOMER_NAME_LEN: usize = 2;
pub const MIN_PHONE_LEN: usize = 6;
pub const MIN_DESTINATION_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub min_len: usize,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} must be at least {} characters", self.field, self.min_len)
    }
}

/// Every failing field of an intake, in form order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|err| err.field)
    }
}

pub fn validate_intake(payload: &IntakePayload) -> Result<(), ValidationErrors> {
    let checks = [
        ("customerName", &payload.customer_name, MIN_CUSTOMER_NAME_LEN),
        ("phone", &payload.phone, MIN_PHONE_LEN),
        ("destination", &payload.destination, MIN_DESTINATION_LEN),
    ];

    let errors: Vec<FieldError> = checks
        .into_iter()
        .filter(|(_, value, min_len)| value.trim().chars().count() < *min_len)
        .map(|(field, _, min_len)| FieldError { field, min_len })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}
