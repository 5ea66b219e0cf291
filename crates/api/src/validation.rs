use validator::Validate;

use crate::error::ApiError;

pub fn validate_payload<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))
}
