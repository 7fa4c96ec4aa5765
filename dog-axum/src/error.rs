use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dog_core::errors::{DogError, TenancyError};

#[derive(Debug)]
pub struct DogAxumError(pub anyhow::Error);

impl From<anyhow::Error> for DogAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<TenancyError> for DogAxumError {
    fn from(e: TenancyError) -> Self {
        Self(e.into_anyhow())
    }
}

impl From<DogError> for DogAxumError {
    fn from(e: DogError) -> Self {
        Self(e.into_anyhow())
    }
}

impl IntoResponse for DogAxumError {
    fn into_response(self) -> Response {
        // A DogError anywhere in the chain (even behind anyhow contexts) keeps its
        // Feathers-ish fields; a TenancyError keeps its reason; anything else is a
        // GeneralError.
        let found = self
            .0
            .chain()
            .find_map(|e| e.downcast_ref::<DogError>())
            .map(DogError::sanitize_for_client);
        let dog = match found {
            Some(dog) => dog,
            None => DogError::normalize(self.0),
        };

        if dog.code() >= 500 {
            tracing::error!(
                code = dog.code(),
                reason = dog.reason().unwrap_or(""),
                error = %dog,
                "request failed"
            );
        }

        let safe = dog.sanitize_for_client();
        let status = StatusCode::from_u16(safe.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(safe.to_json())).into_response()
    }
}
