//! Maps storage-engine failures onto the tenancy taxonomy.

use anyhow::Error as AnyError;
use dog_core::TenancyError;

/// `invalid_text_representation`: the policy's `::uuid` cast failed.
pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";
/// `insufficient_privilege`: raised for row-level security `WITH CHECK` failures.
pub const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Re-type engine errors that mean "tenant isolation stopped this".
///
/// A 22P02 on a uuid cast becomes [`TenancyError::IsolationCastError`]; a
/// 42501 mentioning row-level security becomes
/// [`TenancyError::PolicyViolation`]. Everything else passes through
/// untouched.
pub fn classify(err: AnyError) -> AnyError {
    let Some(db) = err
        .chain()
        .find_map(|e| e.downcast_ref::<sqlx::Error>())
        .and_then(|e| e.as_database_error())
    else {
        return err;
    };

    let code = db.code().map(|c| c.into_owned());
    let message = db.message().to_string();

    match code.as_deref() {
        Some(INVALID_TEXT_REPRESENTATION) if message.contains("type uuid") => {
            tracing::error!(sqlstate = INVALID_TEXT_REPRESENTATION, %message, "tenant binding failed the isolation cast");
            TenancyError::IsolationCastError(message).into_anyhow()
        }
        Some(INSUFFICIENT_PRIVILEGE) if message.contains("row-level security") => {
            tracing::warn!(sqlstate = INSUFFICIENT_PRIVILEGE, %message, "write rejected by tenant isolation policy");
            TenancyError::PolicyViolation(message).into_anyhow()
        }
        _ => err,
    }
}

pub fn classify_sqlx(err: sqlx::Error) -> AnyError {
    classify(AnyError::new(err))
}

/// The tenancy error somewhere in `err`'s chain, if any.
pub fn tenancy_error(err: &AnyError) -> Option<&TenancyError> {
    err.chain().find_map(|e| e.downcast_ref::<TenancyError>())
}
