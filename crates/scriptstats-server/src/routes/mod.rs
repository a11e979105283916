use scriptstats_core::event::Operation;

use crate::error::AppError;

pub mod collect;
pub mod health;
pub mod realtime;
pub mod stats;

/// `?operation=` on the read routes; defaults to `download`.
pub(crate) fn parse_operation(raw: Option<&str>) -> Result<Operation, AppError> {
    match raw {
        None => Ok(Operation::Download),
        Some(raw) => raw
            .parse::<Operation>()
            .map_err(|e| AppError::invalid("operation", e.to_string())),
    }
}
