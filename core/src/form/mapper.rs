use tracing::debug;

use super::{FieldError, FormState};
use crate::error::ApiError;

/// Joins several server messages for one field into the single line a form
/// field can show.
pub const FIELD_ERROR_SEPARATOR: &str = "|";

/// Copy `error.details.fields` onto `form` as manual field errors.
///
/// Field names the form does not render are skipped: the server's field set
/// and the client's schema change independently. Fields the error does not
/// mention keep whatever error they had.
pub fn map_errors(form: &mut FormState, error: &ApiError) {
    for field in error.field_errors() {
        let message = field.errors.join(FIELD_ERROR_SEPARATOR);
        if !form.set_error(&field.name, FieldError::manual(message)) {
            debug!(field = %field.name, "server error for a field the form does not render");
        }
    }
}
