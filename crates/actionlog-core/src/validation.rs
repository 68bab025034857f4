//! Entry validation.
//!
//! Every store runs [`validate_new_entry`] before assigning `added`, so a
//! rejected insertion never consumes a counter value.

use crate::action::Action;
use crate::error::ValidationError;
use crate::meta::NewMeta;
use crate::types::ActionId;

/// Check the contract of `add`: a non-empty action type and a present id
/// whose sequence fits [`ActionId::MAX_SEQ`].
pub fn validate_new_entry(action: &Action, meta: &NewMeta) -> Result<(), ValidationError> {
    if action.kind.is_empty() {
        return Err(ValidationError::EmptyActionType);
    }
    match &meta.id {
        None => Err(ValidationError::MissingId),
        Some(id) if id.seq > ActionId::MAX_SEQ => Err(ValidationError::SeqOutOfRange(id.seq)),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_entry() {
        let action = Action::new("a");
        assert!(validate_new_entry(&action, &NewMeta::with_id((1, "n", 0))).is_ok());
    }

    #[test]
    fn test_missing_id() {
        let action = Action::new("a");
        assert_eq!(
            validate_new_entry(&action, &NewMeta::new()),
            Err(ValidationError::MissingId)
        );
    }

    #[test]
    fn test_empty_type() {
        let action = Action::new("");
        assert_eq!(
            validate_new_entry(&action, &NewMeta::with_id((1, "n", 0))),
            Err(ValidationError::EmptyActionType)
        );
    }

    #[test]
    fn test_seq_out_of_range() {
        let action = Action::new("a");
        assert!(validate_new_entry(&action, &NewMeta::with_id((1, "n", ActionId::MAX_SEQ))).is_ok());
        assert_eq!(
            validate_new_entry(&action, &NewMeta::with_id((1, "n", u64::MAX))),
            Err(ValidationError::SeqOutOfRange(u64::MAX))
        );
    }
}
