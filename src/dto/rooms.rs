use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::dto::validation::validate_path_id;

/// Path parameters addressing a room.
#[derive(Debug, Deserialize)]
pub struct RoomPath {
    /// Room code.
    pub room: String,
}

impl Validate for RoomPath {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_path_id(&self.room) {
            errors.add("room", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Path parameters addressing one participant row of a room.
#[derive(Debug, Deserialize)]
pub struct ParticipantPath {
    /// Room code.
    pub room: String,
    /// Participant identity.
    pub user: String,
}

impl Validate for ParticipantPath {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_path_id(&self.room) {
            errors.add("room", e);
        }
        if let Err(e) = validate_path_id(&self.user) {
            errors.add("user", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Answer of the room existence check.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExistsResponse {
    /// Whether a room row or any participant row exists.
    pub exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_path_reports_every_bad_field() {
        let path = ParticipantPath {
            room: "bad room".into(),
            user: String::new(),
        };
        let errors = path.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("room"));
        assert!(fields.contains_key("user"));
    }
}
