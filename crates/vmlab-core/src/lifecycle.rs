use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// State of a machine or network handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    Defined,
    Live,
    TornDown,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Defined => "defined",
            Self::Live => "live",
            Self::TornDown => "torn-down",
        })
    }
}

pub fn validate_transition(from: ResourceState, to: ResourceState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            ResourceState::Defined | ResourceState::TornDown,
            ResourceState::Live
        ) | (ResourceState::Live, ResourceState::TornDown)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(ResourceState::Defined, ResourceState::Live).is_ok());
        assert!(validate_transition(ResourceState::Live, ResourceState::TornDown).is_ok());
        assert!(validate_transition(ResourceState::TornDown, ResourceState::Live).is_ok()); // re-acquire
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(ResourceState::Defined, ResourceState::TornDown).is_err());
        assert!(validate_transition(ResourceState::Live, ResourceState::Live).is_err());
        assert!(validate_transition(ResourceState::TornDown, ResourceState::TornDown).is_err());
        assert!(validate_transition(ResourceState::Live, ResourceState::Defined).is_err());
    }
}
