// Resource lifecycle state machine.
//
// requested -> provisioning -> active -> updating -> active
//                                     -> degraded -> terminating -> terminated
// failed is reachable from any non-terminal state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a resource instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Requested,
    Provisioning,
    Active,
    Updating,
    Degraded,
    Terminating,
    Terminated,
    Failed,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Updating => "updating",
            Self::Degraded => "degraded",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    /// Whether the state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Intermediate states owned by the orchestrator while a workflow runs.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Updating | Self::Terminating)
    }

    /// Legality of a single state transition.
    pub fn can_transition_to(&self, to: ResourceState) -> bool {
        use ResourceState::*;
        // failed is reachable from every non-terminal state
        if to == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Requested, Provisioning)
                | (Provisioning, Active)
                | (Active, Updating)
                | (Updating, Active)
                | (Active, Degraded)
                | (Degraded, Active)
                | (Active, Terminating)
                | (Degraded, Terminating)
                | (Terminating, Terminated)
                | (Failed, Requested)
                | (Failed, Terminating)
        )
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "updating" => Ok(Self::Updating),
            "degraded" => Ok(Self::Degraded),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown resource state: {other}")),
        }
    }
}

/// Desired operation on a resource. An absent operation on a `requested`
/// row is treated as `create` on first reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// The intermediate state the orchestrator parks a row in while the
    /// operation's workflow runs.
    pub fn in_flight_state(&self) -> ResourceState {
        match self {
            Self::Create => ResourceState::Provisioning,
            Self::Update => ResourceState::Updating,
            Self::Delete => ResourceState::Terminating,
        }
    }

    /// The state reached when the operation's workflow succeeds.
    pub fn success_state(&self) -> ResourceState {
        match self {
            Self::Create | Self::Update => ResourceState::Active,
            Self::Delete => ResourceState::Terminated,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_create_path_is_legal() {
        assert!(ResourceState::Requested.can_transition_to(ResourceState::Provisioning));
        assert!(ResourceState::Provisioning.can_transition_to(ResourceState::Active));
    }

    #[test]
    fn failed_reachable_from_non_terminal() {
        assert!(ResourceState::Provisioning.can_transition_to(ResourceState::Failed));
        assert!(ResourceState::Updating.can_transition_to(ResourceState::Failed));
        assert!(!ResourceState::Terminated.can_transition_to(ResourceState::Failed));
    }

    #[test]
    fn illegal_jumps_rejected() {
        assert!(!ResourceState::Requested.can_transition_to(ResourceState::Active));
        assert!(!ResourceState::Terminated.can_transition_to(ResourceState::Active));
        assert!(!ResourceState::Active.can_transition_to(ResourceState::Provisioning));
    }

    #[test]
    fn operation_state_mapping() {
        assert_eq!(Operation::Create.in_flight_state(), ResourceState::Provisioning);
        assert_eq!(Operation::Delete.success_state(), ResourceState::Terminated);
        assert_eq!(Operation::Update.success_state(), ResourceState::Active);
    }

    #[test]
    fn state_round_trips_through_str() {
        for s in [
            ResourceState::Requested,
            ResourceState::Degraded,
            ResourceState::Terminated,
        ] {
            assert_eq!(s.as_str().parse::<ResourceState>().unwrap(), s);
        }
    }
}
