//! Repository hosting status

use std::fmt;
use std::str::FromStr;

use crate::error::PdsError;

/// Lifecycle state of a hosted repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    /// Readable and writable
    Active,
    /// Paused by the account holder
    Deactivated,
    /// Suspended by an operator
    Takendown,
    /// Gone for good; its blocks and blobs are left to garbage collection
    Deleted,
}

impl RepoStatus {
    /// Status name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Active => "active",
            RepoStatus::Deactivated => "deactivated",
            RepoStatus::Takendown => "takendown",
            RepoStatus::Deleted => "deleted",
        }
    }

    /// Whether reads and writes are served
    pub fn is_active(&self) -> bool {
        matches!(self, RepoStatus::Active)
    }

    /// Whether `self -> to` is an allowed move
    ///
    /// ```text
    /// active <-> deactivated
    /// active | deactivated -> takendown
    /// takendown -> active
    /// any -> deleted (terminal)
    /// ```
    pub fn can_transition(&self, to: RepoStatus) -> bool {
        use RepoStatus::*;
        matches!(
            (self, to),
            (Active, Deactivated)
                | (Deactivated, Active)
                | (Active | Deactivated, Takendown)
                | (Takendown, Active)
                | (Active | Deactivated | Takendown, Deleted)
        )
    }

    /// Validated transition
    pub fn transition(self, to: RepoStatus) -> Result<RepoStatus, PdsError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(PdsError::input(
                "InvalidStatusTransition",
                format!("cannot move a {} repository to {}", self, to),
            ))
        }
    }

    /// Error for reads against a repository in this status, if any
    ///
    /// Deleted repositories look like missing ones.
    pub(crate) fn read_error(&self, did: &burrow_common::Did) -> Option<PdsError> {
        match self {
            RepoStatus::Active => None,
            RepoStatus::Deleted => Some(PdsError::repo_not_found(did)),
            status => Some(PdsError::RepoUnavailable {
                did: did.to_string(),
                status: *status,
            }),
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = PdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RepoStatus::Active),
            "deactivated" => Ok(RepoStatus::Deactivated),
            "takendown" => Ok(RepoStatus::Takendown),
            "deleted" => Ok(RepoStatus::Deleted),
            other => Err(PdsError::input(
                "InvalidRequest",
                format!("unknown repository status {other:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RepoStatus::*;

    const ALL: [RepoStatus; 4] = [Active, Deactivated, Takendown, Deleted];

    #[test]
    fn allowed_transitions() {
        let allowed = [
            (Active, Deactivated),
            (Deactivated, Active),
            (Active, Takendown),
            (Deactivated, Takendown),
            (Takendown, Active),
            (Active, Deleted),
            (Deactivated, Deleted),
            (Takendown, Deleted),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn deleted_is_terminal() {
        for to in ALL {
            let err = Deleted.transition(to).unwrap_err();
            assert_eq!(err.error_name(), "InvalidStatusTransition");
        }
    }

    #[test]
    fn takendown_cannot_deactivate() {
        assert!(Takendown.transition(Deactivated).is_err());
        assert_eq!(Takendown.transition(Active).unwrap(), Active);
    }

    #[test]
    fn wire_names_round_trip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<RepoStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("suspended".parse::<RepoStatus>().is_err());
    }
}
