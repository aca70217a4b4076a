//! Stored access policies and delegated-caller authorization.
//!
//! A queue holds up to [`MAX_ACCESS_POLICIES`] named policies ("signed
//! identifiers"). A delegated credential references one of them by name
//! instead of embedding its permissions and validity window directly.

use crate::config::MAX_ACCESS_POLICIES;
use crate::error::ValidationError;
use crate::message::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;

/// Longest accepted policy identifier
pub const MAX_POLICY_ID_LENGTH: usize = 64;

/// Mapping of policy identifier to policy, ordered by identifier
pub type AccessPolicies = BTreeMap<String, AccessPolicy>;

// ============================================================================
// Permissions
// ============================================================================

/// Set of queue permissions
///
/// Rendered in the canonical `raup` order: read, add, update, process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueuePermissions {
    read: bool,
    add: bool,
    update: bool,
    process: bool,
}

impl QueuePermissions {
    pub const NONE: Self = Self {
        read: false,
        add: false,
        update: false,
        process: false,
    };
    pub const READ: Self = Self {
        read: true,
        ..Self::NONE
    };
    pub const ADD: Self = Self {
        add: true,
        ..Self::NONE
    };
    pub const UPDATE: Self = Self {
        update: true,
        ..Self::NONE
    };
    pub const PROCESS: Self = Self {
        process: true,
        ..Self::NONE
    };
    pub const ALL: Self = Self {
        read: true,
        add: true,
        update: true,
        process: true,
    };

    /// Combine two permission sets
    pub fn union(self, other: Self) -> Self {
        Self {
            read: self.read || other.read,
            add: self.add || other.add,
            update: self.update || other.update,
            process: self.process || other.process,
        }
    }

    /// Check whether every permission in `other` is also in `self`
    pub fn contains(&self, other: Self) -> bool {
        (self.read || !other.read)
            && (self.add || !other.add)
            && (self.update || !other.update)
            && (self.process || !other.process)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

impl std::fmt::Display for QueuePermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (granted, symbol) in [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.update, 'u'),
            (self.process, 'p'),
        ] {
            if granted {
                write!(f, "{}", symbol)?;
            }
        }
        Ok(())
    }
}

impl FromStr for QueuePermissions {
    type Err = ValidationError;

    /// Parse a permission string such as `"rp"`; letters may appear in any order
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars().try_fold(Self::NONE, |permissions, c| {
            let permission = match c {
                'r' => Self::READ,
                'a' => Self::ADD,
                'u' => Self::UPDATE,
                'p' => Self::PROCESS,
                other => {
                    return Err(ValidationError::InvalidFormat {
                        field: "permission".to_string(),
                        message: format!("unknown permission '{}'", other),
                    })
                }
            };
            Ok(permissions.union(permission))
        })
    }
}

impl TryFrom<String> for QueuePermissions {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueuePermissions> for String {
    fn from(permissions: QueuePermissions) -> Self {
        permissions.to_string()
    }
}

// ============================================================================
// Access Policy
// ============================================================================

/// Permission grant with an optional validity window
///
/// The default value, with every field unset, is the "no restriction"
/// placeholder. It is stored as-is but grants nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub permission: Option<QueuePermissions>,
    pub start: Option<Timestamp>,
    pub expiry: Option<Timestamp>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(mut self, permission: QueuePermissions) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn with_start(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_expiry(mut self, expiry: Timestamp) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Check whether `now` falls inside the validity window
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.start.map_or(true, |start| now >= start)
            && self.expiry.map_or(true, |expiry| now < expiry)
    }

    /// Check whether the policy grants `requested` at `now`
    pub fn grants(&self, requested: QueuePermissions, now: Timestamp) -> bool {
        self.is_active(now)
            && self
                .permission
                .is_some_and(|permission| permission.contains(requested))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(start), Some(expiry)) = (self.start, self.expiry) {
            if start > expiry {
                return Err(ValidationError::OutOfRange {
                    field: "access_policy".to_string(),
                    message: format!("start {} is after expiry {}", start, expiry),
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Named access policies of one queue
#[derive(Debug, Clone, Default)]
pub struct AccessPolicyRegistry {
    policies: AccessPolicies,
}

impl AccessPolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire policy set
    ///
    /// Every entry is checked before anything is stored; on error the
    /// previous set is left as it was.
    pub fn set(&mut self, policies: AccessPolicies) -> Result<(), ValidationError> {
        if policies.len() > MAX_ACCESS_POLICIES {
            return Err(ValidationError::TooMany {
                field: "access_policies".to_string(),
                count: policies.len(),
                max: MAX_ACCESS_POLICIES,
            });
        }

        for (identifier, policy) in &policies {
            validate_policy_id(identifier)?;
            policy.validate()?;
        }

        self.policies = policies;
        Ok(())
    }

    /// Current policies, possibly empty
    pub fn get(&self) -> AccessPolicies {
        self.policies.clone()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Check whether the policy named `identifier` grants `requested` at `now`
    pub fn authorize(&self, identifier: &str, requested: QueuePermissions, now: Timestamp) -> bool {
        self.policies
            .get(identifier)
            .is_some_and(|policy| policy.grants(requested, now))
    }
}

fn validate_policy_id(identifier: &str) -> Result<(), ValidationError> {
    if identifier.is_empty() {
        return Err(ValidationError::Required {
            field: "policy_id".to_string(),
        });
    }

    if identifier.chars().count() > MAX_POLICY_ID_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: "policy_id".to_string(),
            message: format!("must be at most {} characters", MAX_POLICY_ID_LENGTH),
        });
    }

    if identifier.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: "policy_id".to_string(),
            message: "control characters are not allowed".to_string(),
        });
    }

    Ok(())
}

// ============================================================================
// Callers
// ============================================================================

/// Delegated credential referencing a stored access policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedAccess {
    pub policy_id: String,
    /// Permissions carried by the credential itself, already validated by the
    /// transport layer. When present they further narrow the policy.
    pub permissions: Option<QueuePermissions>,
}

impl DelegatedAccess {
    pub fn new(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, permissions: QueuePermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Identity presented with every service request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Resolved account credential; may perform any operation
    Account,
    /// Delegated credential, limited by a queue access policy
    Delegated(DelegatedAccess),
}

/// Operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    CreateQueue,
    DeleteQueue,
    SetMetadata,
    ListQueues,
    GetAccessPolicy,
    SetAccessPolicy,
    GetProperties,
    SendMessage,
    ReceiveMessages,
    PeekMessages,
    BrowseMessages,
    UpdateMessage,
    DeleteMessage,
    ClearMessages,
}

impl QueueOperation {
    /// Permission a delegated caller needs, or `None` for account-only operations
    pub fn required_permission(self) -> Option<QueuePermissions> {
        match self {
            Self::CreateQueue
            | Self::DeleteQueue
            | Self::SetMetadata
            | Self::ListQueues
            | Self::GetAccessPolicy
            | Self::SetAccessPolicy => None,
            Self::GetProperties | Self::PeekMessages | Self::BrowseMessages => {
                Some(QueuePermissions::READ)
            }
            Self::SendMessage => Some(QueuePermissions::ADD),
            Self::UpdateMessage => Some(QueuePermissions::UPDATE),
            Self::ReceiveMessages | Self::DeleteMessage | Self::ClearMessages => {
                Some(QueuePermissions::PROCESS)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateQueue => "create_queue",
            Self::DeleteQueue => "delete_queue",
            Self::SetMetadata => "set_metadata",
            Self::ListQueues => "list_queues",
            Self::GetAccessPolicy => "get_access_policy",
            Self::SetAccessPolicy => "set_access_policy",
            Self::GetProperties => "get_queue_properties",
            Self::SendMessage => "send_message",
            Self::ReceiveMessages => "receive_messages",
            Self::PeekMessages => "peek_messages",
            Self::BrowseMessages => "browse_messages",
            Self::UpdateMessage => "update_message",
            Self::DeleteMessage => "delete_message",
            Self::ClearMessages => "clear_messages",
        }
    }
}

impl std::fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Caller {
    /// Decide whether this caller may perform `operation` on a queue whose
    /// policies are `registry`
    ///
    /// Account-only operations pass no registry.
    pub fn may_perform(
        &self,
        operation: QueueOperation,
        registry: Option<&AccessPolicyRegistry>,
        now: Timestamp,
    ) -> bool {
        let access = match self {
            Self::Account => return true,
            Self::Delegated(access) => access,
        };

        let (Some(required), Some(registry)) = (operation.required_permission(), registry) else {
            return false;
        };

        access
            .permissions
            .map_or(true, |carried| carried.contains(required))
            && registry.authorize(&access.policy_id, required, now)
    }
}
