use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub i64);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Employee,
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "EMPLOYEE",
            Self::Approver => "APPROVER",
            Self::Admin => "ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMPLOYEE" => Some(Self::Employee),
            "APPROVER" => Some(Self::Approver),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Roles allowed to own an approval step.
    pub fn can_approve(&self) -> bool {
        matches!(self, Self::Approver | Self::Admin)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub role: Role,
}

/// Identity of whoever is invoking an operation, as asserted by the ingress layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub id: EmployeeId,
    pub role: Role,
}

impl Caller {
    pub fn new(id: EmployeeId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when the caller is `employee` or holds the admin role.
    pub fn acts_for(&self, employee: EmployeeId) -> bool {
        self.is_admin() || self.id == employee
    }
}

#[cfg(test)]
mod tests {
    use super::{Caller, EmployeeId, Role};

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse(" approver "), Some(Role::Approver));
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("auditor"), None);
    }

    #[test]
    fn only_approver_and_admin_can_own_steps() {
        assert!(!Role::Employee.can_approve());
        assert!(Role::Approver.can_approve());
        assert!(Role::Admin.can_approve());
    }

    #[test]
    fn admin_acts_for_anyone() {
        let admin = Caller::new(EmployeeId(1), Role::Admin);
        let approver = Caller::new(EmployeeId(2), Role::Approver);

        assert!(admin.acts_for(EmployeeId(99)));
        assert!(approver.acts_for(EmployeeId(2)));
        assert!(!approver.acts_for(EmployeeId(3)));
    }
}
