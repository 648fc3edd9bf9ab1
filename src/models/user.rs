use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    /// Instructors and admins may read and act on other users' data.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Instructor | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("STUDENT".parse::<Role>().unwrap(), Role::Student);
        assert!("proctor".parse::<Role>().is_err());
    }

    #[test]
    fn elevation() {
        assert!(!Role::Student.is_elevated());
        assert!(Role::Instructor.is_elevated());
        assert!(Role::Admin.is_elevated());
    }
}
