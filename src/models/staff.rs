use std::fmt;

use serde::{Deserialize, Serialize};

/// Dashboard roles. Each role owns a cross-table realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Admin,
    Kitchen,
    Receptionist,
}

impl StaffRole {
    pub const ALL: [StaffRole; 3] = [StaffRole::Admin, StaffRole::Kitchen, StaffRole::Receptionist];

    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Kitchen => "kitchen",
            StaffRole::Receptionist => "receptionist",
        }
    }

    /// Role channels a connection with this role listens on. Admin sees every role feed.
    pub fn listens_to(&self) -> &'static [StaffRole] {
        match self {
            StaffRole::Admin => &Self::ALL,
            StaffRole::Kitchen => &[StaffRole::Kitchen],
            StaffRole::Receptionist => &[StaffRole::Receptionist],
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
