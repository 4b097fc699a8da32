//! The actor placing orders.

use common::MemberId;
use serde::{Deserialize, Serialize};

/// A registered shop member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Contact address used for order notifications.
    pub email: String,
    pub name: String,
}

impl Member {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: MemberId::new(),
            email: email.into(),
            name: name.into(),
        }
    }
}
