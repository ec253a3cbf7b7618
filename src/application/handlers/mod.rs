//! HTTP handlers, one module per resource.

pub mod challenges;
pub mod health;
pub mod prices;
pub mod trading;

use crate::application::services::trading::Caller;
use crate::auth::AuthUser;

impl From<&AuthUser> for Caller {
    fn from(user: &AuthUser) -> Self {
        Caller {
            user_id: user.id,
            is_admin: user.is_admin(),
        }
    }
}

/// Caller identity for the cron paths; behaves like an admin.
pub(crate) fn cron_caller() -> Caller {
    Caller {
        user_id: 0,
        is_admin: true,
    }
}
