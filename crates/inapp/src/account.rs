use campaign_core::types::UserInfo;
use parking_lot::RwLock;
use tracing::info;

/// Identity of the current user, as registered by the host.
#[derive(Debug, Default)]
pub struct AccountRepository {
    user: RwLock<UserInfo>,
}

impl AccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_info(&self) -> UserInfo {
        self.user.read().clone()
    }

    /// Stores `user`. Returns true when it names a different user than
    /// before; a refreshed access token alone is not a change.
    pub fn update_user_info(&self, user: UserInfo) -> bool {
        let mut current = self.user.write();
        let changed = current.cache_key() != user.cache_key();
        if changed {
            info!(user_key = %user.cache_key(), "User changed");
        }
        *current = user;
        changed
    }
}
