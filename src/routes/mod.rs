pub mod auth;
pub mod escalations;
pub mod health;
pub mod roles;
pub mod tenant;
pub mod users;

use crate::authz::AuthContext;
use crate::events::Actor;

fn actor(auth: &AuthContext) -> Actor {
    Actor {
        tenant_id: auth.tenant_id,
        user_id: auth.user_id,
    }
}
