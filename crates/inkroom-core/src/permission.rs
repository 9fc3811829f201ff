//! Role and ownership based edit permissions.

use serde::{Deserialize, Serialize};

use crate::scene::{ClientId, LockState, Scene, SceneObject};

/// Connection role, fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Presenter,
    #[default]
    Participant,
}

/// Inputs of the lock decision for this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub role: Role,
    /// Session is view-only regardless of the replicated draw permission.
    pub read_only: bool,
    /// Participants may only edit objects they created.
    pub enforce_ownership: bool,
    /// Last seen value of the replicated `allowParticipantDraw` flag.
    pub allow_participant_draw: bool,
}

impl PermissionPolicy {
    /// Whether the session is effectively view-only for participants.
    pub fn global_read_only(&self) -> bool {
        self.read_only || !self.allow_participant_draw
    }

    /// Whether this client may create objects at all.
    pub fn draw_allowed(&self) -> bool {
        self.role == Role::Presenter || !self.global_read_only()
    }

    /// Lock state for `object` as seen by `local_client`.
    pub fn lock_for(&self, object: &SceneObject, local_client: Option<ClientId>) -> bool {
        compute_lock(
            object.created_by,
            self.role,
            self.global_read_only(),
            self.enforce_ownership,
            local_client,
        )
    }
}

/// Rules of the lock decision, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRule {
    /// The presenter can always edit.
    PresenterOverride,
    /// View-only sessions lock everything, owners included.
    GlobalReadOnly,
    /// Ownership is enforced and someone else created the object.
    ForeignOwner,
    /// Nothing restricts the object.
    Default,
}

impl LockRule {
    /// Evaluation order.
    pub const ORDER: [LockRule; 4] = [
        LockRule::PresenterOverride,
        LockRule::GlobalReadOnly,
        LockRule::ForeignOwner,
        LockRule::Default,
    ];

    fn applies(
        self,
        created_by: Option<ClientId>,
        role: Role,
        global_read_only: bool,
        enforce_ownership: bool,
        local_client: Option<ClientId>,
    ) -> bool {
        match self {
            LockRule::PresenterOverride => role == Role::Presenter,
            LockRule::GlobalReadOnly => global_read_only,
            // An unknown local id or owner never matches.
            LockRule::ForeignOwner => {
                enforce_ownership && (created_by.is_none() || created_by != local_client)
            }
            LockRule::Default => true,
        }
    }

    pub fn locks(self) -> bool {
        matches!(self, LockRule::GlobalReadOnly | LockRule::ForeignOwner)
    }
}

/// The first rule in [`LockRule::ORDER`] that applies.
pub fn decide(
    created_by: Option<ClientId>,
    role: Role,
    global_read_only: bool,
    enforce_ownership: bool,
    local_client: Option<ClientId>,
) -> LockRule {
    LockRule::ORDER
        .into_iter()
        .find(|rule| {
            rule.applies(
                created_by,
                role,
                global_read_only,
                enforce_ownership,
                local_client,
            )
        })
        .unwrap_or(LockRule::Default)
}

/// Whether an object is locked for this client.
pub fn compute_lock(
    created_by: Option<ClientId>,
    role: Role,
    global_read_only: bool,
    enforce_ownership: bool,
    local_client: Option<ClientId>,
) -> bool {
    decide(
        created_by,
        role,
        global_read_only,
        enforce_ownership,
        local_client,
    )
    .locks()
}

/// Set every interaction attribute of `object` to `!locked`.
pub fn apply_lock(object: &mut SceneObject, locked: bool) {
    object.lock = LockState::from_locked(locked);
}

/// Recompute the lock of every object in `scene`. Returns how many changed.
pub fn reapply_all(
    scene: &mut dyn Scene,
    policy: &PermissionPolicy,
    local_client: Option<ClientId>,
) -> usize {
    let mut changed = 0;
    scene.for_each_mut(&mut |object| {
        let locked = policy.lock_for(object, local_client);
        if object.is_locked() != locked {
            changed += 1;
        }
        apply_lock(object, locked);
    });
    changed
}
