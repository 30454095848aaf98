use uuid::Uuid;

const MAX_LABEL_TOKEN_LEN: usize = 64;

/// Snapshot of the observable state of one host-rendered entry node.
///
/// The host owns the real node and may recreate it at any time, so
/// resolution works on a plain copy of what was visible at call time and
/// never caches anything on the node itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryView {
    pub unique_id: Option<String>,
    pub label: Option<String>,
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityTier {
    UniqueId,
    Label,
    Position,
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    pub token: String,
    pub tier: IdentityTier,
}

impl ResolvedId {
    /// True when re-deriving from the same logical entry yields the same
    /// token across re-renders and reorders. Positional and random tokens
    /// are best-effort: an association made under them may end up pointing
    /// at a different entry after the host reshuffles its list.
    pub fn is_stable(&self) -> bool {
        matches!(self.tier, IdentityTier::UniqueId | IdentityTier::Label)
    }
}

/// Derives an identifier for an entry node that carries no guaranteed
/// stable id. First tier to produce a non-empty token wins.
pub fn resolve(view: &EntryView) -> ResolvedId {
    if let Some(uid) = view
        .unique_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return ResolvedId {
            token: uid.to_string(),
            tier: IdentityTier::UniqueId,
        };
    }

    if let Some(label) = view.label.as_deref() {
        let token = sanitize_label(label);
        if !token.is_empty() {
            return ResolvedId {
                token,
                tier: IdentityTier::Label,
            };
        }
    }

    if let Some(position) = view.position {
        return ResolvedId {
            token: format!("entry_{position}"),
            tier: IdentityTier::Position,
        };
    }

    ResolvedId {
        token: Uuid::new_v4().to_string(),
        tier: IdentityTier::Random,
    }
}

/// Reduces a user-visible label to an identifier-safe token: lowercase
/// alphanumerics, with every other run of characters collapsed to a
/// single underscore. Two entries sharing a label collide; that is
/// accepted degraded behavior for this tier.
pub fn sanitize_label(label: &str) -> String {
    let mut token = String::new();
    let mut pending_separator = false;
    for ch in label.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !token.is_empty() {
                token.push('_');
            }
            pending_separator = false;
            token.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
        if token.len() >= MAX_LABEL_TOKEN_LEN {
            break;
        }
    }
    token.truncate(MAX_LABEL_TOKEN_LEN);
    token
}
