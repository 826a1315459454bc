//! Membership tiers and the content access gate.
//!
//! Tiers are not a hierarchy. "Sudo Access" and "Root Access" are two independent
//! capabilities and "Both" holds each of them, so a Root member cannot read Sudo
//! content and vice versa.

use std::fmt;

pub const SUDO_ACCESS: &str = "Sudo Access";
pub const ROOT_ACCESS: &str = "Root Access";
pub const BOTH: &str = "Both";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Sudo,
    Root,
    Both,
    /// No purchased tier, or a tier name this server does not recognise.
    None,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Sudo, Tier::Root, Tier::Both, Tier::None];

    /// Parse a stored tier name. Unknown names map to `Tier::None`.
    pub fn parse(name: &str) -> Tier {
        match name.trim() {
            SUDO_ACCESS => Tier::Sudo,
            ROOT_ACCESS => Tier::Root,
            BOTH => Tier::Both,
            _ => Tier::None,
        }
    }

    /// Tier required by a piece of content. A missing requirement means "Both".
    pub fn required(access_tier: Option<&str>) -> Tier {
        match access_tier.map(str::trim) {
            None | Some("") => Tier::Both,
            Some(name) => Tier::parse(name),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Sudo => SUDO_ACCESS,
            Tier::Root => ROOT_ACCESS,
            Tier::Both => BOTH,
            Tier::None => "None",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a member holding `member` may read content requiring `required`.
pub fn check_access(member: Tier, required: Tier) -> bool {
    match required {
        Tier::Both => matches!(member, Tier::Sudo | Tier::Root | Tier::Both),
        Tier::Sudo => matches!(member, Tier::Sudo | Tier::Both),
        Tier::Root => matches!(member, Tier::Root | Tier::Both),
        Tier::None => false,
    }
}

/// What the gate knows about whoever is asking for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    ExpiredSession,
    /// Valid session, but no active member row behind it.
    NoMembership,
    Member(Tier),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotLoggedIn,
    SessionExpired,
    NoActiveMembership,
    InsufficientTier,
}

impl Denial {
    /// Machine-readable reason returned to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::NotLoggedIn => "not_logged_in",
            Denial::SessionExpired => "session_expired",
            Denial::NoActiveMembership => "no_active_membership",
            Denial::InsufficientTier => "insufficient_tier",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Denial::NotLoggedIn => "Please log in to access this writeup",
            Denial::SessionExpired => "Your session has expired. Please log in again",
            Denial::NoActiveMembership => "An active membership is required",
            Denial::InsufficientTier => "Your membership tier does not include this writeup",
        }
    }

    /// Missing identity is a 401, everything else a 403.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Denial::NotLoggedIn | Denial::SessionExpired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteupAccess {
    /// Inactive content, open to everyone.
    Free,
    Granted(Tier),
    Denied(Denial),
}

/// Decide access to a writeup. Inactive content is granted before any
/// identity check, so anonymous callers can read it.
pub fn writeup_access(content_active: bool, required: Tier, caller: Caller) -> WriteupAccess {
    if !content_active {
        return WriteupAccess::Free;
    }
    match caller {
        Caller::Anonymous => WriteupAccess::Denied(Denial::NotLoggedIn),
        Caller::ExpiredSession => WriteupAccess::Denied(Denial::SessionExpired),
        Caller::NoMembership => WriteupAccess::Denied(Denial::NoActiveMembership),
        Caller::Member(tier) if check_access(tier, required) => WriteupAccess::Granted(tier),
        Caller::Member(_) => WriteupAccess::Denied(Denial::InsufficientTier),
    }
}
