//! Gateway intent bit set.
//!
//! Intents select which event groups the gateway delivers. The value is sent
//! as a plain integer inside the Identify payload.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Bit set of gateway intents.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intents(u64);

impl Intents {
    pub const GUILDS: Self = Self(1 << 0);
    pub const GUILD_MEMBERS: Self = Self(1 << 1);
    pub const GUILD_MODERATION: Self = Self(1 << 2);
    pub const GUILD_EMOJIS_AND_STICKERS: Self = Self(1 << 3);
    pub const GUILD_INTEGRATIONS: Self = Self(1 << 4);
    pub const GUILD_WEBHOOKS: Self = Self(1 << 5);
    pub const GUILD_INVITES: Self = Self(1 << 6);
    pub const GUILD_VOICE_STATES: Self = Self(1 << 7);
    pub const GUILD_PRESENCES: Self = Self(1 << 8);
    pub const GUILD_MESSAGES: Self = Self(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Self = Self(1 << 10);
    pub const GUILD_MESSAGE_TYPING: Self = Self(1 << 11);
    pub const DIRECT_MESSAGES: Self = Self(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Self = Self(1 << 13);
    pub const DIRECT_MESSAGE_TYPING: Self = Self(1 << 14);
    pub const MESSAGE_CONTENT: Self = Self(1 << 15);

    const NAMED: [(&'static str, Self); 16] = [
        ("GUILDS", Self::GUILDS),
        ("GUILD_MEMBERS", Self::GUILD_MEMBERS),
        ("GUILD_MODERATION", Self::GUILD_MODERATION),
        ("GUILD_EMOJIS_AND_STICKERS", Self::GUILD_EMOJIS_AND_STICKERS),
        ("GUILD_INTEGRATIONS", Self::GUILD_INTEGRATIONS),
        ("GUILD_WEBHOOKS", Self::GUILD_WEBHOOKS),
        ("GUILD_INVITES", Self::GUILD_INVITES),
        ("GUILD_VOICE_STATES", Self::GUILD_VOICE_STATES),
        ("GUILD_PRESENCES", Self::GUILD_PRESENCES),
        ("GUILD_MESSAGES", Self::GUILD_MESSAGES),
        ("GUILD_MESSAGE_REACTIONS", Self::GUILD_MESSAGE_REACTIONS),
        ("GUILD_MESSAGE_TYPING", Self::GUILD_MESSAGE_TYPING),
        ("DIRECT_MESSAGES", Self::DIRECT_MESSAGES),
        ("DIRECT_MESSAGE_REACTIONS", Self::DIRECT_MESSAGE_REACTIONS),
        ("DIRECT_MESSAGE_TYPING", Self::DIRECT_MESSAGE_TYPING),
        ("MESSAGE_CONTENT", Self::MESSAGE_CONTENT),
    ];

    /// No intents enabled.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Standard bot intents: excludes presences, typing and message content.
    pub const fn default_set() -> Self {
        Self(
            Self::GUILDS.0
                | Self::GUILD_MEMBERS.0
                | Self::GUILD_MODERATION.0
                | Self::GUILD_EMOJIS_AND_STICKERS.0
                | Self::GUILD_INTEGRATIONS.0
                | Self::GUILD_WEBHOOKS.0
                | Self::GUILD_INVITES.0
                | Self::GUILD_VOICE_STATES.0
                | Self::GUILD_MESSAGES.0
                | Self::GUILD_MESSAGE_REACTIONS.0
                | Self::DIRECT_MESSAGES.0
                | Self::DIRECT_MESSAGE_REACTIONS.0,
        )
    }

    /// Every known intent, privileged ones included.
    pub const fn all() -> Self {
        Self((1 << 16) - 1)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Intents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Intents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "Intents({:#x}: {})", self.0, names.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::Intents;

    #[test]
    fn default_set_excludes_presences_typing_and_content() {
        let intents = Intents::default_set();
        assert!(intents.contains(Intents::GUILDS | Intents::GUILD_MESSAGES));
        assert!(intents.contains(Intents::GUILD_MEMBERS));
        assert!(!intents.contains(Intents::DIRECT_MESSAGE_TYPING));
        assert!(!intents.contains(Intents::GUILD_PRESENCES));
        assert!(!intents.contains(Intents::MESSAGE_CONTENT));
        assert!(!intents.contains(Intents::GUILD_MESSAGE_TYPING));
    }

    #[test]
    fn all_covers_every_named_flag() {
        let all = Intents::all();
        for (_, flag) in Intents::NAMED {
            assert!(all.contains(flag));
        }
        assert_eq!(all.bits(), 0xFFFF);
    }

    #[test]
    fn serializes_as_plain_integer() {
        let intents = Intents::GUILDS | Intents::MESSAGE_CONTENT;
        assert_eq!(serde_json::to_string(&intents).expect("serialize"), "32769");
    }

    #[test]
    fn none_is_empty() {
        assert!(Intents::none().is_empty());
        assert_eq!(Intents::default(), Intents::none());
    }
}
