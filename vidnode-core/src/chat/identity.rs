use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "Amber", "Brave", "Calm", "Daring", "Eager", "Fuzzy", "Gentle", "Happy", "Icy", "Jolly",
    "Keen", "Lucky", "Mellow", "Nimble", "Odd", "Proud", "Quiet", "Rapid", "Sunny", "Tidy",
];

const NOUNS: &[&str] = &[
    "Badger", "Comet", "Dolphin", "Falcon", "Gecko", "Heron", "Koala", "Lynx", "Maple", "Otter",
    "Panda", "Quokka", "Raven", "Salmon", "Tiger", "Walrus", "Yak", "Zebra", "Moose", "Finch",
];

/// Ephemeral display identity handed out on `chat` join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub username: String,
    /// `#rrggbb`
    pub color_code: String,
}

impl ChatIdentity {
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
        let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
        let suffix: u16 = rng.gen_range(0..10_000);
        let color: u32 = rng.gen_range(0..0x0100_0000);

        Self {
            username: format!("{adjective}{noun}{suffix:04}"),
            color_code: format!("#{color:06x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_identity_shape() {
        let identity = ChatIdentity::random();
        assert!(identity.username.len() >= 8);
        assert!(identity.username.chars().all(char::is_alphanumeric));
        assert_eq!(identity.color_code.len(), 7);
        assert!(identity.color_code.starts_with('#'));
        assert!(identity.color_code[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
