use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefixes an ICE server url with its scheme when the endpoint left it out.
/// Servers that carry credentials are assumed to be TURN relays.
pub fn normalize_ice_url(url: &str, authenticated: bool) -> String {
    const SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];
    if SCHEMES.iter().any(|s| url.starts_with(s)) {
        url.to_string()
    } else {
        let scheme = if authenticated { "turn:" } else { "stun:" };
        format!("{}{}", scheme, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_hex_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn scheme_added_only_when_missing() {
        assert_eq!(normalize_ice_url("stun:x:3478", false), "stun:x:3478");
        assert_eq!(normalize_ice_url("turns:x:443", true), "turns:x:443");
        assert_eq!(normalize_ice_url("x:3478", false), "stun:x:3478");
        assert_eq!(normalize_ice_url("x:80", true), "turn:x:80");
    }
}
