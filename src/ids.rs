use rand::distr::Alphanumeric;
use rand::Rng;

pub const PUBLIC_ID_LEN: usize = 6;

/// Short alphanumeric id used in download and delete URLs. Collisions are not checked.
pub fn public_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PUBLIC_ID_LEN)
        .map(char::from)
        .collect()
}

/// Independent v4 UUID, never derived from the public id.
pub fn delete_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn public_id_is_short_alphanumeric() {
        let id = public_id();
        assert_eq!(id.len(), PUBLIC_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn delete_secret_is_a_uuid() {
        let secret = delete_secret();
        assert!(uuid::Uuid::parse_str(&secret).is_ok());
        assert_ne!(secret, delete_secret());
    }

    #[test]
    fn public_ids_do_not_repeat_in_practice() {
        let ids: HashSet<String> = (0..1000).map(|_| public_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
