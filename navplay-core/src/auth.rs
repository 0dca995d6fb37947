//! Subsonic request authentication.
//!
//! Every upstream call carries the same common parameters: the username,
//! either a token/salt pair or an encoded password, the API version, the
//! client name and the response format. [`auth_params`] is the only place
//! that knows how they are built.

use crate::config::{AuthMode, Secret, UpstreamConfig};

/// Compute the MD5 hex digest of a string.
pub fn md5_hex(input: &str) -> String {
    use md5::Digest;
    let hash = md5::Md5::digest(input.as_bytes());
    hex::encode(hash)
}

/// Common query parameters for one upstream request.
///
/// Token mode draws a fresh salt on every call, so two calls never share
/// a token.
pub fn auth_params(config: &UpstreamConfig) -> Vec<(&'static str, String)> {
    let mut params = vec![("u", config.credentials.username.clone())];

    match (&config.credentials.secret, config.auth_mode) {
        (Secret::Token { token, salt }, _) => {
            params.push(("t", token.clone()));
            params.push(("s", salt.clone()));
        }
        (Secret::Password(password), AuthMode::Token) => {
            let salt = generate_salt();
            params.push(("t", md5_hex(&format!("{}{}", password, salt))));
            params.push(("s", salt));
        }
        (Secret::Password(password), AuthMode::Password) => {
            params.push(("p", format!("enc:{}", hex::encode(password.as_bytes()))));
        }
    }

    params.push(("v", config.api_version.clone()));
    params.push(("c", config.client_name.clone()));
    params.push(("f", "json".to_string()));
    params
}

/// Generate a random alphanumeric salt string.
fn generate_salt() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..16)
        .map(|_| {
            let idx = rng.random_range(0..36u8);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, RawUpstreamConfig};
    use std::collections::HashMap;

    fn config(mode: AuthMode) -> UpstreamConfig {
        let mut config = RawUpstreamConfig {
            url: Some("http://localhost:4533".into()),
            user: Some("admin".into()),
            password: Some("secret".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        config.auth_mode = mode;
        config
    }

    fn as_map(params: Vec<(&'static str, String)>) -> HashMap<&'static str, String> {
        params.into_iter().collect()
    }

    #[test]
    fn md5_hex_produces_correct_hash() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        // Example from the Subsonic API documentation.
        assert_eq!(md5_hex("sesamec19b2d"), "26719a1196d2a940705a59634eb18eab");
    }

    #[test]
    fn token_mode_signs_password_with_salt() {
        let params = as_map(auth_params(&config(AuthMode::Token)));

        assert_eq!(params["u"], "admin");
        assert_eq!(params["v"], "1.16.1");
        assert_eq!(params["c"], "navplay");
        assert_eq!(params["f"], "json");
        assert!(!params.contains_key("p"));

        let expected = md5_hex(&format!("secret{}", params["s"]));
        assert_eq!(params["t"], expected);
    }

    #[test]
    fn token_mode_uses_fresh_salt_per_call() {
        let config = config(AuthMode::Token);
        let first = as_map(auth_params(&config));
        let second = as_map(auth_params(&config));
        assert_ne!(first["s"], second["s"]);
        assert_ne!(first["t"], second["t"]);
    }

    #[test]
    fn password_mode_sends_hex_encoded_password() {
        let params = as_map(auth_params(&config(AuthMode::Password)));

        assert_eq!(params["p"], "enc:736563726574");
        assert!(!params.contains_key("t"));
        assert!(!params.contains_key("s"));
    }

    #[test]
    fn pre_hashed_token_is_sent_verbatim() {
        let mut config = config(AuthMode::Password);
        config.credentials = Credentials {
            username: "admin".into(),
            secret: Secret::Token {
                token: "26719a1196d2a940705a59634eb18eab".into(),
                salt: "c19b2d".into(),
            },
        };

        let params = as_map(auth_params(&config));
        assert_eq!(params["t"], "26719a1196d2a940705a59634eb18eab");
        assert_eq!(params["s"], "c19b2d");
        assert!(!params.contains_key("p"));
    }

    #[test]
    fn generate_salt_is_16_chars_alphanumeric() {
        for _ in 0..10 {
            let salt = generate_salt();
            assert_eq!(salt.len(), 16);
            assert!(salt
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }
}
