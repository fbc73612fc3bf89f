//! Login string handling.

/// Parsed SSH login name: the user to authenticate as on the destination plus an optional device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginTarget {
    pub username: String,
    pub device: Option<String>,
}

/// Split `user` or `user:device` into a [`LoginTarget`].
///
/// An empty device part (`user:`) is treated as no device.
pub fn parse_login_target(input: &str) -> LoginTarget {
    if let Some((user, device)) = input.split_once(':') {
        LoginTarget {
            username: user.to_string(),
            device: if device.is_empty() { None } else { Some(device.to_string()) },
        }
    } else {
        LoginTarget {
            username: input.to_string(),
            device: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_user() {
        assert_eq!(
            parse_login_target("alice"),
            LoginTarget {
                username: "alice".into(),
                device: None
            }
        );
    }

    #[test]
    fn user_with_device() {
        let login = parse_login_target("alice:build-box");
        assert_eq!(login.username, "alice");
        assert_eq!(login.device.as_deref(), Some("build-box"));
    }

    #[test]
    fn empty_device_is_none() {
        assert_eq!(parse_login_target("alice:").device, None);
    }
}
