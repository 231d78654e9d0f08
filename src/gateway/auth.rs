use subtle::ConstantTimeEq;

/// Check the token presented on the `/quiz` upgrade request.
/// Returns true if no token is configured (loopback) or if the tokens match.
pub fn verify_token(presented: Option<&str>, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    match presented {
        Some(t) => constant_time_eq(t.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_expected_token_allows_everyone() {
        assert!(verify_token(None, None));
        assert!(verify_token(Some("anything"), None));
    }

    #[test]
    fn matching_token_is_accepted() {
        assert!(verify_token(Some("s3cret"), Some("s3cret")));
    }

    #[test]
    fn missing_or_wrong_token_is_rejected() {
        assert!(!verify_token(None, Some("s3cret")));
        assert!(!verify_token(Some("s3cre"), Some("s3cret")));
        assert!(!verify_token(Some("s3creT"), Some("s3cret")));
    }
}
