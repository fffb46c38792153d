/// Replace `${ENV_VAR}` placeholders in a raw config document.
///
/// Unresolvable variables are left as-is; `$${` produces a literal `${`.
#[must_use]
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup function, so tests
/// never touch the process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('$') {
        result.push_str(&rest[..start]);
        let tail = &rest[start..];

        if let Some(escaped) = tail.strip_prefix("$${") {
            result.push_str("${");
            rest = escaped;
            continue;
        }

        let Some(body) = tail.strip_prefix("${") else {
            result.push('$');
            rest = &tail[1..];
            continue;
        };

        match body.find('}') {
            Some(end) if end > 0 && is_var_name(&body[..end]) => {
                let name = &body[..end];
                match lookup(name) {
                    Some(val) => result.push_str(&val),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &body[end + 1..];
            },
            // Not a placeholder; emit the `${` literally and keep scanning.
            _ => {
                result.push_str("${");
                rest = body;
            },
        }
    }

    result.push_str(rest);
    result
}

fn is_var_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "PARLEY_TEST_KEY" => Some("sk-123".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("api_key = \"${PARLEY_TEST_KEY}\"", lookup),
            "api_key = \"sk-123\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${PARLEY_NONEXISTENT_XYZ}", lookup),
            "${PARLEY_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn escaped_placeholder_is_literal() {
        assert_eq!(
            substitute_env_with("prompt = \"$${PARLEY_TEST_KEY}\"", lookup),
            "prompt = \"${PARLEY_TEST_KEY}\""
        );
    }

    #[test]
    fn malformed_and_plain_dollars_pass_through() {
        assert_eq!(substitute_env_with("cost: $5 ${unterminated", lookup), "cost: $5 ${unterminated");
        assert_eq!(substitute_env_with("${not a var}", lookup), "${not a var}");
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
