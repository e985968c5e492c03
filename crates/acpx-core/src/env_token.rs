//! `toEnvToken`: converts an auth method id into an environment-variable-safe
//! token (uppercased, non-alphanumeric runs collapsed to a single `_`).

/// Uppercase `method_id` and replace every run of non-alphanumeric
/// characters with a single underscore, e.g. `"anthropic-api-key"` becomes
/// `"ANTHROPIC_API_KEY"`.
pub fn to_env_token(method_id: &str) -> String {
    let mut out = String::with_capacity(method_id.len());
    let mut last_was_sep = false;

    for c in method_id.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
    }

    while out.ends_with('_') {
        out.pop();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercases_and_collapses_separators() {
        assert_eq!(to_env_token("anthropic-api-key"), "ANTHROPIC_API_KEY");
        assert_eq!(to_env_token("openai.key"), "OPENAI_KEY");
        assert_eq!(to_env_token("A--B__C"), "A_B_C");
    }

    #[test]
    fn trims_leading_and_trailing_separators() {
        assert_eq!(to_env_token("-leading"), "LEADING");
        assert_eq!(to_env_token("trailing-"), "TRAILING");
    }

    #[test]
    fn leaves_already_clean_tokens_unchanged() {
        assert_eq!(to_env_token("API_KEY"), "API_KEY");
    }
}
