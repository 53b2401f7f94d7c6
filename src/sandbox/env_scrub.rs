//! Secret-shaped environment variable detection
//!
//! The fallback backend runs on the host, so anything the server process
//! inherited (database URLs, cloud keys, API tokens) would otherwise leak
//! into agent code. Names are matched on suffix and on a short list of
//! vendor prefixes.

use regex::Regex;
use std::sync::OnceLock;

/// Vendor prefixes whose variables are always treated as sensitive
const SENSITIVE_PREFIXES: &[&str] = &[
    "AWS_",
    "AZURE_",
    "GCP_",
    "GOOGLE_",
    "GITHUB_",
    "GH_",
    "GITLAB_",
    "STRIPE_",
    "OPENAI_",
    "ANTHROPIC_",
    "OPENROUTER_",
    "HUGGINGFACE_",
    "DATABASE_",
    "POSTGRES_",
    "REDIS_",
    "MONGODB_",
    "SUPABASE_",
    "VERCEL_",
    "CLOUDFLARE_",
    "SLACK_",
    "TWILIO_",
    "SENDGRID_",
    "CODECELL_",
];

fn secret_suffix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)((PASSWORD|PASSWD|SECRETS?|TOKENS?|API_?KEY|ACCESS_?KEY|PRIVATE_?KEY|CREDENTIALS?|CONNECTION_STRING)|(^|_)(KEYS?|PASS|AUTH|DSN))$",
        )
        .expect("secret suffix pattern is valid")
    })
}

/// Whether an environment variable name looks like it carries a secret
pub fn is_secret_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_PREFIXES.iter().any(|p| upper.starts_with(p)) || secret_suffix().is_match(&upper)
}

/// Split inherited variables into the ones that may pass through and the
/// names that were removed.
pub fn scrub_environment<I>(vars: I) -> (Vec<(String, String)>, Vec<String>)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut kept = Vec::new();
    let mut removed = Vec::new();
    for (name, value) in vars {
        if is_secret_name(&name) {
            removed.push(name);
        } else {
            kept.push((name, value));
        }
    }
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_shaped_names() {
        for name in [
            "STRIPE_API_KEY",
            "OPENAI_API_KEY",
            "GITHUB_TOKEN",
            "NPM_TOKEN",
            "PGPASSWORD",
            "DB_PASSWORD",
            "JWT_SECRET",
            "AWS_REGION",
            "DATABASE_URL",
            "SENTRY_DSN",
            "CREDENTIALS_ENCRYPTION_KEY",
            "my_service_apikey",
            "GOOGLE_APPLICATION_CREDENTIALS",
        ] {
            assert!(is_secret_name(name), "{name} should be scrubbed");
        }
    }

    #[test]
    fn test_ordinary_names_survive() {
        for name in [
            "PATH",
            "HOME",
            "LANG",
            "PWD",
            "TERM",
            "TZ",
            "SSH_AUTH_SOCK",
            "GIT_ASKPASS",
            "KEYBOARD_LAYOUT",
            "MONKEY",
        ] {
            assert!(!is_secret_name(name), "{name} should pass through");
        }
    }

    #[test]
    fn test_scrub_environment() {
        let vars = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("STRIPE_API_KEY".to_string(), "x".to_string()),
        ];
        let (kept, removed) = scrub_environment(vars);
        assert_eq!(kept, vec![("PATH".to_string(), "/usr/bin".to_string())]);
        assert_eq!(removed, vec!["STRIPE_API_KEY".to_string()]);
    }
}
