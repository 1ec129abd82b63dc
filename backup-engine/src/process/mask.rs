//! Credential masking for logged command lines and tool output.

use regex::Regex;
use std::sync::LazyLock;

/// Replacement for every masked credential.
pub const MASK: &str = "******";

static PASSWORD_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(--?(?:password|pass|pwd|auth)(?:=|\s+))('[^']*'|"[^"]*"|\S+)"#)
        .expect("password flag pattern")
});

static URI_CREDENTIALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z0-9+.-]*://[^:/@\s]+:)([^@\s]+)(@)").expect("uri pattern")
});

static PASSWORD_ENV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:PGPASSWORD|MYSQL_PWD|SQLCMDPASSWORD|REDISCLI_AUTH)=)(\S+)")
        .expect("password env pattern")
});

/// Replace every occurrence of the known secrets, longest first so a
/// secret containing another is masked whole.
pub fn mask_secrets(text: &str, secrets: &[String]) -> String {
    let mut sorted: Vec<&String> = secrets.iter().filter(|s| !s.is_empty()).collect();
    sorted.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mut masked = text.to_string();
    for secret in sorted {
        masked = masked.replace(secret.as_str(), MASK);
    }
    masked
}

/// Mask known secrets plus anything shaped like a password flag,
/// URI userinfo or a credential environment assignment.
pub fn mask_command(text: &str, secrets: &[String]) -> String {
    let masked = mask_secrets(text, secrets);
    let masked = PASSWORD_FLAG.replace_all(&masked, format!("${{1}}{}", MASK));
    let masked = URI_CREDENTIALS.replace_all(&masked, format!("${{1}}{}${{3}}", MASK));
    PASSWORD_ENV
        .replace_all(&masked, format!("${{1}}{}", MASK))
        .into_owned()
}
