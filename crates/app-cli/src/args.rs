use std::time::Duration;

use mailscope_domain::{Credentials, ProviderKind};
use mailscope_error::MailError;
use mailscope_inbox::format::Format;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    OAuth,
    Password,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub provider: ProviderKind,
    pub auth: AuthMode,
    pub limit: usize,
    pub timeout: Option<Duration>,
    pub format: Format,
}

pub fn parse_fetch(args: &[String]) -> Result<FetchOptions, String> {
    let mut opts = FetchOptions {
        provider: ProviderKind::Gmail,
        auth: AuthMode::Auto,
        limit: DEFAULT_LIMIT,
        timeout: None,
        format: Format::Compact,
    };

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--provider" | "-p" => {
                opts.provider = value(&mut it, arg)?.parse()?;
            }
            "--oauth" => opts.auth = AuthMode::OAuth,
            "--password" => opts.auth = AuthMode::Password,
            "--limit" | "-n" => {
                let n: usize = value(&mut it, arg)?
                    .parse()
                    .map_err(|e| format!("invalid --limit: {e}"))?;
                opts.limit = clamp(n, 1, MAX_LIMIT, DEFAULT_LIMIT);
            }
            "--timeout" => {
                let secs: u64 = value(&mut it, arg)?
                    .parse()
                    .map_err(|e| format!("invalid --timeout: {e}"))?;
                opts.timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            "--format" | "-f" => opts.format = Format::parse(Some(value(&mut it, arg)?)),
            other => return Err(format!("unknown option: {other}")),
        }
    }
    Ok(opts)
}

/// Splits `decode` arguments into files and an optional `--format`.
pub fn parse_decode(args: &[String]) -> Result<(Vec<String>, Format), String> {
    let mut files = Vec::new();
    let mut format = Format::Compact;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--format" | "-f" => format = Format::parse(Some(value(&mut it, arg)?)),
            other if other.starts_with('-') => return Err(format!("unknown option: {other}")),
            file => files.push(file.to_string()),
        }
    }
    if files.is_empty() {
        return Err("decode needs at least one .eml file".to_string());
    }
    Ok((files, format))
}

fn value<'a>(it: &mut std::slice::Iter<'a, String>, flag: &str) -> Result<&'a str, String> {
    it.next()
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} needs a value"))
}

fn clamp(val: usize, min: usize, max: usize, default: usize) -> usize {
    if val == 0 {
        default
    } else {
        val.max(min).min(max)
    }
}

fn env_prefix(provider: &ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Gmail => "GMAIL",
        ProviderKind::Outlook => "OUTLOOK",
        ProviderKind::Generic(_) => "IMAP",
    }
}

/// Resolves `<PREFIX>_EMAIL` plus `<PREFIX>_ACCESS_TOKEN` or
/// `<PREFIX>_PASSWORD`. In auto mode a password wins when one is set,
/// except for Gmail.
pub fn load_credentials(
    provider: &ProviderKind,
    mode: AuthMode,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, MailError> {
    let prefix = env_prefix(provider);
    let var = |suffix: &str| -> Result<String, MailError> {
        let key = format!("{prefix}_{suffix}");
        lookup(&key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| MailError::config(format!("{key} env var not set")))
    };

    let email = var("EMAIL")?;
    let use_password = match mode {
        AuthMode::OAuth => false,
        AuthMode::Password => true,
        AuthMode::Auto => {
            *provider != ProviderKind::Gmail
                && lookup(&format!("{prefix}_PASSWORD")).is_some_and(|v| !v.trim().is_empty())
        }
    };

    if use_password {
        Ok(Credentials::password(email, var("PASSWORD")?))
    } else {
        Ok(Credentials::bearer(email, var("ACCESS_TOKEN")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn fetch_defaults() {
        let opts = parse_fetch(&[]).unwrap();
        assert_eq!(opts.provider, ProviderKind::Gmail);
        assert_eq!(opts.auth, AuthMode::Auto);
        assert_eq!(opts.limit, 10);
        assert_eq!(opts.timeout, None);
        assert_eq!(opts.format, Format::Compact);
    }

    #[test]
    fn fetch_flags_and_limit_bounds() {
        let opts = parse_fetch(&args(
            "--provider imap:mail.example.com --password -n 500 --timeout 30 -f full",
        ))
        .unwrap();
        assert_eq!(
            opts.provider,
            ProviderKind::Generic("mail.example.com".into())
        );
        assert_eq!(opts.auth, AuthMode::Password);
        assert_eq!(opts.limit, 50);
        assert_eq!(opts.timeout, Some(Duration::from_secs(30)));
        assert_eq!(opts.format, Format::Full);

        assert_eq!(parse_fetch(&args("--limit 0")).unwrap().limit, 10);
        assert!(parse_fetch(&args("--limit")).is_err());
        assert!(parse_fetch(&args("--provider yahoo")).is_err());
        assert!(parse_fetch(&args("--bogus")).is_err());
    }

    #[test]
    fn decode_needs_files() {
        let (files, fmt) = parse_decode(&args("a.eml b.eml --format expanded")).unwrap();
        assert_eq!(files, vec!["a.eml", "b.eml"]);
        assert_eq!(fmt, Format::Expanded);
        assert!(parse_decode(&args("--format full")).is_err());
    }

    #[test]
    fn gmail_loads_bearer_token() {
        let lookup = env(&[
            ("GMAIL_EMAIL", "me@gmail.com"),
            ("GMAIL_ACCESS_TOKEN", "ya29"),
            ("GMAIL_PASSWORD", "ignored"),
        ]);
        let creds = load_credentials(&ProviderKind::Gmail, AuthMode::Auto, lookup).unwrap();
        assert_eq!(creds, Credentials::bearer("me@gmail.com", "ya29"));
    }

    #[test]
    fn outlook_prefers_password_when_set() {
        let both = env(&[
            ("OUTLOOK_EMAIL", "me@outlook.com"),
            ("OUTLOOK_PASSWORD", "pw"),
            ("OUTLOOK_ACCESS_TOKEN", "tok"),
        ]);
        let creds = load_credentials(&ProviderKind::Outlook, AuthMode::Auto, &both).unwrap();
        assert_eq!(creds, Credentials::password("me@outlook.com", "pw"));

        let creds = load_credentials(&ProviderKind::Outlook, AuthMode::OAuth, &both).unwrap();
        assert_eq!(creds, Credentials::bearer("me@outlook.com", "tok"));

        let token_only = env(&[
            ("OUTLOOK_EMAIL", "me@outlook.com"),
            ("OUTLOOK_ACCESS_TOKEN", "tok"),
        ]);
        let creds = load_credentials(&ProviderKind::Outlook, AuthMode::Auto, token_only).unwrap();
        assert_eq!(creds, Credentials::bearer("me@outlook.com", "tok"));
    }

    #[test]
    fn missing_variable_is_named_in_config_error() {
        let lookup = env(&[("IMAP_EMAIL", "me@example.com")]);
        let err = load_credentials(
            &ProviderKind::Generic("mail.example.com".into()),
            AuthMode::Password,
            lookup,
        )
        .unwrap_err();
        assert_eq!(err, MailError::config("IMAP_PASSWORD env var not set"));
    }
}
