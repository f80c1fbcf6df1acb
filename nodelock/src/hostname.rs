//! Node name conventions.
//!
//! Lock-service names are owner-qualified FQDNs such as
//! `ubuntu@box1.front.sepia.ceph.com`. Users type `box1`.

use std::sync::OnceLock;

use regex::Regex;

static SHORT_HOST: OnceLock<Option<Regex>> = OnceLock::new();

fn short_host_regex() -> Option<&'static Regex> {
    SHORT_HOST
        .get_or_init(|| Regex::new(r"^[\w-]+@([\w-]+?)\..*$").ok())
        .as_ref()
}

/// Expand a short or partial name to the canonical form.
///
/// An existing `user@` prefix or domain part is kept. With `user = None` no
/// prefix is added.
pub fn canonicalize_hostname(hostname: &str, user: Option<&str>, lab_domain: &str) -> String {
    let (existing_user, host) = match hostname.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, hostname),
    };

    let host = if host.contains('.') || lab_domain.is_empty() {
        host.to_string()
    } else {
        format!("{}.{}", host, lab_domain)
    };

    match existing_user.or(user) {
        Some(u) => format!("{}@{}", u, host),
        None => host,
    }
}

/// Reduce any form of a node name to its bare short name.
pub fn decanonicalize_hostname(name: &str) -> &str {
    let host = strip_user(name);
    host.split('.').next().unwrap_or(host)
}

/// `user@host` becomes `host`; anything else is returned as is.
pub fn strip_user(name: &str) -> &str {
    name.rsplit_once('@').map(|(_, h)| h).unwrap_or(name)
}

/// Short host used by brief rendering.
///
/// Falls back to the full name when it is not of the form `user@short.domain`.
pub fn short_host(name: &str) -> &str {
    short_host_regex()
        .and_then(|re| re.captures(name))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(name)
}
