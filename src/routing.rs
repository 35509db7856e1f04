//! Host-based upstream routing.
//!
//! The proxy resolves upstreams from the inbound `Host` header: for a
//! configured base domain `D`, a host of the form `<name>.D` routes to the
//! upstream called `<name>`. Only single-label prefixes count; multi-label
//! prefixes and the bare base domain do not resolve.

/// Strip a trailing `:port` from a host, leaving IPv6 literals intact.
pub fn strip_port(host: &str) -> &str {
    let bytes = host.as_bytes();
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b':' => return &host[..i],
            b']' => return host, // IPv6 literal, no port suffix
            _ => {}
        }
    }
    host
}

/// Whether `host` (port ignored) exactly matches a configured UI hostname.
/// UI traffic is served by the console surface and never forwarded.
pub fn is_ui_host(host: &str, ui_hosts: &[String]) -> bool {
    let host = strip_port(host);
    ui_hosts.iter().any(|h| h == host)
}

/// Extract the upstream name from `host` given the configured proxy base
/// domains. Returns `None` when no base domain matches or the prefix is not a
/// single DNS label.
///
/// `extract_subdomain("openai.localhost:8080", &["localhost"])` is `"openai"`.
pub fn extract_subdomain(host: &str, proxy_domains: &[String]) -> Option<String> {
    let host = strip_port(host).to_ascii_lowercase();

    let default_domains = ["localhost".to_string()];
    let domains: &[String] = if proxy_domains.is_empty() {
        &default_domains
    } else {
        proxy_domains
    };

    for domain in domains {
        let domain = domain.trim().to_ascii_lowercase();
        let domain = domain.trim_start_matches('.'); // tolerate ".localhost"
        if domain.is_empty() {
            continue;
        }

        let suffix = format!(".{}", domain);
        if host.len() <= suffix.len() || !host.ends_with(&suffix) {
            continue;
        }
        let sub = &host[..host.len() - suffix.len()];
        // Require a single-label subdomain to avoid ambiguity (a.b.example.com).
        if sub.is_empty() || sub.contains('.') {
            continue;
        }
        return Some(sub.to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_subdomain() {
        struct Case {
            host: &'static str,
            proxy_domains: Vec<String>,
            want: Option<&'static str>,
        }

        let cases = [
            Case {
                host: "openai.localhost:8080",
                proxy_domains: domains(&["localhost"]),
                want: Some("openai"),
            },
            Case {
                host: "OpenAI.LocalHost",
                proxy_domains: domains(&["LOCALHOST"]),
                want: Some("openai"),
            },
            Case {
                host: "gemini.prismcat.example.com",
                proxy_domains: domains(&["prismcat.example.com"]),
                want: Some("gemini"),
            },
            Case {
                host: "a.b.example.com",
                proxy_domains: domains(&["example.com"]),
                want: None,
            },
            Case {
                host: "example.com",
                proxy_domains: domains(&["example.com"]),
                want: None,
            },
            Case {
                host: "openai.localhost",
                proxy_domains: Vec::new(),
                want: Some("openai"),
            },
            Case {
                host: "openai.localhost",
                proxy_domains: domains(&[".localhost"]),
                want: Some("openai"),
            },
        ];

        for case in cases {
            let got = extract_subdomain(case.host, &case.proxy_domains);
            assert_eq!(
                got.as_deref(),
                case.want,
                "extract_subdomain({:?}, {:?})",
                case.host,
                case.proxy_domains
            );
        }
    }

    #[test]
    fn test_is_ui_host() {
        let ui_hosts = domains(&["localhost", "127.0.0.1"]);

        assert!(is_ui_host("localhost", &ui_hosts));
        assert!(is_ui_host("localhost:8080", &ui_hosts));
        assert!(is_ui_host("127.0.0.1:3000", &ui_hosts));
        assert!(!is_ui_host("openai.localhost:8080", &ui_hosts));
        assert!(!is_ui_host("example.com", &ui_hosts));
        assert!(!is_ui_host("localhost", &[]));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("openai.localhost:8080"), "openai.localhost");
        assert_eq!(strip_port("openai.localhost"), "openai.localhost");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("127.0.0.1:80"), "127.0.0.1");
    }
}
