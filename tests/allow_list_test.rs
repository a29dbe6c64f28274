// A disallowed broadcast source is dropped before it ever reaches intake.
// The socket plumbing in `discovery::broadcast::run` isn't testable without
// a real UDP socket, but the decision point it depends on —
// `AllowListMatcher::allowed` — is, and is exactly what gates whether the
// packet is forwarded at all.

use cups_browsed_rs::allow::AllowListMatcher;
use cups_browsed_rs::config::AllowRuleConfig;

#[test]
fn disallowed_source_is_rejected_by_the_matcher() {
    let matcher = AllowListMatcher::from_config(&[AllowRuleConfig::Network("10.0.0.0".to_string(), "8".to_string())]);

    let disallowed: std::net::IpAddr = "192.168.1.5".parse().unwrap();
    let allowed: std::net::IpAddr = "10.1.2.3".parse().unwrap();

    assert!(!matcher.allowed(disallowed), "a source outside every configured rule must be dropped");
    assert!(matcher.allowed(allowed));
}
