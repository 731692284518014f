//! Integration tests for host specifier parsing and expansion.

use std::collections::HashSet;

use assert_matches::assert_matches;
use hostspec::{Error, HostSpec};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn parse(input: &str) -> HostSpec {
    HostSpec::parse(input).unwrap_or_else(|err| panic!("must parse '{input}': {err}"))
}

fn expand_one(input: &str) -> Vec<String> {
    parse(input).expand()
}

#[test]
fn address_expands_to_itself() {
    assert_eq!(expand_one("10.0.0.1"), vec!["10.0.0.1"]);
    assert_matches!(parse(" 10.0.0.1 "), HostSpec::Address(_));
}

#[test]
fn cidr_includes_every_address() {
    assert_eq!(
        expand_one("192.168.1.0/30"),
        vec!["192.168.1.0", "192.168.1.1", "192.168.1.2", "192.168.1.3"]
    );
    assert_eq!(expand_one("10.0.0.7/32"), vec!["10.0.0.7"]);
}

#[test]
fn cidr_ignores_host_bits() {
    assert_eq!(expand_one("10.0.0.5/31"), vec!["10.0.0.4", "10.0.0.5"]);
}

#[test]
fn octet_range_is_inclusive() {
    assert_eq!(
        expand_one("10.0.0.[1:3]"),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );
}

#[test]
fn two_ranged_octets_expand_in_order() {
    assert_eq!(
        expand_one("10.0.[0:1].[8:9]"),
        vec!["10.0.0.8", "10.0.0.9", "10.0.1.8", "10.0.1.9"]
    );
    assert_eq!(expand_one("10.0.[0:1].5"), vec!["10.0.0.5", "10.0.1.5"]);
}

#[test]
fn ranges_outside_trailing_octets_are_rejected() {
    assert_matches!(HostSpec::parse("10.[0:1].0.1"), Err(Error::Syntax { .. }));
}

#[test]
fn numeric_pattern_expands() {
    assert_eq!(
        expand_one("db[1:3].example.com"),
        vec!["db1.example.com", "db2.example.com", "db3.example.com"]
    );
}

#[test]
fn padded_pattern_keeps_width() {
    assert_eq!(expand_one("node[08:10]"), vec!["node08", "node09", "node10"]);
}

#[test]
fn alpha_pattern_expands() {
    assert_eq!(
        expand_one("web[a:c].lab"),
        vec!["weba.lab", "webb.lab", "webc.lab"]
    );
}

#[test]
fn hostnames_are_lowercased() {
    assert_eq!(expand_one("DB.Example.COM"), vec!["db.example.com"]);
}

#[test]
fn bad_octet_reports_input() {
    assert_matches!(
        HostSpec::parse("10.0.0.300"),
        Err(Error::Octet { input, octet }) if input == "10.0.0.300" && octet == "300"
    );
}

#[test]
fn bad_prefix_length() {
    assert_matches!(HostSpec::parse("10.0.0.0/33"), Err(Error::Bits { .. }));
}

#[test]
fn reversed_ranges_are_rejected() {
    assert_matches!(HostSpec::parse("10.0.0.[9:1]"), Err(Error::Range { .. }));
    assert_matches!(HostSpec::parse("db[d:a]"), Err(Error::Range { .. }));
    assert_matches!(HostSpec::parse("db[a:4]"), Err(Error::Range { .. }));
}

#[test]
fn oversized_blocks_are_rejected() {
    assert_matches!(
        HostSpec::parse("10.0.0.0/8"),
        Err(Error::TooLarge { count, .. }) if count == 1 << 24
    );
    assert_eq!(parse("10.0.0.0/16").len(), 65_536);
}

#[test]
fn garbage_is_rejected() {
    for input in ["", "not a host", "10.0.0.1/", "db[1:2", "-leading.dash"] {
        assert_matches!(
            HostSpec::parse(input),
            Err(Error::Syntax { .. }),
            "'{input}' must be rejected"
        );
    }
}

#[test]
fn expand_dedups_and_excludes() {
    let hosts = hostspec::parse_all(&["10.0.0.[1:4]", "10.0.0.2", "box.lab", "10.0.0.0/30"])
        .expect("must parse hosts");
    let exclude = hostspec::parse_all(&["10.0.0.3", "BOX.lab"]).expect("must parse excludes");

    let expanded = hostspec::expand(&hosts, &exclude);
    assert_eq!(expanded, vec!["10.0.0.1", "10.0.0.2", "10.0.0.4", "10.0.0.0"]);
}

#[test]
fn serde_uses_text_form() {
    let spec = parse("10.0.[1:2].0");
    let json = serde_json::to_string(&spec).expect("must serialize");
    assert_eq!(json, r#""10.0.[1:2].0""#);

    let back = serde_json::from_str::<HostSpec>(&json).expect("must deserialize");
    assert_eq!(back, spec);

    assert!(serde_json::from_str::<HostSpec>(r#""10.0.0.256""#).is_err());
}

proptest! {
    #[test]
    fn expansion_is_unique_and_sized(a in 0u8..=255, b in 0u8..=255, lo in 0u8..=255, span in 0u8..16) {
        let hi = lo.saturating_add(span);
        let spec = parse(&format!("{a}.{b}.0.[{lo}:{hi}]"));
        let hosts = spec.expand();
        let unique = hosts.iter().collect::<HashSet<_>>();
        prop_assert_eq!(hosts.len() as u64, spec.len());
        prop_assert_eq!(unique.len(), hosts.len());
    }

    #[test]
    fn excluded_hosts_never_appear(last in 0u8..=255, bits in 24u8..=32) {
        let hosts = vec![parse(&format!("172.16.4.{last}/{bits}"))];
        let exclude = vec![parse(&format!("172.16.4.{last}"))];
        let expanded = hostspec::expand(&hosts, &exclude);
        let excluded = format!("172.16.4.{last}");
        prop_assert!(!expanded.contains(&excluded));
    }

    #[test]
    fn display_reparses(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
        let spec = parse(&format!("{a}.{b}.{c}.{d}"));
        prop_assert_eq!(parse(&spec.to_string()), spec);
    }
}
