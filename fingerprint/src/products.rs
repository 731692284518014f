//! Product detection: a fixed rule table evaluated over a host's raw facts.

use std::collections::BTreeSet;

use facts::{Presence, Product, ProductName, RawFacts};
use serde_json::Value;

use crate::value::truthy;

/// How a rule tests its fact.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Test {
    /// The fact is set: a true boolean, a non-zero number, or a non-empty string or collection.
    Set,

    /// The fact, rendered as text, contains the needle (case-insensitive).
    Contains(&'static str),
}

impl Test {
    fn matches(self, value: &Value) -> bool {
        match self {
            Test::Set => truthy(value),
            Test::Contains(needle) => {
                let haystack = match value {
                    Value::String(s) => s.to_lowercase(),
                    other => other.to_string().to_lowercase(),
                };
                haystack.contains(&needle.to_lowercase())
            }
        }
    }
}

/// One piece of evidence for a product.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Rule {
    /// The product the evidence points to.
    pub product: ProductName,

    /// The raw fact examined.
    pub fact: &'static str,

    /// What the fact must satisfy.
    pub test: Test,

    /// The presence a match establishes.
    pub presence: Presence,
}

const fn rule(product: ProductName, fact: &'static str, test: Test, presence: Presence) -> Rule {
    Rule {
        product,
        fact,
        test,
        presence,
    }
}

use Presence::{Potential, Present};
use ProductName::{JbossBrms, JbossEap, JbossFuse, JbossWebServer};

/// Every detection rule.
///
/// A product is [`Presence::Present`] if any `Present` rule matches,
/// [`Presence::Potential`] if only `Potential` rules match,
/// [`Presence::Absent`] if none match but at least one of its facts was collected,
/// and [`Presence::Unknown`] otherwise.
pub const RULES: &[Rule] = &[
    rule(JbossEap, "jboss_eap_packages", Test::Set, Present),
    rule(JbossEap, "jboss_eap_running_paths", Test::Set, Present),
    rule(JbossEap, "jboss_eap_locate_jboss_modules_jar", Test::Set, Present),
    rule(JbossEap, "jboss_eap_jar_ver", Test::Set, Present),
    rule(
        JbossEap,
        "eap_home_version_txt",
        Test::Contains("JBoss Enterprise Application Platform"),
        Present,
    ),
    rule(JbossEap, "jboss_processes", Test::Set, Potential),
    rule(JbossEap, "jboss_eap_systemctl_unit_files", Test::Set, Potential),
    rule(JbossEap, "jboss_eap_chkconfig", Test::Set, Potential),
    rule(JbossWebServer, "jws_installed_with_rpm", Test::Set, Present),
    rule(JbossWebServer, "jws_has_cert", Test::Set, Present),
    rule(
        JbossWebServer,
        "jws_home_version_txt",
        Test::Contains("JBoss Web Server"),
        Present,
    ),
    rule(JbossWebServer, "jws_has_eula_txt_file", Test::Set, Potential),
    rule(JbossWebServer, "tomcat_is_part_of_redhat_product", Test::Set, Potential),
    rule(JbossFuse, "fuse_activemq_version", Test::Set, Present),
    rule(JbossFuse, "fuse_camel_version", Test::Set, Present),
    rule(JbossFuse, "fuse_cxf_version", Test::Set, Present),
    rule(JbossFuse, "jboss_fuse_systemctl_unit_files", Test::Set, Potential),
    rule(JbossFuse, "jboss_fuse_chkconfig", Test::Set, Potential),
    rule(JbossFuse, "karaf_running_processes", Test::Set, Potential),
    rule(JbossBrms, "jboss_brms_kie_api_ver", Test::Set, Present),
    rule(JbossBrms, "jboss_brms_drools_core_ver", Test::Set, Present),
    rule(JbossBrms, "jboss_brms_kie_war_ver", Test::Set, Present),
    rule(JbossBrms, "jboss_brms_manifest_mf", Test::Set, Potential),
    rule(JbossBrms, "jboss_brms_business_central_candidates", Test::Set, Potential),
    rule(JbossBrms, "jboss_brms_kie_server_candidates", Test::Set, Potential),
];

/// Facts that carry product versions.
pub const VERSION_FACTS: &[(ProductName, &str)] = &[
    (JbossEap, "jboss_eap_jar_ver"),
    (JbossWebServer, "jws_version"),
    (JbossFuse, "fuse_camel_version"),
    (JbossFuse, "fuse_activemq_version"),
    (JbossBrms, "jboss_brms_kie_api_ver"),
];

/// Rank used to combine presences; higher wins.
pub fn rank(presence: Presence) -> u8 {
    match presence {
        Presence::Unknown => 0,
        Presence::Absent => 1,
        Presence::Potential => 2,
        Presence::Present => 3,
    }
}

fn versions(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_owned()],
        Value::Array(items) => items.iter().flat_map(versions).collect(),
        Value::Object(fields) => fields.get("version").map(versions).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Evaluate the rules for one product.
pub fn detect(product: ProductName, raw: &RawFacts) -> Product {
    let mut presence = Presence::Unknown;
    let mut keys = BTreeSet::new();
    for rule in RULES.iter().filter(|rule| rule.product == product) {
        let Some(value) = raw.get(rule.fact).filter(|v| !v.is_null()) else {
            continue;
        };
        if rule.test.matches(value) {
            keys.insert(rule.fact.to_owned());
            if rank(rule.presence) > rank(presence) {
                presence = rule.presence;
            }
        } else if presence == Presence::Unknown {
            presence = Presence::Absent;
        }
    }

    let version = if presence == Presence::Present {
        VERSION_FACTS
            .iter()
            .filter(|(name, _)| *name == product)
            .filter_map(|(_, fact)| raw.get(*fact))
            .flat_map(versions)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    } else {
        Vec::new()
    };

    Product {
        name: product,
        presence,
        version,
        raw_fact_keys: keys.into_iter().collect(),
    }
}

/// Combine detections of the same product from several sources.
pub fn combine(mut into: Product, other: &Product) -> Product {
    if rank(other.presence) > rank(into.presence) {
        into.presence = other.presence;
    }
    let versions = into.version.iter().chain(&other.version).cloned().collect::<BTreeSet<_>>();
    let keys = into
        .raw_fact_keys
        .iter()
        .chain(&other.raw_fact_keys)
        .cloned()
        .collect::<BTreeSet<_>>();
    into.version = versions.into_iter().collect();
    into.raw_fact_keys = keys.into_iter().collect();
    into
}
