//! Joining per-source records of the same host.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
};

use facts::{FactOrigin, Product, ProductName, SourceRef, SystemFingerprint};
use serde_json::{Map, Value};

use crate::{products, Error};

/// A canonical fact that identifies a host.
///
/// Identifiers and MAC addresses are compared lowercased;
/// an IP address only identifies a host together with its name.
#[derive(Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Debug)]
pub enum MergeKey {
    /// Red Hat subscription manager identity.
    SubscriptionManagerId(String),

    /// BIOS UUID.
    BiosUuid(String),

    /// Red Hat Insights client identity.
    InsightsClientId(String),

    /// A MAC address.
    MacAddress(String),

    /// An IP address paired with a host name.
    IpAddressAndName(String, String),
}

fn keys<'a>(
    subscription_manager_id: Option<&str>,
    bios_uuid: Option<&str>,
    insights_client_id: Option<&str>,
    macs: impl Iterator<Item = &'a str>,
    ips: impl Iterator<Item = &'a str>,
    name: Option<&str>,
) -> BTreeSet<MergeKey> {
    let clean = |value: Option<&str>| value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_lowercase);
    let mut keys = BTreeSet::new();
    keys.extend(clean(subscription_manager_id).map(MergeKey::SubscriptionManagerId));
    keys.extend(clean(bios_uuid).map(MergeKey::BiosUuid));
    keys.extend(clean(insights_client_id).map(MergeKey::InsightsClientId));
    keys.extend(macs.filter_map(|mac| clean(Some(mac))).map(MergeKey::MacAddress));
    if let Some(name) = clean(name) {
        keys.extend(
            ips.filter_map(|ip| clean(Some(ip)))
                .map(|ip| MergeKey::IpAddressAndName(ip, name.clone())),
        );
    }
    keys
}

/// The keys by which a fingerprint would merge with another.
pub fn merge_keys(fingerprint: &SystemFingerprint) -> BTreeSet<MergeKey> {
    keys(
        fingerprint.subscription_manager_id.as_deref(),
        fingerprint.bios_uuid.as_deref(),
        fingerprint.insights_client_id.as_deref(),
        fingerprint.mac_addresses.iter().map(String::as_str),
        fingerprint.ip_addresses.iter().map(String::as_str),
        fingerprint.name.as_deref(),
    )
}

/// Attributes whose values are unioned across sources rather than chosen.
const LIST_ATTRIBUTES: &[&str] = &["ip_addresses", "mac_addresses"];

/// A canonical attribute value and where it came from.
#[derive(Clone, PartialEq, Debug)]
pub(crate) struct Attr {
    pub(crate) value: Value,
    pub(crate) origin: FactOrigin,
}

impl Attr {
    /// Whether this value beats `other`: better source precedence first, then later collection.
    fn beats(&self, other: &Attr) -> bool {
        let rank = |attr: &Attr| (attr.origin.source_type.precedence(), Reverse(attr.origin.collected_at));
        rank(self) < rank(other)
    }
}

/// A host record on its way to becoming a fingerprint.
#[derive(Clone, PartialEq, Debug, Default)]
pub(crate) struct Candidate {
    pub(crate) attrs: BTreeMap<&'static str, Attr>,
    pub(crate) sources: BTreeSet<SourceRef>,
    pub(crate) products: BTreeMap<ProductName, Product>,
}

impl Candidate {
    fn text(&self, attr: &str) -> Option<&str> {
        self.attrs.get(attr).and_then(|a| a.value.as_str())
    }

    fn list(&self, attr: &str) -> impl Iterator<Item = &str> {
        self.attrs
            .get(attr)
            .and_then(|a| a.value.as_array())
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }

    fn keys(&self) -> BTreeSet<MergeKey> {
        keys(
            self.text("subscription_manager_id"),
            self.text("bios_uuid"),
            self.text("insights_client_id"),
            self.list("mac_addresses"),
            self.list("ip_addresses"),
            self.text("name"),
        )
    }

    /// Fold another record of the same host into this one.
    fn absorb(mut self, other: Candidate) -> Candidate {
        for (name, attr) in other.attrs {
            let Some(current) = self.attrs.get_mut(name) else {
                self.attrs.insert(name, attr);
                continue;
            };
            let winner = if attr.beats(current) { attr.clone() } else { current.clone() };
            *current = if LIST_ATTRIBUTES.contains(&name) {
                Attr {
                    value: union(&current.value, &attr.value),
                    origin: winner.origin,
                }
            } else {
                winner
            };
        }
        self.sources.extend(other.sources);
        for (name, product) in other.products {
            let combined = match self.products.remove(&name) {
                Some(existing) => products::combine(existing, &product),
                None => product,
            };
            self.products.insert(name, combined);
        }
        self
    }

    pub(crate) fn into_fingerprint(self) -> Result<SystemFingerprint, Error> {
        let mut values = Map::new();
        let mut metadata = BTreeMap::new();
        for (name, attr) in self.attrs {
            values.insert(name.to_owned(), attr.value);
            metadata.insert(name.to_owned(), attr.origin);
        }
        let mut fingerprint: SystemFingerprint = serde_json::from_value(Value::Object(values))?;
        fingerprint.metadata = metadata;
        fingerprint.sources = self.sources.into_iter().collect();
        fingerprint.products = self.products.into_values().collect();
        Ok(fingerprint)
    }
}

fn union(a: &Value, b: &Value) -> Value {
    let items = [a, b]
        .into_iter()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect::<BTreeSet<_>>();
    Value::from(items.into_iter().collect::<Vec<_>>())
}

/// Disjoint sets over candidate indexes; the smallest index of a set is its root.
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = index;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[a.max(b)] = a.min(b);
        }
    }
}

fn merge_once(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut sets = DisjointSets::new(candidates.len());
    let mut owners = BTreeMap::<MergeKey, usize>::new();
    for (index, candidate) in candidates.iter().enumerate() {
        for key in candidate.keys() {
            match owners.get(&key) {
                Some(owner) => sets.union(*owner, index),
                None => {
                    owners.insert(key, index);
                }
            }
        }
    }

    let mut groups = BTreeMap::<usize, Vec<Candidate>>::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        groups.entry(sets.find(index)).or_default().push(candidate);
    }
    groups
        .into_values()
        .filter_map(|members| members.into_iter().reduce(Candidate::absorb))
        .collect()
}

/// Merge candidates describing the same host, in order of first appearance.
///
/// Merging can add keys to a record (address lists are unioned), so merging repeats until no two records share a key.
pub(crate) fn merge(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    loop {
        let before = candidates.len();
        candidates = merge_once(candidates);
        if candidates.len() == before {
            return candidates;
        }
    }
}
