// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Account/QoS associations.

Slurm's association table links users to accounts, and gives each such pair
a list of QoS it may submit under. For balance purposes we flatten that into
one [`Association`] per account and QoS, since that is the granularity at
which budgets are charged.

*/

use errors::AcctError;
use failure::Error;
use indexmap::IndexMap;
use indexmap::map::Values;
use qos::{QosCatalog, QosDefinition};
use std::collections::{BTreeSet, HashSet};
use super::{records, split_record, AssocKey};


/// The `format=` columns requested from `sacctmgr show assoc`.
pub const ASSOC_FIELDS: &[&str] = &["account", "user", "qos", "defaultqos"];


/// Whether an association's QoS is its user's default.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DefaultQos {
    /// The user may pick among several QoS, and this is the default.
    Yes,

    /// The user may pick among several QoS, and this is not the default.
    No,

    /// The user has just this one QoS, so there is nothing to default.
    NotApplicable,
}


/// One account/QoS pair that some user of interest can charge to.
#[derive(Clone, Debug, PartialEq)]
pub struct Association {
    pub key: AssocKey,
    pub default_qos: DefaultQos,

    /// The catalog entry for the QoS, if it is budget-bearing.
    pub qos_def: Option<QosDefinition>,

    /// The users associated with this account and QoS, in the order that
    /// `sacctmgr` listed them.
    pub users: Vec<String>,
}

impl Association {
    /// The billing-minutes cap of this association, if it has one.
    pub fn billing_minutes_cap(&self) -> Option<u64> {
        self.qos_def.as_ref().and_then(|q| q.billing_minutes_cap())
    }

    pub fn description(&self) -> &str {
        self.qos_def.as_ref().map(|q| q.description.as_str()).unwrap_or("")
    }
}


/// The associations of interest, in the order they were first seen.
#[derive(Clone, Debug, Default)]
pub struct Associations {
    map: IndexMap<AssocKey, Association>,
}

impl Associations {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &AssocKey) -> Option<&Association> {
        self.map.get(key)
    }

    pub fn iter(&self) -> Values<AssocKey, Association> {
        self.map.values()
    }

    /// The names of the budget-bearing QoS that these associations use.
    ///
    /// This is what the usage query is restricted to: usage under any other
    /// QoS can't affect a balance.
    pub fn budget_qos_names(&self) -> BTreeSet<&str> {
        self.iter()
            .filter(|a| a.qos_def.is_some())
            .map(|a| a.key.qos.as_str())
            .collect()
    }

    /// Record one account/QoS pair for `user`. A repeated pair keeps its
    /// original position, but its other attributes are overwritten.
    fn insert(&mut self, key: AssocKey, user: &str, default_qos: DefaultQos, qos_def: Option<QosDefinition>) {
        let entry = self.map.entry(key.clone()).or_insert_with(|| Association {
            key,
            default_qos,
            qos_def: None,
            users: Vec::new(),
        });

        entry.default_qos = default_qos;
        entry.qos_def = qos_def;

        if !entry.users.iter().any(|u| u == user) {
            entry.users.push(user.to_owned());
        }
    }
}

impl<'a> IntoIterator for &'a Associations {
    type Item = &'a Association;
    type IntoIter = Values<'a, AssocKey, Association>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}


/// Parse the output of `sacctmgr --noheader show assoc -P`, with the columns
/// of [`ASSOC_FIELDS`].
///
/// Account-level rows (those with no user) are skipped, as are users not in
/// `users` if that filter is given. QoS that aren't in `catalog` still yield
/// associations; they just have no budget.
pub fn parse_assoc_listing(text: &str, catalog: &QosCatalog, users: Option<&HashSet<String>>) -> Result<Associations, Error> {
    let mut assocs = Associations::default();
    let mut unbudgeted = HashSet::new();

    for (lineno, line) in records(text) {
        let fields = split_record(line, ASSOC_FIELDS.len());

        if fields.len() != ASSOC_FIELDS.len() {
            return Err(AcctError::malformed_record(
                "association", lineno, format!("expected {} fields, got {}", ASSOC_FIELDS.len(), fields.len())
            ).into());
        }

        let account = fields[0].trim();
        let user = fields[1].trim();
        let default = fields[3].trim();

        if user.is_empty() {
            continue;
        }

        if let Some(users) = users {
            if !users.contains(user) {
                trace!("skipping association of {} with {}", user, account);
                continue;
            }
        }

        let qos_list: Vec<_> = fields[2].split(',')
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .collect();

        for qos in &qos_list {
            let default_qos = if qos_list.len() > 1 {
                if *qos == default { DefaultQos::Yes } else { DefaultQos::No }
            } else {
                DefaultQos::NotApplicable
            };

            let qos_def = catalog.get(*qos).cloned();

            if qos_def.is_none() && unbudgeted.insert(qos.to_string()) {
                debug!("QoS {} has no budget-bearing definition; it will be reported as unlimited", qos);
            }

            assocs.insert(AssocKey::new(account, *qos), user, default_qos, qos_def);
        }
    }

    debug!("{} associations of interest", assocs.len());
    Ok(assocs)
}


#[cfg(test)]
mod tests {
    use super::*;
    use qos::parse_qos_listing;

    fn catalog() -> QosCatalog {
        parse_qos_listing("normal|billing=1000|NoDecay|Normal\ngpu|billing=500|NoDecay|GPUs\n").unwrap()
    }

    const LISTING: &str = "\
root|||
root|root|normal|normal
proj1|||
proj1|alice|normal,gpu,debug|gpu
proj2|bob|normal|normal
proj1|carol|normal,gpu|normal
";

    fn users(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn account_rows_are_skipped() {
        let assocs = parse_assoc_listing(LISTING, &catalog(), None).unwrap();
        let keys: Vec<_> = assocs.iter().map(|a| a.key.to_string()).collect();
        assert_eq!(keys, vec!["root/normal", "proj1/normal", "proj1/gpu", "proj1/debug", "proj2/normal"]);
    }

    #[test]
    fn default_marking() {
        let assocs = parse_assoc_listing(LISTING, &catalog(), Some(&users(&["alice", "bob"]))).unwrap();
        assert_eq!(assocs.get(&AssocKey::new("proj1", "gpu")).unwrap().default_qos, DefaultQos::Yes);
        assert_eq!(assocs.get(&AssocKey::new("proj1", "normal")).unwrap().default_qos, DefaultQos::No);
        assert_eq!(assocs.get(&AssocKey::new("proj2", "normal")).unwrap().default_qos, DefaultQos::NotApplicable);
    }

    #[test]
    fn later_rows_overwrite_attributes_but_not_order() {
        let assocs = parse_assoc_listing(LISTING, &catalog(), None).unwrap();
        let normal = assocs.get(&AssocKey::new("proj1", "normal")).unwrap();
        assert_eq!(normal.default_qos, DefaultQos::Yes);
        assert_eq!(normal.users, vec!["alice", "carol"]);
        assert_eq!(assocs.iter().nth(1).unwrap().key, AssocKey::new("proj1", "normal"));
    }

    #[test]
    fn user_filter() {
        let assocs = parse_assoc_listing(LISTING, &catalog(), Some(&users(&["bob"]))).unwrap();
        assert_eq!(assocs.len(), 1);
        assert_eq!(assocs.iter().next().unwrap().key, AssocKey::new("proj2", "normal"));

        let assocs = parse_assoc_listing(LISTING, &catalog(), Some(&users(&["nobody"]))).unwrap();
        assert!(assocs.is_empty());
    }

    #[test]
    fn unknown_qos_has_no_budget() {
        let assocs = parse_assoc_listing(LISTING, &catalog(), None).unwrap();
        let debug = assocs.get(&AssocKey::new("proj1", "debug")).unwrap();
        assert!(debug.qos_def.is_none());
        assert_eq!(debug.billing_minutes_cap(), None);
        assert_eq!(debug.description(), "");

        let gpu = assocs.get(&AssocKey::new("proj1", "gpu")).unwrap();
        assert_eq!(gpu.billing_minutes_cap(), Some(500));
        assert_eq!(gpu.description(), "GPUs");
    }

    #[test]
    fn budget_qos_names_skip_unbudgeted() {
        let assocs = parse_assoc_listing(LISTING, &catalog(), None).unwrap();
        let names: Vec<_> = assocs.budget_qos_names().into_iter().collect();
        assert_eq!(names, vec!["gpu", "normal"]);
    }

    #[test]
    fn short_records_are_fatal() {
        let err = parse_assoc_listing("proj1|alice|normal\n", &catalog(), None).unwrap_err();
        assert!(err.downcast_ref::<AcctError>().map(|e| e.is_malformed()).unwrap_or(false));
    }
}
