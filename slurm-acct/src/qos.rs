// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! The catalog of budget-bearing QoS.

A QoS carries a billing budget when it is flagged `NoDecay`: its `GrpTRESMins`
caps then never reset, so the `billing` cap is a lifetime allocation. QoS
without that flag are left out of the catalog entirely, and any association
using them reports an unlimited allocation.

*/

use errors::AcctError;
use failure::Error;
use std::collections::HashMap;
use tres::{self, TresMap};
use super::{records, split_record};


/// The `sacctmgr` flag that marks a budget-bearing QoS.
pub const NO_DECAY_FLAG: &str = "NoDecay";

/// The `format=` columns requested from `sacctmgr show qos`.
pub const QOS_FIELDS: &[&str] = &["name", "grptresmins", "flags", "description"];


/// A budget-bearing QoS.
#[derive(Clone, Debug, PartialEq)]
pub struct QosDefinition {
    pub name: String,
    pub description: String,

    /// All of the group TRES-minute caps, keyed by TRES name.
    pub tres_minutes: TresMap,
}

impl QosDefinition {
    /// The cap on billing minutes, if the QoS sets one.
    pub fn billing_minutes_cap(&self) -> Option<u64> {
        self.tres_minutes.get(tres::BILLING).cloned()
    }
}


/// Budget-bearing QoS, keyed by name.
pub type QosCatalog = HashMap<String, QosDefinition>;


/// Parse the output of `sacctmgr --noheader show qos -P`, with the columns
/// of [`QOS_FIELDS`].
///
/// Any record that we can't make sense of fails the whole parse, since a
/// partial catalog would silently turn real budgets into unlimited ones.
pub fn parse_qos_listing(text: &str) -> Result<QosCatalog, Error> {
    let mut catalog = QosCatalog::new();

    for (lineno, line) in records(text) {
        let fields = split_record(line, QOS_FIELDS.len());

        if fields.len() < 3 {
            return Err(AcctError::malformed_record(
                "QoS", lineno, format!("expected {} fields, got {}", QOS_FIELDS.len(), fields.len())
            ).into());
        }

        let name = fields[0].trim();
        let description = fields.get(3).map(|d| d.trim()).unwrap_or("");

        if !fields[2].split(',').any(|flag| flag == NO_DECAY_FLAG) {
            trace!("QoS {} is not flagged {}; ignoring", name, NO_DECAY_FLAG);
            continue;
        }

        let tres_minutes = tres::parse_tres("grptresmins", fields[1])
            .map_err(|e| AcctError::malformed_record("QoS", lineno, e))?;

        catalog.insert(name.to_owned(), QosDefinition {
            name: name.to_owned(),
            description: description.to_owned(),
            tres_minutes,
        });
    }

    debug!("{} budget-bearing QoS: {:?}", catalog.len(), {
        let mut names: Vec<_> = catalog.keys().collect();
        names.sort();
        names
    });

    Ok(catalog)
}
