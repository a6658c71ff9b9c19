// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Billing balances from the Slurm accounting database.

This crate drives Slurm's `sacctmgr` and `sacct` reporting commands and turns
their pipe-delimited output into a per-account, per-QoS balance sheet. The
pipeline runs in four stages, each in its own module:

1. [`qos`] loads the catalog of budget-bearing (`NoDecay`) QoS and their
   billing caps;
2. [`assoc`] loads the account/QoS associations of the users of interest;
3. [`usage`] sums up the billing consumed by finished jobs;
4. [`balance`] joins the three into [`BalanceRow`]s.

The parsing entry points all take plain text, so they can be fed from
anywhere; [`command::SlurmCommands`] fetches that text from the real tools.

*/

extern crate chrono;
#[macro_use] extern crate failure;
extern crate indexmap;
extern crate itertools;
#[macro_use] extern crate log;

pub mod assoc;
pub mod balance;
pub mod command;
pub mod errors;
pub mod qos;
pub mod tres;
pub mod usage;

pub use assoc::{Association, Associations, DefaultQos};
pub use balance::{Allocation, BalanceOptions, BalanceRow, SuUnit};
pub use command::{SlurmCommands, UsageQuery};
pub use errors::AcctError;
pub use qos::{QosCatalog, QosDefinition};
pub use usage::{JobState, StateFilter, UsageAccumulator, UsageTotals};

use std::fmt;


/// The account that Slurm places at the top of every association tree.
///
/// Site administrators usually don't want it in balance reports.
pub const ROOT_ACCOUNT: &str = "root";


/// The key joining associations to their usage: an account and a QoS name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AssocKey {
    pub account: String,
    pub qos: String,
}

impl AssocKey {
    pub fn new<A: Into<String>, Q: Into<String>>(account: A, qos: Q) -> Self {
        AssocKey {
            account: account.into(),
            qos: qos.into(),
        }
    }
}

impl fmt::Display for AssocKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.qos)
    }
}


/// Split one line of `-P` ("parsable") output into its fields.
///
/// Slurm never escapes the `|` delimiter, so a free-text column is only safe
/// as the last one; `max_fields` folds any extra delimiters into it.
fn split_record(line: &str, max_fields: usize) -> Vec<&str> {
    line.splitn(max_fields, '|').collect()
}

/// Iterate over the non-blank lines of some command output, with their
/// one-based line numbers for error messages.
fn records(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|&(_, line)| !line.trim().is_empty())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_splitting_keeps_trailing_text() {
        assert_eq!(split_record("a|b|c|d|e", 4), vec!["a", "b", "c", "d|e"]);
        assert_eq!(split_record("a||", 4), vec!["a", "", ""]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let recs: Vec<_> = records("x\n\n  \ny\r\n").collect();
        assert_eq!(recs, vec![(1, "x"), (4, "y")]);
    }
}
