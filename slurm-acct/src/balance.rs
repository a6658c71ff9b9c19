// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Computing balances.

This is where the catalog, the associations, and the usage totals come
together. Every association yields a [`BalanceRow`] (or one per user, in
per-user mode) stating its allocation, how much of it has been used, and how
much remains.

Absent numbers are absent, not zero: an association without a billing cap
has an `Unlimited` allocation and no used/remaining figures at all.

*/

use assoc::{Association, Associations, DefaultQos};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use usage::{UsageAccumulator, UsageTotals};
use super::ROOT_ACCOUNT;


/// The unit that balances are expressed in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuUnit {
    /// Service units: billing-minutes, unscaled.
    Su,

    /// Thousands of service units.
    KiloSu,

    /// Millions of service units.
    MegaSu,
}

impl SuUnit {
    /// The number of SU in one of this unit.
    pub fn scale(&self) -> f64 {
        match *self {
            SuUnit::Su => 1.,
            SuUnit::KiloSu => 1e3,
            SuUnit::MegaSu => 1e6,
        }
    }

    pub fn label(&self) -> &'static str {
        match *self {
            SuUnit::Su => "SU",
            SuUnit::KiloSu => "kSU",
            SuUnit::MegaSu => "MSU",
        }
    }

    /// Convert a whole number of SU into this unit.
    ///
    /// Usage is charged in whole SU, so rounding happens before scaling:
    /// 1500.2 SU is charged as 1501 SU, which is 1.501 kSU, not 2.
    pub fn from_whole_su(&self, su: u128) -> f64 {
        su as f64 / self.scale()
    }
}

impl Default for SuUnit {
    fn default() -> Self {
        SuUnit::Su
    }
}

impl fmt::Display for SuUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SuUnit {
    type Err = ::failure::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "su" => Ok(SuUnit::Su),
            "ksu" | "k" => Ok(SuUnit::KiloSu),
            "msu" | "m" => Ok(SuUnit::MegaSu),
            _ => Err(format_err!("unrecognized unit \"{}\" (expected SU, kSU or MSU)", s)),
        }
    }
}


/// An allocation, which may be unlimited.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Allocation {
    Unlimited,

    /// A finite allocation, in the row's unit.
    Bounded(f64),
}

impl Allocation {
    pub fn is_unlimited(&self) -> bool {
        *self == Allocation::Unlimited
    }

    /// The size of the allocation, if it is finite.
    pub fn amount(&self) -> Option<f64> {
        match *self {
            Allocation::Unlimited => None,
            Allocation::Bounded(a) => Some(a),
        }
    }
}


/// One line of a balance report.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceRow {
    pub account: String,
    pub qos: String,

    /// The user whose usage this row reports, in per-user mode.
    pub user: Option<String>,

    pub description: String,
    pub default_qos: DefaultQos,
    pub unit: SuUnit,
    pub allocation: Allocation,

    /// The usage charged against the allocation, rounded up to whole SU
    /// before scaling. Absent for unlimited allocations.
    pub used: Option<f64>,

    /// What is left of the allocation. Absent for unlimited and empty
    /// allocations.
    pub remaining: Option<f64>,

    /// `remaining` as a percentage of the allocation.
    pub remaining_percent: Option<f64>,
}


/// Knobs for the balance computation.
#[derive(Clone, Debug, Default)]
pub struct BalanceOptions {
    pub unit: SuUnit,

    /// Leave out associations with the `root` account.
    pub ignore_root: bool,

    /// Report usage per user instead of per account and QoS.
    pub per_user: bool,
}


/// The whole SU charged for some billing-seconds. Partial minutes round up.
fn charged_su(billing_seconds: u128) -> u128 {
    (billing_seconds + 59) / 60
}


/// Split an association's charge of `total_su` among its users, so that the
/// shares add up to it exactly.
///
/// Every user is charged their whole minutes. The SU left over from rounding
/// the total up go one apiece to the users with the largest partial minutes,
/// ties going to the first name.
fn apportion(total_su: u128, per_user: &BTreeMap<String, UsageTotals>) -> HashMap<&str, u128> {
    let mut shares: HashMap<&str, u128> = per_user.iter()
        .map(|(user, t)| (user.as_str(), t.billing_seconds() / 60))
        .collect();

    let assigned: u128 = shares.values().sum();
    let mut leftover = total_su.saturating_sub(assigned);

    let mut partials: Vec<(&str, u128)> = per_user.iter()
        .map(|(user, t)| (user.as_str(), t.billing_seconds() % 60))
        .filter(|&(_, rem)| rem > 0)
        .collect();
    partials.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    for (user, _) in partials {
        if leftover == 0 {
            break;
        }

        *shares.entry(user).or_insert(0) += 1;
        leftover -= 1;
    }

    shares
}


/// The figures shared by all of an association's rows.
struct Budget {
    allocation: Allocation,

    /// Whole SU charged to the association.
    charged: u128,

    used: Option<f64>,
    remaining: Option<f64>,
    remaining_percent: Option<f64>,
}

impl Budget {
    /// Work out an association's figures.
    ///
    /// A cap of zero is degenerate input, not an error: it becomes a zero
    /// allocation whose usage is shown but whose remaining balance and
    /// percentage are left empty, as for an unlimited one.
    fn new(assoc: &Association, totals: Option<&UsageTotals>, unit: SuUnit) -> Self {
        let charged = totals.map(|t| charged_su(t.billing_seconds())).unwrap_or(0);
        let used = unit.from_whole_su(charged);

        match assoc.billing_minutes_cap() {
            None => Budget {
                allocation: Allocation::Unlimited,
                charged,
                used: None,
                remaining: None,
                remaining_percent: None,
            },

            Some(0) => Budget {
                allocation: Allocation::Bounded(0.),
                charged,
                used: Some(used),
                remaining: None,
                remaining_percent: None,
            },

            Some(cap) => {
                let limit = cap as f64 / unit.scale();
                let remaining = limit - used;

                Budget {
                    allocation: Allocation::Bounded(limit),
                    charged,
                    used: Some(used),
                    remaining: Some(remaining),
                    remaining_percent: Some(remaining * 100. / limit),
                }
            },
        }
    }

    fn row(&self, assoc: &Association, user: Option<String>, used: Option<f64>, unit: SuUnit) -> BalanceRow {
        BalanceRow {
            account: assoc.key.account.clone(),
            qos: assoc.key.qos.clone(),
            user,
            description: assoc.description().to_owned(),
            default_qos: assoc.default_qos,
            unit,
            allocation: self.allocation,
            used,
            remaining: self.remaining,
            remaining_percent: self.remaining_percent,
        }
    }
}


/// Compute the balance report.
///
/// Rows come out in the order of `assocs`. In per-user mode, each
/// association gets one row per user: first its associated users, in order,
/// then anyone else who charged jobs to it, by name. Those rows report each
/// user's share of the association's usage, and the shares add up to the
/// combined figure. The allocation and the remaining balance are the ones
/// shared by the whole association.
pub fn compute_balances(assocs: &Associations, usage: &UsageAccumulator, opts: &BalanceOptions) -> Vec<BalanceRow> {
    let mut rows = Vec::new();

    if opts.per_user && !usage.is_per_user() {
        warn!("per-user balances requested, but usage was not tallied per user");
    }

    for assoc in assocs {
        if opts.ignore_root && assoc.key.account == ROOT_ACCOUNT {
            continue;
        }

        let budget = Budget::new(assoc, usage.totals(&assoc.key), opts.unit);

        if !opts.per_user {
            rows.push(budget.row(assoc, None, budget.used, opts.unit));
            continue;
        }

        let user_totals = usage.user_totals(&assoc.key);
        let shares = user_totals.map(|ut| apportion(budget.charged, ut)).unwrap_or_default();
        let mut users = assoc.users.clone();

        if let Some(ut) = user_totals {
            for u in ut.keys() {
                if !users.contains(u) {
                    users.push(u.clone());
                }
            }
        }

        for user in users {
            let used = budget.used.map(|_| {
                opts.unit.from_whole_su(shares.get(user.as_str()).cloned().unwrap_or(0))
            });

            rows.push(budget.row(assoc, Some(user), used, opts.unit));
        }
    }

    rows
}
