// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Aggregating job usage.

`sacct` gives us one line per finished job. Each job's consumption of a TRES
is its allocated amount times its elapsed wallclock time, in TRES-minutes;
the `billing` TRES is what budgets are charged in. We sum those up per
account and QoS, and optionally per user as well.

Sums are kept in whole TRES-seconds, as integers, and only converted to
(fractional) minutes when read out. That makes the totals exact, so they
come out the same whatever order `sacct` lists the jobs in.

*/

use errors::AcctError;
use failure::Error;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tres::{self, TresMap};
use super::{records, split_record, AssocKey};


/// The `--format=` columns requested from `sacct`.
pub const USAGE_FIELDS: &[&str] = &[
    "jobid", "user", "account", "qos", "state", "alloctres", "elapsedraw", "partition",
];

/// The job states that are charged by default: completed, failed, and
/// timed-out jobs.
pub const DEFAULT_STATES: &[JobState] = &[JobState::Completed, JobState::Failed, JobState::Timeout];


/// The state of a job, as reported by `sacct`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum JobState {
    BootFail,
    Cancelled,
    Completed,
    Deadline,
    Failed,
    NodeFail,
    OutOfMemory,
    Pending,
    Preempted,
    Requeued,
    Resizing,
    Revoked,
    Running,
    Suspended,
    Timeout,

    /// Some state this crate doesn't know about.
    Other,
}

impl JobState {
    /// Get the abbreviation for this state, as accepted by `sacct --state`.
    pub fn shortcode(&self) -> &'static str {
        match *self {
            JobState::BootFail => "BF",
            JobState::Cancelled => "CA",
            JobState::Completed => "CD",
            JobState::Deadline => "DL",
            JobState::Failed => "F",
            JobState::NodeFail => "NF",
            JobState::OutOfMemory => "OOM",
            JobState::Pending => "PD",
            JobState::Preempted => "PR",
            JobState::Requeued => "RQ",
            JobState::Resizing => "RS",
            JobState::Revoked => "RV",
            JobState::Running => "R",
            JobState::Suspended => "S",
            JobState::Timeout => "TO",
            JobState::Other => "?",
        }
    }

    /// Parse a state from the `State` column of `sacct`.
    ///
    /// Slurm decorates some states, as in `CANCELLED by 1234`, so only the
    /// first word counts. Both the full names and the abbreviations are
    /// accepted; anything else is `Other`.
    pub fn from_sacct(text: &str) -> JobState {
        let word = text.split_whitespace().next().unwrap_or("");
        Self::from_name(word).unwrap_or(JobState::Other)
    }

    fn from_name(name: &str) -> Option<JobState> {
        let name = name.to_uppercase();

        Some(match name.as_str() {
            "BF" | "BOOT_FAIL" => JobState::BootFail,
            "CA" | "CANCELLED" => JobState::Cancelled,
            "CD" | "COMPLETED" => JobState::Completed,
            "DL" | "DEADLINE" => JobState::Deadline,
            "F" | "FAILED" => JobState::Failed,
            "NF" | "NODE_FAIL" => JobState::NodeFail,
            "OOM" | "OUT_OF_MEMORY" => JobState::OutOfMemory,
            "PD" | "PENDING" => JobState::Pending,
            "PR" | "PREEMPTED" => JobState::Preempted,
            "RQ" | "REQUEUED" => JobState::Requeued,
            "RS" | "RESIZING" => JobState::Resizing,
            "RV" | "REVOKED" => JobState::Revoked,
            "R" | "RUNNING" => JobState::Running,
            "S" | "SUSPENDED" => JobState::Suspended,
            "TO" | "TIMEOUT" => JobState::Timeout,
            _ => return None,
        })
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.shortcode())
    }
}


/// Which job states to charge.
///
/// An inactive filter admits every job, including ones in states we don't
/// recognize. An active one admits only the listed states.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StateFilter {
    states: Option<BTreeSet<JobState>>,
}

impl StateFilter {
    /// A filter that admits everything.
    pub fn any() -> Self {
        StateFilter { states: None }
    }

    /// A filter that admits only the given states.
    pub fn only<I: IntoIterator<Item = JobState>>(states: I) -> Self {
        StateFilter { states: Some(states.into_iter().collect()) }
    }

    /// The default filter: completed, failed and timed-out jobs.
    pub fn finished() -> Self {
        Self::only(DEFAULT_STATES.iter().cloned())
    }

    pub fn is_active(&self) -> bool {
        self.states.is_some()
    }

    pub fn admits(&self, state: JobState) -> bool {
        match self.states {
            None => true,
            Some(ref s) => s.contains(&state),
        }
    }

    /// The filter as a `sacct --state` argument, if it is active.
    pub fn to_sacct_arg(&self) -> Option<String> {
        self.states.as_ref().map(|s| s.iter().map(|st| st.shortcode()).join(","))
    }
}

impl FromStr for StateFilter {
    type Err = Error;

    /// Parse a comma-separated list of states, like `CD,F,TO`. The word
    /// `all` gives an inactive filter.
    fn from_str(s: &str) -> Result<Self, Error> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(StateFilter::any());
        }

        let mut states = BTreeSet::new();

        for item in s.split(',').map(|i| i.trim()).filter(|i| !i.is_empty()) {
            match JobState::from_name(item) {
                Some(st) => { states.insert(st); },
                None => return Err(format_err!("unrecognized job state \"{}\"", item)),
            }
        }

        if states.is_empty() {
            return Err(format_err!("no job states given"));
        }

        Ok(StateFilter { states: Some(states) })
    }
}


/// One finished job, as listed by `sacct`.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageRecord {
    pub job_id: String,
    pub user: String,
    pub account: String,
    pub qos: String,
    pub state: JobState,
    pub alloc_tres: TresMap,
    pub elapsed_seconds: u64,
    pub partition: String,
}

impl UsageRecord {
    /// Parse one line of `sacct -P` output, with the columns of
    /// [`USAGE_FIELDS`].
    ///
    /// Returns `Ok(None)` for jobs that never had resources allocated, since
    /// those can't have consumed anything.
    pub fn parse(lineno: usize, line: &str) -> Result<Option<UsageRecord>, AcctError> {
        let fields = split_record(line, USAGE_FIELDS.len() + 1);

        if fields.len() != USAGE_FIELDS.len() {
            return Err(AcctError::malformed_record(
                "usage", lineno, format!("expected {} fields, got {}", USAGE_FIELDS.len(), fields.len())
            ));
        }

        if fields[5].trim().is_empty() {
            trace!("job {} has no allocated resources; skipping", fields[0]);
            return Ok(None);
        }

        let alloc_tres = tres::parse_tres("alloctres", fields[5])
            .map_err(|e| AcctError::malformed_record("usage", lineno, e))?;

        let elapsed = fields[6].trim();
        let elapsed_seconds = elapsed.parse::<u64>()
            .map_err(|e| AcctError::malformed_record(
                "usage", lineno, AcctError::malformed_field("elapsedraw", elapsed, e)
            ))?;

        Ok(Some(UsageRecord {
            job_id: fields[0].trim().to_owned(),
            user: fields[1].trim().to_owned(),
            account: fields[2].trim().to_owned(),
            qos: fields[3].trim().to_owned(),
            state: JobState::from_sacct(fields[4]),
            alloc_tres,
            elapsed_seconds,
            partition: fields[7].trim().to_owned(),
        }))
    }

    pub fn key(&self) -> AssocKey {
        AssocKey::new(self.account.as_str(), self.qos.as_str())
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed_seconds as f64 / 60.
    }
}


/// Parse all of the output of `sacct`, dropping jobs without allocations.
pub fn parse_usage_listing(text: &str) -> Result<Vec<UsageRecord>, Error> {
    let mut jobs = Vec::new();

    for (lineno, line) in records(text) {
        if let Some(rec) = UsageRecord::parse(lineno, line)? {
            jobs.push(rec);
        }
    }

    Ok(jobs)
}


/// Running totals of TRES consumption.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UsageTotals {
    tres_seconds: BTreeMap<String, u128>,
    elapsed_seconds: u128,
    n_jobs: usize,
}

impl UsageTotals {
    fn add(&mut self, rec: &UsageRecord) {
        let secs = u128::from(rec.elapsed_seconds);

        for (name, amount) in &rec.alloc_tres {
            *self.tres_seconds.entry(name.clone()).or_insert(0) += u128::from(*amount) * secs;
        }

        self.elapsed_seconds += secs;
        self.n_jobs += 1;
    }

    /// The consumption of the named TRES, in TRES-minutes.
    pub fn tres_minutes(&self, name: &str) -> Option<f64> {
        self.tres_seconds.get(name).map(|s| *s as f64 / 60.)
    }

    /// The consumption of the named TRES, in exact TRES-seconds.
    pub fn tres_seconds(&self, name: &str) -> Option<u128> {
        self.tres_seconds.get(name).cloned()
    }

    /// Billing consumed in exact TRES-seconds, zero if no job had a
    /// billing weight.
    pub fn billing_seconds(&self) -> u128 {
        self.tres_seconds(tres::BILLING).unwrap_or(0)
    }

    /// The billing units consumed, which are TRES-minutes of `billing`.
    /// Zero if no job had a billing weight.
    pub fn billing_minutes(&self) -> f64 {
        self.tres_minutes(tres::BILLING).unwrap_or(0.)
    }

    /// The total wallclock time of the jobs, in minutes.
    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed_seconds as f64 / 60.
    }

    /// The names of all the TRES that were consumed.
    pub fn tres_names(&self) -> impl Iterator<Item = &str> {
        self.tres_seconds.keys().map(|k| k.as_str())
    }

    pub fn n_jobs(&self) -> usize {
        self.n_jobs
    }
}


/// Usage summed per account/QoS, and optionally per user.
#[derive(Clone, Debug)]
pub struct UsageAccumulator {
    filter: StateFilter,
    by_assoc: HashMap<AssocKey, UsageTotals>,
    by_user: Option<HashMap<AssocKey, BTreeMap<String, UsageTotals>>>,
    n_filtered: usize,
}

impl UsageAccumulator {
    /// Create an empty accumulator. Jobs whose state `filter` rejects are
    /// ignored; if `per_user` is true, per-user totals are kept too.
    pub fn new(filter: StateFilter, per_user: bool) -> Self {
        UsageAccumulator {
            filter,
            by_assoc: HashMap::new(),
            by_user: if per_user { Some(HashMap::new()) } else { None },
            n_filtered: 0,
        }
    }

    /// Count one job. Returns whether it passed the state filter.
    pub fn add(&mut self, rec: &UsageRecord) -> bool {
        if !self.filter.admits(rec.state) {
            trace!("job {} is in state {}; not charging it", rec.job_id, rec.state);
            self.n_filtered += 1;
            return false;
        }

        let key = rec.key();

        if let Some(ref mut by_user) = self.by_user {
            by_user.entry(key.clone())
                .or_insert_with(BTreeMap::new)
                .entry(rec.user.clone())
                .or_insert_with(UsageTotals::default)
                .add(rec);
        }

        self.by_assoc.entry(key).or_insert_with(UsageTotals::default).add(rec);
        true
    }

    /// Parse `sacct` output and count every job in it.
    pub fn add_listing(&mut self, text: &str) -> Result<(), Error> {
        for rec in parse_usage_listing(text)? {
            self.add(&rec);
        }

        debug!("usage totals for {} account/QoS pairs ({} jobs excluded by state)",
               self.by_assoc.len(), self.n_filtered);
        Ok(())
    }

    /// The totals for an account/QoS pair, if any of its jobs were counted.
    pub fn totals(&self, key: &AssocKey) -> Option<&UsageTotals> {
        self.by_assoc.get(key)
    }

    /// The per-user totals for an account/QoS pair.
    ///
    /// This is `None` if per-user totals aren't being kept, or if none of
    /// the pair's jobs were counted.
    pub fn user_totals(&self, key: &AssocKey) -> Option<&BTreeMap<String, UsageTotals>> {
        self.by_user.as_ref().and_then(|m| m.get(key))
    }

    pub fn is_per_user(&self) -> bool {
        self.by_user.is_some()
    }

    pub fn len(&self) -> usize {
        self.by_assoc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_assoc.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
101|alice|proj1|normal|COMPLETED|billing=10,cpu=2|600|compute
102|alice|proj1|normal|FAILED|billing=20,cpu=4,mem=4000M|1200|compute
103|bob|proj1|normal|CANCELLED by 1001|billing=40|60|compute
104|bob|proj1|normal|CANCELLED by 1001||0|compute
105|bob|proj2|gpu|TIMEOUT|billing=100,gres/gpu=1|30|gpu
";

    fn accumulate(text: &str, filter: StateFilter, per_user: bool) -> UsageAccumulator {
        let mut acc = UsageAccumulator::new(filter, per_user);
        acc.add_listing(text).unwrap();
        acc
    }

    #[test]
    fn state_parsing() {
        assert_eq!(JobState::from_sacct("COMPLETED"), JobState::Completed);
        assert_eq!(JobState::from_sacct("CANCELLED by 1234"), JobState::Cancelled);
        assert_eq!(JobState::from_sacct("TO"), JobState::Timeout);
        assert_eq!(JobState::from_sacct("OUT_OF_MEMORY"), JobState::OutOfMemory);
        assert_eq!(JobState::from_sacct("WEIRD"), JobState::Other);
        assert_eq!(JobState::from_sacct(""), JobState::Other);
    }

    #[test]
    fn state_filter_parsing() {
        let f: StateFilter = "CD, f,TIMEOUT".parse().unwrap();
        assert_eq!(f, StateFilter::finished());
        assert_eq!(f.to_sacct_arg().unwrap(), "CD,F,TO");
        assert!(!"all".parse::<StateFilter>().unwrap().is_active());
        assert!("CD,XX".parse::<StateFilter>().is_err());
        assert!(",".parse::<StateFilter>().is_err());
    }

    #[test]
    fn jobs_without_allocations_are_dropped() {
        let jobs = parse_usage_listing(LISTING).unwrap();
        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| j.job_id != "104"));

        // Even garbage elapsed times don't matter for such jobs.
        assert!(parse_usage_listing("1|a|p|q|PENDING||Unknown|x\n").unwrap().is_empty());
    }

    #[test]
    fn record_fields() {
        let jobs = parse_usage_listing(LISTING).unwrap();
        let j = &jobs[1];
        assert_eq!(j.job_id, "102");
        assert_eq!(j.user, "alice");
        assert_eq!(j.key(), AssocKey::new("proj1", "normal"));
        assert_eq!(j.state, JobState::Failed);
        assert_eq!(j.alloc_tres["mem"], 4000);
        assert_eq!(j.elapsed_seconds, 1200);
        assert_eq!(j.elapsed_minutes(), 20.);
        assert_eq!(j.partition, "compute");
    }

    #[test]
    fn billing_is_weight_times_minutes() {
        let acc = accumulate(LISTING, StateFilter::any(), false);
        let t = acc.totals(&AssocKey::new("proj1", "normal")).unwrap();
        // 10 * 10 + 20 * 20 + 40 * 1
        assert_eq!(t.billing_minutes(), 540.);
        assert_eq!(t.tres_minutes("cpu"), Some(2. * 10. + 4. * 20.));
        assert_eq!(t.elapsed_minutes(), 31.);
        assert_eq!(t.n_jobs(), 3);

        let t = acc.totals(&AssocKey::new("proj2", "gpu")).unwrap();
        assert_eq!(t.billing_minutes(), 50.);
        assert_eq!(t.billing_seconds(), 3000);
        assert_eq!(t.tres_seconds("gres/gpu"), Some(30));
        assert_eq!(t.tres_seconds("cpu"), None);
        assert_eq!(t.tres_names().collect::<Vec<_>>(), vec!["billing", "gres/gpu"]);
    }

    #[test]
    fn state_filter_excludes_jobs() {
        let acc = accumulate(LISTING, StateFilter::finished(), false);
        let t = acc.totals(&AssocKey::new("proj1", "normal")).unwrap();
        assert_eq!(t.billing_minutes(), 500.);
        assert_eq!(t.n_jobs(), 2);

        let acc = accumulate(LISTING, StateFilter::only(vec![JobState::Cancelled]), false);
        assert_eq!(acc.len(), 1);
        assert!(acc.totals(&AssocKey::new("proj2", "gpu")).is_none());
    }

    #[test]
    fn unknown_states_only_pass_inactive_filters() {
        let text = "1|a|p|q|WEIRD|billing=1|60|x\n";
        assert!(accumulate(text, StateFilter::finished(), false).is_empty());
        assert_eq!(accumulate(text, StateFilter::any(), false).len(), 1);
    }

    #[test]
    fn per_user_totals_partition_the_sum() {
        let acc = accumulate(LISTING, StateFilter::any(), true);
        let key = AssocKey::new("proj1", "normal");
        let users = acc.user_totals(&key).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users["alice"].billing_minutes(), 500.);
        assert_eq!(users["bob"].billing_minutes(), 40.);

        let sum: f64 = users.values().map(|t| t.billing_minutes()).sum();
        assert_eq!(sum, acc.totals(&key).unwrap().billing_minutes());

        let acc = accumulate(LISTING, StateFilter::any(), false);
        assert!(!acc.is_per_user());
        assert!(acc.user_totals(&key).is_none());
    }

    #[test]
    fn order_does_not_matter() {
        // Awkward durations, so that float summation would be order-dependent.
        let lines = vec![
            "1|a|p|q|COMPLETED|billing=7|601|x",
            "2|a|p|q|COMPLETED|billing=13|59|x",
            "3|b|p|q|COMPLETED|billing=3|1|x",
            "4|b|p|q|COMPLETED|billing=1000003|7|x",
            "5|a|p|q|COMPLETED|billing=11|3599|x",
        ];

        let reference = accumulate(&lines.join("\n"), StateFilter::any(), true);
        let key = AssocKey::new("p", "q");

        for perm in lines.iter().permutations(lines.len()) {
            let acc = accumulate(&perm.into_iter().join("\n"), StateFilter::any(), true);
            assert_eq!(acc.totals(&key), reference.totals(&key));
            assert_eq!(acc.user_totals(&key), reference.user_totals(&key));
        }
    }

    #[test]
    fn malformed_rows_are_fatal() {
        let mut acc = UsageAccumulator::new(StateFilter::any(), false);
        assert!(acc.add_listing("1|a|p|q|COMPLETED|billing|60|x\n").is_err());
        assert!(acc.add_listing("1|a|p|q|COMPLETED|billing=1|sixty|x\n").is_err());
        assert!(acc.add_listing("1|a|p|q|COMPLETED|billing=1|60\n").is_err());
        assert!(acc.add_listing("1|a|p|q|COMPLETED|billing=1|60|x|extra\n").is_err());
    }
}
