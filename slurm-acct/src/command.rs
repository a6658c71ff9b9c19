// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Running the Slurm accounting commands.

We ask `sacctmgr` and `sacct` for "parsable" (`-P`), headerless output with
exactly the columns we need, and hand the text to the parsers in the other
modules. The commands run one after another, since the usage query is
restricted to the QoS that the first two queries turn up.

The executables can be overridden through the environment, which is handy
for site wrappers and for testing with fake tools.

*/

use assoc::{self, Associations, ASSOC_FIELDS};
use chrono::NaiveDate;
use errors::{AcctError, ExitCode};
use failure::Error;
use itertools::Itertools;
use qos::{self, QosCatalog, QOS_FIELDS};
use std::collections::HashSet;
use std::env;
use std::ffi::{OsStr, OsString};
use std::process::Command;
use usage::{StateFilter, UsageAccumulator, USAGE_FIELDS};


/// Environment variable naming the `sacct` executable to run.
pub const SACCT_ENV: &str = "SBALANCE_SACCT";

/// Environment variable naming the `sacctmgr` executable to run.
pub const SACCTMGR_ENV: &str = "SBALANCE_SACCTMGR";


/// The date that accounting started on our cluster; usage before it is
/// never charged.
pub fn service_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).expect("service start date is valid")
}


/// Parameters of the `sacct` usage query.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageQuery {
    /// Only jobs from this day onward are counted.
    pub start: NaiveDate,

    /// Only jobs in these states are counted.
    pub states: StateFilter,

    /// Only jobs under these QoS are counted.
    pub qos: Vec<String>,
}

impl Default for UsageQuery {
    fn default() -> Self {
        UsageQuery {
            start: service_start_date(),
            states: StateFilter::finished(),
            qos: Vec::new(),
        }
    }
}

impl UsageQuery {
    /// Restrict the query to the budget-bearing QoS of some associations.
    pub fn for_associations(mut self, assocs: &Associations) -> Self {
        self.qos = assocs.budget_qos_names().into_iter().map(|q| q.to_owned()).collect();
        self
    }

    /// The arguments to pass to `sacct`.
    pub fn sacct_args(&self) -> Vec<String> {
        let mut args = vec![
            "-aPX".to_owned(),
            "--noheader".to_owned(),
            "--noconvert".to_owned(),
            format!("--format={}", USAGE_FIELDS.join(",")),
        ];

        if let Some(states) = self.states.to_sacct_arg() {
            args.push(format!("--state={}", states));
        }

        args.push(format!("--starttime={}", self.start.format("%Y-%m-%d")));

        if !self.qos.is_empty() {
            args.push("-q".to_owned());
            args.push(self.qos.iter().join(","));
        }

        args
    }
}


/// The accounting commands to run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlurmCommands {
    pub sacct: OsString,
    pub sacctmgr: OsString,
}

impl Default for SlurmCommands {
    fn default() -> Self {
        SlurmCommands {
            sacct: "sacct".into(),
            sacctmgr: "sacctmgr".into(),
        }
    }
}

impl SlurmCommands {
    /// The standard commands, unless overridden by `$SBALANCE_SACCT` or
    /// `$SBALANCE_SACCTMGR`.
    pub fn from_env() -> Self {
        let mut cmds = SlurmCommands::default();

        if let Some(p) = env::var_os(SACCT_ENV) {
            cmds.sacct = p;
        }

        if let Some(p) = env::var_os(SACCTMGR_ENV) {
            cmds.sacctmgr = p;
        }

        cmds
    }

    /// Get the output of `sacctmgr show qos`.
    pub fn qos_listing(&self) -> Result<String, Error> {
        let format = format!("format={}", QOS_FIELDS.join(","));
        run(&self.sacctmgr, &["--noheader", "show", "qos", "-P", format.as_str()])
    }

    /// Get the output of `sacctmgr show assoc`.
    pub fn assoc_listing(&self) -> Result<String, Error> {
        let format = format!("format={}", ASSOC_FIELDS.join(","));
        run(&self.sacctmgr, &["--noheader", "show", "assoc", "-P", format.as_str()])
    }

    /// Get the output of `sacct` for a usage query.
    pub fn usage_listing(&self, query: &UsageQuery) -> Result<String, Error> {
        run(&self.sacct, &query.sacct_args())
    }

    /// Load the catalog of budget-bearing QoS.
    pub fn load_catalog(&self) -> Result<QosCatalog, Error> {
        qos::parse_qos_listing(&self.qos_listing()?)
    }

    /// Load the associations of the given users, or of everyone.
    pub fn load_associations(&self, catalog: &QosCatalog, users: Option<&HashSet<String>>) -> Result<Associations, Error> {
        assoc::parse_assoc_listing(&self.assoc_listing()?, catalog, users)
    }

    /// Load and sum up the usage matching `query`.
    ///
    /// If the query names no QoS, nothing could be charged to a budget, so
    /// `sacct` isn't run at all.
    pub fn load_usage(&self, query: &UsageQuery, per_user: bool) -> Result<UsageAccumulator, Error> {
        let mut acc = UsageAccumulator::new(query.states.clone(), per_user);

        if query.qos.is_empty() {
            info!("no budget-bearing QoS to query usage for");
            return Ok(acc);
        }

        acc.add_listing(&self.usage_listing(query)?)?;
        Ok(acc)
    }
}


/// Run a command and capture its standard output.
fn run<S: AsRef<str>>(program: &OsStr, args: &[S]) -> Result<String, Error> {
    let cmdline = format!("{} {}", program.to_string_lossy(), args.iter().map(|a| a.as_ref()).join(" "));
    info!("[SLURM]: {}", cmdline);

    let output = Command::new(program)
        .args(args.iter().map(|a| a.as_ref()))
        .output()
        .map_err(|e| AcctError::CommandLaunch { command: cmdline.clone(), cause: e })?;

    if !output.status.success() {
        let code = match output.status.code() {
            Some(c) => ExitCode::Code(c),
            None => ExitCode::Signal,
        };

        return Err(AcctError::CommandFailed {
            command: cmdline,
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        }.into());
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    trace!("{} bytes of output", stdout.len());
    Ok(stdout)
}
