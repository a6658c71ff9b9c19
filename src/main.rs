// Copyright 2018 Peter Williams <peter@newton.cx>
// Licensed under the MIT License.

//! The main CLI driver logic.

extern crate chrono;
extern crate csv;
extern crate env_logger;
#[macro_use] extern crate failure;
extern crate itertools;
#[macro_use] extern crate log;
extern crate serde;
#[macro_use] extern crate serde_derive;
extern crate serde_json;
extern crate slurm_acct;
#[macro_use] extern crate structopt;
extern crate tempfile;
extern crate termcolor;
extern crate users;

use chrono::NaiveDate;
use failure::Error;
use log::LevelFilter;
use slurm_acct::balance::compute_balances;
use slurm_acct::command::service_start_date;
use slurm_acct::{BalanceOptions, SlurmCommands, StateFilter, SuUnit, UsageQuery};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

#[macro_use] mod colorio; // keep first to get macros
mod output;
mod render;
mod util;

use colorio::ColorIo;
use output::Destination;
use render::OutputFormat;


#[derive(Debug, StructOpt)]
#[structopt(name = "sbalance", about = "Show the remaining Slurm billing balance of your accounts.")]
struct SbalanceCli {
    #[structopt(short = "k", conflicts_with = "mega")]
    /// Report amounts in thousands of SUs.
    kilo: bool,

    #[structopt(short = "m")]
    /// Report amounts in millions of SUs.
    mega: bool,

    #[structopt(short = "f", long = "format", default_value = "table")]
    /// The report format: table, csv, or json.
    format: OutputFormat,

    #[structopt(short = "s", long = "start", parse(try_from_str = util::parse_date))]
    /// Count usage since this date (YYYY-MM-DD or MM/DD/YY) [default: 2019-01-01].
    start: Option<NaiveDate>,

    #[structopt(short = "o", long = "output", parse(from_os_str))]
    /// Save the report to this file instead of printing it.
    output: Option<PathBuf>,

    #[structopt(long = "ignore-root")]
    /// Leave out the root account.
    ignore_root: bool,

    #[structopt(short = "d", long = "detail")]
    /// Break usage down by user.
    detail: bool,

    #[structopt(short = "u", long = "user", number_of_values = 1)]
    /// Only report on this user's associations (may be repeated).
    users: Vec<String>,

    #[structopt(long = "state", default_value = "CD,F,TO")]
    /// Count jobs in these states (comma-separated codes, or "all").
    states: StateFilter,

    #[structopt(short = "v", parse(from_occurrences))]
    /// Log more details to standard error (may be repeated).
    verbose: u8,
}

impl SbalanceCli {
    fn unit(&self) -> SuUnit {
        if self.mega {
            SuUnit::MegaSu
        } else if self.kilo {
            SuUnit::KiloSu
        } else {
            SuUnit::Su
        }
    }

    /// The users whose associations are wanted, or None for everyone.
    fn user_filter(&self) -> Option<HashSet<String>> {
        if self.users.is_empty() {
            None
        } else {
            Some(self.users.iter().cloned().collect())
        }
    }

    /// The users to name in the report title: the ones asked for, or else
    /// whoever is running us.
    fn title_users(&self) -> Vec<String> {
        if !self.users.is_empty() {
            return self.users.clone();
        }

        util::current_username().into_iter().collect()
    }

    fn init_logging(&self) {
        let level = match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut builder = env_logger::Builder::new();
        builder.filter_level(level).format_timestamp(None);

        if let Ok(filters) = env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }

        let _r = builder.try_init();
    }

    fn cli(self, dest: &Destination, cio: &mut ColorIo) -> Result<i32, Error> {
        let user_set = self.user_filter();
        let cmds = SlurmCommands::from_env();

        let catalog = cmds.load_catalog()?;
        debug!("{} budget-bearing QoS in the catalog", catalog.len());

        let assocs = cmds.load_associations(&catalog, user_set.as_ref())?;
        debug!("{} associations", assocs.len());

        let query = UsageQuery {
            start: self.start.unwrap_or_else(service_start_date),
            states: self.states.clone(),
            qos: Vec::new(),
        }.for_associations(&assocs);

        let usage = cmds.load_usage(&query, self.detail)?;
        debug!("usage recorded against {} account/QoS pairs", usage.len());

        let opts = BalanceOptions {
            unit: self.unit(),
            ignore_root: self.ignore_root,
            per_user: self.detail,
        };

        let rows = compute_balances(&assocs, &usage, &opts);

        match self.format {
            OutputFormat::Table => {
                let title = render::title(&self.title_users());
                render::print_table(cio, &title, &rows, opts.unit, opts.per_user);
            },

            OutputFormat::Csv => {
                render::write_csv(cio.report_writer(), &rows, opts.per_user)?;
            },

            OutputFormat::Json => {
                render::write_json(cio.report_writer(), &rows)?;
            },
        }

        dest.write(cio.report())?;
        Ok(0)
    }
}


fn main() {
    let program = SbalanceCli::from_args();
    program.init_logging();

    let dest = Destination::new(program.output.clone());
    let mut cio = ColorIo::new(dest.buffer());

    process::exit(match program.cli(&dest, &mut cio) {
        Ok(code) => code,

        Err(e) => {
            cio.print_error(e);
            1
        },
    });
}


#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> SbalanceCli {
        let mut argv = vec!["sbalance"];
        argv.extend(args);
        SbalanceCli::from_iter_safe(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.unit(), SuUnit::Su);
        assert_eq!(cli.format, OutputFormat::Table);
        assert_eq!(cli.start, None);
        assert_eq!(cli.states, StateFilter::finished());
        assert!(!cli.detail);
        assert_eq!(cli.user_filter(), None);
        assert_eq!(cli.title_users(), util::current_username().into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn flags() {
        let cli = parse(&["-k", "-f", "json", "-s", "2020-06-01", "-u", "alice", "-u", "bob", "--state", "all", "-vv"]);
        assert_eq!(cli.unit(), SuUnit::KiloSu);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.start, NaiveDate::from_ymd_opt(2020, 6, 1));
        let expected: HashSet<String> = vec!["alice".to_owned(), "bob".to_owned()].into_iter().collect();
        assert_eq!(cli.user_filter(), Some(expected));
        assert_eq!(cli.title_users(), vec!["alice", "bob"]);
        assert_eq!(cli.states, StateFilter::any());
        assert_eq!(cli.verbose, 2);

        assert_eq!(parse(&["-m"]).unit(), SuUnit::MegaSu);
    }

    #[test]
    fn conflicts() {
        assert!(SbalanceCli::from_iter_safe(&["sbalance", "-k", "-m"]).is_err());
        assert!(SbalanceCli::from_iter_safe(&["sbalance", "-f", "xml"]).is_err());
        assert!(SbalanceCli::from_iter_safe(&["sbalance", "--state", "XX"]).is_err());
        assert!(SbalanceCli::from_iter_safe(&["sbalance", "-s", "soon"]).is_err());
    }
}
