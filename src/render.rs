// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Rendering balance reports.

Three formats are supported: a human-friendly table, and CSV and JSON for
feeding into other tools. Absent numbers are rendered as blanks (or `null`),
never as zero.

*/

use colorio::ColorIo;
use csv;
use failure::Error;
use itertools::Itertools;
use serde::{Serialize, Serializer};
use serde_json;
use slurm_acct::{Allocation, BalanceRow, DefaultQos, SuUnit};
use std::cmp;
use std::io::Write;
use std::str::FromStr;
use util;


/// How unlimited allocations are spelled.
pub const UNLIMITED: &str = "unlimited";


/// The available report formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format_err!("unrecognized output format \"{}\" (expected table, csv or json)", s)),
        }
    }
}


fn format_amount(amount: Option<f64>) -> String {
    amount.map(|a| format!("{:.2}", a)).unwrap_or_default()
}

fn format_allocation(alloc: Allocation) -> String {
    match alloc {
        Allocation::Unlimited => UNLIMITED.to_owned(),
        Allocation::Bounded(a) => format!("{:.2}", a),
    }
}


/// The text cells of one table line.
struct TableLine {
    account: String,
    qos: String,
    user: String,
    allocation: String,
    remaining: String,
    remaining_percent: Option<f64>,
    used: String,
    description: String,
}

impl<'a> From<&'a BalanceRow> for TableLine {
    fn from(row: &'a BalanceRow) -> Self {
        let mut qos = row.qos.clone();

        if row.default_qos == DefaultQos::Yes {
            qos.push('*');
        }

        TableLine {
            account: row.account.clone(),
            qos,
            user: row.user.clone().unwrap_or_default(),
            allocation: format_allocation(row.allocation),
            remaining: format_amount(row.remaining),
            remaining_percent: row.remaining_percent,
            used: format_amount(row.used),
            description: row.description.clone(),
        }
    }
}


/// Display width of a cell, counted in characters as the padding in
/// `format!` is.
fn text_width(text: &str) -> usize {
    text.chars().count()
}

fn column_width<'a, I: Iterator<Item = &'a str>>(header: &str, cells: I) -> usize {
    cells.map(text_width).fold(text_width(header), cmp::max)
}


/// Render the report as a table.
///
/// `per_user` adds a column for the user of each row.
pub fn print_table(cio: &mut ColorIo, title: &str, rows: &[BalanceRow], unit: SuUnit, per_user: bool) {
    let lines: Vec<TableLine> = rows.iter().map(TableLine::from).collect();

    let h_alloc = format!("Allocation ({})", unit);
    let h_remaining = format!("Remaining ({})", unit);
    let h_used = format!("Used ({})", unit);
    let h_percent = "Remaining %";

    let percents: Vec<String> = lines.iter().map(|l| format_amount(l.remaining_percent)).collect();

    let w_account = column_width("Account", lines.iter().map(|l| l.account.as_str()));
    let w_qos = column_width("QoS", lines.iter().map(|l| l.qos.as_str()));
    let w_user = column_width("User", lines.iter().map(|l| l.user.as_str()));
    let w_alloc = column_width(&h_alloc, lines.iter().map(|l| l.allocation.as_str()));
    let w_remaining = column_width(&h_remaining, lines.iter().map(|l| l.remaining.as_str()));
    let w_percent = column_width(h_percent, percents.iter().map(|p| p.as_str()));
    let w_used = column_width(&h_used, lines.iter().map(|l| l.used.as_str()));
    let w_description = column_width("Description", lines.iter().map(|l| l.description.as_str()));

    let mut total = w_account + w_qos + w_alloc + w_remaining + w_percent + w_used + w_description + 2 * 6;

    if per_user {
        total += w_user + 2;
    }

    cprintln!(cio, hl, "{}", title);
    cprintln!(cio, pl, "");

    cprint!(cio, hl, "{:<1$}  {2:<3$}", "Account", w_account, "QoS", w_qos);
    if per_user {
        cprint!(cio, hl, "  {:<1$}", "User", w_user);
    }
    cprint!(cio, hl, "  {:>1$}  {2:>3$}", h_alloc, w_alloc, h_remaining, w_remaining);
    cprintln!(cio, hl, "  {:>1$}  {2:>3$}  Description", h_percent, w_percent, h_used, w_used);
    cprintln!(cio, pl, "{}", "-".repeat(total));

    for line in &lines {
        cprint!(cio, pl, "{:<1$}  {2:<3$}", line.account, w_account, line.qos, w_qos);
        if per_user {
            cprint!(cio, pl, "  {:<1$}", line.user, w_user);
        }
        cprint!(cio, pl, "  {:>1$}  {2:>3$}  ", line.allocation, w_alloc, line.remaining, w_remaining);
        util::colorize_percent(cio, line.remaining_percent, w_percent);
        cprintln!(cio, pl, "  {:>1$}  {2}", line.used, w_used, line.description);
    }

    if lines.is_empty() {
        cprintln!(cio, pl, "(no matching associations)");
    }

    if rows.iter().any(|r| r.default_qos == DefaultQos::Yes) {
        cprintln!(cio, pl, "");
        cprintln!(cio, pl, "* default QoS");
    }
}


/// The CSV column names, in order.
fn csv_header(per_user: bool) -> Vec<&'static str> {
    let mut header = vec!["account", "qos"];

    if per_user {
        header.push("user");
    }

    header.extend(&["description", "unit", "allocation", "remaining", "remaining_percent", "used"]);
    header
}


/// Render the report as CSV.
pub fn write_csv<W: Write>(dest: W, rows: &[BalanceRow], per_user: bool) -> Result<(), Error> {
    let mut w = csv::Writer::from_writer(dest);
    w.write_record(&csv_header(per_user))?;

    for row in rows {
        let mut record = vec![row.account.clone(), row.qos.clone()];

        if per_user {
            record.push(row.user.clone().unwrap_or_default());
        }

        record.push(row.description.clone());
        record.push(row.unit.label().to_owned());
        record.push(format_allocation(row.allocation));
        record.push(format_amount(row.remaining));
        record.push(format_amount(row.remaining_percent));
        record.push(format_amount(row.used));
        w.write_record(&record)?;
    }

    w.flush()?;
    Ok(())
}


/// An allocation as JSON: a number, or the string "unlimited".
struct JsonAllocation(Allocation);

impl Serialize for JsonAllocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Allocation::Unlimited => serializer.serialize_str(UNLIMITED),
            Allocation::Bounded(a) => serializer.serialize_f64(a),
        }
    }
}

#[derive(Serialize)]
struct JsonRow<'a> {
    account: &'a str,
    qos: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    description: &'a str,
    unit: &'static str,
    allocation: JsonAllocation,
    remaining: Option<f64>,
    remaining_percent: Option<f64>,
    used: Option<f64>,
}

impl<'a> From<&'a BalanceRow> for JsonRow<'a> {
    fn from(row: &'a BalanceRow) -> Self {
        JsonRow {
            account: &row.account,
            qos: &row.qos,
            user: row.user.as_ref().map(|u| u.as_str()),
            description: &row.description,
            unit: row.unit.label(),
            allocation: JsonAllocation(row.allocation),
            remaining: row.remaining,
            remaining_percent: row.remaining_percent,
            used: row.used,
        }
    }
}


/// Render the report as a JSON array of objects.
pub fn write_json<W: Write>(mut dest: W, rows: &[BalanceRow]) -> Result<(), Error> {
    let records: Vec<JsonRow> = rows.iter().map(JsonRow::from).collect();
    serde_json::to_writer_pretty(&mut dest, &records)?;
    writeln!(dest)?;
    Ok(())
}


/// A title for the report, naming whose balances are shown.
pub fn title(users: &[String]) -> String {
    match users.len() {
        0 => "Account balances".to_owned(),
        1 => format!("Account balances for user: {}", users[0]),
        _ => format!("Account balances for users: {}", users.iter().join(", ")),
    }
}
