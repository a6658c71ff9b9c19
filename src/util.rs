// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Miscellaneous utility functions.

 */

use chrono::NaiveDate;
use colorio::ColorIo;
use failure::Error;
use users;


/// Date formats accepted for `--start`: ISO and the `sacct`-style US forms.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y"];


/// Parse a date given on the command line.
pub fn parse_date(text: &str) -> Result<NaiveDate, Error> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text.trim(), fmt) {
            return Ok(d);
        }
    }

    Err(format_err!("cannot parse \"{}\" as a date (try YYYY-MM-DD)", text))
}


/// The name of the user running this program, if it can be figured out.
pub fn current_username() -> Option<String> {
    users::get_current_username().and_then(|n| n.into_string().ok())
}


/// Print a remaining-balance percentage with affective color, right-aligned
/// in `width` columns.
pub fn colorize_percent(cio: &mut ColorIo, percent: Option<f64>, width: usize) {
    match percent {
        None => {
            cprint!(cio, pl, "{:>1$}", "", width);
        },

        Some(p) if p < 10. => {
            cprint!(cio, red, "{:>1$.2}", p, width);
        },

        Some(p) if p < 25. => {
            cprint!(cio, yellow, "{:>1$.2}", p, width);
        },

        Some(p) => {
            cprint!(cio, green, "{:>1$.2}", p, width);
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_formats() {
        let d = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        assert_eq!(parse_date("2019-01-01").unwrap(), d);
        assert_eq!(parse_date("01/01/19").unwrap(), d);
        assert_eq!(parse_date("01/01/2019").unwrap(), d);
        assert!(parse_date("yesterday").is_err());
        assert!(parse_date("2019-02-30").is_err());
    }
}
