use chrono::Month;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt, path::Path, str::FromStr};

use crate::error::{Error, Result};

static PERIOD_RE: Lazy<Regex> = Lazy::new(|| {
    // "<Mon> <YYYY>", nothing else
    Regex::new(r"^([A-Za-z]{3}) (\d{4})$").expect("static period regex")
});

/// Reporting period of one batch: abbreviated month plus four-digit year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub month: Month,
    pub year: i32,
}

impl Period {
    /// Parse `"Jan 2020"` (month name case-insensitive).
    pub fn parse(name: &str) -> Result<Self> {
        let bad = || Error::PeriodFormat(name.to_string());
        let caps = PERIOD_RE.captures(name).ok_or_else(bad)?;
        let month = Month::from_str(&caps[1]).map_err(|_| bad())?;
        let year = caps[2].parse::<i32>().map_err(|_| bad())?;
        Ok(Self { month, year })
    }

    /// Period named by the immediate parent directory of `path`.
    pub fn from_source_path(path: &Path) -> Result<Self> {
        let dir = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(&dir)
    }

    /// Canonical month tag, `Jan`..`Dec`.
    pub fn month_tag(&self) -> &'static str {
        &self.month.name()[..3]
    }

    /// Year tag as stored, e.g. `"2020"`.
    pub fn year_tag(&self) -> String {
        format!("{:04}", self.year)
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.month_tag(), self.year_tag())
    }

    /// Chronological sort key.
    pub fn ordinal(&self) -> (i32, u32) {
        (self.year, self.month.number_from_month())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month_tag(), self.year_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_abbreviated_month_and_year() -> anyhow::Result<()> {
        let p = Period::parse("Jan 2020")?;
        assert_eq!(p.month, Month::January);
        assert_eq!(p.year, 2020);
        assert_eq!(p.label(), "Jan 2020");

        let lower = Period::parse("sep 2019")?;
        assert_eq!(lower.month_tag(), "Sep");
        Ok(())
    }

    #[test]
    fn rejects_everything_else() {
        for bad in [
            "January 2020",
            "Jan 20",
            "Jan  2020",
            "2020 Jan",
            "Foo 2020",
            "Jan 2020 copy",
            "",
        ] {
            let err = Period::parse(bad).unwrap_err();
            assert!(err.is_skip(), "{} should be a period format error", bad);
        }
    }

    #[test]
    fn derives_from_parent_directory() -> anyhow::Result<()> {
        let path = PathBuf::from("raw months/Feb 2021/household_income.csv");
        assert_eq!(Period::from_source_path(&path)?.label(), "Feb 2021");

        let bare = PathBuf::from("household_income.csv");
        assert!(Period::from_source_path(&bare).is_err());
        Ok(())
    }

    #[test]
    fn orders_chronologically() -> anyhow::Result<()> {
        let mut ps = vec![
            Period::parse("Feb 2020")?,
            Period::parse("Dec 2019")?,
            Period::parse("Jan 2020")?,
        ];
        ps.sort_by_key(Period::ordinal);
        let labels: Vec<String> = ps.iter().map(Period::label).collect();
        assert_eq!(labels, vec!["Dec 2019", "Jan 2020", "Feb 2020"]);
        Ok(())
    }
}
