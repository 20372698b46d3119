//! Result export — shared summary rows plus the CSV download.
//!
//! Ballots are exported as `(timestamp, option)` only; card UIDs never leave
//! the database.

pub mod csv_export;

use chrono::NaiveDate;
use serde::Serialize;

use crate::voting::{Tally, VoteOption};

pub use csv_export::build_csv;

/// One line of the per-option summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub option: VoteOption,
    pub label: String,
    pub count: i64,
    pub percentage: String,
}

/// Summary rows in option order (A..D), one per offered option.
pub fn summary_rows(tally: &Tally) -> Vec<SummaryRow> {
    tally
        .counts
        .iter()
        .map(|(option, c)| SummaryRow {
            option: *option,
            label: c.label.clone(),
            count: c.count,
            percentage: tally.percentage(*option),
        })
        .collect()
}

/// `votes_<question prefix>_<YYYYMMDD>.csv`
pub fn csv_filename(question: &str, date: NaiveDate) -> String {
    let prefix: String = question.chars().take(30).collect();
    format!("votes_{}_{}.csv", prefix.replace(' ', "_"), date.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::OptionCount;
    use std::collections::BTreeMap;

    fn tally(counts: &[(VoteOption, &str, i64)]) -> Tally {
        let counts: BTreeMap<_, _> = counts
            .iter()
            .map(|(o, label, count)| {
                (
                    *o,
                    OptionCount {
                        label: label.to_string(),
                        count: *count,
                    },
                )
            })
            .collect();
        let total = counts.values().map(|c| c.count).sum();
        Tally { counts, total }
    }

    #[test]
    fn rows_carry_percentages() {
        let rows = summary_rows(&tally(&[
            (VoteOption::A, "Pizza", 3),
            (VoteOption::B, "Tacos", 1),
        ]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].percentage, "75.0%");
        assert_eq!(rows[1].percentage, "25.0%");
        assert_eq!(rows[1].label, "Tacos");
    }

    #[test]
    fn zero_total_gives_zero_percent() {
        let rows = summary_rows(&tally(&[(VoteOption::A, "Pizza", 0), (VoteOption::B, "Tacos", 0)]));
        assert!(rows.iter().all(|r| r.percentage == "0.0%"));
    }

    #[test]
    fn filename_truncates_and_underscores() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
        assert_eq!(csv_filename("Best lunch?", date), "votes_Best_lunch?_20250915.csv");
        assert_eq!(
            csv_filename("What should the school theme be for spring week", date),
            "votes_What_should_the_school_theme_b_20250915.csv"
        );
    }
}
