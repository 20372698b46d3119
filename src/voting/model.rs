//! Voting data model — sessions, cards, ballot options, and tallies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One of the up to four answers a session can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VoteOption {
    A,
    B,
    C,
    D,
}

impl VoteOption {
    pub const ALL: [VoteOption; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl std::fmt::Display for VoteOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VoteOption {
    type Err = String;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            other => Err(format!("Unknown option: {other}")),
        }
    }
}

/// A scheduled voting session (one question, 2–4 options).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: i64,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: Option<String>,
    pub option_d: Option<String>,
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub start_time: String,
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub end_time: String,
    pub created_at: String,
    pub is_active: bool,
}

impl VotingSession {
    /// Label for `option`, or `None` if the session does not offer it.
    pub fn label(&self, option: VoteOption) -> Option<&str> {
        match option {
            VoteOption::A => Some(self.option_a.as_str()),
            VoteOption::B => Some(self.option_b.as_str()),
            VoteOption::C => self.option_c.as_deref().filter(|s| !s.is_empty()),
            VoteOption::D => self.option_d.as_deref().filter(|s| !s.is_empty()),
        }
    }

    /// Offered options in display order.
    pub fn options(&self) -> Vec<BallotOption> {
        VoteOption::ALL
            .iter()
            .filter_map(|&key| {
                self.label(key).map(|label| BallotOption {
                    key,
                    label: label.to_string(),
                })
            })
            .collect()
    }

    pub fn offers(&self, option: VoteOption) -> bool {
        self.label(option).is_some()
    }
}

/// A `(key, label)` pair as shown on the ballot screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotOption {
    pub key: VoteOption,
    pub label: String,
}

/// Fields for creating or editing a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewSession {
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: Option<String>,
    pub option_d: Option<String>,
    pub start_time: String,
    pub end_time: String,
}

impl NewSession {
    /// Trim every field; blank optional labels become `None`.
    pub fn normalized(self) -> Self {
        fn opt(s: Option<String>) -> Option<String> {
            s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            question: self.question.trim().to_string(),
            option_a: self.option_a.trim().to_string(),
            option_b: self.option_b.trim().to_string(),
            option_c: opt(self.option_c),
            option_d: opt(self.option_d),
            start_time: self.start_time.trim().to_string(),
            end_time: self.end_time.trim().to_string(),
        }
    }

    /// Question, A, B and both times are mandatory.
    pub fn has_required_fields(&self) -> bool {
        [
            &self.question,
            &self.option_a,
            &self.option_b,
            &self.start_time,
            &self.end_time,
        ]
        .iter()
        .all(|s| !s.trim().is_empty())
    }
}

/// An enrolled NFC card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    /// Uppercase hex bytes joined by `:`.
    pub uid: String,
    pub label: Option<String>,
    pub enrolled_at: String,
    pub is_active: bool,
}

/// An anonymous ballot row, as exported. Never carries a card UID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedVote {
    pub voted_at: String,
    pub option: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionCount {
    pub label: String,
    pub count: i64,
}

/// Per-option vote counts for one session. Options with zero votes are included.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    pub counts: BTreeMap<VoteOption, OptionCount>,
    pub total: i64,
}

impl Tally {
    /// Build from raw `(option, count)` rows; rows for options the session
    /// does not offer are dropped.
    pub fn from_rows(session: &VotingSession, rows: &[(String, i64)]) -> Self {
        let mut counts = BTreeMap::new();
        for ballot in session.options() {
            let count = rows
                .iter()
                .filter(|(opt, _)| opt.as_str() == ballot.key.as_str())
                .map(|(_, n)| *n)
                .sum();
            counts.insert(
                ballot.key,
                OptionCount {
                    label: ballot.label,
                    count,
                },
            );
        }
        let total = counts.values().map(|c| c.count).sum();
        Self { counts, total }
    }

    /// Share of the total, formatted `"12.5%"`; `"0.0%"` when nobody voted.
    pub fn percentage(&self, option: VoteOption) -> String {
        let count = self.counts.get(&option).map(|c| c.count).unwrap_or(0);
        if self.total > 0 {
            format!("{:.1}%", count as f64 / self.total as f64 * 100.0)
        } else {
            "0.0%".to_string()
        }
    }
}
