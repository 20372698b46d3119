//! CSV report for one session: header block, summary, then every ballot.

use csv::{Terminator, WriterBuilder};

use super::summary_rows;
use crate::voting::{ExportedVote, Tally, VotingSession};

const CRLF: &[u8] = b"\r\n";

/// Render the export document.
pub fn build_csv(
    session: &VotingSession,
    tally: &Tally,
    votes: &[ExportedVote],
) -> Result<String, csv::Error> {
    let mut out = section(Vec::new(), |w| {
        w.write_record(["Voting System Export"])?;
        w.write_record(["Question:", session.question.as_str()])?;
        w.write_record(["Session Start:", session.start_time.as_str()])?;
        w.write_record(["Session End:", session.end_time.as_str()])
    })?;
    out.extend_from_slice(CRLF);

    out = section(out, |w| {
        w.write_record(["=== SUMMARY ==="])?;
        w.write_record(["Option", "Label", "Count", "Percentage"])?;
        for row in summary_rows(tally) {
            w.write_record([
                row.option.as_str(),
                row.label.as_str(),
                row.count.to_string().as_str(),
                row.percentage.as_str(),
            ])?;
        }
        w.write_record(["", "TOTAL", tally.total.to_string().as_str(), ""])
    })?;
    out.extend_from_slice(CRLF);

    out = section(out, |w| {
        w.write_record(["=== DETAIL ==="])?;
        w.write_record(["Timestamp", "Option"])?;
        for vote in votes {
            w.write_record([vote.voted_at.as_str(), vote.option.as_str()])?;
        }
        Ok(())
    })?;

    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Append one block of records to `out`. Blocks are separated by bare CRLFs
/// between calls, since csv writes `""` for a zero-field record.
fn section<F>(out: Vec<u8>, write: F) -> Result<Vec<u8>, csv::Error>
where
    F: FnOnce(&mut csv::Writer<Vec<u8>>) -> Result<(), csv::Error>,
{
    let mut w = WriterBuilder::new()
        .flexible(true)
        .terminator(Terminator::CRLF)
        .from_writer(out);
    write(&mut w)?;
    w.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::{OptionCount, VoteOption};
    use std::collections::BTreeMap;

    fn session() -> VotingSession {
        VotingSession {
            id: 7,
            question: "Best lunch, really?".into(),
            option_a: "Pizza".into(),
            option_b: "Tacos".into(),
            option_c: None,
            option_d: None,
            start_time: "2025-09-15 09:00:00".into(),
            end_time: "2025-09-15 15:00:00".into(),
            created_at: "2025-09-14 10:00:00".into(),
            is_active: true,
        }
    }

    #[test]
    fn full_document_layout() {
        let mut counts = BTreeMap::new();
        counts.insert(
            VoteOption::A,
            OptionCount {
                label: "Pizza".into(),
                count: 1,
            },
        );
        counts.insert(
            VoteOption::B,
            OptionCount {
                label: "Tacos".into(),
                count: 1,
            },
        );
        let tally = Tally { counts, total: 2 };
        let votes = vec![
            ExportedVote {
                voted_at: "2025-09-15 09:05:00".into(),
                option: "A".into(),
            },
            ExportedVote {
                voted_at: "2025-09-15 09:06:00".into(),
                option: "B".into(),
            },
        ];

        let csv = build_csv(&session(), &tally, &votes).unwrap();
        let expected = "Voting System Export\r\n\
            Question:,\"Best lunch, really?\"\r\n\
            Session Start:,2025-09-15 09:00:00\r\n\
            Session End:,2025-09-15 15:00:00\r\n\
            \r\n\
            === SUMMARY ===\r\n\
            Option,Label,Count,Percentage\r\n\
            A,Pizza,1,50.0%\r\n\
            B,Tacos,1,50.0%\r\n\
            ,TOTAL,2,\r\n\
            \r\n\
            === DETAIL ===\r\n\
            Timestamp,Option\r\n\
            2025-09-15 09:05:00,A\r\n\
            2025-09-15 09:06:00,B\r\n";
        assert_eq!(csv, expected);
    }

    #[test]
    fn empty_session_still_has_sections() {
        let tally = Tally {
            counts: BTreeMap::new(),
            total: 0,
        };
        let csv = build_csv(&session(), &tally, &[]).unwrap();
        assert!(csv.contains(",TOTAL,0,\r\n"));
        assert!(csv.ends_with("Timestamp,Option\r\n"));
    }

    #[test]
    fn separators_are_truly_empty_rows() {
        let tally = Tally::default();
        let csv = build_csv(&session(), &tally, &[]).unwrap();
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "=== SUMMARY ===");
        assert_eq!(lines.iter().filter(|l| l.is_empty()).count(), 3);
        assert!(!csv.contains("\"\"\r\n"));
    }
}
