//! Voting domain: sessions, cards, ballots, and vote tokens.

pub mod model;
pub mod schedule;
pub mod token;

pub use model::{
    BallotOption, Card, ExportedVote, NewSession, OptionCount, Tally, VoteOption, VotingSession,
};
pub use token::{TokenSigner, VoteClaims};
