//! Text command parsing for the UDP protocol
//!
//! Inbound datagrams carry a whitespace-trimmed text payload of the form
//! `VERB [arg ...]`. Parsing never fails: anything that is not a recognized
//! verb (including an empty payload) becomes [`Verb::Unknown`] and is left
//! to the dispatcher's default echo handling. Argument validation also
//! happens in the dispatcher, so error messages can name the command that
//! was missing an argument.

/// Recognized protocol verbs.
///
/// A closed enum so that the dispatcher's `match` is exhaustive and adding
/// a verb is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Liveness probe, answered with a fixed string.
    Status,
    /// Terminates the process ungracefully (orchestration testing).
    Crash,
    /// Requests a graceful shutdown via the orchestration sidecar.
    Exit,
    /// Records a win and grants currency for the given user.
    Win,
    /// Records a loss for the given user.
    Lose,
    /// Anything else, echoed back with an ACK envelope.
    Unknown,
}

/// One parsed inbound command: verb, argument tokens, and the raw trimmed
/// text (kept for the default echo path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub args: Vec<String>,
    pub raw: String,
}

impl Command {
    /// Parses a raw datagram payload into a command.
    ///
    /// Decodes lossily as UTF-8, trims surrounding whitespace, and splits
    /// on single spaces. The first token selects the verb (case-sensitive,
    /// upper-case by convention); the rest become arguments verbatim.
    pub fn parse(buf: &[u8]) -> Command {
        let raw = String::from_utf8_lossy(buf).trim().to_string();
        let mut tokens = raw.split(' ');

        let verb = match tokens.next().unwrap_or("") {
            "STATUS" => Verb::Status,
            "CRASH" => Verb::Crash,
            "EXIT" => Verb::Exit,
            "WIN" => Verb::Win,
            "LOSE" => Verb::Lose,
            _ => Verb::Unknown,
        };
        let args = tokens.map(str::to_string).collect();

        Command { verb, args, raw }
    }
}
