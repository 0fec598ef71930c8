//! Typed parsing of chat input
//!
//! Raw text is turned into a `Command` (anything starting with `/`) or into
//! an `Answer` for the stage the user is at. Token matching is
//! case-insensitive and ignores surrounding whitespace.

use crate::models::MainCategory;

use super::session::Stage;

/// Slash commands understood by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Cancel,
    Status,
    Unknown(String),
}

/// A stage-specific reading of a text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Category(MainCategory),
    /// true = employee paid, reimbursement pending
    Reimbursable(bool),
    /// None when the user skipped
    Project(Option<String>),
    /// None when the user said done/skip
    Notes(Option<String>),
    /// Not a valid answer for this stage
    Unrecognized,
}

/// Parse a slash command, tolerating the `@botname` suffix used in groups
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let word = rest.split_whitespace().next().unwrap_or("");
    let name = word.split('@').next().unwrap_or("").to_lowercase();

    Some(match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "cancel" => Command::Cancel,
        "status" => Command::Status,
        _ => Command::Unknown(name),
    })
}

/// Interpret a text message for the given stage
pub fn parse_answer(stage: &Stage, text: &str) -> Answer {
    let trimmed = text.trim();
    let token = trimmed.to_lowercase();

    match stage {
        Stage::AwaitingCategory => match token.as_str() {
            "p" | "personal" => Answer::Category(MainCategory::Personal),
            "b" | "business" => Answer::Category(MainCategory::Business),
            _ => Answer::Unrecognized,
        },
        Stage::AwaitingReimbursement => match token.as_str() {
            "y" | "yes" => Answer::Reimbursable(true),
            "n" | "no" => Answer::Reimbursable(false),
            _ => Answer::Unrecognized,
        },
        Stage::AwaitingProject => match token.as_str() {
            "" => Answer::Unrecognized,
            "skip" => Answer::Project(None),
            _ => Answer::Project(Some(trimmed.to_string())),
        },
        Stage::AwaitingNotes(_) => match token.as_str() {
            "" | "done" | "skip" => Answer::Notes(None),
            _ => Answer::Notes(Some(trimmed.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/cancel"), Some(Command::Cancel));
        assert_eq!(parse_command("  /CANCEL  "), Some(Command::Cancel));
        assert_eq!(parse_command("/start@expense_bot"), Some(Command::Start));
        assert_eq!(parse_command("/status now"), Some(Command::Status));
        assert_eq!(
            parse_command("/export"),
            Some(Command::Unknown("export".into()))
        );
        assert_eq!(parse_command("cancel"), None);
    }

    #[test]
    fn test_category_tokens() {
        let stage = Stage::AwaitingCategory;
        for text in ["p", "P", " personal ", "PERSONAL"] {
            assert_eq!(
                parse_answer(&stage, text),
                Answer::Category(MainCategory::Personal),
                "{text:?}"
            );
        }
        for text in ["b", "Business"] {
            assert_eq!(
                parse_answer(&stage, text),
                Answer::Category(MainCategory::Business)
            );
        }
        assert_eq!(parse_answer(&stage, "pers"), Answer::Unrecognized);
        assert_eq!(parse_answer(&stage, "p thanks"), Answer::Unrecognized);
        assert_eq!(parse_answer(&stage, "yes"), Answer::Unrecognized);
    }

    #[test]
    fn test_reimbursement_tokens() {
        let stage = Stage::AwaitingReimbursement;
        assert_eq!(parse_answer(&stage, "Y"), Answer::Reimbursable(true));
        assert_eq!(parse_answer(&stage, "yes"), Answer::Reimbursable(true));
        assert_eq!(parse_answer(&stage, "No"), Answer::Reimbursable(false));
        assert_eq!(parse_answer(&stage, "maybe"), Answer::Unrecognized);
    }

    #[test]
    fn test_project_free_text_and_skip() {
        let stage = Stage::AwaitingProject;
        assert_eq!(
            parse_answer(&stage, "  Acme Corp "),
            Answer::Project(Some("Acme Corp".into()))
        );
        assert_eq!(parse_answer(&stage, "SKIP"), Answer::Project(None));
        assert_eq!(parse_answer(&stage, "   "), Answer::Unrecognized);
    }

    #[test]
    fn test_notes_done_and_skip() {
        let stage = Stage::AwaitingNotes(Classification::Personal);
        assert_eq!(parse_answer(&stage, "done"), Answer::Notes(None));
        assert_eq!(parse_answer(&stage, "Skip"), Answer::Notes(None));
        assert_eq!(
            parse_answer(&stage, "Q1 travel"),
            Answer::Notes(Some("Q1 travel".into()))
        );
    }
}
