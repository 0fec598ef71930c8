//! Reply texts sent back to the chat user

use crate::ai::ExtractionError;
use crate::models::{CandidateExpense, Classification, StoredRecord};

/// Items shown when presenting a receipt
const MAX_ITEMS_SHOWN: usize = 5;

pub const WELCOME: &str = "👋 Welcome to ExpenseFlow Bot!

Send me a receipt photo or PDF and I'll:
✅ Extract merchant, amount, date and items using AI
✅ Ask whether it's Personal or Business
✅ For Business: ask about reimbursement and project
✅ Save it to your expense tracker

Send several receipts at once and I'll go through them one by one.
/status shows how many are waiting, /cancel discards them all.";

pub const CATEGORY_PROMPT: &str = "Is this expense Personal or Business?\nReply P (Personal) or B (Business).";

pub const REIMBURSEMENT_PROMPT: &str =
    "💼 Business expense. Did you pay for it yourself and need reimbursement?\nReply Y (Yes, reimbursement pending) or N (No, company paid).";

pub const PROJECT_PROMPT: &str =
    "📁 Which project or client is this for?\nType the name, or reply skip.";

pub const NOTES_PROMPT: &str = "📝 Any notes to add?\nType them, or reply done to save without notes.";

pub const NO_PENDING: &str =
    "🤷 No pending receipt. Send a receipt photo or PDF to get started.";

pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel, no receipts are pending.";

pub const COMPLETE: &str = "🎉 All receipts processed!";

pub const PROCESSING: &str = "⏳ Processing your receipt...";

pub fn reprompt(base: &str) -> String {
    format!("❓ Sorry, I didn't get that.\n{}", base)
}

pub fn format_amount(currency: &str, amount: f64) -> String {
    format!("{} {:.2}", currency, amount)
}

fn format_date(candidate_date: Option<chrono::NaiveDate>) -> String {
    candidate_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Receipt summary followed by the category question
pub fn present(candidate: &CandidateExpense, remaining: usize) -> String {
    let mut text = String::from("🧾 Receipt details\n\n");
    text.push_str(&format!("🏪 Merchant: {}\n", candidate.merchant));
    text.push_str(&format!(
        "💰 Amount: {}\n",
        format_amount(&candidate.currency, candidate.amount)
    ));
    text.push_str(&format!("📅 Date: {}\n", format_date(candidate.date)));
    text.push_str(&format!(
        "📂 Category: {}\n",
        candidate.category.as_deref().unwrap_or("Other")
    ));

    if !candidate.items.is_empty() {
        text.push_str("\n🛒 Items:\n");
        for item in candidate.items.iter().take(MAX_ITEMS_SHOWN) {
            match item.price {
                Some(price) => text.push_str(&format!("  • {} ({:.2})\n", item.name, price)),
                None => text.push_str(&format!("  • {}\n", item.name)),
            }
        }
        if candidate.items.len() > MAX_ITEMS_SHOWN {
            text.push_str(&format!(
                "  … and {} more\n",
                candidate.items.len() - MAX_ITEMS_SHOWN
            ));
        }
    }

    if remaining > 1 {
        text.push_str(&format!("\n({} more queued after this one)\n", remaining - 1));
    }

    text.push('\n');
    text.push_str(CATEGORY_PROMPT);
    text
}

pub fn queued(candidate: &CandidateExpense, queue_len: usize) -> String {
    format!(
        "📥 Queued {} ({}). {} receipts pending, I'll ask about it after the current one.",
        candidate.merchant,
        format_amount(&candidate.currency, candidate.amount),
        queue_len
    )
}

pub fn saved(candidate: &CandidateExpense, classification: &Classification, notes: Option<&str>) -> String {
    let mut text = format!(
        "✅ Expense saved!\n\n🏪 {}\n💰 {}\n📅 {}\n🏷️ {}",
        candidate.merchant,
        format_amount(&candidate.currency, candidate.amount),
        format_date(candidate.date),
        classification.main_category()
    );
    if let Classification::Business { .. } = classification {
        text.push_str(&format!(
            "\n💳 Reimbursement: {}\n📁 Project: {}",
            classification.reimbursement(),
            classification.project()
        ));
    }
    if let Some(notes) = notes {
        text.push_str(&format!("\n📝 {}", notes));
    }
    text
}

pub fn duplicate(candidate: &CandidateExpense, existing: Option<&StoredRecord>) -> String {
    let mut text = format!(
        "⚠️ Duplicate receipt: {} {} on {} is already saved",
        candidate.merchant,
        format_amount(&candidate.currency, candidate.amount),
        format_date(candidate.date)
    );
    if let Some(existing) = existing {
        text.push_str(&format!(
            " (record #{}, added {})",
            existing.id,
            existing.created_at.format("%Y-%m-%d %H:%M")
        ));
    }
    text.push_str(". Skipped.");
    text
}

pub fn save_failed(candidate: &CandidateExpense) -> String {
    format!(
        "❌ Could not save {} ({}). The receipt was dropped, please send it again.",
        candidate.merchant,
        format_amount(&candidate.currency, candidate.amount)
    )
}

pub fn extraction_failed(error: &ExtractionError) -> String {
    format!(
        "⚠️ Could not process receipt: {}\n\nPlease try again with a clearer image.",
        error
    )
}

pub fn cancelled(count: usize) -> String {
    format!("🗑️ Cancelled. Discarded {} pending receipt(s).", count)
}

pub fn status(count: usize) -> String {
    match count {
        0 => "📭 No receipts pending.".to_string(),
        1 => "📬 1 receipt pending.".to_string(),
        n => format!("📬 {} receipts pending.", n),
    }
}

pub fn unknown_command(name: &str) -> String {
    format!("Unknown command /{}. Try /help.", name)
}
