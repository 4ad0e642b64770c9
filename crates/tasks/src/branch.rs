//! Branch names and generated commit/PR text for autonomous tasks.

/// Namespace prefix for task branches.
pub const BRANCH_PREFIX: &str = "claude-mobile/";

/// Maximum slug length, before the timestamp suffix.
const SLUG_MAX_CHARS: usize = 50;

/// Maximum length of the one-line task summary used in commit messages
/// and PR titles.
const SUMMARY_MAX_CHARS: usize = 72;

/// Turns free-form task context into a branch slug: lowercased, truncated
/// to 50 characters, non-alphanumeric runs collapsed to single hyphens,
/// edge hyphens trimmed.
pub fn slug(context: &str) -> String {
    let lowered = context.to_lowercase();
    let truncated: String = lowered.chars().take(SLUG_MAX_CHARS).collect();

    let mut out = String::with_capacity(truncated.len());
    let mut pending_hyphen = false;
    for c in truncated.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if out.is_empty() { "task".into() } else { out }
}

/// Encodes a number in lowercase base 36.
fn base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Builds the branch name for a task: slug plus a base36 millisecond
/// timestamp, under the task namespace.
pub fn branch_name(context: &str, timestamp_millis: u128) -> String {
    format!("{BRANCH_PREFIX}{}-{}", slug(context), base36(timestamp_millis))
}

/// One-line task summary, truncated with an ellipsis when needed.
fn summary(context: &str) -> String {
    let first_line = context.lines().next().unwrap_or("").trim();
    let mut out: String = first_line.chars().take(SUMMARY_MAX_CHARS).collect();
    if first_line.chars().count() > SUMMARY_MAX_CHARS {
        out.push('…');
    }
    out
}

/// Generated commit message for a task's changes.
pub fn commit_message(context: &str) -> String {
    format!("{}\n\nRequested from a paired mobile session.", summary(context))
}

/// Generated pull-request title.
pub fn pr_title(context: &str) -> String {
    summary(context)
}

/// Generated pull-request body.
pub fn pr_body(context: &str, branch: &str) -> String {
    format!(
        "## Task\n\n{}\n\n---\n\nBranch `{branch}` was created, committed and pushed by the \
         agent on behalf of a paired mobile session.",
        context.trim()
    )
}
