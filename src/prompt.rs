//! Prompt assembly for agent invocations.

/// System prompt shipped with the binary.
pub const SYSTEM_PROMPT: &str = include_str!("../prompts/system.md");

/// Wrap a rendered thread transcript into the agent prompt.
pub fn build_prompt(thread_content: &str, dry_run: bool) -> String {
    let dry_run_notice = if dry_run {
        "IMPORTANT: Do not execute any commands. Just describe what you would do.\n\n"
    } else {
        ""
    };
    format!(
        "{dry_run_notice}## Slack Thread\n\n<slack-thread>\n{thread_content}\n</slack-thread>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_content_in_thread_tags() {
        let result = build_prompt("hello world", false);
        assert!(result.contains("<slack-thread>\nhello world\n</slack-thread>"));
    }

    #[test]
    fn includes_dry_run_notice_when_enabled() {
        let result = build_prompt("hello", true);
        assert!(result.starts_with("IMPORTANT: Do not execute any commands."));
    }

    #[test]
    fn no_dry_run_notice_when_disabled() {
        let result = build_prompt("hello", false);
        assert!(!result.contains("IMPORTANT:"));
    }

    #[test]
    fn preserves_multiline_content() {
        let content = "line one\nline two\nline three";
        assert!(build_prompt(content, false).contains(content));
    }
}
