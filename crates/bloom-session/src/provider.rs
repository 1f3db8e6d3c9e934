//! The per-provider command table (§4.3.1): how to invoke each supported
//! CLI agent, how to pass it a prompt, and how to ask it to resume a prior
//! session.
//!
//! Grounded on `at-session/cli_adapter.rs`'s `CliAdapter` trait +
//! `adapter_for()` factory shape, reauthored against the six providers this
//! orchestrator targets rather than the teacher's four.

use bloom_core::CliType;

/// How a provider's resume flag is shaped: some take the prior session id,
/// one (`goose`) just takes a bare flag and resumes whatever was last run in
/// the working directory, and one (`codex`) uses a subcommand rather than a
/// flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStyle {
    /// `--resume <id>`
    Flag(&'static str),
    /// A bare boolean flag with no id argument.
    BareFlag(&'static str),
    /// A leading subcommand followed by the id, e.g. `codex resume <id>`.
    Subcommand(&'static str),
}

/// The fixed shape of a provider's CLI: binary name, how to hand it a fresh
/// prompt, and how to resume a previous session.
#[derive(Debug, Clone, Copy)]
pub struct Provider {
    pub cli_type: CliType,
    pub binary: &'static str,
    /// Args prepended before the prompt is appended as the final argument,
    /// for a fresh (non-resuming) invocation.
    pub fresh_args: &'static [&'static str],
    pub resume: ResumeStyle,
}

pub const PROVIDERS: [Provider; 6] = [
    Provider {
        cli_type: CliType::Claude,
        binary: "claude",
        fresh_args: &["--dangerously-skip-permissions", "-p"],
        resume: ResumeStyle::Flag("--resume"),
    },
    Provider {
        cli_type: CliType::Copilot,
        binary: "copilot",
        fresh_args: &["--allow-all-tools", "-p"],
        resume: ResumeStyle::Flag("--resume"),
    },
    Provider {
        cli_type: CliType::Goose,
        binary: "goose",
        fresh_args: &["run", "--text"],
        resume: ResumeStyle::BareFlag("--resume"),
    },
    Provider {
        cli_type: CliType::OpenCode,
        binary: "opencode",
        fresh_args: &[],
        resume: ResumeStyle::Flag("--continue"),
    },
    Provider {
        cli_type: CliType::Codex,
        binary: "codex",
        fresh_args: &["--approval-mode", "full-auto", "-q"],
        resume: ResumeStyle::Subcommand("resume"),
    },
    Provider {
        cli_type: CliType::Cursor,
        binary: "cursor-agent",
        fresh_args: &["-p"],
        resume: ResumeStyle::Flag("--resume"),
    },
];

pub fn provider_for(cli_type: CliType) -> &'static Provider {
    PROVIDERS
        .iter()
        .find(|p| p.cli_type == cli_type)
        .expect("PROVIDERS covers every CliType variant")
}

impl Provider {
    /// Build the full argv for a subprocess invocation. `resume_session_id`
    /// takes priority over a fresh start when present, except for `goose`,
    /// whose bare resume flag ignores the id and just takes `--resume`.
    pub fn build_args(&self, prompt: &str, resume_session_id: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        match (resume_session_id, self.resume) {
            (Some(id), ResumeStyle::Flag(flag)) => {
                args.push(flag.to_string());
                args.push(id.to_string());
                args.push(prompt.to_string());
            }
            (Some(_), ResumeStyle::BareFlag(flag)) => {
                args.push(flag.to_string());
                args.push(prompt.to_string());
            }
            (Some(id), ResumeStyle::Subcommand(sub)) => {
                args.push(sub.to_string());
                args.push(id.to_string());
                args.push(prompt.to_string());
            }
            (None, _) => {
                args.extend(self.fresh_args.iter().map(|s| s.to_string()));
                args.push(prompt.to_string());
            }
        }
        if self.cli_type == CliType::Cursor {
            args.push("--force".to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cli_type_has_a_provider() {
        for cli in CliType::all() {
            let provider = provider_for(cli);
            assert_eq!(provider.cli_type, cli);
        }
    }

    #[test]
    fn claude_fresh_args() {
        let p = provider_for(CliType::Claude);
        let args = p.build_args("do the thing", None);
        assert_eq!(
            args,
            vec!["--dangerously-skip-permissions", "-p", "do the thing"]
        );
    }

    #[test]
    fn claude_resume_args() {
        let p = provider_for(CliType::Claude);
        let args = p.build_args("continue", Some("sess-1"));
        assert_eq!(args, vec!["--resume", "sess-1", "continue"]);
    }

    #[test]
    fn goose_resume_ignores_id() {
        let p = provider_for(CliType::Goose);
        let args = p.build_args("continue", Some("sess-1"));
        assert_eq!(args, vec!["--resume", "continue"]);
    }

    #[test]
    fn codex_resume_is_a_subcommand() {
        let p = provider_for(CliType::Codex);
        let args = p.build_args("continue", Some("sess-1"));
        assert_eq!(args, vec!["resume", "sess-1", "continue"]);
    }

    #[test]
    fn opencode_fresh_args_are_just_the_prompt() {
        let p = provider_for(CliType::OpenCode);
        let args = p.build_args("hello", None);
        assert_eq!(args, vec!["hello"]);
    }

    #[test]
    fn cursor_always_forces() {
        let p = provider_for(CliType::Cursor);
        let args = p.build_args("hello", None);
        assert_eq!(args, vec!["-p", "hello", "--force"]);
    }
}
