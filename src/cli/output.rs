//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the switchboard CLI.

use crate::agents::{ChainEntry, ExecutionRecord};
use crate::hierarchy::{Agent, AgentKind};
use owo_colors::OwoColorize;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "💡".dimmed(), message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print an agent's reply
    pub fn reply(&self, text: &str) {
        if self.colored {
            println!("\n  {}\n", text.bright_white());
        } else {
            println!("\n  {}\n", text);
        }
    }

    /// Print the visited agents as `Router > Department > Specialist`
    pub fn chain(&self, chain: &[ChainEntry]) {
        let path = format_chain(chain);
        if self.colored {
            println!("    {}: {}", "chain".dimmed(), path.cyan());
        } else {
            println!("    chain: {}", path);
        }
    }

    /// Print one agent as an indented tree line
    pub fn agent(&self, agent: &Agent) {
        let indent = "  ".repeat(agent.kind.depth() as usize);
        let tools = agent
            .active_tools()
            .map(|b| b.tool.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let line = format!(
            "{}{} [{}] p={} {}{}",
            indent,
            agent.name,
            agent.kind,
            agent.priority,
            agent.id,
            if tools.is_empty() {
                String::new()
            } else {
                format!(" tools: {}", tools)
            }
        );
        match (self.colored, agent.is_active) {
            (true, true) => println!("    {}", line.bright_white()),
            (true, false) => println!("    {} {}", line.dimmed().strikethrough(), "(inactive)".dimmed()),
            (false, true) => println!("    {}", line),
            (false, false) => println!("    {} (inactive)", line),
        }
    }

    /// Print one execution record
    pub fn execution(&self, record: &ExecutionRecord) {
        let status = if record.success { "ok" } else { "failed" };
        let summary = format!(
            "{} {} {}ms {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.id,
            record.duration_ms,
            status
        );
        if self.colored {
            if record.success {
                println!("\n  {}", summary.green());
            } else {
                println!("\n  {}", summary.red());
            }
        } else {
            println!("\n  {}", summary);
        }
        self.kv("message", &record.user_message);
        self.chain(&record.chain);
        if let Some(reply) = &record.final_response {
            self.kv("reply", reply);
        }
        if let Some(error) = &record.error_message {
            self.kv("error", error);
        }
        for usage in &record.tools_used {
            self.kv(
                "tool",
                &format!("{} ({})", usage.tool, if usage.success { "ok" } else { "failed" }),
            );
        }
    }
}

/// `Router > Department > Specialist`, or `(none)` for an empty chain.
pub fn format_chain(chain: &[ChainEntry]) -> String {
    if chain.is_empty() {
        return "(none)".to_string();
    }
    chain
        .iter()
        .map(|entry| match entry.role {
            AgentKind::Router => entry.name.clone(),
            kind => format!("{} ({})", entry.name, kind.as_str().to_lowercase()),
        })
        .collect::<Vec<_>>()
        .join(" > ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::ScopeId;

    #[test]
    fn test_output_new() {
        let output = Output::new();
        assert!(output.colored);
    }

    #[test]
    fn test_output_no_color() {
        let output = Output::no_color();
        assert!(!output.colored);
    }

    #[test]
    fn test_format_chain() {
        let scope = ScopeId::new("s").unwrap();
        let router = Agent::router(&scope, "Front Desk", "");
        let dept = Agent::department(&router, "Default", "Support", "");
        let chain = vec![ChainEntry::from(&router), ChainEntry::from(&dept)];
        assert_eq!(format_chain(&chain), "Front Desk > Support (parent)");
        assert_eq!(format_chain(&[]), "(none)");
    }

    #[test]
    fn test_output_methods_no_panic() {
        let scope = ScopeId::new("s").unwrap();
        let router = Agent::router(&scope, "Router", "");
        let mut record = ExecutionRecord::new(scope, "hi");
        record.chain = vec![ChainEntry::from(&router)];
        record.error_message = Some("boom".to_string());

        for output in [Output::no_color(), Output::new()] {
            output.success("test success");
            output.info("test info");
            output.warning("test warning");
            output.error("test error");
            output.header("Test Header");
            output.kv("key", "value");
            output.hint("hint message");
            output.reply("hello");
            output.agent(&router);
            output.execution(&record);
        }
    }
}
