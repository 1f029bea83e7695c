//! Interactive REPL (Read-Eval-Print Loop) for kvdb.

use std::io::{self, BufRead, Write};

use serde_json::Value;

use super::api::{Database, DatabaseResult};

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Show timing information.
    pub timing: bool,
    /// Max list entries to display.
    pub max_items: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "kvdb> ".into(),
            timing: true,
            max_items: 100,
        }
    }
}

/// What evaluating one line produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Text to print.
    Output(String),
    /// Nothing to print.
    Empty,
    /// Leave the REPL.
    Quit,
}

/// The interactive REPL.
pub struct Repl {
    db: Database,
    config: ReplConfig,
    history: Vec<String>,
}

impl Repl {
    /// Create a new REPL with the given database.
    pub fn new(db: Database) -> Self {
        Self::with_config(db, ReplConfig::default())
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(db: Database, config: ReplConfig) -> Self {
        Self {
            db,
            config,
            history: Vec::new(),
        }
    }

    /// Run the REPL interactively.
    pub fn run(&mut self) -> DatabaseResult<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{}", self.config.prompt);
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF.
                println!("\nGoodbye!");
                break;
            }

            let cmd = line.trim();
            if cmd.is_empty() {
                continue;
            }
            self.history.push(cmd.to_string());

            let start = std::time::Instant::now();
            match self.evaluate(cmd) {
                Ok(Reply::Quit) => break,
                Ok(Reply::Empty) => {}
                Ok(Reply::Output(text)) => {
                    println!("{}", text);
                    if self.config.timing {
                        println!("Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        Ok(())
    }

    fn print_banner(&self) {
        println!("╔═══════════════════════════════════════════════════╗");
        println!("║                     kvdb v{:<24}║", env!("CARGO_PKG_VERSION"));
        println!("║        A transactional key-value store            ║");
        println!("╠═══════════════════════════════════════════════════╣");
        println!("║  backend: {:<40}║", self.db.store().backend_name());
        println!("║  Type .help for commands                          ║");
        println!("╚═══════════════════════════════════════════════════╝");
        println!();
    }

    /// Evaluate one command line. The leading `.` is optional.
    pub fn evaluate(&mut self, line: &str) -> DatabaseResult<Reply> {
        let line = line.trim().trim_start_matches(&['.', '\\'][..]);
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        let reply = match command.to_lowercase().as_str() {
            "" => Reply::Empty,
            "help" | "h" | "?" => Reply::Output(help_text()),
            "quit" | "exit" | "q" => Reply::Quit,
            "has" => match single_arg(rest) {
                Some(key) => Reply::Output(self.db.has(key)?.to_string()),
                None => usage(".has KEY"),
            },
            "get" => match single_arg(rest) {
                Some(key) => Reply::Output(format_value(&self.db.get(key)?)),
                None => usage(".get KEY"),
            },
            "list" => match single_arg(rest) {
                Some(key) => Reply::Output(self.format_list(&self.db.get_list(key)?)),
                None => usage(".list KEY"),
            },
            "mget" => {
                let keys: Vec<String> = rest.split_whitespace().map(String::from).collect();
                if keys.is_empty() {
                    usage(".mget KEY...")
                } else {
                    let values = self.db.get_many(&keys)?;
                    let lines: Vec<String> = values.iter().map(format_value).collect();
                    Reply::Output(format!("{}\n({} found)", lines.join("\n"), values.len()))
                }
            }
            "tx" => {
                if rest.is_empty() {
                    usage(".tx <json transaction>")
                } else {
                    let tx = self.db.execute_json(rest)?;
                    Reply::Output(format!("OK ({} key(s))", tx.keys().len()))
                }
            }
            "set" => match rest.split_once(char::is_whitespace) {
                Some((key, json)) => match serde_json::from_str::<Value>(json.trim()) {
                    Ok(value) => {
                        self.db.set(key, &value)?;
                        Reply::Output("OK".into())
                    }
                    Err(e) => Reply::Output(format!("Invalid JSON: {}", e)),
                },
                None => usage(".set KEY <json>"),
            },
            "log" => {
                let limit = match rest {
                    "" => Some(10),
                    n => match n.parse() {
                        Ok(n) => Some(n),
                        Err(_) => return Ok(usage(".log [N]")),
                    },
                };
                let commits = self.db.history(limit)?;
                if commits.is_empty() {
                    Reply::Output("No commits.".into())
                } else {
                    let lines: Vec<String> = commits
                        .iter()
                        .map(|c| {
                            format!(
                                "{} {} {}",
                                c.id.short(),
                                c.timestamp.format("%Y-%m-%d %H:%M:%S"),
                                c.summary()
                            )
                        })
                        .collect();
                    Reply::Output(lines.join("\n"))
                }
            }
            "history" => {
                let lines: Vec<String> = self
                    .history
                    .iter()
                    .enumerate()
                    .map(|(i, cmd)| format!("  {}: {}", i + 1, cmd))
                    .collect();
                Reply::Output(format!("Command History:\n{}", lines.join("\n")))
            }
            "timing" => {
                self.config.timing = !self.config.timing;
                Reply::Output(format!("Timing: {}", if self.config.timing { "on" } else { "off" }))
            }
            "clear" => {
                // Clear screen (ANSI escape).
                print!("\x1B[2J\x1B[H");
                Reply::Empty
            }
            other => Reply::Output(format!(
                "Unknown command: .{}\nType .help for available commands",
                other
            )),
        };

        Ok(reply)
    }

    fn format_list(&self, items: &[String]) -> String {
        if items.is_empty() {
            return "(empty list)".into();
        }
        let limit = items.len().min(self.config.max_items);
        let mut out: Vec<String> = items
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, item)| format!("{:>4}  {}", i, item))
            .collect();
        if items.len() > limit {
            out.push(format!("... ({} more items)", items.len() - limit));
        }
        out.push(format!("({} items)", items.len()));
        out.join("\n")
    }
}

fn single_arg(rest: &str) -> Option<&str> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(arg), None) => Some(arg),
        _ => None,
    }
}

fn usage(text: &str) -> Reply {
    Reply::Output(format!("Usage: {}", text))
}

fn help_text() -> String {
    [
        "Commands:",
        "  .help, .h, .?           Show this help message",
        "  .quit, .exit, .q        Exit the REPL",
        "  .has KEY                Check whether a key holds a record",
        "  .get KEY                Show a JSON record",
        "  .list KEY               Show a string list",
        "  .mget KEY...            Show several JSON records",
        "  .set KEY <json>         Overwrite a JSON record",
        "  .tx <json>              Apply a write transaction",
        "  .log [N]                Show the last N commits (default 10)",
        "  .history                Show command history",
        "  .timing                 Toggle timing display",
        "  .clear                  Clear the screen",
        "",
        "Transactions:",
        r#"  {"creates": {"k": 1}, "overwrites": {...}, "setFields": {"k": {"f": 2}},"#,
        r#"   "strListCreates": ["l"], "strListAppends": {"l": ["x"]}}"#,
    ]
    .join("\n")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(reply: Reply) -> String {
        match reply {
            Reply::Output(text) => text,
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&serde_json::Value::Null), "NULL");
        assert_eq!(format_value(&serde_json::json!(true)), "true");
        assert_eq!(format_value(&serde_json::json!(42)), "42");
        assert_eq!(format_value(&serde_json::json!("hello")), "hello");
        assert_eq!(format_value(&serde_json::json!([1])), "[\n  1\n]");
    }

    #[test]
    fn test_commands_round_trip() {
        let mut repl = Repl::new(Database::in_memory());

        assert_eq!(output(repl.evaluate(".has k").unwrap()), "false");
        output(repl.evaluate(r#".tx {"creates": {"k": {"a": 1}}, "strListCreates": ["l"]}"#).unwrap());
        output(repl.evaluate(r#".tx {"strListAppends": {"l": ["x", "y"]}}"#).unwrap());
        output(repl.evaluate(r#".set other "plain""#).unwrap());

        assert_eq!(output(repl.evaluate(".has k").unwrap()), "true");
        assert_eq!(output(repl.evaluate("get other").unwrap()), "plain");
        assert!(output(repl.evaluate(".list l").unwrap()).ends_with("(2 items)"));
        assert!(output(repl.evaluate(".mget k other missing").unwrap()).ends_with("(2 found)"));
        assert_eq!(output(repl.evaluate(".log").unwrap()), "No commits.");
    }

    #[test]
    fn test_errors_and_usage() {
        let mut repl = Repl::new(Database::in_memory());

        assert!(repl.evaluate(".get missing").is_err());
        assert!(repl.evaluate(r#".tx {"strListAppends": {"m": ["x"]}}"#).is_err());
        assert_eq!(output(repl.evaluate(".get").unwrap()), "Usage: .get KEY");
        assert!(output(repl.evaluate(".frobnicate").unwrap()).starts_with("Unknown command"));
        assert_eq!(repl.evaluate(".quit").unwrap(), Reply::Quit);
    }

    #[test]
    fn test_log_on_git_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut repl = Repl::new(Database::open(dir.path()).unwrap());

        output(repl.evaluate(r#".tx {"creates": {"k": 1}}"#).unwrap());
        let log = output(repl.evaluate(".log 5").unwrap());
        assert_eq!(log.lines().count(), 2);
    }
}
