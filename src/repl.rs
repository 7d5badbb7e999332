// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive REPL for the keel interpreter.
//!
//! Each evaluated line is a top-level boundary: errors, fatal ones included,
//! are reported and the session continues.

use crate::report;
use keel_require::{dispatch::dispatch, LOADED_FEATURES, LOAD_PATH};
use keel_vm::{Value, Vm, VmError, VERSION};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Config, Editor, Helper};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

const HISTORY_FILE: &str = ".keel_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// REPL commands that can be executed with a dot prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Version,
    Load,
    Require,
    Features,
    Path,
}

impl ReplCommand {
    /// Parse a REPL command from input string
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let input = input.trim();
        let rest = input.strip_prefix('.')?;

        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        let command = match cmd.as_str() {
            "help" | "h" | "?" => ReplCommand::Help,
            "exit" | "quit" | "q" => ReplCommand::Exit,
            "clear" | "cls" => ReplCommand::Clear,
            "version" | "v" => ReplCommand::Version,
            "load" | "l" => ReplCommand::Load,
            "require" | "r" => ReplCommand::Require,
            "features" => ReplCommand::Features,
            "path" => ReplCommand::Path,
            _ => return None,
        };
        Some((command, arg))
    }

    /// Get all available commands for help/completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the REPL"),
            (".clear", "Clear the screen"),
            (".version", "Show version information"),
            (".load <file>", "Run a .rb, .mrb or native file directly"),
            (".require <name>", "Require a library through the load path"),
            (".features", "List loaded features ($\")"),
            (".path", "List the load path ($:)"),
        ]
    }
}

/// Completion, hints, highlighting and multi-line validation
struct KeelHelper {
    words: Vec<String>,
}

/// Functions and keywords the interpreter knows about
const KEYWORDS: &[&str] = &["nil", "true", "false", "__FILE__"];
const BUILTINS: &[&str] = &["require", "load", "puts", "print", "p", "raise"];
const GLOBALS: &[&str] = &["$:", "$\"", "$0", "$LOAD_PATH", "$LOADED_FEATURES", "$PROGRAM_NAME"];

impl KeelHelper {
    fn new() -> Self {
        let words = KEYWORDS
            .iter()
            .chain(BUILTINS)
            .chain(GLOBALS)
            .map(|w| w.to_string())
            .chain(
                ReplCommand::all_commands()
                    .iter()
                    .map(|(cmd, _)| cmd.split_whitespace().next().unwrap_or(*cmd).to_string()),
            )
            .collect();
        Self { words }
    }

    fn matches<'a>(&'a self, word: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.words
            .iter()
            .filter(move |w| w.starts_with(word) && w.len() > word.len())
    }
}

/// Start of the word ending at `pos`.
fn word_start(line: &str, pos: usize) -> usize {
    line[..pos]
        .rfind(|c: char| !c.is_alphanumeric() && !matches!(c, '_' | '.' | '$'))
        .map(|i| i + 1)
        .unwrap_or(0)
}

impl Completer for KeelHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let word = &line[word_start(line, pos)..pos];
        if word.is_empty() {
            return Ok((pos, vec![]));
        }

        let candidates = self
            .matches(word)
            .map(|w| Pair {
                display: w.clone(),
                replacement: w[word.len()..].to_string(),
            })
            .collect();
        Ok((pos, candidates))
    }
}

impl Hinter for KeelHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        self.completion_hint(line, pos)
            .map(|rest| rest.dimmed().to_string())
    }
}

impl KeelHelper {
    /// Rest of the first known word the cursor word is a prefix of.
    fn completion_hint<'a>(&'a self, line: &'a str, pos: usize) -> Option<&'a str> {
        if pos < line.len() {
            return None;
        }
        let word = &line[word_start(line, pos)..];
        if word.len() < 2 {
            return None;
        }
        self.matches(word).next().map(|w| &w[word.len()..])
    }
}

impl Highlighter for KeelHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.trim_start().starts_with('.') {
            return Cow::Owned(line.magenta().to_string());
        }

        let mut result = String::with_capacity(line.len() * 2);
        let mut word = String::new();
        let mut quote = None;

        for c in line.chars() {
            if let Some(q) = quote {
                result.push_str(&c.green().to_string());
                if c == q {
                    quote = None;
                }
                continue;
            }
            if c.is_alphanumeric() || c == '_' || (c == '$' && word.is_empty()) {
                word.push(c);
                continue;
            }
            if !word.is_empty() {
                result.push_str(&highlight_word(&word));
                word.clear();
            }
            let colored = match c {
                '"' | '\'' => {
                    quote = Some(c);
                    c.green().to_string()
                }
                '(' | ')' | '[' | ']' => c.yellow().to_string(),
                '<' | '=' => c.cyan().to_string(),
                _ => c.to_string(),
            };
            result.push_str(&colored);
        }
        if !word.is_empty() {
            result.push_str(&highlight_word(&word));
        }

        Cow::Owned(result)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn highlight_word(word: &str) -> String {
    if KEYWORDS.contains(&word) {
        word.blue().to_string()
    } else if BUILTINS.contains(&word) {
        word.magenta().bold().to_string()
    } else if word.starts_with('$') {
        word.cyan().to_string()
    } else if word.chars().all(|c| c.is_ascii_digit()) {
        word.yellow().to_string()
    } else {
        word.to_string()
    }
}

impl Validator for KeelHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> rustyline::Result<ValidationResult> {
        let input = ctx.input();
        if input.trim_start().starts_with('.') {
            return Ok(ValidationResult::Valid(None));
        }
        if !is_balanced(input) {
            return Ok(ValidationResult::Incomplete);
        }

        let trimmed = input.trim_end();
        if trimmed.ends_with(',') || trimmed.ends_with("<<") || trimmed.ends_with('=') {
            return Ok(ValidationResult::Incomplete);
        }

        Ok(ValidationResult::Valid(None))
    }
}

/// Check that brackets and quotes are closed
fn is_balanced(input: &str) -> bool {
    let mut stack = Vec::new();
    let mut in_string = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match in_string {
            Some(_) if c == '\\' => {
                chars.next();
            }
            Some(quote) if c == quote => in_string = None,
            Some(_) => {}
            None => match c {
                // `$"`, `$:` and `$!` are globals, not string openers
                '$' => {
                    if matches!(chars.peek(), Some(':' | '"' | '!')) {
                        chars.next();
                    }
                }
                '#' => {
                    // comment runs to end of line
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            break;
                        }
                    }
                }
                '"' | '\'' => in_string = Some(c),
                '(' => stack.push(')'),
                '[' => stack.push(']'),
                ')' | ']' => {
                    if stack.pop() != Some(c) {
                        // let the compiler report it
                        return true;
                    }
                }
                _ => {}
            },
        }
    }

    stack.is_empty() && in_string.is_none()
}

impl Helper for KeelHelper {}

/// The interactive REPL, evaluating into an already-installed interpreter
pub struct Repl<'vm> {
    vm: &'vm mut Vm,
    editor: Editor<KeelHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl<'vm> Repl<'vm> {
    /// Create a new REPL over `vm`
    pub fn new(vm: &'vm mut Vm) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(KeelHelper::new()));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keel")
            .join(HISTORY_FILE);
        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if editor.load_history(&history_path).is_err() {
            tracing::debug!("no history at {}", history_path.display());
        }

        Ok(Self {
            vm,
            editor,
            history_path,
        })
    }

    /// Run the REPL main loop
    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();
        let prompt = format!("{} ", "keel>".bright_green().bold());

        loop {
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    if let Some((cmd, arg)) = ReplCommand::parse(trimmed) {
                        match self.execute_command(cmd, arg) {
                            CommandResult::Continue => continue,
                            CommandResult::Exit => break,
                        }
                    }

                    self.eval_and_print(trimmed);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        if let Err(e) = self.editor.save_history(&self.history_path) {
            tracing::warn!("could not save history: {}", e);
        }
        Ok(())
    }

    fn print_banner(&self) {
        println!();
        println!("{}", r#"  _            _ "#.bright_cyan().bold());
        println!("{}", r#" | | _____  ___| |"#.bright_cyan().bold());
        println!("{}", r#" | |/ / _ \/ _ \ |"#.bright_cyan().bold());
        println!("{}", r#" |   <  __/  __/ |"#.bright_cyan().bold());
        println!("{}", r#" |_|\_\___|\___|_|"#.bright_cyan().bold());
        println!();
        println!(
            "  {} {} {}",
            "keel".white().bold(),
            "v".dimmed(),
            VERSION.bright_yellow()
        );
        println!(
            "  {} {} {}",
            "Type".dimmed(),
            ".help".cyan(),
            "for available commands".dimmed()
        );
        println!();
    }

    fn execute_command(&mut self, cmd: ReplCommand, arg: Option<&str>) -> CommandResult {
        match cmd {
            ReplCommand::Help => print_help(),
            ReplCommand::Exit => return CommandResult::Exit,
            ReplCommand::Clear => print!("\x1B[2J\x1B[H"),
            ReplCommand::Version => {
                println!("{}: {}", "keel".bright_cyan().bold(), VERSION.yellow());
            }
            ReplCommand::Load => match arg {
                Some(path) => {
                    let result = dispatch(self.vm, Path::new(path)).map(|()| Value::Bool(true));
                    print_result(result.map_err(VmError::from));
                }
                None => missing_argument(".load", "a file path"),
            },
            ReplCommand::Require => match arg {
                Some(name) => {
                    let result = keel_require::require(self.vm, name).map(Value::Bool);
                    print_result(result.map_err(VmError::from));
                }
                None => missing_argument(".require", "a library name"),
            },
            ReplCommand::Features => print_list(&self.vm.global(LOADED_FEATURES)),
            ReplCommand::Path => print_list(&self.vm.global(LOAD_PATH)),
        }
        CommandResult::Continue
    }

    fn eval_and_print(&mut self, input: &str) {
        print_result(self.vm.eval(input, "(repl)"));
    }
}

/// Result of executing a REPL command
enum CommandResult {
    Continue,
    Exit,
}

fn print_help() {
    println!();
    println!("{}", "REPL Commands:".white().bold());
    println!();
    for (cmd, desc) in ReplCommand::all_commands() {
        println!("  {:18} {}", cmd.cyan(), desc.dimmed());
    }
    println!();
    println!("{}", "Keyboard Shortcuts:".white().bold());
    println!();
    println!("  {:18} {}", "Ctrl+C".yellow(), "Cancel current input".dimmed());
    println!("  {:18} {}", "Ctrl+D".yellow(), "Exit REPL".dimmed());
    println!("  {:18} {}", "Tab".yellow(), "Autocomplete".dimmed());
    println!();
}

fn missing_argument(command: &str, what: &str) {
    eprintln!(
        "{}: {} {}",
        "Error".red().bold(),
        command.cyan(),
        format!("requires {}", what).dimmed()
    );
}

fn print_result(result: keel_vm::Result<Value>) {
    match result {
        Ok(value) => println!("{} {}", "=>".dimmed(), format_value(&value)),
        Err(e) => report(&e),
    }
}

fn print_list(value: &Value) {
    match value.as_array() {
        Some(items) => {
            for item in items.borrow().iter() {
                println!("  {}", item);
            }
        }
        None => println!("{}", format_value(value)),
    }
}

/// Format a value for display with syntax coloring
fn format_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".blue().dimmed().to_string(),
        Value::Bool(b) => b.yellow().to_string(),
        Value::Int(n) => n.yellow().to_string(),
        Value::String(_) => value.inspect().green().to_string(),
        Value::Array(_) => value.inspect().cyan().to_string(),
    }
}
