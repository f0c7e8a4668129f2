//! Source hygiene checks that run before every build.
//!
//! Each rule is a line regex searched with `grep`, followed by a line filter
//! that decides whether the hit is real code (or a real comment). Any
//! violation fails the build with the offending lines listed per file.

use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::PathBuf;
use walkdir::WalkDir;

const SOURCE_ROOTS: [&str; 4] = ["engine", "cli", "tests", "benches"];

struct Rule {
    name: &'static str,
    pattern: &'static str,
    confirm: fn(&str) -> bool,
    advice: &'static str,
}

const RULES: [Rule; 4] = [
    Rule {
        name: "underscore-prefixed binding",
        pattern: r"(^|[^A-Za-z0-9_])_[A-Za-z0-9_]+",
        confirm: underscore_binding_in_code,
        advice: "Use the value under a plain name or remove it.",
    },
    Rule {
        name: "#[allow(dead_code)]",
        pattern: r"#!?\s*\[\s*allow\s*\([^)]*dead_code",
        confirm: attribute_in_code,
        advice: "Call the item or delete it.",
    },
    Rule {
        name: "history note in comment",
        pattern: r"//.*\b(FIXED|FIX|NEW|CHANGED?|MODIFIED|MODIFY|UPDATED?)\b",
        confirm: comment_is_not_empty,
        advice: "Comments describe the code as it is, not how it got there.",
    },
    Rule {
        name: "shouting comment",
        pattern: r"//[^a-z]*[A-Z]{3}[^a-z]*$",
        confirm: comment_is_all_caps,
        advice: "Write comments in sentence case.",
    },
];

/// Collects the lines of one file that a rule confirms.
struct Hits<'a> {
    rule: &'a Rule,
    lines: Vec<String>,
}

impl Sink for Hits<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, hit: &SinkMatch<'_>) -> Result<bool, Self::Error> {
        let text = String::from_utf8_lossy(hit.bytes());
        let text = text.trim_end();
        if (self.rule.confirm)(text) {
            let line = hit.line_number().unwrap_or(0);
            self.lines.push(format!("{line}: {}", text.trim_start()));
        }
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    if let Err(report) = check_sources() {
        eprintln!("{report}");
        std::process::exit(1);
    }
}

fn check_sources() -> Result<(), Box<dyn Error>> {
    let files = source_files();
    let mut searcher = Searcher::new();
    let mut report = String::new();

    for rule in &RULES {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
        for path in &files {
            let mut hits = Hits {
                rule,
                lines: Vec::new(),
            };
            searcher.search_path(&matcher, path, &mut hits)?;
            if hits.lines.is_empty() {
                continue;
            }
            report.push_str(&format!("\n❌ {} in {}:\n", rule.name, path.display()));
            for line in &hits.lines {
                report.push_str(&format!("   {line}\n"));
            }
            report.push_str(&format!("   {}\n", rule.advice));
        }
    }

    if report.is_empty() {
        Ok(())
    } else {
        Err(report.into())
    }
}

fn source_files() -> Vec<PathBuf> {
    SOURCE_ROOTS
        .iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(Result::ok))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "rs"))
        .collect()
}

/// Splits a line into its code and its `//` comment. String literals are
/// blanked out of the code so their contents never count as identifiers.
fn split_line(line: &str) -> (String, &str) {
    let mut code = String::with_capacity(line.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = line.char_indices();
    while let Some((index, ch)) = chars.next() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => {
                    in_string = false;
                    code.push('"');
                }
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                code.push('"');
            }
            '\'' if line[index..].starts_with("'\"'") => {
                code.push_str("' '");
                chars.next();
                chars.next();
            }
            '/' if line[index..].starts_with("//") => return (code, &line[index..]),
            _ => code.push(ch),
        }
    }
    (code, "")
}

fn underscore_binding_in_code(line: &str) -> bool {
    let (code, _) = split_line(line);
    let bytes = code.as_bytes();
    bytes.iter().enumerate().any(|(index, &byte)| {
        let starts_word = index == 0 || !is_word_byte(bytes[index - 1]);
        let named = bytes.get(index + 1).is_some_and(|&next| is_word_byte(next));
        byte == b'_' && starts_word && named
    })
}

fn attribute_in_code(line: &str) -> bool {
    split_line(line).0.contains("dead_code")
}

fn comment_is_not_empty(line: &str) -> bool {
    !split_line(line).1.trim_start_matches('/').trim().is_empty()
}

fn comment_is_all_caps(line: &str) -> bool {
    let comment = split_line(line).1.trim_start_matches(['/', '!']);
    let letters: Vec<char> = comment.chars().filter(|ch| ch.is_alphabetic()).collect();
    letters.len() >= 3 && letters.iter().all(|ch| ch.is_uppercase())
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
