use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source roots checked by the style rules. Nothing outside them is scanned.
const SOURCE_ROOTS: [&str; 4] = ["pairs", "cli", "tests", "benches"];

// Which rule a collector enforces; decides how matches are filtered and reported.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b",
            Self::ForbiddenWords => {
                r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            }
            Self::StarsInComment => r"(//|/\*).*\*\*",
            Self::UppercaseComment => r"(//|/\*|///).*",
            Self::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn headline(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => "underscore-prefixed identifiers",
            Self::ForbiddenWords => "forbidden comment words",
            Self::StarsInComment => "'**' sequences in regular comments",
            Self::UppercaseComment => "comments written entirely in uppercase",
            Self::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => {
                "Either use the binding (dropping the underscore) or remove it completely."
            }
            Self::ForbiddenWords => {
                "Comments describing edits to the code do not belong in the code. Remove them."
            }
            Self::StarsInComment => "'**' is only allowed in doc comments.",
            Self::UppercaseComment => "Rewrite the comment in sentence case or delete it.",
            Self::AllowDeadCode => "Either use the code or remove it completely.",
        }
    }

    fn scans_build_script(self) -> bool {
        matches!(self, Self::UnderscorePrefix)
    }
}

// Collects the matching lines of one file for one rule.
struct RuleCollector {
    rule: Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl RuleCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.headline(),
            self.file_path.display()
        );
        for violation in &self.violations {
            msg.push_str(&format!("   {violation}\n"));
        }
        msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice()));
        Some(msg)
    }

    fn keeps(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self.rule {
            Rule::UnderscorePrefix => {
                let is_comment = trimmed.starts_with("//") || line.contains("/*");
                // Odd segments between quotes are string contents.
                let in_string = line
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_comment && !in_string
            }
            Rule::StarsInComment => !trimmed.starts_with("///"),
            Rule::UppercaseComment => {
                let comment = if let Some(rest) = trimmed.strip_prefix("///") {
                    rest
                } else if let Some(rest) = trimmed.strip_prefix("//") {
                    rest
                } else if let Some(idx) = line.find("/*") {
                    let rest = &line[idx + 2..];
                    rest.find("*/").map_or(rest, |end| &rest[..end])
                } else {
                    return false;
                };
                let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }
            Rule::ForbiddenWords | Rule::AllowDeadCode => true,
        }
    }
}

impl Sink for RuleCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.keeps(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_ROOTS
        .iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check_rule(rule: Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern())?;
    let mut searcher = Searcher::new();
    let build_script = PathBuf::from("build.rs");
    let extra = rule.scans_build_script().then_some(&build_script);

    for path in sources.iter().chain(extra) {
        let mut collector = RuleCollector::new(rule, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(message) = collector.error_message() {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    let sources = rust_sources();
    let rules = [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWords,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ];
    for rule in rules {
        if let Err(e) = check_rule(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
