use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::{Callable, Tool};
use flowrun_core::types::Args;

struct Patterns {
    def_line: Regex,
    def_signature: Regex,
    branch: Regex,
    looping: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        def_line: Regex::new(r"^\s*def\s+(\w+)\s*\(").unwrap(),
        def_signature: Regex::new(r"def\s+(\w+)\s*\([^)]*\):").unwrap(),
        branch: Regex::new(r"\b(if|elif|else)\b").unwrap(),
        looping: Regex::new(r"\b(for|while)\b").unwrap(),
    })
}

const LONG_LINE: usize = 100;
const DOCSTRING_WINDOW: usize = 100;

/// All code review tools, in pipeline order.
pub fn tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ExtractFunctionsTool),
        Arc::new(CheckComplexityTool),
        Arc::new(DetectIssuesTool),
        Arc::new(SuggestImprovementsTool),
        Arc::new(CalculateScoreTool),
    ]
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Args) -> Result<T> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| FlowError::callable(format!("{tool}: invalid input: {e}")))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ── ExtractFunctionsTool ────────────────────────────────────────

pub struct ExtractFunctionsTool;

#[derive(Deserialize)]
struct CodeInput {
    code: String,
}

impl Callable for ExtractFunctionsTool {
    fn call(&self, args: Args) -> Result<Value> {
        let input: CodeInput = parse_args(self.name(), args)?;
        Ok(extract_functions(&input.code))
    }
}

impl Tool for ExtractFunctionsTool {
    fn name(&self) -> &str {
        "extract_functions"
    }
    fn description(&self) -> &str {
        "Extract function definitions (name, line number, signature) from source code."
    }
}

pub fn extract_functions(code: &str) -> Value {
    let functions: Vec<Value> = code
        .split('\n')
        .enumerate()
        .filter_map(|(i, line)| {
            patterns().def_line.captures(line).map(|caps| {
                json!({
                    "name": &caps[1],
                    "line": i + 1,
                    "code": line.trim(),
                })
            })
        })
        .collect();

    json!({
        "function_count": functions.len(),
        "functions": functions,
        "extraction_status": "success",
    })
}

// ── CheckComplexityTool ─────────────────────────────────────────

pub struct CheckComplexityTool;

impl Callable for CheckComplexityTool {
    fn call(&self, args: Args) -> Result<Value> {
        let input: CodeInput = parse_args(self.name(), args)?;
        Ok(check_complexity(&input.code))
    }
}

impl Tool for CheckComplexityTool {
    fn name(&self) -> &str {
        "check_complexity"
    }
    fn description(&self) -> &str {
        "Score code complexity (0-10) from nesting depth, branches, and loops."
    }
}

pub fn check_complexity(code: &str) -> Value {
    let nesting_depth = code
        .split('\n')
        .map(|line| {
            let indent = line.chars().count() - line.trim_start().chars().count();
            indent / 4
        })
        .max()
        .unwrap_or(0);

    let branch_count = patterns().branch.find_iter(code).count();
    let loop_count = patterns().looping.find_iter(code).count();

    let raw = nesting_depth as f64 + branch_count as f64 * 0.5 + loop_count as f64 * 0.5;
    let complexity_score = raw.min(10.0);

    json!({
        "complexity_score": round2(complexity_score),
        "nesting_depth": nesting_depth,
        "branch_count": branch_count,
        "loop_count": loop_count,
        "is_complex": complexity_score > 6.0,
    })
}

// ── DetectIssuesTool ────────────────────────────────────────────

pub struct DetectIssuesTool;

impl Callable for DetectIssuesTool {
    fn call(&self, args: Args) -> Result<Value> {
        let input: CodeInput = parse_args(self.name(), args)?;
        Ok(detect_issues(&input.code))
    }
}

impl Tool for DetectIssuesTool {
    fn name(&self) -> &str {
        "detect_issues"
    }
    fn description(&self) -> &str {
        "Detect long lines, missing docstrings, debug prints, and bare except clauses."
    }
}

pub fn detect_issues(code: &str) -> Value {
    let mut issues = Vec::new();

    for (i, line) in code.split('\n').enumerate() {
        let len = line.chars().count();
        if len > LONG_LINE {
            issues.push(json!({
                "type": "long_line",
                "line": i + 1,
                "message": format!("Line {} is too long ({} chars)", i + 1, len),
                "severity": "warning",
            }));
        }
    }

    for caps in patterns().def_signature.captures_iter(code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let window: String = code[whole.end()..].chars().take(DOCSTRING_WINDOW).collect();
        if !window.contains("\"\"\"") && !window.contains("'''") {
            issues.push(json!({
                "type": "missing_docstring",
                "function": name.as_str(),
                "message": format!("Function '{}' missing docstring", name.as_str()),
                "severity": "warning",
            }));
        }
    }

    let print_lines: Vec<usize> = code
        .split('\n')
        .enumerate()
        .filter(|(_, line)| line.contains("print("))
        .map(|(i, _)| i + 1)
        .collect();
    if !print_lines.is_empty() {
        issues.push(json!({
            "type": "debug_print",
            "lines": print_lines,
            "message": "Found print statements (debugging?)",
            "severity": "info",
        }));
    }

    if code.contains("except:") {
        issues.push(json!({
            "type": "bare_except",
            "message": "Bare except clause found - specify exception type",
            "severity": "error",
        }));
    }

    let critical_count = issues
        .iter()
        .filter(|issue| issue["severity"] == "error")
        .count();

    json!({
        "issue_count": issues.len(),
        "critical_count": critical_count,
        "has_critical_issues": critical_count > 0,
        "issues": issues,
    })
}

// ── SuggestImprovementsTool ─────────────────────────────────────

pub struct SuggestImprovementsTool;

#[derive(Deserialize)]
struct SuggestInput {
    #[serde(default)]
    issues: Vec<Value>,
}

impl Callable for SuggestImprovementsTool {
    fn call(&self, args: Args) -> Result<Value> {
        let input: SuggestInput = parse_args(self.name(), args)?;
        Ok(suggest_improvements(&input.issues))
    }
}

impl Tool for SuggestImprovementsTool {
    fn name(&self) -> &str {
        "suggest_improvements"
    }
    fn description(&self) -> &str {
        "Turn detected issues into prioritized, actionable suggestions."
    }
}

pub fn suggest_improvements(issues: &[Value]) -> Value {
    let has = |kind: &str| issues.iter().any(|issue| issue["type"] == kind);

    let catalogue = [
        ("long_line", "high", "style", "Break long lines into smaller, more readable chunks", "low"),
        ("missing_docstring", "medium", "documentation", "Add docstrings to all functions following Google style", "low"),
        ("debug_print", "medium", "debugging", "Remove debug print statements or use proper logging", "low"),
        ("bare_except", "high", "error_handling", "Specify exception types explicitly in except blocks", "medium"),
    ];

    let suggestions: Vec<Value> = catalogue
        .iter()
        .filter(|(kind, ..)| has(kind))
        .map(|(_, priority, area, suggestion, effort)| {
            json!({
                "priority": priority,
                "area": area,
                "suggestion": suggestion,
                "effort": effort,
            })
        })
        .collect();

    let recommended: Vec<Value> = suggestions
        .iter()
        .map(|s| s["suggestion"].clone())
        .collect();

    json!({
        "suggestion_count": suggestions.len(),
        "suggestions": suggestions,
        "recommended_improvements": recommended,
    })
}

// ── CalculateScoreTool ──────────────────────────────────────────

pub struct CalculateScoreTool;

#[derive(Deserialize)]
struct ScoreInput {
    complexity_score: f64,
    issue_count: u64,
    has_critical_issues: bool,
    suggestion_count: u64,
}

impl Callable for CalculateScoreTool {
    fn call(&self, args: Args) -> Result<Value> {
        let input: ScoreInput = parse_args(self.name(), args)?;
        Ok(calculate_score(
            input.complexity_score,
            input.issue_count,
            input.has_critical_issues,
            input.suggestion_count,
        ))
    }
}

impl Tool for CalculateScoreTool {
    fn name(&self) -> &str {
        "calculate_score"
    }
    fn description(&self) -> &str {
        "Combine complexity and issue metrics into a 0-10 quality score and rating."
    }
}

pub fn calculate_score(
    complexity_score: f64,
    issue_count: u64,
    has_critical_issues: bool,
    suggestion_count: u64,
) -> Value {
    let mut score = 10.0;
    score -= (complexity_score * 0.3).min(3.0);
    score -= (issue_count as f64 * 0.2).min(3.0);
    if has_critical_issues {
        score -= 2.0;
    }
    score -= (suggestion_count as f64 * 0.3).min(2.0);
    let score = round2(score).max(0.0);

    json!({
        "quality_score": score,
        "rating": rating(score),
        "pass_threshold_5": score >= 5.0,
        "pass_threshold_7": score >= 7.0,
        "pass_threshold_8": score >= 8.0,
    })
}

/// Map a 0-10 score onto a rating label.
pub fn rating(score: f64) -> &'static str {
    match score {
        s if s >= 8.0 => "Excellent",
        s if s >= 7.0 => "Good",
        s if s >= 5.0 => "Fair",
        s if s >= 3.0 => "Poor",
        _ => "Critical",
    }
}
