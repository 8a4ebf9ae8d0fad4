//! The tools this server offers.

use std::path::Path;

use chrono::Local;
use runtime::{Arguments, ParamType, ToolDefinition, ToolError, ToolRegistry};
use serde_json::{Value, json};

/// Nesting deeper than this is rejected instead of recursing further.
const MAX_DEPTH: usize = 64;

/// All tools, in the order they are advertised.
pub fn registry() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();

    registry.register_fn(
        ToolDefinition::new(
            "get_current_time",
            "Get the current date and time in the server's timezone.",
        ),
        |_| Ok(current_time()),
    )?;

    registry.register_fn(
        ToolDefinition::new(
            "calculate",
            "Evaluate a mathematical expression and return the result. \
             Supports basic arithmetic operations (+, -, *, /, **, %).",
        )
        .param(
            "expression",
            ParamType::String,
            "The mathematical expression to evaluate (e.g., '2 + 2', '10 * 5', '2 ** 8')",
            true,
        ),
        calculate,
    )?;

    registry.register_fn(
        ToolDefinition::new(
            "list_files",
            "List all files and directories in the specified directory path.",
        )
        .param(
            "directory",
            ParamType::String,
            "The directory path to list files from. Defaults to current directory.",
            false,
        ),
        list_files,
    )?;

    Ok(registry)
}

fn current_time() -> Value {
    let now = Local::now();
    json!({
        "time": now.format("%H:%M:%S").to_string(),
        "date": now.format("%Y-%m-%d").to_string(),
    })
}

fn calculate(arguments: Arguments) -> Result<Value, ToolError> {
    let expression = arguments
        .get("expression")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let value = evaluate(expression).map_err(ToolError::Execution)?;
    Ok(number(value))
}

fn list_files(arguments: Arguments) -> Result<Value, ToolError> {
    let directory = arguments
        .get("directory")
        .and_then(Value::as_str)
        .unwrap_or(".");

    let entries = std::fs::read_dir(Path::new(directory))
        .map_err(|e| ToolError::Execution(format!("{directory}: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ToolError::Execution(format!("{directory}: {e}")))?;
        files.push(entry.file_name().to_string_lossy().into_owned());
    }
    files.sort();
    Ok(json!({ "files": files }))
}

/// Integral values as JSON integers, everything else as floats.
fn number(value: f64) -> Value {
    const EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if value.fract() == 0.0 && value.abs() < EXACT {
        json!(value as i64)
    } else {
        json!(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expression Evaluator
// ─────────────────────────────────────────────────────────────────────────────

/// Evaluate an arithmetic expression.
///
/// Precedence from loosest: `+ -`, then `* / %`, then unary minus, then `**`
/// (right-associative, and binding tighter than a unary minus on its left).
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let mut parser = Parser {
        src: expression.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if let Some(c) = parser.peek() {
        return Err(format!(
            "unexpected '{}' at position {}",
            c as char, parser.pos
        ));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consume `token` if it comes next.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.src[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat("+") {
                value += self.term()?;
            } else if self.eat("-") {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            if self.eat("*") {
                value *= self.unary()?;
            } else if self.eat("/") {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err("division by zero".into());
                }
                value /= divisor;
            } else if self.eat("%") {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err("modulo by zero".into());
                }
                // Result takes the sign of the divisor.
                value -= divisor * (value / divisor).floor();
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.eat("-") {
            return self.nested(|p| p.unary()).map(|v| -v);
        }
        if self.eat("+") {
            return self.nested(|p| p.unary());
        }
        self.power()
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.eat("**") {
            let exponent = self.nested(|p| p.unary())?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.nested(|p| p.expr())?;
                if !self.eat(")") {
                    return Err(format!("expected ')' at position {}", self.pos));
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(format!(
                "unexpected '{}' at position {}",
                c as char, self.pos
            )),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == b'.')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|e| e.to_string())?;
        text.parse()
            .map_err(|_| format!("invalid number '{text}'"))
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<f64, String>) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression nested too deeply".into());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}
