//! Built-in function library and custom function registry.
//!
//! The registry is shared, thread-safe and pre-populated with the curated
//! library: string, math, date, array, object, conditional, lookup and
//! unit/currency conversion helpers. Callers may register additional
//! functions by name; names shadow builtins.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use super::EvalError;

/// Signature for registered functions.
pub type CustomFunction = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// Converts an `f64` into a JSON number, collapsing float noise onto
/// integers (`100.0 * 1.1` yields `110`, not `110.00000000000001`).
pub(crate) fn json_number(n: f64) -> Value {
    let rounded = n.round();
    if n.is_finite() && (n - rounded).abs() < 1e-9 && rounded.abs() < 9.0e15 {
        #[allow(clippy::cast_possible_truncation)]
        return Value::from(rounded as i64);
    }
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

/// Extracts an f64 from a JSON value, accepting numeric strings.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Renders a value as a display string (no quotes around strings).
pub(crate) fn to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Thread-safe registry of evaluable functions.
pub struct FunctionRegistry {
    functions: DashMap<String, CustomFunction>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("count", &self.functions.len())
            .finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: DashMap::new(),
        }
    }

    /// Creates a registry pre-populated with the built-in library.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }

    /// Registers a function, replacing any existing one with the same name.
    pub fn register(&self, name: impl Into<String>, func: CustomFunction) {
        self.functions.insert(name.into(), func);
    }

    /// Removes a function by name. Returns true if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Returns the function registered under `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<CustomFunction> {
        self.functions.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Lists registered function names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Invokes a registered function.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::UnknownFunction`] for unregistered names, or the
    /// function's own error.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let func = self
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        func(args)
    }
}

fn func_err(name: &str, message: impl Into<String>) -> EvalError {
    EvalError::Function {
        name: name.to_string(),
        message: message.into(),
    }
}

fn require_number(name: &str, args: &[Value], idx: usize) -> Result<f64, EvalError> {
    args.get(idx)
        .and_then(as_number)
        .ok_or_else(|| func_err(name, format!("argument {} must be a number", idx + 1)))
}

fn require_string(name: &str, args: &[Value], idx: usize) -> Result<String, EvalError> {
    match args.get(idx) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(to_display_string(other)),
        None => Err(func_err(name, format!("argument {} is required", idx + 1))),
    }
}

fn require_array<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a Vec<Value>, EvalError> {
    match args.get(idx) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(func_err(name, format!("argument {} must be an array", idx + 1))),
    }
}

fn require_object<'a>(
    name: &str,
    args: &'a [Value],
    idx: usize,
) -> Result<&'a serde_json::Map<String, Value>, EvalError> {
    match args.get(idx) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(func_err(name, format!("argument {} must be an object", idx + 1))),
    }
}

fn register<F>(registry: &FunctionRegistry, name: &str, func: F)
where
    F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
{
    registry.register(name, Arc::new(func));
}

#[allow(clippy::too_many_lines)]
fn register_builtins(registry: &FunctionRegistry) {
    register_string_builtins(registry);
    register_math_builtins(registry);
    register_date_builtins(registry);
    register_array_builtins(registry);
    register_object_builtins(registry);
    register_conditional_builtins(registry);
    register_conversion_builtins(registry);
}

fn register_string_builtins(registry: &FunctionRegistry) {
    register(registry, "upper", |args| {
        Ok(Value::String(require_string("upper", args, 0)?.to_uppercase()))
    });
    register(registry, "lower", |args| {
        Ok(Value::String(require_string("lower", args, 0)?.to_lowercase()))
    });
    register(registry, "trim", |args| {
        Ok(Value::String(require_string("trim", args, 0)?.trim().to_string()))
    });
    register(registry, "concat", |args| {
        let mut out = String::new();
        for arg in args {
            out.push_str(&to_display_string(arg));
        }
        Ok(Value::String(out))
    });
    register(registry, "substring", |args| {
        let s = require_string("substring", args, 0)?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start = require_number("substring", args, 1)?.max(0.0) as usize;
        let chars: Vec<char> = s.chars().collect();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let end = match args.get(2) {
            Some(v) => as_number(v)
                .ok_or_else(|| func_err("substring", "end must be a number"))?
                .max(0.0) as usize,
            None => chars.len(),
        };
        let end = end.min(chars.len());
        let start = start.min(end);
        Ok(Value::String(chars[start..end].iter().collect()))
    });
    register(registry, "replace", |args| {
        let s = require_string("replace", args, 0)?;
        let from = require_string("replace", args, 1)?;
        let to = require_string("replace", args, 2)?;
        Ok(Value::String(s.replace(&from, &to)))
    });
    register(registry, "split", |args| {
        let s = require_string("split", args, 0)?;
        let sep = require_string("split", args, 1)?;
        let parts: Vec<Value> = if sep.is_empty() {
            s.chars().map(|c| Value::String(c.to_string())).collect()
        } else {
            s.split(&sep).map(|p| Value::String(p.to_string())).collect()
        };
        Ok(Value::Array(parts))
    });
    register(registry, "starts_with", |args| {
        let s = require_string("starts_with", args, 0)?;
        let prefix = require_string("starts_with", args, 1)?;
        Ok(Value::Bool(s.starts_with(&prefix)))
    });
    register(registry, "length", |args| match args.first() {
        Some(Value::String(s)) => Ok(json_number(s.chars().count() as f64)),
        Some(Value::Array(items)) => Ok(json_number(items.len() as f64)),
        Some(Value::Object(map)) => Ok(json_number(map.len() as f64)),
        _ => Err(func_err("length", "argument must be a string, array or object")),
    });
}

fn register_math_builtins(registry: &FunctionRegistry) {
    register(registry, "abs", |args| {
        Ok(json_number(require_number("abs", args, 0)?.abs()))
    });
    register(registry, "round", |args| {
        let n = require_number("round", args, 0)?;
        let digits = match args.get(1) {
            Some(v) => as_number(v).ok_or_else(|| func_err("round", "digits must be a number"))?,
            None => 0.0,
        };
        let factor = 10f64.powf(digits);
        Ok(json_number((n * factor).round() / factor))
    });
    register(registry, "floor", |args| {
        Ok(json_number(require_number("floor", args, 0)?.floor()))
    });
    register(registry, "ceil", |args| {
        Ok(json_number(require_number("ceil", args, 0)?.ceil()))
    });
    register(registry, "min", |args| {
        let mut best: Option<f64> = None;
        for (i, arg) in args.iter().enumerate() {
            let n = as_number(arg)
                .ok_or_else(|| func_err("min", format!("argument {} must be a number", i + 1)))?;
            best = Some(best.map_or(n, |b| b.min(n)));
        }
        best.map(json_number)
            .ok_or_else(|| func_err("min", "at least one argument is required"))
    });
    register(registry, "max", |args| {
        let mut best: Option<f64> = None;
        for (i, arg) in args.iter().enumerate() {
            let n = as_number(arg)
                .ok_or_else(|| func_err("max", format!("argument {} must be a number", i + 1)))?;
            best = Some(best.map_or(n, |b| b.max(n)));
        }
        best.map(json_number)
            .ok_or_else(|| func_err("max", "at least one argument is required"))
    });
    register(registry, "pow", |args| {
        let base = require_number("pow", args, 0)?;
        let exp = require_number("pow", args, 1)?;
        Ok(json_number(base.powf(exp)))
    });
    register(registry, "sqrt", |args| {
        let n = require_number("sqrt", args, 0)?;
        if n < 0.0 {
            return Err(func_err("sqrt", "argument must be non-negative"));
        }
        Ok(json_number(n.sqrt()))
    });
}

fn parse_date_value(name: &str, raw: &str) -> Result<DateTime<Utc>, EvalError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    Err(func_err(name, format!("cannot parse '{raw}' as a date")))
}

fn register_date_builtins(registry: &FunctionRegistry) {
    register(registry, "now", |_args| {
        Ok(Value::String(Utc::now().to_rfc3339()))
    });
    register(registry, "format_date", |args| {
        let raw = require_string("format_date", args, 0)?;
        let fmt = require_string("format_date", args, 1)?;
        let dt = parse_date_value("format_date", &raw)?;
        Ok(Value::String(dt.format(&fmt).to_string()))
    });
    register(registry, "parse_date", |args| {
        let raw = require_string("parse_date", args, 0)?;
        match args.get(1) {
            Some(fmt_value) => {
                let fmt = to_display_string(fmt_value);
                let date = NaiveDate::parse_from_str(&raw, &fmt)
                    .map_err(|e| func_err("parse_date", e.to_string()))?;
                let dt = date
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| func_err("parse_date", "invalid time"))?;
                Ok(Value::String(Utc.from_utc_datetime(&dt).to_rfc3339()))
            }
            None => Ok(Value::String(
                parse_date_value("parse_date", &raw)?.to_rfc3339(),
            )),
        }
    });
    register(registry, "date_add_days", |args| {
        let raw = require_string("date_add_days", args, 0)?;
        let days = require_number("date_add_days", args, 1)?;
        let dt = parse_date_value("date_add_days", &raw)?;
        #[allow(clippy::cast_possible_truncation)]
        let shifted = dt + ChronoDuration::days(days as i64);
        Ok(Value::String(shifted.to_rfc3339()))
    });
}

fn register_array_builtins(registry: &FunctionRegistry) {
    register(registry, "first", |args| {
        Ok(require_array("first", args, 0)?.first().cloned().unwrap_or(Value::Null))
    });
    register(registry, "last", |args| {
        Ok(require_array("last", args, 0)?.last().cloned().unwrap_or(Value::Null))
    });
    register(registry, "join", |args| {
        let items = require_array("join", args, 0)?;
        let sep = require_string("join", args, 1)?;
        let parts: Vec<String> = items.iter().map(to_display_string).collect();
        Ok(Value::String(parts.join(&sep)))
    });
    register(registry, "contains", |args| match args.first() {
        Some(Value::Array(items)) => {
            let needle = args
                .get(1)
                .ok_or_else(|| func_err("contains", "argument 2 is required"))?;
            Ok(Value::Bool(items.contains(needle)))
        }
        Some(Value::String(s)) => {
            let needle = require_string("contains", args, 1)?;
            Ok(Value::Bool(s.contains(&needle)))
        }
        _ => Err(func_err("contains", "argument 1 must be an array or string")),
    });
    register(registry, "sum", |args| {
        let items = require_array("sum", args, 0)?;
        let mut total = 0.0;
        for item in items {
            total += as_number(item)
                .ok_or_else(|| func_err("sum", "all elements must be numbers"))?;
        }
        Ok(json_number(total))
    });
    register(registry, "count", |args| {
        Ok(json_number(require_array("count", args, 0)?.len() as f64))
    });
}

fn register_object_builtins(registry: &FunctionRegistry) {
    register(registry, "get", |args| {
        let obj = require_object("get", args, 0)?;
        let key = require_string("get", args, 1)?;
        match obj.get(&key) {
            Some(v) if !v.is_null() => Ok(v.clone()),
            _ => Ok(args.get(2).cloned().unwrap_or(Value::Null)),
        }
    });
    register(registry, "keys", |args| {
        let obj = require_object("keys", args, 0)?;
        Ok(Value::Array(
            obj.keys().map(|k| Value::String(k.clone())).collect(),
        ))
    });
    register(registry, "has", |args| {
        let obj = require_object("has", args, 0)?;
        let key = require_string("has", args, 1)?;
        Ok(Value::Bool(obj.contains_key(&key)))
    });
    register(registry, "merge", |args| {
        let mut out = require_object("merge", args, 0)?.clone();
        let overlay = require_object("merge", args, 1)?;
        for (k, v) in overlay {
            out.insert(k.clone(), v.clone());
        }
        Ok(Value::Object(out))
    });
}

fn register_conditional_builtins(registry: &FunctionRegistry) {
    register(registry, "if", |args| {
        if args.len() != 3 {
            return Err(func_err("if", "expects exactly 3 arguments"));
        }
        let cond = super::eval::is_truthy(&args[0]);
        Ok(if cond { args[1].clone() } else { args[2].clone() })
    });
    register(registry, "coalesce", |args| {
        for arg in args {
            if !arg.is_null() {
                return Ok(arg.clone());
            }
        }
        Ok(Value::Null)
    });
    register(registry, "default", |args| {
        let value = args
            .first()
            .ok_or_else(|| func_err("default", "argument 1 is required"))?;
        let fallback = args
            .get(1)
            .ok_or_else(|| func_err("default", "argument 2 is required"))?;
        let empty_string = matches!(value, Value::String(s) if s.is_empty());
        Ok(if value.is_null() || empty_string {
            fallback.clone()
        } else {
            value.clone()
        })
    });
    register(registry, "lookup", |args| {
        let table = require_object("lookup", args, 0)?;
        let key = require_string("lookup", args, 1)?;
        match table.get(&key) {
            Some(v) => Ok(v.clone()),
            None => Ok(args.get(2).cloned().unwrap_or(Value::Null)),
        }
    });
}

// Unit factors normalize to grams (mass) and millimeters (length).
const MASS_UNITS: &[(&str, f64)] = &[
    ("g", 1.0),
    ("kg", 1000.0),
    ("lb", 453.592),
    ("oz", 28.3495),
];
const LENGTH_UNITS: &[(&str, f64)] = &[
    ("mm", 1.0),
    ("cm", 10.0),
    ("m", 1000.0),
    ("in", 25.4),
    ("ft", 304.8),
];
// Static snapshot, units-per-USD. Live rates are a platform concern; hosts
// can shadow `convert_currency` with a custom function.
const CURRENCY_RATES: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("JPY", 155.0),
    ("CAD", 1.36),
    ("AUD", 1.52),
];

fn unit_factor(unit: &str) -> Option<(f64, &'static str)> {
    let lowered = unit.to_lowercase();
    for (name, factor) in MASS_UNITS {
        if *name == lowered {
            return Some((*factor, "mass"));
        }
    }
    for (name, factor) in LENGTH_UNITS {
        if *name == lowered {
            return Some((*factor, "length"));
        }
    }
    None
}

fn register_conversion_builtins(registry: &FunctionRegistry) {
    register(registry, "convert_unit", |args| {
        let value = require_number("convert_unit", args, 0)?;
        let from = require_string("convert_unit", args, 1)?;
        let to = require_string("convert_unit", args, 2)?;
        let (from_factor, from_dim) = unit_factor(&from)
            .ok_or_else(|| func_err("convert_unit", format!("unknown unit '{from}'")))?;
        let (to_factor, to_dim) = unit_factor(&to)
            .ok_or_else(|| func_err("convert_unit", format!("unknown unit '{to}'")))?;
        if from_dim != to_dim {
            return Err(func_err(
                "convert_unit",
                format!("cannot convert {from_dim} to {to_dim}"),
            ));
        }
        Ok(json_number(value * from_factor / to_factor))
    });
    register(registry, "convert_currency", |args| {
        let amount = require_number("convert_currency", args, 0)?;
        let from = require_string("convert_currency", args, 1)?.to_uppercase();
        let to = require_string("convert_currency", args, 2)?.to_uppercase();
        let from_rate = CURRENCY_RATES
            .iter()
            .find(|(code, _)| *code == from)
            .map(|(_, rate)| *rate)
            .ok_or_else(|| func_err("convert_currency", format!("unknown currency '{from}'")))?;
        let to_rate = CURRENCY_RATES
            .iter()
            .find(|(code, _)| *code == to)
            .map(|(_, rate)| *rate)
            .ok_or_else(|| func_err("convert_currency", format!("unknown currency '{to}'")))?;
        Ok(json_number(amount / from_rate * to_rate))
    });
}
