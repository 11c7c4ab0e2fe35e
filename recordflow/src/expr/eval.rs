//! AST interpreter and the public [`Evaluator`] entry point.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::functions::{as_number, json_number, to_display_string, FunctionRegistry};
use super::parser::{parse, BinaryOp, Expr, UnaryOp};
use super::EvalError;

/// Default evaluation time budget.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Structured result of one expression evaluation.
///
/// Failures are carried here; the evaluator never panics or returns `Err`
/// from its public entry points.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvalOutcome {
    /// Whether evaluation succeeded.
    pub success: bool,
    /// The produced value, when successful.
    pub output: Option<Value>,
    /// The error description, when failed.
    pub error: Option<String>,
    /// Wall-clock evaluation time in milliseconds.
    pub execution_time_ms: f64,
}

impl EvalOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn success(output: Value, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            execution_time_ms,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failure(error: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }

    /// Returns the output, or `Null` if absent.
    #[must_use]
    pub fn output_or_null(&self) -> Value {
        self.output.clone().unwrap_or(Value::Null)
    }
}

/// Truthiness rules for conditions and the ternary operator.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Sandboxed expression evaluator.
///
/// Holds the shared function registry; each evaluation builds a fresh scope
/// from the caller's input so no state leaks between calls.
#[derive(Debug)]
pub struct Evaluator {
    functions: Arc<FunctionRegistry>,
    default_timeout: Duration,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Creates an evaluator with the built-in library and the default 5s
    /// timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: Arc::new(FunctionRegistry::with_builtins()),
            default_timeout: DEFAULT_EVAL_TIMEOUT,
        }
    }

    /// Overrides the default timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Returns the default timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Returns the shared function registry.
    #[must_use]
    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Registers a custom function; the name shadows any builtin.
    pub fn register_function<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions.register(name, Arc::new(func));
    }

    /// Removes a custom (or builtin) function by name.
    pub fn unregister_function(&self, name: &str) -> bool {
        self.functions.unregister(name)
    }

    /// Evaluates `expression` against `input` with the default timeout.
    #[must_use]
    pub fn evaluate(&self, expression: &str, input: &Map<String, Value>) -> EvalOutcome {
        self.evaluate_with_timeout(expression, input, self.default_timeout)
    }

    /// Evaluates with an explicit timeout.
    ///
    /// The interpreter checks the deadline on every AST node and after every
    /// function call, so a long-running evaluation returns a timeout failure
    /// instead of hanging the caller.
    #[must_use]
    pub fn evaluate_with_timeout(
        &self,
        expression: &str,
        input: &Map<String, Value>,
        timeout: Duration,
    ) -> EvalOutcome {
        self.evaluate_with_bindings(expression, input, &Map::new(), timeout)
    }

    /// Evaluates with extra top-level scope entries alongside the input
    /// aliases. A binding shadows an alias on name collision.
    ///
    /// Templates use this to expose their shared `variables` map as a bare
    /// identifier.
    #[must_use]
    pub fn evaluate_with_bindings(
        &self,
        expression: &str,
        input: &Map<String, Value>,
        bindings: &Map<String, Value>,
        timeout: Duration,
    ) -> EvalOutcome {
        let start = Instant::now();

        let ast = match parse(expression) {
            Ok(ast) => ast,
            Err(e) => {
                return EvalOutcome::failure(e.to_string(), elapsed_ms(start));
            }
        };

        let scope = build_scope(input, bindings);
        let interpreter = Interpreter {
            scope: &scope,
            functions: &self.functions,
            start,
            deadline: start + timeout,
        };

        match interpreter.eval(&ast) {
            Ok(value) => EvalOutcome::success(value, elapsed_ms(start)),
            Err(e) => {
                tracing::debug!(expression, error = %e, "expression evaluation failed");
                EvalOutcome::failure(e.to_string(), elapsed_ms(start))
            }
        }
    }

    /// Async evaluation: runs on the blocking pool and additionally races a
    /// `tokio` timer, covering functions that block past the deadline.
    pub async fn evaluate_async(
        &self,
        expression: &str,
        input: &Map<String, Value>,
        timeout: Duration,
    ) -> EvalOutcome {
        let start = Instant::now();
        let expression_owned = expression.to_string();
        let input_owned = input.clone();
        let functions = Arc::clone(&self.functions);

        let task = tokio::task::spawn_blocking(move || {
            let inner = Evaluator {
                functions,
                default_timeout: timeout,
            };
            inner.evaluate_with_timeout(&expression_owned, &input_owned, timeout)
        });

        // Small grace so the interpreter's own deadline usually wins and
        // reports a precise error.
        match tokio::time::timeout(timeout + Duration::from_millis(50), task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                EvalOutcome::failure(format!("evaluation task failed: {join_err}"), elapsed_ms(start))
            }
            Err(_) => EvalOutcome::failure(
                EvalError::Timeout {
                    elapsed_ms: elapsed_ms(start) as u64,
                }
                .to_string(),
                elapsed_ms(start),
            ),
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn build_scope(input: &Map<String, Value>, bindings: &Map<String, Value>) -> Map<String, Value> {
    let record = Value::Object(input.clone());
    let mut scope = Map::new();
    for alias in ["input", "record", "data", "value"] {
        scope.insert(alias.to_string(), record.clone());
    }
    for (name, value) in bindings {
        scope.insert(name.clone(), value.clone());
    }
    scope
}

struct Interpreter<'a> {
    scope: &'a Map<String, Value>,
    functions: &'a FunctionRegistry,
    start: Instant,
    deadline: Instant,
}

impl Interpreter<'_> {
    fn check_deadline(&self) -> Result<(), EvalError> {
        if Instant::now() >= self.deadline {
            return Err(EvalError::Timeout {
                elapsed_ms: self.start.elapsed().as_millis() as u64,
            });
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.check_deadline()?;

        match expr {
            Expr::Number(n) => Ok(json_number(*n)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UndefinedIdentifier(name.clone())),
            Expr::Field { object, name } => {
                let obj = self.eval(object)?;
                match obj {
                    Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
                    Value::Null => Ok(Value::Null),
                    other => Err(EvalError::Type(format!(
                        "cannot access field '{name}' on {}",
                        type_name(&other)
                    ))),
                }
            }
            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                self.eval_index(&obj, &idx)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => as_number(&value)
                        .map(|n| json_number(-n))
                        .ok_or_else(|| EvalError::Type("cannot negate a non-number".to_string())),
                    UnaryOp::Not => Ok(Value::Bool(!is_truthy(&value))),
                }
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let c = self.eval(cond)?;
                if is_truthy(&c) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { name, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg)?);
                }
                let result = self.functions.call(name, &evaluated)?;
                // A blocking function may have eaten the whole budget.
                self.check_deadline()?;
                Ok(result)
            }
        }
    }

    fn eval_index(&self, obj: &Value, idx: &Value) -> Result<Value, EvalError> {
        match (obj, idx) {
            (Value::Array(items), _) => {
                let n = as_number(idx)
                    .ok_or_else(|| EvalError::Type("array index must be a number".to_string()))?;
                if n < 0.0 {
                    return Ok(Value::Null);
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                Ok(items.get(n as usize).cloned().unwrap_or(Value::Null))
            }
            (Value::Object(map), Value::String(key)) => {
                Ok(map.get(key).cloned().unwrap_or(Value::Null))
            }
            (Value::Null, _) => Ok(Value::Null),
            (other, _) => Err(EvalError::Type(format!(
                "cannot index into {}",
                type_name(other)
            ))),
        }
    }

    fn eval_binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, EvalError> {
        // Short-circuit logic before evaluating the right side.
        match op {
            BinaryOp::And => {
                let l = self.eval(lhs)?;
                if !is_truthy(&l) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(rhs)?;
                return Ok(Value::Bool(is_truthy(&r)));
            }
            BinaryOp::Or => {
                let l = self.eval(lhs)?;
                if is_truthy(&l) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(rhs)?;
                return Ok(Value::Bool(is_truthy(&r)));
            }
            _ => {}
        }

        let l = self.eval(lhs)?;
        let r = self.eval(rhs)?;

        match op {
            BinaryOp::Add => {
                if l.is_string() || r.is_string() {
                    Ok(Value::String(format!(
                        "{}{}",
                        to_display_string(&l),
                        to_display_string(&r)
                    )))
                } else {
                    let (a, b) = numeric_operands("+", &l, &r)?;
                    Ok(json_number(a + b))
                }
            }
            BinaryOp::Sub => {
                let (a, b) = numeric_operands("-", &l, &r)?;
                Ok(json_number(a - b))
            }
            BinaryOp::Mul => {
                let (a, b) = numeric_operands("*", &l, &r)?;
                Ok(json_number(a * b))
            }
            BinaryOp::Div => {
                let (a, b) = numeric_operands("/", &l, &r)?;
                if b == 0.0 {
                    return Err(EvalError::Type("division by zero".to_string()));
                }
                Ok(json_number(a / b))
            }
            BinaryOp::Rem => {
                let (a, b) = numeric_operands("%", &l, &r)?;
                if b == 0.0 {
                    return Err(EvalError::Type("modulo by zero".to_string()));
                }
                Ok(json_number(a % b))
            }
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                compare(op, &l, &r)
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn numeric_operands(op: &str, l: &Value, r: &Value) -> Result<(f64, f64), EvalError> {
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::Type(format!(
            "'{op}' requires numeric operands, got {} and {}",
            type_name(l),
            type_name(r)
        ))),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(l), as_number(r)) {
        if l.is_number() && r.is_number() {
            return (a - b).abs() < f64::EPSILON;
        }
    }
    l == r
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let ordering = if let (Some(a), Some(b)) = (as_number(l), as_number(r)) {
        a.partial_cmp(&b)
    } else if let (Value::String(a), Value::String(b)) = (l, r) {
        Some(a.cmp(b))
    } else {
        None
    };

    let Some(ord) = ordering else {
        return Err(EvalError::Type(format!(
            "cannot compare {} with {}",
            type_name(l),
            type_name(r)
        )));
    };

    let result = match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Lte => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::Gte => ord.is_ge(),
        _ => unreachable!("compare only handles ordering operators"),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let evaluator = Evaluator::new();
        let outcome = evaluator.evaluate("1+2", &Map::new());
        assert!(outcome.success);
        assert_eq!(outcome.output, Some(json!(3)));
    }

    #[test]
    fn test_evaluate_input_field() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"price": 100}));
        let outcome = evaluator.evaluate("input.price*1.1", &input);
        assert!(outcome.success);
        assert_eq!(outcome.output, Some(json!(110)));
    }

    #[test]
    fn test_input_aliases_equivalent() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"qty": 4}));
        for alias in ["input", "record", "data", "value"] {
            let outcome = evaluator.evaluate(&format!("{alias}.qty * 2"), &input);
            assert_eq!(outcome.output, Some(json!(8)), "alias {alias}");
        }
    }

    #[test]
    fn test_bindings_resolve_as_bare_identifiers() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"price": 10}));
        let bindings = obj(json!({"variables": {"markup": 2}}));
        let outcome = evaluator.evaluate_with_bindings(
            "input.price * variables.markup",
            &input,
            &bindings,
            DEFAULT_EVAL_TIMEOUT,
        );
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.output, Some(json!(20)));
        // Bindings are scope entries, not record fields.
        let outcome = evaluator.evaluate_with_bindings(
            "input.variables",
            &input,
            &bindings,
            DEFAULT_EVAL_TIMEOUT,
        );
        assert_eq!(outcome.output, Some(json!(null)));
    }

    #[test]
    fn test_string_concatenation() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"first": "Ada", "last": "Lovelace"}));
        let outcome = evaluator.evaluate("input.first + ' ' + input.last", &input);
        assert_eq!(outcome.output, Some(json!("Ada Lovelace")));
    }

    #[test]
    fn test_ternary_and_comparison() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"qty": 0}));
        let outcome = evaluator.evaluate("input.qty > 0 ? 'in_stock' : 'sold_out'", &input);
        assert_eq!(outcome.output, Some(json!("sold_out")));
    }

    #[test]
    fn test_builtin_call() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"name": "widget"}));
        let outcome = evaluator.evaluate("upper(input.name)", &input);
        assert_eq!(outcome.output, Some(json!("WIDGET")));
    }

    #[test]
    fn test_missing_field_is_null() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"a": 1}));
        let outcome = evaluator.evaluate("coalesce(input.missing, 'fallback')", &input);
        assert_eq!(outcome.output, Some(json!("fallback")));
    }

    #[test]
    fn test_undefined_identifier_is_structured_failure() {
        let evaluator = Evaluator::new();
        let outcome = evaluator.evaluate("nonsense + 1", &Map::new());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("nonsense"));
    }

    #[test]
    fn test_syntax_error_is_structured_failure() {
        let evaluator = Evaluator::new();
        let outcome = evaluator.evaluate("1 +", &Map::new());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Syntax"));
    }

    #[test]
    fn test_division_by_zero() {
        let evaluator = Evaluator::new();
        let outcome = evaluator.evaluate("1 / 0", &Map::new());
        assert!(!outcome.success);
    }

    #[test]
    fn test_short_circuit_avoids_rhs_error() {
        let evaluator = Evaluator::new();
        let outcome = evaluator.evaluate("false && missing_fn()", &Map::new());
        assert_eq!(outcome.output, Some(json!(false)));
    }

    #[test]
    fn test_index_access() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"tags": ["a", "b"]}));
        let outcome = evaluator.evaluate("input.tags[1]", &input);
        assert_eq!(outcome.output, Some(json!("b")));
        let outcome = evaluator.evaluate("input.tags[9]", &input);
        assert_eq!(outcome.output, Some(json!(null)));
    }

    #[test]
    fn test_timeout_returns_failure_not_hang() {
        let evaluator = Evaluator::new();
        evaluator.register_function("slow", |_args| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(json!(1))
        });

        let outcome = evaluator.evaluate_with_timeout(
            "slow() + slow()",
            &Map::new(),
            Duration::from_millis(20),
        );
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_async_timeout_race() {
        let evaluator = Evaluator::new();
        evaluator.register_function("slow", |_args| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(json!(1))
        });

        let outcome = evaluator
            .evaluate_async("slow()", &Map::new(), Duration::from_millis(20))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().to_lowercase().contains("timed out"));
    }

    #[test]
    fn test_custom_function_round_trip() {
        let evaluator = Evaluator::new();
        evaluator.register_function("double", |args| {
            let n = args
                .first()
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0);
            Ok(json_number(n * 2.0))
        });
        let outcome = evaluator.evaluate("double(21)", &Map::new());
        assert_eq!(outcome.output, Some(json!(42)));

        assert!(evaluator.unregister_function("double"));
        let outcome = evaluator.evaluate("double(21)", &Map::new());
        assert!(!outcome.success);
    }

    #[test]
    fn test_no_state_leaks_between_calls() {
        let evaluator = Evaluator::new();
        let input = obj(json!({"x": 1}));
        let _ = evaluator.evaluate("input.x", &input);
        let outcome = evaluator.evaluate("input.x", &Map::new());
        assert_eq!(outcome.output, Some(json!(null)));
    }
}
