//! MiniPython tree-walking evaluator
//!
//! A teaching subset of Python: ints, strings, bools and None, f-strings,
//! `if`/`while`, and the builtins a beginner's first programs reach for
//! (`print`, `input`, `int`, `str`, `len`, `exit`). Globals do not survive
//! between runs.

use super::parser::{parse_program, BinOp, Expr, FPart, Stmt};
use super::{InterruptSource, Interpreter, RunError, StdIo};
use std::collections::HashMap;
use std::fmt;

/// Runtime values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Exception instance, e.g. `ValueError("bad")`
    Exception { kind: String, message: String },
}

impl Value {
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Exception { kind, .. } => kind,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Str(s) => !s.is_empty(),
            Self::Exception { .. } => true,
        }
    }

    /// Python `repr()`
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Exception { kind, message } => format!("{}('{}')", kind, message),
            other => other.to_string(),
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{}", s),
            Self::Exception { message, .. } => write!(f, "{}", message),
        }
    }
}

/// Exception kinds the builtins can construct
const EXCEPTION_KINDS: &[&str] = &[
    "Exception",
    "ValueError",
    "TypeError",
    "RuntimeError",
    "NameError",
    "ZeroDivisionError",
];

fn exception(kind: &str, message: impl Into<String>) -> RunError {
    let message = message.into();
    if message.is_empty() {
        RunError::Exception(kind.to_string())
    } else {
        RunError::Exception(format!("{}: {}", kind, message))
    }
}

fn type_error(message: impl Into<String>) -> RunError {
    exception("TypeError", message)
}

/// Loop control escaping a block
enum Flow {
    Break,
    Continue,
}

/// The bundled interpreter
#[derive(Debug, Default)]
pub struct MiniPython {
    interrupt: Option<InterruptSource>,
    globals: HashMap<String, Value>,
}

impl MiniPython {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Interpreter for MiniPython {
    fn name(&self) -> &str {
        "minipython"
    }

    fn set_interrupt_source(&mut self, source: InterruptSource) {
        self.interrupt = Some(source);
    }

    fn run(&mut self, source: &str, io: &mut dyn StdIo) -> Result<(), RunError> {
        self.globals.clear();
        let program = parse_program(source).map_err(|e| RunError::Exception(e.to_string()))?;
        let mut frame = Frame {
            globals: &mut self.globals,
            interrupt: self.interrupt.as_ref(),
            io,
        };
        // break/continue outside a loop are rejected by the parser
        frame.exec_block(&program).map(|_| ())
    }
}

struct Frame<'a, 'io> {
    globals: &'a mut HashMap<String, Value>,
    interrupt: Option<&'a InterruptSource>,
    io: &'a mut (dyn StdIo + 'io),
}

impl Frame<'_, '_> {
    fn checkpoint(&self) -> Result<(), RunError> {
        match self.interrupt {
            Some(source) => source.check(),
            None => Ok(()),
        }
    }

    fn exec_block(&mut self, block: &[Stmt]) -> Result<Option<Flow>, RunError> {
        for stmt in block {
            if let Some(flow) = self.exec(stmt)? {
                return Ok(Some(flow));
            }
        }
        Ok(None)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Option<Flow>, RunError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value)?;
                self.globals.insert(name.clone(), value);
            }
            Stmt::AugAssign { name, op, value } => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let result = binary(*op, &current, &rhs)?;
                self.globals.insert(name.clone(), result);
            }
            Stmt::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            Stmt::While { cond, body } => loop {
                self.checkpoint()?;
                if !self.eval(cond)?.is_truthy() {
                    break;
                }
                if let Some(Flow::Break) = self.exec_block(body)? {
                    break;
                }
            },
            Stmt::Break => return Ok(Some(Flow::Break)),
            Stmt::Continue => return Ok(Some(Flow::Continue)),
            Stmt::Pass => {}
            Stmt::Raise(None) => {
                return Err(exception("RuntimeError", "No active exception to reraise"));
            }
            Stmt::Raise(Some(expr)) => {
                return Err(match self.eval(expr)? {
                    Value::Exception { kind, message } => exception(&kind, message),
                    _ => type_error("exceptions must derive from BaseException"),
                });
            }
        }
        Ok(None)
    }

    fn lookup(&self, name: &str) -> Result<Value, RunError> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| exception("NameError", format!("name '{}' is not defined", name)))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, RunError> {
        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::FStr(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Text(text) => out.push_str(text),
                        FPart::Field(expr) => out.push_str(&self.eval(expr)?.to_string()),
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::Neg(inner) => match self.eval(inner)? {
                v @ (Value::Int(_) | Value::Bool(_)) => v
                    .as_int()
                    .and_then(i64::checked_neg)
                    .map(Value::Int)
                    .ok_or_else(|| exception("OverflowError", "integer overflow")),
                other => Err(type_error(format!(
                    "bad operand type for unary -: '{}'",
                    other.type_name()
                ))),
            },
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::And(lhs, rhs) => {
                let left = self.eval(lhs)?;
                if left.is_truthy() {
                    self.eval(rhs)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(lhs, rhs) => {
                let left = self.eval(lhs)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                binary(*op, &left, &right)
            }
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, values)
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, RunError> {
        match name {
            "print" => {
                let line = args
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.io.write_stdout(format!("{}\n", line).as_bytes())?;
                Ok(Value::None)
            }
            "input" => {
                let prompt = optional_arg(name, args)?;
                if let Some(prompt) = prompt {
                    let prompt = prompt.to_string();
                    if !prompt.is_empty() {
                        self.io.write_stdout(prompt.as_bytes())?;
                    }
                }
                let mut line = self.io.read_line()?;
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Ok(Value::Str(line))
            }
            "int" => match optional_arg(name, args)? {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| {
                    exception(
                        "ValueError",
                        format!(
                            "invalid literal for int() with base 10: {}",
                            Value::Str(s.clone()).repr()
                        ),
                    )
                }),
                Some(v) => v.as_int().map(Value::Int).ok_or_else(|| {
                    type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        v.type_name()
                    ))
                }),
            },
            "str" => Ok(Value::Str(
                optional_arg(name, args)?
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            )),
            "len" => match exactly_one(name, args)? {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
            },
            "exit" | "quit" => {
                let code = match optional_arg(name, args)? {
                    None | Some(Value::None) => 0,
                    Some(v) => v
                        .as_int()
                        .and_then(|code| i32::try_from(code).ok())
                        .unwrap_or(1),
                };
                Err(RunError::Exit(code))
            }
            kind if EXCEPTION_KINDS.contains(&kind) => Ok(Value::Exception {
                kind: kind.to_string(),
                message: optional_arg(name, args)?
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            }),
            other => match self.globals.get(other) {
                Some(value) => Err(type_error(format!(
                    "'{}' object is not callable",
                    value.type_name()
                ))),
                None => Err(exception(
                    "NameError",
                    format!("name '{}' is not defined", other),
                )),
            },
        }
    }
}

fn optional_arg(name: &str, mut args: Vec<Value>) -> Result<Option<Value>, RunError> {
    match args.len() {
        0 => Ok(None),
        1 => Ok(args.pop()),
        n => Err(type_error(format!(
            "{}() takes at most 1 argument ({} given)",
            name, n
        ))),
    }
}

fn exactly_one(name: &str, mut args: Vec<Value>) -> Result<Value, RunError> {
    match (args.len(), args.pop()) {
        (1, Some(value)) => Ok(value),
        (n, _) => Err(type_error(format!(
            "{}() takes exactly one argument ({} given)",
            name, n
        ))),
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, RunError> {
    let unsupported = || {
        type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))
    };
    let overflow = || exception("OverflowError", "integer overflow");

    match op {
        BinOp::Eq => return Ok(Value::Bool(values_equal(lhs, rhs))),
        BinOp::Ne => return Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => match (lhs.as_int(), rhs.as_int()) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    _ => {
                        return Err(type_error(format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            op.symbol(),
                            lhs.type_name(),
                            rhs.type_name()
                        )));
                    }
                },
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) => {
            return match n.as_int() {
                Some(count) => Ok(Value::Str(s.repeat(count.max(0) as usize))),
                None => Err(unsupported()),
            };
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) else {
        return Err(unsupported());
    };
    let result = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::FloorDiv | BinOp::Mod if b == 0 => {
            return Err(exception(
                "ZeroDivisionError",
                "integer division or modulo by zero",
            ));
        }
        BinOp::FloorDiv => floor_div(a, b).ok_or_else(overflow)?,
        BinOp::Mod => floor_mod(a, b).ok_or_else(overflow)?,
        _ => return Err(unsupported()),
    };
    Ok(Value::Int(result))
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_int(), rhs.as_int()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}
