//! Four-function calculator endpoint.

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::server::{require_object, ApiError, ApiReply};

/// Arithmetic operation selected by the numeric `op` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Operation::Add),
            2 => Some(Operation::Subtract),
            3 => Some(Operation::Multiply),
            4 => Some(Operation::Divide),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CalcError {
    #[error("num1, num2 and op are required")]
    MissingField,
    #[error("{0} is not a valid number")]
    InvalidOperand(&'static str),
    #[error("division by zero")]
    DivideByZero,
    #[error("unknown operation code")]
    InvalidOperation,
    #[error("result is not a finite number")]
    OutOfRange,
}

impl From<CalcError> for ApiError {
    fn from(err: CalcError) -> Self {
        match err {
            CalcError::MissingField => ApiError::bad_request("Bad Request"),
            CalcError::InvalidOperand(_) => ApiError::bad_request("Invalid Operand"),
            CalcError::DivideByZero => ApiError::bad_request("Divide by Zero"),
            CalcError::InvalidOperation => ApiError::bad_request("Invalid Operation"),
            CalcError::OutOfRange => ApiError::bad_request("Result Out of Range"),
        }
    }
}

/// Applies operation `op` to the operands with IEEE-754 semantics.
///
/// Division checks for a zero divisor before dividing. Results that overflow
/// to infinity are rejected since JSON cannot carry them.
pub fn evaluate(lhs: f64, rhs: f64, op: i64) -> Result<f64, CalcError> {
    let operation = Operation::from_code(op).ok_or(CalcError::InvalidOperation)?;
    let result = match operation {
        Operation::Add => lhs + rhs,
        Operation::Subtract => lhs - rhs,
        Operation::Multiply => lhs * rhs,
        Operation::Divide => {
            if rhs == 0.0 {
                return Err(CalcError::DivideByZero);
            }
            lhs / rhs
        }
    };

    if result.is_finite() {
        Ok(result)
    } else {
        Err(CalcError::OutOfRange)
    }
}

#[derive(Debug, Serialize)]
pub struct CalcResponse {
    pub res: f64,
}

pub(crate) async fn handle_calc(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<ApiReply<CalcResponse>, ApiError> {
    let body = require_object(payload)?;
    let res = calculate(&body).map_err(|err| {
        debug!("calc rejected: {}", err);
        ApiError::from(err)
    })?;
    Ok(ApiReply::ok(CalcResponse { res }))
}

fn calculate(body: &Map<String, Value>) -> Result<f64, CalcError> {
    let (Some(num1), Some(num2), Some(op)) = (
        present(body, "num1"),
        present(body, "num2"),
        present(body, "op"),
    ) else {
        return Err(CalcError::MissingField);
    };

    let lhs = coerce_operand(num1, "num1")?;
    let rhs = coerce_operand(num2, "num2")?;
    let op = coerce_op(op)?;
    evaluate(lhs, rhs, op)
}

fn present<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    body.get(key).filter(|value| !value.is_null())
}

fn coerce_operand(value: &Value, field: &'static str) -> Result<f64, CalcError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or(CalcError::InvalidOperand(field))
}

// Floats truncate toward zero; strings must hold an integer.
fn coerce_op(value: &Value) -> Result<i64, CalcError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    parsed.ok_or(CalcError::InvalidOperand("op"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn evaluate_matches_float_arithmetic() {
        let pairs = [(1.5, 2.25), (-3.0, 7.0), (0.1, 0.2), (1e10, -1e-10)];
        for (a, b) in pairs {
            assert_eq!(evaluate(a, b, 1), Ok(a + b));
            assert_eq!(evaluate(a, b, 2), Ok(a - b));
            assert_eq!(evaluate(a, b, 3), Ok(a * b));
            assert_eq!(evaluate(a, b, 4), Ok(a / b));
        }
    }

    #[test]
    fn divide_by_zero_is_rejected_for_any_dividend() {
        for a in [0.0, 1.0, -5.5, f64::MAX] {
            assert_eq!(evaluate(a, 0.0, 4), Err(CalcError::DivideByZero));
            assert_eq!(evaluate(a, -0.0, 4), Err(CalcError::DivideByZero));
        }
    }

    #[test]
    fn unknown_codes_are_invalid_operations() {
        for op in [0, 5, -1, 42, i64::MAX] {
            assert_eq!(evaluate(1.0, 0.0, op), Err(CalcError::InvalidOperation));
        }
    }

    #[test]
    fn overflow_is_out_of_range() {
        assert_eq!(evaluate(f64::MAX, f64::MAX, 3), Err(CalcError::OutOfRange));
    }

    #[test]
    fn operands_accept_numeric_strings_and_bools() {
        let request = body(json!({"num1": " 2.5 ", "num2": true, "op": "3"}));
        assert_eq!(calculate(&request), Ok(2.5));
    }

    #[test]
    fn float_op_codes_truncate() {
        let request = body(json!({"num1": 9, "num2": 3, "op": 4.9}));
        assert_eq!(calculate(&request), Ok(3.0));
    }

    #[test]
    fn null_fields_count_as_missing() {
        let request = body(json!({"num1": 1, "num2": null, "op": 1}));
        assert_eq!(calculate(&request), Err(CalcError::MissingField));
    }

    #[test]
    fn non_numeric_input_is_an_invalid_operand() {
        let request = body(json!({"num1": "abc", "num2": 1, "op": 1}));
        assert_eq!(calculate(&request), Err(CalcError::InvalidOperand("num1")));

        let request = body(json!({"num1": 1, "num2": "inf", "op": 1}));
        assert_eq!(calculate(&request), Err(CalcError::InvalidOperand("num2")));

        let request = body(json!({"num1": 1, "num2": 1, "op": "2.5"}));
        assert_eq!(calculate(&request), Err(CalcError::InvalidOperand("op")));

        let request = body(json!({"num1": [1], "num2": 1, "op": 1}));
        assert_eq!(calculate(&request), Err(CalcError::InvalidOperand("num1")));
    }
}
