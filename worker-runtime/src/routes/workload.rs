//! Workload cost strategies.
//!
//! A workload cost is a numeric proxy for how much capacity a request
//! consumes. The built-in strategies cover what a config file can express;
//! embedding applications can plug in their own through [`WorkloadStrategy`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Custom cost function supplied by the embedding application.
pub trait WorkloadStrategy: Send + Sync {
    /// Raw cost for a payload. Negative or non-finite values are clamped to 0.
    fn cost(&self, payload: &Value) -> f64;
}

/// How a route derives the cost of a request from its payload.
#[derive(Clone)]
pub enum WorkloadCalculator {
    /// Same cost for every request.
    Constant(f64),
    /// Numeric value of a payload field, or `default` when the field is absent.
    Field { field: String, default: f64 },
    Custom(Arc<dyn WorkloadStrategy>),
}

impl WorkloadCalculator {
    /// Cost of `payload`, never negative.
    pub fn cost(&self, payload: &Value) -> f64 {
        let raw = match self {
            WorkloadCalculator::Constant(value) => *value,
            WorkloadCalculator::Field { field, default } => match payload.get(field) {
                None | Some(Value::Null) => *default,
                Some(value) => numeric_value(value).unwrap_or(0.0),
            },
            WorkloadCalculator::Custom(strategy) => strategy.cost(payload),
        };
        clamp_cost(raw)
    }
}

impl Default for WorkloadCalculator {
    fn default() -> Self {
        WorkloadCalculator::Field {
            field: "max_tokens".to_string(),
            default: 0.0,
        }
    }
}

impl fmt::Debug for WorkloadCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadCalculator::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            WorkloadCalculator::Field { field, default } => f
                .debug_struct("Field")
                .field("field", field)
                .field("default", default)
                .finish(),
            WorkloadCalculator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Numbers and numeric strings count; anything else does not.
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn clamp_cost(raw: f64) -> f64 {
    if raw.is_finite() && raw > 0.0 {
        raw
    } else {
        0.0
    }
}
