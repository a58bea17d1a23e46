//! The workflow edge condition language.
//!
//! ```text
//! expr := 'true' | ''                                  # empty condition is true
//!       | run.state (==|!=) Identifier                 (case-insensitive)
//!       | node.state / node.attempt (==|!=|<|>|<=|>=) Literal
//!       | context.<key> (==|!=|<|>|<=|>=) Literal
//! ```
//!
//! A missing context key evaluates to `false`. A malformed expression also
//! evaluates to `false` -- non-activation, never a runtime error.

use std::collections::HashMap;

/// The facts a condition is evaluated against: the state of the node that
/// just finished, plus the execution's accumulated context.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub run_state: Option<String>,
    pub node_state: String,
    pub node_attempt: i64,
    pub context: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

fn split_operator(expr: &str) -> Option<(&str, Op, &str)> {
    const OPS: [(&str, Op); 6] = [
        ("==", Op::Eq),
        ("!=", Op::Ne),
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("<", Op::Lt),
        (">", Op::Gt),
    ];
    for (token, op) in OPS {
        if let Some(pos) = expr.find(token) {
            let lhs = expr[..pos].trim();
            let rhs = expr[pos + token.len()..].trim();
            if !lhs.is_empty() && !rhs.is_empty() {
                return Some((lhs, op, rhs));
            }
        }
    }
    None
}

fn compare_numeric(lhs: f64, op: Op, rhs: f64) -> bool {
    match op {
        Op::Eq => lhs == rhs,
        Op::Ne => lhs != rhs,
        Op::Lt => lhs < rhs,
        Op::Gt => lhs > rhs,
        Op::Le => lhs <= rhs,
        Op::Ge => lhs >= rhs,
    }
}

fn compare_string(lhs: &str, op: Op, rhs: &str) -> bool {
    match op {
        Op::Eq => lhs.eq_ignore_ascii_case(rhs),
        Op::Ne => !lhs.eq_ignore_ascii_case(rhs),
        // Ordering operators on non-numeric strings are malformed -> false.
        _ => false,
    }
}

/// Evaluate a condition expression against `ctx`. Never errors: any
/// malformed input or missing reference yields `false`.
pub fn evaluate(expr: &str, ctx: &EvalContext) -> bool {
    let trimmed = expr.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("true") {
        return true;
    }

    let Some((lhs, op, rhs)) = split_operator(trimmed) else {
        return false;
    };

    if lhs == "run.state" {
        let Some(state) = &ctx.run_state else {
            return false;
        };
        return matches!(op, Op::Eq | Op::Ne) && compare_string(state, op, rhs);
    }

    if lhs == "node.state" {
        return compare_string(&ctx.node_state, op, rhs);
    }

    if lhs == "node.attempt" {
        return match rhs.parse::<f64>() {
            Ok(rhs_num) => compare_numeric(ctx.node_attempt as f64, op, rhs_num),
            Err(_) => false,
        };
    }

    if let Some(key) = lhs.strip_prefix("context.") {
        let Some(value) = ctx.context.get(key) else {
            return false;
        };
        if let (Ok(lhs_num), Ok(rhs_num)) = (value.parse::<f64>(), rhs.parse::<f64>()) {
            return compare_numeric(lhs_num, op, rhs_num);
        }
        return matches!(op, Op::Eq | Op::Ne) && compare_string(value, op, rhs);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvalContext {
        EvalContext {
            run_state: Some("succeeded".to_string()),
            node_state: "succeeded".to_string(),
            node_attempt: 2,
            context: HashMap::from([("score".to_string(), "7".to_string())]),
        }
    }

    #[test]
    fn empty_condition_is_true() {
        assert!(evaluate("", &ctx()));
        assert!(evaluate("true", &ctx()));
        assert!(evaluate("TRUE", &ctx()));
    }

    #[test]
    fn run_state_equality_is_case_insensitive() {
        assert!(evaluate("run.state == Succeeded", &ctx()));
        assert!(!evaluate("run.state != Succeeded", &ctx()));
    }

    #[test]
    fn node_attempt_numeric_comparison() {
        assert!(evaluate("node.attempt >= 2", &ctx()));
        assert!(evaluate("node.attempt < 3", &ctx()));
        assert!(!evaluate("node.attempt > 5", &ctx()));
    }

    #[test]
    fn context_key_numeric_comparison() {
        assert!(evaluate("context.score > 5", &ctx()));
        assert!(!evaluate("context.score < 5", &ctx()));
    }

    #[test]
    fn missing_context_key_is_false() {
        assert!(!evaluate("context.missing == 1", &ctx()));
    }

    #[test]
    fn malformed_expression_is_false() {
        assert!(!evaluate("garbage nonsense", &ctx()));
        assert!(!evaluate("run.state ?? Succeeded", &ctx()));
    }

    #[test]
    fn ordering_operator_on_non_numeric_run_state_is_false() {
        assert!(!evaluate("run.state < Succeeded", &ctx()));
    }
}
