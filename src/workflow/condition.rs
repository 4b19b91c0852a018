//! 条件表达式求值
//!
//! 极小的表达式语法，够步骤守卫和分支判断用:
//! - `<var> <op> <literal>`，op 支持 == != > >= < <=
//! - 裸变量名按真值判断
//! - 前缀 `!` 取反
//!
//! 字面量优先按 JSON 标量解析，解析不动就当裸字符串。
//! 两侧都是数字走数值比较，否则按字符串比较。
//! 表达式畸形时返回 Err (fail-closed)，绝不静默当 false。

use anyhow::{Context, bail};
use serde_json::Value;

use crate::common::model::JsonMap;

/// 求值条件表达式
pub fn evaluate(expr: &str, vars: &JsonMap) -> anyhow::Result<bool> {
    let expr = expr.trim();
    if expr.is_empty() {
        bail!("empty condition expression");
    }
    // 前缀取反
    if let Some(rest) = expr.strip_prefix('!') {
        return Ok(!evaluate(rest, vars)?);
    }

    // 双字符运算符优先匹配，防止 ">=" 被切成 ">"
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(idx) = expr.find(op) {
            let lhs = expr[..idx].trim();
            let rhs = expr[idx + op.len()..].trim();
            if lhs.is_empty() || rhs.is_empty() {
                bail!("malformed condition: {expr}");
            }
            let left = lookup(lhs, vars);
            let right = parse_literal(rhs);
            return compare(op, &left, &right)
                .with_context(|| format!("condition: {expr}"));
        }
    }

    // 裸变量: 真值判断
    if !is_identifier(expr) {
        bail!("malformed condition: {expr}");
    }
    Ok(truthy(&lookup(expr, vars)))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// 变量查找，缺失按 Null 处理
fn lookup(name: &str, vars: &JsonMap) -> Value {
    vars.get(name).cloned().unwrap_or(Value::Null)
}

/// 字面量: JSON 标量优先，否则裸字符串
fn parse_literal(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) if !v.is_array() && !v.is_object() => v,
        _ => Value::String(raw.to_string()),
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> anyhow::Result<bool> {
    // 数值通道
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            ">=" => l >= r,
            "<" => l < r,
            "<=" => l <= r,
            _ => bail!("unknown operator: {op}"),
        });
    }

    // 等值比较对任意标量有定义
    match op {
        "==" => return Ok(scalar_text(left) == scalar_text(right)),
        "!=" => return Ok(scalar_text(left) != scalar_text(right)),
        _ => {}
    }

    // 序比较要求两侧都是字符串
    match (left.as_str(), right.as_str()) {
        (Some(l), Some(r)) => Ok(match op {
            ">" => l > r,
            ">=" => l >= r,
            "<" => l < r,
            "<=" => l <= r,
            _ => bail!("unknown operator: {op}"),
        }),
        _ => bail!(
            "cannot order-compare {left} and {right}"
        ),
    }
}

/// 标量的文本形态 (等值比较用，"1" 与 1 不混同由数值通道先行保证)
fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 真值规则: null/false/0/空串/空容器为假，其余为真
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> JsonMap {
        let mut m = JsonMap::new();
        m.insert("count".into(), json!(5));
        m.insert("name".into(), json!("alpha"));
        m.insert("ready".into(), json!(true));
        m.insert("empty".into(), json!(""));
        m
    }

    #[test]
    fn numeric_comparisons() {
        let v = vars();
        assert!(evaluate("count == 5", &v).unwrap());
        assert!(evaluate("count != 4", &v).unwrap());
        assert!(evaluate("count > 3", &v).unwrap());
        assert!(evaluate("count >= 5", &v).unwrap());
        assert!(!evaluate("count < 5", &v).unwrap());
        assert!(evaluate("count <= 5", &v).unwrap());
    }

    #[test]
    fn string_comparisons() {
        let v = vars();
        assert!(evaluate("name == alpha", &v).unwrap());
        assert!(evaluate("name == \"alpha\"", &v).unwrap());
        assert!(evaluate("name != beta", &v).unwrap());
        assert!(evaluate("name < beta", &v).unwrap());
    }

    #[test]
    fn truthiness_and_negation() {
        let v = vars();
        assert!(evaluate("ready", &v).unwrap());
        assert!(!evaluate("!ready", &v).unwrap());
        assert!(!evaluate("empty", &v).unwrap());
        assert!(!evaluate("missing_var", &v).unwrap());
        assert!(evaluate("!missing_var", &v).unwrap());
    }

    #[test]
    fn malformed_expressions_are_errors() {
        let v = vars();
        assert!(evaluate("", &v).is_err());
        assert!(evaluate("count >", &v).is_err());
        assert!(evaluate("== 5", &v).is_err());
        assert!(evaluate("a b c", &v).is_err());
        // 缺失变量 (Null) 不能参与序比较
        assert!(evaluate("missing_var > 3", &v).is_err());
    }
}
