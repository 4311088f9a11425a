//! Transition guards.
//!
//! A guard is a predicate over the entity and the incoming event. A
//! transition with several guards is allowed when **any** of them passes;
//! each guard is an independent "allow" condition, not a conjunct.
//!
//! Besides arbitrary closures, a few JSON path helpers are provided:
//!
//! - `Guard::ctx_truthy("approval.granted")` - context field is truthy
//! - `Guard::ctx_eq("tier", json!("gold"))` - context field equals a value
//! - `Guard::payload_truthy("force")` - event payload field is truthy
//! - `Guard::payload_eq("reason", json!("fraud"))` - payload field equals a value

use crate::entity::Entity;
use crate::event::Event;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type Predicate = dyn Fn(&Entity, &Event) -> bool + Send + Sync;

/// A named predicate gating a transition.
#[derive(Clone)]
pub struct Guard {
    description: String,
    check: Arc<Predicate>,
}

impl Guard {
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Entity, &Event) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Context field at `path` is truthy.
    pub fn ctx_truthy(path: &str) -> Self {
        let field = path.to_string();
        Self::new(format!("ctx.{}", path), move |entity, _| {
            is_truthy(get_field(&entity.ctx, &field))
        })
    }

    /// Context field at `path` equals `expected`.
    pub fn ctx_eq(path: &str, expected: Value) -> Self {
        let field = path.to_string();
        Self::new(format!("ctx.{} == {}", path, expected), move |entity, _| {
            values_equal(get_field(&entity.ctx, &field), &expected)
        })
    }

    /// Payload field at `path` is truthy. Never passes for timer events.
    pub fn payload_truthy(path: &str) -> Self {
        let field = path.to_string();
        Self::new(format!("event.{}", path), move |_, event| {
            event
                .payload()
                .map(|p| is_truthy(get_field(p, &field)))
                .unwrap_or(false)
        })
    }

    /// Payload field at `path` equals `expected`. Never passes for timer events.
    pub fn payload_eq(path: &str, expected: Value) -> Self {
        let field = path.to_string();
        Self::new(format!("event.{} == {}", path, expected), move |_, event| {
            event
                .payload()
                .map(|p| values_equal(get_field(p, &field), &expected))
                .unwrap_or(false)
        })
    }

    pub fn evaluate(&self, entity: &Entity, event: &Event) -> bool {
        (self.check)(entity, event)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guard").field(&self.description).finish()
    }
}

/// Disjunctive evaluation: no guards means allowed, otherwise any passing
/// guard allows. Most recently attached guards are consulted first.
pub(crate) fn any_allows(guards: &[Guard], entity: &Entity, event: &Event) -> bool {
    guards.is_empty() || guards.iter().rev().any(|g| g.evaluate(entity, event))
}

static NULL: Value = Value::Null;

fn get_field<'a>(root: &'a Value, path: &str) -> &'a Value {
    let mut current = root;
    for part in path.split('.') {
        match current {
            Value::Object(map) => match map.get(part) {
                Some(v) => current = v,
                None => return &NULL,
            },
            _ => return &NULL,
        }
    }
    current
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn entity(ctx: Value) -> Entity {
        Entity::new("e-1", "order", "active", ctx, 0)
    }

    #[test]
    fn test_ctx_truthy() {
        let guard = Guard::ctx_truthy("approval.granted");
        let event = Event::named("SHIP");
        assert!(guard.evaluate(&entity(json!({"approval": {"granted": true}})), &event));
        assert!(!guard.evaluate(&entity(json!({"approval": {"granted": false}})), &event));
        assert!(!guard.evaluate(&entity(json!({})), &event));
        assert!(!guard.evaluate(&entity(Value::Null), &event));
    }

    #[test]
    fn test_ctx_eq_numbers_and_strings() {
        let e = entity(json!({"amount": 100, "tier": "gold"}));
        let event = Event::named("PAY");
        assert!(Guard::ctx_eq("amount", json!(100.0)).evaluate(&e, &event));
        assert!(Guard::ctx_eq("tier", json!("gold")).evaluate(&e, &event));
        assert!(!Guard::ctx_eq("tier", json!("silver")).evaluate(&e, &event));
    }

    #[test]
    fn test_payload_guards() {
        let e = entity(json!({}));
        let event = Event::with_payload("CANCEL", json!({"reason": "fraud", "force": 1}));
        assert!(Guard::payload_eq("reason", json!("fraud")).evaluate(&e, &event));
        assert!(Guard::payload_truthy("force").evaluate(&e, &event));

        let timer = Event::timer(Duration::from_secs(1));
        assert!(!Guard::payload_truthy("force").evaluate(&e, &timer));
    }

    #[test]
    fn test_any_allows_is_disjunction() {
        let e = entity(json!({}));
        let event = Event::named("GO");
        let deny = Guard::new("deny", |_, _| false);
        let allow = Guard::new("allow", |_, _| true);

        assert!(any_allows(&[], &e, &event));
        assert!(!any_allows(&[deny.clone()], &e, &event));
        assert!(any_allows(&[deny.clone(), allow.clone()], &e, &event));
        assert!(any_allows(&[allow, deny], &e, &event));
    }

    #[test]
    fn test_description() {
        assert_eq!(Guard::ctx_truthy("ready").description(), "ctx.ready");
        assert_eq!(
            format!("{:?}", Guard::payload_eq("n", json!(1))),
            "Guard(\"event.n == 1\")"
        );
    }
}
