//! Rule body encoding
//!
//! Turning an expression tree into `NFTA_RULE_EXPRESSIONS` (and back) is
//! the job of a `RuleCodec`. This crate only moves the result across the
//! channel; `RawExprCodec` maps the opaque `Expr` values one-to-one.

use thiserror::Error;

use crate::model::{Expr, Rule};
use crate::netlink::descriptor::{ExprDescriptor, RuleDescriptor};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot encode expression '{name}': {reason}")]
    Unsupported { name: String, reason: String },

    #[error("malformed expression list: {0}")]
    Malformed(String),
}

/// Encoder/decoder for rule bodies
///
/// Both directions must fail cleanly: an error is reported and the rule is
/// skipped, it never aborts the process.
pub trait RuleCodec {
    /// Fill the expression list (and optionally the position) of `desc`
    fn encode_rule(&self, desc: &mut RuleDescriptor, rule: &Rule) -> Result<(), CodecError>;

    /// Build the expression list of a kernel-reported rule
    fn decode_rule(&self, desc: &RuleDescriptor) -> Result<Vec<Expr>, CodecError>;
}

/// Passes expressions through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct RawExprCodec;

impl RuleCodec for RawExprCodec {
    fn encode_rule(&self, desc: &mut RuleDescriptor, rule: &Rule) -> Result<(), CodecError> {
        let mut exprs = Vec::with_capacity(rule.exprs.len());
        for expr in &rule.exprs {
            if expr.name.is_empty() {
                return Err(CodecError::Unsupported {
                    name: expr.name.clone(),
                    reason: "expression has no name".to_string(),
                });
            }
            exprs.push(ExprDescriptor {
                name: Some(expr.name.clone()),
                data: expr.data.clone(),
            });
        }
        desc.expressions = Some(exprs);
        Ok(())
    }

    fn decode_rule(&self, desc: &RuleDescriptor) -> Result<Vec<Expr>, CodecError> {
        desc.expressions
            .iter()
            .flatten()
            .map(|e| match &e.name {
                Some(name) => Ok(Expr::new(name.clone(), e.data.clone())),
                None => Err(CodecError::Malformed(
                    "expression without NFTA_EXPR_NAME".to_string(),
                )),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Family, Handle};
    use crate::netlink::descriptor::build_rule;

    #[test]
    fn test_encode_fills_expression_list() {
        let h = Handle::chain(Family::Inet, "filter", "input");
        let rule = Rule::new(h.clone(), vec![Expr::new("counter", vec![0, 0, 0, 0])]);
        let mut desc = build_rule(&h);

        RawExprCodec.encode_rule(&mut desc, &rule).expect("encode");
        let exprs = desc.expressions.as_ref().expect("expressions set");
        assert_eq!(exprs.len(), 1);
        assert_eq!(exprs[0].name.as_deref(), Some("counter"));
    }

    #[test]
    fn test_encode_rejects_unnamed_expression() {
        let h = Handle::chain(Family::Inet, "filter", "input");
        let rule = Rule::new(h.clone(), vec![Expr::new("", Vec::new())]);
        let mut desc = build_rule(&h);

        let err = RawExprCodec.encode_rule(&mut desc, &rule).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { .. }));
        assert!(desc.expressions.is_none());
    }

    #[test]
    fn test_decode_rejects_nameless_expression() {
        let mut desc = build_rule(&Handle::chain(Family::Inet, "filter", "input"));
        desc.expressions = Some(vec![ExprDescriptor {
            name: None,
            data: Vec::new(),
        }]);
        assert!(RawExprCodec.decode_rule(&desc).is_err());
    }
}
