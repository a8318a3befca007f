//! Recursive-descent parser from array expressions to [`Condition`] trees.
//!
//! An expression is a JSON array whose first element is a lowercase tag:
//!
//! ```text
//! ["and", expr, ...]   ["or", expr, ...]   ["not", expr]
//! ["event", "<name>"]  ["handles", [int, ...]]  ["uids", [int, ...]]
//! ["has", "<field>"]   ["eq", "<field>", <any value>]
//! ```
//!
//! Parsing is pure: it never consults runtime state. Any failure rejects the
//! whole expression.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::ParseError;

use super::Condition;

/// Default nesting limit for composite expressions.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Parse with the default depth limit.
pub fn parse(expr: &Value) -> Result<Condition, ParseError> {
    Parser::default().parse(expr)
}

/// Expression parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parser {
    max_depth: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Parser {
    /// Parser rejecting expressions nested deeper than `max_depth`.
    #[must_use]
    pub const fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// The configured nesting limit.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Parse one expression into a condition tree.
    pub fn parse(&self, expr: &Value) -> Result<Condition, ParseError> {
        self.parse_at(expr, 1)
    }

    /// Parse the elements `start..end` of an array, each as an expression.
    ///
    /// `end` defaults to the array length and is clamped to it.
    pub fn parse_args(
        &self,
        expr: &Value,
        start: usize,
        end: Option<usize>,
    ) -> Result<Vec<Condition>, ParseError> {
        let items = expr.as_array().ok_or(ParseError::InvalidCondition)?;
        let end = end.unwrap_or(items.len()).min(items.len());
        let slice = items.get(start..end).unwrap_or(&[]);
        self.parse_list(slice, 1)
    }

    fn parse_list(&self, items: &[Value], depth: usize) -> Result<Vec<Condition>, ParseError> {
        items.iter().map(|item| self.parse_at(item, depth)).collect()
    }

    fn parse_at(&self, expr: &Value, depth: usize) -> Result<Condition, ParseError> {
        if depth > self.max_depth {
            return Err(ParseError::TooDeep {
                max_depth: self.max_depth,
            });
        }

        let Some((Value::String(tag), args)) = expr.as_array().and_then(|a| a.split_first())
        else {
            return Err(ParseError::InvalidCondition);
        };
        let tag = tag.as_str();

        match tag {
            "and" | "or" => {
                if args.is_empty() {
                    return Err(ParseError::arity(tag, "one or more arguments"));
                }
                let children = self.parse_list(args, depth + 1)?;
                Ok(if tag == "and" {
                    Condition::And(children)
                } else {
                    Condition::Or(children)
                })
            }

            "not" => {
                let [child] = args else {
                    return Err(ParseError::arity(tag, "exactly one argument"));
                };
                Ok(Condition::not(self.parse_at(child, depth + 1)?))
            }

            "event" => Ok(Condition::EventType(single_string(tag, args)?)),

            "has" => Ok(Condition::Has(single_string(tag, args)?)),

            "handles" => Ok(Condition::Handles(single_int_set(tag, args)?)),

            "uids" => Ok(Condition::Uids(single_int_set(tag, args)?)),

            "eq" => {
                let [name, value] = args else {
                    return Err(ParseError::arity(tag, "exactly two arguments"));
                };
                let Value::String(name) = name else {
                    return Err(ParseError::argument(tag, "argument 1 must be a string"));
                };
                Ok(Condition::Eq {
                    field: name.clone(),
                    value: value.clone(),
                })
            }

            unknown => Err(ParseError::UnknownTag {
                tag: unknown.to_string(),
            }),
        }
    }
}

fn single_string(tag: &str, args: &[Value]) -> Result<String, ParseError> {
    let [arg] = args else {
        return Err(ParseError::arity(tag, "exactly one argument"));
    };
    arg.as_str()
        .map(str::to_string)
        .ok_or_else(|| ParseError::argument(tag, "argument must be a string"))
}

fn single_int_set(tag: &str, args: &[Value]) -> Result<BTreeSet<i64>, ParseError> {
    let [arg] = args else {
        return Err(ParseError::arity(tag, "exactly one argument"));
    };
    let items = arg
        .as_array()
        .ok_or_else(|| ParseError::argument(tag, "argument must be an array"))?;
    items
        .iter()
        .map(|item| {
            item.as_i64()
                .ok_or_else(|| ParseError::argument(tag, "argument items must be int"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventInfo;
    use serde_json::json;

    fn parse_err(expr: Value) -> ParseError {
        parse(&expr).unwrap_err()
    }

    #[test]
    fn parses_every_tag() {
        let c = parse(&json!([
            "and",
            ["or", ["event", "objectAdded"], ["not", ["has", "x"]]],
            ["handles", [3, 7]],
            ["uids", [9000000000i64]],
            ["eq", "name", {"first": "a"}]
        ]))
        .unwrap();

        assert_eq!(
            c,
            Condition::and([
                Condition::or([
                    Condition::event("objectAdded"),
                    Condition::not(Condition::has("x")),
                ]),
                Condition::handles([3, 7]),
                Condition::uids([9_000_000_000]),
                Condition::eq("name", json!({"first": "a"})),
            ])
        );
    }

    #[test]
    fn single_child_and_behaves_like_child() {
        let c = parse(&json!(["and", ["event", "a"]])).unwrap();
        let hit = EventInfo::new("a", 0, 0, 0);
        let miss = EventInfo::new("b", 0, 0, 0);
        assert!(c.matches(&hit, &json!({})));
        assert!(!c.matches(&miss, &json!({})));
    }

    #[test]
    fn top_level_shape_is_checked() {
        assert_eq!(parse_err(json!("and")), ParseError::InvalidCondition);
        assert_eq!(parse_err(json!([])), ParseError::InvalidCondition);
        assert_eq!(parse_err(json!([1, 2])), ParseError::InvalidCondition);
        assert_eq!(parse_err(json!({"and": []})), ParseError::InvalidCondition);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = parse_err(json!(["bogus"]));
        assert_eq!(err.tag(), Some("bogus"));
        assert!(err.to_string().contains("invalid condition type"));

        // Tags are case-sensitive.
        assert!(matches!(parse_err(json!(["AND", ["has", "x"]])), ParseError::UnknownTag { .. }));
    }

    #[test]
    fn arity_is_checked() {
        assert_eq!(
            parse_err(json!(["and"])),
            ParseError::arity("and", "one or more arguments")
        );
        assert_eq!(
            parse_err(json!(["or"])),
            ParseError::arity("or", "one or more arguments")
        );
        assert_eq!(
            parse_err(json!(["not", ["has", "a"], ["has", "b"]])),
            ParseError::arity("not", "exactly one argument")
        );
        assert_eq!(
            parse_err(json!(["event", "a", "b"])),
            ParseError::arity("event", "exactly one argument")
        );
        assert_eq!(
            parse_err(json!(["eq", "x"])),
            ParseError::arity("eq", "exactly two arguments")
        );
        assert_eq!(
            parse_err(json!(["has"])),
            ParseError::arity("has", "exactly one argument")
        );
    }

    #[test]
    fn argument_types_are_checked() {
        assert_eq!(
            parse_err(json!(["event", 3])),
            ParseError::argument("event", "argument must be a string")
        );
        assert_eq!(
            parse_err(json!(["handles", 3])),
            ParseError::argument("handles", "argument must be an array")
        );
        assert_eq!(
            parse_err(json!(["handles", [1, "2"]])),
            ParseError::argument("handles", "argument items must be int")
        );
        assert_eq!(
            parse_err(json!(["uids", [1.5]])),
            ParseError::argument("uids", "argument items must be int")
        );
        assert_eq!(
            parse_err(json!(["eq", 1, 2])),
            ParseError::argument("eq", "argument 1 must be a string")
        );
    }

    #[test]
    fn nested_failure_rejects_the_whole_expression() {
        let err = parse_err(json!(["and", ["has", "ok"], ["or", ["event", "a"], ["bogus"]]]));
        assert_eq!(err.tag(), Some("bogus"));
    }

    #[test]
    fn eq_accepts_any_value() {
        for value in [json!(null), json!(true), json!(1.25), json!([1, [2]]), json!({"a": {}})] {
            let c = parse(&json!(["eq", "f", value.clone()])).unwrap();
            assert_eq!(c, Condition::eq("f", value));
        }
    }

    #[test]
    fn depth_limit_applies() {
        let mut expr = json!(["has", "x"]);
        for _ in 0..4 {
            expr = json!(["not", expr]);
        }
        // Five levels deep.
        assert!(Parser::new(5).parse(&expr).is_ok());
        assert_eq!(
            Parser::new(4).parse(&expr).unwrap_err(),
            ParseError::TooDeep { max_depth: 4 }
        );
    }

    #[test]
    fn parse_args_parses_a_slice() {
        let expr = json!(["and", ["has", "a"], ["has", "b"], ["has", "c"]]);
        let parser = Parser::default();

        let all = parser.parse_args(&expr, 1, None).unwrap();
        assert_eq!(all, vec![Condition::has("a"), Condition::has("b"), Condition::has("c")]);

        let middle = parser.parse_args(&expr, 2, Some(3)).unwrap();
        assert_eq!(middle, vec![Condition::has("b")]);

        assert!(parser.parse_args(&expr, 3, Some(99)).unwrap().len() == 1);
        assert!(parser.parse_args(&expr, 5, None).unwrap().is_empty());

        // Element 0 is the tag string, not an expression.
        assert_eq!(
            parser.parse_args(&expr, 0, Some(1)).unwrap_err(),
            ParseError::InvalidCondition
        );
    }
}
