//! Property-based tests for condition evaluation and the expression grammar.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use evprobe::{parse, Condition, EventInfo};

const EVENTS: [&str; 4] = ["objectAdded", "objectChanged", "objectRemoved", "tick"];
const FIELDS: [&str; 3] = ["a", "b", "parentHandle"];

fn leaf_strategy() -> impl Strategy<Value = Condition> {
    prop_oneof![
        prop::sample::select(EVENTS.to_vec()).prop_map(Condition::event),
        prop::collection::btree_set(0i64..6, 0..4).prop_map(Condition::handles),
        prop::collection::btree_set(0i64..6, 0..4).prop_map(Condition::uids),
        prop::sample::select(FIELDS.to_vec()).prop_map(Condition::has),
        (prop::sample::select(FIELDS.to_vec()), 0i64..4)
            .prop_map(|(field, value)| Condition::eq(field, value)),
    ]
}

fn condition_strategy() -> impl Strategy<Value = Condition> {
    leaf_strategy().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Condition::and),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Condition::or),
            inner.prop_map(Condition::not),
        ]
    })
}

fn event_strategy() -> impl Strategy<Value = (EventInfo, Value)> {
    (
        prop::sample::select(EVENTS.to_vec()),
        0i64..6,
        0i64..6,
        prop::collection::vec((prop::sample::select(FIELDS.to_vec()), 0i64..4), 0..3),
    )
        .prop_map(|(event, handle, uid, fields)| {
            let mut data = Map::new();
            for (name, value) in fields {
                data.insert(name.to_string(), json!(value));
            }
            (EventInfo::new(event, 0, uid, handle), Value::Object(data))
        })
}

proptest! {
    #[test]
    fn double_negation_is_identity(c in condition_strategy(), (info, data) in event_strategy()) {
        let doubled = Condition::not(Condition::not(c.clone()));
        prop_assert_eq!(doubled.matches(&info, &data), c.matches(&info, &data));
    }

    #[test]
    fn single_child_composites_are_transparent(c in condition_strategy(), (info, data) in event_strategy()) {
        let expected = c.matches(&info, &data);
        prop_assert_eq!(Condition::and([c.clone()]).matches(&info, &data), expected);
        prop_assert_eq!(Condition::or([c]).matches(&info, &data), expected);
    }

    #[test]
    fn de_morgan_holds(
        a in condition_strategy(),
        b in condition_strategy(),
        (info, data) in event_strategy()
    ) {
        let lhs = Condition::not(Condition::and([a.clone(), b.clone()]));
        let rhs = Condition::or([Condition::not(a), Condition::not(b)]);
        prop_assert_eq!(lhs.matches(&info, &data), rhs.matches(&info, &data));
    }

    #[test]
    fn and_or_are_associative(
        a in condition_strategy(),
        b in condition_strategy(),
        c in condition_strategy(),
        (info, data) in event_strategy()
    ) {
        let left = Condition::and([Condition::and([a.clone(), b.clone()]), c.clone()]);
        let right = Condition::and([a.clone(), Condition::and([b.clone(), c.clone()])]);
        prop_assert_eq!(left.matches(&info, &data), right.matches(&info, &data));

        let left = Condition::or([Condition::or([a.clone(), b.clone()]), c.clone()]);
        let right = Condition::or([a, Condition::or([b, c])]);
        prop_assert_eq!(left.matches(&info, &data), right.matches(&info, &data));
    }

    #[test]
    fn expressions_reparse_to_the_same_tree(c in condition_strategy()) {
        let reparsed = parse(&c.to_expr()).unwrap();
        prop_assert_eq!(reparsed, c);
    }

    #[test]
    fn children_monitor_lowering_is_equivalent(
        parent in 0i64..6,
        children in prop::collection::btree_set(0i64..6, 0..4),
        (info, data) in event_strategy()
    ) {
        let monitor = Condition::children_monitor(parent, children);
        let lowered = parse(&monitor.to_expr()).unwrap();
        prop_assert_eq!(lowered.matches(&info, &data), monitor.matches(&info, &data));
    }
}
