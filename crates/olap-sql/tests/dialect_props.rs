use std::cmp::Ordering;

use olap_sql::dialect::{order_keys, quote_identifier, quote_string_literal, OrderKey};
use olap_sql::{Dialect, DialectKind, NullCollation};
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = DialectKind> {
    proptest::sample::select(DialectKind::ALL.to_vec())
}

/// Sort `values` the way `dialect`'s backend would execute the generated order keys.
fn simulate(dialect: &Dialect, keys: &[OrderKey], values: &mut [Option<i32>]) {
    values.sort_by(|a, b| {
        for key in keys {
            let ord = match key {
                OrderKey::NullFlag { null_rank, .. } => {
                    let flag = |v: &Option<i32>| match v {
                        None => *null_rank,
                        Some(_) => 1 - null_rank,
                    };
                    flag(a).cmp(&flag(b))
                }
                OrderKey::Value {
                    ascending,
                    explicit_nulls_last,
                    ..
                } => {
                    let nulls_last = explicit_nulls_last
                        .or_else(|| dialect.null_collation.nulls_last(*ascending))
                        .unwrap_or(true);
                    match (a, b) {
                        (None, None) => Ordering::Equal,
                        (None, Some(_)) if nulls_last => Ordering::Greater,
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) if nulls_last => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (Some(x), Some(y)) if *ascending => x.cmp(y),
                        (Some(x), Some(y)) => y.cmp(x),
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

proptest! {
    #[test]
    fn generated_order_places_nulls_as_requested(
        kind in arb_kind(),
        ascending in any::<bool>(),
        nulls_last in any::<bool>(),
        mut values in proptest::collection::vec(proptest::option::of(-50i32..50), 0..20),
    ) {
        let dialect = Dialect::for_kind(kind);
        let keys = order_keys(&dialect, "c", true, ascending, nulls_last);
        if dialect.null_collation == NullCollation::Unknown && !dialect.supports_nulls_ordering {
            let leads_with_null_flag = matches!(keys[0], OrderKey::NullFlag { .. });
            prop_assert!(leads_with_null_flag);
        }
        simulate(&dialect, &keys, &mut values);

        let null_count = values.iter().filter(|v| v.is_none()).count();
        let (nulls, rest) = if nulls_last {
            let split = values.len() - null_count;
            (&values[split..], &values[..split])
        } else {
            (&values[..null_count], &values[null_count..])
        };
        prop_assert!(nulls.iter().all(Option::is_none));
        let rest_sorted = rest.windows(2).all(|w| if ascending { w[0] <= w[1] } else { w[0] >= w[1] });
        prop_assert!(rest_sorted);
    }

    #[test]
    fn dialect_records_are_pure(kind in arb_kind()) {
        prop_assert_eq!(Dialect::for_kind(kind), Dialect::for_kind(kind));
        prop_assert_eq!(Dialect::for_kind(kind).kind, kind);
    }

    #[test]
    fn quoted_identifiers_unescape_to_the_original(kind in arb_kind(), name in "[a-zA-Z0-9 `\"\\[\\]_]{0,12}") {
        let dialect = Dialect::for_kind(kind);
        let quoted = quote_identifier(&dialect, &name);
        let inner: String = quoted.chars().skip(1).take(quoted.chars().count() - 2).collect();
        let doubled: String = [dialect.quote_close, dialect.quote_close].iter().collect();
        prop_assert_eq!(inner.replace(&doubled, &dialect.quote_close.to_string()), name);
    }

    #[test]
    fn string_literals_never_leave_a_bare_quote(kind in arb_kind(), text in ".{0,16}") {
        let dialect = Dialect::for_kind(kind);
        let quoted = quote_string_literal(&dialect, &text);
        let inner = &quoted[1..quoted.len() - 1];
        prop_assert_eq!(inner.replace("''", "").matches('\'').count(), 0);
    }
}
