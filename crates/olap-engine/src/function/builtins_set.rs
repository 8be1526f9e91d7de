use olap_model::HierarchyId;

use crate::ast::Syntax;
use crate::calc::{Calc, CalcKind, SetAggregate, SetCombine};
use crate::compiler::Compiler;
use crate::error::{OlapError, OlapResult};
use crate::function::{arguments, symbol, FunctionSpec};
use crate::types::{Category, Type};

use Category as C;

fn boxed(calc: Calc) -> Box<Calc> {
    Box::new(calc)
}

/// Shared element type of two sets combined positionally.
fn combined_type(context: &str, a: &Type, b: &Type) -> OlapResult<Type> {
    match (a.arity(), b.arity()) {
        (None, _) => Ok(b.clone()),
        (_, None) => Ok(a.clone()),
        (Some(x), Some(y)) if x == y => {
            let hierarchies = a
                .hierarchies()
                .into_iter()
                .zip(b.hierarchies())
                .map(|(x, y)| match (x, y) {
                    (Some(x), Some(y)) if x != y => Err(()),
                    (x, y) => Ok(x.or(y)),
                })
                .collect::<Result<Vec<_>, ()>>()
                .map_err(|()| OlapError::TypeMismatch {
                    context: context.to_string(),
                    expected: "sets over the same hierarchies".into(),
                    actual: format!("{a} and {b}"),
                })?;
            Ok(Type::Set(Box::new(Type::element_of(hierarchies))))
        }
        _ => Err(OlapError::TypeMismatch {
            context: context.to_string(),
            expected: a.to_string(),
            actual: b.to_string(),
        }),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Members",
        syntax: Syntax::Property,
        parameters: &[C::Level],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "Members of a level.",
        compile: members_fn,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Members",
        syntax: Syntax::Property,
        parameters: &[C::Hierarchy],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "Members of a hierarchy in hierarchical order.",
        compile: members_fn,
    }
}

fn members_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [object] = arguments("Members", args)?;
    let h = match object.ty {
        Type::Level(h) | Type::Hierarchy(h) => h,
        _ => None,
    };
    let deps = object.deps.clone();
    Ok(Calc::new(
        CalcKind::Members(boxed(object)),
        Type::member_set(h),
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Children",
        syntax: Syntax::Property,
        parameters: &[C::Member],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "Children of a member.",
        compile: children_fn,
    }
}

fn children_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [member] = arguments("Children", args)?;
    let ty = Type::Set(Box::new(member.ty.clone()));
    let deps = member.deps.clone();
    Ok(Calc::new(CalcKind::Children(boxed(member)), ty, deps))
}

inventory::submit! {
    FunctionSpec {
        name: "Siblings",
        syntax: Syntax::Property,
        parameters: &[C::Member],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "A member and its siblings.",
        compile: siblings_fn,
    }
}

fn siblings_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [member] = arguments("Siblings", args)?;
    let ty = Type::Set(Box::new(member.ty.clone()));
    let deps = member.deps.clone();
    Ok(Calc::new(CalcKind::Siblings(boxed(member)), ty, deps))
}

inventory::submit! {
    FunctionSpec {
        name: "Descendants",
        syntax: Syntax::Function,
        parameters: &[C::Member, C::Level],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Descendants of a member at a level.",
        compile: descendants_fn,
    }
}

fn descendants_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [member, level] = arguments("Descendants", args)?;
    let ty = Type::Set(Box::new(member.ty.clone()));
    let deps = c.union_deps([&member, &level]);
    Ok(Calc::new(
        CalcKind::Descendants {
            member: boxed(member),
            level: boxed(level),
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "{}",
        syntax: Syntax::Braces,
        parameters: &[C::Set],
        min_args: 0,
        repeat_last: true,
        return_category: C::Set,
        description: "Set literal; members and tuples are promoted to one-element sets.",
        compile: set_literal_fn,
    }
}

fn set_literal_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut ty = Type::Set(Box::new(Type::Empty));
    for arg in &args {
        ty = combined_type("set literal", &ty, &arg.ty)?;
    }
    let deps = c.union_deps(&args);
    Ok(Calc::new(CalcKind::SetLiteral(args), ty, deps))
}

inventory::submit! {
    FunctionSpec {
        name: "()",
        syntax: Syntax::Parentheses,
        parameters: &[C::Member, C::Member],
        min_args: 2,
        repeat_last: true,
        return_category: C::Tuple,
        description: "Tuple constructor.",
        compile: tuple_fn,
    }
}

fn tuple_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let hierarchies: Vec<Option<HierarchyId>> = args
        .iter()
        .map(|a| a.ty.hierarchies().first().copied().flatten())
        .collect();
    c.check_distinct(&hierarchies)?;
    let deps = c.union_deps(&args);
    Ok(Calc::new(
        CalcKind::Tuple(args),
        Type::Tuple(hierarchies),
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "CrossJoin",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Set],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Cartesian product of two sets.",
        compile: crossjoin_fn,
    }
}

fn crossjoin_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [left, right] = arguments("CrossJoin", args)?;
    let ty = if left.ty.arity().is_none() || right.ty.arity().is_none() {
        Type::Set(Box::new(Type::Empty))
    } else {
        let mut hierarchies = left.ty.hierarchies();
        hierarchies.extend(right.ty.hierarchies());
        c.check_distinct(&hierarchies)?;
        Type::Set(Box::new(Type::element_of(hierarchies)))
    };
    let deps = c.union_deps([&left, &right]);
    Ok(Calc::new(
        CalcKind::CrossJoin(boxed(left), boxed(right)),
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Hierarchize",
        syntax: Syntax::Function,
        parameters: &[C::Set],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "Sort a set into hierarchical order.",
        compile: hierarchize_fn,
    }
}

fn hierarchize_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [set] = arguments("Hierarchize", args)?;
    let (ty, deps) = (set.ty.clone(), set.deps.clone());
    Ok(Calc::new(CalcKind::Hierarchize(boxed(set)), ty, deps))
}

inventory::submit! {
    FunctionSpec {
        name: "Distinct",
        syntax: Syntax::Function,
        parameters: &[C::Set],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "Remove duplicate tuples, keeping the first occurrence.",
        compile: distinct_fn,
    }
}

fn distinct_fn(_c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [set] = arguments("Distinct", args)?;
    let (ty, deps) = (set.ty.clone(), set.deps.clone());
    Ok(Calc::new(CalcKind::Distinct(boxed(set)), ty, deps))
}

inventory::submit! {
    FunctionSpec {
        name: "Extract",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Hierarchy],
        min_args: 2,
        repeat_last: true,
        return_category: C::Set,
        description: "Project a set of tuples onto some of its hierarchies.",
        compile: extract_fn,
    }
}

fn extract_fn(c: &Compiler<'_>, mut args: Vec<Calc>) -> OlapResult<Calc> {
    let set = args.remove(0);
    let available = set.ty.hierarchies();
    let mut targets: Vec<HierarchyId> = Vec::new();
    let mut positions = Vec::new();
    for arg in &args {
        let h = arg.constant_hierarchy().ok_or_else(|| OlapError::TypeMismatch {
            context: "Extract".into(),
            expected: "a hierarchy known at compile time".into(),
            actual: arg.ty.to_string(),
        })?;
        if targets.contains(&h) {
            return Err(OlapError::DuplicateExtractTarget {
                hierarchy: c.hierarchy_name(h),
            });
        }
        let position = available
            .iter()
            .position(|x| *x == Some(h))
            .ok_or_else(|| OlapError::TypeMismatch {
                context: "Extract".into(),
                expected: format!("a set containing {}", c.hierarchy_name(h)),
                actual: set.ty.to_string(),
            })?;
        targets.push(h);
        positions.push(position);
    }
    let ty = Type::Set(Box::new(Type::element_of(
        targets.into_iter().map(Some).collect(),
    )));
    let deps = set.deps.clone();
    Ok(Calc::new(
        CalcKind::Extract {
            set: boxed(set),
            positions,
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Filter",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Logical],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Tuples of a set for which the condition holds.",
        compile: filter_fn,
    }
}

fn filter_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [set, cond] = arguments("Filter", args)?;
    let ty = set.ty.clone();
    let deps = c.iteration_deps(&set, &cond);
    Ok(Calc::new(
        CalcKind::Filter {
            set: boxed(set),
            cond: boxed(cond),
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Order",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Value, C::String],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Sort a set by a key; ASC and DESC keep siblings together, BASC and BDESC do not.",
        compile: order_fn,
    }
}

fn order_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let (Some(set), Some(key)) = (args.next(), args.next()) else {
        return Err(OlapError::eval("Order expects a set and a key"));
    };
    let flag = match args.next() {
        Some(flag) => symbol("Order", &flag, &["ASC", "DESC", "BASC", "BDESC"])?,
        None => "ASC".to_string(),
    };
    let ty = set.ty.clone();
    let deps = c.iteration_deps(&set, &key);
    Ok(Calc::new(
        CalcKind::Order {
            set: boxed(set),
            key: boxed(key),
            ascending: flag.ends_with("ASC"),
            breaking: flag.starts_with('B'),
        },
        ty,
        deps,
    ))
}

fn head(c: &Compiler<'_>, from_end: bool, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let set = args
        .next()
        .ok_or_else(|| OlapError::eval("Head expects a set"))?;
    let count = args
        .next()
        .unwrap_or_else(|| Calc::constant(1.into(), Type::Numeric));
    let ty = set.ty.clone();
    let deps = c.union_deps([&set, &count]);
    Ok(Calc::new(
        CalcKind::Head {
            set: boxed(set),
            count: boxed(count),
            from_end,
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Head",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Numeric],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "First n tuples of a set (default 1).",
        compile: head_fn,
    }
}

fn head_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    head(c, false, args)
}

inventory::submit! {
    FunctionSpec {
        name: "Tail",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Numeric],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "Last n tuples of a set (default 1).",
        compile: tail_fn,
    }
}

fn tail_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    head(c, true, args)
}

fn top_count(c: &Compiler<'_>, top: bool, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let (Some(set), Some(count)) = (args.next(), args.next()) else {
        return Err(OlapError::eval("TopCount expects a set and a count"));
    };
    let value = args.next();
    let ty = set.ty.clone();
    let mut deps = match &value {
        Some(value) => c.iteration_deps(&set, value),
        None => c.iteration_deps(&set, &c.cell_value(set.clone(), Type::Numeric)),
    };
    deps.union_with(&count.deps);
    Ok(Calc::new(
        CalcKind::TopCount {
            set: boxed(set),
            count: boxed(count),
            value: value.map(boxed),
            top,
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "TopCount",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Numeric, C::Numeric],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "The n tuples with the largest values, largest first.",
        compile: top_count_fn,
    }
}

fn top_count_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    top_count(c, true, args)
}

inventory::submit! {
    FunctionSpec {
        name: "BottomCount",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Numeric, C::Numeric],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "The n tuples with the smallest values, smallest first.",
        compile: bottom_count_fn,
    }
}

fn bottom_count_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    top_count(c, false, args)
}

inventory::submit! {
    FunctionSpec {
        name: "NonEmpty",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Set],
        min_args: 1,
        repeat_last: false,
        return_category: C::Set,
        description: "Tuples with a non-empty cell, optionally crossed with a filter set.",
        compile: non_empty_fn,
    }
}

fn non_empty_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let set = args
        .next()
        .ok_or_else(|| OlapError::eval("NonEmpty expects a set"))?;
    let filter = args.next();
    let ty = set.ty.clone();
    let mut iterated = set.ty.known_hierarchies();
    if let Some(filter) = &filter {
        iterated.extend(filter.ty.known_hierarchies());
    }
    let mut deps = c.all_deps().without(iterated);
    deps.union_with(&set.deps);
    if let Some(filter) = &filter {
        deps.union_with(&filter.deps);
    }
    Ok(Calc::new(
        CalcKind::NonEmpty {
            set: boxed(set),
            filter: filter.map(boxed),
        },
        ty,
        deps,
    ))
}

fn combine(c: &Compiler<'_>, name: &str, op: SetCombine, left: Calc, right: Calc) -> OlapResult<Calc> {
    let ty = combined_type(name, &left.ty, &right.ty)?;
    let deps = c.union_deps([&left, &right]);
    Ok(Calc::new(
        CalcKind::Combine {
            op,
            left: boxed(left),
            right: boxed(right),
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Union",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Set, C::String],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Union of two sets; duplicates are removed unless ALL is given.",
        compile: union_fn,
    }
}

fn union_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let (Some(left), Some(right)) = (args.next(), args.next()) else {
        return Err(OlapError::eval("Union expects two sets"));
    };
    let all = match args.next() {
        Some(flag) => symbol("Union", &flag, &["ALL", "DISTINCT"])? == "ALL",
        None => false,
    };
    combine(c, "Union", SetCombine::Union { all }, left, right)
}

inventory::submit! {
    FunctionSpec {
        name: "Except",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Set],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Tuples of the first set missing from the second.",
        compile: except_fn,
    }
}

fn except_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [left, right] = arguments("Except", args)?;
    combine(c, "Except", SetCombine::Except, left, right)
}

inventory::submit! {
    FunctionSpec {
        name: "Intersect",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Set],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Tuples present in both sets, in the order of the first.",
        compile: intersect_fn,
    }
}

fn intersect_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [left, right] = arguments("Intersect", args)?;
    combine(c, "Intersect", SetCombine::Intersect, left, right)
}

inventory::submit! {
    FunctionSpec {
        name: "Generate",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Set, C::String],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Union of a set expression evaluated once per tuple of a source set.",
        compile: generate_fn,
    }
}

fn generate_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let (Some(source), Some(body)) = (args.next(), args.next()) else {
        return Err(OlapError::eval("Generate expects two sets"));
    };
    let all = match args.next() {
        Some(flag) => symbol("Generate", &flag, &["ALL", "DISTINCT"])? == "ALL",
        None => false,
    };
    let ty = body.ty.clone();
    let deps = c.iteration_deps(&source, &body);
    Ok(Calc::new(
        CalcKind::Generate {
            source: boxed(source),
            body: boxed(body),
            all,
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Exists",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::Set],
        min_args: 2,
        repeat_last: false,
        return_category: C::Set,
        description: "Tuples of the first set related to some tuple of the second on their shared hierarchies.",
        compile: exists_fn,
    }
}

fn exists_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [set, filter] = arguments("Exists", args)?;
    let ty = set.ty.clone();
    let deps = c.union_deps([&set, &filter]);
    Ok(Calc::new(
        CalcKind::Exists {
            set: boxed(set),
            filter: boxed(filter),
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Item",
        syntax: Syntax::Method,
        parameters: &[C::Set, C::Numeric],
        min_args: 2,
        repeat_last: false,
        return_category: C::Tuple,
        description: "Tuple at a zero-based position; an empty tuple past the end.",
        compile: item_fn,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Item",
        syntax: Syntax::Method,
        parameters: &[C::Tuple, C::Numeric],
        min_args: 2,
        repeat_last: false,
        return_category: C::Member,
        description: "Member at a zero-based position of a tuple.",
        compile: item_fn,
    }
}

fn item_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let [set, index] = arguments("Item", args)?;
    let ty = match &set.ty {
        Type::Set(elem) => match elem.as_ref() {
            Type::Member(h) => Type::Member(*h),
            Type::Tuple(hs) => Type::Tuple(hs.clone()),
            _ => Type::Tuple(Vec::new()),
        },
        _ => {
            let known = index
                .constant_value()
                .and_then(|v| v.as_f64())
                .filter(|i| *i >= 0.0)
                .and_then(|i| set.ty.hierarchies().get(i as usize).copied().flatten());
            Type::Member(known)
        }
    };
    let deps = c.union_deps([&set, &index]);
    Ok(Calc::new(
        CalcKind::Item {
            set: boxed(set),
            index: boxed(index),
        },
        ty,
        deps,
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "Count",
        syntax: Syntax::Property,
        parameters: &[C::Set],
        min_args: 1,
        repeat_last: false,
        return_category: C::Numeric,
        description: "Number of tuples in a set.",
        compile: count_fn,
    }
}

inventory::submit! {
    FunctionSpec {
        name: "Count",
        syntax: Syntax::Function,
        parameters: &[C::Set, C::String],
        min_args: 1,
        repeat_last: false,
        return_category: C::Numeric,
        description: "Number of tuples; EXCLUDEEMPTY skips tuples whose cell is empty.",
        compile: count_fn,
    }
}

fn count_fn(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let set = args
        .next()
        .ok_or_else(|| OlapError::eval("Count expects a set"))?;
    let include_empty = match args.next() {
        Some(flag) => symbol("Count", &flag, &["EXCLUDEEMPTY", "INCLUDEEMPTY"])? == "INCLUDEEMPTY",
        None => true,
    };
    let deps = if include_empty {
        set.deps.clone()
    } else {
        c.iteration_deps(&set, &c.cell_value(set.clone(), Type::Numeric))
    };
    Ok(Calc::new(
        CalcKind::Count {
            set: boxed(set),
            include_empty,
        },
        Type::Numeric,
        deps,
    ))
}

fn set_aggregate(c: &Compiler<'_>, func: SetAggregate, args: Vec<Calc>) -> OlapResult<Calc> {
    let mut args = args.into_iter();
    let set = args
        .next()
        .ok_or_else(|| OlapError::eval("aggregate expects a set"))?;
    let value = args.next();
    let deps = match &value {
        Some(value) => c.iteration_deps(&set, value),
        None => c.iteration_deps(&set, &c.cell_value(set.clone(), Type::Numeric)),
    };
    Ok(Calc::new(
        CalcKind::SetAggregate {
            func,
            set: boxed(set),
            value: value.map(boxed),
        },
        Type::Numeric,
        deps,
    ))
}

macro_rules! set_aggregate {
    ($fn_name:ident, $name:literal, $func:expr, $doc:literal) => {
        inventory::submit! {
            FunctionSpec {
                name: $name,
                syntax: Syntax::Function,
                parameters: &[C::Set, C::Numeric],
                min_args: 1,
                repeat_last: false,
                return_category: C::Numeric,
                description: $doc,
                compile: $fn_name,
            }
        }

        fn $fn_name(c: &Compiler<'_>, args: Vec<Calc>) -> OlapResult<Calc> {
            set_aggregate(c, $func, args)
        }
    };
}

set_aggregate!(sum_fn, "Sum", SetAggregate::Sum, "Sum over a set, skipping empty values.");
set_aggregate!(avg_fn, "Avg", SetAggregate::Avg, "Average of the non-empty values over a set.");
set_aggregate!(min_fn, "Min", SetAggregate::Min, "Smallest non-empty value over a set.");
set_aggregate!(max_fn, "Max", SetAggregate::Max, "Largest non-empty value over a set.");
set_aggregate!(aggregate_fn, "Aggregate", SetAggregate::Aggregate, "Combine values over a set with the current measure's aggregator.");
